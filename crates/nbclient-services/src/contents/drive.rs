//! Drives: named contents backends
//!
//! A [`Drive`] operates on paths local to itself. [`RestDrive`] talks to
//! the server's contents REST endpoint:
//!
//! | operation | request | success |
//! |-----------|---------|---------|
//! | get | `GET /api/contents/{path}?type&format&content` | 200 |
//! | new_untitled | `POST /api/contents/{dir}` | 201 |
//! | delete | `DELETE /api/contents/{path}` | 204 |
//! | rename | `PATCH /api/contents/{path}` | 200 |
//! | save | `PUT /api/contents/{path}` | 200, 201 |
//! | copy | `POST /api/contents/{dir}` | 201 |
//! | checkpoints | `.../{path}/checkpoints[/{id}]` | 201, 200, 204 |

use super::model::{
    CheckpointModel, ContentType, ContentsModel, FileChange, FileChangeKind, GetOptions, NewUntitledOptions,
    PartialContentsModel,
};
use crate::error::{ContentsError, ServerError};
use crate::settings::ServerSettings;
use crate::transport::HttpResponse;
use async_trait::async_trait;
use nbclient_core::Signal;
use reqwest::Method;
use serde_json::{json, Map, Value};

const CONTENTS: [&str; 2] = ["api", "contents"];

/// Result alias for contents operations
pub type ContentsResult<T> = Result<T, ContentsError>;

/// Named contents backend working on local paths
#[async_trait]
pub trait Drive: Send + Sync {
    /// Drive name; the default drive's name is never used as a prefix
    fn name(&self) -> &str;

    /// Emitted after every successful mutation
    fn file_changed(&self) -> &Signal<dyn Drive, FileChange>;

    /// Fetch a model
    async fn get(&self, path: &str, options: &GetOptions) -> ContentsResult<ContentsModel>;

    /// URL the raw file can be downloaded from
    async fn get_download_url(&self, path: &str) -> ContentsResult<String>;

    /// Create an untitled file, notebook or directory
    async fn new_untitled(&self, options: &NewUntitledOptions) -> ContentsResult<ContentsModel>;

    /// Delete an entry
    async fn delete(&self, path: &str) -> ContentsResult<()>;

    /// Move an entry
    async fn rename(&self, path: &str, new_path: &str) -> ContentsResult<ContentsModel>;

    /// Write an entry
    async fn save(&self, path: &str, model: &PartialContentsModel) -> ContentsResult<ContentsModel>;

    /// Copy a file into a directory
    async fn copy(&self, from: &str, to_dir: &str) -> ContentsResult<ContentsModel>;

    /// Checkpoint an entry
    async fn create_checkpoint(&self, path: &str) -> ContentsResult<CheckpointModel>;

    /// List an entry's checkpoints
    async fn list_checkpoints(&self, path: &str) -> ContentsResult<Vec<CheckpointModel>>;

    /// Restore an entry to a checkpoint
    async fn restore_checkpoint(&self, path: &str, checkpoint_id: &str) -> ContentsResult<()>;

    /// Delete a checkpoint
    async fn delete_checkpoint(&self, path: &str, checkpoint_id: &str) -> ContentsResult<()>;
}

/// Drive backed by the contents REST API
pub struct RestDrive {
    name: String,
    settings: ServerSettings,
    file_changed: Signal<dyn Drive, FileChange>,
}

impl RestDrive {
    /// Name of the server's own drive
    pub const DEFAULT_NAME: &'static str = "Default";

    /// Create drive
    #[must_use]
    pub fn new(name: impl Into<String>, settings: ServerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            file_changed: Signal::new(),
        }
    }

    /// Server settings
    #[inline]
    #[must_use]
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    fn notify(&self, kind: FileChangeKind, old_path: Option<String>, new_value: Option<ContentsModel>) {
        self.file_changed.emit(
            self,
            &FileChange {
                kind,
                old_path,
                new_value,
            },
        );
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        suffix: &[&str],
        body: Option<Value>,
        expected: &[u16],
    ) -> Result<HttpResponse, ServerError> {
        let target = if suffix.is_empty() {
            path.to_string()
        } else {
            format!("{path}/{}", suffix.join("/"))
        };
        let url = self.settings.url(&CONTENTS, &target)?;
        self.settings.request(method, url, body, expected).await
    }
}

fn validate_model(body: &HttpResponse) -> Result<ContentsModel, ServerError> {
    let model: ContentsModel = body.decode("contents model")?;
    if let Some(Value::Array(items)) = &model.content {
        if model.kind == ContentType::Directory {
            for item in items {
                serde_json::from_value::<ContentsModel>(item.clone())
                    .map_err(|e| ServerError::validation("directory listing", e))?;
            }
        }
    }
    Ok(model)
}

#[async_trait]
impl Drive for RestDrive {
    fn name(&self) -> &str {
        &self.name
    }

    fn file_changed(&self) -> &Signal<dyn Drive, FileChange> {
        &self.file_changed
    }

    async fn get(&self, path: &str, options: &GetOptions) -> ContentsResult<ContentsModel> {
        let mut url = self.settings.url(&CONTENTS, path)?;
        url.query_pairs_mut().extend_pairs(options.query());
        let resp = self.settings.request(Method::GET, url, None, &[200]).await?;
        Ok(validate_model(&resp)?)
    }

    async fn get_download_url(&self, path: &str) -> ContentsResult<String> {
        Ok(self.settings.url(&["files"], path)?.to_string())
    }

    async fn new_untitled(&self, options: &NewUntitledOptions) -> ContentsResult<ContentsModel> {
        let mut body = Map::new();
        if let Some(kind) = options.kind {
            body.insert("type".into(), json!(kind.as_str()));
        }
        if let Some(ext) = &options.ext {
            body.insert("ext".into(), json!(ext));
        }
        let resp = self
            .send(Method::POST, &options.path, &[], Some(Value::Object(body)), &[201])
            .await?;
        let model = validate_model(&resp)?;
        self.notify(FileChangeKind::New, None, Some(model.clone()));
        Ok(model)
    }

    async fn delete(&self, path: &str) -> ContentsResult<()> {
        match self.send(Method::DELETE, path, &[], None, &[204]).await {
            Ok(_) => {
                self.notify(FileChangeKind::Delete, Some(path.to_string()), None);
                Ok(())
            }
            Err(ServerError::Response {
                status: 400,
                message,
                ..
            }) => Err(ContentsError::DeleteRejected(message)),
            Err(e) => Err(e.into()),
        }
    }

    async fn rename(&self, path: &str, new_path: &str) -> ContentsResult<ContentsModel> {
        let resp = self
            .send(
                Method::PATCH,
                path,
                &[],
                Some(json!({ "path": new_path })),
                &[200],
            )
            .await?;
        let model = validate_model(&resp)?;
        self.notify(
            FileChangeKind::Rename,
            Some(path.to_string()),
            Some(model.clone()),
        );
        Ok(model)
    }

    async fn save(&self, path: &str, model: &PartialContentsModel) -> ContentsResult<ContentsModel> {
        let body = serde_json::to_value(model).map_err(ServerError::from)?;
        let resp = self
            .send(Method::PUT, path, &[], Some(body), &[200, 201])
            .await?;
        let saved = validate_model(&resp)?;
        self.notify(FileChangeKind::Save, None, Some(saved.clone()));
        Ok(saved)
    }

    async fn copy(&self, from: &str, to_dir: &str) -> ContentsResult<ContentsModel> {
        let resp = self
            .send(
                Method::POST,
                to_dir,
                &[],
                Some(json!({ "copy_from": from })),
                &[201],
            )
            .await?;
        let model = validate_model(&resp)?;
        self.notify(FileChangeKind::New, None, Some(model.clone()));
        Ok(model)
    }

    async fn create_checkpoint(&self, path: &str) -> ContentsResult<CheckpointModel> {
        let resp = self
            .send(Method::POST, path, &["checkpoints"], None, &[201])
            .await?;
        Ok(resp.decode("checkpoint model")?)
    }

    async fn list_checkpoints(&self, path: &str) -> ContentsResult<Vec<CheckpointModel>> {
        let resp = self
            .send(Method::GET, path, &["checkpoints"], None, &[200])
            .await?;
        Ok(resp.decode("checkpoint list")?)
    }

    async fn restore_checkpoint(&self, path: &str, checkpoint_id: &str) -> ContentsResult<()> {
        self.send(Method::POST, path, &["checkpoints", checkpoint_id], None, &[204])
            .await?;
        Ok(())
    }

    async fn delete_checkpoint(&self, path: &str, checkpoint_id: &str) -> ContentsResult<()> {
        self.send(Method::DELETE, path, &["checkpoints", checkpoint_id], None, &[204])
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for RestDrive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestDrive")
            .field("name", &self.name)
            .field("base_url", &self.settings.base_url().as_str())
            .finish_non_exhaustive()
    }
}
