//! Contents manager
//!
//! Routes file operations to one default drive plus any number of named
//! drives. A path whose first segment reads `name:rest` belongs to the
//! drive registered as `name`; anything else belongs to the default drive.
//!
//! Callers only ever see global paths (`name:local/path` for named drives,
//! plain `local/path` for the default drive); drives only ever see their
//! own local paths.

use super::drive::{ContentsResult, Drive};
use super::model::{
    CheckpointModel, ContentType, ContentsModel, FileChange, GetOptions, NewUntitledOptions,
    PartialContentsModel,
};
use crate::error::ContentsError;
use nbclient_core::{path, Disposable, DisposalState, Signal, SlotId};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

struct Resolved {
    drive: Arc<dyn Drive>,
    /// Empty for the default drive
    drive_name: String,
    local: String,
}

/// Unified file API over several drives
pub struct ContentsManager {
    this: Weak<Self>,
    default_drive: Arc<dyn Drive>,
    drives: RwLock<HashMap<String, Arc<dyn Drive>>>,
    connections: Mutex<Vec<(Arc<dyn Drive>, SlotId)>>,
    file_changed: Signal<ContentsManager, FileChange>,
    disposal: DisposalState,
}

impl ContentsManager {
    /// Create manager around the default drive
    #[must_use]
    pub fn new(default_drive: Arc<dyn Drive>) -> Arc<Self> {
        let manager = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            default_drive: Arc::clone(&default_drive),
            drives: RwLock::new(HashMap::new()),
            connections: Mutex::new(Vec::new()),
            file_changed: Signal::new(),
            disposal: DisposalState::new(),
        });
        manager.forward_changes(default_drive, String::new());
        manager
    }

    /// Re-emits every drive's changes with global paths
    #[inline]
    #[must_use]
    pub fn file_changed(&self) -> &Signal<ContentsManager, FileChange> {
        &self.file_changed
    }

    /// The default drive
    #[inline]
    #[must_use]
    pub fn default_drive(&self) -> &Arc<dyn Drive> {
        &self.default_drive
    }

    /// Register a named drive, replacing any drive with the same name
    pub fn add_drive(&self, drive: Arc<dyn Drive>) {
        let name = drive.name().to_string();
        tracing::debug!("registering drive '{}'", name);
        if let Some(previous) = self.drives.write().insert(name.clone(), Arc::clone(&drive)) {
            self.disconnect(&previous);
        }
        self.forward_changes(drive, name);
    }

    /// Registered drive by name
    #[must_use]
    pub fn drive(&self, name: &str) -> Option<Arc<dyn Drive>> {
        self.drives.read().get(name).cloned()
    }

    /// Drive-local part of a global path
    ///
    /// Paths without a registered drive prefix are default-drive paths.
    #[must_use]
    pub fn local_path(&self, path: &str) -> String {
        match self.split_prefix(path) {
            Some((_, rest)) => path::normalize(rest),
            None => path::remove_slash(path).to_string(),
        }
    }

    /// Drive name of a global path, `""` for the default drive
    #[must_use]
    pub fn drive_name(&self, path: &str) -> String {
        self.split_prefix(path)
            .map(|(name, _)| name.to_string())
            .unwrap_or_default()
    }

    /// Normalize a global path, keeping any drive prefix
    #[must_use]
    pub fn normalize(&self, path: &str) -> String {
        match path.split_once(':') {
            Some((drive, rest)) => format!("{drive}:{}", path::normalize(rest)),
            None => path::normalize(path),
        }
    }

    /// Resolve `path` relative to the global path `root`
    #[must_use]
    pub fn resolve_path(&self, root: &str, path: &str) -> String {
        let drive = self.drive_name(root);
        let resolved = path::resolve(&self.local_path(root), path);
        if drive.is_empty() {
            resolved
        } else {
            format!("{drive}:{resolved}")
        }
    }

    /// Fetch a model; directory listings get global child paths
    ///
    /// # Errors
    /// Propagates drive errors.
    pub async fn get(&self, path: &str, options: &GetOptions) -> ContentsResult<ContentsModel> {
        let target = self.resolve(path);
        let mut model = target.drive.get(&target.local, options).await?;

        if model.kind == ContentType::Directory {
            if let Some(Value::Array(items)) = model.content.as_mut() {
                for item in items.iter_mut() {
                    let local = item.get("path").and_then(Value::as_str).map(str::to_string);
                    if let (Some(local), Some(obj)) = (local, item.as_object_mut()) {
                        obj.insert(
                            "path".into(),
                            Value::String(to_global(&target.drive_name, &local)),
                        );
                    }
                }
            }
        }
        model.path = to_global(&target.drive_name, &target.local);
        Ok(model)
    }

    /// Download URL for a file
    ///
    /// # Errors
    /// Propagates drive errors.
    pub async fn get_download_url(&self, path: &str) -> ContentsResult<String> {
        let target = self.resolve(path);
        target.drive.get_download_url(&target.local).await
    }

    /// Create an untitled entry in the directory named by `options.path`
    ///
    /// # Errors
    /// Propagates drive errors.
    pub async fn new_untitled(&self, options: &NewUntitledOptions) -> ContentsResult<ContentsModel> {
        if options.path.is_empty() {
            return self.default_drive.new_untitled(options).await;
        }
        let global_dir = self.normalize(&options.path);
        let target = self.resolve(&global_dir);
        let local_options = NewUntitledOptions {
            path: target.local.clone(),
            ..options.clone()
        };
        let mut model = target.drive.new_untitled(&local_options).await?;
        model.path = join_global(&global_dir, &model.name);
        Ok(model)
    }

    /// Delete an entry
    ///
    /// # Errors
    /// `ContentsError::DeleteRejected` when the server refuses, or any
    /// drive error.
    pub async fn delete(&self, path: &str) -> ContentsResult<()> {
        let target = self.resolve(path);
        target.drive.delete(&target.local).await
    }

    /// Move an entry within one drive
    ///
    /// # Errors
    /// `ContentsError::CrossDrive` if the paths belong to different drives.
    pub async fn rename(&self, path: &str, new_path: &str) -> ContentsResult<ContentsModel> {
        let from = self.resolve(path);
        let to = self.resolve(new_path);
        if from.drive_name != to.drive_name {
            return Err(ContentsError::CrossDrive {
                operation: "rename",
                from: from.drive_name,
                to: to.drive_name,
            });
        }
        let mut model = from.drive.rename(&from.local, &to.local).await?;
        model.path = to_global(&from.drive_name, &model.path);
        Ok(model)
    }

    /// Write an entry; the returned model carries the normalized global path
    ///
    /// # Errors
    /// Propagates drive errors.
    pub async fn save(
        &self,
        path: &str,
        model: &PartialContentsModel,
    ) -> ContentsResult<ContentsModel> {
        let global = self.normalize(path);
        let target = self.resolve(path);
        let local_model = PartialContentsModel {
            path: Some(target.local.clone()),
            ..model.clone()
        };
        let mut saved = target.drive.save(&target.local, &local_model).await?;
        saved.path = global;
        Ok(saved)
    }

    /// Copy a file into a directory on the same drive
    ///
    /// # Errors
    /// `ContentsError::CrossDrive` if the paths belong to different drives.
    pub async fn copy(&self, from: &str, to_dir: &str) -> ContentsResult<ContentsModel> {
        let source = self.resolve(from);
        let dest = self.resolve(to_dir);
        if source.drive_name != dest.drive_name {
            return Err(ContentsError::CrossDrive {
                operation: "copy",
                from: source.drive_name,
                to: dest.drive_name,
            });
        }
        let mut model = source.drive.copy(&source.local, &dest.local).await?;
        model.path = to_global(&source.drive_name, &model.path);
        Ok(model)
    }

    /// Checkpoint an entry
    ///
    /// # Errors
    /// Propagates drive errors.
    pub async fn create_checkpoint(&self, path: &str) -> ContentsResult<CheckpointModel> {
        let target = self.resolve(path);
        target.drive.create_checkpoint(&target.local).await
    }

    /// List checkpoints
    ///
    /// # Errors
    /// Propagates drive errors.
    pub async fn list_checkpoints(&self, path: &str) -> ContentsResult<Vec<CheckpointModel>> {
        let target = self.resolve(path);
        target.drive.list_checkpoints(&target.local).await
    }

    /// Restore a checkpoint
    ///
    /// # Errors
    /// Propagates drive errors.
    pub async fn restore_checkpoint(&self, path: &str, checkpoint_id: &str) -> ContentsResult<()> {
        let target = self.resolve(path);
        target
            .drive
            .restore_checkpoint(&target.local, checkpoint_id)
            .await
    }

    /// Delete a checkpoint
    ///
    /// # Errors
    /// Propagates drive errors.
    pub async fn delete_checkpoint(&self, path: &str, checkpoint_id: &str) -> ContentsResult<()> {
        let target = self.resolve(path);
        target
            .drive
            .delete_checkpoint(&target.local, checkpoint_id)
            .await
    }

    fn split_prefix<'a>(&self, path: &'a str) -> Option<(&'a str, &'a str)> {
        let first = path.split('/').next().unwrap_or_default();
        let (name, _) = first.split_once(':')?;
        if !self.drives.read().contains_key(name) {
            return None;
        }
        Some((name, &path[name.len() + 1..]))
    }

    fn resolve(&self, path: &str) -> Resolved {
        let drive_name = self.drive_name(path);
        let drive = if drive_name.is_empty() {
            None
        } else {
            self.drive(&drive_name)
        };
        Resolved {
            drive: drive.unwrap_or_else(|| Arc::clone(&self.default_drive)),
            local: self.local_path(path),
            drive_name,
        }
    }

    fn forward_changes(&self, drive: Arc<dyn Drive>, prefix: String) {
        let manager = self.this.clone();
        let slot = drive.file_changed().connect(move |_, change: &FileChange| {
            let Some(manager) = manager.upgrade() else {
                return;
            };
            let global = FileChange {
                kind: change.kind,
                old_path: change.old_path.as_deref().map(|p| to_global(&prefix, p)),
                new_value: change.new_value.clone().map(|mut model| {
                    model.path = to_global(&prefix, &model.path);
                    model
                }),
            };
            manager.file_changed.emit(&manager, &global);
        });
        self.connections.lock().push((drive, slot));
    }

    fn disconnect(&self, drive: &Arc<dyn Drive>) {
        self.connections.lock().retain(|(connected, slot)| {
            if Arc::ptr_eq(connected, drive) {
                connected.file_changed().disconnect(*slot);
                false
            } else {
                true
            }
        });
    }
}

impl Disposable for ContentsManager {
    fn is_disposed(&self) -> bool {
        self.disposal.is_disposed()
    }

    fn dispose(&self) {
        if !self.disposal.begin() {
            return;
        }
        for (drive, slot) in self.connections.lock().drain(..) {
            drive.file_changed().disconnect(slot);
        }
        self.file_changed.disconnect_all();
    }
}

impl fmt::Debug for ContentsManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut drives: Vec<String> = self.drives.read().keys().cloned().collect();
        drives.sort();
        f.debug_struct("ContentsManager")
            .field("default_drive", &self.default_drive.name())
            .field("drives", &drives)
            .finish_non_exhaustive()
    }
}

fn to_global(drive_name: &str, local: &str) -> String {
    let local = path::remove_slash(local);
    if drive_name.is_empty() {
        local.to_string()
    } else {
        format!("{drive_name}:{local}")
    }
}

fn join_global(dir: &str, name: &str) -> String {
    match dir.split_once(':') {
        Some((drive, rest)) => format!("{drive}:{}", path::join([rest, name])),
        None => path::join([dir, name]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contents::RestDrive;
    use crate::error::{ServerError, ServerResult};
    use crate::settings::ServerSettings;
    use crate::transport::{HttpRequest, HttpResponse, Transport};
    use async_trait::async_trait;
    use proptest::prelude::*;

    struct Offline;

    #[async_trait]
    impl Transport for Offline {
        async fn send(&self, _request: HttpRequest) -> ServerResult<HttpResponse> {
            Err(ServerError::Transport("offline".into()))
        }
    }

    fn drive(name: &str) -> Arc<dyn Drive> {
        let settings = ServerSettings::new("http://localhost:8888/", Arc::new(Offline)).unwrap();
        Arc::new(RestDrive::new(name, settings))
    }

    fn manager() -> Arc<ContentsManager> {
        let manager = ContentsManager::new(drive(RestDrive::DEFAULT_NAME));
        manager.add_drive(drive("s3"));
        manager
    }

    #[test]
    fn splits_registered_prefix() {
        let m = manager();
        assert_eq!(m.drive_name("s3:data/a.csv"), "s3");
        assert_eq!(m.local_path("s3:data/a.csv"), "data/a.csv");
        assert_eq!(m.local_path("s3:/data//b/../a.csv"), "data/a.csv");
        assert_eq!(m.drive_name("gcs:data/a.csv"), "");
        assert_eq!(m.local_path("gcs:data/a.csv"), "gcs:data/a.csv");
        assert_eq!(m.drive_name("dir/s3:a"), "");
        assert_eq!(m.local_path("/notes/todo.md"), "notes/todo.md");
    }

    #[test]
    fn normalize_keeps_drive_prefix() {
        let m = manager();
        assert_eq!(m.normalize("s3:/a//b/./c/"), "s3:a/b/c");
        assert_eq!(m.normalize("/a/../b"), "b");
    }

    #[test]
    fn resolve_path_stays_on_drive() {
        let m = manager();
        assert_eq!(m.resolve_path("s3:data", "../x.csv"), "s3:x.csv");
        assert_eq!(m.resolve_path("notes", "a.md"), "notes/a.md");
        assert_eq!(m.resolve_path("notes", "/a.md"), "a.md");
    }

    #[test]
    fn global_path_helpers() {
        assert_eq!(to_global("", "/a/b"), "a/b");
        assert_eq!(to_global("s3", "a/b"), "s3:a/b");
        assert_eq!(join_global("s3:dir", "untitled.txt"), "s3:dir/untitled.txt");
        assert_eq!(join_global("dir", "untitled.txt"), "dir/untitled.txt");
    }

    #[tokio::test]
    async fn cross_drive_rename_and_copy_fail_without_requests() {
        let m = manager();
        let err = m.rename("a.txt", "s3:a.txt").await.unwrap_err();
        assert!(matches!(err, ContentsError::CrossDrive { operation: "rename", .. }));
        let err = m.copy("s3:a.txt", "backup").await.unwrap_err();
        assert!(matches!(err, ContentsError::CrossDrive { operation: "copy", .. }));
    }

    #[test]
    fn dispose_disconnects_drives() {
        let m = manager();
        let s3 = m.drive("s3").unwrap();
        assert_eq!(s3.file_changed().slot_count(), 1);
        m.dispose();
        assert_eq!(s3.file_changed().slot_count(), 0);
        assert_eq!(m.default_drive().file_changed().slot_count(), 0);
    }

    #[test]
    fn replacing_drive_moves_forwarding() {
        let m = manager();
        let old = m.drive("s3").unwrap();
        m.add_drive(drive("s3"));
        assert_eq!(old.file_changed().slot_count(), 0);
        assert_eq!(m.drive("s3").unwrap().file_changed().slot_count(), 1);
    }

    proptest! {
        #[test]
        fn registered_prefix_round_trips(p in "[a-z0-9_./]{0,24}") {
            let m = manager();
            let global = format!("s3:{p}");
            prop_assert_eq!(m.drive_name(&global), "s3");
            prop_assert_eq!(m.local_path(&global), path::normalize(&p));
        }

        #[test]
        fn unregistered_prefix_is_local(p in "[a-z0-9_./]{0,24}") {
            let m = manager();
            let global = format!("gcs:{p}");
            prop_assert_eq!(m.drive_name(&global), "");
            prop_assert_eq!(m.local_path(&global), path::remove_slash(&global));
        }
    }
}
