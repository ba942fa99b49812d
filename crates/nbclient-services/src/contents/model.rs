//! Contents wire models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of contents entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Plain file
    File,
    /// Directory
    Directory,
    /// Notebook document
    Notebook,
}

impl ContentType {
    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Notebook => "notebook",
        }
    }
}

/// Encoding of the `content` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    /// UTF-8 text
    Text,
    /// Base64-encoded bytes
    Base64,
    /// Structured JSON
    Json,
}

impl ContentFormat {
    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Base64 => "base64",
            Self::Json => "json",
        }
    }
}

/// Full contents model as returned by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentsModel {
    /// Basename
    pub name: String,
    /// Full path (global when returned by the contents manager)
    pub path: String,
    /// Entry kind
    #[serde(rename = "type")]
    pub kind: ContentType,
    /// Whether the entry can be written
    #[serde(default)]
    pub writable: bool,
    /// Creation time
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    /// Last modification time
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
    /// Mimetype, for files
    #[serde(default)]
    pub mimetype: Option<String>,
    /// Payload; a list of models for directories
    #[serde(default)]
    pub content: Option<Value>,
    /// Payload encoding
    #[serde(default)]
    pub format: Option<ContentFormat>,
}

impl ContentsModel {
    /// Directory children, when content was requested
    ///
    /// Returns `None` for files or when the listing is absent or malformed.
    #[must_use]
    pub fn children(&self) -> Option<Vec<ContentsModel>> {
        if self.kind != ContentType::Directory {
            return None;
        }
        let items = self.content.as_ref()?.as_array()?;
        items
            .iter()
            .map(|item| serde_json::from_value(item.clone()).ok())
            .collect()
    }
}

/// Partial model sent on save
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialContentsModel {
    /// Basename
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Entry kind
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ContentType>,
    /// Payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    /// Payload encoding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ContentFormat>,
    /// Mimetype
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
}

impl PartialContentsModel {
    /// Text file payload
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: Some(ContentType::File),
            format: Some(ContentFormat::Text),
            content: Some(Value::String(content.into())),
            ..Self::default()
        }
    }

    /// Notebook payload
    #[must_use]
    pub fn notebook(content: Value) -> Self {
        Self {
            kind: Some(ContentType::Notebook),
            format: Some(ContentFormat::Json),
            content: Some(content),
            ..Self::default()
        }
    }
}

/// Checkpoint metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointModel {
    /// Checkpoint id
    pub id: String,
    /// When the checkpoint was taken
    pub last_modified: DateTime<Utc>,
}

/// Options for [`crate::contents::Drive::get`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetOptions {
    /// Expected kind
    pub kind: Option<ContentType>,
    /// Requested encoding; ignored for notebooks
    pub format: Option<ContentFormat>,
    /// Whether to include the payload
    pub content: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            kind: None,
            format: None,
            content: true,
        }
    }
}

impl GetOptions {
    /// Metadata only
    #[must_use]
    pub fn metadata() -> Self {
        Self {
            content: false,
            ..Self::default()
        }
    }

    /// Query pairs for the request
    #[must_use]
    pub fn query(&self) -> Vec<(&'static str, &'static str)> {
        let mut pairs = Vec::new();
        if let Some(kind) = self.kind {
            pairs.push(("type", kind.as_str()));
        }
        if let Some(format) = self.format {
            if self.kind != Some(ContentType::Notebook) {
                pairs.push(("format", format.as_str()));
            }
        }
        pairs.push(("content", if self.content { "1" } else { "0" }));
        pairs
    }
}

/// Options for [`crate::contents::Drive::new_untitled`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewUntitledOptions {
    /// Directory to create the entry in
    pub path: String,
    /// Entry kind
    pub kind: Option<ContentType>,
    /// File extension, for files
    pub ext: Option<String>,
}

/// Kind of change reported by `file_changed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    /// Entry created
    New,
    /// Entry deleted
    Delete,
    /// Entry moved
    Rename,
    /// Entry written
    Save,
}

/// File change notification
#[derive(Debug, Clone, PartialEq)]
pub struct FileChange {
    /// What happened
    pub kind: FileChangeKind,
    /// Previous path, for deletes and renames
    pub old_path: Option<String>,
    /// Resulting model, for creates, renames and saves
    pub new_value: Option<ContentsModel>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn parses_server_model() {
        let model: ContentsModel = serde_json::from_value(json!({
            "name": "a.txt",
            "path": "dir/a.txt",
            "type": "file",
            "writable": true,
            "created": "2024-01-02T03:04:05Z",
            "last_modified": "2024-01-02T03:04:05.123Z",
            "mimetype": "text/plain",
            "content": "hello",
            "format": "text",
            "size": 5
        }))
        .unwrap();
        assert_eq!(model.kind, ContentType::File);
        assert_eq!(model.format, Some(ContentFormat::Text));
        assert_eq!(model.content, Some(json!("hello")));
        assert!(model.created.is_some());
    }

    #[test]
    fn rejects_unknown_type() {
        let res = serde_json::from_value::<ContentsModel>(json!({
            "name": "x", "path": "x", "type": "socket"
        }));
        assert!(res.is_err());
    }

    #[test]
    fn directory_children() {
        let model: ContentsModel = serde_json::from_value(json!({
            "name": "dir", "path": "dir", "type": "directory",
            "content": [
                { "name": "a.txt", "path": "dir/a.txt", "type": "file" },
                { "name": "b", "path": "dir/b", "type": "directory" }
            ],
            "format": "json"
        }))
        .unwrap();
        let children = model.children().unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[1].kind, ContentType::Directory);
    }

    #[test]
    fn partial_model_skips_unset_fields() {
        let body = serde_json::to_value(PartialContentsModel::text("hi")).unwrap();
        assert_eq!(
            body,
            json!({ "type": "file", "format": "text", "content": "hi" })
        );
    }

    #[test]
    fn notebook_get_drops_format() {
        let opts = GetOptions {
            kind: Some(ContentType::Notebook),
            format: Some(ContentFormat::Json),
            content: false,
        };
        assert_eq!(opts.query(), vec![("type", "notebook"), ("content", "0")]);
    }
}
