//! Session wire models

use crate::error::ServerError;
use crate::kernel::{KernelConnection, KernelModel};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Session as reported by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionModel {
    /// Session id
    pub id: String,
    /// Document path the session is bound to
    pub path: String,
    /// Session name
    pub name: String,
    /// Session type (`notebook`, `console`, ...)
    #[serde(rename = "type")]
    pub kind: String,
    /// Attached kernel
    pub kernel: KernelModel,
}

impl SessionModel {
    /// Validate a session model body
    ///
    /// # Errors
    /// `ServerError::Validation` when the body is not a session model.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ServerError> {
        let model: Self =
            serde_json::from_value(value).map_err(|e| ServerError::validation("session model", e))?;
        if model.id.is_empty() || model.kernel.id.is_empty() {
            return Err(ServerError::validation("session model", "empty id"));
        }
        Ok(model)
    }
}

/// Kernel selection for starting or changing a session's kernel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelRequest {
    /// Spec name to start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Existing kernel to attach
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl KernelRequest {
    /// Start a kernel from a spec
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            id: None,
        }
    }

    /// Attach an existing kernel
    pub fn existing(id: impl Into<String>) -> Self {
        Self {
            name: None,
            id: Some(id.into()),
        }
    }
}

/// Options for starting a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionOptions {
    /// Document path
    pub path: String,
    /// Session name
    pub name: String,
    /// Session type
    #[serde(rename = "type")]
    pub kind: String,
    /// Kernel to start or attach
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel: Option<KernelRequest>,
}

impl SessionOptions {
    /// Notebook session for a path
    pub fn notebook(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            name: nbclient_core::path::basename(&path).to_string(),
            path,
            kind: "notebook".to_string(),
            kernel: None,
        }
    }

    /// With kernel selection
    #[must_use]
    pub fn with_kernel(mut self, kernel: KernelRequest) -> Self {
        self.kernel = Some(kernel);
        self
    }
}

/// Session property reported by `property_changed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionProperty {
    /// `name` changed
    Name,
    /// `type` changed
    Type,
    /// `path` changed
    Path,
}

/// Kernel swap reported by `kernel_changed`
#[derive(Debug, Clone)]
pub struct KernelChange {
    /// Connection that was replaced
    pub old_value: Arc<KernelConnection>,
    /// Connection now in use
    pub new_value: Arc<KernelConnection>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validates_model() {
        let model = SessionModel::from_value(json!({
            "id": "s1",
            "path": "work/a.ipynb",
            "name": "a.ipynb",
            "type": "notebook",
            "kernel": { "id": "k1", "name": "python3", "execution_state": "idle" }
        }))
        .unwrap();
        assert_eq!(model.kernel, KernelModel::new("k1", "python3"));
        assert_eq!(model.kind, "notebook");
    }

    #[test]
    fn rejects_missing_or_null_kernel() {
        let base = json!({ "id": "s1", "path": "a", "name": "a", "type": "notebook" });
        assert!(SessionModel::from_value(base.clone()).is_err());

        let mut with_null = base;
        with_null["kernel"] = serde_json::Value::Null;
        assert!(matches!(
            SessionModel::from_value(with_null),
            Err(ServerError::Validation { .. })
        ));
    }

    #[test]
    fn options_body_shape() {
        let body = serde_json::to_value(
            SessionOptions::notebook("dir/x.ipynb").with_kernel(KernelRequest::named("python3")),
        )
        .unwrap();
        assert_eq!(
            body,
            json!({
                "path": "dir/x.ipynb",
                "name": "x.ipynb",
                "type": "notebook",
                "kernel": { "name": "python3" }
            })
        );
    }
}
