//! Model and widget factories
//!
//! A [`ModelFactory`] describes how a document's contents are fetched and
//! which kernel language it prefers. A [`WidgetFactory`] is the
//! registration record of a viewer: which file types it opens, which it is
//! the default for, and which model factory backs it.

use nbclient_services::contents::{ContentFormat, ContentType};

/// Name of the model factory used when a widget factory names none
pub const DEFAULT_MODEL: &str = "text";

/// Creates document models of one kind
pub trait ModelFactory: Send + Sync {
    /// Unique name, matched case-insensitively
    fn name(&self) -> &str;

    /// Contents type the model is fetched as
    fn content_type(&self) -> ContentType;

    /// Wire format the model is fetched in
    fn file_format(&self) -> ContentFormat;

    /// Kernel language preferred for a file; empty when there is none
    fn preferred_language(&self, _path: &str) -> String {
        String::new()
    }
}

/// Plain text documents
#[derive(Debug, Clone, Copy, Default)]
pub struct TextModelFactory;

impl ModelFactory for TextModelFactory {
    fn name(&self) -> &str {
        DEFAULT_MODEL
    }

    fn content_type(&self) -> ContentType {
        ContentType::File
    }

    fn file_format(&self) -> ContentFormat {
        ContentFormat::Text
    }
}

/// Widget factory registration record
///
/// `default_for` and `default_rendered` entries only take effect for file
/// types that are also listed in `file_types`. The file type `*` stands
/// for every file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidgetFactory {
    /// Unique name; display case is kept, lookups ignore case
    pub name: String,
    /// File types the factory can open
    pub file_types: Vec<String>,
    /// File types the factory is the default viewer for
    pub default_for: Vec<String>,
    /// File types the factory is the default rendered viewer for
    pub default_rendered: Vec<String>,
    /// Backing model factory; [`DEFAULT_MODEL`] when `None`
    pub model_name: Option<String>,
    /// Whether opening a document should start a kernel
    pub prefer_kernel: bool,
    /// Whether the viewer can start a kernel at all
    pub can_start_kernel: bool,
    /// Whether closing the viewer shuts its kernel down
    pub shutdown_on_close: bool,
    /// Whether the viewer never saves
    pub read_only: bool,
}

impl WidgetFactory {
    /// Factory opening the given file types
    pub fn new<I, S>(name: impl Into<String>, file_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            file_types: file_types.into_iter().map(Into::into).collect(),
            default_for: Vec::new(),
            default_rendered: Vec::new(),
            model_name: None,
            prefer_kernel: false,
            can_start_kernel: false,
            shutdown_on_close: false,
            read_only: false,
        }
    }

    /// Set file types this factory is the default for
    #[must_use]
    pub fn default_for<I, S>(mut self, file_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_for = file_types.into_iter().map(Into::into).collect();
        self
    }

    /// Set file types this factory is the default rendered viewer for
    #[must_use]
    pub fn default_rendered<I, S>(mut self, file_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_rendered = file_types.into_iter().map(Into::into).collect();
        self
    }

    /// Set backing model factory
    #[must_use]
    pub fn with_model(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self
    }

    /// Kernel behavior: prefer, can start, shut down on close
    #[must_use]
    pub fn with_kernel(mut self, prefer: bool, can_start: bool, shutdown_on_close: bool) -> Self {
        self.prefer_kernel = prefer;
        self.can_start_kernel = can_start;
        self.shutdown_on_close = shutdown_on_close;
        self
    }

    /// Mark as read-only
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Model factory name, lowercased
    #[must_use]
    pub fn model_key(&self) -> String {
        self.model_name
            .as_deref()
            .unwrap_or(DEFAULT_MODEL)
            .to_lowercase()
    }

    /// Whether `file_types` lists `file_type`, ignoring case
    #[must_use]
    pub fn opens(&self, file_type: &str) -> bool {
        self.file_types
            .iter()
            .any(|ft| ft.eq_ignore_ascii_case(file_type))
    }
}

/// Kernel settings for opening a document with a widget factory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelPreference {
    /// Preferred kernel language; empty when there is none
    pub language: String,
    /// Start a kernel on open
    pub should_start: bool,
    /// A kernel may be started at all
    pub can_start: bool,
    /// Shut the kernel down with the document
    pub shutdown_on_dispose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_defaults_to_text() {
        let factory = WidgetFactory::new("Editor", ["text"]);
        assert_eq!(factory.model_key(), "text");
        assert_eq!(factory.with_model("Notebook").model_key(), "notebook");
    }

    #[test]
    fn opens_ignores_case() {
        let factory = WidgetFactory::new("Viewer", ["PNG", "jpeg"]);
        assert!(factory.opens("png"));
        assert!(factory.opens("JPEG"));
        assert!(!factory.opens("svg"));
    }

    #[test]
    fn text_model_has_no_language() {
        assert_eq!(TextModelFactory.preferred_language("a.py"), "");
        assert_eq!(TextModelFactory.file_format(), ContentFormat::Text);
    }
}
