//! File types
//!
//! A [`FileType`] names a family of files by extension, mime type or name
//! pattern, and records how their contents are fetched.

use nbclient_services::contents::{ContentFormat, ContentType};
use serde::{Deserialize, Serialize};

/// A named family of files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileType {
    /// Unique name, matched case-insensitively
    pub name: String,
    /// Human-readable name
    #[serde(default)]
    pub display_name: String,
    /// Dotted extensions, e.g. `.tar.gz`
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Mime types
    #[serde(default)]
    pub mime_types: Vec<String>,
    /// Regular expression matched against the file name
    #[serde(default)]
    pub pattern: Option<String>,
    /// How the contents endpoint serves the file
    #[serde(default = "default_content_type")]
    pub content_type: ContentType,
    /// Wire format of the contents
    #[serde(default = "default_file_format")]
    pub file_format: ContentFormat,
    /// Icon CSS class
    #[serde(default)]
    pub icon_class: String,
}

fn default_content_type() -> ContentType {
    ContentType::File
}

fn default_file_format() -> ContentFormat {
    ContentFormat::Text
}

impl FileType {
    /// Text file type with the given name and no extensions
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            extensions: Vec::new(),
            mime_types: Vec::new(),
            pattern: None,
            content_type: ContentType::File,
            file_format: ContentFormat::Text,
            icon_class: String::new(),
        }
    }

    /// Set display name
    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Set extensions
    #[must_use]
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Set mime types
    #[must_use]
    pub fn with_mime_types<I, S>(mut self, mime_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mime_types = mime_types.into_iter().map(Into::into).collect();
        self
    }

    /// Set name pattern
    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Set content type and format
    #[must_use]
    pub fn with_content(mut self, content_type: ContentType, file_format: ContentFormat) -> Self {
        self.content_type = content_type;
        self.file_format = file_format;
        self
    }

    /// Set icon class
    #[must_use]
    pub fn with_icon_class(mut self, icon_class: impl Into<String>) -> Self {
        self.icon_class = icon_class.into();
        self
    }

    /// Whether any extension equals `ext`, ignoring case
    pub(crate) fn has_extension(&self, ext: &str) -> bool {
        self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }

    /// Plain text
    pub fn text() -> Self {
        Self::new("text")
            .with_display_name("Text")
            .with_extensions([".txt"])
            .with_mime_types(["text/plain"])
    }

    /// Notebook documents
    pub fn notebook() -> Self {
        Self::new("notebook")
            .with_display_name("Notebook")
            .with_extensions([".ipynb"])
            .with_mime_types(["application/x-ipynb+json"])
            .with_content(ContentType::Notebook, ContentFormat::Json)
    }

    /// Directories
    pub fn directory() -> Self {
        Self::new("directory")
            .with_display_name("Directory")
            .with_mime_types(["text/directory"])
            .with_content(ContentType::Directory, ContentFormat::Json)
    }
}

/// File types registered by `DocumentRegistry::with_defaults`
pub fn default_file_types() -> Vec<FileType> {
    vec![
        FileType::text(),
        FileType::notebook(),
        FileType::directory(),
        FileType::new("markdown")
            .with_display_name("Markdown File")
            .with_extensions([".md"])
            .with_mime_types(["text/markdown"]),
        FileType::new("python")
            .with_display_name("Python File")
            .with_extensions([".py"])
            .with_mime_types(["text/x-python"]),
        FileType::new("json")
            .with_display_name("JSON File")
            .with_extensions([".json"])
            .with_mime_types(["application/json"]),
        FileType::new("csv")
            .with_display_name("CSV File")
            .with_extensions([".csv"])
            .with_mime_types(["text/csv"]),
        FileType::new("yaml")
            .with_display_name("YAML File")
            .with_extensions([".yaml", ".yml"])
            .with_mime_types(["text/x-yaml", "text/yaml"]),
        FileType::new("png")
            .with_display_name("PNG Image")
            .with_extensions([".png"])
            .with_mime_types(["image/png"])
            .with_content(ContentType::File, ContentFormat::Base64),
        FileType::new("jpeg")
            .with_display_name("JPEG Image")
            .with_extensions([".jpg", ".jpeg"])
            .with_mime_types(["image/jpeg"])
            .with_content(ContentType::File, ContentFormat::Base64),
        FileType::new("svg")
            .with_display_name("SVG Image")
            .with_extensions([".svg"])
            .with_mime_types(["image/svg+xml"]),
        FileType::new("pdf")
            .with_display_name("PDF")
            .with_extensions([".pdf"])
            .with_mime_types(["application/pdf"])
            .with_content(ContentType::File, ContentFormat::Base64),
    ]
}

/// Every dotted suffix of a file name, longest first, lowercased
///
/// `archive.tar.gz` yields `.tar.gz` then `.gz`; a name without a dot
/// yields nothing.
pub(crate) fn extension_suffixes(name: &str) -> Vec<String> {
    let name = name.to_lowercase();
    let mut parts = name.split('.');
    parts.next();
    let rest: Vec<&str> = parts.collect();
    (0..rest.len())
        .map(|i| format!(".{}", rest[i..].join(".")))
        .filter(|ext| ext.len() > 1)
        .collect()
}
