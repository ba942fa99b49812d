//! Document registry
//!
//! Maps file names to file types and file types to the widget factories
//! that can open them.
//!
//! Preference order for a path, deduplicated by factory name:
//! 1. user overrides set with [`DocumentRegistry::set_default_widget_factory`]
//! 2. the default factory of each matching file type
//! 3. the default rendered factory of each matching file type
//! 4. the global default factory (default for `*`)
//! 5. every other factory for each matching file type, in registration order
//! 6. every factory registered for `*`
//!
//! Factories whose model factory is not registered are dropped.

use crate::error::{RegistryError, RegistryResult};
use crate::factory::{KernelPreference, ModelFactory, TextModelFactory, WidgetFactory};
use crate::filetype::{default_file_types, extension_suffixes, FileType};
use indexmap::{IndexMap, IndexSet};
use nbclient_core::{path, Signal};
use nbclient_services::contents::{ContentType, ContentsModel};
use parking_lot::RwLock;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

const ANY: &str = "*";

/// What a registry change touched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryItem {
    /// A file type
    FileType,
    /// A model factory
    ModelFactory,
    /// A widget factory
    WidgetFactory,
}

/// Whether the item was added or removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    /// Registered
    Added,
    /// Unregistered
    Removed,
}

/// Payload of [`DocumentRegistry::changed`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryChange {
    /// Kind of item
    pub item: RegistryItem,
    /// Added or removed
    pub change: ChangeType,
    /// Name as registered
    pub name: String,
}

struct RegisteredFileType {
    file_type: Arc<FileType>,
    pattern: Option<Regex>,
}

#[derive(Default)]
struct Inner {
    file_types: Vec<RegisteredFileType>,
    model_factories: IndexMap<String, Arc<dyn ModelFactory>>,
    widget_factories: IndexMap<String, Arc<WidgetFactory>>,
    default_widget_factory: Option<String>,
    default_widget_factories: HashMap<String, String>,
    default_rendered_factories: HashMap<String, String>,
    overrides: HashMap<String, String>,
    factories_for_file_type: HashMap<String, Vec<String>>,
}

impl Inner {
    fn file_type(&self, name: &str) -> Option<Arc<FileType>> {
        self.file_types
            .iter()
            .find(|r| r.file_type.name.eq_ignore_ascii_case(name))
            .map(|r| Arc::clone(&r.file_type))
    }

    fn file_types_for_path(&self, path: &str) -> Vec<Arc<FileType>> {
        let name = path::basename(path);
        let mut found: Vec<Arc<FileType>> = Vec::new();
        let mut push = |ft: &Arc<FileType>| {
            if !found.iter().any(|f| Arc::ptr_eq(f, ft)) {
                found.push(Arc::clone(ft));
            }
        };

        if let Some(r) = self
            .file_types
            .iter()
            .find(|r| r.pattern.as_ref().is_some_and(|p| p.is_match(name)))
        {
            push(&r.file_type);
        }
        for ext in extension_suffixes(name) {
            for r in &self.file_types {
                if r.file_type.has_extension(&ext) {
                    push(&r.file_type);
                }
            }
        }
        found
    }

    fn preferred(&self, path: &str) -> Vec<Arc<WidgetFactory>> {
        let keys: Vec<String> = self
            .file_types_for_path(path)
            .iter()
            .map(|ft| ft.name.to_lowercase())
            .collect();
        let mut names: IndexSet<&str> = IndexSet::new();

        for table in [
            &self.overrides,
            &self.default_widget_factories,
            &self.default_rendered_factories,
        ] {
            for key in &keys {
                if let Some(name) = table.get(key) {
                    names.insert(name);
                }
            }
        }
        if let Some(name) = &self.default_widget_factory {
            names.insert(name);
        }
        for key in keys.iter().map(String::as_str).chain([ANY]) {
            if let Some(list) = self.factories_for_file_type.get(key) {
                names.extend(list.iter().map(String::as_str));
            }
        }

        names
            .into_iter()
            .filter_map(|name| self.widget_factories.get(name))
            .filter(|factory| self.model_factories.contains_key(&factory.model_key()))
            .cloned()
            .collect()
    }
}

/// Registry of file types, model factories and widget factories
pub struct DocumentRegistry {
    inner: RwLock<Inner>,
    changed: Signal<DocumentRegistry, RegistryChange>,
}

impl Default for DocumentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            changed: Signal::new(),
        }
    }

    /// Registry with the standard file types and the `text` model factory
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        {
            let mut inner = registry.inner.write();
            for ft in default_file_types() {
                inner.file_types.push(RegisteredFileType {
                    file_type: Arc::new(ft),
                    pattern: None,
                });
            }
            let text: Arc<dyn ModelFactory> = Arc::new(TextModelFactory);
            inner
                .model_factories
                .insert(text.name().to_lowercase(), text);
        }
        registry
    }

    /// Emitted after every registration or removal
    #[inline]
    #[must_use]
    pub fn changed(&self) -> &Signal<DocumentRegistry, RegistryChange> {
        &self.changed
    }

    /// Register a file type, optionally making the named widget factories
    /// able to open it
    ///
    /// # Errors
    /// `DuplicateFileType` or `InvalidPattern`; the registry is unchanged.
    pub fn add_file_type(&self, file_type: FileType, factories: &[&str]) -> RegistryResult<()> {
        let pattern = file_type
            .pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| RegistryError::InvalidPattern {
                file_type: file_type.name.clone(),
                reason: e.to_string(),
            })?;
        let name = file_type.name.clone();
        {
            let mut inner = self.inner.write();
            if inner.file_type(&name).is_some() {
                return Err(RegistryError::DuplicateFileType(name));
            }
            let key = name.to_lowercase();
            for factory in factories {
                let factory = factory.to_lowercase();
                let list = inner.factories_for_file_type.entry(key.clone()).or_default();
                if !list.contains(&factory) {
                    list.push(factory);
                }
            }
            inner.file_types.push(RegisteredFileType {
                file_type: Arc::new(file_type),
                pattern,
            });
        }
        tracing::debug!("registered file type '{}'", name);
        self.emit(RegistryItem::FileType, ChangeType::Added, name);
        Ok(())
    }

    /// File type by name
    #[must_use]
    pub fn get_file_type(&self, name: &str) -> Option<Arc<FileType>> {
        self.inner.read().file_type(name)
    }

    /// Every file type, in registration order
    #[must_use]
    pub fn file_types(&self) -> Vec<Arc<FileType>> {
        self.inner
            .read()
            .file_types
            .iter()
            .map(|r| Arc::clone(&r.file_type))
            .collect()
    }

    /// Register a model factory
    ///
    /// # Errors
    /// `DuplicateModelFactory`; the registry is unchanged.
    pub fn add_model_factory(&self, factory: Arc<dyn ModelFactory>) -> RegistryResult<()> {
        let name = factory.name().to_string();
        {
            let mut inner = self.inner.write();
            let key = name.to_lowercase();
            if inner.model_factories.contains_key(&key) {
                return Err(RegistryError::DuplicateModelFactory(name));
            }
            inner.model_factories.insert(key, factory);
        }
        self.emit(RegistryItem::ModelFactory, ChangeType::Added, name);
        Ok(())
    }

    /// Model factory by name
    #[must_use]
    pub fn get_model_factory(&self, name: &str) -> Option<Arc<dyn ModelFactory>> {
        self.inner
            .read()
            .model_factories
            .get(&name.to_lowercase())
            .cloned()
    }

    /// Register a widget factory
    ///
    /// # Errors
    /// `InvalidName` for an empty name or `default`,
    /// `DuplicateWidgetFactory` if the name is taken; the registry is
    /// unchanged.
    pub fn add_widget_factory(&self, factory: WidgetFactory) -> RegistryResult<()> {
        let key = factory.name.to_lowercase();
        if key.is_empty() || key == "default" {
            return Err(RegistryError::InvalidName(factory.name));
        }
        let name = factory.name.clone();
        {
            let mut inner = self.inner.write();
            if inner.widget_factories.contains_key(&key) {
                return Err(RegistryError::DuplicateWidgetFactory(name));
            }
            for ft in factory.default_for.iter().filter(|ft| factory.opens(ft)) {
                let ft = ft.to_lowercase();
                if ft == ANY {
                    inner.default_widget_factory = Some(key.clone());
                } else {
                    inner.default_widget_factories.insert(ft, key.clone());
                }
            }
            for ft in factory.default_rendered.iter().filter(|ft| factory.opens(ft)) {
                inner
                    .default_rendered_factories
                    .insert(ft.to_lowercase(), key.clone());
            }
            for ft in &factory.file_types {
                let list = inner
                    .factories_for_file_type
                    .entry(ft.to_lowercase())
                    .or_default();
                if !list.contains(&key) {
                    list.push(key.clone());
                }
            }
            inner.widget_factories.insert(key, Arc::new(factory));
        }
        tracing::debug!("registered widget factory '{}'", name);
        self.emit(RegistryItem::WidgetFactory, ChangeType::Added, name);
        Ok(())
    }

    /// Unregister a widget factory and every default pointing at it
    ///
    /// Returns the removed factory.
    pub fn remove_widget_factory(&self, name: &str) -> Option<Arc<WidgetFactory>> {
        let key = name.to_lowercase();
        let removed = {
            let mut inner = self.inner.write();
            let removed = inner.widget_factories.shift_remove(&key)?;
            if inner.default_widget_factory.as_deref() == Some(key.as_str()) {
                inner.default_widget_factory = None;
            }
            inner.default_widget_factories.retain(|_, v| *v != key);
            inner.default_rendered_factories.retain(|_, v| *v != key);
            inner.overrides.retain(|_, v| *v != key);
            for list in inner.factories_for_file_type.values_mut() {
                list.retain(|v| *v != key);
            }
            inner.factories_for_file_type.retain(|_, list| !list.is_empty());
            removed
        };
        self.emit(
            RegistryItem::WidgetFactory,
            ChangeType::Removed,
            removed.name.clone(),
        );
        Some(removed)
    }

    /// Widget factory by name
    #[must_use]
    pub fn get_widget_factory(&self, name: &str) -> Option<Arc<WidgetFactory>> {
        self.inner
            .read()
            .widget_factories
            .get(&name.to_lowercase())
            .cloned()
    }

    /// Every widget factory, in registration order
    #[must_use]
    pub fn widget_factories(&self) -> Vec<Arc<WidgetFactory>> {
        self.inner.read().widget_factories.values().cloned().collect()
    }

    /// Override the default widget factory for a file type
    ///
    /// `None` clears the override.
    ///
    /// # Errors
    /// `UnknownFileType`, `UnknownWidgetFactory`, or `CannotView` when the
    /// factory neither opens the file type nor is the global default.
    pub fn set_default_widget_factory(
        &self,
        file_type: &str,
        factory: Option<&str>,
    ) -> RegistryResult<()> {
        let mut inner = self.inner.write();
        let ft_key = file_type.to_lowercase();
        if inner.file_type(&ft_key).is_none() {
            return Err(RegistryError::UnknownFileType(file_type.to_string()));
        }
        let Some(factory) = factory else {
            inner.overrides.remove(&ft_key);
            return Ok(());
        };
        let key = factory.to_lowercase();
        if !inner.widget_factories.contains_key(&key) {
            return Err(RegistryError::UnknownWidgetFactory(factory.to_string()));
        }
        let is_global = inner.default_widget_factory.as_deref() == Some(key.as_str());
        let opens = inner
            .factories_for_file_type
            .get(&ft_key)
            .is_some_and(|list| list.contains(&key));
        if !is_global && !opens {
            return Err(RegistryError::CannotView {
                factory: factory.to_string(),
                file_type: file_type.to_string(),
            });
        }
        inner.overrides.insert(ft_key, key);
        Ok(())
    }

    /// File types matching a path
    ///
    /// A pattern match comes first, then extension matches from the longest
    /// dotted suffix to the shortest.
    #[must_use]
    pub fn get_file_types_for_path(&self, path: &str) -> Vec<Arc<FileType>> {
        self.inner.read().file_types_for_path(path)
    }

    /// Widget factories able to open a path, most preferred first
    #[must_use]
    pub fn preferred_widget_factories(&self, path: &str) -> Vec<Arc<WidgetFactory>> {
        self.inner.read().preferred(path)
    }

    /// Default widget factory for a path, or the global default
    #[must_use]
    pub fn default_widget_factory(&self, path: Option<&str>) -> Option<Arc<WidgetFactory>> {
        let inner = self.inner.read();
        match path {
            Some(path) => inner.preferred(path).into_iter().next(),
            None => inner
                .default_widget_factory
                .as_ref()
                .and_then(|name| inner.widget_factories.get(name))
                .cloned(),
        }
    }

    /// Default rendered widget factory for a path
    ///
    /// Falls back to [`DocumentRegistry::default_widget_factory`].
    #[must_use]
    pub fn default_rendered_widget_factory(&self, path: &str) -> Option<Arc<WidgetFactory>> {
        let inner = self.inner.read();
        inner
            .file_types_for_path(path)
            .iter()
            .find_map(|ft| {
                inner
                    .default_rendered_factories
                    .get(&ft.name.to_lowercase())
                    .and_then(|name| inner.widget_factories.get(name))
                    .cloned()
            })
            .or_else(|| inner.preferred(path).into_iter().next())
    }

    /// Best file type for a contents model
    ///
    /// Directories and notebooks map by content type; other files by name,
    /// then the `text` file type.
    #[must_use]
    pub fn get_file_type_for_model(&self, model: &ContentsModel) -> Arc<FileType> {
        let inner = self.inner.read();
        let by_content = |content_type: ContentType, fallback: fn() -> FileType| {
            inner
                .file_types
                .iter()
                .find(|r| r.file_type.content_type == content_type)
                .map_or_else(|| Arc::new(fallback()), |r| Arc::clone(&r.file_type))
        };
        match model.kind {
            ContentType::Directory => by_content(ContentType::Directory, FileType::directory),
            ContentType::Notebook => by_content(ContentType::Notebook, FileType::notebook),
            ContentType::File => {
                let name = if model.name.is_empty() {
                    model.path.as_str()
                } else {
                    model.name.as_str()
                };
                inner
                    .file_types_for_path(name)
                    .into_iter()
                    .next()
                    .or_else(|| inner.file_type("text"))
                    .unwrap_or_else(|| Arc::new(FileType::text()))
            }
        }
    }

    /// Kernel preference for opening a path with a widget factory
    ///
    /// `None` when the widget factory or its model factory is unknown.
    #[must_use]
    pub fn get_kernel_preference(&self, path: &str, widget_name: &str) -> Option<KernelPreference> {
        let inner = self.inner.read();
        let widget = inner.widget_factories.get(&widget_name.to_lowercase())?;
        let model = inner.model_factories.get(&widget.model_key())?;
        Some(KernelPreference {
            language: model.preferred_language(path::basename(path)),
            should_start: widget.prefer_kernel,
            can_start: widget.can_start_kernel,
            shutdown_on_dispose: widget.shutdown_on_close,
        })
    }

    fn emit(&self, item: RegistryItem, change: ChangeType, name: String) {
        self.changed
            .emit(self, &RegistryChange { item, change, name });
    }
}

impl fmt::Debug for DocumentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("DocumentRegistry")
            .field("file_types", &inner.file_types.len())
            .field("model_factories", &inner.model_factories.len())
            .field("widget_factories", &inner.widget_factories.len())
            .finish_non_exhaustive()
    }
}
