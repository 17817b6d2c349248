use std::collections::HashMap;
use std::fmt;
use std::hash::BuildHasher;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::LoadError;
use crate::value::Value;

/// The name given to templates compiled without one.
pub const DEFAULT_TEMPLATE_NAME: &str = "<Razor Leaf template>";

/// `Loader` supplies the source of templates named by `include` and
/// `extends`.
///
/// Loaded templates are parsed and merged into the template being compiled,
/// so a loader is consulted once per inclusion at compile time and never
/// while rendering.
pub trait Loader {
    /// `load` returns the source of the template called `name`.
    ///
    /// # Errors
    /// - [`LoadError::NotFound`] if no template has this name.
    /// - [`LoadError::Other`] for any other failure, such as an I/O error.
    fn load(&self, name: &str) -> Result<String, LoadError>;
}

impl<S: BuildHasher> Loader for HashMap<String, String, S> {
    fn load(&self, name: &str) -> Result<String, LoadError> {
        self.get(name).cloned().ok_or(LoadError::NotFound)
    }
}

impl Loader for IndexMap<String, String> {
    fn load(&self, name: &str) -> Result<String, LoadError> {
        self.get(name).cloned().ok_or(LoadError::NotFound)
    }
}

impl<L: Loader + ?Sized> Loader for Arc<L> {
    fn load(&self, name: &str) -> Result<String, LoadError> {
        (**self).load(name)
    }
}

/// Adapts a lookup function into a [`Loader`]. `None` means the template
/// does not exist.
///
/// ```
/// use razorleaf::{FnLoader, Loader};
///
/// let loader = FnLoader(|name: &str| (name == "header").then(|| "header\n".to_owned()));
/// assert_eq!(loader.load("header").unwrap(), "header\n");
/// assert!(loader.load("footer").is_err());
/// ```
#[derive(Clone, Copy)]
pub struct FnLoader<F>(pub F);

impl<F: Fn(&str) -> Option<String>> Loader for FnLoader<F> {
    fn load(&self, name: &str) -> Result<String, LoadError> {
        (self.0)(name).ok_or(LoadError::NotFound)
    }
}

impl<F> fmt::Debug for FnLoader<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnLoader(..)")
    }
}

/// Compile options: the template's name for diagnostics, the loader for
/// `include` and `extends`, and the global values every render can read.
#[derive(Clone)]
pub struct Options {
    pub(crate) name: String,
    pub(crate) loader: Option<Arc<dyn Loader + Send + Sync>>,
    pub(crate) globals: IndexMap<String, Value>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            name: DEFAULT_TEMPLATE_NAME.to_owned(),
            loader: None,
            globals: IndexMap::new(),
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn loader(mut self, loader: impl Loader + Send + Sync + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    pub(crate) fn shared_loader(mut self, loader: Arc<dyn Loader + Send + Sync>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Makes `value` readable as `name` in every render. Globals are checked
    /// when the template is compiled.
    pub fn global(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.globals.insert(name.into(), value.into());
        self
    }

    pub fn globals<N, V>(mut self, globals: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<Value>,
    {
        self.globals
            .extend(globals.into_iter().map(|(name, value)| (name.into(), value.into())));
        self
    }

    pub fn template_name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("name", &self.name)
            .field("loader", &self.loader.as_ref().map(|_| ".."))
            .field("globals", &self.globals)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn map_loaders_report_missing_templates() {
        let mut templates = HashMap::new();
        templates.insert("a".to_owned(), "p\n".to_owned());

        assert_eq!(templates.load("a"), Ok("p\n".to_owned()));
        assert_eq!(templates.load("b"), Err(LoadError::NotFound));
    }

    #[test]
    #[ntest::timeout(100)]
    fn options_builder_collects_globals() {
        let options = Options::new()
            .name("page")
            .global("site", "Example")
            .globals([("year", 2024)]);

        assert_eq!(options.template_name(), "page");
        assert_eq!(options.globals.get("site"), Some(&Value::from("Example")));
        assert_eq!(options.globals.get("year"), Some(&Value::Number(2024.0)));
        assert!(options.loader.is_none());
    }
}
