use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{LoadError, RazorleafError, RazorleafResult};
use crate::interface::{Loader, Options};
use crate::template::{self, Template};
use crate::value::Value;

/// `Engine` holds a set of named template sources that can include and
/// extend one another.
///
/// Templates are stored as source and compiled on request; the engine acts
/// as the loader for every template it compiles.
///
/// # Examples
///
/// ```
/// use razorleaf::Engine;
/// use serde_json::json;
///
/// let mut engine = Engine::new();
/// engine.add_template("layout", "html\n\tbody\n\t\tblock content\n").unwrap();
/// engine.add_template("page", "extends layout\nreplace content\n\th1 \"#{data.title}\"\n").unwrap();
///
/// let page = engine.compile("page").unwrap();
/// assert_eq!(
///     page.render(&json!({"title": "Hi"})).unwrap(),
///     "<html><body><h1>Hi</h1></body></html>"
/// );
/// ```
#[derive(Debug, Clone, Default)]
pub struct Engine {
    templates: Arc<HashMap<String, String>>,
    globals: IndexMap<String, Value>,
}

impl Engine {
    /// Creates a new engine with no templates and no globals.
    pub fn new() -> Self {
        Self::default()
    }

    /// `add_template` makes a template's source available under `name`.
    ///
    /// # Errors
    /// - [`RazorleafError::TemplateExists`] if the name is already taken.
    pub fn add_template(&mut self, name: impl AsRef<str>, source: impl Into<String>) -> RazorleafResult<()> {
        let name = name.as_ref();
        let templates = Arc::make_mut(&mut self.templates);

        if templates.contains_key(name) {
            return Err(RazorleafError::TemplateExists {
                template_name: name.to_owned(),
            });
        }

        templates.insert(name.to_owned(), source.into());
        Ok(())
    }

    /// Sets a global available to every template compiled by this engine.
    pub fn add_global(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.globals.insert(name.into(), value.into());
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Compiles the template stored under `name`, using the engine's
    /// globals.
    ///
    /// # Errors
    /// - [`RazorleafError::MissingTemplate`] if no template has this name.
    /// - Anything [`compile`](crate::compile) can fail with.
    pub fn compile(&self, name: &str) -> RazorleafResult<Template> {
        self.compile_with(name, Options::new())
    }

    /// Compiles the template stored under `name` with extra options. The
    /// options' globals take precedence over the engine's; the template
    /// name and loader are always the engine's.
    ///
    /// # Errors
    /// As [`Engine::compile`].
    pub fn compile_with(&self, name: &str, options: Options) -> RazorleafResult<Template> {
        let source = self
            .templates
            .get(name)
            .ok_or_else(|| RazorleafError::MissingTemplate {
                template_name: name.to_owned(),
            })?;

        let mut globals = self.globals.clone();
        globals.extend(options.globals);

        let options = Options::new()
            .name(name)
            .globals(globals)
            .shared_loader(self.templates.clone());

        template::compile(source, &options)
    }
}

impl Loader for Engine {
    fn load(&self, name: &str) -> Result<String, LoadError> {
        self.templates.load(name)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn duplicate_templates_are_rejected() {
        let mut engine = Engine::new();
        engine.add_template("a", "p\n").unwrap();

        assert_eq!(
            engine.add_template("a", "div\n"),
            Err(RazorleafError::TemplateExists {
                template_name: "a".to_owned()
            })
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn missing_templates_are_reported() {
        let engine = Engine::new();

        assert!(matches!(
            engine.compile("nowhere"),
            Err(RazorleafError::MissingTemplate { template_name }) if template_name == "nowhere"
        ));
    }

    #[test]
    #[ntest::timeout(100)]
    fn option_globals_override_engine_globals() {
        let mut engine = Engine::new();
        engine
            .add_global("greeting", "hello")
            .add_global("name", "engine");
        engine.add_template("a", "p \"#{greeting} #{name}\"\n").unwrap();

        let template = engine
            .compile_with("a", Options::new().global("name", "options"))
            .unwrap();

        assert_eq!(template.render(&json!(null)).unwrap(), "<p>hello options</p>");
    }

    #[test]
    #[ntest::timeout(100)]
    fn diagnostics_use_the_stored_name() {
        let mut engine = Engine::new();
        engine.add_template("broken", "p\n\t\t\"x\"\n").unwrap();

        let error = engine.compile("broken").unwrap_err();
        assert_eq!(error.location().map(|l| l.template.as_str()), Some("broken"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn engine_is_a_loader() {
        let mut engine = Engine::new();
        engine.add_template("a", "p\n").unwrap();

        assert_eq!(engine.load("a"), Ok("p\n".to_owned()));
        assert_eq!(engine.load("b"), Err(LoadError::NotFound));
    }
}
