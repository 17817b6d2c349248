use indexmap::IndexMap;

use crate::ast::Tree;
use crate::code_block::Instruction;
use crate::error::{RazorleafError, RazorleafResult, RenderError};
use crate::expression::is_identifier;
use crate::interface::{Loader, Options};
use crate::program::{self, Program};
use crate::value::Value;
use crate::{compiler, compose, parser};

/// Compiles a template's source into a reusable [`Template`].
///
/// Parsing, loading of included and extended templates, and every semantic
/// check happen here, so a template that compiles only fails to render on
/// errors in the data it is given.
///
/// # Example
///
/// ```
/// use razorleaf::{Options, compile};
/// use serde_json::json;
///
/// let template = compile("p \"Hello, #{data.name}!\"\n", &Options::default()).unwrap();
/// let html = template.render(&json!({"name": "World"})).unwrap();
/// assert_eq!(html, "<p>Hello, World!</p>");
/// ```
///
/// # Errors
/// - [`RazorleafError::InvalidGlobal`] if a global is not a usable name.
/// - [`RazorleafError::Syntax`] if this or a loaded template is malformed.
/// - [`RazorleafError::Semantic`] for undefined macros, bad arguments,
///   circular loads and missing blocks.
/// - [`RazorleafError::Load`] or [`RazorleafError::MissingLoader`] if a
///   template named by `include` or `extends` cannot be loaded.
pub fn compile(source: &str, options: &Options) -> RazorleafResult<Template> {
    tracing::debug!(template = %options.name, "compiling template");

    for name in options.globals.keys() {
        if !is_identifier(name) || name == "data" {
            return Err(RazorleafError::InvalidGlobal { name: name.clone() });
        }
    }

    let mut tree = Tree::new();
    let root = parser::parse(&mut tree, source, &options.name)?;
    let loader = options.loader.as_deref().map(|loader| loader as &dyn Loader);
    let root = compose::resolve(&mut tree, root, &options.name, loader)?;

    let globals: Vec<&str> = options.globals.keys().map(String::as_str).collect();
    let instructions = compiler::compile(&tree, root, &globals)?;
    let program = program::assemble(&instructions).map_err(RazorleafError::Internal)?;

    Ok(Template {
        name: options.name.clone(),
        instructions,
        program,
        globals: options.globals.clone(),
    })
}

/// A compiled template, ready to render any number of times.
#[derive(Debug)]
pub struct Template {
    name: String,
    instructions: Vec<Instruction>,
    program: Program,
    globals: IndexMap<String, Value>,
}

impl Template {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Renders the template with `data` bound to the `data` variable.
    ///
    /// # Errors
    /// If the data doesn't fit the template: reading a property of `null`,
    /// looping over something that isn't iterable, or passing a non-markup
    /// value to a raw interpolation.
    pub fn render(&self, data: &serde_json::Value) -> Result<String, RenderError> {
        self.render_value(Value::from(data))
    }

    /// Like [`Template::render`], for data that is already a [`Value`], such
    /// as data containing [`Markup`](crate::Markup).
    ///
    /// # Errors
    /// As [`Template::render`].
    pub fn render_value(&self, data: Value) -> Result<String, RenderError> {
        tracing::debug!(template = %self.name, "rendering template");

        Ok(match self.program.run(data, &self.globals)? {
            Value::String(html) => html,
            other => other.to_string(),
        })
    }

    /// The generated program, one instruction per line. Compiling the same
    /// source with the same options always produces the same listing.
    pub fn listing(&self) -> Vec<String> {
        self.instructions.iter().map(ToString::to_string).collect()
    }

    /// The names of the globals the template was compiled with.
    pub fn global_names(&self) -> impl Iterator<Item = &str> {
        self.globals.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::markup::Markup;

    fn render(source: &str, data: serde_json::Value) -> String {
        compile(source, &Options::default())
            .expect("template compiles")
            .render(&data)
            .expect("template renders")
    }

    #[test]
    #[ntest::timeout(100)]
    fn renders_with_data() {
        assert_eq!(
            render(
                "ul\n\tfor item, i of data.items\n\t\tli \"#{i}: #{item}\"\n",
                json!({"items": ["a", "<b>"]}),
            ),
            "<ul><li>0: a</li><li>1: &lt;b></li></ul>"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn globals_are_readable_and_validated() {
        let options = Options::new().global("site", "Example");
        let template = compile("title \"#{site}\"\n", &options).expect("template compiles");

        assert_eq!(template.render(&json!(null)).unwrap(), "<title>Example</title>");
        assert_eq!(template.global_names().collect::<Vec<_>>(), ["site"]);

        for name in ["data", "if", "not a name"] {
            let options = Options::new().global(name, 1);
            assert_eq!(
                compile("p\n", &options).map(|_| ()),
                Err(RazorleafError::InvalidGlobal { name: name.to_owned() })
            );
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn raw_interpolation_requires_markup() {
        let template = compile("div !\"#{data}\"\n", &Options::default()).expect("template compiles");

        assert_eq!(
            template.render_value(Value::Markup(Markup::new("<br>"))).unwrap(),
            "<div><br></div>"
        );
        assert_eq!(
            template.render_value(Value::from("<br>")),
            Err(RenderError::NotMarkup("string".to_owned()))
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn listing_is_deterministic() {
        let source = "macro item(x)\n\tli \"#{x}\"\nul\n\tfor x of data\n\t\titem(x)\n";
        let first = compile(source, &Options::default()).unwrap().listing();
        let second = compile(source, &Options::default()).unwrap().listing();

        assert_eq!(first, second);
    }

    #[test]
    #[ntest::timeout(100)]
    fn compiled_templates_are_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Template>();
    }
}
