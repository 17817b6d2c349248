#![allow(dead_code)]

use std::collections::HashMap;

use razorleaf::{Engine, Options, RazorleafError, Template, compile};

/// Compiles `source` with default options, panicking on failure.
pub fn template(source: &str) -> Template {
    match compile(source, &Options::default()) {
        Ok(template) => template,
        Err(error) => panic!("template failed to compile:\n{error}"),
    }
}

/// Compiles and renders `source` in one go.
pub fn render(source: &str, data: serde_json::Value) -> String {
    match template(source).render(&data) {
        Ok(html) => html,
        Err(error) => panic!("template failed to render: {error}"),
    }
}

/// The error compiling `source` fails with.
pub fn compile_error(source: &str) -> RazorleafError {
    compile_error_with(source, &Options::default())
}

pub fn compile_error_with(source: &str, options: &Options) -> RazorleafError {
    match compile(source, options) {
        Ok(template) => panic!("expected compilation to fail; generated:\n{}", template.listing().join("\n")),
        Err(error) => error,
    }
}

/// A loader serving the given named sources.
pub fn loader(templates: &[(&str, &str)]) -> HashMap<String, String> {
    templates
        .iter()
        .map(|(name, source)| ((*name).to_owned(), (*source).to_owned()))
        .collect()
}

/// An engine holding the given named sources.
pub fn get_engine(templates: &[(&str, &str)]) -> Engine {
    let mut engine = Engine::new();
    for (name, source) in templates {
        if let Err(error) = engine.add_template(name, *source) {
            panic!("could not add {name}: {error}");
        }
    }
    engine
}
