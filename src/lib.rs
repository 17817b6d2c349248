mod ast;
mod code_block;
mod compiler;
mod compose;
mod engine;
mod error;
mod escape;
mod expression;
mod interface;
mod markup;
mod parser;
mod program;
mod scope;
mod template;
mod value;

// Public exports.
pub use ast::Position;
pub use engine::Engine;
pub use error::{
    LoadError, Location, Point, RazorleafError, RazorleafResult, RenderError, SemanticError, SemanticErrorKind, SyntaxError,
    SyntaxErrorKind,
};
pub use escape::{escape_attribute_value, escape_content};
pub use interface::{DEFAULT_TEMPLATE_NAME, FnLoader, Loader, Options};
pub use markup::Markup;
pub use template::{Template, compile};
pub use value::Value;
