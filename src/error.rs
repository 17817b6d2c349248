use std::fmt::{self, Write as _};

use crate::ast::Position;

pub type RazorleafResult<T> = std::result::Result<T, RazorleafError>;

/// A point in a template's source: either a concrete position or the end of
/// the input.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Point {
    At(Position),
    Eof,
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::At(position) => write!(f, "{position}"),
            Self::Eof => f.write_str("EOF"),
        }
    }
}

/// Where a diagnostic was raised: the template's name and a point within it.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub template: String,
    pub point: Point,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.point, self.template)
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum SyntaxErrorKind {
    #[error("Unexpected {0:?}")]
    UnexpectedCharacter(char),
    #[error("Unexpected tab indent; indentation was established as {0} spaces")]
    TabIndent(usize),
    #[error("Unexpected space indent; indentation was established as tabs")]
    SpaceIndent,
    #[error("Indentation mixes tabs and spaces")]
    MixedIndent,
    #[error("Indentation of {found} spaces is not a multiple of the established {unit}")]
    IndentNotMultiple { found: usize, unit: usize },
    #[error("Excessive indent")]
    ExcessiveIndent,
    #[error("Expected end of {construct} before end of input, starting at {start}")]
    Unterminated { construct: String, start: Position },
    #[error("Expected end of macro call before end of input, starting at {start}{}", format_attempts(.attempts))]
    UnterminatedCall {
        start: Position,
        attempts: Vec<String>,
    },
    #[error("Invalid escape sequence “\\{0}”")]
    InvalidEscape(char),
    #[error("Invalid expression: {0}")]
    InvalidExpression(String),
    #[error("Invalid code: {0}")]
    InvalidCode(String),
    #[error("Positional arguments cannot follow named arguments")]
    PositionalAfterNamed,
    #[error("Expected {0}")]
    Expected(String),
    #[error("Expected “of” or “in” after the loop variables")]
    ExpectedOfOrIn,
    #[error("“{0}” is a reserved word and cannot be used as a parameter name")]
    ReservedParameter(String),
    #[error("Parameter “{0}” is declared more than once")]
    DuplicateParameter(String),
    #[error("Unexpected {0}")]
    UnexpectedBranch(String),
    #[error("{0} cannot have children")]
    NoChildrenAllowed(String),
    #[error("extends must appear before any other content")]
    ExtendsNotFirst,
    #[error("A template can only extend one other template")]
    MultipleExtends,
    #[error("Only blocks and macros are allowed at the top level of an extending template")]
    NotAllowedInExtending,
    #[error("{0} is only valid at the top level of an extending template")]
    RequiresExtends(String),
    #[error("A block named “{0}” already exists in this context")]
    DuplicateBlock(String),
    #[error("A macro named “{0}” already exists in this context")]
    DuplicateMacro(String),
    #[error("Attributes cannot have raw strings as values")]
    AttributeRawString,
    #[error("{0} here is not valid")]
    Unexpected(String),
}

fn format_attempts(attempts: &[String]) -> String {
    if attempts.is_empty() {
        return String::new();
    }

    let tried: Vec<String> = attempts.iter().map(|a| format!("“{a}”")).collect();
    format!("; tried {}", tried.join(", "))
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum SemanticErrorKind {
    #[error("Macro “{0}” is not defined")]
    UndefinedMacro(String),
    #[error("Missing value for {}", describe_parameters(.0))]
    MissingParameters(Vec<String>),
    #[error("Too many arguments: “{name}” takes {expected} but {found} were given")]
    TooManyArguments {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("“{macro_name}” has no parameter named “{parameter}”")]
    UnknownParameter {
        macro_name: String,
        parameter: String,
    },
    #[error("Parameter “{0}” was already provided")]
    ParameterAlreadyProvided(String),
    #[error("yield is only valid inside a macro")]
    YieldOutsideMacro,
    #[error("Circular extension: ⤷ {} ⤴", chain(.0))]
    CircularExtension(Vec<String>),
    #[error("Circular inclusion: ⤷ {} ⤴", chain(.0))]
    CircularInclusion(Vec<String>),
    #[error("Block “{0}” does not exist in a parent template")]
    MissingBlock(String),
    #[error("A block named “{name}” already exists (defined at {previous})")]
    DuplicateBlock { name: String, previous: Location },
    #[error("A macro named “{name}” already exists (defined at {previous})")]
    DuplicateMacro { name: String, previous: Location },
    #[error("Void element <{0}> cannot have content")]
    VoidContent(String),
}

fn describe_parameters(names: &[String]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("“{n}”")).collect();
    let noun = if names.len() == 1 { "parameter" } else { "parameters" };
    format!("{noun} {}", quoted.join(", "))
}

fn chain(names: &[String]) -> String {
    names.join(" → ")
}

/// A malformed template, reported with the position that broke it.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
#[error("{kind} at {location}\n\n{excerpt}")]
pub struct SyntaxError {
    pub kind: SyntaxErrorKind,
    pub location: Location,
    /// The offending source lines, with a caret under the reported point.
    pub excerpt: String,
}

impl SyntaxError {
    pub(crate) fn new(kind: SyntaxErrorKind, template: &str, source: &str, point: Point) -> Self {
        Self {
            kind,
            location: Location {
                template: template.to_owned(),
                point,
            },
            excerpt: excerpt(source, point),
        }
    }
}

/// A well-formed template whose parts don't fit together: undefined macros,
/// bad arguments, circular loads, blocks without a target.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SemanticError {
    pub kind: SemanticErrorKind,
    pub location: Option<Location>,
    pub excerpt: String,
}

impl SemanticError {
    pub(crate) fn new(kind: SemanticErrorKind, template: &str, source: &str, point: Point) -> Self {
        Self {
            kind,
            location: Some(Location {
                template: template.to_owned(),
                point,
            }),
            excerpt: excerpt(source, point),
        }
    }
}

impl fmt::Display for SemanticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {}\n\n{}", self.kind, location, self.excerpt),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for SemanticError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum RenderError {
    #[error("Unescaped content must be an instance of Markup, but got a value of type {0}")]
    NotMarkup(String),
    #[error("Cannot read property “{property}” of {base}")]
    PropertyOfNullish { property: String, base: String },
    #[error("Cannot set property “{property}” of {base}")]
    AssignToPrimitive { property: String, base: String },
    #[error("A value of type {0} is not iterable")]
    NotIterable(String),
    #[error("“{0}” is not a function")]
    NotAFunction(String),
}

/// Why a [`Loader`](crate::Loader) could not produce a template's source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("no template with this name exists")]
    NotFound,
    #[error("{0}")]
    Other(String),
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum RazorleafError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Semantic(#[from] SemanticError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("Template “{template_name}” could not be loaded: {reason}")]
    Load {
        template_name: String,
        reason: String,
    },
    #[error("Template “{template_name}” was requested but no loader is configured")]
    MissingLoader { template_name: String },
    #[error("“{name}” is not a valid global name")]
    InvalidGlobal { name: String },
    #[error("Template already exists: {template_name}")]
    TemplateExists { template_name: String },
    #[error("Template not found: {template_name}")]
    MissingTemplate { template_name: String },
    #[error("Internal error in generated program: {0}")]
    Internal(String),
}

impl RazorleafError {
    /// The diagnostic's message without location or excerpt.
    pub fn message(&self) -> String {
        match self {
            Self::Syntax(error) => error.kind.to_string(),
            Self::Semantic(error) => error.kind.to_string(),
            other => other.to_string(),
        }
    }

    /// Where the error was raised, for errors tied to template source.
    pub fn location(&self) -> Option<&Location> {
        match self {
            Self::Syntax(error) => Some(&error.location),
            Self::Semantic(error) => error.location.as_ref(),
            _ => None,
        }
    }
}

/// Renders the line before the reported point, the reported line, and a
/// caret under the reported column, each prefixed with a line number gutter.
pub(crate) fn excerpt(source: &str, point: Point) -> String {
    let lines: Vec<&str> = source.split('\n').collect();
    let (line, column) = match point {
        Point::At(position) => (position.line, position.column),
        Point::Eof => {
            let last = lines.last().map_or(0, |l| l.chars().count());
            (lines.len(), last + 1)
        }
    };

    let line = line.clamp(1, lines.len().max(1));
    let width = line.to_string().len();
    let mut out = String::new();

    for number in line.saturating_sub(1).max(1)..=line {
        let text = lines.get(number - 1).copied().unwrap_or_default();
        let _ = writeln!(out, "{}", format!("{number:>width$} | {text}").trim_end());
    }

    let text = lines.get(line - 1).copied().unwrap_or_default();
    let pad: String = text
        .chars()
        .take(column.saturating_sub(1))
        .map(|c| if c == '\t' { '\t' } else { ' ' })
        .collect();
    let _ = write!(out, "{:width$} | {pad}^", "");

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn excerpt_points_at_column() {
        let source = "div\n\tblock a\n\tblock a\n";
        let point = Point::At(Position {
            line: 3,
            column: 8,
            offset: 20,
        });

        assert_eq!(
            excerpt(source, point),
            "2 | \tblock a\n3 | \tblock a\n  | \t      ^"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn excerpt_at_end_of_input() {
        let source = "p \"unterminated";

        let caret = format!("  | {}^", " ".repeat(15));
        assert_eq!(
            excerpt(source, Point::Eof),
            format!("1 | p \"unterminated\n{caret}")
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn gutter_widens_for_larger_line_numbers() {
        let source = (1..=10).map(|n| format!("line{n}")).collect::<Vec<_>>().join("\n");
        let point = Point::At(Position {
            line: 10,
            column: 1,
            offset: 0,
        });

        assert_eq!(excerpt(&source, point), " 9 | line9\n10 | line10\n   | ^");
    }

    #[test]
    #[ntest::timeout(100)]
    fn circular_messages_list_the_chain() {
        let kind = SemanticErrorKind::CircularInclusion(vec!["a".to_owned(), "b".to_owned()]);
        assert_eq!(kind.to_string(), "Circular inclusion: ⤷ a → b ⤴");

        let kind = SemanticErrorKind::CircularExtension(vec!["a".to_owned(), "b".to_owned()]);
        assert_eq!(kind.to_string(), "Circular extension: ⤷ a → b ⤴");
    }

    #[test]
    #[ntest::timeout(100)]
    fn missing_parameters_pluralize() {
        let one = SemanticErrorKind::MissingParameters(vec!["name".to_owned()]);
        assert_eq!(one.to_string(), "Missing value for parameter “name”");

        let two = SemanticErrorKind::MissingParameters(vec!["a".to_owned(), "b".to_owned()]);
        assert_eq!(two.to_string(), "Missing value for parameters “a”, “b”");
    }
}
