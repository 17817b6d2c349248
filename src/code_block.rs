use std::fmt;

use crate::escape::{escape_attribute_value, escape_content};
use crate::expression::{Expr, Header, Stmt};

/// How a piece of output is escaped before it is appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Escape {
    Content,
    Attribute,
    /// The value must be markup; its HTML is inserted as-is.
    UnwrapMarkup,
}

impl Escape {
    fn name(self) -> &'static str {
        match self {
            Self::Content => "escapeContent",
            Self::Attribute => "escapeAttributeValue",
            Self::UnwrapMarkup => "unwrapMarkup",
        }
    }
}

/// The start of a braced section of the generated program.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Opener {
    /// A header written by the template author in a `%` line.
    Header(Header),
    Loop {
        item: String,
        index: Option<String>,
        collection: Expr,
    },
    Function {
        name: String,
        parameters: Vec<String>,
    },
}

/// A piece of program logic interleaved with output.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Code {
    Statements(Vec<Stmt>),
    Declare {
        name: String,
        value: Expr,
    },
    Assign {
        name: String,
        value: Expr,
    },
    Open(Opener),
    Close,
    Call {
        function: String,
        arguments: Vec<Expr>,
        result: Option<String>,
    },
    Return(Expr),
}

impl Code {
    pub(crate) fn declare(name: &str, value: Expr) -> Self {
        Self::Declare {
            name: name.to_owned(),
            value,
        }
    }

    pub(crate) fn assign(name: &str, value: Expr) -> Self {
        Self::Assign {
            name: name.to_owned(),
            value,
        }
    }

    pub(crate) fn open_if(condition: &str) -> Self {
        Self::Open(Opener::Header(Header::If(Expr::identifier(condition))))
    }

    pub(crate) fn open_else() -> Self {
        Self::Open(Opener::Header(Header::Else))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Part {
    Text { value: String, escape: Option<Escape> },
    Expression { expr: Expr, escape: Option<Escape> },
    Code(Code),
}

/// An ordered sequence of output text, output expressions and program code,
/// built up while compiling and flattened into instructions at the end.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct CodeBlock {
    parts: Vec<Part>,
}

impl CodeBlock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub(crate) fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub(crate) fn add_text(&mut self, escape: Option<Escape>, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        if !value.is_empty() {
            self.parts.push(Part::Text { value, escape });
        }
        self
    }

    pub(crate) fn add_expression(&mut self, escape: Option<Escape>, expr: Expr) -> &mut Self {
        self.parts.push(Part::Expression { expr, escape });
        self
    }

    pub(crate) fn add_code(&mut self, code: Code) -> &mut Self {
        self.parts.push(Part::Code(code));
        self
    }

    pub(crate) fn add_block(&mut self, block: CodeBlock) -> &mut Self {
        self.parts.extend(block.parts);
        self
    }

    /// The block's unescaped text, if it consists only of text.
    pub(crate) fn to_text(&self) -> Option<String> {
        self.parts
            .iter()
            .map(|part| match part {
                Part::Text { value, .. } => Some(value.as_str()),
                Part::Expression { .. } | Part::Code(_) => None,
            })
            .collect()
    }

    /// Drops a single leading space from the first text part.
    pub(crate) fn strip_leading_space(&mut self) {
        let first_text = self.parts.iter().position(|part| matches!(part, Part::Text { .. }));

        if let Some(index) = first_text
            && let Part::Text { value, .. } = &mut self.parts[index]
            && value.starts_with(' ')
        {
            value.remove(0);
            if value.is_empty() {
                self.parts.remove(index);
            }
        }
    }

    /// Flattens the block into instructions, merging adjacent text and
    /// expressions into single appends to `target`.
    pub(crate) fn into_instructions(self, target: &str) -> Vec<Instruction> {
        let mut instructions = Vec::new();
        let mut pieces: Vec<Piece> = Vec::new();

        let flush = |pieces: &mut Vec<Piece>, instructions: &mut Vec<Instruction>| {
            if !pieces.is_empty() {
                instructions.push(Instruction::Append {
                    target: target.to_owned(),
                    pieces: std::mem::take(pieces),
                });
            }
        };

        for part in self.parts {
            match part {
                Part::Text { value, escape } => {
                    let text = match escape {
                        Some(Escape::Content) => escape_content(&value).into_owned(),
                        Some(Escape::Attribute) => escape_attribute_value(&value).into_owned(),
                        Some(Escape::UnwrapMarkup) | None => value,
                    };
                    match pieces.last_mut() {
                        Some(Piece::Literal(literal)) => literal.push_str(&text),
                        _ => pieces.push(Piece::Literal(text)),
                    }
                }
                Part::Expression { expr, escape } => pieces.push(Piece::Expression { expr, escape }),
                Part::Code(code) => {
                    flush(&mut pieces, &mut instructions);
                    instructions.push(Instruction::Code(code));
                }
            }
        }

        flush(&mut pieces, &mut instructions);
        instructions
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Piece {
    Literal(String),
    Expression { expr: Expr, escape: Option<Escape> },
}

/// One step of a linear generated program.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Instruction {
    /// Concatenates the pieces onto the string held in `target`.
    Append { target: String, pieces: Vec<Piece> },
    Code(Code),
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Piece {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(text) => write!(f, "{}", Expr::String(text.clone())),
            Self::Expression { expr, escape: None } => write!(f, "{expr}"),
            Self::Expression {
                expr,
                escape: Some(escape),
            } => write!(f, "{}({expr})", escape.name()),
        }
    }
}

impl fmt::Display for Opener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Header(header) => write!(f, "{header} {{"),
            Self::Loop {
                item,
                index: Some(index),
                collection,
            } => write!(f, "for (const [{index}, {item}] of entries({collection})) {{"),
            Self::Loop {
                item, collection, ..
            } => write!(f, "for (const {item} of {collection}) {{"),
            Self::Function { name, parameters } => {
                write!(f, "function {name}(")?;
                write_list(f, parameters)?;
                f.write_str(") {")
            }
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Statements(statements) => {
                for (i, statement) in statements.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{statement};")?;
                }
                Ok(())
            }
            Self::Declare { name, value } => write!(f, "let {name} = {value};"),
            Self::Assign { name, value } => write!(f, "{name} = {value};"),
            Self::Open(opener) => write!(f, "{opener}"),
            Self::Close => f.write_str("}"),
            Self::Call {
                function,
                arguments,
                result,
            } => {
                if let Some(result) = result {
                    write!(f, "let {result} = ")?;
                }
                write!(f, "{function}(")?;
                write_list(f, arguments)?;
                f.write_str(");")
            }
            Self::Return(value) => write!(f, "return {value};"),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Append { target, pieces } => {
                write!(f, "{target} += ")?;
                for (i, piece) in pieces.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" + ")?;
                    }
                    write!(f, "{piece}")?;
                }
                f.write_str(";")
            }
            Self::Code(code) => write!(f, "{code}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn to_text_requires_only_text() {
        let mut block = CodeBlock::new();
        block.add_text(None, "a").add_text(Some(Escape::Attribute), "&b");
        assert_eq!(block.to_text().as_deref(), Some("a&b"));

        block.add_expression(None, Expr::identifier("x"));
        assert_eq!(block.to_text(), None);
    }

    #[test]
    #[ntest::timeout(100)]
    fn empty_text_is_not_added() {
        let mut block = CodeBlock::new();
        block.add_text(None, "");
        assert!(block.is_empty());
    }

    #[test]
    #[ntest::timeout(100)]
    fn adjacent_output_merges_into_one_append() {
        let mut block = CodeBlock::new();
        block
            .add_text(None, "<p>")
            .add_text(Some(Escape::Content), "a < b")
            .add_expression(Some(Escape::Content), Expr::identifier("x"))
            .add_text(None, "</p>")
            .add_code(Code::declare("y", Expr::Number(1.0)))
            .add_text(None, "!");

        let listing: Vec<String> = block
            .into_instructions("output")
            .iter()
            .map(ToString::to_string)
            .collect();

        assert_eq!(
            listing,
            [
                "output += \"<p>a &lt; b\" + escapeContent(x) + \"</p>\";",
                "let y = 1;",
                "output += \"!\";",
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn strip_leading_space_only_touches_first_text() {
        let mut block = CodeBlock::new();
        block.add_text(None, " a").add_text(None, " b");
        block.strip_leading_space();
        assert_eq!(block.to_text().as_deref(), Some("a b"));

        let mut single = CodeBlock::new();
        single.add_text(None, " ");
        single.strip_leading_space();
        assert!(single.is_empty());
    }
}
