//! The expression language embedded in templates.
//!
//! Interpolations, conditions, loop collections, macro arguments and `%` code
//! lines are all written in a small scripting language: literals, property
//! access, arithmetic, comparison and logical operators, the conditional
//! operator, plus `let`/`var`/`const` declarations and assignments in code
//! lines. There are no function calls.

use std::fmt;

use crate::value::format_number;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub(crate) struct ExpressionError {
    pub(crate) message: String,
    /// Byte offset into the parsed text.
    pub(crate) offset: usize,
}

fn error(offset: usize, message: impl Into<String>) -> ExpressionError {
    ExpressionError {
        message: message.into(),
        offset,
    }
}

type ExpressionResult<T> = Result<T, ExpressionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Negate,
    Plus,
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Remainder => "%",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::StrictEqual => "===",
            Self::StrictNotEqual => "!==",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogicalOp {
    And,
    Or,
    Nullish,
}

impl LogicalOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::And => "&&",
            Self::Or => "||",
            Self::Nullish => "??",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Identifier(String),
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
}

impl Expr {
    pub(crate) fn identifier(name: &str) -> Self {
        Self::Identifier(name.to_owned())
    }

    pub(crate) fn member(object: Self, property: &str) -> Self {
        Self::Member {
            object: Box::new(object),
            property: property.to_owned(),
        }
    }
}

/// Something a value can be stored into: a variable, or a property path
/// rooted at one.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Target {
    pub(crate) name: String,
    pub(crate) path: Vec<Accessor>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Accessor {
    Property(String),
    Index(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Stmt {
    Declare {
        name: String,
        value: Option<Expr>,
    },
    Assign {
        target: Target,
        /// The operator of a compound assignment such as `+=`.
        op: Option<BinaryOp>,
        value: Expr,
    },
    Update {
        target: Target,
        delta: f64,
    },
    Expression(Expr),
}

/// The opening line of a code block that wraps indented template content.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Header {
    If(Expr),
    ElseIf(Expr),
    Else,
    While(Expr),
    ForOf { binding: String, collection: Expr },
}

pub(crate) const RESERVED_WORDS: &[&str] = &[
    "await",
    "break",
    "case",
    "catch",
    "class",
    "const",
    "continue",
    "debugger",
    "default",
    "delete",
    "do",
    "else",
    "enum",
    "export",
    "extends",
    "false",
    "finally",
    "for",
    "function",
    "if",
    "implements",
    "import",
    "in",
    "instanceof",
    "interface",
    "let",
    "new",
    "null",
    "package",
    "private",
    "protected",
    "public",
    "return",
    "static",
    "super",
    "switch",
    "this",
    "throw",
    "true",
    "try",
    "typeof",
    "var",
    "void",
    "while",
    "with",
    "yield",
];

pub(crate) fn is_reserved(name: &str) -> bool {
    RESERVED_WORDS.contains(&name)
}

fn is_identifier_start(c: char) -> bool {
    c == '$' || c == '_' || c.is_alphabetic()
}

fn is_identifier_part(c: char) -> bool {
    is_identifier_start(c) || c.is_alphanumeric() || c == '\u{200c}' || c == '\u{200d}'
}

/// Whether `name` can be used as a variable name.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(is_identifier_start)
        && chars.all(is_identifier_part)
        && !is_reserved(name)
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Str(String),
    Name(String),
    Punct(&'static str),
    End,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
    newline_before: bool,
}

const PUNCTUATORS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "??", "++", "--", "+=", "-=", "*=", "/=",
    "%=", "(", ")", "[", "]", "{", "}", ",", ".", "?", ":", ";", "!", "+", "-", "*", "/", "%",
    "<", ">", "=",
];

fn tokenize(text: &str) -> ExpressionResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut pos = 0;
    let mut newline_before = false;

    while let Some(c) = text[pos..].chars().next() {
        let rest = &text[pos..];

        if c == '\n' {
            newline_before = true;
            pos += 1;
            continue;
        }

        if c.is_whitespace() {
            pos += c.len_utf8();
            continue;
        }

        if rest.starts_with("//") {
            pos += rest.find('\n').unwrap_or(rest.len());
            continue;
        }

        if let Some(comment) = rest.strip_prefix("/*") {
            let end = comment
                .find("*/")
                .ok_or_else(|| error(pos, "Unterminated comment"))?;
            newline_before |= comment[..end].contains('\n');
            pos += end + 4;
            continue;
        }

        let offset = pos;
        let kind = if c.is_ascii_digit()
            || (c == '.' && rest[1..].starts_with(|d: char| d.is_ascii_digit()))
        {
            let (n, len) = lex_number(rest).ok_or_else(|| error(offset, "Invalid number"))?;
            pos += len;
            TokenKind::Number(n)
        } else if c == '"' || c == '\'' {
            let (s, len) = lex_string(rest, offset)?;
            pos += len;
            TokenKind::Str(s)
        } else if is_identifier_start(c) {
            let len = rest
                .find(|c: char| !is_identifier_part(c))
                .unwrap_or(rest.len());
            pos += len;
            TokenKind::Name(rest[..len].to_owned())
        } else if let Some(punct) = PUNCTUATORS.iter().copied().find(|p| rest.starts_with(p)) {
            pos += punct.len();
            TokenKind::Punct(punct)
        } else {
            return Err(error(offset, format!("Unexpected character {c:?}")));
        };

        tokens.push(Token {
            kind,
            offset,
            newline_before,
        });
        newline_before = false;
    }

    tokens.push(Token {
        kind: TokenKind::End,
        offset: text.len(),
        newline_before,
    });

    Ok(tokens)
}

fn lex_number(rest: &str) -> Option<(f64, usize)> {
    if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        let len = hex
            .find(|c: char| !c.is_ascii_hexdigit())
            .unwrap_or(hex.len());
        if len == 0 {
            return None;
        }
        return u64::from_str_radix(&hex[..len], 16)
            .ok()
            .map(|n| (n as f64, len + 2));
    }

    let bytes = rest.as_bytes();
    let digits = |from: usize| {
        bytes[from..]
            .iter()
            .position(|b| !b.is_ascii_digit())
            .map_or(bytes.len(), |p| from + p)
    };

    let mut end = digits(0);
    if bytes.get(end) == Some(&b'.') {
        end = digits(end + 1);
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exponent = end + 1;
        if matches!(bytes.get(exponent), Some(b'+' | b'-')) {
            exponent += 1;
        }
        let exponent_end = digits(exponent);
        if exponent_end > exponent {
            end = exponent_end;
        }
    }

    if rest[end..].starts_with(is_identifier_start) {
        return None;
    }

    rest[..end].parse().ok().map(|n| (n, end))
}

fn lex_string(rest: &str, offset: usize) -> ExpressionResult<(String, usize)> {
    let mut chars = rest.char_indices();
    let quote = chars.next().map(|(_, q)| q);
    let mut value = String::new();

    while let Some((i, c)) = chars.next() {
        if Some(c) == quote {
            return Ok((value, i + 1));
        }

        match c {
            '\n' => break,
            '\\' => {
                let Some((j, escaped)) = chars.next() else {
                    break;
                };
                match escaped {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    'b' => value.push('\u{8}'),
                    'f' => value.push('\u{c}'),
                    'v' => value.push('\u{b}'),
                    '0' => value.push('\0'),
                    '\n' => {}
                    'u' | 'x' => {
                        let (decoded, consumed) = lex_code_point(&rest[j..])
                            .ok_or_else(|| error(offset + i, "Invalid escape sequence"))?;
                        value.push(decoded);
                        for _ in 0..consumed {
                            chars.next();
                        }
                    }
                    other => value.push(other),
                }
            }
            c => value.push(c),
        }
    }

    Err(error(offset, "Unterminated string"))
}

/// Decodes `uXXXX`, `u{X…}` or `xXX` at the start of `escape`, returning the
/// character and how many characters after the `u`/`x` were used.
pub(crate) fn lex_code_point(escape: &str) -> Option<(char, usize)> {
    let (digits, consumed) = if let Some(braced) = escape.strip_prefix("u{") {
        let end = braced.find('}')?;
        (&braced[..end], end + 2)
    } else if let Some(short) = escape.strip_prefix('x') {
        (short.get(..2)?, 2)
    } else {
        (escape.get(1..5)?, 4)
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let code = u32::from_str_radix(digits, 16).ok()?;
    char::from_u32(code).map(|c| (c, consumed))
}

#[derive(Debug, Clone, Copy)]
enum Operator {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

impl Operator {
    fn combine(self, left: Expr, right: Expr) -> Expr {
        let (left, right) = (Box::new(left), Box::new(right));
        match self {
            Self::Binary(op) => Expr::Binary { op, left, right },
            Self::Logical(op) => Expr::Logical { op, left, right },
        }
    }
}

struct ExpressionParser {
    tokens: Vec<Token>,
    index: usize,
}

impl ExpressionParser {
    fn new(text: &str) -> ExpressionResult<Self> {
        Ok(Self {
            tokens: tokenize(text)?,
            index: 0,
        })
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.index]
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.index].clone();
        if token.kind != TokenKind::End {
            self.index += 1;
        }
        token
    }

    fn at_end(&self) -> bool {
        self.peek().kind == TokenKind::End
    }

    fn check(&self, punct: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Punct(p) if *p == punct)
    }

    fn eat(&mut self, punct: &str) -> bool {
        let found = self.check(punct);
        if found {
            self.advance();
        }
        found
    }

    fn expect(&mut self, punct: &str) -> ExpressionResult<()> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn eat_name(&mut self, name: &str) -> bool {
        let found = matches!(&self.peek().kind, TokenKind::Name(n) if n == name);
        if found {
            self.advance();
        }
        found
    }

    fn expect_end(&self) -> ExpressionResult<()> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn unexpected(&self) -> ExpressionError {
        let token = self.peek();
        let found = match &token.kind {
            TokenKind::End => return error(token.offset, "Unexpected end of input"),
            TokenKind::Number(n) => format_number(*n),
            TokenKind::Str(s) => format!("{s:?}"),
            TokenKind::Name(n) => n.clone(),
            TokenKind::Punct(p) => (*p).to_owned(),
        };
        error(token.offset, format!("Unexpected “{found}”"))
    }

    fn binding_name(&mut self) -> ExpressionResult<String> {
        match &self.peek().kind {
            TokenKind::Name(name) if !is_reserved(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(error(self.peek().offset, "Expected a variable name")),
        }
    }

    fn expression(&mut self) -> ExpressionResult<Expr> {
        let test = self.binary(1)?;
        if !self.eat("?") {
            return Ok(test);
        }

        let consequent = self.expression()?;
        self.expect(":")?;
        let alternate = self.expression()?;

        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn binary_operator(&self) -> Option<(u8, Operator)> {
        let TokenKind::Punct(punct) = &self.peek().kind else {
            return None;
        };

        let operator = match *punct {
            "??" => (1, Operator::Logical(LogicalOp::Nullish)),
            "||" => (2, Operator::Logical(LogicalOp::Or)),
            "&&" => (3, Operator::Logical(LogicalOp::And)),
            "==" => (4, Operator::Binary(BinaryOp::Equal)),
            "!=" => (4, Operator::Binary(BinaryOp::NotEqual)),
            "===" => (4, Operator::Binary(BinaryOp::StrictEqual)),
            "!==" => (4, Operator::Binary(BinaryOp::StrictNotEqual)),
            "<" => (5, Operator::Binary(BinaryOp::Less)),
            "<=" => (5, Operator::Binary(BinaryOp::LessEqual)),
            ">" => (5, Operator::Binary(BinaryOp::Greater)),
            ">=" => (5, Operator::Binary(BinaryOp::GreaterEqual)),
            "+" => (6, Operator::Binary(BinaryOp::Add)),
            "-" => (6, Operator::Binary(BinaryOp::Subtract)),
            "*" => (7, Operator::Binary(BinaryOp::Multiply)),
            "/" => (7, Operator::Binary(BinaryOp::Divide)),
            "%" => (7, Operator::Binary(BinaryOp::Remainder)),
            _ => return None,
        };

        Some(operator)
    }

    fn binary(&mut self, min_precedence: u8) -> ExpressionResult<Expr> {
        let mut left = self.unary()?;

        while let Some((precedence, operator)) = self.binary_operator() {
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let right = self.binary(precedence + 1)?;
            left = operator.combine(left, right);
        }

        Ok(left)
    }

    fn unary(&mut self) -> ExpressionResult<Expr> {
        let op = if self.eat("!") {
            UnaryOp::Not
        } else if self.eat("-") {
            UnaryOp::Negate
        } else if self.eat("+") {
            UnaryOp::Plus
        } else if self.eat_name("typeof") {
            UnaryOp::TypeOf
        } else {
            return self.postfix();
        };

        Ok(Expr::Unary {
            op,
            operand: Box::new(self.unary()?),
        })
    }

    fn postfix(&mut self) -> ExpressionResult<Expr> {
        let mut expr = self.primary()?;

        loop {
            if self.eat(".") {
                let token = self.advance();
                let TokenKind::Name(property) = token.kind else {
                    return Err(error(token.offset, "Expected a property name"));
                };
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                };
            } else if self.eat("[") {
                let index = self.expression()?;
                self.expect("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.check("(") {
                return Err(error(
                    self.peek().offset,
                    "Function calls are not supported in template expressions",
                ));
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> ExpressionResult<Expr> {
        let token = self.peek().clone();

        let expr = match token.kind {
            TokenKind::Number(n) => Expr::Number(n),
            TokenKind::Str(s) => Expr::String(s),
            TokenKind::Name(name) => match name.as_str() {
                "true" => Expr::Bool(true),
                "false" => Expr::Bool(false),
                "null" => Expr::Null,
                "undefined" => Expr::Undefined,
                "NaN" => Expr::Number(f64::NAN),
                "Infinity" => Expr::Number(f64::INFINITY),
                _ if is_reserved(&name) => return Err(self.unexpected()),
                _ => Expr::Identifier(name),
            },
            TokenKind::Punct("(") => {
                self.advance();
                let inner = self.expression()?;
                self.expect(")")?;
                return Ok(inner);
            }
            TokenKind::Punct("[") => {
                self.advance();
                return self.array();
            }
            TokenKind::Punct("{") => {
                self.advance();
                return self.object();
            }
            TokenKind::Punct(_) | TokenKind::End => return Err(self.unexpected()),
        };

        self.advance();
        Ok(expr)
    }

    fn array(&mut self) -> ExpressionResult<Expr> {
        let mut items = Vec::new();
        while !self.eat("]") {
            items.push(self.expression()?);
            if !self.eat(",") {
                self.expect("]")?;
                break;
            }
        }
        Ok(Expr::Array(items))
    }

    fn object(&mut self) -> ExpressionResult<Expr> {
        let mut entries = Vec::new();

        while !self.eat("}") {
            let token = self.advance();
            let (key, shorthand) = match token.kind {
                TokenKind::Name(name) => {
                    let shorthand = !is_reserved(&name);
                    (name, shorthand)
                }
                TokenKind::Str(s) => (s, false),
                TokenKind::Number(n) => (format_number(n), false),
                _ => return Err(error(token.offset, "Expected a property name")),
            };

            let value = if self.eat(":") {
                self.expression()?
            } else if shorthand {
                Expr::Identifier(key.clone())
            } else {
                return Err(self.unexpected());
            };
            entries.push((key, value));

            if !self.eat(",") {
                self.expect("}")?;
                break;
            }
        }

        Ok(Expr::Object(entries))
    }

    fn into_target(expr: Expr, offset: usize) -> ExpressionResult<Target> {
        match expr {
            Expr::Identifier(name) => Ok(Target {
                name,
                path: Vec::new(),
            }),
            Expr::Member { object, property } => {
                let mut target = Self::into_target(*object, offset)?;
                target.path.push(Accessor::Property(property));
                Ok(target)
            }
            Expr::Index { object, index } => {
                let mut target = Self::into_target(*object, offset)?;
                target.path.push(Accessor::Index(*index));
                Ok(target)
            }
            _ => Err(error(offset, "Invalid assignment target")),
        }
    }

    fn assignment_operator(&self) -> Option<Option<BinaryOp>> {
        let TokenKind::Punct(punct) = &self.peek().kind else {
            return None;
        };
        match *punct {
            "=" => Some(None),
            "+=" => Some(Some(BinaryOp::Add)),
            "-=" => Some(Some(BinaryOp::Subtract)),
            "*=" => Some(Some(BinaryOp::Multiply)),
            "/=" => Some(Some(BinaryOp::Divide)),
            "%=" => Some(Some(BinaryOp::Remainder)),
            _ => None,
        }
    }

    fn statement(&mut self, statements: &mut Vec<Stmt>) -> ExpressionResult<()> {
        if self.eat_name("let") || self.eat_name("var") || self.eat_name("const") {
            loop {
                let name = self.binding_name()?;
                let value = if self.eat("=") {
                    Some(self.expression()?)
                } else {
                    None
                };
                statements.push(Stmt::Declare { name, value });
                if !self.eat(",") {
                    return Ok(());
                }
            }
        }

        let start = self.peek().offset;

        if self.check("++") || self.check("--") {
            let delta = if self.eat("++") { 1.0 } else { self.advance(); -1.0 };
            let target = Self::into_target(self.postfix()?, start)?;
            statements.push(Stmt::Update { target, delta });
            return Ok(());
        }

        let expr = self.expression()?;

        if let Some(op) = self.assignment_operator() {
            self.advance();
            let target = Self::into_target(expr, start)?;
            let value = self.expression()?;
            statements.push(Stmt::Assign { target, op, value });
        } else if (self.check("++") || self.check("--")) && !self.peek().newline_before {
            let delta = if self.eat("++") { 1.0 } else { self.advance(); -1.0 };
            let target = Self::into_target(expr, start)?;
            statements.push(Stmt::Update { target, delta });
        } else {
            statements.push(Stmt::Expression(expr));
        }

        Ok(())
    }

    fn parenthesized(&mut self) -> ExpressionResult<Expr> {
        self.expect("(")?;
        let expr = self.expression()?;
        self.expect(")")?;
        Ok(expr)
    }
}

pub(crate) fn parse_expression(text: &str) -> ExpressionResult<Expr> {
    let mut parser = ExpressionParser::new(text)?;
    let expr = parser.expression()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parses a sequence of statements separated by semicolons or newlines.
pub(crate) fn parse_statements(text: &str) -> ExpressionResult<Vec<Stmt>> {
    let mut parser = ExpressionParser::new(text)?;
    let mut statements = Vec::new();

    loop {
        while parser.eat(";") {}
        if parser.at_end() {
            return Ok(statements);
        }

        parser.statement(&mut statements)?;

        if !(parser.eat(";") || parser.at_end() || parser.peek().newline_before) {
            return Err(parser.unexpected());
        }
    }
}

pub(crate) fn parse_header(text: &str) -> ExpressionResult<Header> {
    let mut parser = ExpressionParser::new(text)?;

    let header = if parser.eat_name("if") {
        Header::If(parser.parenthesized()?)
    } else if parser.eat_name("else") {
        if parser.eat_name("if") {
            Header::ElseIf(parser.parenthesized()?)
        } else {
            Header::Else
        }
    } else if parser.eat_name("while") {
        Header::While(parser.parenthesized()?)
    } else if parser.eat_name("for") {
        parser.expect("(")?;
        if !(parser.eat_name("const") || parser.eat_name("let") || parser.eat_name("var")) {
            return Err(error(parser.peek().offset, "Expected a loop variable declaration"));
        }
        let binding = parser.binding_name()?;
        if !parser.eat_name("of") {
            return Err(error(parser.peek().offset, "Expected “of”"));
        }
        let collection = parser.expression()?;
        parser.expect(")")?;
        Header::ForOf {
            binding,
            collection,
        }
    } else {
        return Err(error(
            0,
            "Code with indented content must start with if, else, while or for",
        ));
    };

    parser.expect_end()?;
    Ok(header)
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    let quoted = serde_json::to_string(s).map_err(|_| fmt::Error)?;
    f.write_str(&quoted)
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => f.write_str(&format_number(*n)),
            Self::String(s) => write_quoted(f, s),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Object(entries) => {
                if entries.is_empty() {
                    return f.write_str("{}");
                }
                f.write_str("{ ")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    if is_identifier(key) {
                        f.write_str(key)?;
                    } else {
                        write_quoted(f, key)?;
                    }
                    write!(f, ": {value}")?;
                }
                f.write_str(" }")
            }
            Self::Identifier(name) => f.write_str(name),
            Self::Member { object, property } => write!(f, "{object}.{property}"),
            Self::Index { object, index } => write!(f, "{object}[{index}]"),
            Self::Unary { op, operand } => {
                let symbol = match op {
                    UnaryOp::Not => "!",
                    UnaryOp::Negate => "-",
                    UnaryOp::Plus => "+",
                    UnaryOp::TypeOf => "typeof ",
                };
                if matches!(**operand, Self::Unary { .. }) {
                    write!(f, "{symbol}({operand})")
                } else {
                    write!(f, "{symbol}{operand}")
                }
            }
            Self::Binary { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Self::Logical { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Self::Conditional {
                test,
                consequent,
                alternate,
            } => write!(f, "({test} ? {consequent} : {alternate})"),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for accessor in &self.path {
            match accessor {
                Accessor::Property(property) => write!(f, ".{property}")?,
                Accessor::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Declare { name, value: None } => write!(f, "let {name}"),
            Self::Declare {
                name,
                value: Some(value),
            } => write!(f, "let {name} = {value}"),
            Self::Assign { target, op, value } => {
                let symbol = op.map_or("", BinaryOp::symbol);
                write!(f, "{target} {symbol}= {value}")
            }
            Self::Update { target, delta } => {
                write!(f, "{target}{}", if *delta > 0.0 { "++" } else { "--" })
            }
            Self::Expression(expr) => write!(f, "{expr}"),
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::If(condition) => write!(f, "if ({condition})"),
            Self::ElseIf(condition) => write!(f, "else if ({condition})"),
            Self::Else => f.write_str("else"),
            Self::While(condition) => write!(f, "while ({condition})"),
            Self::ForOf {
                binding,
                collection,
            } => write!(f, "for (const {binding} of {collection})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn reprint(text: &str) -> String {
        parse_expression(text).unwrap().to_string()
    }

    #[rstest]
    #[case("1 + 2 * 3", "(1 + (2 * 3))")]
    #[case("(1 + 2) * 3", "((1 + 2) * 3)")]
    #[case("a.b[c].d", "a.b[c].d")]
    #[case("!a && b || c", "((!a && b) || c)")]
    #[case("a ?? b ? 'x' : \"y\"", "((a ?? b) ? \"x\" : \"y\")")]
    #[case("x - -1", "(x - -1)")]
    #[case("typeof x === 'string'", "(typeof x === \"string\")")]
    #[case("[1, 'a',]", "[1, \"a\"]")]
    #[case("{a: 1, 'b c': 2, d}", "{ a: 1, \"b c\": 2, d: d }")]
    #[case("{}", "{}")]
    #[case("0x1F + .5", "(31 + 0.5)")]
    #[case("'\\u{41}\\x42\\u0043'", "\"ABC\"")]
    fn expressions_reprint(#[case] text: &str, #[case] expected: &str) {
        assert_eq!(reprint(text), expected);
    }

    #[rstest]
    #[case("")]
    #[case("a +")]
    #[case("{")]
    #[case("a b")]
    #[case("f(x)")]
    #[case("'unterminated")]
    #[case("if")]
    #[case("3in")]
    fn invalid_expressions(#[case] text: &str) {
        assert!(parse_expression(text).is_err(), "{text:?} should not parse");
    }

    #[test]
    #[ntest::timeout(100)]
    fn error_offsets_point_at_the_problem() {
        let err = parse_expression("a + )").unwrap_err();
        assert_eq!(err.offset, 4);
        assert_eq!(err.message, "Unexpected “)”");

        let err = parse_expression("a +").unwrap_err();
        assert_eq!(err.offset, 3);
        assert_eq!(err.message, "Unexpected end of input");
    }

    #[test]
    #[ntest::timeout(100)]
    fn statements_split_on_newlines_and_semicolons() {
        let statements = parse_statements("let a = 1, b\nb = a + 1; a += 2\ncount++").unwrap();
        let printed: Vec<String> = statements.iter().map(ToString::to_string).collect();

        assert_eq!(
            printed,
            ["let a = 1", "let b", "b = (a + 1)", "a += 2", "count++"]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn statements_require_separators() {
        assert!(parse_statements("a = 1 b = 2").is_err());
        assert!(parse_statements("1 = a").is_err());
        assert!(parse_statements("let if = 3").is_err());
    }

    #[test]
    #[ntest::timeout(100)]
    fn property_assignment_targets() {
        let statements = parse_statements("data.items[0].name = 'x'").unwrap();
        assert_eq!(statements[0].to_string(), "data.items[0].name = \"x\"");
    }

    #[rstest]
    #[case("if (a > 1)", "if ((a > 1))")]
    #[case("else if (b)", "else if (b)")]
    #[case("else", "else")]
    #[case("while (i < 3)", "while ((i < 3))")]
    #[case("for (const item of data.items)", "for (const item of data.items)")]
    fn headers(#[case] text: &str, #[case] expected: &str) {
        assert_eq!(parse_header(text).unwrap().to_string(), expected);
    }

    #[test]
    #[ntest::timeout(100)]
    fn headers_reject_statements() {
        assert!(parse_header("let a = 1").is_err());
        assert!(parse_header("if (a) b").is_err());
        assert!(parse_header("for (x of y)").is_err());
    }

    #[rstest]
    #[case("name", true)]
    #[case("_private", true)]
    #[case("$el", true)]
    #[case("héllo", true)]
    #[case("9lives", false)]
    #[case("with-dash", false)]
    #[case("class", false)]
    #[case("", false)]
    fn identifiers(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(is_identifier(name), expected);
    }
}
