use std::sync::LazyLock;

use regex::Regex;

use crate::ast::{
    Argument, BlockAction, BlockActionKind, CodeBody, Extends, NodeId, NodeKind, Position, SourceId, Tree,
};
use crate::code_block::{CodeBlock, Escape};
use crate::error::{
    Point, RazorleafError, SemanticError, SemanticErrorKind, SyntaxError, SyntaxErrorKind,
};
use crate::expression::{self, Expr, Header};

type ParseResult<T> = Result<T, RazorleafError>;

static NAMED_ARGUMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([\p{ID_Start}$_][\p{ID_Continue}$]*)\s*:").expect("argument pattern is valid")
});

static LOOP_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([\p{ID_Start}$_][\p{ID_Continue}$]*)(?:\s*,\s*([\p{ID_Start}$_][\p{ID_Continue}$]*))?")
        .expect("loop pattern is valid")
});

static LOOP_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+(?:of|in)\s").expect("loop keyword pattern is valid"));

/// Characters allowed in element, attribute, class, block and macro names.
fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

fn is_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(is_name_char)
}

/// Splits off surrounding whitespace, returning the trimmed text and where it starts.
fn trimmed(text: &str, start: Position) -> (&str, Position) {
    let leading = text.len() - text.trim_start().len();
    (text.trim(), start.advanced_by(&text[..leading]))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndentUnit {
    Tab,
    Spaces(usize),
}

impl IndentUnit {
    fn repeat(self, count: usize) -> String {
        match self {
            Self::Tab => "\t".repeat(count),
            Self::Spaces(n) => " ".repeat(n * count),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Children {
    Allowed,
    Forbidden,
    /// Indented lines are code text for a `do` block.
    Raw,
}

#[derive(Debug)]
struct Frame {
    node: NodeId,
    indent: isize,
    children: Children,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StringMode {
    Content,
    /// `!"…"`: literal text is not escaped and interpolations must be markup.
    Raw,
    /// `!!"…"`: nothing is escaped or checked.
    DoubleRaw,
    Attribute,
}

impl StringMode {
    fn text_escape(self) -> Option<Escape> {
        match self {
            Self::Content => Some(Escape::Content),
            Self::Attribute => Some(Escape::Attribute),
            Self::Raw | Self::DoubleRaw => None,
        }
    }

    fn expression_escape(self) -> Option<Escape> {
        match self {
            Self::Content => Some(Escape::Content),
            Self::Attribute => Some(Escape::Attribute),
            Self::Raw => Some(Escape::UnwrapMarkup),
            Self::DoubleRaw => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum StringTarget {
    Content,
    Attribute(NodeId),
}

#[derive(Debug)]
struct StringState {
    mode: StringMode,
    target: StringTarget,
    block: CodeBlock,
    text: String,
    start: Position,
}

impl StringState {
    fn new(mode: StringMode, target: StringTarget, start: Position) -> Self {
        Self {
            mode,
            target,
            block: CodeBlock::new(),
            text: String::new(),
            start,
        }
    }

    fn flush_text(&mut self) {
        let text = std::mem::take(&mut self.text);
        self.block.add_text(self.mode.text_escape(), text);
    }
}

/// What the rest of a line is collected for.
#[derive(Debug, Clone, Copy)]
enum LineKind {
    If,
    Elif,
    For,
    Include,
    Extends,
    Block,
    Replace,
    Append,
    Macro,
    Code,
    Do(NodeId),
    Guard(NodeId),
}

#[derive(Debug)]
struct CallState {
    name: String,
    start: Position,
    arguments: Vec<Argument>,
    current: String,
    current_start: Position,
    attempts: Vec<String>,
}

#[derive(Debug)]
enum State {
    Indent(String),
    Content,
    Comment,
    Identifier { name: String, start: Position },
    ClassName { name: String, start: Position },
    AttributeValue(NodeId),
    AfterAttribute(NodeId),
    String(StringState),
    Escape(StringState),
    Interpolation {
        string: StringState,
        code: String,
        start: Position,
    },
    Line {
        kind: LineKind,
        text: String,
        keyword: Position,
        start: Position,
    },
    Arguments(CallState),
    RawLine(NodeId),
}

impl State {
    fn indent() -> Self {
        Self::Indent(String::new())
    }
}

/// Parses one template's source into `tree`, returning its root.
pub(crate) fn parse(tree: &mut Tree, source: &str, name: &str) -> ParseResult<NodeId> {
    tracing::debug!(template = name, "parsing template");

    let source_id = tree.add_source(name, source);
    let root = tree.add(NodeKind::Root(Box::default()), None, Position::START, source_id);

    let mut parser = Parser {
        tree,
        input: source,
        name,
        source_id,
        root,
        offset: 0,
        pos: 0,
        line: 1,
        line_start_pos: 0,
        pending_newline: false,
        at_eof: false,
        frames: vec![Frame {
            node: root,
            indent: -1,
            children: Children::Allowed,
        }],
        indent_unit: None,
        line_indent: 0,
        code_nodes: Vec::new(),
    };

    parser.run()?;
    Ok(root)
}

struct Parser<'t, 'a> {
    tree: &'t mut Tree,
    input: &'a str,
    name: &'a str,
    source_id: SourceId,
    root: NodeId,
    /// Byte offset of the next character.
    offset: usize,
    /// Byte offset of the current character.
    pos: usize,
    line: usize,
    line_start_pos: usize,
    pending_newline: bool,
    at_eof: bool,
    frames: Vec<Frame>,
    indent_unit: Option<IndentUnit>,
    line_indent: isize,
    /// Code nodes whose bodies are parsed once their children are known,
    /// with the position their text starts at.
    code_nodes: Vec<(NodeId, Position)>,
}

impl<'t, 'a> Parser<'t, 'a> {
    fn run(&mut self) -> ParseResult<()> {
        let mut state = State::indent();

        while let Some(c) = self.next_char() {
            state = self.step(state, c)?;
        }

        // A final newline closes whatever line was open.
        self.at_eof = true;
        state = self.step(state, '\n')?;

        match state {
            State::String(string) | State::Escape(string) => {
                return Err(self.eof_error(SyntaxErrorKind::Unterminated {
                    construct: "string".to_owned(),
                    start: string.start,
                }));
            }
            State::Interpolation { start, .. } => {
                return Err(self.eof_error(SyntaxErrorKind::Unterminated {
                    construct: "interpolated section".to_owned(),
                    start,
                }));
            }
            State::Arguments(call) => {
                return Err(self.eof_error(SyntaxErrorKind::UnterminatedCall {
                    start: call.start,
                    attempts: call.attempts,
                }));
            }
            _ => {}
        }

        self.finish_code_nodes()
    }

    // --- Input ---

    fn next_char(&mut self) -> Option<char> {
        let c = self.input[self.offset..].chars().next()?;
        if self.pending_newline {
            self.line += 1;
            self.line_start_pos = self.offset;
        }
        self.pos = self.offset;
        self.offset += c.len_utf8();
        self.pending_newline = c == '\n';
        Some(c)
    }

    fn peek(&self) -> Option<char> {
        self.input[self.offset..].chars().next()
    }

    fn peek_str(&self, s: &str) -> bool {
        self.input[self.offset..].starts_with(s)
    }

    fn skip(&mut self, count: usize) {
        for _ in 0..count {
            self.next_char();
        }
    }

    /// The position of the current character.
    fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.input[self.line_start_pos..self.pos].chars().count() + 1,
            offset: self.pos,
        }
    }

    fn position_after(&self, c: char) -> Position {
        self.position().advanced_by(c.encode_utf8(&mut [0; 4]))
    }

    // --- Errors ---

    fn error_at(&self, point: Point, kind: SyntaxErrorKind) -> RazorleafError {
        SyntaxError::new(kind, self.name, self.input, point).into()
    }

    fn make_error(&self, kind: SyntaxErrorKind) -> RazorleafError {
        let point = if self.at_eof {
            Point::Eof
        } else {
            Point::At(self.position())
        };
        self.error_at(point, kind)
    }

    fn eof_error(&self, kind: SyntaxErrorKind) -> RazorleafError {
        self.error_at(Point::Eof, kind)
    }

    fn error_at_position(&self, position: Position, kind: SyntaxErrorKind) -> RazorleafError {
        self.error_at(Point::At(position), kind)
    }

    // --- Tree building ---

    fn current(&self) -> &Frame {
        // The root frame is never popped.
        &self.frames[self.frames.len() - 1]
    }

    fn is_extending(&self) -> bool {
        self.tree.root(self.root).extends.is_some()
    }

    /// Adds a node under the current context without making it a context itself.
    fn attach(&mut self, kind: NodeKind, position: Position) -> ParseResult<NodeId> {
        let parent = self.current();
        let parent_node = parent.node;

        if parent.children != Children::Allowed {
            let description = self.tree.kind(parent_node).describe().to_owned();
            return Err(self.error_at_position(position, SyntaxErrorKind::NoChildrenAllowed(description)));
        }

        if parent_node == self.root
            && self.is_extending()
            && !matches!(kind, NodeKind::Block { .. } | NodeKind::Macro { .. })
        {
            return Err(self.error_at_position(position, SyntaxErrorKind::NotAllowedInExtending));
        }

        Ok(self.tree.append(parent_node, kind, position, self.source_id))
    }

    /// Adds a node and makes it the context for what follows on its line and
    /// on more deeply indented lines.
    fn open(&mut self, kind: NodeKind, position: Position, children: Children) -> ParseResult<NodeId> {
        let id = self.attach(kind, position)?;
        self.frames.push(Frame {
            node: id,
            indent: self.line_indent,
            children,
        });
        Ok(id)
    }

    fn push_code(&mut self, node: NodeId, text: &str) {
        if let NodeKind::Code { text: code, .. } = &mut self.tree.node_mut(node).kind {
            code.push_str(text);
        }
    }

    // --- States ---

    fn step(&mut self, state: State, c: char) -> ParseResult<State> {
        match state {
            State::Indent(whitespace) => self.indent(whitespace, c),
            State::Content => self.content(c),
            State::Comment => Ok(if c == '\n' { State::indent() } else { State::Comment }),
            State::Identifier { mut name, start } => {
                if is_name_char(c) || (c == ':' && self.peek().is_some_and(is_name_char)) {
                    name.push(c);
                    Ok(State::Identifier { name, start })
                } else if c == ':' {
                    let id = self.attach(
                        NodeKind::Attribute {
                            name,
                            value: None,
                            guard: None,
                        },
                        start,
                    )?;
                    Ok(State::AttributeValue(id))
                } else if c == '(' {
                    let current_start = self.position_after(c);
                    Ok(State::Arguments(CallState {
                        name,
                        start,
                        arguments: Vec::new(),
                        current: String::new(),
                        current_start,
                        attempts: Vec::new(),
                    }))
                } else {
                    self.keyword_or_element(name, start, c)
                }
            }
            State::ClassName { mut name, start } => {
                if is_name_char(c) {
                    name.push(c);
                    Ok(State::ClassName { name, start })
                } else if name.is_empty() {
                    Err(self.make_error(SyntaxErrorKind::Expected("a class name".to_owned())))
                } else {
                    self.attach(NodeKind::Class { name }, start)?;
                    self.content(c)
                }
            }
            State::AttributeValue(attribute) => match c {
                ' ' | '\t' => Ok(State::AttributeValue(attribute)),
                '"' => Ok(State::String(StringState::new(
                    StringMode::Attribute,
                    StringTarget::Attribute(attribute),
                    self.position(),
                ))),
                '!' => Err(self.make_error(SyntaxErrorKind::AttributeRawString)),
                _ => self.after_attribute(attribute, c),
            },
            State::AfterAttribute(attribute) => self.after_attribute(attribute, c),
            State::String(string) => self.string(string, c),
            State::Escape(string) if self.at_eof => Ok(State::Escape(string)),
            State::Escape(mut string) => {
                let escaped = match c {
                    '\\' | '"' | '\'' | '#' => c,
                    'n' => '\n',
                    'r' => '\r',
                    't' => '\t',
                    'b' => '\u{8}',
                    'f' => '\u{c}',
                    'v' => '\u{b}',
                    '0' => '\0',
                    'u' | 'x' => {
                        let Some((decoded, consumed)) = expression::lex_code_point(&self.input[self.pos..]) else {
                            return Err(self.make_error(SyntaxErrorKind::InvalidEscape(c)));
                        };
                        self.skip(consumed);
                        decoded
                    }
                    _ => return Err(self.make_error(SyntaxErrorKind::InvalidEscape(c))),
                };
                string.text.push(escaped);
                Ok(State::String(string))
            }
            State::Interpolation {
                mut string,
                mut code,
                start,
            } => {
                if c == '}'
                    && let Ok(expr) = expression::parse_expression(&code)
                {
                    self.tree.note_code(&code);
                    string.block.add_expression(string.mode.expression_escape(), expr);
                    return Ok(State::String(string));
                }
                code.push(c);
                Ok(State::Interpolation { string, code, start })
            }
            State::Line {
                kind,
                mut text,
                keyword,
                start,
            } => {
                if c == '\n' {
                    self.finish_line(kind, &text, keyword, start)?;
                    Ok(State::indent())
                } else {
                    text.push(c);
                    Ok(State::Line {
                        kind,
                        text,
                        keyword,
                        start,
                    })
                }
            }
            State::Arguments(call) => self.arguments(call, c),
            State::RawLine(node) => {
                self.push_code(node, c.encode_utf8(&mut [0; 4]));
                Ok(if c == '\n' { State::indent() } else { State::RawLine(node) })
            }
        }
    }

    fn indent(&mut self, mut whitespace: String, c: char) -> ParseResult<State> {
        match c {
            ' ' | '\t' => {
                whitespace.push(c);
                return Ok(State::Indent(whitespace));
            }
            '\r' => return Ok(State::Indent(whitespace)),
            '\n' => {
                if self.current().children == Children::Raw {
                    let node = self.current().node;
                    self.push_code(node, "\n");
                }
                return Ok(State::indent());
            }
            _ => {}
        }

        let frame = self.current();
        if frame.children == Children::Raw && !whitespace.is_empty() {
            let unit = self.indent_unit.unwrap_or_else(|| {
                if whitespace.starts_with('\t') {
                    IndentUnit::Tab
                } else {
                    IndentUnit::Spaces(whitespace.len() - whitespace.trim_start_matches(' ').len())
                }
            });
            let required = unit.repeat(usize::try_from(frame.indent + 1).unwrap_or(1));

            if let Some(extra) = whitespace.strip_prefix(&required) {
                let node = frame.node;
                self.indent_unit = Some(unit);
                self.push_code(node, extra);
                self.push_code(node, c.encode_utf8(&mut [0; 4]));
                return Ok(State::RawLine(node));
            }
        }

        let level = self.indent_level(&whitespace)?;
        while self.current().indent >= level {
            self.frames.pop();
        }

        if level > self.current().indent + 1 {
            return Err(self.make_error(SyntaxErrorKind::ExcessiveIndent));
        }

        self.line_indent = level;
        self.content(c)
    }

    fn indent_level(&mut self, whitespace: &str) -> ParseResult<isize> {
        if whitespace.is_empty() {
            return Ok(0);
        }

        let has_tabs = whitespace.contains('\t');
        let has_spaces = whitespace.contains(' ');
        let width = whitespace.len();

        let level = match self.indent_unit {
            None if has_tabs && has_spaces => return Err(self.make_error(SyntaxErrorKind::MixedIndent)),
            None if has_tabs => {
                self.indent_unit = Some(IndentUnit::Tab);
                width
            }
            None => {
                self.indent_unit = Some(IndentUnit::Spaces(width));
                1
            }
            Some(IndentUnit::Tab) => {
                if has_spaces {
                    return Err(self.make_error(SyntaxErrorKind::SpaceIndent));
                }
                width
            }
            Some(IndentUnit::Spaces(unit)) => {
                if has_tabs {
                    return Err(self.make_error(SyntaxErrorKind::TabIndent(unit)));
                }
                if width % unit != 0 {
                    return Err(self.make_error(SyntaxErrorKind::IndentNotMultiple { found: width, unit }));
                }
                width / unit
            }
        };

        Ok(isize::try_from(level).unwrap_or(isize::MAX))
    }

    fn content(&mut self, c: char) -> ParseResult<State> {
        Ok(match c {
            ' ' | '\t' | '\r' => State::Content,
            '\n' => State::indent(),
            '#' => State::Comment,
            '"' => State::String(StringState::new(StringMode::Content, StringTarget::Content, self.position())),
            '!' => {
                let start = self.position();
                if self.peek() == Some('"') {
                    self.skip(1);
                    State::String(StringState::new(StringMode::Raw, StringTarget::Content, start))
                } else if self.peek_str("!\"") {
                    self.skip(2);
                    State::String(StringState::new(StringMode::DoubleRaw, StringTarget::Content, start))
                } else {
                    return Err(self.make_error(SyntaxErrorKind::UnexpectedCharacter(c)));
                }
            }
            '%' => State::Line {
                kind: LineKind::Code,
                text: String::new(),
                keyword: self.position(),
                start: self.position_after(c),
            },
            '.' => State::ClassName {
                name: String::new(),
                start: self.position(),
            },
            c if is_name_char(c) => State::Identifier {
                name: c.to_string(),
                start: self.position(),
            },
            c => return Err(self.make_error(SyntaxErrorKind::UnexpectedCharacter(c))),
        })
    }

    fn keyword_or_element(&mut self, name: String, start: Position, c: char) -> ParseResult<State> {
        let spaced = c == ' ' || c == '\t';
        let after = self.position_after(c);
        let line = move |kind| State::Line {
            kind,
            text: String::new(),
            keyword: start,
            start: after,
        };

        let kind = match name.as_str() {
            "if" if spaced => Some(LineKind::If),
            "elif" if spaced => Some(LineKind::Elif),
            "for" if spaced => Some(LineKind::For),
            "include" if spaced => Some(LineKind::Include),
            "extends" if spaced => Some(LineKind::Extends),
            "block" if spaced => Some(LineKind::Block),
            "replace" if spaced => Some(LineKind::Replace),
            "append" if spaced => Some(LineKind::Append),
            "macro" if spaced => Some(LineKind::Macro),
            _ => None,
        };
        if let Some(kind) = kind {
            return Ok(line(kind));
        }

        match name.as_str() {
            "doctype" => {
                self.open(NodeKind::Doctype, start, Children::Forbidden)?;
            }
            "else" if matches!(c, ' ' | '\t' | '\r' | '\n' | '#') => {
                self.add_branch(start, None)?;
            }
            "yield" => {
                let inside_macro = self
                    .frames
                    .iter()
                    .any(|frame| matches!(self.tree.kind(frame.node), NodeKind::Macro { .. }));
                if !inside_macro {
                    return Err(SemanticError::new(
                        SemanticErrorKind::YieldOutsideMacro,
                        self.name,
                        self.input,
                        Point::At(start),
                    )
                    .into());
                }
                self.open(NodeKind::Yield, start, Children::Forbidden)?;
            }
            "do" if spaced || c == '\n' || c == '\r' => {
                let node = self.open(
                    NodeKind::Code {
                        text: String::new(),
                        body: CodeBody::Pending,
                        raw: true,
                    },
                    start,
                    Children::Raw,
                )?;
                self.code_nodes.push((node, start));
                return Ok(if spaced { line(LineKind::Do(node)) } else { State::indent() });
            }
            _ => {
                self.open(NodeKind::Element { name }, start, Children::Allowed)?;
            }
        }

        self.content(c)
    }

    fn after_attribute(&mut self, attribute: NodeId, c: char) -> ParseResult<State> {
        match c {
            ' ' | '\t' => Ok(State::AfterAttribute(attribute)),
            'i' if self.peek_str("f ") || self.peek_str("f\t") => {
                let keyword = self.position();
                self.skip(2);
                Ok(State::Line {
                    kind: LineKind::Guard(attribute),
                    text: String::new(),
                    keyword,
                    start: keyword.advanced_by("if "),
                })
            }
            _ => self.content(c),
        }
    }

    fn string(&mut self, mut string: StringState, c: char) -> ParseResult<State> {
        match c {
            '"' => self.finish_string(string),
            '\\' => Ok(State::Escape(string)),
            '#' if self.peek() == Some('{') => {
                let start = self.position();
                self.skip(1);
                string.flush_text();
                Ok(State::Interpolation {
                    string,
                    code: String::new(),
                    start,
                })
            }
            c => {
                string.text.push(c);
                Ok(State::String(string))
            }
        }
    }

    fn finish_string(&mut self, mut string: StringState) -> ParseResult<State> {
        string.flush_text();
        let StringState {
            target, block, start, ..
        } = string;

        match target {
            StringTarget::Content => {
                self.attach(NodeKind::String { content: block }, start)?;
                Ok(State::Content)
            }
            StringTarget::Attribute(attribute) => {
                if let NodeKind::Attribute { value, .. } = &mut self.tree.node_mut(attribute).kind {
                    *value = Some(block);
                }
                Ok(State::AfterAttribute(attribute))
            }
        }
    }

    fn arguments(&mut self, mut call: CallState, c: char) -> ParseResult<State> {
        if c == ',' || c == ')' {
            if c == ')' && call.arguments.is_empty() && call.current.trim().is_empty() {
                return self.finish_call(call);
            }

            if let Some(argument) = self.argument(&call.current, call.current_start) {
                if argument.name.is_none() && call.arguments.iter().any(|a| a.name.is_some()) {
                    return Err(self.error_at_position(argument.position, SyntaxErrorKind::PositionalAfterNamed));
                }

                call.arguments.push(argument);
                call.current.clear();
                call.attempts.clear();
                call.current_start = self.position_after(c);

                return if c == ')' {
                    self.finish_call(call)
                } else {
                    Ok(State::Arguments(call))
                };
            }

            call.attempts.push(call.current.trim().to_owned());
        }

        call.current.push(c);
        Ok(State::Arguments(call))
    }

    /// Reads `text` as an argument if it is a complete one.
    fn argument(&mut self, text: &str, start: Position) -> Option<Argument> {
        let (name, value_offset) = match NAMED_ARGUMENT.captures(text) {
            Some(captures) => (Some(captures[1].to_owned()), captures[0].len()),
            None => (None, 0),
        };

        let value = expression::parse_expression(&text[value_offset..]).ok()?;
        self.tree.note_code(text);

        let (_, position) = trimmed(text, start);
        Some(Argument { name, value, position })
    }

    fn finish_call(&mut self, call: CallState) -> ParseResult<State> {
        self.open(
            NodeKind::Call {
                name: call.name,
                arguments: call.arguments,
            },
            call.start,
            Children::Allowed,
        )?;
        Ok(State::Content)
    }

    // --- Line constructs ---

    fn expression(&mut self, text: &str, start: Position) -> ParseResult<Expr> {
        match expression::parse_expression(text) {
            Ok(expr) => {
                self.tree.note_code(text);
                Ok(expr)
            }
            Err(error) => Err(self.error_at_position(
                start.advanced_by(&text[..error.offset]),
                SyntaxErrorKind::InvalidExpression(error.message),
            )),
        }
    }

    fn finish_line(&mut self, kind: LineKind, text: &str, keyword: Position, start: Position) -> ParseResult<()> {
        match kind {
            LineKind::If => {
                let condition = self.expression(text, start)?;
                self.open(
                    NodeKind::If {
                        condition,
                        elifs: Vec::new(),
                        else_branch: None,
                    },
                    keyword,
                    Children::Allowed,
                )?;
            }
            LineKind::Elif => {
                let condition = self.expression(text, start)?;
                self.add_branch(keyword, Some(condition))?;
            }
            LineKind::For => self.for_loop(text, keyword, start)?,
            LineKind::Include => {
                let (template, position) = trimmed(text, start);
                if template.is_empty() {
                    return Err(self.error_at_position(position, SyntaxErrorKind::Expected("a template name".to_owned())));
                }
                let id = self.open(
                    NodeKind::Include {
                        template: template.to_owned(),
                    },
                    keyword,
                    Children::Forbidden,
                )?;
                self.tree.root_mut(self.root).includes.push(id);
            }
            LineKind::Extends => self.extends(text, keyword, start)?,
            LineKind::Block => self.block(text, keyword, start)?,
            LineKind::Replace => self.block_action(text, keyword, start, BlockActionKind::Replace)?,
            LineKind::Append => self.block_action(text, keyword, start, BlockActionKind::Append)?,
            LineKind::Macro => self.macro_definition(text, keyword, start)?,
            LineKind::Code => {
                let id = self.open(
                    NodeKind::Code {
                        text: text.to_owned(),
                        body: CodeBody::Pending,
                        raw: false,
                    },
                    keyword,
                    Children::Allowed,
                )?;
                self.code_nodes.push((id, start));
            }
            LineKind::Do(node) => {
                self.push_code(node, text);
                self.push_code(node, "\n");
            }
            LineKind::Guard(attribute) => {
                let condition = self.expression(text, start)?;
                if let NodeKind::Attribute { guard, .. } = &mut self.tree.node_mut(attribute).kind {
                    *guard = Some(condition);
                }
            }
        }
        Ok(())
    }

    /// Attaches an `elif` or `else` to the `if` just before it.
    fn add_branch(&mut self, keyword: Position, condition: Option<Expr>) -> ParseResult<()> {
        let parent = self.current().node;
        let previous = self.tree.children(parent).last().copied();
        let target = previous.filter(|&id| {
            matches!(
                self.tree.kind(id),
                NodeKind::If {
                    else_branch: None,
                    ..
                }
            )
        });

        let Some(if_id) = target else {
            let branch = if condition.is_some() { "elif" } else { "else" };
            return Err(self.error_at_position(keyword, SyntaxErrorKind::UnexpectedBranch(branch.to_owned())));
        };

        let is_elif = condition.is_some();
        let kind = match condition {
            Some(condition) => NodeKind::Elif { condition },
            None => NodeKind::Else,
        };
        let id = self.tree.add(kind, Some(if_id), keyword, self.source_id);

        if let NodeKind::If {
            elifs, else_branch, ..
        } = &mut self.tree.node_mut(if_id).kind
        {
            if is_elif {
                elifs.push(id);
            } else {
                *else_branch = Some(id);
            }
        }

        self.frames.push(Frame {
            node: id,
            indent: self.line_indent,
            children: Children::Allowed,
        });
        Ok(())
    }

    fn for_loop(&mut self, text: &str, keyword: Position, start: Position) -> ParseResult<()> {
        let Some(head) = LOOP_HEAD.captures(text) else {
            return Err(self.error_at_position(start, SyntaxErrorKind::Expected("a loop variable name".to_owned())));
        };

        let item = head[1].to_owned();
        let index = head.get(2).map(|m| m.as_str().to_owned());
        for name in std::iter::once(&item).chain(&index) {
            if !expression::is_identifier(name) {
                return Err(self.error_at_position(start, SyntaxErrorKind::Expected("a loop variable name".to_owned())));
            }
        }

        let head_end = head[0].len();
        let Some(separator) = LOOP_KEYWORD.find(&text[head_end..]) else {
            return Err(self.error_at_position(start.advanced_by(&text[..head_end]), SyntaxErrorKind::ExpectedOfOrIn));
        };

        let collection_start = head_end + separator.end();
        let collection = self.expression(&text[collection_start..], start.advanced_by(&text[..collection_start]))?;

        self.open(
            NodeKind::For {
                item,
                index,
                collection,
            },
            keyword,
            Children::Allowed,
        )?;
        Ok(())
    }

    fn extends(&mut self, text: &str, keyword: Position, start: Position) -> ParseResult<()> {
        let (name, position) = trimmed(text, start);

        if self.is_extending() {
            return Err(self.error_at_position(keyword, SyntaxErrorKind::MultipleExtends));
        }
        if !self.tree.children(self.root).is_empty() || self.frames.len() > 1 {
            return Err(self.error_at_position(keyword, SyntaxErrorKind::ExtendsNotFirst));
        }
        if name.is_empty() {
            return Err(self.error_at_position(position, SyntaxErrorKind::Expected("a template name".to_owned())));
        }

        self.tree.root_mut(self.root).extends = Some(Extends {
            name: name.to_owned(),
            position,
        });
        Ok(())
    }

    fn block_name(&self, text: &str, start: Position) -> ParseResult<(String, Position)> {
        let (name, position) = trimmed(text, start);
        if !is_name(name) {
            return Err(self.error_at_position(position, SyntaxErrorKind::Expected("a block name".to_owned())));
        }
        if self.tree.root(self.root).blocks.contains_key(name) {
            return Err(self.error_at_position(position, SyntaxErrorKind::DuplicateBlock(name.to_owned())));
        }
        Ok((name.to_owned(), position))
    }

    fn block(&mut self, text: &str, keyword: Position, start: Position) -> ParseResult<()> {
        let (name, _) = self.block_name(text, start)?;
        let top_level = self.current().node == self.root;

        let id = self.open(NodeKind::Block { name: name.clone() }, keyword, Children::Allowed)?;

        let root = self.tree.root_mut(self.root);
        root.blocks.insert(name.clone(), id);
        if top_level && root.extends.is_some() {
            root.block_actions.push(BlockAction {
                kind: BlockActionKind::Define,
                name,
                node: id,
            });
        }
        Ok(())
    }

    fn block_action(
        &mut self,
        text: &str,
        keyword: Position,
        start: Position,
        kind: BlockActionKind,
    ) -> ParseResult<()> {
        if !self.is_extending() || self.current().node != self.root {
            let action = match kind {
                BlockActionKind::Append => "append",
                BlockActionKind::Define | BlockActionKind::Replace => "replace",
            };
            return Err(self.error_at_position(keyword, SyntaxErrorKind::RequiresExtends(action.to_owned())));
        }

        let (name, position) = trimmed(text, start);
        if !is_name(name) {
            return Err(self.error_at_position(position, SyntaxErrorKind::Expected("a block name".to_owned())));
        }

        let id = self.open(
            NodeKind::Block {
                name: name.to_owned(),
            },
            keyword,
            Children::Allowed,
        )?;
        self.tree.root_mut(self.root).block_actions.push(BlockAction {
            kind,
            name: name.to_owned(),
            node: id,
        });
        Ok(())
    }

    fn macro_definition(&mut self, text: &str, keyword: Position, start: Position) -> ParseResult<()> {
        let (signature, position) = trimmed(text, start);

        let (name, parameter_list) = match signature.split_once('(') {
            Some((name, rest)) => {
                let Some(list) = rest.trim_end().strip_suffix(')') else {
                    return Err(self.error_at_position(
                        position.advanced_by(signature),
                        SyntaxErrorKind::Expected("“)” after the macro parameters".to_owned()),
                    ));
                };
                (name.trim_end(), list)
            }
            None => (signature, ""),
        };

        if !is_name(name) {
            return Err(self.error_at_position(position, SyntaxErrorKind::Expected("a macro name".to_owned())));
        }

        let mut parameters: Vec<String> = Vec::new();
        if !parameter_list.trim().is_empty() {
            for parameter in parameter_list.split(',').map(str::trim) {
                if expression::is_reserved(parameter) {
                    return Err(self.error_at_position(position, SyntaxErrorKind::ReservedParameter(parameter.to_owned())));
                }
                if !expression::is_identifier(parameter) {
                    return Err(self.error_at_position(position, SyntaxErrorKind::Expected("a parameter name".to_owned())));
                }
                if parameters.iter().any(|p| p == parameter) {
                    return Err(self.error_at_position(position, SyntaxErrorKind::DuplicateParameter(parameter.to_owned())));
                }
                parameters.push(parameter.to_owned());
            }
        }

        if self.tree.root(self.root).macros.contains_key(name) {
            return Err(self.error_at_position(position, SyntaxErrorKind::DuplicateMacro(name.to_owned())));
        }

        let id = self.open(
            NodeKind::Macro {
                name: name.to_owned(),
                parameters,
            },
            keyword,
            Children::Allowed,
        )?;
        self.tree.root_mut(self.root).macros.insert(name.to_owned(), id);
        Ok(())
    }

    /// Parses code node bodies: a header when the node has children, plain
    /// statements otherwise.
    fn finish_code_nodes(&mut self) -> ParseResult<()> {
        let code_nodes = std::mem::take(&mut self.code_nodes);

        for &(id, start) in &code_nodes {
            let node = self.tree.node(id);
            let NodeKind::Code { text, raw, .. } = &node.kind else {
                continue;
            };
            let text = text.clone();
            let raw = *raw;
            let position = node.position;

            let body = if node.children.is_empty() {
                expression::parse_statements(&text).map(CodeBody::Statements)
            } else {
                expression::parse_header(&text).map(CodeBody::Header)
            };

            let body = body.map_err(|error| {
                let at = if raw {
                    position
                } else {
                    start.advanced_by(&text[..error.offset])
                };
                self.error_at_position(at, SyntaxErrorKind::InvalidCode(error.message))
            })?;

            self.tree.note_code(&text);
            if let NodeKind::Code { body: slot, .. } = &mut self.tree.node_mut(id).kind {
                *slot = body;
            }
        }

        for &(id, _) in &code_nodes {
            let is_branch = matches!(
                self.tree.kind(id),
                NodeKind::Code {
                    body: CodeBody::Header(Header::ElseIf(_) | Header::Else),
                    ..
                }
            );
            if !is_branch {
                continue;
            }

            let follows_if = self.tree.node(id).parent.is_some_and(|parent| {
                let siblings = self.tree.children(parent);
                let index = siblings.iter().position(|&sibling| sibling == id);
                index
                    .and_then(|i| i.checked_sub(1))
                    .is_some_and(|i| {
                        matches!(
                            self.tree.kind(siblings[i]),
                            NodeKind::Code {
                                body: CodeBody::Header(Header::If(_) | Header::ElseIf(_)),
                                ..
                            }
                        )
                    })
            });

            if !follows_if {
                let position = self.tree.node(id).position;
                return Err(self.error_at_position(position, SyntaxErrorKind::UnexpectedBranch("else".to_owned())));
            }
        }

        Ok(())
    }
}
