use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;

use crate::code_block::CodeBlock;
use crate::error::{Location, Point, SemanticError, SemanticErrorKind, SyntaxError, SyntaxErrorKind};
use crate::expression::{Expr, Header, Stmt};
use crate::scope;

/// A position in a template's source. Lines and columns are 1-indexed and
/// columns count characters, not bytes.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    /// Byte offset into the source.
    pub offset: usize,
}

impl Position {
    pub(crate) const START: Self = Self {
        line: 1,
        column: 1,
        offset: 0,
    };

    /// The position reached after reading `text` starting from here.
    pub(crate) fn advanced_by(self, text: &str) -> Self {
        let mut position = self;
        for c in text.chars() {
            position.offset += c.len_utf8();
            if c == '\n' {
                position.line += 1;
                position.column = 1;
            } else {
                position.column += 1;
            }
        }
        position
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, character {}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct NodeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SourceId(usize);

/// A template's name and text, kept for diagnostics.
#[derive(Debug)]
pub(crate) struct Source {
    pub(crate) name: String,
    pub(crate) text: String,
}

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) position: Position,
    pub(crate) source: SourceId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockActionKind {
    /// `block name` in an extending template.
    Define,
    Replace,
    Append,
}

/// A block operation an extending template applies to its parent.
#[derive(Debug, Clone)]
pub(crate) struct BlockAction {
    pub(crate) kind: BlockActionKind,
    pub(crate) name: String,
    pub(crate) node: NodeId,
}

#[derive(Debug, Clone)]
pub(crate) struct Extends {
    pub(crate) name: String,
    pub(crate) position: Position,
}

#[derive(Debug, Default)]
pub(crate) struct RootData {
    pub(crate) blocks: IndexMap<String, NodeId>,
    pub(crate) macros: IndexMap<String, NodeId>,
    pub(crate) extends: Option<Extends>,
    pub(crate) block_actions: Vec<BlockAction>,
    pub(crate) includes: Vec<NodeId>,
}

/// The body of a `%` or `do` code node, settled once it is known whether the
/// node has children.
#[derive(Debug, Clone)]
pub(crate) enum CodeBody {
    Pending,
    Statements(Vec<Stmt>),
    Header(Header),
}

#[derive(Debug, Clone)]
pub(crate) struct Argument {
    pub(crate) name: Option<String>,
    pub(crate) value: Expr,
    pub(crate) position: Position,
}

#[derive(Debug)]
pub(crate) enum NodeKind {
    Root(Box<RootData>),
    Element {
        name: String,
    },
    Attribute {
        name: String,
        value: Option<CodeBlock>,
        guard: Option<Expr>,
    },
    Class {
        name: String,
    },
    String {
        content: CodeBlock,
    },
    Code {
        text: String,
        body: CodeBody,
        /// Whether the node came from a multi-line `do` block.
        raw: bool,
    },
    If {
        condition: Expr,
        elifs: Vec<NodeId>,
        else_branch: Option<NodeId>,
    },
    Elif {
        condition: Expr,
    },
    Else,
    For {
        item: String,
        index: Option<String>,
        collection: Expr,
    },
    Include {
        template: String,
    },
    Block {
        name: String,
    },
    Macro {
        name: String,
        parameters: Vec<String>,
    },
    Call {
        name: String,
        arguments: Vec<Argument>,
    },
    Yield,
    Doctype,
}

impl NodeKind {
    /// How the node is described in diagnostics.
    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Self::Root(_) => "A template",
            Self::Element { .. } => "An element",
            Self::Attribute { .. } => "An attribute",
            Self::Class { .. } => "A class",
            Self::String { .. } => "A string",
            Self::Code { .. } => "A code block",
            Self::If { .. } => "An if",
            Self::Elif { .. } => "An elif",
            Self::Else => "An else",
            Self::For { .. } => "A for loop",
            Self::Include { .. } => "An include",
            Self::Block { .. } => "A block",
            Self::Macro { .. } => "A macro",
            Self::Call { .. } => "A macro call",
            Self::Yield => "A yield",
            Self::Doctype => "A doctype",
        }
    }
}

/// The node arena shared by every template loaded during one compilation.
///
/// Merging an included or parent template into another is a matter of
/// relinking ids, so nodes never move once added.
#[derive(Debug, Default)]
pub(crate) struct Tree {
    nodes: Vec<Node>,
    sources: Vec<Source>,
    /// Every identifier-shaped token seen in any expression or code fragment.
    possible_conflicts: BTreeSet<String>,
}

impl Tree {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_source(&mut self, name: &str, text: &str) -> SourceId {
        self.sources.push(Source {
            name: name.to_owned(),
            text: text.to_owned(),
        });
        SourceId(self.sources.len() - 1)
    }

    pub(crate) fn source(&self, id: SourceId) -> &Source {
        &self.sources[id.0]
    }

    /// Adds a detached node. Callers link it into its parent's children.
    pub(crate) fn add(
        &mut self,
        kind: NodeKind,
        parent: Option<NodeId>,
        position: Position,
        source: SourceId,
    ) -> NodeId {
        self.nodes.push(Node {
            kind,
            parent,
            children: Vec::new(),
            position,
            source,
        });
        NodeId(self.nodes.len() - 1)
    }

    /// Adds a node as the last child of `parent`.
    pub(crate) fn append(
        &mut self,
        parent: NodeId,
        kind: NodeKind,
        position: Position,
        source: SourceId,
    ) -> NodeId {
        let id = self.add(kind, Some(parent), position, source);
        self.nodes[parent.0].children.push(id);
        id
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub(crate) fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub(crate) fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// The root data of a template root node.
    ///
    /// # Panics
    /// If `id` is not a root; roots are only produced by the parser.
    pub(crate) fn root(&self, id: NodeId) -> &RootData {
        match &self.nodes[id.0].kind {
            NodeKind::Root(data) => data,
            other => unreachable!("node {id:?} is not a root: {other:?}"),
        }
    }

    pub(crate) fn root_mut(&mut self, id: NodeId) -> &mut RootData {
        match &mut self.nodes[id.0].kind {
            NodeKind::Root(data) => data,
            other => unreachable!("node {id:?} is not a root: {other:?}"),
        }
    }

    /// Moves `children` under `parent`, replacing whatever it held.
    pub(crate) fn set_children(&mut self, parent: NodeId, children: Vec<NodeId>) {
        for &child in &children {
            self.nodes[child.0].parent = Some(parent);
        }
        self.nodes[parent.0].children = children;
    }

    /// Moves `children` under `parent` after its existing children.
    pub(crate) fn extend_children(&mut self, parent: NodeId, children: Vec<NodeId>) {
        for &child in &children {
            self.nodes[child.0].parent = Some(parent);
        }
        self.nodes[parent.0].children.extend(children);
    }

    /// Replaces `node` in its parent's children with `replacements`.
    pub(crate) fn splice(&mut self, node: NodeId, replacements: Vec<NodeId>) {
        let Some(parent) = self.nodes[node.0].parent else {
            return;
        };

        for &child in &replacements {
            self.nodes[child.0].parent = Some(parent);
        }

        let siblings = &mut self.nodes[parent.0].children;
        if let Some(index) = siblings.iter().position(|&c| c == node) {
            siblings.splice(index..=index, replacements);
        }
    }

    /// The node and its ancestors, innermost first.
    pub(crate) fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(id), |&n| self.nodes[n.0].parent)
    }

    /// The node's descendants in document order, not including the node.
    pub(crate) fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();

        while let Some(next) = stack.pop() {
            found.push(next);
            stack.extend(self.branch_roots(next).into_iter().rev());
            stack.extend(self.children(next).iter().rev().copied());
        }

        found
    }

    /// The `elif` and `else` nodes hanging off an `if`.
    pub(crate) fn branch_roots(&self, id: NodeId) -> Vec<NodeId> {
        match self.kind(id) {
            NodeKind::If {
                elifs, else_branch, ..
            } => elifs.iter().copied().chain(*else_branch).collect(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn note_code(&mut self, code: &str) {
        self.possible_conflicts.extend(scope::identifiers_in(code));
    }

    pub(crate) fn possible_conflicts(&self) -> &BTreeSet<String> {
        &self.possible_conflicts
    }

    pub(crate) fn location(&self, id: NodeId) -> Location {
        let node = self.node(id);
        Location {
            template: self.source(node.source).name.clone(),
            point: Point::At(node.position),
        }
    }

    pub(crate) fn syntax_error(&self, id: NodeId, kind: SyntaxErrorKind) -> SyntaxError {
        let node = self.node(id);
        let source = self.source(node.source);
        SyntaxError::new(kind, &source.name, &source.text, Point::At(node.position))
    }

    pub(crate) fn semantic_error(&self, id: NodeId, kind: SemanticErrorKind) -> SemanticError {
        self.semantic_error_at(id, self.node(id).position, kind)
    }

    /// A semantic error in the node's template at a position other than the
    /// node's own, such as one of a call's arguments.
    pub(crate) fn semantic_error_at(
        &self,
        id: NodeId,
        position: Position,
        kind: SemanticErrorKind,
    ) -> SemanticError {
        let source = self.source(self.node(id).source);
        SemanticError::new(kind, &source.name, &source.text, Point::At(position))
    }
}
