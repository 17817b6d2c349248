//! Lowering of a resolved template tree into a linear instruction list.
//!
//! Every element is built from three output sections: its start tag's
//! attributes, its class list and its content. Nodes write into whichever of
//! those sections are live in their [`Context`]; conditionals split each live
//! section in two, and macro calls are either inlined into the caller's
//! sections or, when they recurse, synthesised once as functions.

use std::collections::{BTreeSet, HashMap};

use indexmap::IndexMap;

use crate::ast::{CodeBody, NodeId, NodeKind, Tree};
use crate::code_block::{Code, CodeBlock, Instruction, Opener};
use crate::error::{RazorleafError, RazorleafResult, SemanticErrorKind, SyntaxErrorKind};
use crate::escape::shortest_attribute_representation;
use crate::expression::Expr;
use crate::scope::Scope;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source", "track",
    "wbr",
];

/// The output sections a node may write to.
struct Context<'a> {
    content: Option<&'a mut CodeBlock>,
    attributes: Option<&'a mut CodeBlock>,
    classes: Option<&'a mut CodeBlock>,
}

impl<'a> Context<'a> {
    fn content_only(content: &'a mut CodeBlock) -> Self {
        Self {
            content: Some(content),
            attributes: None,
            classes: None,
        }
    }
}

/// Owned output sections, one for each section live in some context.
#[derive(Default)]
struct Sections {
    content: Option<CodeBlock>,
    attributes: Option<CodeBlock>,
    classes: Option<CodeBlock>,
}

impl Sections {
    fn matching(context: &Context<'_>) -> Self {
        Self {
            content: context.content.is_some().then(CodeBlock::new),
            attributes: context.attributes.is_some().then(CodeBlock::new),
            classes: context.classes.is_some().then(CodeBlock::new),
        }
    }

    fn all() -> Self {
        Self {
            content: Some(CodeBlock::new()),
            attributes: Some(CodeBlock::new()),
            classes: Some(CodeBlock::new()),
        }
    }

    fn context(&mut self) -> Context<'_> {
        Context {
            content: self.content.as_mut(),
            attributes: self.attributes.as_mut(),
            classes: self.classes.as_mut(),
        }
    }
}

/// The macro calls being expanded, innermost first. A `yield` compiles the
/// children of the innermost call to its enclosing macro.
struct YieldFrame<'y> {
    macro_id: NodeId,
    call: NodeId,
    outer: Option<&'y YieldFrame<'y>>,
}

/// A parameter bound by an inlined call whose name was already in use.
struct Shadowed {
    parameter: String,
    original: String,
    temporary: Option<String>,
}

/// Writes a conditional section for one output section: `if` around the
/// first block, `else` around the second, nothing when both are empty.
fn add_branches(target: &mut CodeBlock, condition: &str, then: Option<CodeBlock>, otherwise: Option<CodeBlock>) {
    let then = then.unwrap_or_default();
    let otherwise = otherwise.unwrap_or_default();

    if then.is_empty() && otherwise.is_empty() {
        return;
    }

    target
        .add_code(Code::open_if(condition))
        .add_block(then)
        .add_code(Code::Close);

    if !otherwise.is_empty() {
        target
            .add_code(Code::open_else())
            .add_block(otherwise)
            .add_code(Code::Close);
    }
}

/// The prefix of functions synthesised for a macro.
fn script_identifier(macro_name: &str) -> String {
    format!("_{}", macro_name.replace('-', "_"))
}

pub(crate) fn compile(tree: &Tree, root: NodeId, globals: &[&str]) -> RazorleafResult<Vec<Instruction>> {
    let mut conflicts: BTreeSet<String> = tree.possible_conflicts().clone();
    conflicts.extend(globals.iter().map(|name| (*name).to_owned()));
    conflicts.insert("data".to_owned());

    let mut compiler = Compiler {
        tree,
        macros: &tree.root(root).macros,
        scope: Scope::new(conflicts),
        calls: Vec::new(),
        attribute_functions: HashMap::new(),
        content_functions: HashMap::new(),
        definitions: Vec::new(),
    };

    let mut content = CodeBlock::new();
    compiler.compile_children(tree.children(root), &mut Context::content_only(&mut content), None)?;

    let output = compiler.scope.get_name("output");
    let mut instructions = std::mem::take(&mut compiler.definitions);
    instructions.push(Instruction::Code(Code::declare(&output, Expr::String(String::new()))));
    instructions.extend(content.into_instructions(&output));
    instructions.push(Instruction::Code(Code::Return(Expr::identifier(&output))));

    tracing::trace!(instructions = instructions.len(), "compiled template");
    Ok(instructions)
}

struct Compiler<'t> {
    tree: &'t Tree,
    macros: &'t IndexMap<String, NodeId>,
    scope: Scope,
    /// Calls whose macro bodies are being compiled, outermost first.
    calls: Vec<NodeId>,
    attribute_functions: HashMap<NodeId, String>,
    content_functions: HashMap<NodeId, String>,
    /// Functions for recursive calls made where attributes are live.
    definitions: Vec<Instruction>,
}

impl<'t> Compiler<'t> {
    fn unexpected(&self, id: NodeId) -> RazorleafError {
        let description = self.tree.kind(id).describe().to_owned();
        self.tree.syntax_error(id, SyntaxErrorKind::Unexpected(description)).into()
    }

    fn compile_children(
        &mut self,
        children: &[NodeId],
        context: &mut Context<'_>,
        yields: Option<&YieldFrame<'_>>,
    ) -> RazorleafResult<()> {
        for &child in children {
            self.compile_node(child, context, yields)?;
        }
        Ok(())
    }

    fn compile_node(
        &mut self,
        id: NodeId,
        context: &mut Context<'_>,
        yields: Option<&YieldFrame<'_>>,
    ) -> RazorleafResult<()> {
        let tree = self.tree;

        match tree.kind(id) {
            NodeKind::Root(_) | NodeKind::Block { .. } => self.compile_children(tree.children(id), context, yields),
            // Definitions compile at their call sites; includes are gone once composed.
            NodeKind::Macro { .. } | NodeKind::Include { .. } => Ok(()),
            NodeKind::Elif { .. } | NodeKind::Else => Err(self.unexpected(id)),
            NodeKind::Doctype => {
                let Some(content) = context.content.as_deref_mut() else {
                    return Err(self.unexpected(id));
                };
                content.add_text(None, "<!DOCTYPE html>");
                Ok(())
            }
            NodeKind::Element { name } => self.element(id, name, context, yields),
            NodeKind::Attribute { name, value, guard } => {
                let Some(attributes) = context.attributes.as_deref_mut() else {
                    return Err(self.unexpected(id));
                };

                let condition = guard.as_ref().map(|guard| {
                    let condition = self.scope.get_name("condition");
                    attributes
                        .add_code(Code::declare(&condition, guard.clone()))
                        .add_code(Code::open_if(&condition));
                    condition
                });

                attributes.add_text(None, format!(" {name}"));

                if let Some(value) = value
                    && !value.is_empty()
                {
                    match value.to_text() {
                        Some(text) => {
                            attributes.add_text(None, shortest_attribute_representation(&text));
                        }
                        None => {
                            attributes
                                .add_text(None, "=\"")
                                .add_block(value.clone())
                                .add_text(None, "\"");
                        }
                    }
                }

                if condition.is_some() {
                    attributes.add_code(Code::Close);
                }
                Ok(())
            }
            NodeKind::Class { name } => {
                let Some(classes) = context.classes.as_deref_mut() else {
                    return Err(self.unexpected(id));
                };
                classes.add_text(None, format!(" {name}"));
                Ok(())
            }
            NodeKind::String { content: block } => {
                let Some(content) = context.content.as_deref_mut() else {
                    return Err(self.unexpected(id));
                };
                content.add_block(block.clone());
                Ok(())
            }
            NodeKind::Code { body, .. } => self.code(id, body, context, yields),
            NodeKind::If {
                condition,
                elifs,
                else_branch,
            } => {
                let mut branches = vec![(condition.clone(), tree.children(id))];
                for &elif in elifs {
                    if let NodeKind::Elif { condition } = tree.kind(elif) {
                        branches.push((condition.clone(), tree.children(elif)));
                    }
                }
                let otherwise = else_branch.map(|branch| tree.children(branch));
                self.conditional(context, &branches, otherwise, yields)
            }
            NodeKind::For {
                item,
                index,
                collection,
            } => self.for_loop(id, item, index.as_deref(), collection, context, yields),
            NodeKind::Call { name, .. } => self.call(id, name, context, yields),
            NodeKind::Yield => self.yield_content(id, context, yields),
        }
    }

    fn element(
        &mut self,
        id: NodeId,
        name: &str,
        context: &mut Context<'_>,
        yields: Option<&YieldFrame<'_>>,
    ) -> RazorleafResult<()> {
        let tree = self.tree;

        if context.content.is_none() {
            return Err(self.unexpected(id));
        }

        let name = name.to_lowercase();
        let is_void = VOID_ELEMENTS.contains(&name.as_str());

        if is_void {
            let content_child = tree.children(id).iter().copied().find(|&child| {
                matches!(
                    tree.kind(child),
                    NodeKind::String { .. } | NodeKind::Element { .. } | NodeKind::For { .. } | NodeKind::Doctype
                )
            });
            if let Some(child) = content_child {
                return Err(tree
                    .semantic_error(child, SemanticErrorKind::VoidContent(name))
                    .into());
            }
        }

        let mut attributes = CodeBlock::new();
        attributes.add_text(None, format!("<{name}"));
        let mut classes = CodeBlock::new();
        let mut content = CodeBlock::new();

        let mut inner = Context {
            content: (!is_void).then_some(&mut content),
            attributes: Some(&mut attributes),
            classes: Some(&mut classes),
        };
        self.compile_children(tree.children(id), &mut inner, yields)?;

        let Some(output) = context.content.as_deref_mut() else {
            return Err(self.unexpected(id));
        };

        output.add_block(attributes);

        if !classes.is_empty() {
            classes.strip_leading_space();
            match classes.to_text() {
                Some(text) => {
                    output.add_text(None, format!(" class{}", shortest_attribute_representation(&text)));
                }
                None => {
                    output
                        .add_text(None, " class=\"")
                        .add_block(classes)
                        .add_text(None, "\"");
                }
            }
        }

        output.add_text(None, ">");

        if !is_void {
            output.add_block(content).add_text(None, format!("</{name}>"));
        }

        Ok(())
    }

    fn code(
        &mut self,
        id: NodeId,
        body: &CodeBody,
        context: &mut Context<'_>,
        yields: Option<&YieldFrame<'_>>,
    ) -> RazorleafResult<()> {
        let tree = self.tree;

        match body {
            CodeBody::Statements(statements) => {
                let Some(target) = context.content.as_deref_mut().or(context.attributes.as_deref_mut()) else {
                    return Err(self.unexpected(id));
                };
                target.add_code(Code::Statements(statements.clone()));
                Ok(())
            }
            CodeBody::Header(header) => {
                let Some(content) = context.content.as_deref_mut() else {
                    return Err(self.unexpected(id));
                };
                content.add_code(Code::Open(Opener::Header(header.clone())));
                self.compile_children(tree.children(id), &mut Context::content_only(&mut *content), yields)?;
                content.add_code(Code::Close);
                Ok(())
            }
            CodeBody::Pending => Err(RazorleafError::Internal("code block was never parsed".to_owned())),
        }
    }

    /// Compiles an `if` with its `elif`s folded into nested `else` branches.
    fn conditional(
        &mut self,
        context: &mut Context<'_>,
        branches: &[(Expr, &[NodeId])],
        otherwise: Option<&[NodeId]>,
        yields: Option<&YieldFrame<'_>>,
    ) -> RazorleafResult<()> {
        let Some(((condition, children), rest)) = branches.split_first() else {
            return Ok(());
        };

        let mut then = Sections::matching(context);
        self.compile_children(children, &mut then.context(), yields)?;

        let otherwise = if !rest.is_empty() || otherwise.is_some() {
            let mut sections = Sections::matching(context);
            if rest.is_empty() {
                self.compile_children(otherwise.unwrap_or_default(), &mut sections.context(), yields)?;
            } else {
                self.conditional(&mut sections.context(), rest, otherwise, yields)?;
            }
            sections
        } else {
            Sections::default()
        };

        let name = self.scope.get_name("condition");
        if let Some(target) = context.attributes.as_deref_mut().or(context.content.as_deref_mut()) {
            target.add_code(Code::declare(&name, condition.clone()));
        }

        if let Some(attributes) = context.attributes.as_deref_mut() {
            add_branches(attributes, &name, then.attributes, otherwise.attributes);
        }
        if let Some(classes) = context.classes.as_deref_mut() {
            add_branches(classes, &name, then.classes, otherwise.classes);
        }
        if let Some(content) = context.content.as_deref_mut() {
            add_branches(content, &name, then.content, otherwise.content);
        }

        Ok(())
    }

    /// Saves the current value of `name` into a fresh temporary when the
    /// name may already be bound, returning the temporary.
    fn shadow(&mut self, target: &mut CodeBlock, name: &str) -> Option<String> {
        if self.scope.is_used(name) {
            let original = self.scope.get_name(&format!("original_{name}"));
            target.add_code(Code::declare(&original, Expr::identifier(name)));
            Some(original)
        } else {
            self.scope.reserve(name);
            None
        }
    }

    fn for_loop(
        &mut self,
        id: NodeId,
        item: &str,
        index: Option<&str>,
        collection: &Expr,
        context: &mut Context<'_>,
        yields: Option<&YieldFrame<'_>>,
    ) -> RazorleafResult<()> {
        let tree = self.tree;

        let Some(content) = context.content.as_deref_mut() else {
            return Err(self.unexpected(id));
        };

        let mut saved = Vec::new();
        let mut reserved = Vec::new();
        for name in std::iter::once(item).chain(index) {
            match self.shadow(content, name) {
                Some(original) => saved.push((name, original)),
                None => reserved.push(name),
            }
        }

        let internal_index = index.is_none().then(|| self.scope.get_name("index"));
        let index = index.map(str::to_owned).or_else(|| internal_index.clone());

        content.add_code(Code::Open(Opener::Loop {
            item: item.to_owned(),
            index,
            collection: collection.clone(),
        }));
        self.compile_children(tree.children(id), &mut Context::content_only(&mut *content), yields)?;
        content.add_code(Code::Close);

        for (name, original) in saved {
            content.add_code(Code::assign(name, Expr::identifier(&original)));
            self.scope.release(&original);
        }
        for name in reserved.into_iter().chain(internal_index.as_deref()) {
            self.scope.release(name);
        }

        Ok(())
    }

    /// Matches a call's arguments to the macro's parameters, returning the
    /// bound values in parameter order.
    fn bind_arguments(&self, call: NodeId, macro_name: &str, parameters: &[String]) -> RazorleafResult<Vec<Expr>> {
        let tree = self.tree;
        let NodeKind::Call { arguments, .. } = tree.kind(call) else {
            return Ok(Vec::new());
        };

        let mut bound: Vec<Option<Expr>> = vec![None; parameters.len()];
        let positional = arguments.iter().filter(|a| a.name.is_none()).count();

        for (i, argument) in arguments.iter().enumerate() {
            let slot = match &argument.name {
                None => {
                    if i >= parameters.len() {
                        return Err(tree
                            .semantic_error_at(
                                call,
                                argument.position,
                                SemanticErrorKind::TooManyArguments {
                                    name: macro_name.to_owned(),
                                    expected: parameters.len(),
                                    found: positional,
                                },
                            )
                            .into());
                    }
                    i
                }
                Some(name) => {
                    let Some(slot) = parameters.iter().position(|p| p == name) else {
                        return Err(tree
                            .semantic_error_at(
                                call,
                                argument.position,
                                SemanticErrorKind::UnknownParameter {
                                    macro_name: macro_name.to_owned(),
                                    parameter: name.clone(),
                                },
                            )
                            .into());
                    };
                    if bound[slot].is_some() {
                        return Err(tree
                            .semantic_error_at(
                                call,
                                argument.position,
                                SemanticErrorKind::ParameterAlreadyProvided(name.clone()),
                            )
                            .into());
                    }
                    slot
                }
            };
            bound[slot] = Some(argument.value.clone());
        }

        let missing: Vec<String> = parameters
            .iter()
            .zip(&bound)
            .filter(|(_, value)| value.is_none())
            .map(|(parameter, _)| parameter.clone())
            .collect();
        if !missing.is_empty() {
            return Err(tree
                .semantic_error(call, SemanticErrorKind::MissingParameters(missing))
                .into());
        }

        Ok(bound.into_iter().flatten().collect())
    }

    fn call(
        &mut self,
        id: NodeId,
        name: &str,
        context: &mut Context<'_>,
        yields: Option<&YieldFrame<'_>>,
    ) -> RazorleafResult<()> {
        let tree = self.tree;

        let Some(&macro_id) = self.macros.get(name) else {
            return Err(tree
                .semantic_error(id, SemanticErrorKind::UndefinedMacro(name.to_owned()))
                .into());
        };
        let NodeKind::Macro { parameters, .. } = tree.kind(macro_id) else {
            return Err(RazorleafError::Internal(format!("“{name}” is not a macro")));
        };

        let values = self.bind_arguments(id, name, parameters)?;

        if context.content.is_none() && context.attributes.is_none() {
            return Err(self.unexpected(id));
        }

        match self.calls.iter().position(|&call| call == id) {
            None => self.inline_call(id, macro_id, parameters, values, context, yields),
            Some(depth) => self.recursive_call(id, macro_id, name, parameters, values, depth, context, yields),
        }
    }

    /// Expands a macro body in place, binding its parameters as variables
    /// and restoring any values they shadow afterwards.
    fn inline_call(
        &mut self,
        id: NodeId,
        macro_id: NodeId,
        parameters: &[String],
        values: Vec<Expr>,
        context: &mut Context<'_>,
        yields: Option<&YieldFrame<'_>>,
    ) -> RazorleafResult<()> {
        let tree = self.tree;
        let split = context.attributes.is_some() && context.content.is_some();
        let mut shadowed = Vec::new();
        let mut reserved = Vec::new();

        {
            let Some(first) = context.attributes.as_deref_mut().or(context.content.as_deref_mut()) else {
                return Err(self.unexpected(id));
            };

            for (parameter, value) in parameters.iter().zip(values) {
                if let Some(original) = self.shadow(first, parameter) {
                    let temporary = split.then(|| self.scope.get_name(&format!("temporary_{parameter}")));
                    shadowed.push(Shadowed {
                        parameter: parameter.clone(),
                        original,
                        temporary,
                    });
                } else {
                    reserved.push(parameter.as_str());
                }
                first.add_code(Code::declare(parameter, value));
            }
        }

        // Content runs after the attributes have restored the shadowed
        // values, so it picks the arguments back up from the temporaries.
        // Class lists never read parameters.
        for Shadowed {
            parameter,
            temporary,
            ..
        } in &shadowed
        {
            if let Some(temporary) = temporary
                && let Some(content) = context.content.as_deref_mut()
            {
                content.add_code(Code::assign(parameter, Expr::identifier(temporary)));
            }
        }

        let frame = YieldFrame {
            macro_id,
            call: id,
            outer: yields,
        };
        self.calls.push(id);
        self.compile_children(tree.children(macro_id), context, Some(&frame))?;
        self.calls.pop();

        for Shadowed {
            parameter,
            original,
            temporary,
        } in shadowed
        {
            let restore = Code::assign(&parameter, Expr::identifier(&original));

            if let Some(temporary) = temporary
                && let Some(attributes) = context.attributes.as_deref_mut()
            {
                attributes
                    .add_code(Code::declare(&temporary, Expr::identifier(&parameter)))
                    .add_code(restore.clone());
            }

            if let Some(last) = context.content.as_deref_mut().or(context.attributes.as_deref_mut()) {
                last.add_code(restore);
            }
            self.scope.release(&original);
        }

        for parameter in reserved {
            self.scope.release(parameter);
        }

        Ok(())
    }

    /// Compiles a call that re-enters a call site already being expanded as
    /// a call to a synthesised function.
    fn recursive_call(
        &mut self,
        id: NodeId,
        macro_id: NodeId,
        name: &str,
        parameters: &[String],
        values: Vec<Expr>,
        depth: usize,
        context: &mut Context<'_>,
        yields: Option<&YieldFrame<'_>>,
    ) -> RazorleafResult<()> {
        let tree = self.tree;
        let produces_attributes = context.attributes.is_some();

        let functions = if produces_attributes {
            &mut self.attribute_functions
        } else {
            &mut self.content_functions
        };
        let existing = functions.get(&id).cloned();

        // A content-only function is a closure over the state at its
        // definition, so each enclosing expansion defines its own.
        let redefine = existing.is_none() || (!produces_attributes && !self.calls[depth + 1..].contains(&id));

        let function = match existing {
            Some(function) => function,
            None => {
                let suffix = if produces_attributes { "attributes" } else { "content_only" };
                let function = self
                    .scope
                    .get_name(&format!("{}_{suffix}", script_identifier(name)));
                let functions = if produces_attributes {
                    &mut self.attribute_functions
                } else {
                    &mut self.content_functions
                };
                functions.insert(id, function.clone());
                function
            }
        };

        if redefine {
            tracing::debug!(macro_name = name, function = %function, "synthesising recursive macro");

            let frame = YieldFrame {
                macro_id,
                call: id,
                outer: yields,
            };
            let opener = Code::Open(Opener::Function {
                name: function.clone(),
                parameters: parameters.to_vec(),
            });

            self.calls.push(id);

            if produces_attributes {
                let mut sections = Sections::all();
                self.compile_children(tree.children(macro_id), &mut sections.context(), Some(&frame))?;

                let mut definition = vec![Instruction::Code(opener)];
                let mut fields = Vec::new();
                for (field, prefix, block) in [
                    ("attributes", "attributeOutput", sections.attributes),
                    ("classes", "classOutput", sections.classes),
                    ("content", "contentOutput", sections.content),
                ] {
                    let variable = self.scope.get_name(prefix);
                    definition.push(Instruction::Code(Code::declare(&variable, Expr::String(String::new()))));
                    definition.extend(block.unwrap_or_default().into_instructions(&variable));
                    fields.push((field.to_owned(), Expr::identifier(&variable)));
                }
                definition.push(Instruction::Code(Code::Return(Expr::Object(fields))));
                definition.push(Instruction::Code(Code::Close));

                self.definitions.extend(definition);
            } else {
                let Some(content) = context.content.as_deref_mut() else {
                    return Err(self.unexpected(id));
                };
                content.add_code(opener);
                self.compile_children(
                    tree.children(macro_id),
                    &mut Context::content_only(&mut *content),
                    Some(&frame),
                )?;
                content.add_code(Code::Close);
            }

            self.calls.pop();
        }

        if produces_attributes {
            let result = self.scope.get_name("moutput");
            let field = |name: &str| Expr::member(Expr::identifier(&result), name);

            if let Some(attributes) = context.attributes.as_deref_mut() {
                attributes
                    .add_code(Code::Call {
                        function,
                        arguments: values,
                        result: Some(result.clone()),
                    })
                    .add_expression(None, field("attributes"));
            }
            if let Some(classes) = context.classes.as_deref_mut() {
                classes.add_expression(None, field("classes"));
            }
            if let Some(content) = context.content.as_deref_mut() {
                content.add_expression(None, field("content"));
            }
        } else if let Some(content) = context.content.as_deref_mut() {
            content.add_code(Code::Call {
                function,
                arguments: values,
                result: None,
            });
        }

        Ok(())
    }

    fn yield_content(
        &mut self,
        id: NodeId,
        context: &mut Context<'_>,
        yields: Option<&YieldFrame<'_>>,
    ) -> RazorleafResult<()> {
        let tree = self.tree;

        let enclosing = tree
            .ancestors(id)
            .skip(1)
            .find(|&ancestor| matches!(tree.kind(ancestor), NodeKind::Macro { .. }));
        let Some(macro_id) = enclosing else {
            return Err(tree.semantic_error(id, SemanticErrorKind::YieldOutsideMacro).into());
        };

        let frame = std::iter::successors(yields, |frame| frame.outer).find(|frame| frame.macro_id == macro_id);
        let Some(frame) = frame else {
            return Ok(());
        };

        self.compile_children(tree.children(frame.call), context, frame.outer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn listing(source: &str) -> Vec<String> {
        let mut tree = Tree::new();
        let root = parser::parse(&mut tree, source, "test").expect("template parses");
        compile(&tree, root, &[])
            .expect("template compiles")
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    fn compile_error(source: &str) -> RazorleafError {
        let mut tree = Tree::new();
        let root = parser::parse(&mut tree, source, "test").expect("template parses");
        compile(&tree, root, &[]).expect_err("template fails to compile")
    }

    #[test]
    #[ntest::timeout(100)]
    fn static_markup_is_one_append() {
        assert_eq!(
            listing("p.intro id: \"x\" \"Hi & bye\"\n"),
            [
                "let output = \"\";",
                "output += \"<p id=x class=intro>Hi &amp; bye</p>\";",
                "return output;",
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn output_name_avoids_template_identifiers() {
        let lines = listing("\"#{output}\"\n");
        assert_eq!(lines[0], "let output_1 = \"\";");
        assert_eq!(lines[1], "output_1 += escapeContent(output);");
    }

    #[test]
    #[ntest::timeout(100)]
    fn conditional_attributes_split_sections() {
        assert_eq!(
            listing("a\n\tif x\n\t\thref: \"/\"\n\t\t\"link\"\n"),
            [
                "let output = \"\";",
                "output += \"<a\";",
                "let condition = x;",
                "if (condition) {",
                "output += \" href=/\";",
                "}",
                "output += \">\";",
                "if (condition) {",
                "output += \"link\";",
                "}",
                "output += \"</a>\";",
                "return output;",
            ]
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn loops_restore_shadowed_names() {
        let lines = listing("for i of [1]\n\tfor i of [2]\n\t\t\"#{i}\"\n");
        assert!(lines.contains(&"let original_i = i;".to_owned()));
        assert!(lines.contains(&"i = original_i;".to_owned()));
    }

    #[test]
    #[ntest::timeout(100)]
    fn void_elements_have_no_content() {
        assert_eq!(
            listing("br\n"),
            ["let output = \"\";", "output += \"<br>\";", "return output;"]
        );
        match compile_error("img\n\t\"x\"\n") {
            RazorleafError::Semantic(error) => {
                assert_eq!(error.kind, SemanticErrorKind::VoidContent("img".to_owned()));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn attributes_outside_elements_are_rejected() {
        match compile_error("href: \"x\"\n") {
            RazorleafError::Syntax(error) => {
                assert_eq!(error.kind, SyntaxErrorKind::Unexpected("An attribute".to_owned()));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    #[ntest::timeout(100)]
    fn recursive_calls_become_functions() {
        let lines = listing("macro countdown(n)\n\t\"#{n}\"\n\tif n > 0\n\t\tcountdown(n - 1)\ncountdown(2)\n");
        assert!(lines.iter().any(|line| line.starts_with("function _countdown_content_only(n) {")));
        assert!(lines.iter().any(|line| line.starts_with("_countdown_content_only(")));
    }

    #[test]
    #[ntest::timeout(100)]
    fn argument_binding_errors() {
        let cases = [
            ("macro m(a)\nm(1, 2)\n", "TooManyArguments"),
            ("macro m(a)\nm(b: 1)\n", "UnknownParameter"),
            ("macro m(a, b)\nm(1, a: 2)\n", "ParameterAlreadyProvided"),
            ("macro m(a, b)\nm(1)\n", "MissingParameters"),
            ("n(1)\n", "UndefinedMacro"),
        ];

        for (source, expected) in cases {
            match compile_error(source) {
                RazorleafError::Semantic(error) => {
                    assert!(format!("{:?}", error.kind).starts_with(expected), "{source}: {:?}", error.kind);
                }
                other => panic!("{source}: unexpected error {other:?}"),
            }
        }
    }
}
