//! Execution of the generated program.
//!
//! The compiler emits a flat list of [`Instruction`]s whose `Open`/`Close`
//! codes delimit nested sections. [`assemble`] turns that list into a tree of
//! operations once, at compile time, and [`Program::run`] walks the tree for
//! every render.

use std::collections::HashMap;
use std::fmt::Write as _;

use indexmap::IndexMap;

use crate::code_block::{Code, Escape, Instruction, Opener, Piece};
use crate::error::RenderError;
use crate::escape::{escape_attribute_value, escape_content};
use crate::expression::{Accessor, BinaryOp, Expr, Header, LogicalOp, Stmt, Target, UnaryOp};
use crate::markup;
use crate::value::Value;

#[derive(Debug)]
pub(crate) enum Op {
    Append {
        target: String,
        pieces: Vec<Piece>,
    },
    Statements(Vec<Stmt>),
    Declare {
        name: String,
        value: Expr,
    },
    Assign {
        name: String,
        value: Expr,
    },
    If {
        branches: Vec<(Expr, Vec<Op>)>,
        otherwise: Option<Vec<Op>>,
    },
    While {
        condition: Expr,
        body: Vec<Op>,
    },
    Loop {
        item: String,
        index: Option<String>,
        collection: Expr,
        body: Vec<Op>,
    },
    Function {
        name: String,
        parameters: Vec<String>,
        body: Vec<Op>,
    },
    Call {
        function: String,
        arguments: Vec<Expr>,
        result: Option<String>,
    },
    Return(Expr),
}

#[derive(Debug)]
pub(crate) struct Program {
    body: Vec<Op>,
}

/// Attaches a closed section to the operations that precede it.
fn attach(parent: &mut Vec<Op>, opener: Opener, body: Vec<Op>) -> Result<(), String> {
    match opener {
        Opener::Header(Header::If(condition)) => parent.push(Op::If {
            branches: vec![(condition, body)],
            otherwise: None,
        }),
        Opener::Header(Header::ElseIf(condition)) => match parent.last_mut() {
            Some(Op::If {
                branches,
                otherwise,
            }) if otherwise.is_none() => branches.push((condition, body)),
            _ => return Err("else if without a matching if".to_owned()),
        },
        Opener::Header(Header::Else) => match parent.last_mut() {
            Some(Op::If { otherwise, .. }) if otherwise.is_none() => *otherwise = Some(body),
            _ => return Err("else without a matching if".to_owned()),
        },
        Opener::Header(Header::While(condition)) => parent.push(Op::While { condition, body }),
        Opener::Header(Header::ForOf {
            binding,
            collection,
        }) => parent.push(Op::Loop {
            item: binding,
            index: None,
            collection,
            body,
        }),
        Opener::Loop {
            item,
            index,
            collection,
        } => parent.push(Op::Loop {
            item,
            index,
            collection,
            body,
        }),
        Opener::Function { name, parameters } => parent.push(Op::Function {
            name,
            parameters,
            body,
        }),
    }

    Ok(())
}

/// Builds the operation tree for a linear instruction list.
///
/// # Errors
/// If the `Open`/`Close` codes are unbalanced or an `else` has no `if`.
pub(crate) fn assemble(instructions: &[Instruction]) -> Result<Program, String> {
    let mut stack: Vec<(Option<Opener>, Vec<Op>)> = vec![(None, Vec::new())];

    for instruction in instructions {
        let op = match instruction {
            Instruction::Append { target, pieces } => Op::Append {
                target: target.clone(),
                pieces: pieces.clone(),
            },
            Instruction::Code(Code::Open(opener)) => {
                stack.push((Some(opener.clone()), Vec::new()));
                continue;
            }
            Instruction::Code(Code::Close) => {
                let (Some(opener), body) = stack.pop().unwrap_or_default() else {
                    return Err("unbalanced close".to_owned());
                };
                let Some((_, parent)) = stack.last_mut() else {
                    return Err("unbalanced close".to_owned());
                };
                attach(parent, opener, body)?;
                continue;
            }
            Instruction::Code(Code::Statements(statements)) => Op::Statements(statements.clone()),
            Instruction::Code(Code::Declare { name, value }) => Op::Declare {
                name: name.clone(),
                value: value.clone(),
            },
            Instruction::Code(Code::Assign { name, value }) => Op::Assign {
                name: name.clone(),
                value: value.clone(),
            },
            Instruction::Code(Code::Call {
                function,
                arguments,
                result,
            }) => Op::Call {
                function: function.clone(),
                arguments: arguments.clone(),
                result: result.clone(),
            },
            Instruction::Code(Code::Return(value)) => Op::Return(value.clone()),
        };

        if let Some((_, body)) = stack.last_mut() {
            body.push(op);
        }
    }

    match stack.pop() {
        Some((None, body)) if stack.is_empty() => {
            tracing::trace!(operations = body.len(), "assembled program");
            Ok(Program { body })
        }
        _ => Err(format!("{} unclosed section(s)", stack.len())),
    }
}

#[derive(Clone, Copy)]
struct Closure<'p> {
    parameters: &'p [String],
    body: &'p [Op],
    /// The frame the function was defined in.
    frame: usize,
}

struct Frame<'p> {
    variables: HashMap<String, Value>,
    functions: HashMap<String, Closure<'p>>,
    parent: Option<usize>,
}

impl Frame<'_> {
    fn new(parent: Option<usize>) -> Self {
        Self {
            variables: HashMap::new(),
            functions: HashMap::new(),
            parent,
        }
    }
}

enum Flow {
    Continue,
    Return(Value),
}

/// Frames live on a stack; a function's defining frame is always below the
/// frames of its calls, so a closure can refer to it by index.
struct Machine<'p> {
    frames: Vec<Frame<'p>>,
    globals: &'p IndexMap<String, Value>,
}

impl Program {
    /// Runs the program with `data` bound to the `data` variable.
    pub(crate) fn run(&self, data: Value, globals: &IndexMap<String, Value>) -> Result<Value, RenderError> {
        let mut machine = Machine {
            frames: vec![Frame::new(None)],
            globals,
        };
        machine.declare(0, "data", data);

        match machine.run_block(0, &self.body)? {
            Flow::Return(value) => Ok(value),
            Flow::Continue => Ok(Value::Undefined),
        }
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    use std::cmp::Ordering;

    let ordered = |accept: &[Ordering]| {
        Value::Bool(left.compare(right).is_some_and(|o| accept.contains(&o)))
    };

    match op {
        BinaryOp::Add => left.add(right),
        BinaryOp::Subtract => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Multiply => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Divide => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Remainder => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Less => ordered(&[Ordering::Less]),
        BinaryOp::LessEqual => ordered(&[Ordering::Less, Ordering::Equal]),
        BinaryOp::Greater => ordered(&[Ordering::Greater]),
        BinaryOp::GreaterEqual => ordered(&[Ordering::Greater, Ordering::Equal]),
        BinaryOp::Equal => Value::Bool(left.loose_equals(right)),
        BinaryOp::NotEqual => Value::Bool(!left.loose_equals(right)),
        BinaryOp::StrictEqual => Value::Bool(left.strict_equals(right)),
        BinaryOp::StrictNotEqual => Value::Bool(!left.strict_equals(right)),
    }
}

fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Undefined => "undefined",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Null | Value::Array(_) | Value::Object(_) | Value::Markup(_) => "object",
    }
}

impl<'p> Machine<'p> {
    fn find_variable(&self, frame: usize, name: &str) -> Option<usize> {
        let mut current = Some(frame);
        while let Some(index) = current {
            if self.frames[index].variables.contains_key(name) {
                return Some(index);
            }
            current = self.frames[index].parent;
        }
        None
    }

    fn find_function(&self, frame: usize, name: &str) -> Option<Closure<'p>> {
        let mut current = Some(frame);
        while let Some(index) = current {
            if let Some(closure) = self.frames[index].functions.get(name) {
                return Some(*closure);
            }
            current = self.frames[index].parent;
        }
        None
    }

    fn lookup(&self, frame: usize, name: &str) -> Value {
        match self.find_variable(frame, name) {
            Some(index) => self.frames[index].variables[name].clone(),
            None => self.globals.get(name).cloned().unwrap_or_default(),
        }
    }

    fn declare(&mut self, frame: usize, name: &str, value: Value) {
        self.frames[frame].variables.insert(name.to_owned(), value);
    }

    /// Stores into the nearest frame that has `name`, or the current one.
    fn assign(&mut self, frame: usize, name: &str, value: Value) {
        let index = self.find_variable(frame, name).unwrap_or(frame);
        self.frames[index].variables.insert(name.to_owned(), value);
    }

    fn append(&mut self, frame: usize, target: &str, text: &str) {
        let index = self.find_variable(frame, target).unwrap_or(frame);
        let slot = self.frames[index]
            .variables
            .entry(target.to_owned())
            .or_insert_with(|| Value::String(String::new()));

        match slot {
            Value::String(s) => s.push_str(text),
            other => *other = Value::String(format!("{other}{text}")),
        }
    }

    fn evaluate(&self, frame: usize, expr: &Expr) -> Result<Value, RenderError> {
        Ok(match expr {
            Expr::Undefined => Value::Undefined,
            Expr::Null => Value::Null,
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Number(n) => Value::Number(*n),
            Expr::String(s) => Value::String(s.clone()),
            Expr::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.evaluate(frame, item))
                    .collect::<Result<_, _>>()?,
            ),
            Expr::Object(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), self.evaluate(frame, value)?)))
                    .collect::<Result<_, RenderError>>()?,
            ),
            Expr::Identifier(name) => self.lookup(frame, name),
            Expr::Member { object, property } => self
                .evaluate(frame, object)?
                .property(&Value::String(property.clone()))?,
            Expr::Index { object, index } => {
                let object = self.evaluate(frame, object)?;
                object.property(&self.evaluate(frame, index)?)?
            }
            Expr::Unary { op, operand } => {
                let value = self.evaluate(frame, operand)?;
                match op {
                    UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    UnaryOp::Negate => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                    UnaryOp::TypeOf => Value::String(type_of(&value).to_owned()),
                }
            }
            Expr::Binary { op, left, right } => {
                let left = self.evaluate(frame, left)?;
                binary(*op, &left, &self.evaluate(frame, right)?)
            }
            Expr::Logical { op, left, right } => {
                let left = self.evaluate(frame, left)?;
                let short_circuits = match op {
                    LogicalOp::And => !left.is_truthy(),
                    LogicalOp::Or => left.is_truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuits {
                    left
                } else {
                    self.evaluate(frame, right)?
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.evaluate(frame, test)?.is_truthy() {
                    self.evaluate(frame, consequent)?
                } else {
                    self.evaluate(frame, alternate)?
                }
            }
        })
    }

    fn accessor_key(&self, frame: usize, accessor: &Accessor) -> Result<Value, RenderError> {
        match accessor {
            Accessor::Property(property) => Ok(Value::String(property.clone())),
            Accessor::Index(index) => self.evaluate(frame, index),
        }
    }

    fn read_target(&self, frame: usize, target: &Target) -> Result<Value, RenderError> {
        let mut value = self.lookup(frame, &target.name);
        for accessor in &target.path {
            value = value.property(&self.accessor_key(frame, accessor)?)?;
        }
        Ok(value)
    }

    fn write_target(&mut self, frame: usize, target: &Target, value: Value) -> Result<(), RenderError> {
        if target.path.is_empty() {
            self.assign(frame, &target.name, value);
            return Ok(());
        }

        let keys = target
            .path
            .iter()
            .map(|accessor| self.accessor_key(frame, accessor))
            .collect::<Result<Vec<_>, _>>()?;

        // Globals are shared between renders; writes go to a copy.
        let index = match self.find_variable(frame, &target.name) {
            Some(index) => index,
            None => {
                let base = self.lookup(frame, &target.name);
                self.declare(frame, &target.name, base);
                frame
            }
        };

        if let Some(mut slot) = self.frames[index].variables.get_mut(&target.name) {
            for key in &keys {
                slot = slot.property_mut(key)?;
            }
            *slot = value;
        }

        Ok(())
    }

    fn execute(&mut self, frame: usize, statement: &Stmt) -> Result<(), RenderError> {
        match statement {
            Stmt::Declare { name, value } => {
                let value = match value {
                    Some(value) => self.evaluate(frame, value)?,
                    None => Value::Undefined,
                };
                self.declare(frame, name, value);
            }
            Stmt::Assign { target, op, value } => {
                let mut value = self.evaluate(frame, value)?;
                if let Some(op) = op {
                    value = binary(*op, &self.read_target(frame, target)?, &value);
                }
                self.write_target(frame, target, value)?;
            }
            Stmt::Update { target, delta } => {
                let current = self.read_target(frame, target)?.to_number();
                self.write_target(frame, target, Value::Number(current + delta))?;
            }
            Stmt::Expression(expr) => {
                self.evaluate(frame, expr)?;
            }
        }
        Ok(())
    }

    fn render_pieces(&self, frame: usize, pieces: &[Piece]) -> Result<String, RenderError> {
        let mut out = String::new();
        for piece in pieces {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Expression { expr, escape } => {
                    let value = self.evaluate(frame, expr)?;
                    match escape {
                        None => {
                            let _ = write!(out, "{value}");
                        }
                        Some(Escape::Content) => out.push_str(&escape_content(&value.to_string())),
                        Some(Escape::Attribute) => {
                            out.push_str(&escape_attribute_value(&value.to_string()));
                        }
                        Some(Escape::UnwrapMarkup) => out.push_str(markup::unwrap(&value)?),
                    }
                }
            }
        }
        Ok(out)
    }

    fn call(&mut self, frame: usize, function: &str, arguments: Vec<Value>) -> Result<Value, RenderError> {
        let closure = self
            .find_function(frame, function)
            .ok_or_else(|| RenderError::NotAFunction(function.to_owned()))?;

        let callee = self.frames.len();
        self.frames.push(Frame::new(Some(closure.frame)));

        let mut arguments = arguments.into_iter();
        for parameter in closure.parameters {
            let value = arguments.next().unwrap_or_default();
            self.declare(callee, parameter, value);
        }

        let flow = self.run_block(callee, closure.body);
        self.frames.truncate(callee);

        Ok(match flow? {
            Flow::Return(value) => value,
            Flow::Continue => Value::Undefined,
        })
    }

    fn run_block(&mut self, frame: usize, ops: &'p [Op]) -> Result<Flow, RenderError> {
        for op in ops {
            match op {
                Op::Append { target, pieces } => {
                    let text = self.render_pieces(frame, pieces)?;
                    self.append(frame, target, &text);
                }
                Op::Statements(statements) => {
                    for statement in statements {
                        self.execute(frame, statement)?;
                    }
                }
                Op::Declare { name, value } => {
                    let value = self.evaluate(frame, value)?;
                    self.declare(frame, name, value);
                }
                Op::Assign { name, value } => {
                    let value = self.evaluate(frame, value)?;
                    self.assign(frame, name, value);
                }
                Op::If {
                    branches,
                    otherwise,
                } => {
                    let mut chosen = otherwise.as_deref();
                    for (condition, body) in branches {
                        if self.evaluate(frame, condition)?.is_truthy() {
                            chosen = Some(body.as_slice());
                            break;
                        }
                    }
                    if let Some(body) = chosen
                        && let Flow::Return(value) = self.run_block(frame, body)?
                    {
                        return Ok(Flow::Return(value));
                    }
                }
                Op::While { condition, body } => {
                    while self.evaluate(frame, condition)?.is_truthy() {
                        if let Flow::Return(value) = self.run_block(frame, body)? {
                            return Ok(Flow::Return(value));
                        }
                    }
                }
                Op::Loop {
                    item,
                    index,
                    collection,
                    body,
                } => {
                    let items = self.evaluate(frame, collection)?.iterate()?;
                    for (position, value) in items.into_iter().enumerate() {
                        self.declare(frame, item, value);
                        if let Some(index) = index {
                            self.declare(frame, index, Value::Number(position as f64));
                        }
                        if let Flow::Return(value) = self.run_block(frame, body)? {
                            return Ok(Flow::Return(value));
                        }
                    }
                }
                Op::Function {
                    name,
                    parameters,
                    body,
                } => {
                    let closure = Closure {
                        parameters,
                        body,
                        frame,
                    };
                    self.frames[frame].functions.insert(name.clone(), closure);
                }
                Op::Call {
                    function,
                    arguments,
                    result,
                } => {
                    let arguments = arguments
                        .iter()
                        .map(|argument| self.evaluate(frame, argument))
                        .collect::<Result<Vec<_>, _>>()?;
                    let value = self.call(frame, function, arguments)?;
                    if let Some(result) = result {
                        self.declare(frame, result, value);
                    }
                }
                Op::Return(value) => return Ok(Flow::Return(self.evaluate(frame, value)?)),
            }
        }

        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::code_block::CodeBlock;
    use crate::expression::{parse_expression, parse_statements};

    fn expr(text: &str) -> Expr {
        parse_expression(text).unwrap()
    }

    fn run(instructions: &[Instruction], data: serde_json::Value) -> Result<Value, RenderError> {
        assemble(instructions).unwrap().run(Value::from(data), &IndexMap::new())
    }

    fn program(block: CodeBlock) -> Vec<Instruction> {
        let mut instructions = vec![Instruction::Code(Code::declare("output", Expr::String(String::new())))];
        instructions.extend(block.into_instructions("output"));
        instructions.push(Instruction::Code(Code::Return(Expr::identifier("output"))));
        instructions
    }

    #[test]
    #[ntest::timeout(100)]
    fn unbalanced_sections_are_rejected() {
        let open = Instruction::Code(Code::open_if("x"));
        let close = Instruction::Code(Code::Close);

        assert!(assemble(&[open.clone()]).is_err());
        assert!(assemble(&[close.clone()]).is_err());
        assert!(assemble(&[open, close.clone(), close]).is_err());
        assert!(
            assemble(&[
                Instruction::Code(Code::open_else()),
                Instruction::Code(Code::Close)
            ])
            .is_err()
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn branches_and_loops() {
        let mut block = CodeBlock::new();
        block
            .add_code(Code::Open(Opener::Loop {
                item: "n".to_owned(),
                index: Some("i".to_owned()),
                collection: expr("data.numbers"),
            }))
            .add_code(Code::Declare {
                name: "even".to_owned(),
                value: expr("n % 2 === 0"),
            })
            .add_code(Code::open_if("even"))
            .add_expression(Some(Escape::Content), expr("i"))
            .add_code(Code::Close)
            .add_code(Code::open_else())
            .add_text(None, "-")
            .add_code(Code::Close)
            .add_code(Code::Close);

        let output = run(&program(block), json!({"numbers": [2, 3, 4, 5]})).unwrap();
        assert_eq!(output, Value::from("0-2-"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn recursive_functions_see_their_defining_frame() {
        let mut block = CodeBlock::new();
        block
            .add_code(Code::declare("separator", Expr::String(", ".to_owned())))
            .add_code(Code::Open(Opener::Function {
                name: "countdown".to_owned(),
                parameters: vec!["n".to_owned()],
            }))
            .add_expression(None, expr("n"))
            .add_code(Code::Open(Opener::Header(Header::If(expr("n > 1")))))
            .add_expression(None, expr("separator"))
            .add_code(Code::Call {
                function: "countdown".to_owned(),
                arguments: vec![expr("n - 1")],
                result: None,
            })
            .add_code(Code::Close)
            .add_code(Code::Close)
            .add_code(Code::Call {
                function: "countdown".to_owned(),
                arguments: vec![expr("3")],
                result: None,
            });

        let output = run(&program(block), json!({})).unwrap();
        assert_eq!(output, Value::from("3, 2, 1"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn function_parameters_do_not_leak() {
        let mut block = CodeBlock::new();
        block
            .add_code(Code::declare("n", Expr::String("outer".to_owned())))
            .add_code(Code::Open(Opener::Function {
                name: "f".to_owned(),
                parameters: vec!["n".to_owned()],
            }))
            .add_code(Code::Return(expr("n + 1")))
            .add_code(Code::Close)
            .add_code(Code::Call {
                function: "f".to_owned(),
                arguments: vec![expr("1")],
                result: Some("result".to_owned()),
            })
            .add_expression(None, expr("result"))
            .add_text(None, " ")
            .add_expression(None, expr("n"));

        let output = run(&program(block), json!({})).unwrap();
        assert_eq!(output, Value::from("2 outer"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn statements_update_data_copies() {
        let mut block = CodeBlock::new();
        block
            .add_code(Code::Statements(
                parse_statements("let total = 0\nfor_total = 1\ndata.count += 2; total++").unwrap(),
            ))
            .add_expression(None, expr("total + data.count"));

        let output = run(&program(block), json!({"count": 1})).unwrap();
        assert_eq!(output, Value::from("4"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn unwrapping_requires_markup() {
        let mut block = CodeBlock::new();
        block.add_expression(Some(Escape::UnwrapMarkup), expr("data.html"));

        let err = run(&program(block), json!({"html": "<b>"})).unwrap_err();
        assert_eq!(err, RenderError::NotMarkup("string".to_owned()));
    }

    #[test]
    #[ntest::timeout(100)]
    fn reading_through_undefined_fails() {
        let mut block = CodeBlock::new();
        block.add_expression(Some(Escape::Content), expr("data.missing.name"));

        let err = run(&program(block), json!({})).unwrap_err();
        assert!(matches!(err, RenderError::PropertyOfNullish { .. }));
    }

    #[test]
    #[ntest::timeout(100)]
    fn globals_are_visible_but_shadowable() {
        let mut globals = IndexMap::new();
        globals.insert("site".to_owned(), Value::from("Leaf"));

        let mut block = CodeBlock::new();
        block
            .add_expression(None, expr("site"))
            .add_code(Code::declare("site", Expr::String("local".to_owned())))
            .add_expression(None, expr("site"));

        let program = assemble(&program(block)).unwrap();
        let output = program.run(Value::Null, &globals).unwrap();
        assert_eq!(output, Value::from("Leaflocal"));
    }
}
