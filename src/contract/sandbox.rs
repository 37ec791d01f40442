//! Sandboxed program compiler
//!
//! Evaluates an untrusted program source into the two application programs
//! (approval and clear-state). Evaluation is a closed interpreter over the
//! primitive table in [`crate::contract::primitives`]: a name resolves to an
//! earlier binding of the same source or to a listed primitive, and to
//! nothing else. All evaluation state lives in a per-call [`Session`] that
//! is dropped on every exit path; outputs are returned in memory.

use crate::contract::assembler::{Assembler, AssemblerError};
use crate::contract::lexer::Span;
use crate::contract::lower::{lower_program, Expr, ValueType};
use crate::contract::primitives::{Capabilities, Primitive};
use crate::contract::syntax::{parse, Binding, Node, NodeKind, MAX_NODES};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Largest accepted source text, in bytes
pub const MAX_SOURCE_LEN: usize = 64 * 1024;

/// Largest byte-string literal
pub const MAX_BYTES_LITERAL: usize = 4096;

/// Binding names the compiler reads its outputs from
pub const APPROVAL_OUTPUT: &str = "approval";
pub const CLEAR_OUTPUT: &str = "clear";
const CLEAR_OUTPUT_ALIAS: &str = "clear_state";

/// Sandbox compilation errors. Every message is generated here and safe to
/// show to the program author.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SandboxError {
    #[error("program source is empty")]
    EmptySource,
    #[error("program source is {0} bytes, limit is {max}", max = MAX_SOURCE_LEN)]
    SourceTooLarge(usize),
    #[error("{}: {message}", .span.map(|s| s.to_string()).unwrap_or_else(|| "end".to_string()))]
    Syntax { span: Option<Span>, message: String },
    #[error("{span}: `{name}` is not an available primitive")]
    UnknownName { span: Span, name: String },
    #[error("{span}: `{name}` is not permitted in this sandbox")]
    Forbidden { span: Span, name: String },
    #[error("{span}: `{name}` is a primitive and cannot be rebound")]
    Rebind { span: Span, name: String },
    #[error("{span}: {message}")]
    Type { span: Span, message: String },
    #[error("program expands to more than {max} expressions", max = MAX_NODES)]
    TooLarge,
    #[error("program does not define {0}")]
    Incomplete(String),
    #[error("assembly failed: {0}")]
    Assembly(#[from] AssemblerError),
}

/// Assembly listings for both programs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramListing {
    pub approval: String,
    pub clear: String,
}

/// Compiled bytecode for both programs. Both fields are non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledArtifact {
    approval: Vec<u8>,
    clear: Vec<u8>,
}

impl CompiledArtifact {
    /// Pair up two programs; `None` if either is empty
    pub fn new(approval: Vec<u8>, clear: Vec<u8>) -> Option<Self> {
        if approval.is_empty() || clear.is_empty() {
            return None;
        }
        Some(Self { approval, clear })
    }

    pub fn approval(&self) -> &[u8] {
        &self.approval
    }

    pub fn clear(&self) -> &[u8] {
        &self.clear
    }
}

/// Compiler for untrusted program sources
#[derive(Debug, Clone, Default)]
pub struct SandboxedCompiler {
    capabilities: Capabilities,
}

impl SandboxedCompiler {
    /// Compiler exposing every capability group
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiler restricted to the given capability groups
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Evaluate `source` and assemble both programs locally
    pub fn compile(&self, source: &str) -> Result<CompiledArtifact, SandboxError> {
        let listing = self.compile_listing(source)?;
        let mut assembler = Assembler::new();
        let approval = assembler.assemble(&listing.approval)?;
        let clear = assembler.assemble(&listing.clear)?;
        // The assembler always emits at least the version byte
        CompiledArtifact::new(approval, clear)
            .ok_or_else(|| SandboxError::Incomplete("a non-empty program".to_string()))
    }

    /// Evaluate `source` into assembly listings for both programs
    pub fn compile_listing(&self, source: &str) -> Result<ProgramListing, SandboxError> {
        if source.trim().is_empty() {
            return Err(SandboxError::EmptySource);
        }
        if source.len() > MAX_SOURCE_LEN {
            return Err(SandboxError::SourceTooLarge(source.len()));
        }

        let bindings = parse(source).map_err(|e| SandboxError::Syntax {
            span: e.span,
            message: e.message,
        })?;

        let mut session = Session::new(self.capabilities);
        for binding in &bindings {
            session.bind(binding)?;
        }
        session.into_listing()
    }
}

/// A type-checked value with its expanded size
#[derive(Debug, Clone)]
struct Typed {
    expr: Expr,
    ty: ValueType,
    /// Nodes in `expr` after binding expansion
    size: usize,
}

/// Result of evaluating one syntax node
enum Value {
    Typed(Typed),
    /// `[cond, body]`, only meaningful as a `Cond` argument
    Pair(Typed, Typed, Span),
}

/// Evaluation state for a single compilation
struct Session {
    capabilities: Capabilities,
    bindings: HashMap<String, Typed>,
    expanded: usize,
}

impl Session {
    fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            bindings: HashMap::new(),
            expanded: 0,
        }
    }

    fn bind(&mut self, binding: &Binding) -> Result<(), SandboxError> {
        if Primitive::lookup(&binding.name).is_some() {
            return Err(SandboxError::Rebind {
                span: binding.span,
                name: binding.name.clone(),
            });
        }
        let value = self.typed(&binding.value)?;
        self.bindings.insert(binding.name.clone(), value);
        Ok(())
    }

    fn into_listing(mut self) -> Result<ProgramListing, SandboxError> {
        let approval = self.bindings.remove(APPROVAL_OUTPUT);
        let clear = self
            .bindings
            .remove(CLEAR_OUTPUT)
            .or_else(|| self.bindings.remove(CLEAR_OUTPUT_ALIAS));

        let (approval, clear) = match (approval, clear) {
            (Some(a), Some(c)) => (a, c),
            (a, c) => {
                let mut missing = Vec::new();
                if a.is_none() {
                    missing.push(format!("`{}`", APPROVAL_OUTPUT));
                }
                if c.is_none() {
                    missing.push(format!("`{}`", CLEAR_OUTPUT));
                }
                return Err(SandboxError::Incomplete(missing.join(" and ")));
            }
        };

        Ok(ProgramListing {
            approval: program_listing(APPROVAL_OUTPUT, approval)?,
            clear: program_listing(CLEAR_OUTPUT, clear)?,
        })
    }

    fn typed(&mut self, node: &Node) -> Result<Typed, SandboxError> {
        match self.eval(node)? {
            Value::Typed(t) => Ok(t),
            Value::Pair(_, _, span) => Err(type_error(span, "`[...]` is only allowed inside Cond")),
        }
    }

    fn eval(&mut self, node: &Node) -> Result<Value, SandboxError> {
        let span = node.span;
        match &node.kind {
            NodeKind::Int(_) | NodeKind::Str(_) => Err(type_error(
                span,
                "bare literals are not values; wrap them in Int(...) or Bytes(...)",
            )),
            NodeKind::Pair(first, second) => {
                let first = self.typed(first)?;
                let second = self.typed(second)?;
                Ok(Value::Pair(first, second, span))
            }
            NodeKind::Path(name) => {
                if let Some(bound) = self.bindings.get(name).cloned() {
                    self.charge(bound.size)?;
                    return Ok(Value::Typed(bound));
                }
                let primitive = self.resolve(name, span)?;
                if primitive.is_callable() {
                    return Err(type_error(span, format!("`{}` must be called", name)));
                }
                self.apply(primitive, name, Vec::new(), &[], span)
                    .map(Value::Typed)
            }
            NodeKind::Call(name, args) => {
                if self.bindings.contains_key(name) {
                    return Err(type_error(span, format!("`{}` is a value, not a primitive", name)));
                }
                let primitive = self.resolve(name, span)?;
                if !primitive.is_callable() {
                    return Err(type_error(span, format!("`{}` is a constant, not a call", name)));
                }

                let (min, max) = primitive.arity();
                if args.len() < min || max.is_some_and(|max| args.len() > max) {
                    let expected = match max {
                        Some(max) if max == min => format!("{}", min),
                        Some(max) => format!("{} to {}", min, max),
                        None => format!("at least {}", min),
                    };
                    return Err(type_error(
                        span,
                        format!("`{}` takes {} argument(s), got {}", name, expected, args.len()),
                    ));
                }

                // Literal-taking primitives read their syntax directly
                if matches!(primitive, Primitive::Int | Primitive::Bytes | Primitive::TxnArg) {
                    return self.apply(primitive, name, Vec::new(), args, span).map(Value::Typed);
                }

                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                self.apply(primitive, name, values, args, span)
                    .map(Value::Typed)
            }
        }
    }

    fn resolve(&self, name: &str, span: Span) -> Result<Primitive, SandboxError> {
        let primitive = Primitive::lookup(name).ok_or_else(|| SandboxError::UnknownName {
            span,
            name: name.to_string(),
        })?;
        if !self.capabilities.contains(primitive.capability()) {
            return Err(SandboxError::Forbidden {
                span,
                name: name.to_string(),
            });
        }
        Ok(primitive)
    }

    fn charge(&mut self, nodes: usize) -> Result<(), SandboxError> {
        self.expanded += nodes;
        if self.expanded > MAX_NODES {
            return Err(SandboxError::TooLarge);
        }
        Ok(())
    }

    fn apply(
        &mut self,
        primitive: Primitive,
        name: &str,
        values: Vec<Value>,
        syntax: &[Node],
        span: Span,
    ) -> Result<Typed, SandboxError> {
        let mut size = 1;
        let mut typed_args = Vec::new();
        let mut pairs = Vec::new();
        for value in values {
            match value {
                Value::Typed(t) => {
                    size += t.size;
                    typed_args.push(t);
                }
                Value::Pair(a, b, pair_span) => {
                    if primitive != Primitive::Cond {
                        return Err(type_error(pair_span, "`[...]` is only allowed inside Cond"));
                    }
                    size += a.size + b.size;
                    pairs.push((a, b, pair_span));
                }
            }
        }
        self.charge(1)?;

        let (expr, ty) = match primitive {
            Primitive::Int => match &syntax[0].kind {
                NodeKind::Int(n) => (Expr::Int(*n), ValueType::Uint64),
                _ => return Err(type_error(syntax[0].span, "Int(...) takes an integer literal")),
            },
            Primitive::Bytes => match &syntax[0].kind {
                NodeKind::Str(s) if s.len() <= MAX_BYTES_LITERAL => {
                    (Expr::Bytes(s.clone()), ValueType::Bytes)
                }
                NodeKind::Str(_) => {
                    return Err(type_error(
                        syntax[0].span,
                        format!("byte literal longer than {} bytes", MAX_BYTES_LITERAL),
                    ))
                }
                _ => return Err(type_error(syntax[0].span, "Bytes(...) takes a string literal")),
            },
            Primitive::TxnArg => match &syntax[0].kind {
                NodeKind::Int(n) => {
                    let index = u8::try_from(*n)
                        .map_err(|_| type_error(syntax[0].span, "argument index must be 0..=255"))?;
                    (Expr::TxnArg(index), ValueType::Bytes)
                }
                _ => {
                    return Err(type_error(
                        syntax[0].span,
                        "Txn.application_args(...) takes an integer literal index",
                    ))
                }
            },
            Primitive::Approve => (Expr::Approve, ValueType::None),
            Primitive::Reject => (Expr::Reject, ValueType::None),
            Primitive::Return => {
                let value = expect(name, &syntax[0], typed_args.remove(0), ValueType::Uint64)?;
                (Expr::Return(Box::new(value)), ValueType::None)
            }
            Primitive::Assert => {
                let cond = expect(name, &syntax[0], typed_args.remove(0), ValueType::Uint64)?;
                (Expr::Assert(Box::new(cond)), ValueType::None)
            }
            Primitive::Seq => {
                let last = typed_args.len() - 1;
                let mut items = Vec::with_capacity(typed_args.len());
                let mut ty = ValueType::None;
                for (i, item) in typed_args.into_iter().enumerate() {
                    if i < last && item.ty != ValueType::None {
                        return Err(type_error(
                            syntax[i].span,
                            format!(
                                "Seq item {} produces a {} value; only the last item may produce a value",
                                i + 1,
                                item.ty.name()
                            ),
                        ));
                    }
                    ty = item.ty;
                    items.push(item.expr);
                }
                (Expr::Seq(items), ty)
            }
            Primitive::If => {
                let mut args = typed_args.into_iter();
                let (cond, then, otherwise) = match (args.next(), args.next(), args.next()) {
                    (Some(c), Some(t), e) => (c, t, e),
                    _ => return Err(type_error(span, "If takes a condition and a branch")),
                };
                let cond = expect(name, &syntax[0], cond, ValueType::Uint64)?;
                match otherwise {
                    None => {
                        if then.ty != ValueType::None {
                            return Err(type_error(
                                syntax[1].span,
                                "If without an else branch must not produce a value",
                            ));
                        }
                        (Expr::If(Box::new(cond), Box::new(then.expr), None), ValueType::None)
                    }
                    Some(otherwise) => {
                        let ty = unify(then.ty, otherwise.ty).ok_or_else(|| {
                            type_error(
                                syntax[2].span,
                                format!(
                                    "If branches disagree: {} vs {}",
                                    then.ty.name(),
                                    otherwise.ty.name()
                                ),
                            )
                        })?;
                        (
                            Expr::If(
                                Box::new(cond),
                                Box::new(then.expr),
                                Some(Box::new(otherwise.expr)),
                            ),
                            ty,
                        )
                    }
                }
            }
            Primitive::Cond => {
                if !typed_args.is_empty() {
                    return Err(type_error(span, "Cond takes [condition, body] pairs"));
                }
                let mut ty: Option<ValueType> = None;
                let mut branches = Vec::with_capacity(pairs.len());
                for (cond, body, pair_span) in pairs {
                    if !cond.ty.fits(ValueType::Uint64) {
                        return Err(type_error(pair_span, "Cond condition must be uint64"));
                    }
                    ty = match ty {
                        None => Some(body.ty),
                        Some(prev) => Some(unify(prev, body.ty).ok_or_else(|| {
                            type_error(pair_span, "Cond branches produce different types")
                        })?),
                    };
                    branches.push((cond.expr, body.expr));
                }
                (Expr::Cond(branches), ty.unwrap_or(ValueType::None))
            }
            Primitive::Binary(op) => {
                let rhs = typed_args.pop();
                let lhs = typed_args.pop();
                let (Some(lhs), Some(rhs)) = (lhs, rhs) else {
                    return Err(type_error(span, format!("`{}` takes two operands", name)));
                };
                let (lhs, rhs) = if op.is_equality() {
                    if lhs.ty == ValueType::None || rhs.ty == ValueType::None {
                        return Err(type_error(span, format!("`{}` operands must be values", name)));
                    }
                    if unify(lhs.ty, rhs.ty).is_none() {
                        return Err(type_error(
                            span,
                            format!(
                                "`{}` compares {} with {}",
                                name,
                                lhs.ty.name(),
                                rhs.ty.name()
                            ),
                        ));
                    }
                    (lhs.expr, rhs.expr)
                } else {
                    (
                        expect(name, &syntax[0], lhs, ValueType::Uint64)?,
                        expect(name, &syntax[1], rhs, ValueType::Uint64)?,
                    )
                };
                (Expr::Binary(op, Box::new(lhs), Box::new(rhs)), ValueType::Uint64)
            }
            Primitive::Not => {
                let value = expect(name, &syntax[0], typed_args.remove(0), ValueType::Uint64)?;
                (Expr::Not(Box::new(value)), ValueType::Uint64)
            }
            Primitive::Txn(field) => {
                let ty = match field {
                    crate::contract::opcodes::TxnField::Sender => ValueType::Bytes,
                    _ => ValueType::Uint64,
                };
                (Expr::Txn(field), ty)
            }
            Primitive::GlobalGet => {
                let key = expect(name, &syntax[0], typed_args.remove(0), ValueType::Bytes)?;
                (Expr::GlobalGet(Box::new(key)), ValueType::Any)
            }
            Primitive::GlobalPut => {
                let key = typed_args.remove(0);
                let value = typed_args.remove(0);
                let key = expect(name, &syntax[0], key, ValueType::Bytes)?;
                if value.ty == ValueType::None {
                    return Err(type_error(syntax[1].span, "App.globalPut needs a value to store"));
                }
                (
                    Expr::GlobalPut(Box::new(key), Box::new(value.expr)),
                    ValueType::None,
                )
            }
            Primitive::GlobalDel => {
                let key = expect(name, &syntax[0], typed_args.remove(0), ValueType::Bytes)?;
                (Expr::GlobalDel(Box::new(key)), ValueType::None)
            }
            Primitive::OnComplete(action) => (Expr::Int(action.code()), ValueType::Uint64),
        };

        Ok(Typed { expr, ty, size })
    }
}

fn program_listing(output: &str, program: Typed) -> Result<String, SandboxError> {
    match program.ty {
        ValueType::Uint64 | ValueType::None => Ok(lower_program(&program.expr, program.ty)),
        other => Err(SandboxError::Type {
            span: Span { line: 1, column: 1 },
            message: format!(
                "`{}` must be a program producing uint64 or nothing, got {}",
                output,
                other.name()
            ),
        }),
    }
}

fn expect(
    name: &str,
    node: &Node,
    value: Typed,
    expected: ValueType,
) -> Result<Expr, SandboxError> {
    if value.ty.fits(expected) {
        Ok(value.expr)
    } else {
        Err(type_error(
            node.span,
            format!(
                "`{}` expects {}, got {}",
                name,
                expected.name(),
                value.ty.name()
            ),
        ))
    }
}

fn unify(a: ValueType, b: ValueType) -> Option<ValueType> {
    match (a, b) {
        _ if a == b => Some(a),
        (ValueType::Any, other) | (other, ValueType::Any) if other != ValueType::None => {
            Some(ValueType::Any)
        }
        _ => None,
    }
}

fn type_error(span: Span, message: impl Into<String>) -> SandboxError {
    SandboxError::Type {
        span,
        message: message.into(),
    }
}
