//! Compile-time evaluation of instruction operand expressions. Covers
//! arithmetic and comparison operations over integers and strings.

mod arith;
mod postfix;

use thiserror::Error;

use crate::ast::{List, Node, ValueKind};
use crate::number::parse_number;
use crate::position::Position;
use crate::scope::Scope;

pub(crate) use arith::apply;
pub(crate) use postfix::to_postfix;

/// A value on the reduction stack.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue {
    Int(i64),
    Str(String),
}

impl EvalValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            EvalValue::Int(_) => "int",
            EvalValue::Str(_) => "string",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvalErrorKind {
    #[error("reference to undefined value {0}")]
    Unresolved(String),
    #[error("can not evaluate {lhs} {op} {rhs}")]
    TypeMismatch {
        op: String,
        lhs: &'static str,
        rhs: &'static str,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("unrecognized operation {0:?}")]
    UnknownOperator(String),
    #[error("missing operand for operation {0:?}")]
    MissingOperand(String),
    #[error("mismatched opening parenthesis")]
    UnbalancedOpen,
    #[error("mismatched closing parenthesis")]
    UnbalancedClose,
    #[error("invalid expression; no result")]
    NoResult,
    #[error("invalid expression; too many results")]
    TooManyResults,
    #[error("invalid number: {0}")]
    InvalidNumber(String),
}

/// An evaluation failure, positioned at the offending node.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{position}: {kind}")]
pub struct EvalError {
    pub position: Position,
    pub kind: EvalErrorKind,
}

impl EvalError {
    fn new(position: Position, kind: EvalErrorKind) -> EvalError {
        EvalError { position, kind }
    }

    /// True for the errors that occur when an expression references a symbol
    /// which has not been resolved yet. Layout passes defer these.
    pub fn is_unresolved(&self) -> bool {
        matches!(self.kind, EvalErrorKind::Unresolved(_))
    }
}

/// Resolves a symbol reference to its address or value. `$$` resolves to
/// the current assembly address.
pub type ResolveFn<'a> = dyn Fn(&Scope, &str) -> Result<i64, EvalErrorKind> + 'a;

/// Evaluates the operand expressions of the given instruction, reducing each
/// to its minimal representation. Unresolved references are deferred:
/// the expression is left as-is for a later pass.
pub fn evaluate(instr: &mut List, resolve: &ResolveFn, scope: &Scope) -> Result<(), EvalError> {
    for index in 1..instr.len() {
        if let Some(expr) = instr.at_mut(index).as_list_mut() {
            match eval_expression(expr, resolve, scope) {
                Ok(()) => {}
                Err(err) if err.is_unresolved() => {}
                Err(err) => return Err(err),
            }
        }
    }
    Ok(())
}

/// Like [`evaluate`], but unresolved references are hard errors. Used by the
/// final operand pass, after every label and constant is known.
pub fn evaluate_strict(
    instr: &mut List,
    resolve: &ResolveFn,
    scope: &Scope,
) -> Result<(), EvalError> {
    for index in 1..instr.len() {
        if let Some(expr) = instr.at_mut(index).as_list_mut() {
            eval_expression(expr, resolve, scope)?;
        }
    }
    Ok(())
}

/// Evaluates one expression list in place. On success the expression holds
/// its leading address mode and type descriptor markers, if any, followed by
/// the single reduced value.
fn eval_expression(expr: &mut List, resolve: &ResolveFn, scope: &Scope) -> Result<(), EvalError> {
    if expr.is_empty() {
        return Ok(());
    }

    let postfix = to_postfix(expr)?;
    let value = eval_postfix(&postfix, resolve, scope)?;

    let pos = expr.pos.clone();
    let mut rebuilt = Vec::new();
    for node in &postfix {
        match node.value_kind() {
            Some(ValueKind::AddressMode) | Some(ValueKind::TypeDesc) => {
                rebuilt.push(node.clone());
            }
            _ => break,
        }
    }
    rebuilt.push(match value {
        EvalValue::Int(v) => Node::value(pos, ValueKind::Number, v.to_string()),
        EvalValue::Str(s) => Node::value(pos, ValueKind::Str, s),
    });

    expr.clear();
    expr.extend(rebuilt);
    Ok(())
}

/// Evaluates a postfix expression down to a single value.
fn eval_postfix(
    postfix: &[Node],
    resolve: &ResolveFn,
    scope: &Scope,
) -> Result<EvalValue, EvalError> {
    let first_pos = postfix
        .first()
        .map(|n| n.pos().clone())
        .unwrap_or_default();
    let mut stack: Vec<EvalValue> = Vec::with_capacity(postfix.len());

    for node in postfix {
        let value = node.as_value().expect("postfix nodes are leaves");
        match value.kind {
            ValueKind::AddressMode | ValueKind::TypeDesc => {}

            ValueKind::Ident => {
                let name = value.text.to_lowercase();
                let resolved = resolve(scope, &name)
                    .map_err(|kind| EvalError::new(value.pos.clone(), kind))?;
                stack.push(EvalValue::Int(resolved));
            }

            ValueKind::Number => {
                let parsed = parse_number(&value.text).map_err(|err| {
                    EvalError::new(value.pos.clone(), EvalErrorKind::InvalidNumber(err))
                })?;
                stack.push(EvalValue::Int(parsed));
            }

            ValueKind::Str => stack.push(EvalValue::Str(value.text.clone())),

            ValueKind::Operator => {
                let (op, unary) = match value.text.strip_prefix('u') {
                    Some(bare) => (bare, true),
                    None => (value.text.as_str(), false),
                };

                let rhs = stack.pop().ok_or_else(|| {
                    EvalError::new(
                        value.pos.clone(),
                        EvalErrorKind::MissingOperand(op.to_string()),
                    )
                })?;
                let lhs = if unary {
                    EvalValue::Int(0)
                } else {
                    stack.pop().ok_or_else(|| {
                        EvalError::new(
                            value.pos.clone(),
                            EvalErrorKind::MissingOperand(op.to_string()),
                        )
                    })?
                };

                let result =
                    apply(op, lhs, rhs).map_err(|kind| EvalError::new(value.pos.clone(), kind))?;
                stack.push(result);
            }

            other => {
                return Err(EvalError::new(
                    value.pos.clone(),
                    EvalErrorKind::UnknownOperator(format!("{other:?}")),
                ));
            }
        }
    }

    match stack.len() {
        0 => Err(EvalError::new(first_pos, EvalErrorKind::NoResult)),
        1 => Ok(stack.pop().expect("stack holds one value")),
        _ => Err(EvalError::new(first_pos, EvalErrorKind::TooManyResults)),
    }
}
