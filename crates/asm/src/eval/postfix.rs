use crate::ast::{List, Node, ValueKind};
use crate::eval::{EvalError, EvalErrorKind};

// ref: https://en.wikipedia.org/wiki/Shunting-yard_algorithm

/// Converts an infix expression into postfix notation using Dijkstra's
/// shunting-yard algorithm. Prefix occurrences of `+ - ^` are rewritten to
/// their unary forms (`u+`, `u-`, `u^`) before precedence handling, and
/// there are no parentheses left once this call is finished.
pub(crate) fn to_postfix(expr: &List) -> Result<Vec<Node>, EvalError> {
    let mut out: Vec<Node> = Vec::with_capacity(expr.len());
    let mut ops: Vec<Node> = Vec::with_capacity(expr.len() / 2);

    // A `+`, `-` or `^` is unary when it does not follow a value or a
    // closing parenthesis.
    let mut prev_is_value = false;

    for node in expr.children() {
        match node.value_kind() {
            Some(ValueKind::Operator) => {
                let text = text_of(node);
                let mut node = node.clone();

                if !prev_is_value && matches!(text, "+" | "-" | "^") {
                    let value = node.as_value_mut().expect("operator leaf");
                    value.text.insert(0, 'u');
                }
                prev_is_value = text == ")";

                handle_op(&mut out, &mut ops, node)?;
            }
            Some(ValueKind::AddressMode) | Some(ValueKind::TypeDesc) => {
                out.push(node.clone());
            }
            _ => {
                prev_is_value = true;
                out.push(node.clone());
            }
        }
    }

    while let Some(top) = ops.pop() {
        if text_of(&top) == "(" {
            return Err(EvalError {
                position: top.pos().clone(),
                kind: EvalErrorKind::UnbalancedOpen,
            });
        }
        out.push(top);
    }

    Ok(out)
}

/// Handles one operator according to the shunting-yard rules.
fn handle_op(out: &mut Vec<Node>, ops: &mut Vec<Node>, node: Node) -> Result<(), EvalError> {
    let text = text_of(&node).to_string();

    if text == "(" {
        ops.push(node);
        return Ok(());
    }

    if text == ")" {
        while let Some(top) = ops.pop() {
            if text_of(&top) == "(" {
                return Ok(());
            }
            out.push(top);
        }
        return Err(EvalError {
            position: node.pos().clone(),
            kind: EvalErrorKind::UnbalancedClose,
        });
    }

    let (prec, left) = op_properties(&text, node.pos())?;

    while let Some(top) = ops.last() {
        let top_text = text_of(top);
        if top_text == "(" {
            break;
        }
        let (top_prec, _) = op_properties(top_text, top.pos())?;

        if prec < top_prec || (prec == top_prec && left) {
            out.push(ops.pop().expect("operator stack is non-empty"));
        } else {
            break;
        }
    }

    ops.push(node);
    Ok(())
}

/// Returns an operator's precedence (larger binds tighter) and whether it is
/// left-associative.
fn op_properties(op: &str, pos: &crate::position::Position) -> Result<(i32, bool), EvalError> {
    let props = match op {
        "(" | ")" => (1, true),
        "u+" | "u-" | "u^" => (3, false),
        "+" | "-" => (3, true),
        "*" | "/" | "%" => (4, true),
        ">>" | "<<" => (5, true),
        "<=" | ">=" | "<" | ">" => (6, true),
        "!=" | "==" => (7, true),
        "&" => (8, true),
        "^" => (9, false),
        "|" => (10, true),
        other => {
            return Err(EvalError {
                position: pos.clone(),
                kind: EvalErrorKind::UnknownOperator(other.to_string()),
            });
        }
    };
    Ok(props)
}

fn text_of(node: &Node) -> &str {
    node.as_value().map(|v| v.text.as_str()).unwrap_or("")
}
