use crate::eval::{EvalErrorKind, EvalValue};

use EvalValue::{Int, Str};

/// Performs an arithmetic or compare operation on two reduction-stack
/// values. Integer operations work on 64-bit signed intermediates; the
/// comparison operations yield the canonical truth values -1 and 0.
///
/// `+` additionally concatenates strings, treating an integer operand as a
/// Unicode code point. Any other mixed-type combination is an error.
pub(crate) fn apply(op: &str, a: EvalValue, b: EvalValue) -> Result<EvalValue, EvalErrorKind> {
    match op {
        "+" => add(a, b),
        "-" => int_op(op, a, b, |x, y| Ok(x.wrapping_sub(y))),
        "*" => int_op(op, a, b, |x, y| Ok(x.wrapping_mul(y))),
        "/" => int_op(op, a, b, |x, y| {
            if y == 0 {
                Err(EvalErrorKind::DivisionByZero)
            } else {
                Ok(x.wrapping_div(y))
            }
        }),
        "%" => int_op(op, a, b, |x, y| {
            if y == 0 {
                Err(EvalErrorKind::DivisionByZero)
            } else {
                Ok(x.wrapping_rem(y))
            }
        }),
        "<<" => int_op(op, a, b, |x, y| Ok(shift_left(x, y))),
        ">>" => int_op(op, a, b, |x, y| Ok(shift_right(x, y))),
        "&" => int_op(op, a, b, |x, y| Ok(x & y)),
        "|" => int_op(op, a, b, |x, y| Ok(x | y)),
        "^" => int_op(op, a, b, |x, y| Ok(x ^ y)),
        "==" => eq(a, b),
        "!=" => eq(a, b).map(not),
        "<" => compare(op, a, b, |o| o.is_lt()),
        "<=" => compare(op, a, b, |o| o.is_le()),
        ">" => compare(op, a, b, |o| o.is_gt()),
        ">=" => compare(op, a, b, |o| o.is_ge()),
        other => Err(EvalErrorKind::UnknownOperator(other.to_string())),
    }
}

fn add(a: EvalValue, b: EvalValue) -> Result<EvalValue, EvalErrorKind> {
    let value = match (a, b) {
        (Int(x), Int(y)) => Int(x.wrapping_add(y)),
        (Int(x), Str(y)) => Str(format!("{}{y}", code_point(x))),
        (Str(x), Int(y)) => Str(format!("{x}{}", code_point(y))),
        (Str(x), Str(y)) => Str(format!("{x}{y}")),
    };
    Ok(value)
}

fn code_point(value: i64) -> char {
    u32::try_from(value)
        .ok()
        .and_then(char::from_u32)
        .unwrap_or(char::REPLACEMENT_CHARACTER)
}

fn int_op(
    op: &str,
    a: EvalValue,
    b: EvalValue,
    f: impl FnOnce(i64, i64) -> Result<i64, EvalErrorKind>,
) -> Result<EvalValue, EvalErrorKind> {
    match (&a, &b) {
        (Int(x), Int(y)) => f(*x, *y).map(Int),
        _ => Err(mismatch(op, &a, &b)),
    }
}

fn eq(a: EvalValue, b: EvalValue) -> Result<EvalValue, EvalErrorKind> {
    // Identical values are equal regardless of type.
    if a == b {
        return Ok(truth(true));
    }

    match (&a, &b) {
        (Int(x), Int(y)) => Ok(truth(x == y)),
        (Str(x), Str(y)) => Ok(truth(x == y)),
        _ => Err(mismatch("==", &a, &b)),
    }
}

fn compare(
    op: &str,
    a: EvalValue,
    b: EvalValue,
    f: impl FnOnce(std::cmp::Ordering) -> bool,
) -> Result<EvalValue, EvalErrorKind> {
    match (&a, &b) {
        (Int(x), Int(y)) => Ok(truth(f(x.cmp(y)))),
        (Str(x), Str(y)) => Ok(truth(f(x.cmp(y)))),
        _ => Err(mismatch(op, &a, &b)),
    }
}

fn not(value: EvalValue) -> EvalValue {
    match value {
        Int(0) => Int(-1),
        _ => Int(0),
    }
}

/// The canonical integer representation of a bool: -1 for true, 0 for false.
fn truth(x: bool) -> EvalValue {
    Int(if x { -1 } else { 0 })
}

fn mismatch(op: &str, a: &EvalValue, b: &EvalValue) -> EvalErrorKind {
    EvalErrorKind::TypeMismatch {
        op: op.to_string(),
        lhs: a.type_name(),
        rhs: b.type_name(),
    }
}

fn shift_left(x: i64, y: i64) -> i64 {
    if !(0..64).contains(&y) {
        return 0;
    }
    x.wrapping_shl(y as u32)
}

fn shift_right(x: i64, y: i64) -> i64 {
    if !(0..64).contains(&y) {
        return x >> 63;
    }
    x.wrapping_shr(y as u32)
}
