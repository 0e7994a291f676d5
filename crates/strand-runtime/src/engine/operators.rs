use std::cmp::Ordering;

use super::environment::Environment;
use crate::callable::Callable;
use crate::error::Fault;
use crate::value::{Value, ValueKind};

pub const OPERATORS: [&str; 19] = [
    "+", "-", "*", "/", "%", "**", ".", "x", "==", "!=", "<", ">", "<=", ">=", "eq", "ne",
    "lt", "gt", "!",
];

/// Longest string, in bytes, the `x` operator will build.
pub const MAX_REPEAT_LENGTH: usize = 1 << 24;

/// Operator table installed into every instance.
pub fn standard_operators() -> Vec<(&'static str, Callable)> {
    OPERATORS
        .iter()
        .map(|operator| (*operator, Callable::native(apply)))
        .collect()
}

fn apply(env: &mut Environment, operator: &str, operands: Vec<Value>) -> Result<Value, Fault> {
    match (operator, operands.as_slice()) {
        ("!", [value]) => Ok(Value::boolean(!value.is_true())),
        ("-", [value]) => Ok(negate(value)),
        (_, [left, right]) => binary(env, operator, left, right),
        _ => Err(Fault::engine(
            "ENGINE_OPERATOR_ARITY",
            format!(
                "Operator \"{}\" does not take {} operand(s).",
                operator,
                operands.len()
            ),
        )),
    }
}

fn negate(value: &Value) -> Value {
    if is_float(value) {
        Value::float(-value.to_float())
    } else {
        Value::integer(value.to_integer().wrapping_neg())
    }
}

fn is_float(value: &Value) -> bool {
    match value.kind() {
        ValueKind::Float(_) => true,
        ValueKind::String(text) => {
            let text = text.trim();
            text.parse::<i64>().is_err() && text.parse::<f64>().is_ok()
        }
        _ => false,
    }
}

fn binary(env: &mut Environment, operator: &str, left: &Value, right: &Value) -> Result<Value, Fault> {
    let floating = is_float(left) || is_float(right);
    let value = match operator {
        "." => Value::from(format!("{}{}", left, right)),
        "+" if !left.is_numeric() || !right.is_numeric() => {
            Value::from(format!("{}{}", left, right))
        }
        "x" => {
            let text = left.to_string();
            let count = usize::try_from(right.to_integer().max(0)).unwrap_or(usize::MAX);
            match text.len().checked_mul(count) {
                Some(length) if length <= MAX_REPEAT_LENGTH => Value::from(text.repeat(count)),
                _ => {
                    env.flag_error(Value::from(format!(
                        "Repeat count {} is too large",
                        right
                    )));
                    return Ok(Value::empty());
                }
            }
        }
        "+" | "-" | "*" if floating => {
            let (left, right) = (left.to_float(), right.to_float());
            Value::float(match operator {
                "+" => left + right,
                "-" => left - right,
                _ => left * right,
            })
        }
        "+" | "-" | "*" => {
            let (left, right) = (left.to_integer(), right.to_integer());
            Value::integer(match operator {
                "+" => left.wrapping_add(right),
                "-" => left.wrapping_sub(right),
                _ => left.wrapping_mul(right),
            })
        }
        "/" | "%" => {
            if right.to_float() == 0.0 {
                env.flag_error(Value::from("Division by zero"));
                return Ok(Value::empty());
            }
            if floating {
                let (left, right) = (left.to_float(), right.to_float());
                Value::float(if operator == "/" { left / right } else { left % right })
            } else {
                let (left, right) = (left.to_integer(), right.to_integer());
                Value::integer(if operator == "/" {
                    left.wrapping_div(right)
                } else {
                    left.wrapping_rem(right)
                })
            }
        }
        "**" => {
            let exponent = right.to_integer();
            if !floating && (0..=u32::MAX as i64).contains(&exponent) {
                Value::integer(left.to_integer().wrapping_pow(exponent as u32))
            } else {
                Value::float(left.to_float().powf(right.to_float()))
            }
        }
        "==" | "!=" | "<" | ">" | "<=" | ">=" => {
            let ordering = if floating {
                left.to_float()
                    .partial_cmp(&right.to_float())
                    .unwrap_or(Ordering::Less)
            } else {
                left.to_integer().cmp(&right.to_integer())
            };
            Value::boolean(match operator {
                "==" => ordering == Ordering::Equal,
                "!=" => ordering != Ordering::Equal,
                "<" => ordering == Ordering::Less,
                ">" => ordering == Ordering::Greater,
                "<=" => ordering != Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
        "eq" | "ne" | "lt" | "gt" => {
            let ordering = left.to_string().cmp(&right.to_string());
            Value::boolean(match operator {
                "eq" => ordering == Ordering::Equal,
                "ne" => ordering != Ordering::Equal,
                "lt" => ordering == Ordering::Less,
                _ => ordering == Ordering::Greater,
            })
        }
        _ => {
            return Err(Fault::engine(
                "ENGINE_OPERATOR_UNKNOWN",
                format!("Unknown binary operator \"{}\".", operator),
            ))
        }
    };
    Ok(value)
}
