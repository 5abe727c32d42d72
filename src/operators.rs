//! Policy operators and their dispatch over operand types.
//!
//! The same dispatch is used by the semantic checker (on fabricated default
//! values, to validate operand types) and by the executor (on route data),
//! so a program that type-checks cannot hit an unsupported combination at
//! runtime.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::RwLock;

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::error::PolicyError;
use crate::types::Value;

/// Operators, rendered in bytecode by their upper-case mnemonic.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Op {
    Not,
    And,
    Or,
    Xor,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Add,
    Sub,
    Mul,
    Regex,
}

impl Op {
    pub fn arity(&self) -> usize {
        match self {
            Op::Not => 1,
            _ => 2,
        }
    }

    /// Source-level spelling, used in diagnostics and by the printer.
    pub fn symbol(&self) -> &'static str {
        match self {
            Op::Not => "not",
            Op::And => "and",
            Op::Or => "or",
            Op::Xor => "xor",
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Gt => ">",
            Op::Le => "<=",
            Op::Ge => ">=",
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Regex => "matches",
        }
    }

    /// Operators allowed as compound assignment modifiers (`+=` and friends).
    pub fn is_modifier(&self) -> bool {
        matches!(self, Op::Add | Op::Sub | Op::Mul)
    }
}

static REGEX_CACHE: Lazy<RwLock<HashMap<String, Regex>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Compile a pattern, reusing earlier compilations of the same text.
pub fn compile_regex(pattern: &str) -> Result<Regex, PolicyError> {
    if let Ok(cache) = REGEX_CACHE.read() {
        if let Some(re) = cache.get(pattern) {
            return Ok(re.clone());
        }
    }
    let re = Regex::new(pattern)?;
    if let Ok(mut cache) = REGEX_CACHE.write() {
        cache.insert(pattern.to_string(), re.clone());
    }
    Ok(re)
}

/// Apply `op` to operands given in left-to-right order.
pub fn eval(op: Op, args: &[&Value]) -> Result<Value, PolicyError> {
    use Value::*;

    if args.len() != op.arity() {
        return Err(PolicyError::EvalError(format!(
            "operator {} expects {} operands, got {}",
            op.symbol(),
            op.arity(),
            args.len()
        )));
    }

    let value = match (op, args) {
        (Op::Not, [Bool(a)]) => Bool(!a),
        (Op::And, [Bool(a), Bool(b)]) => Bool(*a && *b),
        (Op::Or, [Bool(a), Bool(b)]) => Bool(*a || *b),
        (Op::Xor, [Bool(a), Bool(b)]) => Bool(a ^ b),

        (Op::Eq, [a, b]) if comparable(a, b) => Bool(a == b),
        (Op::Ne, [a, b]) if comparable(a, b) => Bool(a != b),

        (Op::Lt, [U32(a), U32(b)]) => Bool(a < b),
        (Op::Gt, [U32(a), U32(b)]) => Bool(a > b),
        (Op::Le, [U32(a), U32(b)]) => Bool(a <= b),
        (Op::Ge, [U32(a), U32(b)]) => Bool(a >= b),
        (Op::Lt, [I32(a), I32(b)]) => Bool(a < b),
        (Op::Gt, [I32(a), I32(b)]) => Bool(a > b),
        (Op::Le, [I32(a), I32(b)]) => Bool(a <= b),
        (Op::Ge, [I32(a), I32(b)]) => Bool(a >= b),

        // prefix containment: `a <= b` when a is b or more specific than b
        (Op::Le, [Ipv4Net(a), Ipv4Net(b)]) | (Op::Le, [Ipv6Net(a), Ipv6Net(b)]) => {
            Bool(b.contains(a))
        }
        (Op::Lt, [Ipv4Net(a), Ipv4Net(b)]) | (Op::Lt, [Ipv6Net(a), Ipv6Net(b)]) => {
            Bool(b.contains(a) && a != b)
        }
        (Op::Ge, [Ipv4Net(a), Ipv4Net(b)]) | (Op::Ge, [Ipv6Net(a), Ipv6Net(b)]) => {
            Bool(a.contains(b))
        }
        (Op::Gt, [Ipv4Net(a), Ipv4Net(b)]) | (Op::Gt, [Ipv6Net(a), Ipv6Net(b)]) => {
            Bool(a.contains(b) && a != b)
        }

        // membership
        (Op::Le, [U32(e), SetU32(s)]) => Bool(s.contains(e)),
        (Op::Le, [Str(e), SetStr(s)]) => Bool(s.contains(e)),
        (Op::Le, [Ipv4Net(p), SetIpv4Net(s)]) | (Op::Le, [Ipv6Net(p), SetIpv6Net(s)]) => {
            Bool(s.iter().any(|q| q.contains(p)))
        }
        (Op::Le, [Ipv4(a), Ipv4Net(p)]) => Bool(p.contains_addr(&IpAddr::V4(*a))),
        (Op::Le, [Ipv6(a), Ipv6Net(p)]) => Bool(p.contains_addr(&IpAddr::V6(*a))),
        (Op::Le, [Ipv4(a), IpRange(r)]) => Bool(r.contains(&IpAddr::V4(*a))),
        (Op::Le, [Ipv6(a), IpRange(r)]) => Bool(r.contains(&IpAddr::V6(*a))),

        // subset
        (Op::Le, [SetU32(a), SetU32(b)]) => Bool(a.is_subset(b)),
        (Op::Le, [SetStr(a), SetStr(b)]) => Bool(a.is_subset(b)),
        (Op::Le, [SetIpv4Net(a), SetIpv4Net(b)]) | (Op::Le, [SetIpv6Net(a), SetIpv6Net(b)]) => {
            Bool(a.is_subset(b))
        }

        (Op::Add, [U32(a), U32(b)]) => U32(a.wrapping_add(*b)),
        (Op::Sub, [U32(a), U32(b)]) => U32(a.wrapping_sub(*b)),
        (Op::Mul, [U32(a), U32(b)]) => U32(a.wrapping_mul(*b)),
        (Op::Add, [I32(a), I32(b)]) => I32(a.wrapping_add(*b)),
        (Op::Sub, [I32(a), I32(b)]) => I32(a.wrapping_sub(*b)),
        (Op::Mul, [I32(a), I32(b)]) => I32(a.wrapping_mul(*b)),
        (Op::Add, [Str(a), Str(b)]) => Str(format!("{a}{b}")),

        (Op::Add, [SetU32(a), SetU32(b)]) => SetU32(a.union(b).copied().collect()),
        (Op::Add, [SetStr(a), SetStr(b)]) => SetStr(a.union(b).cloned().collect()),
        (Op::Add, [set @ (SetU32(_) | SetStr(_) | SetIpv4Net(_) | SetIpv6Net(_)), elem]) => {
            set.with_element(elem).map_err(|_| unsupported(op, args))?
        }
        (Op::Sub, [SetU32(a), SetU32(b)]) => SetU32(a.difference(b).copied().collect()),
        (Op::Sub, [SetStr(a), SetStr(b)]) => SetStr(a.difference(b).cloned().collect()),
        (Op::Sub, [set @ (SetU32(_) | SetStr(_) | SetIpv4Net(_) | SetIpv6Net(_)), elem]) => {
            set.without_element(elem).map_err(|_| unsupported(op, args))?
        }

        (Op::Regex, [Str(subject), Str(pattern)]) => Bool(compile_regex(pattern)?.is_match(subject)),

        _ => return Err(unsupported(op, args)),
    };
    Ok(value)
}

fn comparable(a: &Value, b: &Value) -> bool {
    a.value_type() == b.value_type() && !matches!(a, Value::Filter(_))
}

fn unsupported(op: Op, args: &[&Value]) -> PolicyError {
    PolicyError::ValueError(format!(
        "operator {} not supported for ({})",
        op.symbol(),
        args.iter().map(|a| a.value_type()).join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValueType;
    use std::str::FromStr;
    use yare::parameterized;

    fn v(ty: ValueType, text: &str) -> Value {
        Value::create(ty, text).unwrap()
    }

    #[parameterized(
        and = { Op::And, vec![Value::Bool(true), Value::Bool(false)], Value::Bool(false) },
        xor = { Op::Xor, vec![Value::Bool(true), Value::Bool(false)], Value::Bool(true) },
        not = { Op::Not, vec![Value::Bool(true)], Value::Bool(false) },
        eq_txt = { Op::Eq, vec![Value::Str("a".into()), Value::Str("a".into())], Value::Bool(true) },
        lt_u32 = { Op::Lt, vec![Value::U32(1), Value::U32(2)], Value::Bool(true) },
        ge_i32 = { Op::Ge, vec![Value::I32(-1), Value::I32(2)], Value::Bool(false) },
        add_u32 = { Op::Add, vec![Value::U32(1), Value::U32(2)], Value::U32(3) },
        sub_wraps = { Op::Sub, vec![Value::U32(0), Value::U32(1)], Value::U32(u32::MAX) },
        concat = { Op::Add, vec![Value::Str("a".into()), Value::Str("b".into())], Value::Str("ab".into()) },
    )]
    fn test_scalar_ops(op: Op, args: Vec<Value>, expected: Value) {
        let refs: Vec<&Value> = args.iter().collect();
        assert_eq!(eval(op, &refs).unwrap(), expected);
    }

    #[parameterized(
        more_specific = { "10.1.0.0/16", "10.0.0.0/8", true },
        equal = { "10.0.0.0/8", "10.0.0.0/8", true },
        less_specific = { "10.0.0.0/8", "10.1.0.0/16", false },
    )]
    fn test_prefix_le(a: &str, b: &str, expected: bool) {
        let a = v(ValueType::Ipv4Net, a);
        let b = v(ValueType::Ipv4Net, b);
        assert_eq!(eval(Op::Le, &[&a, &b]).unwrap(), Value::Bool(expected));
    }

    #[test]
    fn test_membership_and_subset() {
        let tags = v(ValueType::SetU32, "1,5,9");
        assert_eq!(eval(Op::Le, &[&Value::U32(5), &tags]).unwrap(), Value::Bool(true));
        let subset = v(ValueType::SetU32, "5");
        assert_eq!(eval(Op::Le, &[&subset, &tags]).unwrap(), Value::Bool(true));
        let empty = v(ValueType::SetU32, "");
        assert_eq!(eval(Op::Le, &[&subset, &empty]).unwrap(), Value::Bool(false));

        let nets = v(ValueType::SetIpv4Net, "10.0.0.0/8,192.168.0.0/16");
        let p = v(ValueType::Ipv4Net, "10.20.0.0/16");
        assert_eq!(eval(Op::Le, &[&p, &nets]).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_set_insert_and_remove() {
        let tags = v(ValueType::SetU32, "1");
        let grown = eval(Op::Add, &[&tags, &Value::U32(4)]).unwrap();
        assert_eq!(grown, v(ValueType::SetU32, "1,4"));
        let shrunk = eval(Op::Sub, &[&grown, &Value::U32(1)]).unwrap();
        assert_eq!(shrunk, v(ValueType::SetU32, "4"));

        let block = v(ValueType::SetU32, "4,7");
        let cleared = eval(Op::Sub, &[&v(ValueType::SetU32, "1,4,9"), &block]).unwrap();
        assert_eq!(cleared, v(ValueType::SetU32, "1,9"));
    }

    #[test]
    fn test_regex() {
        let subject = Value::Str("65001 65002".into());
        let pattern = Value::Str("^65001".into());
        assert_eq!(eval(Op::Regex, &[&subject, &pattern]).unwrap(), Value::Bool(true));
        let broken = Value::Str("(".into());
        assert!(eval(Op::Regex, &[&subject, &broken]).is_err());
    }

    #[parameterized(
        eq_mixed = { Op::Eq, vec![Value::U32(1), Value::Str("1".into())] },
        and_u32 = { Op::And, vec![Value::U32(1), Value::U32(1)] },
        add_bool = { Op::Add, vec![Value::Bool(true), Value::Bool(true)] },
        wrong_arity = { Op::Not, vec![Value::Bool(true), Value::Bool(true)] },
        add_wrong_element = { Op::Add, vec![Value::SetU32(Default::default()), Value::Str("x".into())] },
    )]
    fn test_unsupported(op: Op, args: Vec<Value>) {
        let refs: Vec<&Value> = args.iter().collect();
        assert!(eval(op, &refs).is_err());
    }

    #[test]
    fn test_mnemonics() {
        assert_eq!(Op::Regex.to_string(), "REGEX");
        assert_eq!(Op::from_str("LE").unwrap(), Op::Le);
    }
}
