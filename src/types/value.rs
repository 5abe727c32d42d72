//! Runtime values manipulated by policy programs.
//!
//! Every value has a [`ValueType`] with a stable textual name; the names are
//! used by the varmap schema, by `SET` declarations and by `PUSH`
//! instructions in the filter bytecode.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::backend::FilterRef;
use crate::error::PolicyError;

use super::net::{IpRange, Prefix};

/// The type tag of a [`Value`].
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
pub enum ValueType {
    #[strum(serialize = "bool")]
    #[serde(rename = "bool")]
    Bool,
    #[strum(serialize = "u32")]
    #[serde(rename = "u32")]
    U32,
    #[strum(serialize = "i32")]
    #[serde(rename = "i32")]
    I32,
    #[strum(serialize = "txt")]
    #[serde(rename = "txt")]
    Str,
    #[strum(serialize = "ipv4")]
    #[serde(rename = "ipv4")]
    Ipv4,
    #[strum(serialize = "ipv6")]
    #[serde(rename = "ipv6")]
    Ipv6,
    #[strum(serialize = "ipv4net")]
    #[serde(rename = "ipv4net")]
    Ipv4Net,
    #[strum(serialize = "ipv6net")]
    #[serde(rename = "ipv6net")]
    Ipv6Net,
    #[strum(serialize = "iprange")]
    #[serde(rename = "iprange")]
    IpRange,
    #[strum(serialize = "set_u32")]
    #[serde(rename = "set_u32")]
    SetU32,
    #[strum(serialize = "set_txt")]
    #[serde(rename = "set_txt")]
    SetStr,
    #[strum(serialize = "set_ipv4net")]
    #[serde(rename = "set_ipv4net")]
    SetIpv4Net,
    #[strum(serialize = "set_ipv6net")]
    #[serde(rename = "set_ipv6net")]
    SetIpv6Net,
    #[strum(serialize = "filter")]
    #[serde(rename = "filter")]
    Filter,
}

impl ValueType {
    /// Element type of a set type, `None` for scalars.
    pub fn element_type(&self) -> Option<ValueType> {
        match self {
            ValueType::SetU32 => Some(ValueType::U32),
            ValueType::SetStr => Some(ValueType::Str),
            ValueType::SetIpv4Net => Some(ValueType::Ipv4Net),
            ValueType::SetIpv6Net => Some(ValueType::Ipv6Net),
            _ => None,
        }
    }

    pub fn is_set(&self) -> bool {
        self.element_type().is_some()
    }
}

/// A polymorphic policy datum.
///
/// Values are immutable from the point of view of their holders: updates
/// build a new value and replace the old one wholesale.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    #[serde(rename = "bool")]
    Bool(bool),
    #[serde(rename = "u32")]
    U32(u32),
    #[serde(rename = "i32")]
    I32(i32),
    #[serde(rename = "txt")]
    Str(String),
    #[serde(rename = "ipv4")]
    Ipv4(Ipv4Addr),
    #[serde(rename = "ipv6")]
    Ipv6(Ipv6Addr),
    #[serde(rename = "ipv4net")]
    Ipv4Net(Prefix),
    #[serde(rename = "ipv6net")]
    Ipv6Net(Prefix),
    #[serde(rename = "iprange")]
    IpRange(IpRange),
    #[serde(rename = "set_u32")]
    SetU32(BTreeSet<u32>),
    #[serde(rename = "set_txt")]
    SetStr(BTreeSet<String>),
    #[serde(rename = "set_ipv4net")]
    SetIpv4Net(BTreeSet<Prefix>),
    #[serde(rename = "set_ipv6net")]
    SetIpv6Net(BTreeSet<Prefix>),
    #[serde(skip)]
    Filter(FilterRef),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::U32(_) => ValueType::U32,
            Value::I32(_) => ValueType::I32,
            Value::Str(_) => ValueType::Str,
            Value::Ipv4(_) => ValueType::Ipv4,
            Value::Ipv6(_) => ValueType::Ipv6,
            Value::Ipv4Net(_) => ValueType::Ipv4Net,
            Value::Ipv6Net(_) => ValueType::Ipv6Net,
            Value::IpRange(_) => ValueType::IpRange,
            Value::SetU32(_) => ValueType::SetU32,
            Value::SetStr(_) => ValueType::SetStr,
            Value::SetIpv4Net(_) => ValueType::SetIpv4Net,
            Value::SetIpv6Net(_) => ValueType::SetIpv6Net,
            Value::Filter(_) => ValueType::Filter,
        }
    }

    /// Build a value of type `ty` from its literal text.
    ///
    /// Set elements are comma separated; an empty text is an empty set.
    pub fn create(ty: ValueType, text: &str) -> Result<Value, PolicyError> {
        let bad = || PolicyError::ValueError(format!("cannot parse {text:?} as {ty}"));
        let value = match ty {
            ValueType::Bool => match text.trim() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => return Err(bad()),
            },
            ValueType::U32 => Value::U32(text.trim().parse().map_err(|_| bad())?),
            ValueType::I32 => Value::I32(text.trim().parse().map_err(|_| bad())?),
            ValueType::Str => Value::Str(text.to_string()),
            ValueType::Ipv4 => Value::Ipv4(text.trim().parse().map_err(|_| bad())?),
            ValueType::Ipv6 => Value::Ipv6(text.trim().parse().map_err(|_| bad())?),
            ValueType::Ipv4Net => {
                let p: Prefix = text.parse()?;
                if !p.is_ipv4() {
                    return Err(bad());
                }
                Value::Ipv4Net(p)
            }
            ValueType::Ipv6Net => {
                let p: Prefix = text.parse()?;
                if p.is_ipv4() {
                    return Err(bad());
                }
                Value::Ipv6Net(p)
            }
            ValueType::IpRange => Value::IpRange(text.parse()?),
            ValueType::SetU32
            | ValueType::SetStr
            | ValueType::SetIpv4Net
            | ValueType::SetIpv6Net => {
                let mut set = Value::default_for(ty);
                for elem in text.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                    set = set.with_element(&Value::create(set_element(ty), elem)?)?;
                }
                set
            }
            ValueType::Filter => {
                return Err(PolicyError::ValueError(
                    "filter references cannot be created from text".to_string(),
                ));
            }
        };
        Ok(value)
    }

    /// The default-initialized value of a type.
    pub fn default_for(ty: ValueType) -> Value {
        match ty {
            ValueType::Bool => Value::Bool(false),
            ValueType::U32 => Value::U32(0),
            ValueType::I32 => Value::I32(0),
            ValueType::Str => Value::Str(String::new()),
            ValueType::Ipv4 => Value::Ipv4(Ipv4Addr::UNSPECIFIED),
            ValueType::Ipv6 => Value::Ipv6(Ipv6Addr::UNSPECIFIED),
            ValueType::Ipv4Net => Value::Ipv4Net(zero_prefix(IpAddr::V4(Ipv4Addr::UNSPECIFIED))),
            ValueType::Ipv6Net => Value::Ipv6Net(zero_prefix(IpAddr::V6(Ipv6Addr::UNSPECIFIED))),
            ValueType::IpRange => Value::IpRange(IpRange::default()),
            ValueType::SetU32 => Value::SetU32(BTreeSet::new()),
            ValueType::SetStr => Value::SetStr(BTreeSet::new()),
            ValueType::SetIpv4Net => Value::SetIpv4Net(BTreeSet::new()),
            ValueType::SetIpv6Net => Value::SetIpv6Net(BTreeSet::new()),
            ValueType::Filter => Value::Filter(FilterRef::default()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// A copy of this set with `elem` added.
    pub fn with_element(&self, elem: &Value) -> Result<Value, PolicyError> {
        let mut out = self.clone();
        match (&mut out, elem) {
            (Value::SetU32(s), Value::U32(e)) => {
                s.insert(*e);
            }
            (Value::SetStr(s), Value::Str(e)) => {
                s.insert(e.clone());
            }
            (Value::SetIpv4Net(s), Value::Ipv4Net(e)) | (Value::SetIpv6Net(s), Value::Ipv6Net(e)) => {
                s.insert(*e);
            }
            _ => return Err(element_mismatch(self, elem)),
        }
        Ok(out)
    }

    /// A copy of this set with `elem` removed.
    pub fn without_element(&self, elem: &Value) -> Result<Value, PolicyError> {
        let mut out = self.clone();
        match (&mut out, elem) {
            (Value::SetU32(s), Value::U32(e)) => {
                s.remove(e);
            }
            (Value::SetStr(s), Value::Str(e)) => {
                s.remove(e);
            }
            (Value::SetIpv4Net(s), Value::Ipv4Net(e)) | (Value::SetIpv6Net(s), Value::Ipv6Net(e)) => {
                s.remove(e);
            }
            _ => return Err(element_mismatch(self, elem)),
        }
        Ok(out)
    }

    /// Render as a `PUSH`/`SET` operand; text-like payloads are quoted.
    pub fn to_bytecode(&self) -> String {
        match self.value_type() {
            ValueType::Str
            | ValueType::SetU32
            | ValueType::SetStr
            | ValueType::SetIpv4Net
            | ValueType::SetIpv6Net => quote(&self.to_string()),
            _ => self.to_string(),
        }
    }
}

fn set_element(ty: ValueType) -> ValueType {
    // only called for set types
    ty.element_type().unwrap_or(ValueType::Str)
}

fn zero_prefix(addr: IpAddr) -> Prefix {
    match Prefix::new(addr, 0) {
        Ok(p) => p,
        Err(e) => panic!("zero-length prefix rejected: {e}"),
    }
}

fn element_mismatch(set: &Value, elem: &Value) -> PolicyError {
    PolicyError::ValueError(format!(
        "cannot use {} as element of {}",
        elem.value_type(),
        set.value_type()
    ))
}

/// Quote a bytecode operand, escaping `"` and `\`.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::U32(n) => write!(f, "{n}"),
            Value::I32(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Ipv4(a) => write!(f, "{a}"),
            Value::Ipv6(a) => write!(f, "{a}"),
            Value::Ipv4Net(p) | Value::Ipv6Net(p) => write!(f, "{p}"),
            Value::IpRange(r) => write!(f, "{r}"),
            Value::SetU32(s) => write!(f, "{}", s.iter().join(",")),
            Value::SetStr(s) => write!(f, "{}", s.iter().join(",")),
            Value::SetIpv4Net(s) | Value::SetIpv6Net(s) => write!(f, "{}", s.iter().join(",")),
            Value::Filter(r) => write!(f, "{r}"),
        }
    }
}

impl FromStr for ValueTypedLiteral {
    type Err = PolicyError;

    /// Parse `"<type> <text>"`, the form used by `SET` lines and `PUSH` operands.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ty, text) = s
            .split_once(' ')
            .ok_or_else(|| PolicyError::ValueError(format!("missing type in {s:?}")))?;
        let ty = ValueType::from_str(ty)
            .map_err(|_| PolicyError::ValueError(format!("unknown type {ty}")))?;
        Ok(ValueTypedLiteral(Value::create(ty, &unquote(text)?)?))
    }
}

/// Undo [`quote`]. Text without a leading `"` is returned unchanged.
pub fn unquote(s: &str) -> Result<String, PolicyError> {
    let Some(inner) = s.strip_prefix('"') else {
        return Ok(s.to_string());
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => out.push(escaped),
                None => break,
            },
            '"' if chars.as_str().is_empty() => return Ok(out),
            '"' => break,
            other => out.push(other),
        }
    }
    Err(PolicyError::ValueError(format!("malformed quoted text {s}")))
}

/// A value parsed from `"<type> <text>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueTypedLiteral(pub Value);
