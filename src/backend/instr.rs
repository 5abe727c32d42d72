//! Assembled form of the textual bytecode.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::ast::FlowTarget;
use crate::operators::Op;
use crate::types::Value;
use crate::varrw::VarId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
    Push(Value),
    PushSet(String),
    Load(VarId),
    Store(VarId),
    OnFalseExit,
    Accept,
    Reject,
    Next(FlowTarget),
    /// Run a subroutine policy, pushing whether it did not reject.
    Call(String),
    Op(Op),
}

impl Display for Instr {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Instr::Push(value) => write!(f, "PUSH {} {}", value.value_type(), value.to_bytecode()),
            Instr::PushSet(name) => write!(f, "PUSH_SET {name}"),
            Instr::Load(id) => write!(f, "LOAD {id}"),
            Instr::Store(id) => write!(f, "STORE {id}"),
            Instr::OnFalseExit => write!(f, "ONFALSE_EXIT"),
            Instr::Accept => write!(f, "ACCEPT"),
            Instr::Reject => write!(f, "REJECT"),
            Instr::Next(target) => write!(f, "NEXT {target}"),
            Instr::Call(policy) => write!(f, "POLICY {policy}"),
            Instr::Op(op) => write!(f, "{op}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermCode {
    pub name: String,
    pub instrs: Vec<Instr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyCode {
    pub name: String,
    pub terms: Vec<TermCode>,
}

/// A whole filter: set values, policies in order, and subroutines by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterProgram {
    pub sets: BTreeMap<String, Value>,
    pub policies: Vec<PolicyCode>,
    pub subroutines: BTreeMap<String, PolicyCode>,
}

impl FilterProgram {
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn instruction_count(&self) -> usize {
        self.policies
            .iter()
            .chain(self.subroutines.values())
            .flat_map(|p| p.terms.iter())
            .map(|t| t.instrs.len())
            .sum()
    }
}
