//! Stack machine running a [`FilterProgram`] against one route.
//!
//! Policies run in order and terms in order within a policy. A false
//! `ONFALSE_EXIT` leaves the current term, `NEXT TERM` and `NEXT POLICY`
//! leave the term or policy, and `ACCEPT`/`REJECT` end the program. A
//! program that runs off its end leaves the route to the default action.

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tracing::{debug, trace};

use crate::ast::FlowTarget;
use crate::error::PolicyError;
use crate::operators;
use crate::types::Value;
use crate::varrw::{VAR_TRACE, VarRW};

use super::instr::{FilterProgram, Instr, PolicyCode, TermCode};

/// Subroutine nesting allowed before a call is refused.
pub const MAX_CALL_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Outcome {
    Accept,
    Reject,
    /// No `ACCEPT` or `REJECT` was reached.
    Default,
}

impl Outcome {
    /// Default outcomes let the route through.
    pub fn accepted(&self) -> bool {
        !matches!(self, Outcome::Reject)
    }
}

enum TermFlow {
    Continue,
    LeavePolicy,
    Finish(Outcome),
}

pub struct Executor<'p> {
    program: &'p FilterProgram,
    depth: usize,
}

impl<'p> Executor<'p> {
    pub fn new(program: &'p FilterProgram) -> Self {
        Executor { program, depth: 0 }
    }

    pub fn run(&mut self, varrw: &mut dyn VarRW) -> Result<Outcome, PolicyError> {
        let program = self.program;
        let mut outcome = Outcome::Default;
        for policy in &program.policies {
            if let Some(finished) = self.run_policy(policy, varrw)? {
                outcome = finished;
                break;
            }
        }
        varrw.sync();
        debug!(event = "Filter", phase = "Execute", outcome = %outcome);
        Ok(outcome)
    }

    fn run_policy(
        &mut self,
        policy: &PolicyCode,
        varrw: &mut dyn VarRW,
    ) -> Result<Option<Outcome>, PolicyError> {
        for term in &policy.terms {
            match self.run_term(term, varrw)? {
                TermFlow::Continue => {}
                TermFlow::LeavePolicy => break,
                TermFlow::Finish(outcome) => return Ok(Some(outcome)),
            }
        }
        Ok(None)
    }

    fn run_term(&mut self, term: &TermCode, varrw: &mut dyn VarRW) -> Result<TermFlow, PolicyError> {
        let mut stack: Vec<Value> = Vec::new();
        for instr in &term.instrs {
            trace!(event = "Filter", phase = "Step", term = term.name.as_str(), instr = %instr);
            match instr {
                Instr::Push(value) => stack.push(value.clone()),
                Instr::PushSet(name) => {
                    let value = self.program.sets.get(name).ok_or_else(|| {
                        PolicyError::EvalError(format!("set {name} not in program"))
                    })?;
                    stack.push(value.clone());
                }
                Instr::Load(id) => stack.push(varrw.read(*id)?),
                Instr::Store(id) => {
                    let value = pop(&mut stack)?;
                    match (*id, &value) {
                        (VAR_TRACE, Value::U32(level)) => varrw.set_trace(*level),
                        _ => varrw.write(*id, value)?,
                    }
                }
                Instr::OnFalseExit => match pop(&mut stack)? {
                    Value::Bool(true) => {}
                    Value::Bool(false) => return Ok(TermFlow::Continue),
                    other => {
                        return Err(PolicyError::EvalError(format!(
                            "condition is {} not bool",
                            other.value_type()
                        )));
                    }
                },
                Instr::Accept => return Ok(TermFlow::Finish(Outcome::Accept)),
                Instr::Reject => return Ok(TermFlow::Finish(Outcome::Reject)),
                Instr::Next(FlowTarget::Term) => return Ok(TermFlow::Continue),
                Instr::Next(FlowTarget::Policy) => return Ok(TermFlow::LeavePolicy),
                Instr::Call(name) => {
                    let outcome = self.call(name, varrw)?;
                    stack.push(Value::Bool(outcome.accepted()));
                }
                Instr::Op(op) => {
                    // the left operand is on top
                    let mut args = Vec::with_capacity(op.arity());
                    for _ in 0..op.arity() {
                        args.push(pop(&mut stack)?);
                    }
                    let refs: Vec<&Value> = args.iter().collect();
                    stack.push(operators::eval(*op, &refs)?);
                }
            }
        }
        Ok(TermFlow::Continue)
    }

    fn call(&mut self, name: &str, varrw: &mut dyn VarRW) -> Result<Outcome, PolicyError> {
        let program = self.program;
        let policy = program
            .subroutines
            .get(name)
            .ok_or_else(|| PolicyError::EvalError(format!("subroutine {name} not in program")))?;
        if self.depth >= MAX_CALL_DEPTH {
            return Err(PolicyError::EvalError(format!(
                "subroutine nesting deeper than {MAX_CALL_DEPTH} at {name}"
            )));
        }
        self.depth += 1;
        let result = self.run_policy(policy, varrw);
        self.depth -= 1;
        Ok(result?.unwrap_or(Outcome::Default))
    }
}

fn pop(stack: &mut Vec<Value>) -> Result<Value, PolicyError> {
    stack
        .pop()
        .ok_or_else(|| PolicyError::EvalError("stack underflow".to_string()))
}
