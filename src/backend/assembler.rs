//! Textual bytecode to [`FilterProgram`].
//!
//! The text is line oriented: `SET` declarations, then policies framed by
//! `POLICY_START`/`POLICY_END` holding terms framed by
//! `TERM_START`/`TERM_END`, then optionally a `SUBR_START`..`SUBR_END`
//! section holding subroutine policies in the same framing.

use std::str::FromStr;

use tracing::debug;

use crate::ast::FlowTarget;
use crate::error::PolicyError;
use crate::operators::Op;
use crate::types::{Value, ValueType, ValueTypedLiteral, unquote};

use super::instr::{FilterProgram, Instr, PolicyCode, TermCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Main,
    Subroutines,
}

pub fn assemble(text: &str) -> Result<FilterProgram, PolicyError> {
    let mut program = FilterProgram::default();
    let mut section = Section::Main;
    let mut policy: Option<PolicyCode> = None;
    let mut term: Option<TermCode> = None;

    for (index, raw) in text.lines().enumerate() {
        let line = index as u32 + 1;
        let err = |message: String| PolicyError::AssembleError { line, message };
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let (mnemonic, operand) = match raw.split_once(' ') {
            Some((m, rest)) => (m, rest.trim()),
            None => (raw, ""),
        };

        if let Some(current) = term.as_mut() {
            if mnemonic == "TERM_END" {
                if let (Some(p), Some(t)) = (policy.as_mut(), term.take()) {
                    p.terms.push(t);
                }
            } else {
                let instr = instruction(mnemonic, operand).map_err(|e| err(e.to_string()))?;
                current.instrs.push(instr);
            }
            continue;
        }

        match (mnemonic, policy.is_some()) {
            ("TERM_START", true) => {
                term = Some(TermCode {
                    name: required(operand).map_err(err)?,
                    instrs: Vec::new(),
                });
            }
            ("POLICY_END", true) => {
                if let Some(done) = policy.take() {
                    match section {
                        Section::Main => program.policies.push(done),
                        Section::Subroutines => {
                            program.subroutines.insert(done.name.clone(), done);
                        }
                    }
                }
            }
            ("POLICY_START", false) => {
                policy = Some(PolicyCode {
                    name: required(operand).map_err(err)?,
                    terms: Vec::new(),
                });
            }
            ("SET", false) if section == Section::Main && program.policies.is_empty() => {
                let (name, value) = set_declaration(operand).map_err(|e| err(e.to_string()))?;
                program.sets.insert(name, value);
            }
            ("SUBR_START", false) if section == Section::Main => section = Section::Subroutines,
            ("SUBR_END", false) if section == Section::Subroutines => section = Section::Main,
            _ => return Err(err(format!("unexpected {mnemonic}"))),
        }
    }

    if term.is_some() || policy.is_some() || section != Section::Main {
        return Err(PolicyError::AssembleError {
            line: text.lines().count() as u32,
            message: "unterminated program".to_string(),
        });
    }
    debug!(
        event = "Filter",
        phase = "Assemble",
        policies = program.policies.len(),
        subroutines = program.subroutines.len(),
        sets = program.sets.len(),
        instructions = program.instruction_count()
    );
    Ok(program)
}

fn required(operand: &str) -> Result<String, String> {
    if operand.is_empty() {
        Err("missing name".to_string())
    } else {
        Ok(operand.to_string())
    }
}

fn instruction(mnemonic: &str, operand: &str) -> Result<Instr, PolicyError> {
    let id = || {
        operand
            .parse()
            .map_err(|_| PolicyError::ValueError(format!("bad variable id {operand:?}")))
    };
    let instr = match mnemonic {
        "PUSH" => Instr::Push(ValueTypedLiteral::from_str(operand)?.0),
        "PUSH_SET" => Instr::PushSet(operand.to_string()),
        "LOAD" => Instr::Load(id()?),
        "STORE" => Instr::Store(id()?),
        "ONFALSE_EXIT" => Instr::OnFalseExit,
        "ACCEPT" => Instr::Accept,
        "REJECT" => Instr::Reject,
        "NEXT" => Instr::Next(
            FlowTarget::from_str(operand)
                .map_err(|_| PolicyError::ValueError(format!("bad NEXT target {operand:?}")))?,
        ),
        "POLICY" => Instr::Call(operand.to_string()),
        other => Instr::Op(
            Op::from_str(other)
                .map_err(|_| PolicyError::ValueError(format!("unknown instruction {other}")))?,
        ),
    };
    Ok(instr)
}

/// `<type> <name> <elements>`
fn set_declaration(operand: &str) -> Result<(String, Value), PolicyError> {
    let mut parts = operand.splitn(3, ' ');
    let (Some(ty), Some(name), Some(elements)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(PolicyError::ValueError(format!(
            "malformed set declaration {operand:?}"
        )));
    };
    let ty = ValueType::from_str(ty)
        .map_err(|_| PolicyError::ValueError(format!("unknown type {ty}")))?;
    Ok((name.to_string(), Value::create(ty, &unquote(elements)?)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    const PROGRAM: &str = r#"SET set_u32 tags "1,2"
POLICY_START foo
TERM_START foo2
PUSH u32 10
LOAD 17
LT
ONFALSE_EXIT
PUSH u32 200
STORE 17
ACCEPT
TERM_END
TERM_START t2
PUSH_SET tags
POLICY sub
NEXT POLICY
TERM_END
POLICY_END
SUBR_START
POLICY_START sub
TERM_START s
PUSH txt "a b"
REJECT
TERM_END
POLICY_END
SUBR_END
"#;

    #[test]
    fn test_assemble_program() {
        let program = assemble(PROGRAM).unwrap();
        assert_eq!(
            program.sets["tags"],
            Value::create(ValueType::SetU32, "1,2").unwrap()
        );
        assert_eq!(program.policies.len(), 1);
        let terms = &program.policies[0].terms;
        assert_eq!(terms[0].name, "foo2");
        assert_eq!(
            terms[0].instrs,
            vec![
                Instr::Push(Value::U32(10)),
                Instr::Load(17),
                Instr::Op(Op::Lt),
                Instr::OnFalseExit,
                Instr::Push(Value::U32(200)),
                Instr::Store(17),
                Instr::Accept,
            ]
        );
        assert_eq!(
            terms[1].instrs,
            vec![
                Instr::PushSet("tags".into()),
                Instr::Call("sub".into()),
                Instr::Next(FlowTarget::Policy),
            ]
        );
        let sub = &program.subroutines["sub"];
        assert_eq!(sub.terms[0].instrs[0], Instr::Push(Value::Str("a b".into())));
        assert_eq!(program.instruction_count(), 12);
    }

    #[test]
    fn test_instruction_display_reassembles() {
        let program = assemble(PROGRAM).unwrap();
        for instr in program.policies.iter().flat_map(|p| &p.terms).flat_map(|t| &t.instrs) {
            let text = instr.to_string();
            let (m, rest) = text.split_once(" ").unwrap_or((text.as_str(), ""));
            assert_eq!(&instruction(m, rest).unwrap(), instr, "{text}");
        }
    }

    #[test]
    fn test_empty_text_is_empty_program() {
        assert!(assemble("").unwrap().is_empty());
    }

    #[parameterized(
        unknown_mnemonic = { "POLICY_START p\nTERM_START t\nFROB\nTERM_END\nPOLICY_END\n", 3 },
        term_outside_policy = { "TERM_START t\n", 1 },
        unterminated = { "POLICY_START p\nTERM_START t\n", 2 },
        bad_push = { "POLICY_START p\nTERM_START t\nPUSH u32 x\n", 3 },
        set_after_code = { "POLICY_START p\nPOLICY_END\nSET u32 x 1\n", 3 },
        nested_policy = { "POLICY_START p\nPOLICY_START q\n", 2 },
    )]
    fn test_assemble_errors(text: &str, line: u32) {
        let err = assemble(text).unwrap_err();
        assert_eq!(err.line(), Some(line), "{err}");
    }
}
