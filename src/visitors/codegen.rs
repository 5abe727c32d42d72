//! Bytecode emission.
//!
//! [`CodeGenerator`] turns statements into instruction text. Operands are
//! emitted right before left so the machine pops them in left-to-right
//! order. Every match statement is followed by `ONFALSE_EXIT`, leaving the
//! term as soon as one condition is false.
//!
//! [`generate`] is the plain generator used for import policies; the export
//! generators reuse the emitter with their own term framing.

use std::collections::BTreeSet;
use std::fmt::Display;

use tracing::debug;

use crate::ast::{FlowTarget, Node, Visitor};
use crate::code::{Code, CodeTarget};
use crate::error::PolicyError;
use crate::operators::Op;
use crate::policy::{PolicyMap, PolicyStatement};
use crate::types::{Direction, Value, quote};
use crate::var_map::VarMap;
use crate::varrw::VarId;

pub struct CodeGenerator<'a> {
    varmap: &'a VarMap,
    policies: &'a PolicyMap,
    protocol: String,
    code: Code,
    called: BTreeSet<String>,
}

/// Compile an import policy for `protocol`.
///
/// # Panics
/// If a term has a dest block; import policies with one never pass the
/// semantic check.
pub fn generate(
    policy: &PolicyStatement,
    protocol: &str,
    varmap: &VarMap,
    policies: &PolicyMap,
) -> Result<Code, PolicyError> {
    let mut generator = CodeGenerator::new(
        varmap,
        policies,
        CodeTarget::new(protocol, Direction::Import),
    );
    generator.plain_policy(policy)?;
    generator.finish()
}

impl<'a> CodeGenerator<'a> {
    pub fn new(varmap: &'a VarMap, policies: &'a PolicyMap, target: CodeTarget) -> Self {
        CodeGenerator {
            varmap,
            policies,
            protocol: target.protocol.clone(),
            code: Code::new(target),
            called: BTreeSet::new(),
        }
    }

    pub fn code_mut(&mut self) -> &mut Code {
        &mut self.code
    }

    pub fn emit(&mut self, instruction: impl Display) {
        self.code.code.push_str(&instruction.to_string());
        self.code.code.push('\n');
    }

    /// Emit a block of conditions, each followed by `ONFALSE_EXIT`.
    ///
    /// Protocol matches emit nothing: the fragment's target already fixes
    /// the protocol.
    pub fn match_block<'n>(
        &mut self,
        nodes: impl Iterator<Item = &'n Node>,
    ) -> Result<(), PolicyError> {
        for node in nodes.filter(|n| !n.is_protocol_match()) {
            node.accept(self)?;
            self.emit("ONFALSE_EXIT");
        }
        Ok(())
    }

    pub fn action_block<'n>(
        &mut self,
        nodes: impl Iterator<Item = &'n Node>,
    ) -> Result<(), PolicyError> {
        for node in nodes {
            node.accept(self)?;
        }
        Ok(())
    }

    /// `POLICY_START` .. `POLICY_END` with source and action blocks per term.
    fn plain_policy(&mut self, policy: &PolicyStatement) -> Result<(), PolicyError> {
        self.emit(format!("POLICY_START {}", policy.name()));
        for term in policy.terms() {
            if term.has_dest() {
                panic!(
                    "dest block in term {} of {} reached the import code generator",
                    term.name(),
                    policy.name()
                );
            }
            self.emit(format!("TERM_START {}", term.name()));
            self.match_block(term.source())?;
            self.action_block(term.action())?;
            self.emit("TERM_END");
        }
        self.emit("POLICY_END");
        Ok(())
    }

    /// Compile every subroutine called so far, transitively, and hand back
    /// the finished code.
    pub fn finish(mut self) -> Result<Code, PolicyError> {
        let policies = self.policies;
        let mut pending: Vec<String> = std::mem::take(&mut self.called).into_iter().collect();
        while let Some(name) = pending.pop() {
            if self.code.subroutines.contains_key(&name) {
                continue;
            }
            let sub = policies.get(&name)?;
            let mut generator = CodeGenerator::new(
                self.varmap,
                policies,
                CodeTarget::new(&self.protocol, self.code.target.direction),
            );
            generator.plain_policy(sub)?;
            self.code.sets.extend(generator.code.sets);
            pending.extend(generator.called);
            self.code.subroutines.insert(name, generator.code.code);
        }
        debug!(
            event = "Compile",
            phase = "Codegen",
            target = %self.code.target,
            instructions = self.code.code.lines().count(),
            subroutines = self.code.subroutines.len()
        );
        Ok(self.code)
    }

    fn variable_id(&self, node: &Node, name: &str) -> Result<VarId, PolicyError> {
        self.varmap
            .variable(&self.protocol, name)
            .map(|v| v.id)
            .map_err(|e| e.at_line(node.line))
    }
}

impl Visitor for CodeGenerator<'_> {
    type Output = ();

    fn visit_unary(&mut self, _: &Node, op: Op, child: &Node) -> Result<(), PolicyError> {
        child.accept(self)?;
        self.emit(op);
        Ok(())
    }

    fn visit_binary(
        &mut self,
        _: &Node,
        op: Op,
        left: &Node,
        right: &Node,
    ) -> Result<(), PolicyError> {
        right.accept(self)?;
        left.accept(self)?;
        self.emit(op);
        Ok(())
    }

    fn visit_assign(
        &mut self,
        node: &Node,
        var: &str,
        modifier: Option<Op>,
        rvalue: &Node,
    ) -> Result<(), PolicyError> {
        let id = self.variable_id(node, var)?;
        rvalue.accept(self)?;
        if let Some(op) = modifier {
            self.emit(format!("LOAD {id}"));
            self.emit(op);
        }
        self.emit(format!("STORE {id}"));
        Ok(())
    }

    fn visit_var(&mut self, node: &Node, name: &str) -> Result<(), PolicyError> {
        let id = self.variable_id(node, name)?;
        self.emit(format!("LOAD {id}"));
        Ok(())
    }

    fn visit_set(&mut self, _: &Node, name: &str) -> Result<(), PolicyError> {
        self.code.sets.insert(name.to_string());
        self.emit(format!("PUSH_SET {name}"));
        Ok(())
    }

    fn visit_literal(&mut self, _: &Node, value: &Value) -> Result<(), PolicyError> {
        self.emit(format!("PUSH {} {}", value.value_type(), value.to_bytecode()));
        Ok(())
    }

    fn visit_regex(&mut self, _: &Node, pattern: &str, subject: &Node) -> Result<(), PolicyError> {
        self.emit(format!("PUSH txt {}", quote(pattern)));
        subject.accept(self)?;
        self.emit(Op::Regex);
        Ok(())
    }

    fn visit_accept(&mut self, _: &Node) -> Result<(), PolicyError> {
        self.emit("ACCEPT");
        Ok(())
    }

    fn visit_reject(&mut self, _: &Node) -> Result<(), PolicyError> {
        self.emit("REJECT");
        Ok(())
    }

    fn visit_next(&mut self, _: &Node, target: FlowTarget) -> Result<(), PolicyError> {
        self.emit(format!("NEXT {target}"));
        Ok(())
    }

    fn visit_protocol(&mut self, _: &Node, _: &str) -> Result<(), PolicyError> {
        Ok(())
    }

    fn visit_subroutine(&mut self, _: &Node, policy: &str) -> Result<(), PolicyError> {
        self.called.insert(policy.to_string());
        self.emit(format!("POLICY {policy}"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Block;
    use crate::types::ValueType;
    use crate::var_map::Access;
    use crate::visitors::fixtures::term;

    fn varmap() -> VarMap {
        let mut vm = VarMap::new();
        vm.add_varmap("bgp", "med", ValueType::U32, Access::ReadWrite, 17)
            .unwrap();
        vm.add_varmap("bgp", "network4", ValueType::Ipv4Net, Access::Read, 18)
            .unwrap();
        vm.add_varmap("bgp", "as-path", ValueType::Str, Access::ReadWrite, 19)
            .unwrap();
        vm
    }

    #[test]
    fn test_plain_policy() {
        let mut policy = PolicyStatement::new("foo");
        policy
            .add_term(term(
                "foo2",
                (1, 0),
                &[
                    (Block::Source, "med < 10 and network4 <= SET nets"),
                    (Block::Action, "med = 200; accept"),
                ],
            ))
            .unwrap();
        policy
            .add_term(term("last", (2, 1), &[(Block::Action, "med += 1; next policy")]))
            .unwrap();

        let code = generate(&policy, "bgp", &varmap(), &PolicyMap::new()).unwrap();
        assert_eq!(code.target, CodeTarget::new("bgp", Direction::Import));
        assert!(code.sets.contains("nets"));
        insta::assert_snapshot!(code.code, @r"
        POLICY_START foo
        TERM_START foo2
        PUSH_SET nets
        LOAD 18
        LE
        PUSH u32 10
        LOAD 17
        LT
        AND
        ONFALSE_EXIT
        PUSH u32 200
        STORE 17
        ACCEPT
        TERM_END
        TERM_START last
        PUSH u32 1
        LOAD 17
        ADD
        STORE 17
        NEXT POLICY
        TERM_END
        POLICY_END
        ");
    }

    #[test]
    fn test_regex_and_negation() {
        let mut policy = PolicyStatement::new("re");
        policy
            .add_term(term(
                "t",
                (1, 0),
                &[(Block::Source, "not as-path matches \"^65\\\"x\""), (Block::Action, "reject")],
            ))
            .unwrap();
        let code = generate(&policy, "bgp", &varmap(), &PolicyMap::new()).unwrap();
        insta::assert_snapshot!(code.code, @r#"
        POLICY_START re
        TERM_START t
        PUSH txt "^65\"x"
        LOAD 19
        REGEX
        NOT
        ONFALSE_EXIT
        REJECT
        TERM_END
        POLICY_END
        "#);
    }

    #[test]
    fn test_subroutines_compiled_transitively() {
        let mut policies = PolicyMap::new();
        for name in ["outer", "inner"] {
            policies.create(name).unwrap();
        }
        let mut outer = PolicyStatement::new("outer");
        outer
            .add_term(term("o", (1, 0), &[(Block::Source, "policy inner")]))
            .unwrap();
        policies.replace(outer).unwrap();
        let mut inner = PolicyStatement::new("inner");
        inner
            .add_term(term("i", (1, 0), &[(Block::Source, "network4 <= SET nets")]))
            .unwrap();
        policies.replace(inner).unwrap();

        let mut caller = PolicyStatement::new("caller");
        caller
            .add_term(term("c", (1, 0), &[(Block::Source, "policy outer"), (Block::Action, "accept")]))
            .unwrap();
        let code = generate(&caller, "bgp", &varmap(), &policies).unwrap();
        assert_eq!(
            code.subroutines.keys().cloned().collect::<Vec<_>>(),
            vec!["inner", "outer"]
        );
        assert!(code.sets.contains("nets"));
        assert!(code.code.contains("POLICY outer\nONFALSE_EXIT\n"));
    }

    #[test]
    #[should_panic(expected = "reached the import code generator")]
    fn test_dest_block_panics() {
        let mut policy = PolicyStatement::new("p");
        policy
            .add_term(term("t", (1, 0), &[(Block::Dest, "med == 1")]))
            .unwrap();
        let _ = generate(&policy, "bgp", &varmap(), &PolicyMap::new());
    }
}
