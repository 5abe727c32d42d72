//! Collects the sets and sub-policies a policy references.

use std::collections::BTreeSet;

use tracing::debug;

use crate::ast::{FlowTarget, Node, Visitor};
use crate::error::PolicyError;
use crate::operators::Op;
use crate::policy::{PolicyMap, PolicyStatement};
use crate::set_map::SetMap;
use crate::types::Value;

pub struct DependencyCollector<'a> {
    sets: &'a SetMap,
    policies: &'a PolicyMap,
    found_sets: BTreeSet<String>,
    found_policies: BTreeSet<String>,
}

/// Sets and sub-policies referenced anywhere in `policy`.
///
/// Fails on the first reference to a set or policy that does not exist.
pub fn collect(
    policy: &PolicyStatement,
    sets: &SetMap,
    policies: &PolicyMap,
) -> Result<(BTreeSet<String>, BTreeSet<String>), PolicyError> {
    let mut collector = DependencyCollector {
        sets,
        policies,
        found_sets: BTreeSet::new(),
        found_policies: BTreeSet::new(),
    };
    for node in policy.nodes() {
        node.accept(&mut collector)?;
    }
    debug!(
        event = "Compile",
        phase = "Dependencies",
        policy = policy.name(),
        sets = ?collector.found_sets,
        policies = ?collector.found_policies
    );
    Ok((collector.found_sets, collector.found_policies))
}

impl Visitor for DependencyCollector<'_> {
    type Output = ();

    fn visit_unary(&mut self, _: &Node, _: Op, child: &Node) -> Result<(), PolicyError> {
        child.accept(self)
    }

    fn visit_binary(
        &mut self,
        _: &Node,
        _: Op,
        left: &Node,
        right: &Node,
    ) -> Result<(), PolicyError> {
        left.accept(self)?;
        right.accept(self)
    }

    fn visit_assign(
        &mut self,
        _: &Node,
        _: &str,
        _: Option<Op>,
        rvalue: &Node,
    ) -> Result<(), PolicyError> {
        rvalue.accept(self)
    }

    fn visit_var(&mut self, _: &Node, _: &str) -> Result<(), PolicyError> {
        Ok(())
    }

    fn visit_set(&mut self, node: &Node, name: &str) -> Result<(), PolicyError> {
        if !self.sets.exists(name) {
            return Err(PolicyError::dependency(
                node.line,
                format!("set not found: {name}"),
            ));
        }
        self.found_sets.insert(name.to_string());
        Ok(())
    }

    fn visit_literal(&mut self, _: &Node, _: &Value) -> Result<(), PolicyError> {
        Ok(())
    }

    fn visit_regex(&mut self, _: &Node, _: &str, subject: &Node) -> Result<(), PolicyError> {
        subject.accept(self)
    }

    fn visit_accept(&mut self, _: &Node) -> Result<(), PolicyError> {
        Ok(())
    }

    fn visit_reject(&mut self, _: &Node) -> Result<(), PolicyError> {
        Ok(())
    }

    fn visit_next(&mut self, _: &Node, _: FlowTarget) -> Result<(), PolicyError> {
        Ok(())
    }

    fn visit_protocol(&mut self, _: &Node, _: &str) -> Result<(), PolicyError> {
        Ok(())
    }

    fn visit_subroutine(&mut self, node: &Node, policy: &str) -> Result<(), PolicyError> {
        if !self.policies.exists(policy) {
            return Err(PolicyError::dependency(
                node.line,
                format!("policy not found: {policy}"),
            ));
        }
        self.found_policies.insert(policy.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{PolicyParser, StatementParser};
    use crate::policy::{Block, Statement, Term};
    use crate::types::{ConfigNodeId, ValueType};

    fn policy_with(source: &str, action: &str) -> PolicyStatement {
        let mut term = Term::new("t1", ConfigNodeId::new(1, 0));
        for (block, text, id) in [(Block::Source, source, 2), (Block::Action, action, 3)] {
            term.set_statement(
                block,
                ConfigNodeId::new(id, 0),
                Statement {
                    text: text.to_string(),
                    nodes: StatementParser.parse(text).unwrap(),
                },
            );
        }
        let mut policy = PolicyStatement::new("p");
        policy.add_term(term).unwrap();
        policy
    }

    #[test]
    fn test_collects_sets_and_subroutines() {
        let mut sets = SetMap::new();
        sets.create("nets").unwrap();
        sets.create("tags").unwrap();
        sets.update(ValueType::SetU32, "tags", "1").unwrap();
        let mut policies = PolicyMap::new();
        policies.create("common").unwrap();

        let policy = policy_with(
            "network4 <= SET nets and policy common",
            "policytags = policytags + SET tags",
        );
        let (found_sets, found_policies) = collect(&policy, &sets, &policies).unwrap();
        assert_eq!(found_sets.into_iter().collect::<Vec<_>>(), vec!["nets", "tags"]);
        assert_eq!(found_policies.into_iter().collect::<Vec<_>>(), vec!["common"]);
    }

    #[test]
    fn test_missing_set_reports_name_and_line() {
        let policy = policy_with("med == 1;\nnetwork4 <= SET missing", "accept");
        let err = collect(&policy, &SetMap::new(), &PolicyMap::new()).unwrap_err();
        assert_eq!(
            err,
            PolicyError::DependencyError {
                line: 2,
                message: "set not found: missing".to_string()
            }
        );
    }

    #[test]
    fn test_missing_subroutine() {
        let policy = policy_with("policy nowhere", "accept");
        let err = collect(&policy, &SetMap::new(), &PolicyMap::new()).unwrap_err();
        assert!(err.to_string().contains("policy not found: nowhere"));
    }
}
