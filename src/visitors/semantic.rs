//! Semantic checking of a policy instantiated for one protocol and direction.
//!
//! Every expression is evaluated on values fabricated by [`SemanticVarRW`],
//! so operand types are validated by the same operator dispatch that runs
//! at filter time. In export policies the source block is checked in the
//! context of the protocol it matches, dest and action blocks in the
//! context of the exporting protocol.

use tracing::debug;

use crate::ast::{FlowTarget, Node, Visitor};
use crate::error::PolicyError;
use crate::operators::{self, Op};
use crate::policy::{PolicyMap, PolicyStatement, Term};
use crate::set_map::SetMap;
use crate::types::{Direction, Value, ValueType};
use crate::var_map::VarMap;
use crate::varrw::{SemanticVarRW, VarRW};

use super::source_protocol;

pub struct SemanticChecker<'a> {
    varmap: &'a VarMap,
    sets: &'a SetMap,
    policies: &'a PolicyMap,
    varrw: SemanticVarRW<'a>,
    direction: Direction,
    in_source: bool,
    subroutines: Vec<String>,
}

/// Check `policy` as if compiled for `protocol` in `direction`.
pub fn check(
    policy: &PolicyStatement,
    protocol: &str,
    direction: Direction,
    varmap: &VarMap,
    sets: &SetMap,
    policies: &PolicyMap,
) -> Result<(), PolicyError> {
    SemanticChecker::new(varmap, sets, policies, protocol, direction).check(policy)
}

impl<'a> SemanticChecker<'a> {
    pub fn new(
        varmap: &'a VarMap,
        sets: &'a SetMap,
        policies: &'a PolicyMap,
        protocol: &str,
        direction: Direction,
    ) -> Self {
        SemanticChecker {
            varmap,
            sets,
            policies,
            varrw: SemanticVarRW::new(varmap, protocol),
            direction,
            in_source: false,
            subroutines: Vec::new(),
        }
    }

    pub fn check(&mut self, policy: &PolicyStatement) -> Result<(), PolicyError> {
        debug!(
            event = "Compile",
            phase = "Semantic",
            policy = policy.name(),
            protocol = self.varrw.protocol(),
            direction = %self.direction
        );
        if !self.varmap.protocol_known(self.varrw.protocol()) {
            return Err(PolicyError::semantic(
                0,
                format!("unknown protocol {}", self.varrw.protocol()),
            ));
        }
        for term in policy.terms() {
            let result = self.check_term(policy.name(), term);
            self.varrw.sync();
            result?;
        }
        Ok(())
    }

    fn check_term(&mut self, policy: &str, term: &Term) -> Result<(), PolicyError> {
        if self.direction == Direction::Import {
            if let Some(node) = term.dest().next() {
                return Err(PolicyError::semantic(
                    node.line,
                    format!(
                        "dest block in term {} of policy {policy} used for import",
                        term.name()
                    ),
                ));
            }
            self.match_block(term.source())?;
        } else {
            let source = source_protocol(policy, term)?;
            if !self.varmap.protocol_known(source) {
                return Err(PolicyError::semantic(
                    term.source()
                        .find(|n| n.is_protocol_match())
                        .map(|n| n.line)
                        .unwrap_or(0),
                    format!("unknown protocol {source}"),
                ));
            }
            let home = self.varrw.protocol().to_string();
            self.varrw.set_protocol(source);
            self.in_source = true;
            let result = self.match_block(term.source());
            self.in_source = false;
            self.varrw.set_protocol(&home);
            result?;
            self.match_block(term.dest())?;
        }
        self.action_block(term.action())
    }

    fn match_block<'n>(&mut self, nodes: impl Iterator<Item = &'n Node>) -> Result<(), PolicyError> {
        for node in nodes {
            if node.is_action() {
                return Err(PolicyError::semantic(
                    node.line,
                    "actions are only allowed in the action block",
                ));
            }
            let value = node.accept(self)?;
            if !node.is_protocol_match() && value.value_type() != ValueType::Bool {
                return Err(PolicyError::semantic(
                    node.line,
                    format!("match statement must be bool, not {}", value.value_type()),
                ));
            }
        }
        Ok(())
    }

    fn action_block<'n>(
        &mut self,
        nodes: impl Iterator<Item = &'n Node>,
    ) -> Result<(), PolicyError> {
        for node in nodes {
            if !node.is_action() {
                return Err(PolicyError::semantic(
                    node.line,
                    "action block statements must be assignments, accept, reject or next",
                ));
            }
            node.accept(self)?;
        }
        Ok(())
    }

    fn variable_id(&self, node: &Node, name: &str) -> Result<u32, PolicyError> {
        self.varmap
            .variable(self.varrw.protocol(), name)
            .map(|v| v.id)
            .map_err(|e| e.at_line(node.line))
    }
}

impl Visitor for SemanticChecker<'_> {
    type Output = Value;

    fn visit_unary(&mut self, node: &Node, op: Op, child: &Node) -> Result<Value, PolicyError> {
        let value = child.accept(self)?;
        operators::eval(op, &[&value]).map_err(|e| e.at_line(node.line))
    }

    fn visit_binary(
        &mut self,
        node: &Node,
        op: Op,
        left: &Node,
        right: &Node,
    ) -> Result<Value, PolicyError> {
        let l = left.accept(self)?;
        let r = right.accept(self)?;
        operators::eval(op, &[&l, &r]).map_err(|e| e.at_line(node.line))
    }

    fn visit_assign(
        &mut self,
        node: &Node,
        var: &str,
        modifier: Option<Op>,
        rvalue: &Node,
    ) -> Result<Value, PolicyError> {
        let value = rvalue.accept(self)?;
        let id = self.variable_id(node, var)?;
        let value = match modifier {
            Some(op) if !op.is_modifier() => {
                return Err(PolicyError::semantic(
                    node.line,
                    format!("{} is not an assignment modifier", op.symbol()),
                ));
            }
            Some(op) => {
                let current = self.varrw.read(id).map_err(|e| e.at_line(node.line))?;
                operators::eval(op, &[&current, &value]).map_err(|e| e.at_line(node.line))?
            }
            None => value,
        };
        self.varrw
            .write(id, value)
            .map_err(|e| e.at_line(node.line))?;
        Ok(Value::Bool(true))
    }

    fn visit_var(&mut self, node: &Node, name: &str) -> Result<Value, PolicyError> {
        let id = self.variable_id(node, name)?;
        self.varrw.read(id).map_err(|e| e.at_line(node.line))
    }

    fn visit_set(&mut self, node: &Node, name: &str) -> Result<Value, PolicyError> {
        match self.sets.get(name) {
            Ok(Some(value)) => Ok(value.clone()),
            Ok(None) => Err(PolicyError::semantic(
                node.line,
                format!("set {name} has no value"),
            )),
            Err(_) => Err(PolicyError::semantic(
                node.line,
                format!("set not found: {name}"),
            )),
        }
    }

    fn visit_literal(&mut self, _: &Node, value: &Value) -> Result<Value, PolicyError> {
        Ok(value.clone())
    }

    fn visit_regex(
        &mut self,
        node: &Node,
        pattern: &str,
        subject: &Node,
    ) -> Result<Value, PolicyError> {
        let subject = subject.accept(self)?;
        operators::eval(Op::Regex, &[&subject, &Value::Str(pattern.to_string())])
            .map_err(|e| e.at_line(node.line))
    }

    fn visit_accept(&mut self, _: &Node) -> Result<Value, PolicyError> {
        Ok(Value::Bool(true))
    }

    fn visit_reject(&mut self, _: &Node) -> Result<Value, PolicyError> {
        Ok(Value::Bool(true))
    }

    fn visit_next(&mut self, _: &Node, _: FlowTarget) -> Result<Value, PolicyError> {
        Ok(Value::Bool(true))
    }

    fn visit_protocol(&mut self, node: &Node, protocol: &str) -> Result<Value, PolicyError> {
        if self.direction == Direction::Import || !self.in_source {
            return Err(PolicyError::semantic(
                node.line,
                format!(
                    "protocol {protocol} can only be matched in the source block of an export policy"
                ),
            ));
        }
        Ok(Value::Bool(true))
    }

    fn visit_subroutine(&mut self, node: &Node, name: &str) -> Result<Value, PolicyError> {
        let policies = self.policies;
        let sub = policies
            .get(name)
            .map_err(|_| PolicyError::semantic(node.line, format!("policy not found: {name}")))?;
        if self.subroutines.iter().any(|s| s == name) {
            return Err(PolicyError::semantic(
                node.line,
                format!("recursive subroutine call to {name}"),
            ));
        }

        let saved = (self.direction, self.in_source);
        self.direction = Direction::Import;
        self.in_source = false;
        self.subroutines.push(name.to_string());
        let result = sub.terms().try_for_each(|term| self.check_term(name, term));
        self.subroutines.pop();
        (self.direction, self.in_source) = saved;

        result.map(|()| Value::Bool(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{PolicyParser, StatementParser};
    use crate::policy::{Block, Statement};
    use crate::types::ConfigNodeId;
    use crate::var_map::Access;
    use yare::parameterized;

    fn varmap() -> VarMap {
        let mut vm = VarMap::new();
        for protocol in ["bgp", "rip"] {
            vm.add_varmap(protocol, "med", ValueType::U32, Access::ReadWrite, 10)
                .unwrap();
            vm.add_varmap(protocol, "network4", ValueType::Ipv4Net, Access::Read, 11)
                .unwrap();
        }
        vm.add_varmap("bgp", "as-path", ValueType::Str, Access::ReadWrite, 12)
            .unwrap();
        vm
    }

    fn sets() -> SetMap {
        let mut sets = SetMap::new();
        sets.create("nets").unwrap();
        sets.update(ValueType::SetIpv4Net, "nets", "10.0.0.0/8")
            .unwrap();
        sets.create("unfilled").unwrap();
        sets
    }

    fn term(name: &str, order: u64, blocks: &[(Block, &str)]) -> Term {
        let mut term = Term::new(name, ConfigNodeId::new(order, order.saturating_sub(1)));
        for (i, (block, text)) in blocks.iter().enumerate() {
            term.set_statement(
                *block,
                ConfigNodeId::new(1000 * order + i as u64 + 1, 0),
                Statement {
                    text: text.to_string(),
                    nodes: StatementParser.parse(text).unwrap(),
                },
            );
        }
        term
    }

    fn policy(name: &str, terms: Vec<Term>) -> PolicyStatement {
        let mut policy = PolicyStatement::new(name);
        for t in terms {
            policy.add_term(t).unwrap();
        }
        policy
    }

    fn check_one(
        blocks: &[(Block, &str)],
        protocol: &str,
        direction: Direction,
    ) -> Result<(), PolicyError> {
        let p = policy("p", vec![term("t1", 1, blocks)]);
        check(&p, protocol, direction, &varmap(), &sets(), &PolicyMap::new())
    }

    #[parameterized(
        import_basic = { &[(Block::Source, "med < 100 and network4 <= SET nets"), (Block::Action, "med = 5; accept")], Direction::Import },
        compound = { &[(Block::Action, "med += 10")], Direction::Import },
        regex = { &[(Block::Source, "as-path matches \"^65001\""), (Block::Action, "reject")], Direction::Import },
        export_basic = { &[(Block::Source, "protocol rip; med == 1"), (Block::Dest, "as-path == \"x\""), (Block::Action, "accept")], Direction::Export },
        tags = { &[(Block::Action, "policytags += 7; tag = 3")], Direction::Import },
    )]
    fn test_accepts(blocks: &[(Block, &str)], direction: Direction) {
        check_one(blocks, "bgp", direction).unwrap();
    }

    #[test]
    fn test_dest_in_import() {
        let err = check_one(
            &[(Block::Dest, "med == 1"), (Block::Action, "accept")],
            "bgp",
            Direction::Import,
        )
        .unwrap_err();
        assert!(err.to_string().contains("dest block"), "{err}");
    }

    #[test]
    fn test_protocol_redefined() {
        let err = check_one(
            &[(Block::Source, "protocol = \"bgp\"; protocol = \"rip\"")],
            "bgp",
            Direction::Export,
        )
        .unwrap_err();
        assert!(err.to_string().contains("protocol redefined"), "{err}");
    }

    #[parameterized(
        missing_protocol = { &[(Block::Source, "med == 1")], Direction::Export, "no protocol match" },
        protocol_in_import = { &[(Block::Source, "protocol bgp")], Direction::Import, "can only be matched" },
        unknown_source = { &[(Block::Source, "protocol ospf")], Direction::Export, "unknown protocol" },
        unknown_variable = { &[(Block::Source, "nope == 1")], Direction::Import, "unknown variable" },
        read_only = { &[(Block::Action, "network4 = 10.0.0.0/8")], Direction::Import, "read-only" },
        type_mismatch = { &[(Block::Action, "as-path = 5")], Direction::Import, "type mismatch" },
        bad_operator = { &[(Block::Source, "med and true")], Direction::Import, "operator and" },
        non_bool_match = { &[(Block::Source, "med + 1")], Direction::Import, "must be bool" },
        action_in_source = { &[(Block::Source, "accept")], Direction::Import, "only allowed in the action" },
        test_in_action = { &[(Block::Action, "med == 1")], Direction::Import, "action block statements" },
        bad_regex = { &[(Block::Source, "as-path matches \"(\"")], Direction::Import, "regex" },
        missing_set = { &[(Block::Source, "network4 <= SET nonexistent-set")], Direction::Import, "set not found: nonexistent-set" },
        empty_set = { &[(Block::Source, "network4 <= SET unfilled")], Direction::Import, "has no value" },
        source_var_of_other_protocol = { &[(Block::Source, "protocol rip; as-path == \"x\"")], Direction::Export, "unknown variable as-path in rip" },
    )]
    fn test_rejects(blocks: &[(Block, &str)], direction: Direction, expected: &str) {
        let err = check_one(blocks, "bgp", direction).unwrap_err();
        assert!(
            matches!(err, PolicyError::SemanticError { .. }),
            "{err:?}"
        );
        assert!(err.to_string().contains(expected), "{err}");
    }

    #[test]
    fn test_error_carries_line() {
        let err = check_one(
            &[(Block::Source, "med == 1;\n\nmed == \"x\"")],
            "bgp",
            Direction::Import,
        )
        .unwrap_err();
        assert_eq!(err.line(), Some(3));
    }

    #[test]
    fn test_subroutines() {
        let vm = varmap();
        let sets = sets();
        let mut policies = PolicyMap::new();
        policies.create("sub").unwrap();
        policies
            .replace(policy(
                "sub",
                vec![term("s1", 1, &[(Block::Source, "med > 5"), (Block::Action, "accept")])],
            ))
            .unwrap();
        policies.create("loop").unwrap();
        policies
            .replace(policy("loop", vec![term("l1", 1, &[(Block::Source, "policy loop")])]))
            .unwrap();
        policies.create("with-dest").unwrap();
        policies
            .replace(policy(
                "with-dest",
                vec![term("d1", 1, &[(Block::Dest, "med == 1")])],
            ))
            .unwrap();

        let caller = policy("p", vec![term("t1", 1, &[(Block::Source, "policy sub")])]);
        check(&caller, "bgp", Direction::Import, &vm, &sets, &policies).unwrap();

        let looping = policies.get("loop").unwrap();
        let err = check(looping, "bgp", Direction::Import, &vm, &sets, &policies).unwrap_err();
        assert!(err.to_string().contains("recursive"), "{err}");

        let bad = policy("p", vec![term("t1", 1, &[(Block::Source, "policy with-dest")])]);
        let err = check(&bad, "bgp", Direction::Import, &vm, &sets, &policies).unwrap_err();
        assert!(err.to_string().contains("dest block"), "{err}");

        let missing = policy("p", vec![term("t1", 1, &[(Block::Source, "policy ghost")])]);
        assert!(check(&missing, "bgp", Direction::Import, &vm, &sets, &policies).is_err());
    }

    #[test]
    fn test_export_dest_uses_exporting_protocol() {
        // as-path only exists in bgp: fine in dest of a bgp export, whatever the source
        check_one(
            &[
                (Block::Source, "protocol rip; med == 1"),
                (Block::Dest, "as-path == \"x\""),
            ],
            "bgp",
            Direction::Export,
        )
        .unwrap();
        let err = check_one(
            &[(Block::Source, "protocol bgp"), (Block::Dest, "as-path == \"x\"")],
            "rip",
            Direction::Export,
        )
        .unwrap_err();
        assert!(err.to_string().contains("as-path"), "{err}");
    }
}
