//! Renders statement trees back into parseable text.
//!
//! Nested operator expressions are parenthesized, so the output parses back
//! to the same tree regardless of operator precedence.

use crate::ast::{FlowTarget, Node, NodeKind, Visitor};
use crate::error::PolicyError;
use crate::operators::Op;
use crate::policy::{Block, PolicyStatement};
use crate::types::{Value, quote};

#[derive(Debug, Default)]
pub struct Printer;

impl Printer {
    pub fn print(node: &Node) -> Result<String, PolicyError> {
        node.accept(&mut Printer)
    }

    fn operand(&mut self, node: &Node) -> Result<String, PolicyError> {
        let text = node.accept(self)?;
        Ok(match node.kind {
            NodeKind::Unary { .. } | NodeKind::Binary { .. } | NodeKind::Regex { .. } => {
                format!("({text})")
            }
            _ => text,
        })
    }
}

/// Canonical text of a whole policy, terms and statements in order.
pub fn print_policy(policy: &PolicyStatement) -> Result<String, PolicyError> {
    let mut out = format!("policy-statement {} {{\n", policy.name());
    for term in policy.terms() {
        out.push_str(&format!("    term {} {{\n", term.name()));
        for block in [Block::Source, Block::Dest, Block::Action] {
            let statements: Vec<String> = term
                .nodes(block)
                .map(Printer::print)
                .collect::<Result<_, _>>()?;
            if statements.is_empty() {
                continue;
            }
            out.push_str(&format!("        {block} {{\n"));
            for statement in statements {
                out.push_str(&format!("            {statement};\n"));
            }
            out.push_str("        }\n");
        }
        out.push_str("    }\n");
    }
    out.push_str("}\n");
    Ok(out)
}

impl Visitor for Printer {
    type Output = String;

    fn visit_unary(&mut self, _: &Node, op: Op, child: &Node) -> Result<String, PolicyError> {
        Ok(format!("{} {}", op.symbol(), self.operand(child)?))
    }

    fn visit_binary(
        &mut self,
        _: &Node,
        op: Op,
        left: &Node,
        right: &Node,
    ) -> Result<String, PolicyError> {
        Ok(format!(
            "{} {} {}",
            self.operand(left)?,
            op.symbol(),
            self.operand(right)?
        ))
    }

    fn visit_assign(
        &mut self,
        _: &Node,
        var: &str,
        modifier: Option<Op>,
        rvalue: &Node,
    ) -> Result<String, PolicyError> {
        let op = modifier.map(|m| m.symbol()).unwrap_or("");
        Ok(format!("{var} {op}= {}", rvalue.accept(self)?))
    }

    fn visit_var(&mut self, _: &Node, name: &str) -> Result<String, PolicyError> {
        Ok(name.to_string())
    }

    fn visit_set(&mut self, _: &Node, name: &str) -> Result<String, PolicyError> {
        Ok(format!("SET {name}"))
    }

    fn visit_literal(&mut self, _: &Node, value: &Value) -> Result<String, PolicyError> {
        Ok(match value {
            Value::Str(s) => quote(s),
            other => other.to_string(),
        })
    }

    fn visit_regex(&mut self, _: &Node, pattern: &str, subject: &Node) -> Result<String, PolicyError> {
        Ok(format!("{} matches {}", self.operand(subject)?, quote(pattern)))
    }

    fn visit_accept(&mut self, _: &Node) -> Result<String, PolicyError> {
        Ok("accept".to_string())
    }

    fn visit_reject(&mut self, _: &Node) -> Result<String, PolicyError> {
        Ok("reject".to_string())
    }

    fn visit_next(&mut self, _: &Node, target: FlowTarget) -> Result<String, PolicyError> {
        Ok(format!("next {}", target.to_string().to_lowercase()))
    }

    fn visit_protocol(&mut self, _: &Node, protocol: &str) -> Result<String, PolicyError> {
        Ok(format!("protocol {protocol}"))
    }

    fn visit_subroutine(&mut self, _: &Node, policy: &str) -> Result<String, PolicyError> {
        Ok(format!("policy {policy}"))
    }
}
