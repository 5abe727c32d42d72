//! Policy abstract syntax tree and visitor dispatch.
//!
//! Each node exclusively owns its children, so a statement tree is dropped
//! with its root. Traversals implement [`Visitor`]; [`Node::accept`] calls
//! the visitor method matching the node's variant and the visitor decides
//! whether and in which order to descend into children.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::PolicyError;
use crate::operators::Op;
use crate::types::Value;

/// Control transfer target of a `next` statement.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum FlowTarget {
    Policy,
    Term,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    Unary {
        op: Op,
        child: Box<Node>,
    },
    Binary {
        op: Op,
        left: Box<Node>,
        right: Box<Node>,
    },
    Assign {
        var: String,
        modifier: Option<Op>,
        rvalue: Box<Node>,
    },
    Var(String),
    SetRef(String),
    Literal(Value),
    Regex {
        pattern: String,
        subject: Box<Node>,
    },
    Accept,
    Reject,
    Next(FlowTarget),
    ProtocolMatch(String),
    Subroutine(String),
}

/// A statement or expression node with the source line it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub line: u32,
    pub kind: NodeKind,
}

/// One method per node variant.
pub trait Visitor {
    type Output;

    fn visit_unary(&mut self, node: &Node, op: Op, child: &Node)
    -> Result<Self::Output, PolicyError>;
    fn visit_binary(
        &mut self,
        node: &Node,
        op: Op,
        left: &Node,
        right: &Node,
    ) -> Result<Self::Output, PolicyError>;
    fn visit_assign(
        &mut self,
        node: &Node,
        var: &str,
        modifier: Option<Op>,
        rvalue: &Node,
    ) -> Result<Self::Output, PolicyError>;
    fn visit_var(&mut self, node: &Node, name: &str) -> Result<Self::Output, PolicyError>;
    fn visit_set(&mut self, node: &Node, name: &str) -> Result<Self::Output, PolicyError>;
    fn visit_literal(&mut self, node: &Node, value: &Value) -> Result<Self::Output, PolicyError>;
    fn visit_regex(
        &mut self,
        node: &Node,
        pattern: &str,
        subject: &Node,
    ) -> Result<Self::Output, PolicyError>;
    fn visit_accept(&mut self, node: &Node) -> Result<Self::Output, PolicyError>;
    fn visit_reject(&mut self, node: &Node) -> Result<Self::Output, PolicyError>;
    fn visit_next(&mut self, node: &Node, target: FlowTarget)
    -> Result<Self::Output, PolicyError>;
    fn visit_protocol(&mut self, node: &Node, protocol: &str)
    -> Result<Self::Output, PolicyError>;
    fn visit_subroutine(&mut self, node: &Node, policy: &str)
    -> Result<Self::Output, PolicyError>;
}

impl Node {
    pub fn new(line: u32, kind: NodeKind) -> Self {
        Node { line, kind }
    }

    pub fn accept<V: Visitor + ?Sized>(&self, visitor: &mut V) -> Result<V::Output, PolicyError> {
        match &self.kind {
            NodeKind::Unary { op, child } => visitor.visit_unary(self, *op, child),
            NodeKind::Binary { op, left, right } => visitor.visit_binary(self, *op, left, right),
            NodeKind::Assign {
                var,
                modifier,
                rvalue,
            } => visitor.visit_assign(self, var, *modifier, rvalue),
            NodeKind::Var(name) => visitor.visit_var(self, name),
            NodeKind::SetRef(name) => visitor.visit_set(self, name),
            NodeKind::Literal(value) => visitor.visit_literal(self, value),
            NodeKind::Regex { pattern, subject } => visitor.visit_regex(self, pattern, subject),
            NodeKind::Accept => visitor.visit_accept(self),
            NodeKind::Reject => visitor.visit_reject(self),
            NodeKind::Next(target) => visitor.visit_next(self, *target),
            NodeKind::ProtocolMatch(protocol) => visitor.visit_protocol(self, protocol),
            NodeKind::Subroutine(policy) => visitor.visit_subroutine(self, policy),
        }
    }

    pub fn unary(line: u32, op: Op, child: Node) -> Self {
        Node::new(
            line,
            NodeKind::Unary {
                op,
                child: Box::new(child),
            },
        )
    }

    pub fn binary(line: u32, op: Op, left: Node, right: Node) -> Self {
        Node::new(
            line,
            NodeKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
        )
    }

    pub fn assign(line: u32, var: impl Into<String>, modifier: Option<Op>, rvalue: Node) -> Self {
        Node::new(
            line,
            NodeKind::Assign {
                var: var.into(),
                modifier,
                rvalue: Box::new(rvalue),
            },
        )
    }

    pub fn var(line: u32, name: impl Into<String>) -> Self {
        Node::new(line, NodeKind::Var(name.into()))
    }

    pub fn set(line: u32, name: impl Into<String>) -> Self {
        Node::new(line, NodeKind::SetRef(name.into()))
    }

    pub fn literal(line: u32, value: Value) -> Self {
        Node::new(line, NodeKind::Literal(value))
    }

    pub fn regex(line: u32, pattern: impl Into<String>, subject: Node) -> Self {
        Node::new(
            line,
            NodeKind::Regex {
                pattern: pattern.into(),
                subject: Box::new(subject),
            },
        )
    }

    pub fn protocol(line: u32, protocol: impl Into<String>) -> Self {
        Node::new(line, NodeKind::ProtocolMatch(protocol.into()))
    }

    pub fn subroutine(line: u32, policy: impl Into<String>) -> Self {
        Node::new(line, NodeKind::Subroutine(policy.into()))
    }

    pub fn is_protocol_match(&self) -> bool {
        matches!(self.kind, NodeKind::ProtocolMatch(_))
    }

    /// Statements that act rather than test: they never feed `ONFALSE_EXIT`.
    pub fn is_action(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Assign { .. } | NodeKind::Accept | NodeKind::Reject | NodeKind::Next(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts visits per variant, descending into children left to right.
    #[derive(Default)]
    struct Counter {
        visited: Vec<&'static str>,
    }

    impl Visitor for Counter {
        type Output = ();

        fn visit_unary(&mut self, _: &Node, _: Op, child: &Node) -> Result<(), PolicyError> {
            self.visited.push("unary");
            child.accept(self)
        }
        fn visit_binary(
            &mut self,
            _: &Node,
            _: Op,
            left: &Node,
            right: &Node,
        ) -> Result<(), PolicyError> {
            self.visited.push("binary");
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
            self.visited.push("assign");
            rvalue.accept(self)
        }
        fn visit_var(&mut self, _: &Node, _: &str) -> Result<(), PolicyError> {
            self.visited.push("var");
            Ok(())
        }
        fn visit_set(&mut self, _: &Node, _: &str) -> Result<(), PolicyError> {
            self.visited.push("set");
            Ok(())
        }
        fn visit_literal(&mut self, _: &Node, _: &Value) -> Result<(), PolicyError> {
            self.visited.push("literal");
            Ok(())
        }
        fn visit_regex(&mut self, _: &Node, _: &str, subject: &Node) -> Result<(), PolicyError> {
            self.visited.push("regex");
            subject.accept(self)
        }
        fn visit_accept(&mut self, _: &Node) -> Result<(), PolicyError> {
            self.visited.push("accept");
            Ok(())
        }
        fn visit_reject(&mut self, _: &Node) -> Result<(), PolicyError> {
            self.visited.push("reject");
            Ok(())
        }
        fn visit_next(&mut self, _: &Node, _: FlowTarget) -> Result<(), PolicyError> {
            self.visited.push("next");
            Ok(())
        }
        fn visit_protocol(&mut self, _: &Node, _: &str) -> Result<(), PolicyError> {
            self.visited.push("protocol");
            Ok(())
        }
        fn visit_subroutine(&mut self, _: &Node, _: &str) -> Result<(), PolicyError> {
            self.visited.push("subroutine");
            Ok(())
        }
    }

    #[test]
    fn test_accept_dispatches_by_variant() {
        let tree = Node::binary(
            1,
            Op::And,
            Node::unary(1, Op::Not, Node::var(1, "med")),
            Node::regex(1, "^65", Node::set(1, "asns")),
        );
        let mut counter = Counter::default();
        tree.accept(&mut counter).unwrap();
        assert_eq!(
            counter.visited,
            vec!["binary", "unary", "var", "regex", "set"]
        );
    }

    #[test]
    fn test_action_classification() {
        assert!(Node::new(1, NodeKind::Accept).is_action());
        assert!(Node::assign(1, "med", None, Node::literal(1, Value::U32(1))).is_action());
        assert!(!Node::var(1, "med").is_action());
        assert!(Node::protocol(1, "bgp").is_protocol_match());
    }
}
