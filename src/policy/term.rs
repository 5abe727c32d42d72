use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::ast::Node;
use crate::error::PolicyError;
use crate::types::{ConfigNodeId, ConfigNodeIdMap};

/// The three statement blocks of a term.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Block {
    Source,
    Dest,
    Action,
}

impl Block {
    fn index(&self) -> usize {
        match self {
            Block::Source => 0,
            Block::Dest => 1,
            Block::Action => 2,
        }
    }
}

/// One configured statement: its text and the nodes parsed from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub text: String,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone)]
pub struct Term {
    name: String,
    order: ConfigNodeId,
    blocks: [ConfigNodeIdMap<Statement>; 3],
}

impl Term {
    pub fn new(name: &str, order: ConfigNodeId) -> Self {
        Term {
            name: name.to_string(),
            order,
            blocks: Default::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order(&self) -> ConfigNodeId {
        self.order
    }

    /// Set the statement at `order` in `block`, replacing an existing one.
    pub fn set_statement(&mut self, block: Block, order: ConfigNodeId, statement: Statement) {
        let statements = &mut self.blocks[block.index()];
        if let Some(existing) = statements.get_mut(&order) {
            *existing = statement;
        } else if statements.insert(order, statement).is_err() {
            unreachable!("statement {order} vanished between lookup and insert");
        }
    }

    pub fn delete_statement(
        &mut self,
        block: Block,
        order: &ConfigNodeId,
    ) -> Result<Statement, PolicyError> {
        self.blocks[block.index()].remove(order).ok_or_else(|| {
            PolicyError::NotFound(format!("statement {order} in {block} of term {}", self.name))
        })
    }

    /// Threaded statements of a block, in configured order.
    pub fn statements(&self, block: Block) -> impl Iterator<Item = &Statement> {
        self.blocks[block.index()].values()
    }

    /// Nodes of a block, in configured order.
    pub fn nodes(&self, block: Block) -> impl Iterator<Item = &Node> {
        self.statements(block).flat_map(|s| s.nodes.iter())
    }

    pub fn source(&self) -> impl Iterator<Item = &Node> {
        self.nodes(Block::Source)
    }

    pub fn dest(&self) -> impl Iterator<Item = &Node> {
        self.nodes(Block::Dest)
    }

    pub fn action(&self) -> impl Iterator<Item = &Node> {
        self.nodes(Block::Action)
    }

    pub fn has_dest(&self) -> bool {
        self.dest().next().is_some()
    }

    /// Statements still waiting for their predecessor, across all blocks.
    pub fn pending_statements(&self) -> usize {
        self.blocks.iter().map(|b| b.pending_len()).sum()
    }

    /// All nodes of all blocks, source first.
    pub fn all_nodes(&self) -> impl Iterator<Item = &Node> {
        self.source().chain(self.dest()).chain(self.action())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{PolicyParser, StatementParser};
    use std::str::FromStr;

    fn statement(text: &str) -> Statement {
        Statement {
            text: text.to_string(),
            nodes: StatementParser.parse(text).unwrap(),
        }
    }

    #[test]
    fn test_block_names() {
        assert_eq!(Block::from_str("dest").unwrap(), Block::Dest);
        assert_eq!(Block::Action.to_string(), "action");
    }

    #[test]
    fn test_statements_follow_config_order() {
        let mut term = Term::new("t1", ConfigNodeId::new(1, 0));
        term.set_statement(Block::Action, ConfigNodeId::new(3, 2), statement("accept"));
        term.set_statement(Block::Action, ConfigNodeId::new(2, 0), statement("med = 5"));
        let texts: Vec<_> = term.statements(Block::Action).map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["med = 5", "accept"]);
        assert!(!term.has_dest());
    }

    #[test]
    fn test_replace_and_delete_statement() {
        let mut term = Term::new("t1", ConfigNodeId::new(1, 0));
        term.set_statement(Block::Source, ConfigNodeId::new(5, 0), statement("med == 1"));
        term.set_statement(Block::Source, ConfigNodeId::new(5, 0), statement("med == 2"));
        assert_eq!(term.source().count(), 1);
        assert_eq!(term.statements(Block::Source).next().unwrap().text, "med == 2");

        term.delete_statement(Block::Source, &ConfigNodeId::new(5, 0))
            .unwrap();
        assert!(matches!(
            term.delete_statement(Block::Source, &ConfigNodeId::new(5, 0)),
            Err(PolicyError::NotFound(_))
        ));
    }

    #[test]
    fn test_unresolved_statement_is_pending() {
        let mut term = Term::new("t1", ConfigNodeId::new(1, 0));
        term.set_statement(Block::Dest, ConfigNodeId::new(9, 8), statement("med == 1"));
        assert!(!term.has_dest());
        assert_eq!(term.pending_statements(), 1);
    }
}
