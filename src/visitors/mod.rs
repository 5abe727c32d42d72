//! Traversals over policy ASTs.
//!
//! - [`dependency`]: sets and sub-policies a policy references
//! - [`semantic`]: type and access checking against the varmap
//! - [`codegen`]: plain (import) code generation and the shared emitter
//! - [`export`]: destination half of export policies, testing tags
//! - [`source_match`]: source half of export policies, setting tags
//! - [`printer`]: canonical text rendering

pub mod codegen;
pub mod dependency;
pub mod export;
pub mod printer;
pub mod semantic;
pub mod source_match;

use crate::ast::NodeKind;
use crate::error::PolicyError;
use crate::policy::Term;

/// Hands out export tags from a bounded range.
///
/// Threaded through every policy of one export list in list order, so the
/// tags a policy receives only change when an earlier policy changes its
/// term count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagCounter {
    next: u32,
    end: u32,
}

impl TagCounter {
    /// Tags `start..end`.
    pub fn new(start: u32, end: u32) -> Self {
        TagCounter { next: start, end }
    }

    /// The tag the next call to [`TagCounter::next_tag`] returns.
    pub fn position(&self) -> u32 {
        self.next
    }

    pub fn next_tag(&mut self) -> Result<u32, PolicyError> {
        if self.next >= self.end {
            return Err(PolicyError::ValueError(format!(
                "export tag space exhausted at {}",
                self.next
            )));
        }
        let tag = self.next;
        self.next += 1;
        Ok(tag)
    }

    /// Skip past a range another compile already consumed.
    pub fn advance_to(&mut self, position: u32) {
        self.next = self.next.max(position);
    }
}

/// The source protocol named by a term's single protocol match.
pub(crate) fn source_protocol<'t>(policy: &str, term: &'t Term) -> Result<&'t str, PolicyError> {
    let mut found: Option<&'t str> = None;
    for node in term.source() {
        if let NodeKind::ProtocolMatch(protocol) = &node.kind {
            if let Some(first) = found {
                return Err(PolicyError::semantic(
                    node.line,
                    format!(
                        "protocol redefined in term {} of policy {policy}: {first} then {protocol}",
                        term.name()
                    ),
                ));
            }
            found = Some(protocol.as_str());
        }
    }
    found.ok_or_else(|| {
        PolicyError::semantic(
            term.source().next().map(|n| n.line).unwrap_or(0),
            format!(
                "no protocol match in term {} of export policy {policy}",
                term.name()
            ),
        )
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::parser::{PolicyParser, StatementParser};
    use crate::policy::{Block, Statement, Term};
    use crate::types::ConfigNodeId;

    /// A term with one statement per `(block, text)` entry.
    pub(crate) fn term(name: &str, order: (u64, u64), blocks: &[(Block, &str)]) -> Term {
        let mut term = Term::new(name, ConfigNodeId::new(order.0, order.1));
        for (i, (block, text)) in blocks.iter().enumerate() {
            term.set_statement(
                *block,
                ConfigNodeId::new(100 + i as u64, 0),
                Statement {
                    text: text.to_string(),
                    nodes: StatementParser.parse(text).unwrap(),
                },
            );
        }
        term
    }
}
