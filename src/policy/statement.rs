use std::collections::BTreeSet;

use crate::ast::Node;
use crate::error::PolicyError;
use crate::types::ConfigNodeIdMap;

use super::term::Term;

/// A named policy: terms in configured order plus the sets and
/// sub-policies its statements reference.
#[derive(Debug, Clone)]
pub struct PolicyStatement {
    name: String,
    terms: ConfigNodeIdMap<Term>,
    set_dependencies: BTreeSet<String>,
    policy_dependencies: BTreeSet<String>,
}

impl PolicyStatement {
    pub fn new(name: &str) -> Self {
        PolicyStatement {
            name: name.to_string(),
            terms: ConfigNodeIdMap::new(),
            set_dependencies: BTreeSet::new(),
            policy_dependencies: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a term. A term whose predecessor is not known yet is held back
    /// until it is.
    pub fn add_term(&mut self, term: Term) -> Result<(), PolicyError> {
        if self.terms.all().any(|(_, t)| t.name() == term.name()) {
            return Err(PolicyError::AlreadyExists(format!(
                "term {} in policy {}",
                term.name(),
                self.name
            )));
        }
        let order = term.order();
        self.terms.insert(order, term).map_err(|t| {
            PolicyError::AlreadyExists(format!(
                "term already present at order {order} in policy {}: {}",
                self.name,
                t.name()
            ))
        })
    }

    pub fn delete_term(&mut self, name: &str) -> Result<Term, PolicyError> {
        let order = self.find(name)?.order();
        self.terms
            .remove(&order)
            .ok_or_else(|| self.term_not_found(name))
    }

    pub fn term(&self, name: &str) -> Result<&Term, PolicyError> {
        self.find(name)
    }

    pub fn term_mut(&mut self, name: &str) -> Result<&mut Term, PolicyError> {
        let order = self.find(name)?.order();
        let policy = self.name.clone();
        self.terms
            .get_mut(&order)
            .ok_or_else(|| PolicyError::NotFound(format!("term {name} in policy {policy}")))
    }

    /// Threaded terms, in configured order.
    pub fn terms(&self) -> impl Iterator<Item = &Term> {
        self.terms.values()
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn pending_terms(&self) -> usize {
        self.terms.pending_len()
    }

    /// Every node of every threaded term.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.terms().flat_map(Term::all_nodes)
    }

    pub fn set_dependencies(&self) -> &BTreeSet<String> {
        &self.set_dependencies
    }

    pub fn policy_dependencies(&self) -> &BTreeSet<String> {
        &self.policy_dependencies
    }

    /// Install freshly collected dependencies, returning the previous ones.
    pub fn replace_dependencies(
        &mut self,
        sets: BTreeSet<String>,
        policies: BTreeSet<String>,
    ) -> (BTreeSet<String>, BTreeSet<String>) {
        (
            std::mem::replace(&mut self.set_dependencies, sets),
            std::mem::replace(&mut self.policy_dependencies, policies),
        )
    }

    fn find(&self, name: &str) -> Result<&Term, PolicyError> {
        self.terms
            .all()
            .map(|(_, t)| t)
            .find(|t| t.name() == name)
            .ok_or_else(|| self.term_not_found(name))
    }

    fn term_not_found(&self, name: &str) -> PolicyError {
        PolicyError::NotFound(format!("term {name} in policy {}", self.name))
    }
}
