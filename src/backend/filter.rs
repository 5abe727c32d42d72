//! Installed filter versions and the references routes pin them by.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::PolicyError;
use crate::varrw::VarRW;

use super::assembler::assemble;
use super::exec::{Executor, Outcome};
use super::instr::FilterProgram;

/// Identity of an installed program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterVersion {
    /// Bumped by every configure or reset of the owning slot.
    pub generation: u64,
    /// Hex sha256 of the program text.
    pub hash: String,
}

impl Display for FilterVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let short = self.hash.get(..12).unwrap_or(&self.hash);
        write!(f, "{}@{}", self.generation, short)
    }
}

/// One immutable compiled filter. Replaced wholesale, never edited.
#[derive(Debug)]
pub struct PolicyFilter {
    program: FilterProgram,
    text: String,
    version: FilterVersion,
}

impl PolicyFilter {
    /// The filter that accepts everything.
    pub fn empty(generation: u64) -> Self {
        PolicyFilter {
            program: FilterProgram::default(),
            text: String::new(),
            version: FilterVersion {
                generation,
                hash: hash(""),
            },
        }
    }

    pub fn configure(text: &str, generation: u64) -> Result<Self, PolicyError> {
        let program = assemble(text)?;
        Ok(PolicyFilter {
            program,
            text: text.to_string(),
            version: FilterVersion {
                generation,
                hash: hash(text),
            },
        })
    }

    pub fn version(&self) -> &FilterVersion {
        &self.version
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.program.is_empty()
    }

    pub fn accept_route(&self, varrw: &mut dyn VarRW) -> Result<Outcome, PolicyError> {
        if self.is_empty() {
            return Ok(Outcome::Default);
        }
        let outcome = Executor::new(&self.program).run(varrw)?;
        debug!(
            event = "Filter",
            phase = "Evaluate",
            version = %self.version,
            outcome = %outcome
        );
        Ok(outcome)
    }
}

fn hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// A route's pinned filter. Equality is identity of the installed filter,
/// not equality of its program.
#[derive(Debug, Clone, Default)]
pub struct FilterRef(Option<Arc<PolicyFilter>>);

impl FilterRef {
    pub fn new(filter: Arc<PolicyFilter>) -> Self {
        FilterRef(Some(filter))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn filter(&self) -> Option<&Arc<PolicyFilter>> {
        self.0.as_ref()
    }

    fn address(&self) -> usize {
        self.0
            .as_ref()
            .map(|f| Arc::as_ptr(f) as usize)
            .unwrap_or(0)
    }
}

impl PartialEq for FilterRef {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}

impl Eq for FilterRef {}

impl PartialOrd for FilterRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FilterRef {
    fn cmp(&self, other: &Self) -> Ordering {
        self.address().cmp(&other.address())
    }
}

impl Hash for FilterRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state);
    }
}

impl Display for FilterRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.0 {
            Some(filter) => write!(f, "filter:{}", filter.version()),
            None => write!(f, "filter:unset"),
        }
    }
}
