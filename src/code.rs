//! Compiled bytecode fragments and their linking into programs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::ops::AddAssign;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::PolicyError;
use crate::set_map::SetMap;
use crate::types::Direction;

/// Where a fragment runs: one filter slot of one protocol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CodeTarget {
    pub protocol: String,
    pub direction: Direction,
}

impl CodeTarget {
    pub fn new(protocol: &str, direction: Direction) -> Self {
        CodeTarget {
            protocol: protocol.to_string(),
            direction,
        }
    }
}

impl Display for CodeTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/{}", self.protocol, self.direction)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    pub target: CodeTarget,
    /// Instruction text, one instruction per line.
    pub code: String,
    pub sets: BTreeSet<String>,
    pub tags: BTreeSet<u32>,
    pub source_protocols: BTreeSet<String>,
    /// Subroutine name to its instruction text.
    pub subroutines: BTreeMap<String, String>,
}

impl Code {
    pub fn new(target: CodeTarget) -> Self {
        Code {
            target,
            code: String::new(),
            sets: BTreeSet::new(),
            tags: BTreeSet::new(),
            source_protocols: BTreeSet::new(),
            subroutines: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Full program text: set declarations, the code, then subroutines.
    pub fn program(&self, sets: &SetMap) -> Result<String, PolicyError> {
        let mut out = String::new();
        for name in &self.sets {
            out.push_str(&sets.declaration(name)?);
            out.push('\n');
        }
        out.push_str(&self.code);
        if !self.subroutines.is_empty() {
            out.push_str("SUBR_START\n");
            for body in self.subroutines.values() {
                out.push_str(body);
            }
            out.push_str("SUBR_END\n");
        }
        Ok(out)
    }
}

impl AddAssign<&Code> for Code {
    /// Append another fragment for the same target.
    ///
    /// # Panics
    /// If the targets differ.
    fn add_assign(&mut self, other: &Code) {
        if self.target != other.target {
            panic!(
                "linking code for {} into code for {}",
                other.target, self.target
            );
        }
        self.code.push_str(&other.code);
        self.sets.extend(other.sets.iter().cloned());
        self.tags.extend(other.tags.iter().copied());
        self.source_protocols
            .extend(other.source_protocols.iter().cloned());
        for (name, body) in &other.subroutines {
            self.subroutines
                .entry(name.clone())
                .or_insert_with(|| body.clone());
        }
    }
}

impl Display for Code {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        writeln!(f, "TARGET {}", self.target)?;
        writeln!(f, "SETS {}", self.sets.iter().join(" "))?;
        writeln!(f, "TAGS {}", self.tags.iter().join(" "))?;
        writeln!(f, "SOURCES {}", self.source_protocols.iter().join(" "))?;
        write!(f, "{}", self.code)
    }
}

/// Fragments produced by compiling one policy inside one policy list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeList {
    policy: String,
    codes: Vec<Code>,
    tag_start: u32,
    tag_end: u32,
}

impl CodeList {
    /// `tag_start..tag_end` is the tag range the fragments consumed.
    pub fn new(policy: &str, codes: Vec<Code>, tag_start: u32, tag_end: u32) -> Self {
        CodeList {
            policy: policy.to_string(),
            codes,
            tag_start,
            tag_end,
        }
    }

    pub fn policy(&self) -> &str {
        &self.policy
    }

    pub fn codes(&self) -> &[Code] {
        &self.codes
    }

    pub fn tag_start(&self) -> u32 {
        self.tag_start
    }

    pub fn tag_end(&self) -> u32 {
        self.tag_end
    }

    /// Append every fragment aimed at `out`'s target.
    pub fn link_code(&self, out: &mut Code) {
        let target = out.target.clone();
        for code in self.codes.iter().filter(|c| c.target == target) {
            *out += code;
        }
    }

    pub fn targets(&self) -> BTreeSet<CodeTarget> {
        self.codes.iter().map(|c| c.target.clone()).collect()
    }

    pub fn tags(&self) -> BTreeSet<u32> {
        self.codes.iter().flat_map(|c| c.tags.iter().copied()).collect()
    }

    /// Sets declared by any of the fragments.
    pub fn sets(&self) -> BTreeSet<&str> {
        self.codes
            .iter()
            .flat_map(|c| c.sets.iter().map(String::as_str))
            .collect()
    }
}

impl Display for CodeList {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        writeln!(
            f,
            "POLICY {} TAGS {}..{}",
            self.policy, self.tag_start, self.tag_end
        )?;
        for code in &self.codes {
            write!(f, "{code}")?;
        }
        Ok(())
    }
}
