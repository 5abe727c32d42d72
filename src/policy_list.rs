//! Ordered policies bound to one protocol and direction, compiled
//! incrementally.
//!
//! Export lists own a block of tags `tag_base..tag_end`. The block is
//! threaded through the policies in list order, so a policy keeps its tags
//! across recompiles as long as no earlier policy changes its term count.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter, Result as FmtResult};

use tracing::{debug, warn};

use crate::code::{Code, CodeList, CodeTarget};
use crate::error::PolicyError;
use crate::policy::{PolicyMap, PolicyStatement};
use crate::set_map::SetMap;
use crate::types::Direction;
use crate::var_map::VarMap;
use crate::visitors::{TagCounter, codegen, export, semantic, source_match};

/// Configuration a compile reads.
#[derive(Clone, Copy)]
pub struct CompileEnv<'a> {
    pub varmap: &'a VarMap,
    pub sets: &'a SetMap,
    pub policies: &'a PolicyMap,
    /// Policies edited since their last compile.
    pub modified: &'a BTreeSet<String>,
}

/// A policy that failed to compile, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileFailure {
    pub policy: String,
    pub target: String,
    pub error: PolicyError,
}

impl Display for CompileFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{} for {}: {}", self.policy, self.target, self.error)
    }
}

#[derive(Debug, Clone)]
pub struct PolicyList {
    protocol: String,
    direction: Direction,
    policies: Vec<(String, Option<CodeList>)>,
    tag_base: u32,
    tag_end: u32,
}

impl PolicyList {
    pub fn import(protocol: &str, policies: &[String]) -> Self {
        PolicyList::new(protocol, Direction::Import, policies, 0, 0)
    }

    /// An export list drawing tags from `tag_base..tag_end`.
    pub fn export(protocol: &str, policies: &[String], tag_base: u32, tag_end: u32) -> Self {
        PolicyList::new(protocol, Direction::Export, policies, tag_base, tag_end)
    }

    fn new(
        protocol: &str,
        direction: Direction,
        policies: &[String],
        tag_base: u32,
        tag_end: u32,
    ) -> Self {
        PolicyList {
            protocol: protocol.to_string(),
            direction,
            policies: policies.iter().map(|p| (p.clone(), None)).collect(),
            tag_base,
            tag_end,
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn tag_base(&self) -> u32 {
        self.tag_base
    }

    pub fn tag_end(&self) -> u32 {
        self.tag_end
    }

    pub fn policy_names(&self) -> impl Iterator<Item = &str> {
        self.policies.iter().map(|(name, _)| name.as_str())
    }

    pub fn uses(&self, policy: &str) -> bool {
        self.policies.iter().any(|(name, _)| name == policy)
    }

    pub fn code_list(&self, policy: &str) -> Option<&CodeList> {
        self.policies
            .iter()
            .find(|(name, _)| name == policy)
            .and_then(|(_, code)| code.as_ref())
    }

    /// Replace the policy names, keeping compiled code for names that stay.
    ///
    /// Kept code is still only reused if its tag range lines up on the next
    /// compile.
    pub fn set_policies(&mut self, policies: &[String]) {
        let mut old: BTreeMap<String, Option<CodeList>> = self.policies.drain(..).collect();
        self.policies = policies
            .iter()
            .map(|name| (name.clone(), old.remove(name).flatten()))
            .collect();
    }

    /// Compile every policy that has no code, was modified, or whose tags
    /// moved. Failures are reported and the rest of the list continues.
    pub fn compile(&mut self, env: CompileEnv<'_>) -> Vec<CompileFailure> {
        let mut tags = TagCounter::new(self.tag_base, self.tag_end);
        let mut failures = Vec::new();
        let mut compiled = 0usize;
        for (name, slot) in self.policies.iter_mut() {
            let current = slot.as_ref().filter(|code| {
                !env.modified.contains(name.as_str())
                    && code.tag_start() == tags.position()
                    && sets_resolve(code, env.sets)
            });
            if let Some(code) = current {
                tags.advance_to(code.tag_end());
                continue;
            }

            let result = env.policies.get(name).and_then(|policy| match self.direction {
                Direction::Import => compile_import(policy, &self.protocol, env),
                _ => compile_export(policy, &self.protocol, env, &mut tags),
            });
            compiled += 1;
            match result {
                Ok(code) => *slot = Some(code),
                Err(error) => {
                    warn!(
                        event = "Compile",
                        phase = "PolicyList",
                        policy = name.as_str(),
                        protocol = self.protocol.as_str(),
                        direction = %self.direction,
                        error = %error
                    );
                    let keep = slot.take().filter(|code| {
                        code.tag_start() == tags.position() && sets_resolve(code, env.sets)
                    });
                    if let Some(code) = &keep {
                        tags.advance_to(code.tag_end());
                    }
                    *slot = keep;
                    failures.push(CompileFailure {
                        policy: name.clone(),
                        target: format!("{}/{}", self.protocol, self.direction),
                        error,
                    });
                }
            }
        }
        debug!(
            event = "Compile",
            phase = "PolicyList",
            protocol = self.protocol.as_str(),
            direction = %self.direction,
            policies = self.policies.len(),
            compiled,
            failed = failures.len(),
            next_tag = tags.position()
        );
        failures
    }

    /// Link every compiled fragment into one code per target, in list order.
    ///
    /// Source-match code of an export list first removes the list's tags
    /// from `policytags`, so a route evaluated again only carries tags of
    /// terms that match it now.
    pub fn link_code(&self) -> BTreeMap<CodeTarget, Code> {
        let tags = self.tags();
        let mut linked: BTreeMap<CodeTarget, Code> = BTreeMap::new();
        for code_list in self.policies.iter().filter_map(|(_, code)| code.as_ref()) {
            for target in code_list.targets() {
                let out = linked.entry(target.clone()).or_insert_with(|| {
                    match target.direction {
                        Direction::ExportSourceMatch => source_match::clear_tags(
                            &format!("{}:{}", self.direction, self.protocol),
                            target,
                            &tags,
                        ),
                        _ => Code::new(target),
                    }
                });
                code_list.link_code(out);
            }
        }
        linked
    }

    /// Tags handed out to the compiled policies of this list.
    pub fn tags(&self) -> BTreeSet<u32> {
        self.policies
            .iter()
            .filter_map(|(_, code)| code.as_ref())
            .flat_map(CodeList::tags)
            .collect()
    }
}

/// Old code can only be linked while every set it declares still has a
/// value.
fn sets_resolve(code: &CodeList, sets: &SetMap) -> bool {
    code.sets()
        .into_iter()
        .all(|name| matches!(sets.get(name), Ok(Some(_))))
}

fn compile_import(
    policy: &PolicyStatement,
    protocol: &str,
    env: CompileEnv<'_>,
) -> Result<CodeList, PolicyError> {
    semantic::check(
        policy,
        protocol,
        Direction::Import,
        env.varmap,
        env.sets,
        env.policies,
    )?;
    let code = codegen::generate(policy, protocol, env.varmap, env.policies)?;
    Ok(CodeList::new(policy.name(), vec![code], 0, 0))
}

/// Both halves of an export policy from the same starting tag. `tags` only
/// advances when the whole policy compiles.
fn compile_export(
    policy: &PolicyStatement,
    protocol: &str,
    env: CompileEnv<'_>,
    tags: &mut TagCounter,
) -> Result<CodeList, PolicyError> {
    semantic::check(
        policy,
        protocol,
        Direction::Export,
        env.varmap,
        env.sets,
        env.policies,
    )?;
    let start = tags.position();
    let mut export_tags = *tags;
    let mut match_tags = *tags;
    let mut codes = vec![export::generate(
        policy,
        protocol,
        env.varmap,
        env.policies,
        &mut export_tags,
    )?];
    codes.extend(source_match::generate(
        policy,
        env.varmap,
        env.policies,
        &mut match_tags,
    )?);
    if export_tags != match_tags {
        panic!(
            "export and source-match tags diverged for {}: {} vs {}",
            policy.name(),
            export_tags.position(),
            match_tags.position()
        );
    }
    *tags = export_tags;
    Ok(CodeList::new(policy.name(), codes, start, tags.position()))
}

impl Display for PolicyList {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        writeln!(
            f,
            "{} {} TAGS {}..{}",
            self.protocol, self.direction, self.tag_base, self.tag_end
        )?;
        for (name, code) in &self.policies {
            match code {
                Some(code) => writeln!(f, "  {name} {}..{}", code.tag_start(), code.tag_end())?,
                None => writeln!(f, "  {name} (not compiled)")?,
            }
        }
        Ok(())
    }
}
