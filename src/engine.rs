use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tracing::{debug, info, warn};

use crate::backend::{Executor, Outcome, VersionFilters, assemble};
use crate::code::{Code, CodeTarget};
use crate::config::EngineConfig;
use crate::error::PolicyError;
use crate::parser::{PolicyParser, StatementParser};
use crate::policy::{Block, PolicyMap, PolicyStatement, Statement, Term};
use crate::policy_list::{CompileEnv, CompileFailure, PolicyList};
use crate::set_map::SetMap;
use crate::types::{ConfigNodeId, Direction, Value, ValueType};
use crate::var_map::{Access, VarMap};
use crate::varrw::{RouteVarRW, TracingVarRW, VarId};
use crate::visitors::{codegen, dependency, printer, semantic};

/// What [`PolicyEngine::show`] lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ShowKind {
    PolicyStatement,
    Set,
    Varmap,
    Code,
}

/// Result of a compile pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitReport {
    /// Policies that failed; their last good code stays in place.
    pub failed: Vec<CompileFailure>,
    /// Targets whose program changed.
    pub configured: Vec<CodeTarget>,
    /// Targets that no longer have a program.
    pub reset: Vec<CodeTarget>,
}

impl CommitReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of running one policy against a hand-built route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyTest {
    pub accepted: bool,
    pub outcome: Outcome,
    /// Attributes the policy wrote, by variable name.
    pub modified: BTreeMap<String, String>,
}

/// Configuration state of the policy subsystem and the compiler driving it.
///
/// Edits take `&mut self`; compiled programs reach the attached protocols'
/// [`VersionFilters`], which route evaluation shares through `Arc`.
pub struct PolicyEngine {
    config: EngineConfig,
    parser: Box<dyn PolicyParser + Send + Sync>,
    policies: PolicyMap,
    sets: SetMap,
    varmap: VarMap,
    imports: BTreeMap<String, PolicyList>,
    exports: BTreeMap<String, PolicyList>,
    installed: BTreeMap<CodeTarget, String>,
    protocols: BTreeMap<String, Arc<VersionFilters>>,
    modified: BTreeSet<String>,
    commit_deadline: Option<Instant>,
    next_tag_base: u32,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        PolicyEngine::new(EngineConfig::default())
    }
}

impl PolicyEngine {
    pub fn new(config: EngineConfig) -> Self {
        PolicyEngine::with_parser(config, Box::new(StatementParser))
    }

    pub fn with_parser(config: EngineConfig, parser: Box<dyn PolicyParser + Send + Sync>) -> Self {
        PolicyEngine {
            config,
            parser,
            policies: PolicyMap::new(),
            sets: SetMap::new(),
            varmap: VarMap::new(),
            imports: BTreeMap::new(),
            exports: BTreeMap::new(),
            installed: BTreeMap::new(),
            protocols: BTreeMap::new(),
            modified: BTreeSet::new(),
            commit_deadline: None,
            next_tag_base: 1,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn policies(&self) -> &PolicyMap {
        &self.policies
    }

    pub fn sets(&self) -> &SetMap {
        &self.sets
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Policies waiting for the next compile.
    pub fn modified(&self) -> &BTreeSet<String> {
        &self.modified
    }

    pub fn import_list(&self, protocol: &str) -> Option<&PolicyList> {
        self.imports.get(protocol)
    }

    pub fn export_list(&self, protocol: &str) -> Option<&PolicyList> {
        self.exports.get(protocol)
    }

    pub fn pending_commit(&self) -> Option<Instant> {
        self.commit_deadline
    }

    pub fn create_policy(&mut self, name: &str) -> Result<(), PolicyError> {
        self.policies.create(name)?;
        info!(event = "Config", phase = "CreatePolicy", policy = name);
        Ok(())
    }

    /// Delete a policy no list or other policy uses.
    pub fn delete_policy(&mut self, name: &str) -> Result<(), PolicyError> {
        let policy = self.policies.delete(name)?;
        for set in policy.set_dependencies() {
            self.sets.del_dependency(set, name);
        }
        for sub in policy.policy_dependencies() {
            self.policies.del_dependency(sub, name);
        }
        self.modified.remove(name);
        info!(event = "Config", phase = "DeletePolicy", policy = name);
        Ok(())
    }

    pub fn create_term(
        &mut self,
        policy: &str,
        order: ConfigNodeId,
        term: &str,
    ) -> Result<(), PolicyError> {
        self.edit(policy, |p| p.add_term(Term::new(term, order)))?;
        info!(
            event = "Config",
            phase = "CreateTerm",
            policy = policy,
            term = term,
            order = %order
        );
        Ok(())
    }

    pub fn delete_term(&mut self, policy: &str, term: &str) -> Result<(), PolicyError> {
        self.edit(policy, |p| p.delete_term(term).map(|_| ()))?;
        info!(event = "Config", phase = "DeleteTerm", policy = policy, term = term);
        Ok(())
    }

    /// Set the statement at `order` in one block of a term. Empty text
    /// removes the statement.
    pub fn update_term_block(
        &mut self,
        policy: &str,
        term: &str,
        block: Block,
        order: ConfigNodeId,
        text: &str,
    ) -> Result<(), PolicyError> {
        if text.trim().is_empty() {
            return self.delete_term_block(policy, term, block, order);
        }
        let nodes = self.parser.parse(text)?;
        let statement = Statement {
            text: text.to_string(),
            nodes,
        };
        self.edit(policy, |p| {
            p.term_mut(term)?.set_statement(block, order, statement);
            Ok(())
        })?;
        info!(
            event = "Config",
            phase = "UpdateTermBlock",
            policy = policy,
            term = term,
            block = %block,
            order = %order
        );
        Ok(())
    }

    pub fn delete_term_block(
        &mut self,
        policy: &str,
        term: &str,
        block: Block,
        order: ConfigNodeId,
    ) -> Result<(), PolicyError> {
        self.edit(policy, |p| {
            p.term_mut(term)?.delete_statement(block, &order).map(|_| ())
        })?;
        info!(
            event = "Config",
            phase = "DeleteTermBlock",
            policy = policy,
            term = term,
            block = %block,
            order = %order
        );
        Ok(())
    }

    pub fn create_set(&mut self, name: &str) -> Result<(), PolicyError> {
        self.sets.create(name)?;
        info!(event = "Config", phase = "CreateSet", set = name);
        Ok(())
    }

    pub fn update_set(&mut self, ty: ValueType, name: &str, elements: &str) -> Result<(), PolicyError> {
        let users = self.sets.update(ty, name, elements)?;
        self.mark_all_modified(users);
        Ok(())
    }

    /// Delete a set no policy references.
    pub fn delete_set(&mut self, name: &str) -> Result<(), PolicyError> {
        self.sets.delete(name)?;
        info!(event = "Config", phase = "DeleteSet", set = name);
        Ok(())
    }

    pub fn add_to_set(&mut self, ty: ValueType, name: &str, element: &str) -> Result<(), PolicyError> {
        let users = self.sets.add_to_set(ty, name, element)?;
        self.mark_all_modified(users);
        Ok(())
    }

    pub fn delete_from_set(
        &mut self,
        ty: ValueType,
        name: &str,
        element: &str,
    ) -> Result<(), PolicyError> {
        let users = self.sets.delete_from_set(ty, name, element)?;
        self.mark_all_modified(users);
        Ok(())
    }

    pub fn update_import(&mut self, protocol: &str, policies: &[&str]) -> Result<(), PolicyError> {
        self.update_list(Direction::Import, protocol, policies)
    }

    pub fn update_export(&mut self, protocol: &str, policies: &[&str]) -> Result<(), PolicyError> {
        self.update_list(Direction::Export, protocol, policies)
    }

    /// Declare a protocol variable. Every policy is recompiled on the next
    /// commit, since the change can alter which statements type-check.
    pub fn add_varmap(
        &mut self,
        protocol: &str,
        name: &str,
        ty: ValueType,
        access: Access,
        id: VarId,
    ) -> Result<(), PolicyError> {
        self.varmap.add_varmap(protocol, name, ty, access, id)?;
        let all: Vec<String> = self.policies.names().map(str::to_string).collect();
        self.modified.extend(all);
        Ok(())
    }

    /// Load variable declarations from JSON, as [`VarMap::load_schema`].
    pub fn load_varmap(&mut self, json: &str) -> Result<usize, PolicyError> {
        let count = self.varmap.load_schema(json)?;
        let all: Vec<String> = self.policies.names().map(str::to_string).collect();
        self.modified.extend(all);
        Ok(count)
    }

    /// Schedule a compile. A zero delay compiles now; otherwise the compile
    /// runs from [`PolicyEngine::poll_commit`] once the delay has passed,
    /// and each further commit pushes the deadline back. `None` uses the
    /// configured delay.
    pub fn commit(&mut self, delay: Option<Duration>) -> Result<Option<CommitReport>, PolicyError> {
        let delay = delay.unwrap_or_else(|| self.config.commit_delay());
        if delay.is_zero() {
            return self.compile().map(Some);
        }
        let deadline = Instant::now() + delay;
        self.commit_deadline = Some(deadline);
        debug!(event = "Commit", phase = "Scheduled", delay_ms = delay.as_millis() as u64);
        Ok(None)
    }

    /// Run a scheduled compile whose deadline is at or before `now`.
    pub fn poll_commit(&mut self, now: Instant) -> Result<Option<CommitReport>, PolicyError> {
        match self.commit_deadline {
            Some(deadline) if deadline <= now => self.compile().map(Some),
            _ => Ok(None),
        }
    }

    /// Attach a protocol's filter slots and install its current programs.
    pub fn attach_protocol(
        &mut self,
        protocol: &str,
        filters: Arc<VersionFilters>,
    ) -> Result<(), PolicyError> {
        self.varmap.add_protocol(protocol);
        for (target, text) in self.installed.iter().filter(|(t, _)| t.protocol == protocol) {
            filters.get(target.direction).configure(text)?;
        }
        self.protocols.insert(protocol.to_string(), filters);
        info!(event = "Config", phase = "AttachProtocol", protocol = protocol);
        Ok(())
    }

    /// The installed program text for one filter slot.
    pub fn compiled_program(&self, protocol: &str, direction: Direction) -> Option<&str> {
        self.installed
            .get(&CodeTarget::new(protocol, direction))
            .map(String::as_str)
    }

    /// Compile `policy` as an import policy of `protocol` and run it on a
    /// route built from `attributes` (variable name to literal text).
    pub fn test_policy(
        &self,
        policy: &str,
        protocol: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<PolicyTest, PolicyError> {
        let statement = self.policies.get(policy)?;
        semantic::check(
            statement,
            protocol,
            Direction::Import,
            &self.varmap,
            &self.sets,
            &self.policies,
        )?;
        let code = codegen::generate(statement, protocol, &self.varmap, &self.policies)?;
        let program = assemble(&code.program(&self.sets)?)?;

        let mut route = RouteVarRW::new();
        for (name, text) in attributes {
            let var = self.varmap.variable(protocol, name)?;
            route = route.with(var.id, Value::create(var.ty, text)?);
        }
        let mut route = TracingVarRW::new(route);
        let outcome = Executor::new(&program).run(&mut route)?;
        let route = route.into_inner();

        let mut modified = BTreeMap::new();
        for id in route.modified() {
            let name = self.varmap.variable_by_id(protocol, id)?.name.clone();
            let value = route.get(id).map(Value::to_string).unwrap_or_default();
            modified.insert(name, value);
        }
        debug!(
            event = "TestPolicy",
            phase = "Result",
            policy = policy,
            protocol = protocol,
            outcome = %outcome,
            modified = modified.len()
        );
        Ok(PolicyTest {
            accepted: outcome.accepted(),
            outcome,
            modified,
        })
    }

    /// Text listing for introspection. An empty `name` lists everything of
    /// that kind.
    pub fn show(&self, kind: ShowKind, name: &str) -> Result<String, PolicyError> {
        match kind {
            ShowKind::PolicyStatement if name.is_empty() => {
                let mut out = String::new();
                for policy in self.policies.iter() {
                    out.push_str(&printer::print_policy(policy)?);
                }
                Ok(out)
            }
            ShowKind::PolicyStatement => printer::print_policy(self.policies.get(name)?),
            ShowKind::Set if name.is_empty() => Ok(self.sets.to_string()),
            ShowKind::Set => {
                let users = self.sets.dependents(name)?.iter().cloned().collect::<Vec<_>>();
                let value = match self.sets.get(name)? {
                    Some(v) => format!("{} {}", v.value_type(), v.to_bytecode()),
                    None => "(empty)".to_string(),
                };
                Ok(format!("{name}: {value}\nused by: {}\n", users.join(" ")))
            }
            ShowKind::Varmap if name.is_empty() => Ok(self.varmap.to_string()),
            ShowKind::Varmap => {
                let mut vars: Vec<_> = self.varmap.variables(name)?.collect();
                vars.sort_by_key(|v| v.id);
                let mut out = format!("{name}:\n");
                for var in vars {
                    out.push_str(&format!("  {} {} {} {}\n", var.id, var.name, var.ty, var.access));
                }
                Ok(out)
            }
            ShowKind::Code => {
                let mut out = String::new();
                for (target, text) in &self.installed {
                    if name.is_empty() || target.protocol == name {
                        out.push_str(&format!("TARGET {target}\n{text}"));
                    }
                }
                Ok(out)
            }
        }
    }

    /// Apply `change` to a copy of `name`, then swap the copy in with its
    /// dependencies re-registered. Nothing changes if any step fails.
    fn edit(
        &mut self,
        name: &str,
        change: impl FnOnce(&mut PolicyStatement) -> Result<(), PolicyError>,
    ) -> Result<(), PolicyError> {
        let mut policy = self.policies.get(name)?.clone();
        change(&mut policy)?;
        let (sets, subs) = dependency::collect(&policy, &self.sets, &self.policies)?;
        if subs.contains(name) {
            return Err(PolicyError::dependency(
                0,
                format!("policy {name} calls itself"),
            ));
        }

        let (old_sets, old_subs) = policy.replace_dependencies(sets.clone(), subs.clone());
        for set in old_sets.difference(&sets) {
            self.sets.del_dependency(set, name);
        }
        for set in sets.difference(&old_sets) {
            if let Err(e) = self.sets.add_dependency(set, name) {
                panic!("set {set} vanished after dependency collection: {e}");
            }
        }
        for sub in old_subs.difference(&subs) {
            self.policies.del_dependency(sub, name);
        }
        for sub in subs.difference(&old_subs) {
            if let Err(e) = self.policies.add_dependency(sub, name) {
                panic!("policy {sub} vanished after dependency collection: {e}");
            }
        }
        self.policies.replace(policy)?;
        self.mark_modified(name);
        Ok(())
    }

    /// Mark `name` and every policy calling it, directly or not.
    fn mark_modified(&mut self, name: &str) {
        let mut seen = BTreeSet::new();
        let mut pending = vec![name.to_string()];
        while let Some(policy) = pending.pop() {
            if !seen.insert(policy.clone()) {
                continue;
            }
            self.modified.insert(policy.clone());
            if let Ok(users) = self.policies.dependents(&policy) {
                pending.extend(
                    users
                        .iter()
                        .filter(|u| self.policies.exists(u))
                        .cloned(),
                );
            }
        }
    }

    fn mark_all_modified(&mut self, names: BTreeSet<String>) {
        for name in names {
            self.mark_modified(&name);
        }
    }

    fn update_list(
        &mut self,
        direction: Direction,
        protocol: &str,
        names: &[&str],
    ) -> Result<(), PolicyError> {
        if !self.varmap.protocol_known(protocol) {
            return Err(PolicyError::NotFound(format!("protocol {protocol}")));
        }
        let user = format!("{direction}:{protocol}");
        let mut seen = BTreeSet::new();
        for name in names {
            if !self.policies.exists(name) {
                return Err(PolicyError::NotFound(format!("policy {name}")));
            }
            if !seen.insert(*name) {
                return Err(PolicyError::AlreadyExists(format!("policy {name} in {user}")));
            }
        }

        let lists = match direction {
            Direction::Import => &self.imports,
            _ => &self.exports,
        };
        let old: Vec<String> = lists
            .get(protocol)
            .map(|l| l.policy_names().map(str::to_string).collect())
            .unwrap_or_default();
        let tag_base = match (direction, lists.contains_key(protocol)) {
            (Direction::Export, false) if !names.is_empty() => Some(self.allocate_tag_block()?),
            _ => None,
        };

        for name in &old {
            self.policies.del_dependency(name, &user);
        }
        for name in names {
            if let Err(e) = self.policies.add_dependency(name, &user) {
                panic!("policy {name} vanished while updating {user}: {e}");
            }
        }

        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let lists = match direction {
            Direction::Import => &mut self.imports,
            _ => &mut self.exports,
        };
        if names.is_empty() {
            lists.remove(protocol);
        } else {
            match lists.entry(protocol.to_string()) {
                Entry::Occupied(mut entry) => entry.get_mut().set_policies(&names),
                Entry::Vacant(entry) => {
                    let list = match tag_base {
                        Some(base) => PolicyList::export(
                            protocol,
                            &names,
                            base,
                            base + self.config.tag_block_size,
                        ),
                        None => PolicyList::import(protocol, &names),
                    };
                    entry.insert(list);
                }
            }
        }
        info!(
            event = "Config",
            phase = "UpdateList",
            list = user.as_str(),
            policies = ?names
        );
        Ok(())
    }

    fn allocate_tag_block(&mut self) -> Result<u32, PolicyError> {
        let base = self.next_tag_base;
        self.next_tag_base = base
            .checked_add(self.config.tag_block_size)
            .ok_or_else(|| PolicyError::ValueError("export tag space exhausted".to_string()))?;
        Ok(base)
    }

    /// Recompile what changed, link every target and install changed
    /// programs into the attached protocols.
    fn compile(&mut self) -> Result<CommitReport, PolicyError> {
        self.commit_deadline = None;
        let env = CompileEnv {
            varmap: &self.varmap,
            sets: &self.sets,
            policies: &self.policies,
            modified: &self.modified,
        };
        let mut report = CommitReport::default();
        for list in self.imports.values_mut().chain(self.exports.values_mut()) {
            report.failed.extend(list.compile(env));
        }

        let mut linked: BTreeMap<CodeTarget, Code> = BTreeMap::new();
        for list in self.imports.values().chain(self.exports.values()) {
            for (target, code) in list.link_code() {
                match linked.entry(target) {
                    Entry::Occupied(mut entry) => *entry.get_mut() += &code,
                    Entry::Vacant(entry) => {
                        entry.insert(code);
                    }
                }
            }
        }
        let mut programs = BTreeMap::new();
        for (target, code) in linked {
            let text = code.program(&self.sets)?;
            programs.insert(target, text);
        }

        for (target, text) in programs.iter() {
            if self.installed.get(target) != Some(text) {
                self.install(target, Some(text.as_str()))?;
                self.installed.insert(target.clone(), text.clone());
                report.configured.push(target.clone());
            }
        }
        let vanished: Vec<CodeTarget> = self
            .installed
            .keys()
            .filter(|target| !programs.contains_key(*target))
            .cloned()
            .collect();
        for target in vanished {
            self.install(&target, None)?;
            self.installed.remove(&target);
            report.reset.push(target);
        }
        self.modified = report.failed.iter().map(|f| f.policy.clone()).collect();

        for failure in &report.failed {
            warn!(event = "Commit", phase = "Failed", failure = %failure);
        }
        info!(
            event = "Commit",
            phase = "Done",
            failed = report.failed.len(),
            configured = report.configured.len(),
            reset = report.reset.len()
        );
        Ok(report)
    }

    fn install(&self, target: &CodeTarget, text: Option<&str>) -> Result<(), PolicyError> {
        let Some(filters) = self.protocols.get(&target.protocol) else {
            return Ok(());
        };
        let slot = filters.get(target.direction);
        match text {
            Some(text) => slot.configure(text).map(|_| ()),
            None => slot.reset(),
        }
    }
}

#[cfg(test)]
mod tests;
