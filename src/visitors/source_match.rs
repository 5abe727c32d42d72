//! Source half of an export policy.
//!
//! One fragment per source protocol named by the policy's terms, targeted at
//! that protocol's source-match slot. A term whose source block matches adds
//! its tag to `policytags`; dest and action blocks are left to the export
//! fragment.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;

use crate::code::{Code, CodeTarget};
use crate::error::PolicyError;
use crate::policy::{PolicyMap, PolicyStatement};
use crate::types::Direction;
use crate::var_map::VarMap;
use crate::varrw::VAR_POLICYTAGS;

use super::codegen::CodeGenerator;
use super::{TagCounter, source_protocol};

/// Compile the source-match fragments of `policy`, taking one tag per term
/// from `tags` in the same order as [`super::export::generate`].
pub fn generate(
    policy: &PolicyStatement,
    varmap: &VarMap,
    policies: &PolicyMap,
    tags: &mut TagCounter,
) -> Result<Vec<Code>, PolicyError> {
    let mut generators: BTreeMap<String, CodeGenerator> = BTreeMap::new();
    for term in policy.terms() {
        let source = source_protocol(policy.name(), term)?;
        let tag = tags.next_tag()?;
        let generator = generators.entry(source.to_string()).or_insert_with(|| {
            let mut g = CodeGenerator::new(
                varmap,
                policies,
                CodeTarget::new(source, Direction::ExportSourceMatch),
            );
            g.emit(format!("POLICY_START {}", policy.name()));
            g
        });
        let code = generator.code_mut();
        code.tags.insert(tag);
        code.source_protocols.insert(source.to_string());

        generator.emit(format!("TERM_START {}", term.name()));
        generator.match_block(term.source())?;
        generator.emit(format!("PUSH u32 {tag}"));
        generator.emit(format!("LOAD {VAR_POLICYTAGS}"));
        generator.emit("ADD");
        generator.emit(format!("STORE {VAR_POLICYTAGS}"));
        generator.emit("TERM_END");
    }
    generators
        .into_values()
        .map(|mut generator| {
            generator.emit("POLICY_END");
            generator.finish()
        })
        .collect()
}

/// Policy that removes `tags` from `policytags`. Linked ahead of a list's
/// source-match fragments.
pub fn clear_tags(list: &str, target: CodeTarget, tags: &BTreeSet<u32>) -> Code {
    let mut code = Code::new(target);
    code.code = [
        format!("POLICY_START {list}"),
        "TERM_START clear-tags".to_string(),
        format!("PUSH set_u32 \"{}\"", tags.iter().join(",")),
        format!("LOAD {VAR_POLICYTAGS}"),
        "SUB".to_string(),
        format!("STORE {VAR_POLICYTAGS}"),
        "TERM_END".to_string(),
        "POLICY_END".to_string(),
    ]
    .iter()
    .map(|line| format!("{line}\n"))
    .collect();
    code
}
