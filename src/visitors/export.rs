//! Destination half of an export policy.
//!
//! The source block is left to the source-match fragments. Each term here
//! starts by testing that the route carries the term's tag in `policytags`,
//! then runs the dest and action blocks in the exporting protocol.

use crate::code::{Code, CodeTarget};
use crate::error::PolicyError;
use crate::policy::{PolicyMap, PolicyStatement};
use crate::types::Direction;
use crate::var_map::VarMap;
use crate::varrw::VAR_POLICYTAGS;

use super::codegen::CodeGenerator;
use super::{TagCounter, source_protocol};

/// Compile the export fragment of `policy` for the exporting `protocol`,
/// taking one tag per term from `tags`.
pub fn generate(
    policy: &PolicyStatement,
    protocol: &str,
    varmap: &VarMap,
    policies: &PolicyMap,
    tags: &mut TagCounter,
) -> Result<Code, PolicyError> {
    let mut generator =
        CodeGenerator::new(varmap, policies, CodeTarget::new(protocol, Direction::Export));
    generator.emit(format!("POLICY_START {}", policy.name()));
    for term in policy.terms() {
        let source = source_protocol(policy.name(), term)?;
        let tag = tags.next_tag()?;
        let code = generator.code_mut();
        code.tags.insert(tag);
        code.source_protocols.insert(source.to_string());

        generator.emit(format!("TERM_START {}", term.name()));
        generator.emit(format!("LOAD {VAR_POLICYTAGS}"));
        generator.emit(format!("PUSH set_u32 \"{tag}\""));
        generator.emit("LE");
        generator.emit("ONFALSE_EXIT");
        generator.match_block(term.dest())?;
        generator.action_block(term.action())?;
        generator.emit("TERM_END");
    }
    generator.emit("POLICY_END");
    generator.finish()
}
