// src/lib.rs
//! Routing policy engine core.
//!
//! Policies are configured as terms of `source`, `dest` and `action`
//! statements, type-checked against each protocol's variable map, and
//! compiled into stack-machine programs. Import policies run where a route
//! enters; export policies are split into a source-match half that tags
//! routes in the originating protocol and an export half that tests those
//! tags in the destination protocol. Installed programs are versioned, and
//! a route keeps evaluating against the version it first saw.

pub use backend::{Outcome, PinRelease, VersionFilter, VersionFilters};
pub use config::EngineConfig;
pub use engine::{CommitReport, PolicyEngine, PolicyTest, ShowKind};
pub use error::PolicyError;
pub use policy::Block;
pub use types::{ConfigNodeId, Direction, Value, ValueType};
pub use var_map::Access;
pub use varrw::{RouteVarRW, VarId, VarRW};

pub mod ast;
pub mod backend;
pub mod code;
pub mod config;
mod dependency;
pub mod engine;
pub mod error;
pub mod operators;
pub mod parser;
pub mod policy;
pub mod policy_list;
pub mod set_map;
pub mod types;
pub mod var_map;
pub mod varrw;
pub mod visitors;

#[cfg(test)]
mod tests;
