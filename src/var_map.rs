//! Per-protocol variable schema.
//!
//! Each protocol gets a copy of the metavariables when it is first seen.
//! Variable ids below [`VAR_FIRST_PROTOCOL`] are reserved for metavariables
//! and filter slots.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tracing::debug;

use crate::error::PolicyError;
use crate::types::ValueType;
use crate::varrw::{VAR_FIRST_PROTOCOL, VAR_POLICYTAGS, VAR_TAG, VAR_TRACE, VarId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum Access {
    #[strum(serialize = "r")]
    #[serde(rename = "r")]
    Read,
    #[strum(serialize = "rw")]
    #[serde(rename = "rw")]
    ReadWrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ValueType,
    pub access: Access,
    pub id: VarId,
}

impl Variable {
    pub fn new(name: &str, ty: ValueType, access: Access, id: VarId) -> Self {
        Variable {
            name: name.to_string(),
            ty,
            access,
            id,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ProtocolVars {
    by_name: BTreeMap<String, Variable>,
    by_id: BTreeMap<VarId, String>,
}

impl ProtocolVars {
    fn insert(&mut self, var: Variable) {
        self.by_id.insert(var.id, var.name.clone());
        self.by_name.insert(var.name.clone(), var);
    }
}

#[derive(Debug, Clone)]
pub struct VarMap {
    metavars: ProtocolVars,
    protocols: BTreeMap<String, ProtocolVars>,
}

impl Default for VarMap {
    fn default() -> Self {
        let mut metavars = ProtocolVars::default();
        metavars.insert(Variable::new("trace", ValueType::U32, Access::ReadWrite, VAR_TRACE));
        metavars.insert(Variable::new(
            "policytags",
            ValueType::SetU32,
            Access::ReadWrite,
            VAR_POLICYTAGS,
        ));
        metavars.insert(Variable::new("tag", ValueType::U32, Access::ReadWrite, VAR_TAG));
        VarMap {
            metavars,
            protocols: BTreeMap::new(),
        }
    }
}

impl VarMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a protocol variable.
    ///
    /// Redeclaring a variable identically is accepted; a conflicting name,
    /// id or type is an error.
    pub fn add_varmap(
        &mut self,
        protocol: &str,
        name: &str,
        ty: ValueType,
        access: Access,
        id: VarId,
    ) -> Result<(), PolicyError> {
        if id < VAR_FIRST_PROTOCOL {
            return Err(PolicyError::VarMapError(format!(
                "id {id} of {protocol}/{name} is reserved"
            )));
        }
        if ty == ValueType::Filter {
            return Err(PolicyError::VarMapError(format!(
                "{protocol}/{name} cannot hold filters"
            )));
        }
        let wanted = Variable::new(name, ty, access, id);
        let vars = self.ensure_protocol(protocol);
        if let Some(existing) = vars.by_name.get(name) {
            if *existing == wanted {
                return Ok(());
            }
            return Err(PolicyError::VarMapError(format!(
                "{protocol}/{name} already declared as {} {} {}",
                existing.ty, existing.access, existing.id
            )));
        }
        if let Some(other) = vars.by_id.get(&id) {
            return Err(PolicyError::VarMapError(format!(
                "id {id} of {protocol}/{name} already used by {other}"
            )));
        }
        debug!(
            event = "VarMap",
            phase = "Add",
            protocol = protocol,
            variable = name,
            value_type = %ty,
            access = %access,
            id = id
        );
        vars.insert(wanted);
        Ok(())
    }

    /// Bulk declaration from `{ "<protocol>": [{ "name", "type", "access", "id" }] }`.
    ///
    /// Returns the number of variables declared. Nothing is declared if any
    /// entry is rejected.
    pub fn load_schema(&mut self, json: &str) -> Result<usize, PolicyError> {
        let schema: BTreeMap<String, Vec<Variable>> = serde_json::from_str(json)?;
        let mut staged = self.clone();
        let mut count = 0;
        for (protocol, vars) in &schema {
            staged.ensure_protocol(protocol);
            for var in vars {
                staged.add_varmap(protocol, &var.name, var.ty, var.access, var.id)?;
                count += 1;
            }
        }
        *self = staged;
        Ok(count)
    }

    /// Register a protocol with only the metavariables.
    pub fn add_protocol(&mut self, protocol: &str) {
        self.ensure_protocol(protocol);
    }

    pub fn protocol_known(&self, protocol: &str) -> bool {
        self.protocols.contains_key(protocol)
    }

    pub fn protocols(&self) -> impl Iterator<Item = &str> {
        self.protocols.keys().map(String::as_str)
    }

    pub fn variable(&self, protocol: &str, name: &str) -> Result<&Variable, PolicyError> {
        self.protocol_vars(protocol)?
            .by_name
            .get(name)
            .ok_or_else(|| PolicyError::VarMapError(format!("unknown variable {name} in {protocol}")))
    }

    pub fn variable_by_id(&self, protocol: &str, id: VarId) -> Result<&Variable, PolicyError> {
        let vars = self.protocol_vars(protocol)?;
        vars.by_id
            .get(&id)
            .and_then(|name| vars.by_name.get(name))
            .ok_or_else(|| PolicyError::VarMapError(format!("unknown variable id {id} in {protocol}")))
    }

    pub fn variables(&self, protocol: &str) -> Result<impl Iterator<Item = &Variable>, PolicyError> {
        Ok(self.protocol_vars(protocol)?.by_name.values())
    }

    fn protocol_vars(&self, protocol: &str) -> Result<&ProtocolVars, PolicyError> {
        self.protocols
            .get(protocol)
            .ok_or_else(|| PolicyError::VarMapError(format!("unknown protocol {protocol}")))
    }

    fn ensure_protocol(&mut self, protocol: &str) -> &mut ProtocolVars {
        let metavars = &self.metavars;
        self.protocols
            .entry(protocol.to_string())
            .or_insert_with(|| metavars.clone())
    }
}

impl Display for VarMap {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for (protocol, vars) in &self.protocols {
            writeln!(f, "{protocol}:")?;
            for var in vars.by_id.values().filter_map(|n| vars.by_name.get(n)) {
                writeln!(f, "  {} {} {} {}", var.id, var.name, var.ty, var.access)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[test]
    fn test_metavars_copied_on_first_sight() {
        let mut vm = VarMap::new();
        vm.add_varmap("bgp", "med", ValueType::U32, Access::ReadWrite, 10)
            .unwrap();
        assert_eq!(vm.variable("bgp", "policytags").unwrap().id, VAR_POLICYTAGS);
        assert_eq!(vm.variable("bgp", "trace").unwrap().id, VAR_TRACE);
        assert_eq!(vm.variable_by_id("bgp", 10).unwrap().name, "med");
        assert!(vm.variable("rip", "med").is_err());
    }

    #[parameterized(
        reserved_id = { "x", ValueType::U32, 3 },
        id_clash = { "other", ValueType::U32, 10 },
        type_clash = { "med", ValueType::I32, 10 },
        filter_type = { "f", ValueType::Filter, 20 },
    )]
    fn test_add_rejects(name: &str, ty: ValueType, id: VarId) {
        let mut vm = VarMap::new();
        vm.add_varmap("bgp", "med", ValueType::U32, Access::ReadWrite, 10)
            .unwrap();
        assert!(matches!(
            vm.add_varmap("bgp", name, ty, Access::ReadWrite, id),
            Err(PolicyError::VarMapError(_))
        ));
    }

    #[test]
    fn test_identical_redeclaration_accepted() {
        let mut vm = VarMap::new();
        vm.add_varmap("bgp", "med", ValueType::U32, Access::ReadWrite, 10)
            .unwrap();
        vm.add_varmap("bgp", "med", ValueType::U32, Access::ReadWrite, 10)
            .unwrap();
    }

    #[test]
    fn test_load_schema() {
        let mut vm = VarMap::new();
        let n = vm
            .load_schema(
                r#"{
                    "bgp": [
                        {"name": "as-path", "type": "txt", "access": "rw", "id": 11},
                        {"name": "network4", "type": "ipv4net", "access": "r", "id": 12}
                    ],
                    "static": []
                }"#,
            )
            .unwrap();
        assert_eq!(n, 2);
        assert!(vm.protocol_known("static"));
        assert_eq!(vm.variable("bgp", "network4").unwrap().access, Access::Read);
        insta::assert_snapshot!(vm.to_string(), @r"
        bgp:
          0 trace u32 rw
          1 policytags set_u32 rw
          5 tag u32 rw
          11 as-path txt rw
          12 network4 ipv4net r
        static:
          0 trace u32 rw
          1 policytags set_u32 rw
          5 tag u32 rw
        ");
    }

    #[test]
    fn test_rejected_schema_declares_nothing() {
        let mut vm = VarMap::new();
        vm.add_varmap("bgp", "med", ValueType::U32, Access::ReadWrite, 10)
            .unwrap();
        let err = vm
            .load_schema(
                r#"{
                    "bgp": [{"name": "as-path", "type": "txt", "access": "rw", "id": 11}],
                    "rip": [
                        {"name": "metric", "type": "u32", "access": "rw", "id": 20},
                        {"name": "metric", "type": "txt", "access": "rw", "id": 20}
                    ]
                }"#,
            )
            .unwrap_err();
        assert!(err.to_string().contains("already declared"), "{err}");
        assert!(vm.variable("bgp", "as-path").is_err());
        assert!(vm.variable("bgp", "med").is_ok());
        assert!(!vm.protocol_known("rip"));
    }

    #[test]
    fn test_load_schema_bad_json() {
        let mut vm = VarMap::new();
        assert!(matches!(
            vm.load_schema("{"),
            Err(PolicyError::InvalidFormat(_))
        ));
    }
}
