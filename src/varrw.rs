//! Read/write access to route attributes during filter evaluation.
//!
//! Variables are addressed by the numeric id the varmap assigns them. A few
//! ids are reserved across all protocols:
//!
//! | id | name         | purpose                                   |
//! |----|--------------|-------------------------------------------|
//! | 0  | `trace`      | writing sets the evaluation trace level   |
//! | 1  | `policytags` | tags set by export source-match filters   |
//! | 2  | -            | pinned import filter                      |
//! | 3  | -            | pinned export source-match filter         |
//! | 4  | -            | pinned export filter                      |
//! | 5  | `tag`        | route tag                                 |
//!
//! Protocol variables start at [`VAR_FIRST_PROTOCOL`].

use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use crate::backend::FilterRef;
use crate::error::PolicyError;
use crate::types::{Value, ValueType};
use crate::var_map::{Access, VarMap};

pub type VarId = u32;

pub const VAR_TRACE: VarId = 0;
pub const VAR_POLICYTAGS: VarId = 1;
pub const VAR_FILTER_IM: VarId = 2;
pub const VAR_FILTER_SM: VarId = 3;
pub const VAR_FILTER_EX: VarId = 4;
pub const VAR_TAG: VarId = 5;
pub const VAR_FIRST_PROTOCOL: VarId = 10;

pub fn is_filter_slot(id: VarId) -> bool {
    matches!(id, VAR_FILTER_IM | VAR_FILTER_SM | VAR_FILTER_EX)
}

pub trait VarRW {
    fn read(&mut self, id: VarId) -> Result<Value, PolicyError>;

    fn write(&mut self, id: VarId, value: Value) -> Result<(), PolicyError>;

    /// Release values that only existed to satisfy reads.
    fn sync(&mut self) {}

    /// Called by the executor when a program stores to `trace`.
    fn set_trace(&mut self, _level: u32) {}
}

/// Compile-time stand-in for route state.
///
/// Reads fabricate the default value of the declared type; writes are
/// validated against the varmap for existence, access and exact type.
#[derive(Debug)]
pub struct SemanticVarRW<'a> {
    varmap: &'a VarMap,
    protocol: String,
    scratch: Vec<Value>,
}

impl<'a> SemanticVarRW<'a> {
    pub fn new(varmap: &'a VarMap, protocol: &str) -> Self {
        SemanticVarRW {
            varmap,
            protocol: protocol.to_string(),
            scratch: Vec::new(),
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn set_protocol(&mut self, protocol: &str) {
        self.protocol = protocol.to_string();
    }

    /// Number of fabricated values not yet released by [`VarRW::sync`].
    pub fn scratch_len(&self) -> usize {
        self.scratch.len()
    }
}

impl VarRW for SemanticVarRW<'_> {
    fn read(&mut self, id: VarId) -> Result<Value, PolicyError> {
        let var = self.varmap.variable_by_id(&self.protocol, id)?;
        let value = Value::default_for(var.ty);
        self.scratch.push(value.clone());
        Ok(value)
    }

    fn write(&mut self, id: VarId, value: Value) -> Result<(), PolicyError> {
        let var = self.varmap.variable_by_id(&self.protocol, id)?;
        if var.access != Access::ReadWrite {
            return Err(PolicyError::semantic(
                0,
                format!("variable {} is read-only in {}", var.name, self.protocol),
            ));
        }
        if value.value_type() != var.ty {
            return Err(PolicyError::semantic(
                0,
                format!(
                    "type mismatch: {} is {} but got {}",
                    var.name,
                    var.ty,
                    value.value_type()
                ),
            ));
        }
        Ok(())
    }

    fn sync(&mut self) {
        self.scratch.clear();
    }
}

/// Route attributes held in memory, keyed by variable id.
#[derive(Debug, Clone, Default)]
pub struct RouteVarRW {
    attributes: BTreeMap<VarId, Value>,
    modified: BTreeSet<VarId>,
}

impl RouteVarRW {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: VarId, value: Value) -> Self {
        self.attributes.insert(id, value);
        self
    }

    pub fn get(&self, id: VarId) -> Option<&Value> {
        self.attributes.get(&id)
    }

    /// Ids written since creation or the last [`RouteVarRW::clear_modified`].
    pub fn modified(&self) -> impl Iterator<Item = VarId> + '_ {
        self.modified.iter().copied()
    }

    pub fn clear_modified(&mut self) {
        self.modified.clear();
    }
}

impl VarRW for RouteVarRW {
    fn read(&mut self, id: VarId) -> Result<Value, PolicyError> {
        if let Some(value) = self.attributes.get(&id) {
            return Ok(value.clone());
        }
        match id {
            _ if is_filter_slot(id) => Ok(Value::Filter(FilterRef::default())),
            VAR_POLICYTAGS => Ok(Value::default_for(ValueType::SetU32)),
            VAR_TAG => Ok(Value::U32(0)),
            _ => Err(PolicyError::EvalError(format!("attribute {id} not set"))),
        }
    }

    fn write(&mut self, id: VarId, value: Value) -> Result<(), PolicyError> {
        self.attributes.insert(id, value);
        self.modified.insert(id);
        Ok(())
    }
}

/// Decorator logging every access. Accesses are also recorded once a
/// program raised the trace level above zero.
#[derive(Debug)]
pub struct TracingVarRW<V> {
    inner: V,
    level: u32,
    records: Vec<String>,
}

impl<V: VarRW> TracingVarRW<V> {
    pub fn new(inner: V) -> Self {
        TracingVarRW {
            inner,
            level: 0,
            records: Vec::new(),
        }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn records(&self) -> &[String] {
        &self.records
    }

    pub fn into_inner(self) -> V {
        self.inner
    }
}

impl<V: VarRW> VarRW for TracingVarRW<V> {
    fn read(&mut self, id: VarId) -> Result<Value, PolicyError> {
        let value = self.inner.read(id)?;
        trace!(event = "VarRW", phase = "Read", id, value = %value);
        if self.level > 0 {
            self.records.push(format!("read {id} = {value}"));
        }
        Ok(value)
    }

    fn write(&mut self, id: VarId, value: Value) -> Result<(), PolicyError> {
        trace!(event = "VarRW", phase = "Write", id, value = %value);
        if self.level > 0 {
            self.records.push(format!("write {id} = {value}"));
        }
        self.inner.write(id, value)
    }

    fn sync(&mut self) {
        self.inner.sync();
    }

    fn set_trace(&mut self, level: u32) {
        self.level = level;
        self.inner.set_trace(level);
    }
}
