//! Named sets referenced from policies.
//!
//! A set's value is replaced wholesale on every change, never edited in
//! place. Updates return the policies that reference the set so the caller
//! can schedule them for recompilation.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter, Result as FmtResult};

use tracing::debug;

use crate::dependency::Dependency;
use crate::error::PolicyError;
use crate::types::{Value, ValueType};

#[derive(Debug, Clone)]
pub struct SetMap {
    sets: Dependency<Option<Value>>,
}

impl Default for SetMap {
    fn default() -> Self {
        SetMap {
            sets: Dependency::new("set"),
        }
    }
}

impl SetMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty, untyped set.
    pub fn create(&mut self, name: &str) -> Result<(), PolicyError> {
        self.sets.create(name, None)
    }

    /// Replace the contents of a set with comma separated `elements`.
    pub fn update(
        &mut self,
        ty: ValueType,
        name: &str,
        elements: &str,
    ) -> Result<BTreeSet<String>, PolicyError> {
        if !ty.is_set() {
            return Err(PolicyError::ValueError(format!("{ty} is not a set type")));
        }
        let value = Value::create(ty, elements)?;
        self.replace(name, value)
    }

    pub fn delete(&mut self, name: &str) -> Result<(), PolicyError> {
        self.sets.remove(name).map(|_| ())
    }

    pub fn add_to_set(
        &mut self,
        ty: ValueType,
        name: &str,
        element: &str,
    ) -> Result<BTreeSet<String>, PolicyError> {
        let current = self.typed_value(ty, name)?;
        let elem = Value::create(element_type(ty)?, element)?;
        let value = current.with_element(&elem)?;
        self.replace(name, value)
    }

    pub fn delete_from_set(
        &mut self,
        ty: ValueType,
        name: &str,
        element: &str,
    ) -> Result<BTreeSet<String>, PolicyError> {
        let current = self.typed_value(ty, name)?;
        let elem = Value::create(element_type(ty)?, element)?;
        let value = current.without_element(&elem)?;
        self.replace(name, value)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.sets.exists(name)
    }

    /// The set's value; `None` when it was created but never filled.
    pub fn get(&self, name: &str) -> Result<Option<&Value>, PolicyError> {
        self.sets.get(name).map(Option::as_ref)
    }

    pub fn add_dependency(&mut self, name: &str, policy: &str) -> Result<(), PolicyError> {
        self.sets.add_dependency(name, policy)
    }

    pub fn del_dependency(&mut self, name: &str, policy: &str) {
        self.sets.del_dependency(name, policy)
    }

    pub fn dependents(&self, name: &str) -> Result<&BTreeSet<String>, PolicyError> {
        self.sets.dependents(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sets.names()
    }

    /// Render one set in the `SET <type> <name> "<elements>"` program form.
    pub fn declaration(&self, name: &str) -> Result<String, PolicyError> {
        match self.get(name)? {
            Some(value) => Ok(format!(
                "SET {} {name} {}",
                value.value_type(),
                value.to_bytecode()
            )),
            None => Err(PolicyError::NotFound(format!("value of set {name}"))),
        }
    }

    fn typed_value(&self, ty: ValueType, name: &str) -> Result<Value, PolicyError> {
        match self.get(name)? {
            Some(value) if value.value_type() != ty => Err(PolicyError::ValueError(format!(
                "set {name} is {} not {ty}",
                value.value_type()
            ))),
            Some(value) => Ok(value.clone()),
            None => Ok(Value::default_for(ty)),
        }
    }

    fn replace(&mut self, name: &str, value: Value) -> Result<BTreeSet<String>, PolicyError> {
        debug!(event = "SetMap", phase = "Update", set = name, value = %value);
        self.sets.update(name, Some(value))?;
        Ok(self.sets.dependents(name)?.clone())
    }
}

fn element_type(ty: ValueType) -> Result<ValueType, PolicyError> {
    ty.element_type()
        .ok_or_else(|| PolicyError::ValueError(format!("{ty} is not a set type")))
}

impl Display for SetMap {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for (name, value) in self.sets.iter() {
            match value {
                Some(v) => writeln!(f, "{name}: {} {}", v.value_type(), v.to_bytecode())?,
                None => writeln!(f, "{name}: (empty)")?,
            }
        }
        Ok(())
    }
}
