//! Named objects with a reverse index of who uses them.
//!
//! Shared by the set map (sets used by policies) and the policy map
//! (policies used by policy lists and by other policies as subroutines).

use std::collections::{BTreeMap, BTreeSet};

use crate::error::PolicyError;

#[derive(Debug, Clone)]
struct Entry<T> {
    object: T,
    dependents: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct Dependency<T> {
    kind: &'static str,
    objects: BTreeMap<String, Entry<T>>,
}

impl<T> Dependency<T> {
    /// `kind` names the objects in error messages, e.g. `"set"`.
    pub fn new(kind: &'static str) -> Self {
        Dependency {
            kind,
            objects: BTreeMap::new(),
        }
    }

    pub fn create(&mut self, name: &str, object: T) -> Result<(), PolicyError> {
        if self.objects.contains_key(name) {
            return Err(PolicyError::AlreadyExists(format!("{} {name}", self.kind)));
        }
        self.objects.insert(
            name.to_string(),
            Entry {
                object,
                dependents: BTreeSet::new(),
            },
        );
        Ok(())
    }

    /// Remove an object nobody depends on.
    pub fn remove(&mut self, name: &str) -> Result<T, PolicyError> {
        let entry = self.entry(name)?;
        if !entry.dependents.is_empty() {
            return Err(PolicyError::InUse(format!(
                "{} {name} is used by {}",
                self.kind,
                entry.dependents.iter().cloned().collect::<Vec<_>>().join(", ")
            )));
        }
        self.objects
            .remove(name)
            .map(|e| e.object)
            .ok_or_else(|| self.not_found(name))
    }

    /// Replace an object, returning the previous one.
    pub fn update(&mut self, name: &str, object: T) -> Result<T, PolicyError> {
        let kind = self.kind;
        let entry = self
            .objects
            .get_mut(name)
            .ok_or_else(|| PolicyError::NotFound(format!("{kind} {name}")))?;
        Ok(std::mem::replace(&mut entry.object, object))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<&T, PolicyError> {
        self.entry(name).map(|e| &e.object)
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut T, PolicyError> {
        let kind = self.kind;
        self.objects
            .get_mut(name)
            .map(|e| &mut e.object)
            .ok_or_else(|| PolicyError::NotFound(format!("{kind} {name}")))
    }

    pub fn add_dependency(&mut self, name: &str, dependent: &str) -> Result<(), PolicyError> {
        let kind = self.kind;
        let entry = self
            .objects
            .get_mut(name)
            .ok_or_else(|| PolicyError::NotFound(format!("{kind} {name}")))?;
        entry.dependents.insert(dependent.to_string());
        Ok(())
    }

    /// Drop a registration made by [`Dependency::add_dependency`].
    ///
    /// # Panics
    /// If the object or the registration is missing: the reverse index is
    /// out of sync with its users.
    pub fn del_dependency(&mut self, name: &str, dependent: &str) {
        let Some(entry) = self.objects.get_mut(name) else {
            panic!(
                "{} {name} missing while releasing dependency of {dependent}",
                self.kind
            );
        };
        if !entry.dependents.remove(dependent) {
            panic!("{dependent} was not registered as user of {} {name}", self.kind);
        }
    }

    pub fn dependents(&self, name: &str) -> Result<&BTreeSet<String>, PolicyError> {
        self.entry(name).map(|e| &e.dependents)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.objects.iter().map(|(k, e)| (k.as_str(), &e.object))
    }

    fn entry(&self, name: &str) -> Result<&Entry<T>, PolicyError> {
        self.objects.get(name).ok_or_else(|| self.not_found(name))
    }

    fn not_found(&self, name: &str) -> PolicyError {
        PolicyError::NotFound(format!("{} {name}", self.kind))
    }
}
