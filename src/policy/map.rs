use std::collections::BTreeSet;

use crate::dependency::Dependency;
use crate::error::PolicyError;

use super::statement::PolicyStatement;

/// All configured policies, with the lists and policies using each one.
#[derive(Debug, Clone)]
pub struct PolicyMap {
    policies: Dependency<PolicyStatement>,
}

impl Default for PolicyMap {
    fn default() -> Self {
        PolicyMap {
            policies: Dependency::new("policy"),
        }
    }
}

impl PolicyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, name: &str) -> Result<(), PolicyError> {
        self.policies.create(name, PolicyStatement::new(name))
    }

    pub fn delete(&mut self, name: &str) -> Result<PolicyStatement, PolicyError> {
        self.policies.remove(name)
    }

    /// Swap in an edited copy of a policy.
    pub fn replace(&mut self, policy: PolicyStatement) -> Result<(), PolicyError> {
        let name = policy.name().to_string();
        self.policies.update(&name, policy).map(|_| ())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.policies.exists(name)
    }

    pub fn get(&self, name: &str) -> Result<&PolicyStatement, PolicyError> {
        self.policies.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut PolicyStatement, PolicyError> {
        self.policies.get_mut(name)
    }

    pub fn add_dependency(&mut self, name: &str, user: &str) -> Result<(), PolicyError> {
        self.policies.add_dependency(name, user)
    }

    pub fn del_dependency(&mut self, name: &str, user: &str) {
        self.policies.del_dependency(name, user)
    }

    /// Lists (`import:<protocol>`, `export:<protocol>`) and policies using `name`.
    pub fn dependents(&self, name: &str) -> Result<&BTreeSet<String>, PolicyError> {
        self.policies.dependents(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.policies.names()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PolicyStatement> {
        self.policies.iter().map(|(_, p)| p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_refused_while_used() {
        let mut policies = PolicyMap::new();
        policies.create("common").unwrap();
        policies.add_dependency("common", "import:bgp").unwrap();
        assert!(matches!(policies.delete("common"), Err(PolicyError::InUse(_))));
        policies.del_dependency("common", "import:bgp");
        assert_eq!(policies.delete("common").unwrap().name(), "common");
    }

    #[test]
    fn test_replace_requires_existing() {
        let mut policies = PolicyMap::new();
        assert!(matches!(
            policies.replace(PolicyStatement::new("ghost")),
            Err(PolicyError::NotFound(_))
        ));
    }
}
