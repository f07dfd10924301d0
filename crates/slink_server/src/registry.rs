//! Invocation groups, and the registry that names them.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use thiserror::Error;

/// A named, fixed set of operations a session may invoke.
#[derive(Debug, PartialEq, Eq)]
pub struct InvocationGroup {
    name: String,
    allowed_operations: BTreeSet<String>,
}

impl InvocationGroup {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn allowed_operations(&self) -> &BTreeSet<String> {
        &self.allowed_operations
    }

    pub fn allows(&self, operation: &str) -> bool {
        self.allowed_operations.contains(operation)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invocation group {0:?} is already registered")]
    DuplicateGroup(String),
    #[error("no invocation group named {0:?}")]
    UnknownGroup(String),
    #[error("invocation group names must not be empty")]
    EmptyGroupName,
}

/// Maps group names to their invocation groups.
///
/// Groups are registered while the registry is exclusively owned, at startup. Once serving, the
/// registry is shared behind an [Arc] and only looked up, so concurrent lookups need no locking.
/// Deployments that want hot registration must wrap the registry in their own lock.
#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: HashMap<String, Arc<InvocationGroup>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from already-parsed group definitions. Fails on the first duplicate.
    pub fn build<I, N, Ops, Op>(groups: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = (N, Ops)>,
        N: Into<String>,
        Ops: IntoIterator<Item = Op>,
        Op: Into<String>,
    {
        let mut registry = Self::new();
        for (name, operations) in groups {
            registry.register(name, operations)?;
        }
        Ok(registry)
    }

    pub fn register<Op: Into<String>>(
        &mut self,
        name: impl Into<String>,
        operations: impl IntoIterator<Item = Op>,
    ) -> Result<&Arc<InvocationGroup>, RegistryError> {
        use std::collections::hash_map::Entry;

        let name = name.into();
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyGroupName);
        }
        match self.groups.entry(name) {
            Entry::Occupied(e) => Err(RegistryError::DuplicateGroup(e.key().clone())),
            Entry::Vacant(e) => {
                let group = InvocationGroup {
                    name: e.key().clone(),
                    allowed_operations: operations.into_iter().map(Into::into).collect(),
                };
                if group.allowed_operations.is_empty() {
                    tracing::warn!(
                        group = %group.name,
                        "registered invocation group with no operations"
                    );
                }
                Ok(e.insert(Arc::new(group)))
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<InvocationGroup>, RegistryError> {
        self.groups
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownGroup(name.to_owned()))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }
}
