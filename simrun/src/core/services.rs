//! Service sets and dependency resolution for tools and tests.
//!
//! A [`ServiceSet`] maps a capability type to a single shared instance. Units
//! declare what they need as [`Dependency`] values; resolution hands them a
//! [`Resolved`] view containing exactly the services they asked for.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{Result, anyhow};

use crate::error::ResolveError;

type SharedService = Arc<dyn Any + Send + Sync>;

#[derive(Clone)]
struct Entry {
    type_name: &'static str,
    value: SharedService,
}

/// Mapping from capability type to singleton instance.
#[derive(Clone, Default)]
pub struct ServiceSet {
    entries: HashMap<TypeId, Entry>,
}

impl ServiceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the instance registered for `T`.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> &mut Self {
        self.insert_shared(Arc::new(value))
    }

    pub fn insert_shared<T: Any + Send + Sync>(&mut self, value: Arc<T>) -> &mut Self {
        self.entries.insert(
            TypeId::of::<T>(),
            Entry {
                type_name: std::any::type_name::<T>(),
                value,
            },
        );
        self
    }

    pub fn with<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let entry = self.entries.get(&TypeId::of::<T>())?;
        entry.value.clone().downcast::<T>().ok()
    }

    pub fn contains<T: Any>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered type names, sorted.
    pub fn type_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> =
            self.entries.values().map(|entry| entry.type_name).collect();
        names.sort_unstable();
        names
    }

    /// Resolve `dependencies` strictly: a missing required service fails the
    /// whole resolution, a missing optional one is left out of the view.
    pub fn resolve(&self, dependencies: &[Dependency]) -> Result<Resolved, ResolveError> {
        let mut resolved = ServiceSet::new();
        for dependency in dependencies {
            match self.entries.get(&dependency.type_id) {
                Some(entry) => {
                    resolved.entries.insert(dependency.type_id, entry.clone());
                }
                None if dependency.required => {
                    return Err(ResolveError::Missing {
                        type_name: dependency.type_name,
                    });
                }
                None => {}
            }
        }
        Ok(Resolved { services: resolved })
    }
}

impl fmt::Debug for ServiceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.type_names()).finish()
    }
}

/// A service a unit needs before it can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    type_id: TypeId,
    pub type_name: &'static str,
    pub required: bool,
}

impl Dependency {
    pub fn required<T: Any>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            required: true,
        }
    }

    pub fn optional<T: Any>() -> Self {
        Self {
            required: false,
            ..Self::required::<T>()
        }
    }
}

/// Services injected into a single unit.
#[derive(Debug, Clone, Default)]
pub struct Resolved {
    services: ServiceSet,
}

impl Resolved {
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.services.get::<T>()
    }

    /// Like [`Resolved::get`], but an absent service is an error.
    pub fn require<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        self.get::<T>()
            .ok_or_else(|| anyhow!("service {} was not injected", std::any::type_name::<T>()))
    }
}
