//! Hierarchical configuration resolver
//!
//! A [`ConfigScope`] is the configuration of one uploader "class". Scopes form a
//! tree through an explicit parent pointer. Reading a key a scope never set walks
//! up to the nearest ancestor that has it and snapshots the value into the
//! reading scope, so the subclass can be mutated afterwards without touching its
//! ancestors.
//!
//! Unknown keys are an error ([`ConfigError::UnknownConfigKey`]) for every
//! operation; registered keys that no scope in the chain has set read as `None`.

mod value;

pub use value::{ConfigValue, LazyValue, ObjectRef};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};

use crate::error::ConfigError;

/// Per-class configuration node.
pub struct ConfigScope {
    name: String,
    parent: Option<Arc<ConfigScope>>,
    names: RwLock<BTreeSet<String>>,
    slots: RwLock<HashMap<String, ConfigValue>>,
}

impl ConfigScope {
    /// Create a root scope with no parent.
    pub fn base(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            parent: None,
            names: RwLock::new(BTreeSet::new()),
            slots: RwLock::new(HashMap::new()),
        })
    }

    /// Create a child scope inheriting every key registered on `self` and its ancestors.
    pub fn subclass(self: &Arc<Self>, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            parent: Some(Arc::clone(self)),
            names: RwLock::new(BTreeSet::new()),
            slots: RwLock::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Arc<ConfigScope>> {
        self.parent.as_ref()
    }

    /// Register a key on this scope. Descendants see it too.
    pub fn add_config(&self, name: impl Into<String>) {
        self.names
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into());
    }

    /// Whether `name` is registered on this scope or any ancestor.
    pub fn is_registered(&self, name: &str) -> bool {
        let own = self
            .names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name);
        own || self
            .parent
            .as_ref()
            .is_some_and(|parent| parent.is_registered(name))
    }

    /// All keys visible from this scope, sorted.
    pub fn registered_names(&self) -> Vec<String> {
        let mut all: BTreeSet<String> = self
            .parent
            .as_ref()
            .map(|p| p.registered_names().into_iter().collect())
            .unwrap_or_default();
        all.extend(
            self.names
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .cloned(),
        );
        all.into_iter().collect()
    }

    /// Whether this scope holds its own value (explicit or already inherited) for `name`.
    pub fn has_own(&self, name: &str) -> bool {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Class-level read: the raw value, lazy values left unevaluated.
    pub fn get(&self, name: &str) -> Result<Option<ConfigValue>, ConfigError> {
        self.ensure_registered(name)?;
        Ok(self.resolve(name))
    }

    /// Instance-level read: like [`get`](Self::get), but lazy values are evaluated.
    pub fn read(&self, name: &str) -> Result<Option<ConfigValue>, ConfigError> {
        Ok(self.get(name)?.map(ConfigValue::evaluate))
    }

    /// Store a value on this scope. No copy is made.
    pub fn set(&self, name: &str, value: impl Into<ConfigValue>) -> Result<(), ConfigError> {
        self.ensure_registered(name)?;
        self.slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value.into());
        Ok(())
    }

    /// Mutate this scope's own copy of a value in place, inheriting it first if needed.
    ///
    /// Returns `false` when the key has no value anywhere in the chain.
    pub fn update<F>(&self, name: &str, f: F) -> Result<bool, ConfigError>
    where
        F: FnOnce(&mut ConfigValue),
    {
        self.ensure_registered(name)?;
        if self.resolve(name).is_none() {
            return Ok(false);
        }
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        match slots.get_mut(name) {
            Some(value) => {
                f(value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Apply several assignments under one write lock.
    pub fn configure<F>(&self, f: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut Configurator<'_>) -> Result<(), ConfigError>,
    {
        let mut configurator = Configurator {
            scope: self,
            slots: self.slots.write().unwrap_or_else(PoisonError::into_inner),
        };
        f(&mut configurator)
    }

    pub fn read_bool(&self, name: &str) -> Result<Option<bool>, ConfigError> {
        self.read_typed(name, "bool", |v| v.as_bool())
    }

    pub fn read_int(&self, name: &str) -> Result<Option<i64>, ConfigError> {
        self.read_typed(name, "int", |v| v.as_int())
    }

    pub fn read_str(&self, name: &str) -> Result<Option<String>, ConfigError> {
        self.read_typed(name, "string", |v| v.as_str().map(String::from))
    }

    pub fn read_path(&self, name: &str) -> Result<Option<PathBuf>, ConfigError> {
        self.read_typed(name, "path", |v| v.as_path())
    }

    pub fn read_map(&self, name: &str) -> Result<Option<BTreeMap<String, ConfigValue>>, ConfigError> {
        self.read_typed(name, "map", |v| v.as_map().cloned())
    }

    fn read_typed<T>(
        &self,
        name: &str,
        expected: &'static str,
        extract: impl FnOnce(&ConfigValue) -> Option<T>,
    ) -> Result<Option<T>, ConfigError> {
        match self.read(name)? {
            None => Ok(None),
            Some(value) => extract(&value)
                .map(Some)
                .ok_or_else(|| ConfigError::TypeMismatch {
                    name: name.to_string(),
                    expected,
                }),
        }
    }

    fn ensure_registered(&self, name: &str) -> Result<(), ConfigError> {
        if self.is_registered(name) {
            Ok(())
        } else {
            Err(ConfigError::UnknownConfigKey(name.to_string()))
        }
    }

    fn resolve(&self, name: &str) -> Option<ConfigValue> {
        if let Some(own) = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Some(own.clone());
        }

        let inherited = self.parent.as_ref()?.resolve(name)?;
        // Clone is the snapshot: containers become independent copies, while
        // objects and lazy values keep pointing at the shared Arc.
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let value = slots.entry(name.to_string()).or_insert(inherited);
        Some(value.clone())
    }
}

impl std::fmt::Debug for ConfigScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigScope")
            .field("name", &self.name)
            .field("parent", &self.parent.as_ref().map(|p| p.name()))
            .finish_non_exhaustive()
    }
}

/// Write handle passed to [`ConfigScope::configure`].
pub struct Configurator<'a> {
    scope: &'a ConfigScope,
    slots: RwLockWriteGuard<'a, HashMap<String, ConfigValue>>,
}

impl Configurator<'_> {
    pub fn set(&mut self, name: &str, value: impl Into<ConfigValue>) -> Result<(), ConfigError> {
        self.scope.ensure_registered(name)?;
        self.slots.insert(name.to_string(), value.into());
        Ok(())
    }

    /// Drop this scope's own value so the key resolves through the parent again.
    pub fn clear(&mut self, name: &str) -> Result<(), ConfigError> {
        self.scope.ensure_registered(name)?;
        self.slots.remove(name);
        Ok(())
    }

    /// Value already assigned on this scope, if any.
    pub fn own(&self, name: &str) -> Option<&ConfigValue> {
        self.slots.get(name)
    }
}
