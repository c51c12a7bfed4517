//! Configuration values stored in a [`ConfigScope`](super::ConfigScope).

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// A single configuration value.
///
/// `Str`, `Path`, `List` and `Map` are containers: a subclass that inherits one
/// gets its own deep copy. `Bool`, `Int`, `Symbol`, `Object` and `Lazy` are
/// references and are shared as-is.
#[derive(Clone)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Str(String),
    /// Symbolic identifier, e.g. the `:file` storage engine name.
    Symbol(String),
    Path(PathBuf),
    List(Vec<ConfigValue>),
    Map(BTreeMap<String, ConfigValue>),
    /// Shared reference to an arbitrary value (a storage engine, a GridFS bucket...).
    Object(ObjectRef),
    /// Deferred value, evaluated on every instance-level read.
    Lazy(LazyValue),
}

impl ConfigValue {
    /// Build a lazy value from a zero-argument closure.
    pub fn lazy<F>(f: F) -> Self
    where
        F: Fn() -> ConfigValue + Send + Sync + 'static,
    {
        ConfigValue::Lazy(LazyValue(Arc::new(f)))
    }

    /// Wrap an arbitrary value as a shared object reference.
    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        ConfigValue::Object(ObjectRef::new(value))
    }

    pub fn symbol(name: impl Into<String>) -> Self {
        ConfigValue::Symbol(name.into())
    }

    pub fn empty_map() -> Self {
        ConfigValue::Map(BTreeMap::new())
    }

    /// Whether a subclass gets a private copy of this value when inheriting it.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            ConfigValue::Str(_) | ConfigValue::Path(_) | ConfigValue::List(_) | ConfigValue::Map(_)
        )
    }

    /// Resolve a lazy value; any other value is returned unchanged.
    pub fn evaluate(self) -> ConfigValue {
        match self {
            ConfigValue::Lazy(lazy) => lazy.call(),
            other => other,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::Bool(_) => "bool",
            ConfigValue::Int(_) => "int",
            ConfigValue::Str(_) => "string",
            ConfigValue::Symbol(_) => "symbol",
            ConfigValue::Path(_) => "path",
            ConfigValue::List(_) => "list",
            ConfigValue::Map(_) => "map",
            ConfigValue::Object(_) => "object",
            ConfigValue::Lazy(_) => "lazy",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// String view of `Str`, `Symbol` and UTF-8 `Path` values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Str(s) | ConfigValue::Symbol(s) => Some(s),
            ConfigValue::Path(p) => p.to_str(),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<PathBuf> {
        match self {
            ConfigValue::Path(p) => Some(p.clone()),
            ConfigValue::Str(s) => Some(PathBuf::from(s)),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, ConfigValue>> {
        match self {
            ConfigValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut BTreeMap<String, ConfigValue>> {
        match self {
            ConfigValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            ConfigValue::Object(o) => Some(o),
            _ => None,
        }
    }

    /// JSON rendering for diagnostics. Objects and lazy values are opaque.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            ConfigValue::Bool(b) => Value::Bool(*b),
            ConfigValue::Int(i) => Value::from(*i),
            ConfigValue::Str(s) => Value::String(s.clone()),
            ConfigValue::Symbol(s) => Value::String(format!(":{}", s)),
            ConfigValue::Path(p) => Value::String(p.display().to_string()),
            ConfigValue::List(items) => Value::Array(items.iter().map(|v| v.to_json()).collect()),
            ConfigValue::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            ConfigValue::Object(_) => Value::String("<object>".to_string()),
            ConfigValue::Lazy(_) => Value::String("<lazy>".to_string()),
        }
    }
}

impl fmt::Debug for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(b) => write!(f, "Bool({})", b),
            ConfigValue::Int(i) => write!(f, "Int({})", i),
            ConfigValue::Str(s) => write!(f, "Str({:?})", s),
            ConfigValue::Symbol(s) => write!(f, "Symbol(:{})", s),
            ConfigValue::Path(p) => write!(f, "Path({:?})", p),
            ConfigValue::List(items) => f.debug_tuple("List").field(items).finish(),
            ConfigValue::Map(map) => f.debug_tuple("Map").field(map).finish(),
            ConfigValue::Object(_) => write!(f, "Object(..)"),
            ConfigValue::Lazy(_) => write!(f, "Lazy(..)"),
        }
    }
}

/// Structural equality. Objects compare by identity; lazy values never compare equal.
impl PartialEq for ConfigValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ConfigValue::Bool(a), ConfigValue::Bool(b)) => a == b,
            (ConfigValue::Int(a), ConfigValue::Int(b)) => a == b,
            (ConfigValue::Str(a), ConfigValue::Str(b)) => a == b,
            (ConfigValue::Symbol(a), ConfigValue::Symbol(b)) => a == b,
            (ConfigValue::Path(a), ConfigValue::Path(b)) => a == b,
            (ConfigValue::List(a), ConfigValue::List(b)) => a == b,
            (ConfigValue::Map(a), ConfigValue::Map(b)) => a == b,
            (ConfigValue::Object(a), ConfigValue::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Int(value)
    }
}

impl From<i32> for ConfigValue {
    fn from(value: i32) -> Self {
        ConfigValue::Int(i64::from(value))
    }
}

impl From<u32> for ConfigValue {
    fn from(value: u32) -> Self {
        ConfigValue::Int(i64::from(value))
    }
}

impl From<u16> for ConfigValue {
    fn from(value: u16) -> Self {
        ConfigValue::Int(i64::from(value))
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::Str(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::Str(value)
    }
}

impl From<PathBuf> for ConfigValue {
    fn from(value: PathBuf) -> Self {
        ConfigValue::Path(value)
    }
}

impl From<BTreeMap<String, ConfigValue>> for ConfigValue {
    fn from(value: BTreeMap<String, ConfigValue>) -> Self {
        ConfigValue::Map(value)
    }
}

impl From<Vec<ConfigValue>> for ConfigValue {
    fn from(value: Vec<ConfigValue>) -> Self {
        ConfigValue::List(value)
    }
}

/// Shared, type-erased reference held by [`ConfigValue::Object`].
#[derive(Clone)]
pub struct ObjectRef(Arc<dyn Any + Send + Sync>);

impl ObjectRef {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        ObjectRef(Arc::new(value))
    }

    /// Downcast to the concrete type stored in this reference.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.0.clone().downcast::<T>().ok()
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Deferred computation held by [`ConfigValue::Lazy`].
#[derive(Clone)]
pub struct LazyValue(Arc<dyn Fn() -> ConfigValue + Send + Sync>);

impl LazyValue {
    pub fn call(&self) -> ConfigValue {
        (self.0)()
    }
}
