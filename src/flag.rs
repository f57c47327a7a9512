//! Typed flag definitions.
//!
//! A [`Flag<T>`] is an immutable description of one overridable behaviour:
//! its id, the shape of its data, a default, and the pair of functions that
//! turn user input into a `T` and a `T` back into text.  Values are stored on
//! terrains as `serde_json::Value`, so any `T: FlagValue` round-trips through
//! persistence unchanged.
//!
//! Flags compare and hash by id only.  [`AnyFlag`] erases `T` so flags of
//! different types can live in one registry.

use crate::error::{FlagError, FlagTransformError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Bound for anything storable as a flag value.
pub trait FlagValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> FlagValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Data shape tag of a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagType {
    Boolean,
    Integer,
    Text,
    Set,
    List,
    /// Text keys mapped to integers.
    Map,
    /// Extension-defined structure.
    Custom,
}

impl fmt::Display for FlagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlagType::Boolean => "boolean",
            FlagType::Integer => "integer",
            FlagType::Text => "text",
            FlagType::Set => "set",
            FlagType::List => "list",
            FlagType::Map => "map",
            FlagType::Custom => "custom",
        };
        f.write_str(name)
    }
}

pub type Transformer<T> = Arc<dyn Fn(&str) -> Result<T, FlagTransformError> + Send + Sync>;
pub type Formatter<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;

pub struct Flag<T> {
    id: String,
    data_type: FlagType,
    default: T,
    transformer: Transformer<T>,
    formatter: Formatter<T>,
}

impl<T: FlagValue> Flag<T> {
    /// Define a flag, validating its id.
    pub fn new(
        id: impl Into<String>,
        data_type: FlagType,
        default: T,
        transformer: impl Fn(&str) -> Result<T, FlagTransformError> + Send + Sync + 'static,
        formatter: impl Fn(&T) -> String + Send + Sync + 'static,
    ) -> Result<Self, FlagError> {
        let id = id.into();
        if !is_valid_id(&id) {
            return Err(FlagError::InvalidId(id));
        }
        Ok(Self::define(id, data_type, default, transformer, formatter))
    }

    /// Define a flag whose id is known to be valid (built-in table).
    pub(crate) fn define(
        id: impl Into<String>,
        data_type: FlagType,
        default: T,
        transformer: impl Fn(&str) -> Result<T, FlagTransformError> + Send + Sync + 'static,
        formatter: impl Fn(&T) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            data_type,
            default,
            transformer: Arc::new(transformer),
            formatter: Arc::new(formatter),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data_type(&self) -> FlagType {
        self.data_type
    }

    pub fn default_value(&self) -> &T {
        &self.default
    }

    /// Turn user input into a value.
    pub fn transform(&self, input: &str) -> Result<T, FlagTransformError> {
        (self.transformer)(input)
    }

    pub fn format(&self, value: &T) -> String {
        (self.formatter)(value)
    }

    /// Decode a stored value, `None` when it does not fit `T`.
    pub fn decode(&self, value: &Value) -> Option<T> {
        serde_json::from_value(value.clone()).ok()
    }
}

impl<T> Clone for Flag<T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            data_type: self.data_type,
            default: self.default.clone(),
            transformer: Arc::clone(&self.transformer),
            formatter: Arc::clone(&self.formatter),
        }
    }
}

impl<T> fmt::Debug for Flag<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flag")
            .field("id", &self.id)
            .field("data_type", &self.data_type)
            .finish()
    }
}

impl<T> PartialEq for Flag<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Flag<T> {}

impl<T> Hash for Flag<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

// ---------------------------------------------------------------------------
// Type-erased view
// ---------------------------------------------------------------------------

/// A flag with its value type erased, used by registries and persistence.
pub trait AnyFlag: Send + Sync {
    fn id(&self) -> &str;
    fn data_type(&self) -> FlagType;
    fn default_json(&self) -> Value;

    /// Transform user input straight into its stored form.
    fn transform_json(&self, input: &str) -> Result<Value, FlagTransformError>;

    /// Render a stored value, `None` if it does not fit this flag.
    fn format_json(&self, value: &Value) -> Option<String>;

    /// Whether a stored value decodes into this flag's type.
    fn accepts(&self, value: &Value) -> bool {
        self.format_json(value).is_some()
    }

    /// Downcast support (implemented by returning `self`).
    fn as_any(&self) -> &dyn Any;
}

impl<T: FlagValue> AnyFlag for Flag<T> {
    fn id(&self) -> &str {
        &self.id
    }

    fn data_type(&self) -> FlagType {
        self.data_type
    }

    fn default_json(&self) -> Value {
        serde_json::to_value(&self.default).unwrap_or(Value::Null)
    }

    fn transform_json(&self, input: &str) -> Result<Value, FlagTransformError> {
        let value = self.transform(input)?;
        serde_json::to_value(&value)
            .map_err(|e| FlagTransformError::new(format!("cannot store value: {e}")))
    }

    fn format_json(&self, value: &Value) -> Option<String> {
        self.decode(value).map(|v| self.format(&v))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for dyn AnyFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnyFlag({})", self.id())
    }
}

/// Flag ids are non-empty and limited to lower-case ascii, digits and `_`.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Normalize a user-supplied flag name into id form.
pub fn normalize_id(name: &str) -> String {
    name.trim().to_lowercase().replace([' ', '-'], "_")
}
