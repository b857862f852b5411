use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// Identity of an actor (initiator, approver, assignee) supplied by the
/// authentication collaborator. The engine records ids, it never
/// authenticates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(pub i64);

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the document an instance is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub i64);

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Open key/value payload accumulated by a workflow instance
///
/// This is the data extracted from the document plus anything node
/// execution adds along the way. It is the only context visible to the
/// condition evaluator.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct DataMap {
    values: serde_json::Map<String, Value>,
}

impl DataMap {
    /// Create an empty data map
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value by key
    #[inline]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Set a value, replacing any previous binding
    #[inline]
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Merge another map into this one; other's bindings win on conflict
    pub fn merge(&mut self, other: DataMap) {
        for (key, value) in other.values {
            self.values.insert(key, value);
        }
    }

    /// Whether the map holds no bindings
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of bindings
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Borrow the underlying JSON map
    #[inline]
    pub fn as_map(&self) -> &serde_json::Map<String, Value> {
        &self.values
    }

    /// Try to read a key as a string
    #[inline]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Try to read a key as a number
    #[inline]
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(Value::as_f64)
    }

    /// Try to read a key as a boolean
    #[inline]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    /// Deserialize the whole map into a typed value
    pub fn to<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_value(Value::Object(self.values.clone()))
    }

    /// Build a data map from a serializable value; non-object values
    /// produce an empty map
    pub fn from<T>(value: &T) -> Result<Self, serde_json::Error>
    where
        T: Serialize,
    {
        match serde_json::to_value(value)? {
            Value::Object(values) => Ok(Self { values }),
            _ => Ok(Self::default()),
        }
    }
}

impl From<serde_json::Map<String, Value>> for DataMap {
    fn from(values: serde_json::Map<String, Value>) -> Self {
        Self { values }
    }
}

impl FromIterator<(String, Value)> for DataMap {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
