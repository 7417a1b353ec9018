use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// A packet of JSON data flowing through the engine.
///
/// Instance context, trigger data, and function results are all carried
/// as payloads. This is a thin wrapper around a JSON value with helper
/// methods for the access patterns the engine needs.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Payload {
    /// The inner JSON value
    pub value: serde_json::Value,
}

impl Payload {
    /// Create a new payload from a JSON value
    #[inline]
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    /// Create a null payload
    #[inline]
    pub fn null() -> Self {
        Self {
            value: serde_json::Value::Null,
        }
    }

    /// Get the inner JSON value
    #[inline]
    pub fn as_value(&self) -> &serde_json::Value {
        &self.value
    }

    /// Get a mutable reference to the inner JSON value
    #[inline]
    pub fn as_value_mut(&mut self) -> &mut serde_json::Value {
        &mut self.value
    }

    /// Take ownership of the inner JSON value
    #[inline]
    pub fn into_value(self) -> serde_json::Value {
        self.value
    }

    /// Check if the payload is null
    #[inline]
    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    /// Try to view the payload as a string
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }

    /// Try to view the payload as a boolean
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        self.value.as_bool()
    }

    /// Look up a top-level key, if the payload is an object
    #[inline]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.value.as_object().and_then(|obj| obj.get(key))
    }

    /// Set a top-level key, promoting a null payload to an object first.
    /// Non-object, non-null payloads are left untouched and `false` is
    /// returned.
    pub fn set(&mut self, key: &str, value: serde_json::Value) -> bool {
        if self.value.is_null() {
            self.value = serde_json::Value::Object(serde_json::Map::new());
        }
        match self.value.as_object_mut() {
            Some(obj) => {
                obj.insert(key.to_string(), value);
                true
            }
            None => false,
        }
    }

    /// Try to convert the payload to a specific type
    pub fn to<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_value(self.value.clone())
    }

    /// Create a payload from a serializable value
    pub fn from<T>(value: &T) -> Result<Self, serde_json::Error>
    where
        T: Serialize,
    {
        Ok(Self::new(serde_json::to_value(value)?))
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::null()
    }
}
