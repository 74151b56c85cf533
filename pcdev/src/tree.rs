//! Hierarchical device description nodes
//!
//! A [`TreeNode`] is the per-instance description handed over by the bus when
//! a device is described by a tree instead of a static record. Property values
//! are kept as raw bytes, the way a flattened tree stores them: integers as
//! big-endian cells, strings NUL-terminated.
//!
//! Nodes can be deserialized from JSON, where a property value is either an
//! integer (stored as one cell) or a string.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyError {
    InvalidPropFormat,
    PropNotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawProperty")]
pub struct Property {
    pub name: Box<str>,
    pub data: Box<[u8]>,
}

impl Property {
    /// Property holding a single 32-bit cell
    #[must_use]
    pub fn cell(name: &str, value: u32) -> Self {
        Self {
            name: name.into(),
            data: value.to_be_bytes().into(),
        }
    }

    /// Property holding a NUL-terminated string
    #[must_use]
    pub fn string(name: &str, value: &str) -> Self {
        let mut data = Vec::with_capacity(value.len() + 1);
        data.extend_from_slice(value.as_bytes());
        data.push(0);
        Self {
            name: name.into(),
            data: data.into_boxed_slice(),
        }
    }

    pub fn value_as_u32(&self) -> Result<u32, PropertyError> {
        let cell: [u8; 4] = self
            .data
            .get(..4)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(PropertyError::InvalidPropFormat)?;
        Ok(u32::from_be_bytes(cell))
    }

    pub fn value_as_str(&self) -> Result<&str, PropertyError> {
        std::str::from_utf8(&self.data)
            .map(|s| s.trim_end_matches('\0'))
            .map_err(|_| PropertyError::InvalidPropFormat)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    Cell(u32),
    Text(String),
}

#[derive(Deserialize)]
struct RawProperty {
    name: String,
    value: RawValue,
}

impl From<RawProperty> for Property {
    fn from(raw: RawProperty) -> Self {
        match raw.value {
            RawValue::Cell(v) => Self::cell(&raw.name, v),
            RawValue::Text(s) => Self::string(&raw.name, &s),
        }
    }
}

/// One described device instance
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TreeNode {
    pub name: String,
    #[serde(default)]
    pub props: Vec<Property>,
}

impl TreeNode {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            props: Vec::new(),
        }
    }

    /// Builder-style property insertion
    #[must_use]
    pub fn with(mut self, prop: Property) -> Self {
        self.props.push(prop);
        self
    }

    pub fn get_property(&self, name: impl AsRef<str>) -> Option<&Property> {
        let name = name.as_ref();
        self.props.iter().find(|prop| prop.name.as_ref() == name)
    }

    pub fn read_u32(&self, name: &str) -> Result<u32, PropertyError> {
        self.get_property(name)
            .ok_or(PropertyError::PropNotFound)?
            .value_as_u32()
    }

    pub fn read_str(&self, name: &str) -> Result<&str, PropertyError> {
        self.get_property(name)
            .ok_or(PropertyError::PropNotFound)?
            .value_as_str()
    }
}
