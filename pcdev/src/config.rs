//! Device configuration and its resolution from bus events
//!
//! Two acquisition paths, tried in fixed order:
//! 1. the event carries a [`TreeNode`]: serial, size and permission are read
//!    from its properties and the event kind must be a known tree kind;
//! 2. otherwise the event must carry a [`StaticRecord`] and its kind must be
//!    in the identifier table.
//!
//! Resolution has no side effects; nothing is allocated until a complete
//! [`DeviceConfig`] exists.

use serde::Deserialize;

use crate::bus::AttachEvent;
use crate::error::{Error, Result};
use crate::perm::Permission;
use crate::tree::{PropertyError, TreeNode};

pub const PROP_SERIAL: &str = "org,device-serial-num";
pub const PROP_SIZE: &str = "org,size";
pub const PROP_PERM: &str = "org,perm";

/// Index into [`METADATA`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Discriminator(pub usize);

/// Auxiliary per-kind configuration items
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub config_item1: i32,
    pub config_item2: i32,
}

pub static METADATA: [Metadata; 4] = [
    Metadata { config_item1: 60, config_item2: 21 },
    Metadata { config_item1: 50, config_item2: 22 },
    Metadata { config_item1: 40, config_item2: 23 },
    Metadata { config_item1: 30, config_item2: 24 },
];

/// Identifier table for statically described devices
pub static ID_TABLE: [(&str, Discriminator); 4] = [
    ("pcdev-A1x", Discriminator(0)),
    ("pcdev-B1x", Discriminator(1)),
    ("pcdev-C1x", Discriminator(2)),
    ("pcdev-D1x", Discriminator(3)),
];

/// Kinds accepted for tree-described devices
pub static TREE_MATCH_TABLE: [(&str, Discriminator); 4] = [
    ("pcdev-A1x", Discriminator(0)),
    ("pcdev-B1x", Discriminator(1)),
    ("pcdev-C1x", Discriminator(2)),
    ("pcdev-D1x", Discriminator(3)),
];

impl Discriminator {
    #[must_use]
    pub fn metadata(self) -> Option<&'static Metadata> {
        METADATA.get(self.0)
    }
}

fn match_kind(table: &[(&str, Discriminator)], kind: &str) -> Option<Discriminator> {
    table
        .iter()
        .find(|(name, _)| *name == kind)
        .map(|(_, discriminator)| *discriminator)
}

/// Pre-populated configuration attached to a statically described device
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StaticRecord {
    pub size: usize,
    pub perm: u32,
    pub serial_number: String,
}

/// Complete, validated configuration of one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub capacity: usize,
    pub permission: Permission,
    pub serial: String,
    pub discriminator: Discriminator,
}

impl DeviceConfig {
    #[must_use]
    pub fn metadata(&self) -> Option<&'static Metadata> {
        self.discriminator.metadata()
    }
}

fn tree_error(field: &'static str, err: PropertyError) -> Error {
    match err {
        PropertyError::PropNotFound => Error::MissingProperty(field),
        PropertyError::InvalidPropFormat => Error::InvalidProperty {
            field,
            reason: "malformed value".to_string(),
        },
    }
}

fn checked_capacity(capacity: usize) -> Result<usize> {
    if capacity == 0 {
        return Err(Error::InvalidProperty {
            field: "capacity",
            reason: "device size must be positive".to_string(),
        });
    }
    Ok(capacity)
}

/// Build a configuration from a tree node
///
/// # Errors
/// `MissingProperty` naming `serial`, `capacity` or `permission`, or
/// `InvalidProperty` for malformed values.
pub fn from_tree(node: &TreeNode, discriminator: Discriminator) -> Result<DeviceConfig> {
    let serial = node
        .read_str(PROP_SERIAL)
        .map_err(|e| tree_error("serial", e))?
        .to_string();
    let size = node
        .read_u32(PROP_SIZE)
        .map_err(|e| tree_error("capacity", e))?;
    let perm = node
        .read_u32(PROP_PERM)
        .map_err(|e| tree_error("permission", e))?;

    Ok(DeviceConfig {
        capacity: checked_capacity(size as usize)?,
        permission: Permission::from_raw(perm)?,
        serial,
        discriminator,
    })
}

/// Build a configuration from a static record
///
/// # Errors
/// `InvalidProperty` for a zero size or an unknown permission code.
pub fn from_static(record: &StaticRecord, discriminator: Discriminator) -> Result<DeviceConfig> {
    Ok(DeviceConfig {
        capacity: checked_capacity(record.size)?,
        permission: Permission::from_raw(record.perm)?,
        serial: record.serial_number.clone(),
        discriminator,
    })
}

/// Produce the configuration for an attach event
///
/// # Errors
/// `NoConfigData` when the event has no usable source or an unknown kind,
/// otherwise the errors of [`from_tree`] / [`from_static`].
pub fn resolve(event: &AttachEvent) -> Result<DeviceConfig> {
    if let Some(node) = &event.tree_node {
        let discriminator =
            match_kind(&TREE_MATCH_TABLE, &event.kind).ok_or(Error::NoConfigData)?;
        return from_tree(node, discriminator);
    }

    let record = event.static_record.as_ref().ok_or(Error::NoConfigData)?;
    let discriminator = match_kind(&ID_TABLE, &event.kind).ok_or(Error::NoConfigData)?;
    from_static(record, discriminator)
}
