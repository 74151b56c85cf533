//! Board descriptions
//!
//! A board lists the driver settings and the device instances the bus
//! announces. The built-in board carries four statically described devices;
//! other boards are loaded from JSON:
//!
//! ```json
//! {
//!   "settings": { "max_devices": 4 },
//!   "devices": [
//!     { "kind": "pcdev-A1x", "sequence_id": 0,
//!       "static_record": { "size": 512, "perm": 17, "serial_number": "SN0" } },
//!     { "kind": "pcdev-B1x", "sequence_id": 1,
//!       "tree_node": { "name": "pcdev-1", "props": [
//!         { "name": "org,device-serial-num", "value": "SN1" },
//!         { "name": "org,size", "value": 1024 },
//!         { "name": "org,perm", "value": 16 } ] } }
//!   ]
//! }
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::bus::AttachEvent;
use crate::config::StaticRecord;
use crate::error::{Error, Result};
use crate::perm::Permission;
use crate::settings::DriverSettings;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Board {
    #[serde(default)]
    pub settings: DriverSettings,
    #[serde(default)]
    pub devices: Vec<AttachEvent>,
}

impl Board {
    /// The four statically described devices of the reference board
    #[must_use]
    pub fn builtin() -> Self {
        let records = [
            ("pcdev-A1x", 1024, Permission::ReadOnly, "PCDEV1XYZ123"),
            ("pcdev-B1x", 512, Permission::WriteOnly, "PCDEV2XYZ123"),
            ("pcdev-C1x", 1024, Permission::ReadWrite, "PCDEV3XYZ123"),
            ("pcdev-D1x", 512, Permission::ReadWrite, "PCDEV4XYZ123"),
        ];
        let devices = records
            .into_iter()
            .enumerate()
            .map(|(sequence_id, (kind, size, perm, serial))| AttachEvent {
                kind: kind.to_string(),
                sequence_id,
                static_record: Some(StaticRecord {
                    size,
                    perm: perm.raw(),
                    serial_number: serial.to_string(),
                }),
                tree_node: None,
            })
            .collect();
        Self {
            settings: DriverSettings::default(),
            devices,
        }
    }

    /// # Errors
    /// `Board` if the text is not a valid board description.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Board(e.to_string()))
    }

    /// # Errors
    /// `Board` if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Board(format!("{}: {e}", path.display())))?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;

    #[test]
    fn test_builtin_board_resolves() {
        let board = Board::builtin();
        assert_eq!(board.devices.len(), 4);
        let configs: Vec<_> = board
            .devices
            .iter()
            .map(|event| config::resolve(event).unwrap())
            .collect();
        assert_eq!(configs[0].permission, Permission::ReadOnly);
        assert_eq!(configs[1].capacity, 512);
        assert_eq!(configs[3].serial, "PCDEV4XYZ123");
    }

    #[test]
    fn test_from_json() {
        let board = Board::from_json(
            r#"{
                "settings": { "max_devices": 4 },
                "devices": [
                    { "kind": "pcdev-B1x", "sequence_id": 1,
                      "tree_node": { "name": "pcdev-1", "props": [
                        { "name": "org,device-serial-num", "value": "SN1" },
                        { "name": "org,size", "value": 1024 },
                        { "name": "org,perm", "value": 16 } ] } }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(board.settings.max_devices, 4);
        let config = config::resolve(&board.devices[0]).unwrap();
        assert_eq!(config.capacity, 1024);
        assert_eq!(config.permission, Permission::ReadOnly);
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(Board::from_json("{ nope"), Err(Error::Board(_))));
    }
}
