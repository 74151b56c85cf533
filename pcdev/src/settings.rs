//! Driver settings

use std::time::Duration;

use serde::Deserialize;

/// Names and limits the driver uses when talking to its host
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    /// Name registered with the bus
    pub driver_name: String,
    /// Name of the identity range
    pub region_name: String,
    /// Namespace scope the device names live in
    pub class_name: String,
    /// Device names are `<node_prefix>-<slot>`
    pub node_prefix: String,
    pub max_devices: usize,
    /// How long teardown waits for open sessions of a device; `None` waits forever
    pub detach_timeout_ms: Option<u64>,
}

impl DriverSettings {
    #[must_use]
    pub fn detach_timeout(&self) -> Option<Duration> {
        self.detach_timeout_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub fn node_name(&self, slot: usize) -> String {
        format!("{}-{slot}", self.node_prefix)
    }
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            driver_name: "pseudo-char-device".to_string(),
            region_name: "pcdevs".to_string(),
            class_name: "pcd_class".to_string(),
            node_prefix: "pcdev".to_string(),
            max_devices: 10,
            detach_timeout_ms: Some(1000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_settings_use_defaults() {
        let settings: DriverSettings =
            serde_json::from_str(r#"{ "max_devices": 2, "detach_timeout_ms": null }"#).unwrap();
        assert_eq!(settings.max_devices, 2);
        assert_eq!(settings.detach_timeout(), None);
        assert_eq!(settings.driver_name, "pseudo-char-device");
        assert_eq!(settings.node_name(1), "pcdev-1");
    }
}
