//! Open-time permission policy

use bitflags::bitflags;

use crate::error::{Error, Result};

bitflags! {
    /// Capabilities a caller asks for when opening a device
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessMode: u8 {
        const READ  = 0b01;
        const WRITE = 0b10;
    }
}

/// Per-device access policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Permission {
    pub const RAW_RDWR: u32 = 0x11;
    pub const RAW_RDONLY: u32 = 0x10;
    pub const RAW_WRONLY: u32 = 0x01;

    /// Decode the raw permission code carried by records and tree nodes
    ///
    /// # Errors
    /// `InvalidProperty` for unknown codes.
    pub fn from_raw(raw: u32) -> Result<Self> {
        match raw {
            Self::RAW_RDWR => Ok(Self::ReadWrite),
            Self::RAW_RDONLY => Ok(Self::ReadOnly),
            Self::RAW_WRONLY => Ok(Self::WriteOnly),
            other => Err(Error::InvalidProperty {
                field: "permission",
                reason: format!("unknown permission code {other:#x}"),
            }),
        }
    }

    #[must_use]
    pub fn raw(self) -> u32 {
        match self {
            Self::ReadWrite => Self::RAW_RDWR,
            Self::ReadOnly => Self::RAW_RDONLY,
            Self::WriteOnly => Self::RAW_WRONLY,
        }
    }
}

/// Outcome of [`check_access`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allowed,
    Denied,
}

/// Evaluate a requested access mode against a device policy
///
/// An empty mode is always denied.
#[must_use]
pub fn check_access(policy: Permission, mode: AccessMode) -> Access {
    let allowed = match policy {
        Permission::ReadWrite => !mode.is_empty(),
        Permission::ReadOnly => mode == AccessMode::READ,
        Permission::WriteOnly => mode == AccessMode::WRITE,
    };
    if allowed {
        Access::Allowed
    } else {
        Access::Denied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RW: AccessMode = AccessMode::READ.union(AccessMode::WRITE);

    #[test]
    fn test_read_only_policy() {
        assert_eq!(check_access(Permission::ReadOnly, AccessMode::READ), Access::Allowed);
        assert_eq!(check_access(Permission::ReadOnly, AccessMode::WRITE), Access::Denied);
        assert_eq!(check_access(Permission::ReadOnly, RW), Access::Denied);
        assert_eq!(check_access(Permission::ReadOnly, AccessMode::empty()), Access::Denied);
    }

    #[test]
    fn test_write_only_policy() {
        assert_eq!(check_access(Permission::WriteOnly, AccessMode::WRITE), Access::Allowed);
        assert_eq!(check_access(Permission::WriteOnly, AccessMode::READ), Access::Denied);
        assert_eq!(check_access(Permission::WriteOnly, RW), Access::Denied);
        assert_eq!(check_access(Permission::WriteOnly, AccessMode::empty()), Access::Denied);
    }

    #[test]
    fn test_read_write_policy() {
        assert_eq!(check_access(Permission::ReadWrite, AccessMode::READ), Access::Allowed);
        assert_eq!(check_access(Permission::ReadWrite, AccessMode::WRITE), Access::Allowed);
        assert_eq!(check_access(Permission::ReadWrite, RW), Access::Allowed);
        assert_eq!(check_access(Permission::ReadWrite, AccessMode::empty()), Access::Denied);
    }

    #[test]
    fn test_raw_codes() {
        assert_eq!(Permission::from_raw(0x11), Ok(Permission::ReadWrite));
        assert_eq!(Permission::from_raw(0x10), Ok(Permission::ReadOnly));
        assert_eq!(Permission::from_raw(0x01), Ok(Permission::WriteOnly));
        assert!(Permission::from_raw(0x00).is_err());
        for perm in [Permission::ReadOnly, Permission::WriteOnly, Permission::ReadWrite] {
            assert_eq!(Permission::from_raw(perm.raw()), Ok(perm));
        }
    }
}
