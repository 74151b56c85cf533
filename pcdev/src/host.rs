//! External collaborators of the driver
//!
//! The driver never touches global state; everything it needs from the
//! surrounding system goes through these traits. [`Host`] bundles them so the
//! driver can be generic over a single parameter.

use std::sync::Arc;

use crate::error::Result;
use crate::fops::FileOperations;
use crate::idgen::{IdRange, Identity};

/// Grants and reclaims blocks of device identities
pub trait IdentityRegistrar: Send + Sync {
    /// Reserve `count` consecutive identities under `name`
    ///
    /// # Errors
    /// `Host` if no range can be granted.
    fn alloc_region(&self, name: &str, count: u32) -> Result<IdRange>;

    /// # Errors
    /// `Host` if the range was not granted by this registrar.
    fn release_region(&self, range: IdRange) -> Result<()>;
}

/// Human-visible device names, grouped in scopes
pub trait Namespace: Send + Sync {
    /// # Errors
    /// `Host` if the scope exists already.
    fn create_scope(&self, scope: &str) -> Result<()>;

    /// # Errors
    /// `Host` if the scope is unknown.
    fn destroy_scope(&self, scope: &str) -> Result<()>;

    /// Make `identity` visible as `name` inside `scope`
    ///
    /// # Errors
    /// `Host` if the scope is unknown or the name is taken.
    fn publish(&self, scope: &str, name: &str, identity: Identity) -> Result<()>;

    /// # Errors
    /// `Host` if `identity` is not published in `scope`.
    fn unpublish(&self, scope: &str, identity: Identity) -> Result<()>;
}

/// Routes user requests for an identity to an operation table
pub trait Transport: Send + Sync {
    /// # Errors
    /// `Host` if the identity is already routed.
    fn add(&self, identity: Identity, ops: Arc<dyn FileOperations>) -> Result<()>;

    /// # Errors
    /// `Host` if the identity is not routed.
    fn remove(&self, identity: Identity) -> Result<()>;
}

/// Driver registration with the bus that delivers attach/detach events
pub trait Bus: Send + Sync {
    /// # Errors
    /// `Host` if a driver with this name is registered already.
    fn register_driver(&self, name: &str) -> Result<()>;

    /// # Errors
    /// `Host` if the driver is not registered.
    fn unregister_driver(&self, name: &str) -> Result<()>;
}

/// Everything the driver needs from its surroundings
pub trait Host: IdentityRegistrar + Namespace + Transport + Bus {}

impl<T: IdentityRegistrar + Namespace + Transport + Bus> Host for T {}
