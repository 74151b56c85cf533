//! In-memory implementation of [`Host`](crate::host::Host)
//!
//! Keeps every collaborator in one mutex-guarded state, journals each
//! successful call in order, and can be told to fail the next call of a given
//! kind. Useful for testing and for the demo binary.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::fops::FileOperations;
use crate::host::{Bus, IdentityRegistrar, Namespace, Transport};
use crate::idgen::{IdRange, Identity};

/// First major number handed out by [`MemHost`]
pub const FIRST_MAJOR: u32 = 240;

/// Kind of a host call, used for failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostOp {
    AllocRegion,
    ReleaseRegion,
    CreateScope,
    DestroyScope,
    Publish,
    Unpublish,
    AddOps,
    RemoveOps,
    RegisterDriver,
    UnregisterDriver,
}

impl HostOp {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::AllocRegion => "alloc_region",
            Self::ReleaseRegion => "release_region",
            Self::CreateScope => "create_scope",
            Self::DestroyScope => "destroy_scope",
            Self::Publish => "publish",
            Self::Unpublish => "unpublish",
            Self::AddOps => "transport_add",
            Self::RemoveOps => "transport_remove",
            Self::RegisterDriver => "register_driver",
            Self::UnregisterDriver => "unregister_driver",
        }
    }
}

/// One journaled host call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    AllocRegion(IdRange),
    ReleaseRegion(IdRange),
    CreateScope(String),
    DestroyScope(String),
    Publish { name: String, identity: Identity },
    Unpublish(Identity),
    AddOps(Identity),
    RemoveOps(Identity),
    RegisterDriver(String),
    UnregisterDriver(String),
}

impl HostCall {
    #[must_use]
    pub fn op(&self) -> HostOp {
        match self {
            Self::AllocRegion(_) => HostOp::AllocRegion,
            Self::ReleaseRegion(_) => HostOp::ReleaseRegion,
            Self::CreateScope(_) => HostOp::CreateScope,
            Self::DestroyScope(_) => HostOp::DestroyScope,
            Self::Publish { .. } => HostOp::Publish,
            Self::Unpublish(_) => HostOp::Unpublish,
            Self::AddOps(_) => HostOp::AddOps,
            Self::RemoveOps(_) => HostOp::RemoveOps,
            Self::RegisterDriver(_) => HostOp::RegisterDriver,
            Self::UnregisterDriver(_) => HostOp::UnregisterDriver,
        }
    }
}

#[derive(Default)]
struct State {
    journal: Vec<HostCall>,
    fail_next: HashMap<HostOp, usize>,
    next_major: u32,
    regions: Vec<IdRange>,
    /// scope → (identity → name)
    scopes: HashMap<String, BTreeMap<Identity, String>>,
    routes: HashMap<Identity, Arc<dyn FileOperations>>,
    drivers: HashSet<String>,
}

impl State {
    fn check(&mut self, op: HostOp) -> Result<()> {
        if let Some(pending) = self.fail_next.get_mut(&op) {
            *pending -= 1;
            if *pending == 0 {
                self.fail_next.remove(&op);
            }
            return Err(host_error(op, "injected failure"));
        }
        Ok(())
    }
}

fn host_error(op: HostOp, reason: impl Into<String>) -> Error {
    Error::Host {
        op: op.name(),
        reason: reason.into(),
    }
}

pub struct MemHost {
    state: Mutex<State>,
}

impl MemHost {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_major: FIRST_MAJOR,
                ..State::default()
            }),
        }
    }

    /// Make the next call of kind `op` fail
    pub fn fail_next(&self, op: HostOp) {
        *self.state.lock().fail_next.entry(op).or_insert(0) += 1;
    }

    /// Successful calls so far, oldest first
    #[must_use]
    pub fn journal(&self) -> Vec<HostCall> {
        self.state.lock().journal.clone()
    }

    /// Kinds of the successful calls so far, oldest first
    #[must_use]
    pub fn journal_ops(&self) -> Vec<HostOp> {
        self.state.lock().journal.iter().map(HostCall::op).collect()
    }

    pub fn clear_journal(&self) {
        self.state.lock().journal.clear();
    }

    /// Identity published as `name` in any scope
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Identity> {
        let state = self.state.lock();
        state.scopes.values().find_map(|names| {
            names
                .iter()
                .find(|(_, published)| published.as_str() == name)
                .map(|(identity, _)| *identity)
        })
    }

    /// Published names of `scope`, ordered by identity
    #[must_use]
    pub fn published(&self, scope: &str) -> Vec<(Identity, String)> {
        self.state
            .lock()
            .scopes
            .get(scope)
            .map(|names| names.iter().map(|(id, name)| (*id, name.clone())).collect())
            .unwrap_or_default()
    }

    /// Operation table routed for `identity`
    #[must_use]
    pub fn ops(&self, identity: Identity) -> Option<Arc<dyn FileOperations>> {
        self.state.lock().routes.get(&identity).cloned()
    }

    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.state.lock().scopes.contains_key(scope)
    }

    #[must_use]
    pub fn regions(&self) -> Vec<IdRange> {
        self.state.lock().regions.clone()
    }

    #[must_use]
    pub fn is_registered(&self, driver: &str) -> bool {
        self.state.lock().drivers.contains(driver)
    }
}

impl Default for MemHost {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemHost")
            .field("regions", &state.regions)
            .field("scopes", &state.scopes)
            .field("routes", &state.routes.len())
            .field("drivers", &state.drivers)
            .finish()
    }
}

impl IdentityRegistrar for MemHost {
    fn alloc_region(&self, _name: &str, count: u32) -> Result<IdRange> {
        let mut state = self.state.lock();
        state.check(HostOp::AllocRegion)?;
        if count == 0 {
            return Err(host_error(HostOp::AllocRegion, "empty range"));
        }
        let range = IdRange::new(Identity::from_parts(state.next_major, 0), count);
        state.next_major += 1;
        state.regions.push(range);
        state.journal.push(HostCall::AllocRegion(range));
        Ok(range)
    }

    fn release_region(&self, range: IdRange) -> Result<()> {
        let mut state = self.state.lock();
        state.check(HostOp::ReleaseRegion)?;
        let index = state
            .regions
            .iter()
            .position(|r| *r == range)
            .ok_or_else(|| host_error(HostOp::ReleaseRegion, "range not allocated"))?;
        state.regions.remove(index);
        state.journal.push(HostCall::ReleaseRegion(range));
        Ok(())
    }
}

impl Namespace for MemHost {
    fn create_scope(&self, scope: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check(HostOp::CreateScope)?;
        if state.scopes.contains_key(scope) {
            return Err(host_error(HostOp::CreateScope, format!("{scope} exists")));
        }
        state.scopes.insert(scope.to_string(), BTreeMap::new());
        state.journal.push(HostCall::CreateScope(scope.to_string()));
        Ok(())
    }

    fn destroy_scope(&self, scope: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check(HostOp::DestroyScope)?;
        if state.scopes.remove(scope).is_none() {
            return Err(host_error(HostOp::DestroyScope, format!("no scope {scope}")));
        }
        state.journal.push(HostCall::DestroyScope(scope.to_string()));
        Ok(())
    }

    fn publish(&self, scope: &str, name: &str, identity: Identity) -> Result<()> {
        let mut state = self.state.lock();
        state.check(HostOp::Publish)?;
        let names = state
            .scopes
            .get_mut(scope)
            .ok_or_else(|| host_error(HostOp::Publish, format!("no scope {scope}")))?;
        if names.contains_key(&identity) || names.values().any(|n| n == name) {
            return Err(host_error(HostOp::Publish, format!("{name} already published")));
        }
        names.insert(identity, name.to_string());
        state.journal.push(HostCall::Publish {
            name: name.to_string(),
            identity,
        });
        Ok(())
    }

    fn unpublish(&self, scope: &str, identity: Identity) -> Result<()> {
        let mut state = self.state.lock();
        state.check(HostOp::Unpublish)?;
        state
            .scopes
            .get_mut(scope)
            .and_then(|names| names.remove(&identity))
            .ok_or_else(|| host_error(HostOp::Unpublish, format!("{identity} not published")))?;
        state.journal.push(HostCall::Unpublish(identity));
        Ok(())
    }
}

impl Transport for MemHost {
    fn add(&self, identity: Identity, ops: Arc<dyn FileOperations>) -> Result<()> {
        let mut state = self.state.lock();
        state.check(HostOp::AddOps)?;
        if state.routes.contains_key(&identity) {
            return Err(host_error(HostOp::AddOps, format!("{identity} already routed")));
        }
        state.routes.insert(identity, ops);
        state.journal.push(HostCall::AddOps(identity));
        Ok(())
    }

    fn remove(&self, identity: Identity) -> Result<()> {
        let mut state = self.state.lock();
        state.check(HostOp::RemoveOps)?;
        if state.routes.remove(&identity).is_none() {
            return Err(host_error(HostOp::RemoveOps, format!("{identity} not routed")));
        }
        state.journal.push(HostCall::RemoveOps(identity));
        Ok(())
    }
}

impl Bus for MemHost {
    fn register_driver(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check(HostOp::RegisterDriver)?;
        if !state.drivers.insert(name.to_string()) {
            return Err(host_error(HostOp::RegisterDriver, format!("{name} registered")));
        }
        state.journal.push(HostCall::RegisterDriver(name.to_string()));
        Ok(())
    }

    fn unregister_driver(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check(HostOp::UnregisterDriver)?;
        if !state.drivers.remove(name) {
            return Err(host_error(HostOp::UnregisterDriver, format!("{name} not registered")));
        }
        state.journal.push(HostCall::UnregisterDriver(name.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regions_get_distinct_majors() {
        let host = MemHost::new();
        let a = host.alloc_region("a", 4).unwrap();
        let b = host.alloc_region("b", 4).unwrap();
        assert_eq!(a.base().major(), FIRST_MAJOR);
        assert_eq!(b.base().major(), FIRST_MAJOR + 1);
        host.release_region(a).unwrap();
        assert!(host.release_region(a).is_err());
        assert_eq!(host.regions(), vec![b]);
    }

    #[test]
    fn test_publish_and_resolve() {
        let host = MemHost::new();
        let id = Identity::from_parts(240, 1);
        host.create_scope("pcd_class").unwrap();
        host.publish("pcd_class", "pcdev-1", id).unwrap();
        assert_eq!(host.resolve("pcdev-1"), Some(id));
        assert!(host.publish("pcd_class", "pcdev-1", Identity::from_parts(240, 2)).is_err());

        host.unpublish("pcd_class", id).unwrap();
        assert_eq!(host.resolve("pcdev-1"), None);
        assert!(host.unpublish("pcd_class", id).is_err());
    }

    #[test]
    fn test_publish_requires_scope() {
        let host = MemHost::new();
        let err = host
            .publish("nowhere", "pcdev-0", Identity::from_parts(240, 0))
            .unwrap_err();
        assert!(matches!(err, Error::Host { op: "publish", .. }));
    }

    #[test]
    fn test_injected_failure_is_one_shot() {
        let host = MemHost::new();
        host.fail_next(HostOp::CreateScope);
        assert!(host.create_scope("c").is_err());
        assert!(!host.has_scope("c"));
        host.create_scope("c").unwrap();
        assert_eq!(host.journal(), vec![HostCall::CreateScope("c".to_string())]);
    }

    #[test]
    fn test_driver_registration() {
        let host = MemHost::new();
        host.register_driver("pseudo-char-device").unwrap();
        assert!(host.register_driver("pseudo-char-device").is_err());
        assert!(host.is_registered("pseudo-char-device"));
        host.unregister_driver("pseudo-char-device").unwrap();
        assert_eq!(
            host.journal_ops(),
            vec![HostOp::RegisterDriver, HostOp::UnregisterDriver]
        );
    }
}
