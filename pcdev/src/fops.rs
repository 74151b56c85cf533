//! Operation table shared by every device
//!
//! The transport routes user requests for an identity to a
//! [`FileOperations`] implementation. [`DeviceFileOps`] is the single
//! implementation the driver registers for all of its devices: it keeps the
//! session table (handle → lease, mode, offset) and forwards I/O to the
//! record's buffer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::idgen::Identity;
use crate::io::Whence;
use crate::perm::{check_access, Access, AccessMode};
use crate::record::RecordLease;
use crate::registry::Registry;

/// Handle of an open session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u64);

/// File-like surface a device exposes through the transport
pub trait FileOperations: Send + Sync {
    /// Open the device with `identity`
    ///
    /// # Errors
    /// `NoSuchDevice` if the device is not attached, `Denied` if its
    /// permission does not allow `mode`.
    fn open(&self, identity: Identity, mode: AccessMode) -> Result<SessionHandle>;

    /// Read up to `len` bytes at the session offset
    ///
    /// # Errors
    /// `BadSession`, or `Denied` for a session opened without read access.
    fn read(&self, session: SessionHandle, len: usize) -> Result<Vec<u8>>;

    /// Write `data` at the session offset, returning the bytes written
    ///
    /// # Errors
    /// `BadSession`, `Denied` or `OutOfSpace`.
    fn write(&self, session: SessionHandle, data: &[u8]) -> Result<usize>;

    /// Move the session offset
    ///
    /// # Errors
    /// `BadSession` or `InvalidOffset`.
    fn seek(&self, session: SessionHandle, offset: i64, whence: Whence) -> Result<u64>;

    /// Close the session
    ///
    /// # Errors
    /// `BadSession` if the handle is not open.
    fn release(&self, session: SessionHandle) -> Result<()>;
}

struct Session {
    lease: RecordLease,
    mode: AccessMode,
    offset: u64,
}

pub struct DeviceFileOps {
    registry: Arc<Registry>,
    sessions: Mutex<HashMap<SessionHandle, Arc<Mutex<Session>>>>,
    next_session: AtomicU64,
}

impl DeviceFileOps {
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
        }
    }

    /// Number of open sessions across all devices
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    fn session(&self, handle: SessionHandle) -> Result<Arc<Mutex<Session>>> {
        self.sessions
            .lock()
            .get(&handle)
            .cloned()
            .ok_or(Error::BadSession(handle))
    }
}

impl FileOperations for DeviceFileOps {
    fn open(&self, identity: Identity, mode: AccessMode) -> Result<SessionHandle> {
        let lease = self.registry.lease(identity)?;
        let permission = lease.record().config().permission;
        if check_access(permission, mode) == Access::Denied {
            debug!(identity = %identity, ?permission, ?mode, "open denied");
            return Err(Error::Denied);
        }

        let handle = SessionHandle(self.next_session.fetch_add(1, Ordering::Relaxed));
        let session = Session {
            lease,
            mode,
            offset: 0,
        };
        self.sessions
            .lock()
            .insert(handle, Arc::new(Mutex::new(session)));
        debug!(identity = %identity, session = ?handle, ?mode, "device opened");
        Ok(handle)
    }

    fn read(&self, session: SessionHandle, len: usize) -> Result<Vec<u8>> {
        let session = self.session(session)?;
        let mut session = session.lock();
        if !session.mode.contains(AccessMode::READ) {
            return Err(Error::Denied);
        }

        let buffer = session.lease.record().buffer();
        let mut out = vec![0u8; len.min(buffer.capacity())];
        let outcome = buffer.read(session.offset, &mut out)?;
        drop(buffer);

        out.truncate(outcome.count);
        session.offset = outcome.offset;
        trace!(bytes = outcome.count, offset = outcome.offset, "read");
        Ok(out)
    }

    fn write(&self, session: SessionHandle, data: &[u8]) -> Result<usize> {
        let session = self.session(session)?;
        let mut session = session.lock();
        if !session.mode.contains(AccessMode::WRITE) {
            return Err(Error::Denied);
        }

        let outcome = session
            .lease
            .record()
            .buffer()
            .write(session.offset, data)?;
        session.offset = outcome.offset;
        trace!(bytes = outcome.count, offset = outcome.offset, "write");
        Ok(outcome.count)
    }

    fn seek(&self, session: SessionHandle, offset: i64, whence: Whence) -> Result<u64> {
        let session = self.session(session)?;
        let mut session = session.lock();
        let target = session
            .lease
            .record()
            .buffer()
            .seek(session.offset, offset, whence)?;
        session.offset = target;
        trace!(offset = target, ?whence, "seek");
        Ok(target)
    }

    fn release(&self, session: SessionHandle) -> Result<()> {
        let removed = self
            .sessions
            .lock()
            .remove(&session)
            .ok_or(Error::BadSession(session))?;
        debug!(session = ?session, "session released");
        // The lease goes away with the last reference to the session
        drop(removed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceConfig, Discriminator};
    use crate::idgen::IdRange;
    use crate::perm::Permission;

    const RW: AccessMode = AccessMode::READ.union(AccessMode::WRITE);

    fn setup(permission: Permission, capacity: usize) -> (Arc<Registry>, DeviceFileOps, Identity) {
        let registry = Arc::new(Registry::new(
            IdRange::new(Identity::from_parts(240, 0), 4),
            4,
        ));
        let config = DeviceConfig {
            capacity,
            permission,
            serial: "SN".to_string(),
            discriminator: Discriminator(0),
        };
        let identity = registry.insert(0, config).unwrap().identity;
        registry.activate(0).unwrap();
        let ops = DeviceFileOps::new(Arc::clone(&registry));
        (registry, ops, identity)
    }

    #[test]
    fn test_write_seek_read() {
        let (_registry, ops, identity) = setup(Permission::ReadWrite, 32);
        let session = ops.open(identity, RW).unwrap();
        assert_eq!(ops.write(session, b"hello").unwrap(), 5);
        assert_eq!(ops.seek(session, 0, Whence::Set).unwrap(), 0);
        assert_eq!(ops.read(session, 5).unwrap(), b"hello");
        ops.release(session).unwrap();
    }

    #[test]
    fn test_open_denied_by_policy() {
        let (registry, ops, identity) = setup(Permission::ReadOnly, 8);
        assert_eq!(ops.open(identity, AccessMode::WRITE), Err(Error::Denied));
        assert_eq!(ops.open(identity, RW), Err(Error::Denied));
        assert_eq!(ops.open_sessions(), 0);
        // A denied open leaves no lease behind
        registry.remove(0).unwrap();
    }

    #[test]
    fn test_session_mode_is_enforced() {
        let (_registry, ops, identity) = setup(Permission::ReadWrite, 8);
        let reader = ops.open(identity, AccessMode::READ).unwrap();
        assert_eq!(ops.write(reader, b"x"), Err(Error::Denied));

        let writer = ops.open(identity, AccessMode::WRITE).unwrap();
        assert_eq!(ops.read(writer, 1), Err(Error::Denied));
    }

    #[test]
    fn test_sessions_have_independent_offsets() {
        let (_registry, ops, identity) = setup(Permission::ReadWrite, 16);
        let a = ops.open(identity, RW).unwrap();
        let b = ops.open(identity, RW).unwrap();
        ops.write(a, b"abcdef").unwrap();
        assert_eq!(ops.read(b, 3).unwrap(), b"abc");
        assert_eq!(ops.read(a, 3).unwrap(), vec![0, 0, 0]);
    }

    #[test]
    fn test_read_is_clamped_at_end() {
        let (_registry, ops, identity) = setup(Permission::ReadWrite, 8);
        let session = ops.open(identity, AccessMode::READ).unwrap();
        ops.seek(session, -2, Whence::End).unwrap();
        assert_eq!(ops.read(session, 100).unwrap().len(), 2);
        assert!(ops.read(session, 100).unwrap().is_empty());
    }

    #[test]
    fn test_write_at_end_is_out_of_space() {
        let (_registry, ops, identity) = setup(Permission::WriteOnly, 4);
        let session = ops.open(identity, AccessMode::WRITE).unwrap();
        assert_eq!(ops.write(session, b"abcdef").unwrap(), 4);
        assert_eq!(ops.write(session, b"g"), Err(Error::OutOfSpace));
    }

    #[test]
    fn test_failed_seek_keeps_offset() {
        let (_registry, ops, identity) = setup(Permission::ReadWrite, 8);
        let session = ops.open(identity, RW).unwrap();
        ops.seek(session, 3, Whence::Set).unwrap();
        assert_eq!(ops.seek(session, 10, Whence::Cur), Err(Error::InvalidOffset));
        assert_eq!(ops.seek(session, 0, Whence::Cur).unwrap(), 3);
    }

    #[test]
    fn test_release_unknown_session() {
        let (_registry, ops, identity) = setup(Permission::ReadWrite, 8);
        let session = ops.open(identity, RW).unwrap();
        ops.release(session).unwrap();
        assert_eq!(ops.release(session), Err(Error::BadSession(session)));
        assert_eq!(ops.read(session, 1), Err(Error::BadSession(session)));
    }

    #[test]
    fn test_open_session_blocks_remove() {
        let (registry, ops, identity) = setup(Permission::ReadWrite, 8);
        let session = ops.open(identity, RW).unwrap();
        assert_eq!(registry.remove(0), Err(Error::Busy));
        ops.release(session).unwrap();
        registry.remove(0).unwrap();
        assert_eq!(
            ops.open(identity, RW),
            Err(Error::NoSuchDevice(identity))
        );
    }
}
