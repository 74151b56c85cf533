//! Live device records and the leases sessions hold on them

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::config::DeviceConfig;
use crate::idgen::Identity;
use crate::io::DeviceBuffer;

/// Whether sessions may lease a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Inserted, but attach has not completed yet
    Pending,
    Live,
    /// Going away; never leased again
    Retired,
}

struct LeaseState {
    users: usize,
    phase: Phase,
}

/// One attached device: identity, configuration and exclusively owned buffer
///
/// # Thread Safety
///
/// The buffer sits behind its own mutex, so each read/write/seek is atomic
/// with respect to other operations on the same device. The lease counter
/// tracks open sessions; a record can only be retired (and then removed)
/// once that counter is zero.
///
/// A new record is pending and refuses leases until [`DeviceRecord::activate`],
/// so a half-attached device never has sessions.
pub struct DeviceRecord {
    identity: Identity,
    slot: usize,
    config: DeviceConfig,
    buffer: Mutex<DeviceBuffer>,
    leases: Mutex<LeaseState>,
    idle: Condvar,
}

/// Copy of a record's bookkeeping, without access to its buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub identity: Identity,
    pub slot: usize,
    pub config: DeviceConfig,
}

impl DeviceRecord {
    #[must_use]
    pub fn new(identity: Identity, slot: usize, config: DeviceConfig, buffer: DeviceBuffer) -> Self {
        Self {
            identity,
            slot,
            config,
            buffer: Mutex::new(buffer),
            leases: Mutex::new(LeaseState {
                users: 0,
                phase: Phase::Pending,
            }),
            idle: Condvar::new(),
        }
    }

    #[must_use]
    pub fn identity(&self) -> Identity {
        self.identity
    }

    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }

    #[must_use]
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    #[must_use]
    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            identity: self.identity,
            slot: self.slot,
            config: self.config.clone(),
        }
    }

    /// Lock the buffer for the duration of one operation
    pub(crate) fn buffer(&self) -> MutexGuard<'_, DeviceBuffer> {
        self.buffer.lock()
    }

    /// Number of open sessions
    #[must_use]
    pub fn users(&self) -> usize {
        self.leases.lock().users
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.leases.lock().phase == Phase::Live
    }

    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.leases.lock().phase == Phase::Retired
    }

    /// Open the record for sessions
    ///
    /// Returns `false` if it is retired already.
    pub(crate) fn activate(&self) -> bool {
        let mut state = self.leases.lock();
        match state.phase {
            Phase::Pending | Phase::Live => {
                state.phase = Phase::Live;
                true
            }
            Phase::Retired => false,
        }
    }

    /// Take a lease if the record is live
    pub(crate) fn lease(self: &Arc<Self>) -> Option<RecordLease> {
        let mut state = self.leases.lock();
        if state.phase != Phase::Live {
            return None;
        }
        state.users += 1;
        Some(RecordLease {
            record: Arc::clone(self),
        })
    }

    /// Mark the record as going away if nobody holds a lease
    ///
    /// Returns `false` when sessions are still open, `true` once the record
    /// is retired, including when it was retired before.
    pub(crate) fn retire(&self) -> bool {
        let mut state = self.leases.lock();
        if state.users > 0 {
            return false;
        }
        state.phase = Phase::Retired;
        true
    }

    /// Block until no lease is held
    ///
    /// With `timeout = None` this may wait forever if a session is never
    /// released. Returns `true` if the record became idle.
    pub fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.leases.lock();
        while state.users > 0 {
            match deadline {
                Some(deadline) => {
                    if self.idle.wait_until(&mut state, deadline).timed_out() {
                        return state.users == 0;
                    }
                }
                None => self.idle.wait(&mut state),
            }
        }
        true
    }

    fn drop_lease(&self) {
        let mut state = self.leases.lock();
        state.users -= 1;
        if state.users == 0 {
            self.idle.notify_all();
        }
    }
}

impl fmt::Debug for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.leases.lock();
        write!(
            f,
            "DeviceRecord(identity={}, slot={}, serial={}, capacity={}, users={}, phase={:?})",
            self.identity,
            self.slot,
            self.config.serial,
            self.config.capacity,
            state.users,
            state.phase
        )
    }
}

/// Counted reference to a record, held by an open session
///
/// Dropping the lease releases it and wakes a waiting detach when it was the
/// last one.
pub struct RecordLease {
    record: Arc<DeviceRecord>,
}

impl RecordLease {
    #[must_use]
    pub fn record(&self) -> &DeviceRecord {
        &self.record
    }
}

impl Drop for RecordLease {
    fn drop(&mut self) {
        self.record.drop_lease();
    }
}

impl fmt::Debug for RecordLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordLease({})", self.record.identity)
    }
}
