//! Slot table of attached devices
//!
//! The registry owns every [`DeviceRecord`] and the identity allocator of the
//! driver's range. Records leave it only as snapshots ([`DeviceInfo`]) or as
//! counted leases taken by sessions.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::DeviceConfig;
use crate::error::{Error, Result};
use crate::idgen::{IdGen, IdRange, Identity};
use crate::io::DeviceBuffer;
use crate::record::{DeviceInfo, DeviceRecord, RecordLease};

pub struct Registry {
    slots: Mutex<Vec<Option<Arc<DeviceRecord>>>>,
    ids: IdGen,
}

impl Registry {
    /// Create a registry with `max_devices` empty slots
    #[must_use]
    pub fn new(range: IdRange, max_devices: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; max_devices]),
            ids: IdGen::new(range),
        }
    }

    #[must_use]
    pub fn max_devices(&self) -> usize {
        self.slots.lock().len()
    }

    #[must_use]
    pub fn range(&self) -> IdRange {
        self.ids.range()
    }

    /// Number of identities currently handed out
    #[must_use]
    pub fn ids_in_use(&self) -> usize {
        self.ids.in_use()
    }

    fn check_slot(slot: usize, max: usize) -> Result<()> {
        if slot >= max {
            return Err(Error::SlotOutOfRange { slot, max });
        }
        Ok(())
    }

    /// Create the record for `slot`
    ///
    /// The buffer is allocated first, then an identity is taken from the
    /// range. On failure nothing is kept. The record refuses sessions until
    /// [`Registry::activate`].
    ///
    /// # Errors
    /// `SlotOutOfRange`, `AlreadyAttached`, `AllocationFailed` or `RangeExhausted`.
    pub fn insert(&self, slot: usize, config: DeviceConfig) -> Result<DeviceInfo> {
        let mut slots = self.slots.lock();
        Self::check_slot(slot, slots.len())?;
        if slots[slot].is_some() {
            return Err(Error::AlreadyAttached(slot));
        }

        let buffer = DeviceBuffer::allocate(config.capacity)?;
        let identity = self.ids.get_next().ok_or(Error::RangeExhausted)?;

        let record = Arc::new(DeviceRecord::new(identity, slot, config, buffer));
        let info = record.info();
        slots[slot] = Some(record);
        debug!(slot, identity = %identity, "record inserted");
        Ok(info)
    }

    fn record_at(&self, slot: usize) -> Result<Arc<DeviceRecord>> {
        let slots = self.slots.lock();
        Self::check_slot(slot, slots.len())?;
        slots[slot].clone().ok_or(Error::AlreadyDetached(slot))
    }

    /// Let sessions open the record in `slot`
    ///
    /// # Errors
    /// `SlotOutOfRange`, `AlreadyDetached` for an empty slot, `Busy` if the
    /// record is retired already.
    pub fn activate(&self, slot: usize) -> Result<()> {
        let record = self.record_at(slot)?;
        if !record.activate() {
            return Err(Error::Busy);
        }
        trace!(slot, identity = %record.identity(), "record live");
        Ok(())
    }

    /// Retire the record in `slot` so no new session can open it
    ///
    /// With `timeout = Some(_)` waits at most that long for open sessions to
    /// end; `Some(Duration::ZERO)` fails fast. `None` waits without bound.
    ///
    /// # Errors
    /// `AlreadyDetached` for an empty slot, `Busy` if sessions stay open.
    pub fn retire(&self, slot: usize, timeout: Option<Duration>) -> Result<DeviceInfo> {
        let record = self.record_at(slot)?;
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if record.retire() {
                trace!(slot, identity = %record.identity(), "record retired");
                return Ok(record.info());
            }
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(slot, users = record.users(), "device still in use");
                        return Err(Error::Busy);
                    }
                    Some(deadline - now)
                }
                None => None,
            };
            record.wait_idle(remaining);
        }
    }

    /// Drop the record in `slot`, releasing its identity and buffer
    ///
    /// A record that is not retired yet is retired here, failing fast if it
    /// has open sessions.
    ///
    /// # Errors
    /// `SlotOutOfRange`, `AlreadyDetached` or `Busy`.
    pub fn remove(&self, slot: usize) -> Result<DeviceInfo> {
        let mut slots = self.slots.lock();
        Self::check_slot(slot, slots.len())?;
        let record = slots[slot].as_ref().ok_or(Error::AlreadyDetached(slot))?;
        if !record.retire() {
            return Err(Error::Busy);
        }

        let record = slots[slot].take().ok_or(Error::AlreadyDetached(slot))?;
        drop(slots);

        let info = record.info();
        if !self.ids.release(info.identity) {
            warn!(identity = %info.identity, "identity was not in use");
        }
        debug!(slot, identity = %info.identity, "record removed");
        Ok(info)
    }

    /// Snapshot of the live record with `identity`
    #[must_use]
    pub fn lookup(&self, identity: Identity) -> Option<DeviceInfo> {
        self.slots
            .lock()
            .iter()
            .flatten()
            .find(|record| record.identity() == identity)
            .map(|record| record.info())
    }

    /// Snapshot of the record in `slot`
    #[must_use]
    pub fn get(&self, slot: usize) -> Option<DeviceInfo> {
        self.slots
            .lock()
            .get(slot)
            .and_then(Option::as_ref)
            .map(|record| record.info())
    }

    /// Take a session lease on the live record with `identity`
    ///
    /// # Errors
    /// `NoSuchDevice` if no record has this identity or it is being detached.
    pub fn lease(&self, identity: Identity) -> Result<RecordLease> {
        let slots = self.slots.lock();
        slots
            .iter()
            .flatten()
            .find(|record| record.identity() == identity)
            .and_then(DeviceRecord::lease)
            .ok_or(Error::NoSuchDevice(identity))
    }

    /// Slots currently holding a record, in ascending order
    #[must_use]
    pub fn attached_slots(&self) -> Vec<usize> {
        self.slots
            .lock()
            .iter()
            .enumerate()
            .filter_map(|(slot, record)| record.as_ref().map(|_| slot))
            .collect()
    }

    /// Snapshots of every live record, by slot
    #[must_use]
    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.slots
            .lock()
            .iter()
            .flatten()
            .map(|record| record.info())
            .collect()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("slots", &*self.slots.lock())
            .field("ids", &self.ids)
            .finish()
    }
}
