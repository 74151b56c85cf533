//! Device lifecycle controller
//!
//! [`Driver`] is the single context object of the driver. It is created by
//! [`Driver::setup`], which acquires the whole-driver resources from the host
//! (identity range, namespace scope, bus registration), and released by
//! [`Driver::teardown`]. In between it attaches and detaches devices:
//!
//! ```text
//!   attach:   resolve → registry insert → transport add → publish
//!   detach:   retire  → unpublish → transport remove → registry remove
//!   teardown: refuse attaches → unregister bus → detach all → destroy scope → release range
//! ```
//!
//! A failing attach step undoes the completed ones in reverse order, so a
//! failed attach leaves nothing behind. The record accepts sessions only once
//! every attach step has succeeded.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::bus::AttachEvent;
use crate::config::{self, DeviceConfig};
use crate::error::{Error, Result, TeardownError};
use crate::fops::{DeviceFileOps, FileOperations};
use crate::host::Host;
use crate::idgen::{IdRange, Identity};
use crate::record::DeviceInfo;
use crate::registry::Registry;
use crate::rollback::{Transaction, UndoLog};
use crate::settings::DriverSettings;

/// Lifecycle state of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Unattached,
    Attaching,
    Attached,
    Detaching,
}

struct SlotTable {
    states: Vec<SlotState>,
    /// Set by teardown; no attach starts afterwards
    shut_down: bool,
}

impl SlotTable {
    fn in_transition(&self) -> bool {
        self.states
            .iter()
            .any(|state| matches!(state, SlotState::Attaching | SlotState::Detaching))
    }
}

pub struct Driver<H: Host> {
    host: Arc<H>,
    settings: DriverSettings,
    registry: Arc<Registry>,
    ops: Arc<DeviceFileOps>,
    slots: Mutex<SlotTable>,
    /// Signalled whenever a slot leaves a transition
    settled: Condvar,
    /// Undo actions of setup; `None` once torn down
    setup: Mutex<Option<UndoLog<H>>>,
    total_devices: AtomicUsize,
}

impl<H: Host + 'static> Driver<H> {
    /// Acquire the identity range, the namespace scope and the bus registration
    ///
    /// On failure the already acquired resources are released in reverse order.
    ///
    /// # Errors
    /// `InvalidProperty` for unusable settings, otherwise the host's error.
    pub fn setup(host: Arc<H>, settings: DriverSettings) -> Result<Self> {
        let count = u32::try_from(settings.max_devices)
            .ok()
            .filter(|count| *count > 0)
            .ok_or_else(|| Error::InvalidProperty {
                field: "max_devices",
                reason: format!("cannot handle {} devices", settings.max_devices),
            })?;

        let mut tx = Transaction::new(&*host);
        let range = tx.step(
            "identity range",
            |h| h.alloc_region(&settings.region_name, count),
            |h, range: IdRange| h.release_region(range),
        )?;
        let class = settings.class_name.clone();
        tx.step(
            "namespace scope",
            |h| h.create_scope(&settings.class_name),
            move |h, ()| h.destroy_scope(&class),
        )?;
        let name = settings.driver_name.clone();
        tx.step(
            "bus registration",
            |h| h.register_driver(&settings.driver_name),
            move |h, ()| h.unregister_driver(&name),
        )?;
        let setup = tx.commit();

        info!(
            driver = %settings.driver_name,
            base = %range.base(),
            count,
            "driver loaded"
        );

        let registry = Arc::new(Registry::new(range, settings.max_devices));
        let ops = Arc::new(DeviceFileOps::new(Arc::clone(&registry)));
        Ok(Self {
            host,
            slots: Mutex::new(SlotTable {
                states: vec![SlotState::Unattached; settings.max_devices],
                shut_down: false,
            }),
            settled: Condvar::new(),
            settings,
            registry,
            ops,
            setup: Mutex::new(Some(setup)),
            total_devices: AtomicUsize::new(0),
        })
    }

    #[must_use]
    pub fn host(&self) -> &Arc<H> {
        &self.host
    }

    #[must_use]
    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    /// The operation table shared by all devices of this driver
    #[must_use]
    pub fn ops(&self) -> Arc<DeviceFileOps> {
        Arc::clone(&self.ops)
    }

    #[must_use]
    pub fn total_devices(&self) -> usize {
        self.total_devices.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.slots.lock().shut_down
    }

    #[must_use]
    pub fn slot_state(&self, slot: usize) -> Option<SlotState> {
        self.slots.lock().states.get(slot).copied()
    }

    #[must_use]
    pub fn lookup(&self, identity: Identity) -> Option<DeviceInfo> {
        self.registry.lookup(identity)
    }

    #[must_use]
    pub fn device(&self, slot: usize) -> Option<DeviceInfo> {
        self.registry.get(slot)
    }

    #[must_use]
    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.registry.devices()
    }

    /// Number of identities currently handed out
    #[must_use]
    pub fn ids_in_use(&self) -> usize {
        self.registry.ids_in_use()
    }

    /// Move `slot` from `from` to `to`, reporting why not otherwise
    ///
    /// No slot starts attaching once the driver is shut down.
    fn transition(&self, slot: usize, from: SlotState, to: SlotState) -> Result<SlotState> {
        let mut table = self.slots.lock();
        if to == SlotState::Attaching && table.shut_down {
            return Err(Error::ShutDown);
        }
        let max = table.states.len();
        let state = table
            .states
            .get_mut(slot)
            .ok_or(Error::SlotOutOfRange { slot, max })?;
        let current = *state;
        if current == from {
            *state = to;
        }
        Ok(current)
    }

    fn set_state(&self, slot: usize, to: SlotState) {
        if let Some(state) = self.slots.lock().states.get_mut(slot) {
            *state = to;
        }
        self.settled.notify_all();
    }

    /// Refuse new attaches, then wait for the slots in transition to settle
    ///
    /// Returns `false` if some slot was still in transition at the deadline.
    fn quiesce(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut table = self.slots.lock();
        table.shut_down = true;
        while table.in_transition() {
            match deadline {
                Some(deadline) => {
                    if self.settled.wait_until(&mut table, deadline).timed_out() {
                        return !table.in_transition();
                    }
                }
                None => self.settled.wait(&mut table),
            }
        }
        true
    }

    /// Bring up the device described by `event`
    ///
    /// # Errors
    /// - `ShutDown` after teardown
    /// - `SlotOutOfRange`, `AlreadyAttached`, or `Busy` while the slot changes state
    /// - configuration, allocation and host errors, after rollback
    /// - `RollbackFailed` if an undo step failed as well
    pub fn attach(&self, event: &AttachEvent) -> Result<DeviceInfo> {
        let slot = event.sequence_id;
        match self.transition(slot, SlotState::Unattached, SlotState::Attaching)? {
            SlotState::Unattached => {}
            SlotState::Attached => return Err(Error::AlreadyAttached(slot)),
            SlotState::Attaching | SlotState::Detaching => return Err(Error::Busy),
        }

        let result = self.attach_slot(slot, event);
        match &result {
            Ok(info) => {
                self.set_state(slot, SlotState::Attached);
                self.total_devices.fetch_add(1, Ordering::SeqCst);
                info!(
                    slot,
                    identity = %info.identity,
                    name = %self.settings.node_name(slot),
                    "device attached"
                );
            }
            Err(e) if self.registry.get(slot).is_some() => {
                // Rollback left the record behind; detach can still clean it up
                self.set_state(slot, SlotState::Attached);
                self.total_devices.fetch_add(1, Ordering::SeqCst);
                warn!(
                    slot,
                    kind = %event.kind,
                    error = %e,
                    "attach failed, slot kept for detach"
                );
            }
            Err(e) => {
                self.set_state(slot, SlotState::Unattached);
                warn!(slot, kind = %event.kind, error = %e, "attach failed");
            }
        }
        result
    }

    fn attach_slot(&self, slot: usize, event: &AttachEvent) -> Result<DeviceInfo> {
        let config = config::resolve(event)?;
        log_probe(slot, &config);

        let mut tx = Transaction::new(&*self.host);

        let registry = Arc::clone(&self.registry);
        let info = tx.step(
            "registry insert",
            |_| self.registry.insert(slot, config),
            move |_, _: DeviceInfo| registry.remove(slot).map(drop),
        )?;
        let identity = info.identity;

        let ops: Arc<dyn FileOperations> = self.ops.clone();
        tx.step(
            "transport add",
            |h| h.add(identity, ops),
            move |h, ()| h.remove(identity),
        )?;

        let name = self.settings.node_name(slot);
        let class = self.settings.class_name.clone();
        tx.step(
            "publish",
            |h| h.publish(&self.settings.class_name, &name, identity),
            move |h, ()| h.unpublish(&class, identity),
        )?;

        tx.step("activate", |_| self.registry.activate(slot), |_, ()| Ok(()))?;
        tx.finish();
        Ok(info)
    }

    /// Take down the device in `slot`, failing fast if it is in use
    ///
    /// Detaching an empty slot succeeds without doing anything.
    ///
    /// # Errors
    /// `SlotOutOfRange`, `Busy` if sessions are open or the slot changes
    /// state, or the first host error met on the way.
    pub fn detach(&self, slot: usize) -> Result<()> {
        self.detach_timeout(slot, Some(Duration::ZERO))
    }

    /// Take down the device in `slot`, waiting for open sessions to end
    ///
    /// `timeout = None` waits without bound and never returns while a
    /// session stays open.
    ///
    /// # Errors
    /// As for [`Driver::detach`].
    pub fn detach_timeout(&self, slot: usize, timeout: Option<Duration>) -> Result<()> {
        match self.transition(slot, SlotState::Attached, SlotState::Detaching)? {
            SlotState::Attached => {}
            SlotState::Unattached => {
                debug!(slot, "slot not attached, nothing to detach");
                return Ok(());
            }
            SlotState::Attaching | SlotState::Detaching => return Err(Error::Busy),
        }

        let info = match self.registry.retire(slot, timeout) {
            Ok(info) => info,
            Err(e) => {
                self.set_state(slot, SlotState::Attached);
                return Err(e);
            }
        };

        let identity = info.identity;
        let steps = [
            self.host.unpublish(&self.settings.class_name, identity),
            self.host.remove(identity),
            self.registry.remove(slot).map(drop),
        ];
        self.set_state(slot, SlotState::Unattached);
        self.total_devices.fetch_sub(1, Ordering::SeqCst);

        let mut first_error = None;
        for e in steps.into_iter().filter_map(Result::err) {
            warn!(slot, identity = %identity, error = %e, "detach step failed");
            first_error.get_or_insert(e);
        }
        info!(slot, identity = %identity, "device detached");
        first_error.map_or(Ok(()), Err)
    }

    /// Release everything the driver holds
    ///
    /// Every step is attempted even if an earlier one fails. A second call
    /// does nothing.
    ///
    /// # Errors
    /// `TeardownError` listing every failure.
    pub fn teardown(&self) -> std::result::Result<(), TeardownError> {
        let Some(mut setup) = self.setup.lock().take() else {
            debug!("driver already torn down");
            return Ok(());
        };
        let mut failures = Vec::new();
        let timeout = self.settings.detach_timeout();
        if !self.quiesce(timeout) {
            warn!("slots still in transition at teardown");
        }

        // The bus registration is the last setup step, so it goes first
        if let Some(Err(e)) = setup.undo_last(&*self.host) {
            failures.push(e);
        }

        for slot in (0..self.settings.max_devices).rev() {
            if let Err(e) = self.detach_timeout(slot, timeout) {
                warn!(slot, error = %e, "device not detached during teardown");
                failures.push(e);
            }
        }

        failures.extend(setup.unwind(&*self.host));

        if failures.is_empty() {
            info!(driver = %self.settings.driver_name, "driver unloaded");
            Ok(())
        } else {
            warn!(failures = failures.len(), "driver unloaded with failures");
            Err(TeardownError { failures })
        }
    }
}

fn log_probe(slot: usize, config: &DeviceConfig) {
    debug!(
        slot,
        serial = %config.serial,
        size = config.capacity,
        permission = format_args!("{:#x}", config.permission.raw()),
        "probing device"
    );
    if let Some(metadata) = config.metadata() {
        debug!(
            slot,
            config_item1 = metadata.config_item1,
            config_item2 = metadata.config_item2,
            "device metadata"
        );
    }
}

impl<H: Host> fmt::Debug for Driver<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("settings", &self.settings)
            .field("states", &self.slots.lock().states)
            .field("registry", &self.registry)
            .field("total_devices", &self.total_devices.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
