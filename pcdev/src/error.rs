//! Error types for the device driver
//!
//! One enum covers configuration, lifecycle and I/O failures so that every
//! layer can propagate with `?`. Teardown collects several of them into a
//! [`TeardownError`].

use std::fmt;

use crate::fops::SessionHandle;
use crate::idgen::Identity;

/// Errors that can occur in the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The attach event carries neither usable tree node nor static record,
    /// or its kind is not known to the driver
    NoConfigData,

    /// A required tree property is absent; names the logical field
    MissingProperty(&'static str),

    /// A property or record field is present but unusable
    InvalidProperty { field: &'static str, reason: String },

    /// The backing buffer could not be allocated
    AllocationFailed { capacity: usize },

    /// Access mode not allowed by the device permission or by the session mode
    Denied,

    /// Seek target outside `[0, capacity]`, unknown whence, or arithmetic overflow
    InvalidOffset,

    /// Write at the end of the device
    OutOfSpace,

    /// Device has open sessions, or the slot is mid-transition. Retryable.
    Busy,

    /// Slot already holds a device
    AlreadyAttached(usize),

    /// Slot holds no device
    AlreadyDetached(usize),

    /// Sequence id does not map to a slot of this driver
    SlotOutOfRange { slot: usize, max: usize },

    /// Every identity of the range is in use
    RangeExhausted,

    /// No live device has this identity
    NoSuchDevice(Identity),

    /// Session handle is unknown (never opened or already released)
    BadSession(SessionHandle),

    /// The driver has been torn down
    ShutDown,

    /// An external collaborator refused an operation
    Host { op: &'static str, reason: String },

    /// Board description could not be parsed
    Board(String),

    /// A step failed and undoing the earlier steps failed too
    RollbackFailed { cause: Box<Error>, undo: Vec<Error> },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoConfigData => write!(f, "No configuration data available"),
            Self::MissingProperty(field) => write!(f, "Missing property: {field}"),
            Self::InvalidProperty { field, reason } => {
                write!(f, "Invalid property '{field}': {reason}")
            }
            Self::AllocationFailed { capacity } => {
                write!(f, "Cannot allocate {capacity} bytes for the device buffer")
            }
            Self::Denied => write!(f, "Permission denied"),
            Self::InvalidOffset => write!(f, "Invalid offset"),
            Self::OutOfSpace => write!(f, "No space left on the device"),
            Self::Busy => write!(f, "Device or resource busy"),
            Self::AlreadyAttached(slot) => write!(f, "Slot {slot} is already attached"),
            Self::AlreadyDetached(slot) => write!(f, "Slot {slot} is already detached"),
            Self::SlotOutOfRange { slot, max } => {
                write!(f, "Slot {slot} out of range, driver handles {max} devices")
            }
            Self::RangeExhausted => write!(f, "Identity range exhausted"),
            Self::NoSuchDevice(identity) => write!(f, "No such device: {identity}"),
            Self::BadSession(session) => write!(f, "Bad session: {session:?}"),
            Self::ShutDown => write!(f, "Driver is shut down"),
            Self::Host { op, reason } => write!(f, "{op} failed: {reason}"),
            Self::Board(e) => write!(f, "Board description error: {e}"),
            Self::RollbackFailed { cause, undo } => {
                write!(f, "{cause}; rollback left {} step(s) behind", undo.len())?;
                for e in undo {
                    write!(f, "; {e}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Whether the caller may retry the same request later
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// All failures observed while tearing the driver down
///
/// Teardown never stops at the first failure, so the report may hold several.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownError {
    pub failures: Vec<Error>,
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Teardown finished with {} failure(s)", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for TeardownError {}
