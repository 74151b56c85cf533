pub mod board;
pub mod bus;
pub mod config;
pub mod driver;
pub mod error;
pub mod fops;
pub mod host;
pub mod idgen;
pub mod io;
pub mod memhost;
pub mod perm;
pub mod record;
pub mod registry;
pub mod rollback;
pub mod settings;
pub mod tree;

// Re-export error types for convenience
pub use error::{Error, Result, TeardownError};

// Re-export identity types for convenience
pub use idgen::{IdGen, IdRange, Identity};

// Re-export buffer types for convenience
pub use io::{DeviceBuffer, IoOutcome, Whence};

// Re-export permission types for convenience
pub use perm::{check_access, Access, AccessMode, Permission};

// Re-export configuration types
pub use config::{DeviceConfig, Discriminator, Metadata, StaticRecord};
pub use tree::{Property, PropertyError, TreeNode};

// Re-export registry types
pub use record::{DeviceInfo, DeviceRecord, RecordLease};
pub use registry::Registry;

// Re-export operation table types
pub use fops::{DeviceFileOps, FileOperations, SessionHandle};

// Re-export host types
pub use host::{Bus, Host, IdentityRegistrar, Namespace, Transport};
pub use memhost::{HostCall, HostOp, MemHost};

// Re-export lifecycle types
pub use driver::{Driver, SlotState};
pub use rollback::{Transaction, UndoLog};
pub use settings::DriverSettings;

// Re-export bus runtime types
pub use bus::{AttachEvent, BusClient, BusEvent, BusReply, BusRequest, BusRuntime, DetachEvent};

pub use board::Board;
