//! Bounded I/O over fixed-capacity device buffers
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  Operation table (fops)             │
//! │  - sessions with their offsets      │
//! │  - access mode checks               │
//! └─────────────────────────────────────┘
//!          ▲
//!          │ passes offset + user bytes
//!          ▼
//! ┌─────────────────────────────────────┐
//! │  DeviceBuffer (storage)             │
//! │  - fixed capacity, never resized    │
//! │  - clamped read/write               │
//! │  - checked seek arithmetic          │
//! └─────────────────────────────────────┘
//! ```

pub mod buffer;

pub use buffer::{DeviceBuffer, IoOutcome, Whence};
