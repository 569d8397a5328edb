//! # GlutenSense Core Library
//!
//! Serial protocol engine for the GlutenSense resistance readout device.

#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Automatic discovery of the serial port the device is attached to
//! - A time-based progress estimate for the discovery phase
//! - A streaming session that decodes resistance and reset frames
//! - Single-character command transmission
//! - A simulated device for running hosts without hardware
//!
//! Each long-running part is a blocking worker spawned on the tokio blocking
//! pool. Workers report through unbounded channels and stop cooperatively via
//! a `CancellationToken`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use glutensense_core::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! let backend: Arc<dyn SerialBackend> = Arc::new(SystemSerial);
//! let state = SharedState::new();
//! let config = DeviceConfig::default();
//!
//! // Find the device
//! let scanner = PortScanner::new(backend.clone(), state.clone(), config.clone());
//! let (scan, _scan_events) = scanner.spawn(CancellationToken::new())?;
//! let port = scan.join().await?.expect("scan was not cancelled");
//!
//! // Stream measurements
//! let session = DeviceSession::new(port, backend, state.clone(), config);
//! let (handle, mut events) = session.start(CancellationToken::new())?;
//! handle.send_command(Command::StartMeasurement);
//! while let Some(SessionEvent::Sample(sample)) = events.recv().await {
//!     println!("{}: {:.3}", sample.kind.label(), sample.value);
//! }
//! ```

pub mod config;
pub mod demo;
pub mod progress;
pub mod protocol;
pub mod scanner;
pub mod session;
pub mod state;
pub mod worker;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{DeviceConfig, ReadErrorPolicy};
    pub use crate::progress::{ProgressEvent, ProgressOutcome, ProgressReporter};
    pub use crate::protocol::{
        Command, DecodedSample, PacketKind, PortInfo, ProtocolError, ProtocolRevision,
        SerialBackend, SystemSerial,
    };
    pub use crate::scanner::{PortScanner, ScanEvent};
    pub use crate::session::{DeviceSession, PortStatus, SessionEvent, SessionExit, SessionHandle};
    pub use crate::state::{ConnectionState, SharedState};
    pub use crate::worker::WorkerHandle;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
