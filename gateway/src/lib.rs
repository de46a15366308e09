//! Signature dispatch, parser lifecycle and discovery coordination.
//!
//! The gateway core is four long-lived components wired together by the
//! binary:
//!
//! - [`Dispatcher`] routes frames to parsers by longest signature prefix
//! - [`Manager`] persists parser sources and the binding manifest
//! - [`Discovery`] turns unknown or broken protocols into working parsers
//!   by consulting an external oracle, exactly once per signature
//! - [`TcpServer`] feeds inbound frames through the whole loop
//!
//! All components are `Send + Sync` and shared by `Arc`; nothing lives in a
//! global.

mod dispatcher;
mod discovery;
mod fsutil;
mod manager;
mod sanitize;
mod server;

pub use dispatcher::{Dispatcher, IngestError};
pub use discovery::{Discovery, DiscoveryConfig, DiscoveryError, FlightPolicy};
pub use manager::{Manager, ManagerError, SOURCE_EXT};
pub use sanitize::{extract_signature, sanitize_source};
pub use server::{FrameOutcome, TcpServer, handle_frame};
