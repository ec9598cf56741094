//! Cellsync Protocols - Cell state synchronization with a remote kernel
//!
//! This crate keeps a local view of notebook cells (code, output, run
//! status) consistent with the cells held by a remote kernel, over a single
//! shared text channel.
//!
//! # Overview
//!
//! ## Cell Identity
//!
//! Each cell is addressed by the SHA-1 of `"code"` followed by the code it
//! was registered with (see [`cell_identity`]). The identity is fixed for
//! the life of a [`CellController`]; edits never re-key the cell.
//!
//! ## Shared Channel
//!
//! The [`channel`] module provides the [`Channel`] seam and an in-process
//! fan-out implementation ([`SharedChannel`]). Every controller sees every
//! inbound frame and keeps only the ones addressed to its identity. Frames
//! and connectivity changes share one ordered [`Inbound`] stream.
//!
//! ## Protocol
//!
//! Requests are fire-and-forget JSON frames ([`Request`]); the kernel answers
//! later with [`KernelMessage`] frames. There is no acknowledgement, no
//! correlation beyond the identity and no timeout.
//!
//! # Example
//!
//! ```rust
//! use cellsync_protocols::{CellController, CellStatus, ChannelConfig, SharedChannel};
//!
//! let (channel, mut endpoint) = SharedChannel::new(ChannelConfig::default());
//! let cell = CellController::new(channel, "print(1)");
//!
//! cell.evaluate();
//! let request = endpoint.try_next_outbound().unwrap();
//! assert!(request.contains("reevaluate"));
//!
//! let reply = format!(
//!     r#"{{"kind":"status","hashid":"{}","status":"busy"}}"#,
//!     cell.hashid()
//! );
//! cell.handle_frame(&reply).unwrap();
//! assert_eq!(cell.status(), CellStatus::Busy);
//! ```

pub mod channel;
pub mod controller;
pub mod error;
pub mod message;

pub use channel::{
    Channel, ChannelConfig, ChannelEndpoint, ConnectionStatus, Inbound, SharedChannel,
};
pub use controller::{cell_identity, CellController, CellSnapshot, Dispatch, IDENTITY_PREFIX};
pub use error::{Error, Result};
pub use message::{CellStatus, KernelMessage, Request};

// Re-export the digest type for convenience
pub use cellsync_digest::Digest;
