//! Peergate Common Library
//!
//! This crate provides the shared data model used by the Peergate acceptance
//! gate and by IPC transports that feed it. It includes:
//!
//! - The [`Peer`] and [`Envelope`] handle traits the gate borrows for the
//!   duration of one acceptance decision
//! - The fixed-size [`AuditToken`] security descriptor and its canonical
//!   byte packing
//! - Socket-backed peer handles with platform-specific credential extraction
//!   (Unix domain sockets, Windows named pipes)
//!
//! # Features
//!
//! - **Cross-platform credentials**: unified peer PID extraction over
//!   `SO_PEERCRED`, `LOCAL_PEERPID`, and named-pipe client queries
//! - **Audit tokens**: version-independent packing for OS identity calls
//!   that expect binary-encoded audit data

/// Fixed-size process security descriptor and its byte packing
pub mod audit_token;

/// Borrowed peer and message handle traits
pub mod peer;

/// Socket-backed peer handles with platform credential extraction
pub mod socket;

// Re-export commonly used types for convenience
pub use audit_token::AuditToken;
#[cfg(target_os = "macos")]
pub use peer::RawXpcMessage;
pub use peer::{Envelope, MessageCredential, Peer};
pub use socket::SocketPeer;
