//! Peer-acceptance gate for IPC servers.
//!
//! For every inbound message, the surrounding IPC server asks its one
//! configured [`AcceptancePolicy`] whether the sender is permitted to talk
//! to this endpoint. The policy is the server's only security boundary, so
//! every strategy here fails closed: if the peer's identity cannot be
//! established, the message is rejected, full stop.
//!
//! Three strategies are provided:
//!
//! - [`AcceptAll`] for transports that are unreachable by untrusted
//!   processes
//! - [`SameProcessOnly`] for anonymous, process-private endpoints
//! - [`CodeIdentityPolicy`] for listening endpoints, which verifies the
//!   peer's on-disk code identity against a configured set of
//!   [`CodeRequirement`]s
//!
//! Identity resolution is platform work and lives behind the
//! [`IdentityResolver`] seam; [`PlatformResolver`] is the default for the
//! running OS.

/// Peer code-identity resolution
pub mod identity;

/// The acceptance-policy contract and its strategies
pub mod policy;

/// Lazy resolution of dynamic symbols
#[cfg(unix)]
pub mod symbol;

// Re-export commonly used types for convenience
#[cfg(not(target_os = "macos"))]
pub use identity::{BinaryIdentity, RequirementError};
#[cfg(target_os = "macos")]
pub use identity::{SignedCode, XpcEnvelope, XpcPeer};
pub use identity::{CodeRequirement, IdentityResolver, PlatformResolver};
pub use policy::{AcceptAll, AcceptancePolicy, CodeIdentityPolicy, PolicyError, SameProcessOnly};
