//! Peer code-identity resolution.
//!
//! A resolver turns a borrowed connection/message pair into proof of what
//! code the peer is running, and checks that proof against configured
//! requirements. On macOS the proof is the peer's code signature; on other
//! platforms it is a digest of the peer's executable image, which is the
//! strongest statement those platforms can make about on-disk identity.

use peergate_common::{Envelope, Peer};

#[cfg(not(target_os = "macos"))]
mod binary;
#[cfg(target_os = "macos")]
mod macos;

#[cfg(not(target_os = "macos"))]
pub use binary::{BinaryIdentity, CodeRequirement, PlatformResolver, RequirementError};
#[cfg(target_os = "macos")]
pub use macos::{CodeRequirement, PlatformResolver, SignedCode, XpcEnvelope, XpcPeer};

/// Resolves and checks the verified code identity of a peer process.
///
/// `resolve` re-derives the identity on every call; identities are
/// transient to one decision and never cached.
pub trait IdentityResolver {
    /// Opaque handle to a peer's verified code identity.
    type Identity;
    /// Opaque descriptor of one acceptable code-signing constraint.
    type Requirement;

    /// Resolves the peer's code identity, or `None` when it cannot be
    /// proven by any available mechanism. Resolution prefers the documented
    /// mechanism that derives identity from the message's embedded
    /// credential, where the platform has one, and falls back to the peer's
    /// audit token.
    fn resolve(&self, peer: &dyn Peer, message: &dyn Envelope) -> Option<Self::Identity>;

    /// Whether `identity` satisfies a single `requirement`. Any failure to
    /// evaluate counts as not satisfied; no distinction is made between a
    /// malformed requirement and one that simply does not match.
    fn satisfies(&self, identity: &Self::Identity, requirement: &Self::Requirement) -> bool;
}
