use peergate_common::{Envelope, Peer};

use crate::identity::{IdentityResolver, PlatformResolver};

/// Decides whether an inbound IPC message may be processed.
///
/// The server holds exactly one policy and consults it before any other
/// handling of a received message. `decide` is a pure function of its
/// inputs: it may query the OS but must not mutate caller-visible state,
/// and it must be safe to invoke concurrently from any number of
/// connections without coordination.
///
/// A `false` result is silent — the rejected peer is told nothing and the
/// message receives no further processing.
pub trait AcceptancePolicy: Send + Sync {
    /// Returns `true` when the message from this peer may be handled.
    fn decide(&self, peer: &dyn Peer, message: &dyn Envelope) -> bool;
}

/// Accepts every peer unconditionally.
///
/// Correct only when the transport already restricts connections to a scope
/// where any peer able to connect is inherently trusted, e.g. a
/// process-private, non-discoverable channel. Applying this to a
/// discoverable or shared channel is a caller error that this policy cannot
/// detect.
pub struct AcceptAll;

impl AcceptancePolicy for AcceptAll {
    fn decide(&self, _peer: &dyn Peer, _message: &dyn Envelope) -> bool {
        true
    }
}

/// Accepts only peers running in the current process.
///
/// A PID comparison is normally spoofable (PIDs are reused), but it is
/// sound for anonymous endpoints created by this process: no other process
/// can hold our PID while we are alive, and every peer connection is
/// constructed after the server exists. Do not reuse this for any
/// listening or discoverable endpoint.
pub struct SameProcessOnly;

impl AcceptancePolicy for SameProcessOnly {
    fn decide(&self, peer: &dyn Peer, _message: &dyn Envelope) -> bool {
        matches!(peer.pid(), Ok(pid) if pid == std::process::id())
    }
}

/// Error constructing an acceptance policy.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// A code-identity policy with nothing to match against would reject
    /// every peer; the caller must configure at least one requirement.
    #[error("code identity policy requires at least one code requirement")]
    EmptyRequirements,
}

/// Accepts only peers whose verified code identity satisfies at least one
/// of the configured requirements.
///
/// The requirement set is ordered, non-empty, and immutable after
/// construction. Requirements are compared with OR semantics: the first one
/// satisfied accepts the peer. A requirement that fails to evaluate for any
/// reason counts as not satisfied and checking continues with the next.
///
/// The peer's identity is re-resolved on every call and never cached. If it
/// cannot be resolved at all, the decision is `false` regardless of the
/// configured requirements.
pub struct CodeIdentityPolicy<R: IdentityResolver = PlatformResolver> {
    resolver: R,
    requirements: Vec<R::Requirement>,
}

impl CodeIdentityPolicy {
    /// Builds a policy over the platform's code-identity resolver.
    pub fn new(
        requirements: Vec<<PlatformResolver as IdentityResolver>::Requirement>,
    ) -> Result<Self, PolicyError> {
        Self::with_resolver(PlatformResolver::default(), requirements)
    }
}

impl<R: IdentityResolver> CodeIdentityPolicy<R> {
    /// Builds a policy over a caller-supplied resolver.
    pub fn with_resolver(
        resolver: R,
        requirements: Vec<R::Requirement>,
    ) -> Result<Self, PolicyError> {
        if requirements.is_empty() {
            return Err(PolicyError::EmptyRequirements);
        }
        Ok(Self {
            resolver,
            requirements,
        })
    }

    /// The configured requirements, in evaluation order.
    pub fn requirements(&self) -> &[R::Requirement] {
        &self.requirements
    }
}

impl<R> AcceptancePolicy for CodeIdentityPolicy<R>
where
    R: IdentityResolver + Send + Sync,
    R::Requirement: Send + Sync,
{
    fn decide(&self, peer: &dyn Peer, message: &dyn Envelope) -> bool {
        let Some(identity) = self.resolver.resolve(peer, message) else {
            tracing::warn!(
                "rejecting peer (pid {:?}): code identity could not be resolved",
                peer.pid().ok()
            );
            return false;
        };

        self.requirements
            .iter()
            .any(|requirement| self.resolver.satisfies(&identity, requirement))
    }
}
