//! End-to-end gate behavior over real transport peers.
#![cfg(unix)]

use std::os::unix::net::UnixStream;

use peergate::{AcceptAll, AcceptancePolicy, SameProcessOnly};
use peergate_common::{Envelope, SocketPeer};

struct PlainEnvelope;

impl Envelope for PlainEnvelope {}

#[cfg(any(target_os = "linux", target_os = "macos"))]
#[test]
fn same_process_policy_accepts_socketpair_peer() {
    let (left, _right) = UnixStream::pair().expect("socketpair");
    let peer = SocketPeer::Unix(&left);
    assert!(SameProcessOnly.decide(&peer, &PlainEnvelope));
}

#[test]
fn accept_all_accepts_socket_peer() {
    let (left, _right) = UnixStream::pair().expect("socketpair");
    let peer = SocketPeer::Unix(&left);
    assert!(AcceptAll.decide(&peer, &PlainEnvelope));
}

#[cfg(target_os = "linux")]
mod code_identity {
    use anyhow::anyhow;
    use peergate::{CodeIdentityPolicy, CodeRequirement};
    use peergate_common::{AuditToken, Peer};

    use super::*;

    /// Peer claiming a PID without any transport behind it.
    struct BarePeer {
        pid: u32,
    }

    impl Peer for BarePeer {
        fn pid(&self) -> anyhow::Result<u32> {
            Ok(self.pid)
        }

        fn audit_token(&self) -> anyhow::Result<AuditToken> {
            Err(anyhow!("no audit token"))
        }
    }

    fn own_binary_requirement() -> CodeRequirement {
        let exe = std::env::current_exe().expect("current_exe");
        CodeRequirement::sha256_of(exe).expect("hash own binary")
    }

    #[test]
    fn accepts_peer_running_an_allowed_binary() {
        let policy = CodeIdentityPolicy::new(vec![own_binary_requirement()]).unwrap();
        let (left, _right) = UnixStream::pair().expect("socketpair");
        let peer = SocketPeer::Unix(&left);
        assert!(policy.decide(&peer, &PlainEnvelope));
    }

    #[test]
    fn accepts_when_any_requirement_matches() {
        let other = CodeRequirement::sha256_hex("0".repeat(64)).unwrap();
        let policy = CodeIdentityPolicy::new(vec![other, own_binary_requirement()]).unwrap();
        let (left, _right) = UnixStream::pair().expect("socketpair");
        let peer = SocketPeer::Unix(&left);
        assert!(policy.decide(&peer, &PlainEnvelope));
    }

    #[test]
    fn rejects_peer_running_an_unknown_binary() {
        let stranger = CodeRequirement::sha256_hex("f".repeat(64)).unwrap();
        let policy = CodeIdentityPolicy::new(vec![stranger]).unwrap();
        let (left, _right) = UnixStream::pair().expect("socketpair");
        let peer = SocketPeer::Unix(&left);
        assert!(!policy.decide(&peer, &PlainEnvelope));
    }

    #[test]
    fn rejects_peer_whose_identity_cannot_be_resolved() {
        // The requirement would match this very binary, but the peer's
        // process cannot be found, so resolution fails and the gate stays
        // closed.
        let policy = CodeIdentityPolicy::new(vec![own_binary_requirement()]).unwrap();
        let peer = BarePeer { pid: 999_999_999 };
        assert!(!policy.decide(&peer, &PlainEnvelope));
    }

    #[test]
    fn decisions_are_concurrency_safe() {
        let policy = CodeIdentityPolicy::new(vec![own_binary_requirement()]).unwrap();
        let (left, _right) = UnixStream::pair().expect("socketpair");

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let peer = SocketPeer::Unix(&left);
                    assert!(policy.decide(&peer, &PlainEnvelope));
                });
            }
        });
    }
}
