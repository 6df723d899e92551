//! Minimal echo server guarded by an acceptance policy.
//!
//! Every inbound line is passed through the gate before it is echoed. With
//! `PEERGATE_PEER_BINARY_HASHES` set, peers must run one of the allowed
//! binaries; otherwise only connections from this process are accepted.
//!
//! Run with: cargo run --example guarded_echo

#[cfg(all(unix, not(target_os = "macos")))]
fn main() -> anyhow::Result<()> {
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixListener;

    use peergate::{AcceptancePolicy, CodeIdentityPolicy, CodeRequirement, SameProcessOnly};
    use peergate_common::{Envelope, SocketPeer};

    struct Line;

    impl Envelope for Line {}

    tracing_subscriber::fmt::init();

    let policy: Box<dyn AcceptancePolicy> = match CodeRequirement::allowed_from_env() {
        Ok(requirements) => {
            tracing::info!("gating on {} allowed peer binaries", requirements.len());
            Box::new(CodeIdentityPolicy::new(requirements)?)
        }
        Err(e) => {
            tracing::info!("no peer digests configured ({e}); accepting this process only");
            Box::new(SameProcessOnly)
        }
    };

    let socket_path = "/tmp/peergate-echo.sock";
    let _ = std::fs::remove_file(socket_path);
    let listener = UnixListener::bind(socket_path)?;
    tracing::info!("listening on {socket_path}");

    for connection in listener.incoming() {
        let stream = connection?;
        let peer = SocketPeer::Unix(&stream);

        let mut reader = BufReader::new(&stream);
        let mut line = String::new();
        while reader.read_line(&mut line)? > 0 {
            if policy.decide(&peer, &Line) {
                (&stream).write_all(line.as_bytes())?;
            } else {
                tracing::warn!("peer rejected, closing connection");
                break;
            }
            line.clear();
        }
    }

    Ok(())
}

#[cfg(not(all(unix, not(target_os = "macos"))))]
fn main() {
    eprintln!("this example requires a non-macOS Unix platform");
}
