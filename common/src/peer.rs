use anyhow::Result;

use crate::AuditToken;

/// Transport-level view of the remote end of one connection.
///
/// An acceptance policy borrows the handle for the duration of a single
/// decision; nothing about the peer is cached between calls.
pub trait Peer {
    /// Process ID of the peer, as reported by the transport at connection
    /// time.
    fn pid(&self) -> Result<u32>;

    /// The OS audit token for the peer's security context.
    ///
    /// Errors on platforms or transports that cannot produce one. Callers
    /// that need the token for identity resolution treat the error as
    /// "identity unresolvable".
    fn audit_token(&self) -> Result<AuditToken>;
}

/// One received message envelope, borrowed for a single acceptance decision.
pub trait Envelope {
    /// The code-signing credential the transport attached to this message,
    /// if any. Newer OS versions deliver one with every message; older
    /// versions and plain socket transports do not.
    fn credential(&self) -> Option<MessageCredential<'_>> {
        None
    }
}

/// Borrowed credential material carried by one message.
pub enum MessageCredential<'a> {
    /// Raw credential bytes supplied by the transport.
    Bytes(&'a [u8]),
    #[cfg(target_os = "macos")]
    /// A borrowed XPC message object carrying kernel-attached signing
    /// information.
    Xpc(RawXpcMessage<'a>),
}

/// Borrowed `xpc_object_t` for a received message.
///
/// Kept as an untyped pointer so this crate stays free of libxpc
/// declarations; the gate's macOS resolver knows what to do with it.
#[cfg(target_os = "macos")]
#[derive(Clone, Copy)]
pub struct RawXpcMessage<'a> {
    raw: *mut std::ffi::c_void,
    _lifetime: std::marker::PhantomData<&'a ()>,
}

#[cfg(target_os = "macos")]
impl RawXpcMessage<'_> {
    /// Wraps a received XPC message object.
    ///
    /// # Safety
    /// `raw` must be a valid `xpc_object_t` for a received message and must
    /// stay alive for the wrapper's lifetime.
    pub unsafe fn new(raw: *mut std::ffi::c_void) -> Self {
        Self {
            raw,
            _lifetime: std::marker::PhantomData,
        }
    }

    /// The underlying message object pointer.
    pub fn as_ptr(&self) -> *mut std::ffi::c_void {
        self.raw
    }
}
