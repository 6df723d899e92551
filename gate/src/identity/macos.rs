//! Code-signing identity resolution on macOS.
//!
//! Identity comes from the Security framework. From macOS 12 the kernel
//! attaches signing information to every XPC message, and
//! `SecCodeCreateWithXPCMessage` derives a code object from it directly; on
//! older systems the only per-connection proof is the audit token, reached
//! through a private libxpc accessor that must be resolved by name.

use std::ffi::c_void;
use std::mem;
use std::ptr;

use anyhow::{anyhow, Result};
use peergate_common::{AuditToken, Envelope, MessageCredential, Peer, RawXpcMessage};

use super::IdentityResolver;
use crate::symbol::LazySymbol;

// Core Foundation / Security plumbing. Only the handful of declarations the
// resolver needs; kept private to this module.
type CFTypeRef = *const c_void;
type CFAllocatorRef = *const c_void;
type CFStringRef = *const c_void;
type CFDataRef = *const c_void;
type CFDictionaryRef = *const c_void;
type CFIndex = isize;
type Boolean = u8;
type OsStatus = i32;
type SecCsFlags = u32;
type SecCodeRef = *mut c_void;
type SecRequirementRef = *mut c_void;

type XpcConnection = *mut c_void;
type XpcObject = *mut c_void;

const ERR_SEC_SUCCESS: OsStatus = 0;
const SEC_CS_DEFAULT_FLAGS: SecCsFlags = 0;
const CF_STRING_ENCODING_UTF8: u32 = 0x0800_0100;

#[repr(C)]
struct CFDictionaryKeyCallBacks {
    version: CFIndex,
    retain: *const c_void,
    release: *const c_void,
    copy_description: *const c_void,
    equal: *const c_void,
    hash: *const c_void,
}

#[repr(C)]
struct CFDictionaryValueCallBacks {
    version: CFIndex,
    retain: *const c_void,
    release: *const c_void,
    copy_description: *const c_void,
    equal: *const c_void,
}

#[link(name = "CoreFoundation", kind = "framework")]
extern "C" {
    static kCFAllocatorDefault: CFAllocatorRef;
    static kCFTypeDictionaryKeyCallBacks: CFDictionaryKeyCallBacks;
    static kCFTypeDictionaryValueCallBacks: CFDictionaryValueCallBacks;

    fn CFStringCreateWithBytes(
        alloc: CFAllocatorRef,
        bytes: *const u8,
        num_bytes: CFIndex,
        encoding: u32,
        is_external_representation: Boolean,
    ) -> CFStringRef;
    fn CFDataCreate(alloc: CFAllocatorRef, bytes: *const u8, length: CFIndex) -> CFDataRef;
    fn CFDictionaryCreate(
        alloc: CFAllocatorRef,
        keys: *const CFTypeRef,
        values: *const CFTypeRef,
        num_values: CFIndex,
        key_callbacks: *const CFDictionaryKeyCallBacks,
        value_callbacks: *const CFDictionaryValueCallBacks,
    ) -> CFDictionaryRef;
    fn CFRelease(cf: CFTypeRef);
}

#[link(name = "Security", kind = "framework")]
extern "C" {
    static kSecGuestAttributeAudit: CFStringRef;

    fn SecCodeCopyGuestWithAttributes(
        host: SecCodeRef,
        attributes: CFDictionaryRef,
        flags: SecCsFlags,
        guest: *mut SecCodeRef,
    ) -> OsStatus;
    fn SecCodeCheckValidity(
        code: SecCodeRef,
        flags: SecCsFlags,
        requirement: SecRequirementRef,
    ) -> OsStatus;
    fn SecRequirementCreateWithString(
        requirement_text: CFStringRef,
        flags: SecCsFlags,
        requirement: *mut SecRequirementRef,
    ) -> OsStatus;
}

extern "C" {
    fn xpc_connection_get_pid(connection: XpcConnection) -> libc::pid_t;
}

/// Private per-connection audit token accessor; the only identity source
/// before macOS 12. Absence means the deployment target is unsupported.
static XPC_CONNECTION_GET_AUDIT_TOKEN: LazySymbol =
    LazySymbol::new(c"xpc_connection_get_audit_token");

/// Capability gate for the documented message-identity API (macOS 12+).
static SEC_CODE_CREATE_WITH_XPC_MESSAGE: LazySymbol =
    LazySymbol::new(c"SecCodeCreateWithXPCMessage");

type XpcConnectionGetAuditTokenFn = unsafe extern "C" fn(XpcConnection, *mut u32);
type SecCodeCreateWithXpcMessageFn =
    unsafe extern "C" fn(XpcObject, SecCsFlags, *mut SecCodeRef) -> OsStatus;

/// Borrowed XPC connection handle.
pub struct XpcPeer {
    raw: XpcConnection,
}

impl XpcPeer {
    /// Wraps a live XPC connection.
    ///
    /// # Safety
    /// `raw` must be a valid `xpc_connection_t` that outlives the wrapper.
    pub unsafe fn from_raw(raw: *mut c_void) -> Self {
        Self { raw }
    }
}

impl Peer for XpcPeer {
    fn pid(&self) -> Result<u32> {
        // SAFETY: the connection handle is valid per `from_raw`'s contract.
        let pid = unsafe { xpc_connection_get_pid(self.raw) };
        Ok(pid as u32)
    }

    fn audit_token(&self) -> Result<AuditToken> {
        let address = XPC_CONNECTION_GET_AUDIT_TOKEN.address();
        // SAFETY: transmuting a resolved symbol address to the accessor's
        // known signature; the output buffer is the 8-field token structure
        // the accessor fills.
        let fetch: XpcConnectionGetAuditTokenFn = unsafe { mem::transmute(address.get()) };
        let mut fields = [0u32; 8];
        // SAFETY: the connection handle is valid and the buffer matches the
        // token layout.
        unsafe { fetch(self.raw, fields.as_mut_ptr()) };
        Ok(AuditToken::new(fields))
    }
}

/// Borrowed received XPC message.
pub struct XpcEnvelope<'a> {
    raw: RawXpcMessage<'a>,
}

impl XpcEnvelope<'_> {
    /// Wraps a received XPC message object.
    ///
    /// # Safety
    /// `raw` must be a valid `xpc_object_t` for a received message that
    /// outlives the wrapper.
    pub unsafe fn from_raw(raw: *mut c_void) -> Self {
        Self {
            raw: RawXpcMessage::new(raw),
        }
    }
}

impl Envelope for XpcEnvelope<'_> {
    fn credential(&self) -> Option<MessageCredential<'_>> {
        Some(MessageCredential::Xpc(self.raw))
    }
}

/// Retained reference to the verified code identity of a running process.
pub struct SignedCode(SecCodeRef);

impl Drop for SignedCode {
    fn drop(&mut self) {
        // SAFETY: the wrapped reference is owned and retained.
        unsafe { CFRelease(self.0 as CFTypeRef) };
    }
}

/// A compiled code-signing requirement, e.g.
/// `anchor apple generic and certificate leaf[subject.OU] = "TEAMID"`.
pub struct CodeRequirement(SecRequirementRef);

impl CodeRequirement {
    /// Compiles requirement source text.
    pub fn parse(text: &str) -> Result<Self> {
        let text_ref = cf_string(text)?;
        let mut requirement: SecRequirementRef = ptr::null_mut();
        // SAFETY: the string reference is valid and the out-pointer is a
        // valid stack slot.
        let status = unsafe {
            SecRequirementCreateWithString(text_ref, SEC_CS_DEFAULT_FLAGS, &mut requirement)
        };
        // SAFETY: releasing the string created above.
        unsafe { CFRelease(text_ref) };

        if status != ERR_SEC_SUCCESS || requirement.is_null() {
            return Err(anyhow!(
                "invalid code requirement {text:?} (OSStatus {status})"
            ));
        }
        Ok(Self(requirement))
    }
}

impl Drop for CodeRequirement {
    fn drop(&mut self) {
        // SAFETY: the wrapped reference is owned and retained.
        unsafe { CFRelease(self.0 as CFTypeRef) };
    }
}

// SAFETY: SecRequirement objects are immutable once created and may be used
// from any thread.
unsafe impl Send for CodeRequirement {}
// SAFETY: see above.
unsafe impl Sync for CodeRequirement {}

/// Code-identity resolver backed by the Security framework.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformResolver;

impl IdentityResolver for PlatformResolver {
    type Identity = SignedCode;
    type Requirement = CodeRequirement;

    fn resolve(&self, peer: &dyn Peer, message: &dyn Envelope) -> Option<SignedCode> {
        if let Some(MessageCredential::Xpc(raw_message)) = message.credential() {
            if let Some(code) = code_from_message(raw_message.as_ptr()) {
                return Some(code);
            }
        }

        let token = match peer.audit_token() {
            Ok(token) => token,
            Err(e) => {
                tracing::debug!("no audit token for peer: {e:#}");
                return None;
            }
        };
        code_from_audit_token(&token)
    }

    fn satisfies(&self, identity: &SignedCode, requirement: &CodeRequirement) -> bool {
        // SAFETY: both references are valid retained Security objects.
        let status =
            unsafe { SecCodeCheckValidity(identity.0, SEC_CS_DEFAULT_FLAGS, requirement.0) };
        status == ERR_SEC_SUCCESS
    }
}

/// Documented path: derive the code object straight from the message's
/// kernel-attached signing information.
fn code_from_message(message: XpcObject) -> Option<SignedCode> {
    let address = SEC_CODE_CREATE_WITH_XPC_MESSAGE.try_address()?;
    // SAFETY: transmuting a resolved symbol address to the signature
    // published in the macOS 12 SDK.
    let create: SecCodeCreateWithXpcMessageFn = unsafe { mem::transmute(address.get()) };

    let mut code: SecCodeRef = ptr::null_mut();
    // SAFETY: the message object is a live received message.
    let status = unsafe { create(message, SEC_CS_DEFAULT_FLAGS, &mut code) };
    if status != ERR_SEC_SUCCESS || code.is_null() {
        tracing::debug!("SecCodeCreateWithXPCMessage failed (OSStatus {status})");
        return None;
    }
    Some(SignedCode(code))
}

/// Legacy path: pack the audit token and ask the Security framework for the
/// guest it denotes.
fn code_from_audit_token(token: &AuditToken) -> Option<SignedCode> {
    let packed = token.to_bytes();

    // SAFETY: every created CF object is checked and released on all paths;
    // the packed token buffer outlives CFDataCreate, which copies it.
    unsafe {
        let data = CFDataCreate(kCFAllocatorDefault, packed.as_ptr(), packed.len() as CFIndex);
        if data.is_null() {
            return None;
        }

        let keys = [kSecGuestAttributeAudit as CFTypeRef];
        let values = [data as CFTypeRef];
        let attributes = CFDictionaryCreate(
            kCFAllocatorDefault,
            keys.as_ptr(),
            values.as_ptr(),
            1,
            &kCFTypeDictionaryKeyCallBacks,
            &kCFTypeDictionaryValueCallBacks,
        );
        CFRelease(data as CFTypeRef);
        if attributes.is_null() {
            return None;
        }

        let mut code: SecCodeRef = ptr::null_mut();
        let status = SecCodeCopyGuestWithAttributes(
            ptr::null_mut(),
            attributes,
            SEC_CS_DEFAULT_FLAGS,
            &mut code,
        );
        CFRelease(attributes as CFTypeRef);

        if status != ERR_SEC_SUCCESS || code.is_null() {
            tracing::debug!("SecCodeCopyGuestWithAttributes failed (OSStatus {status})");
            return None;
        }
        Some(SignedCode(code))
    }
}

fn cf_string(text: &str) -> Result<CFStringRef> {
    // SAFETY: the byte pointer and length describe a valid UTF-8 buffer for
    // the duration of the call.
    let string = unsafe {
        CFStringCreateWithBytes(
            kCFAllocatorDefault,
            text.as_ptr(),
            text.len() as CFIndex,
            CF_STRING_ENCODING_UTF8,
            0,
        )
    };
    if string.is_null() {
        return Err(anyhow!("failed to create CFString from requirement text"));
    }
    Ok(string)
}
