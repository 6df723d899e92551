//! Digest-based code identity for platforms without code-signing
//! infrastructure.
//!
//! The peer's on-disk binary is located from its process ID and hashed;
//! requirements are allowed SHA-256 digests. The hash is taken from the
//! current on-disk image, so a binary replaced after the peer launched
//! resolves to the new image's digest.

use std::path::{Path, PathBuf};
use std::{env, fs};

use anyhow::{Context, Result};
use peergate_common::{Envelope, Peer};
use sha2::{Digest, Sha256};

use super::IdentityResolver;

const HASHES_ENV: &str = "PEERGATE_PEER_BINARY_HASHES";
const HASH_ENV: &str = "PEERGATE_PEER_BINARY_HASH";

/// Verified on-disk identity of a running peer: where its executable lives
/// and what it hashes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryIdentity {
    path: PathBuf,
    digest: String,
}

impl BinaryIdentity {
    /// Path of the peer's executable image.
    pub fn executable(&self) -> &Path {
        &self.path
    }

    /// Lowercase hex SHA-256 digest of the executable image.
    pub fn digest_hex(&self) -> &str {
        &self.digest
    }
}

/// An allowed peer binary, identified by the SHA-256 digest of its
/// executable image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeRequirement {
    digest: String,
}

/// Error building a code requirement.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RequirementError {
    #[error("'{0}' is not a hex-encoded SHA-256 digest")]
    MalformedDigest(String),
    #[error("no allowed peer binary digests configured ({HASHES_ENV} / {HASH_ENV})")]
    NoneConfigured,
}

impl CodeRequirement {
    /// A requirement from a hex-encoded SHA-256 digest. Case-insensitive;
    /// surrounding whitespace is ignored.
    pub fn sha256_hex(digest: impl AsRef<str>) -> Result<Self, RequirementError> {
        let digest = digest.as_ref().trim().to_ascii_lowercase();
        if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(RequirementError::MalformedDigest(digest));
        }
        Ok(Self { digest })
    }

    /// A requirement matching the binary currently at `path`.
    pub fn sha256_of(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let binary = fs::read(path)
            .with_context(|| format!("failed to read binary {}", path.display()))?;
        Ok(Self {
            digest: hex::encode(Sha256::digest(&binary)),
        })
    }

    /// Loads the allowed-digest list from the environment.
    ///
    /// Reads `PEERGATE_PEER_BINARY_HASHES` (comma-separated digests) first
    /// and falls back to the single-value `PEERGATE_PEER_BINARY_HASH`.
    pub fn allowed_from_env() -> Result<Vec<Self>, RequirementError> {
        if let Ok(list) = env::var(HASHES_ENV) {
            let requirements = list
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(Self::sha256_hex)
                .collect::<Result<Vec<_>, _>>()?;
            if !requirements.is_empty() {
                return Ok(requirements);
            }
        }

        if let Ok(single) = env::var(HASH_ENV) {
            if !single.trim().is_empty() {
                return Ok(vec![Self::sha256_hex(single)?]);
            }
        }

        Err(RequirementError::NoneConfigured)
    }

    /// The digest this requirement accepts, lowercase hex.
    pub fn digest_hex(&self) -> &str {
        &self.digest
    }
}

/// Code-identity resolver backed by on-disk binary digests.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformResolver;

impl IdentityResolver for PlatformResolver {
    type Identity = BinaryIdentity;
    type Requirement = CodeRequirement;

    fn resolve(&self, peer: &dyn Peer, _message: &dyn Envelope) -> Option<BinaryIdentity> {
        // No transport on these platforms attaches a per-message credential;
        // identity always comes from the peer's executable image.
        let pid = match peer.pid() {
            Ok(pid) => pid,
            Err(e) => {
                tracing::debug!("peer PID unavailable: {e:#}");
                return None;
            }
        };

        let path = match executable_path(pid) {
            Ok(path) => path,
            Err(e) => {
                tracing::debug!("no executable path for peer {pid}: {e:#}");
                return None;
            }
        };

        let binary = match fs::read(&path) {
            Ok(binary) => binary,
            Err(e) => {
                tracing::debug!("failed to read peer binary {}: {e}", path.display());
                return None;
            }
        };

        let digest = hex::encode(Sha256::digest(&binary));
        tracing::debug!("resolved peer {pid} to {} ({digest})", path.display());
        Some(BinaryIdentity { path, digest })
    }

    fn satisfies(&self, identity: &BinaryIdentity, requirement: &CodeRequirement) -> bool {
        requirement.digest == identity.digest
    }
}

/// Executable path for a process ID.
#[cfg(target_os = "linux")]
fn executable_path(pid: u32) -> Result<PathBuf> {
    fs::read_link(format!("/proc/{pid}/exe")).context("failed to read process executable path")
}

#[cfg(all(unix, not(target_os = "linux")))]
fn executable_path(pid: u32) -> Result<PathBuf> {
    use anyhow::anyhow;

    // Other Unix systems - try /proc first, then give up
    fs::read_link(format!("/proc/{pid}/exe")).map_err(|_| {
        anyhow!(
            "unable to determine the executable path for PID {pid} on this Unix system. \
             Supported systems: Linux (/proc/*/exe), Windows (QueryFullProcessImageNameW)."
        )
    })
}

#[cfg(windows)]
fn executable_path(pid: u32) -> Result<PathBuf> {
    use std::{ffi::OsString, os::windows::ffi::OsStringExt};

    use anyhow::anyhow;

    // SAFETY: Windows API calls are safe when used with proper error handling:
    // - OpenProcess: Safe with valid PID and access rights
    // - QueryFullProcessImageNameW: Safe with valid handle and buffer
    // - CloseHandle: Safe with valid handle, ensures resource cleanup
    unsafe {
        use windows::Win32::{
            Foundation::CloseHandle,
            System::Threading::{
                OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
                PROCESS_QUERY_INFORMATION,
            },
        };

        let handle = OpenProcess(PROCESS_QUERY_INFORMATION, false, pid)?;

        let mut buffer = vec![0u16; 1024];
        let mut size = buffer.len() as u32;

        let result = QueryFullProcessImageNameW(
            handle,
            PROCESS_NAME_WIN32,
            windows::core::PWSTR(buffer.as_mut_ptr()),
            &mut size,
        );

        let _ = CloseHandle(handle);

        match result {
            Ok(_) => {
                buffer.truncate(size as usize);
                let path = OsString::from_wide(&buffer);
                tracing::debug!("Windows process path for PID {}: {:?}", pid, path);
                Ok(path.into())
            }
            Err(e) => Err(anyhow!(
                "failed to get process image name for PID {pid}: {e}"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use peergate_common::AuditToken;

    use super::*;

    struct FakePeer {
        pid: u32,
    }

    impl Peer for FakePeer {
        fn pid(&self) -> Result<u32> {
            Ok(self.pid)
        }

        fn audit_token(&self) -> Result<AuditToken> {
            Err(anyhow!("no audit token"))
        }
    }

    struct PlainEnvelope;

    impl Envelope for PlainEnvelope {}

    #[test]
    fn digest_requirement_accepts_valid_hex() {
        let hex64 = "a".repeat(64);
        let requirement = CodeRequirement::sha256_hex(&hex64).unwrap();
        assert_eq!(requirement.digest_hex(), hex64);
    }

    #[test]
    fn digest_requirement_normalizes_case_and_whitespace() {
        let requirement = CodeRequirement::sha256_hex(format!(" {} ", "AB".repeat(32))).unwrap();
        assert_eq!(requirement.digest_hex(), "ab".repeat(32));
    }

    #[test]
    fn digest_requirement_rejects_malformed_input() {
        assert!(CodeRequirement::sha256_hex("").is_err());
        assert!(CodeRequirement::sha256_hex("abc123").is_err());
        assert!(CodeRequirement::sha256_hex("g".repeat(64)).is_err());
        assert!(CodeRequirement::sha256_hex("a".repeat(63)).is_err());
    }

    // Env mutation is process-global; exercise every branch in one test to
    // keep it race-free under the parallel test runner.
    #[test]
    fn requirements_load_from_env() {
        let digest_a = "1".repeat(64);
        let digest_b = "2".repeat(64);

        env::remove_var(HASHES_ENV);
        env::remove_var(HASH_ENV);
        assert_eq!(
            CodeRequirement::allowed_from_env(),
            Err(RequirementError::NoneConfigured)
        );

        env::set_var(HASH_ENV, &digest_a);
        assert_eq!(
            CodeRequirement::allowed_from_env().unwrap(),
            vec![CodeRequirement::sha256_hex(&digest_a).unwrap()]
        );

        env::set_var(HASHES_ENV, format!("{digest_a}, {digest_b},"));
        assert_eq!(
            CodeRequirement::allowed_from_env().unwrap(),
            vec![
                CodeRequirement::sha256_hex(&digest_a).unwrap(),
                CodeRequirement::sha256_hex(&digest_b).unwrap(),
            ]
        );

        env::set_var(HASHES_ENV, "not-a-digest");
        assert!(matches!(
            CodeRequirement::allowed_from_env(),
            Err(RequirementError::MalformedDigest(_))
        ));

        env::remove_var(HASHES_ENV);
        env::remove_var(HASH_ENV);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn resolves_own_process_to_current_exe() {
        let resolver = PlatformResolver;
        let identity = resolver
            .resolve(&FakePeer { pid: std::process::id() }, &PlainEnvelope)
            .expect("own process should resolve");

        let requirement = CodeRequirement::sha256_of(std::env::current_exe().unwrap()).unwrap();
        assert!(resolver.satisfies(&identity, &requirement));
    }

    #[test]
    fn nonexistent_process_does_not_resolve() {
        let resolver = PlatformResolver;
        // Far above any real pid_max.
        assert!(resolver
            .resolve(&FakePeer { pid: 999_999_999 }, &PlainEnvelope)
            .is_none());
    }

    #[test]
    fn mismatched_digest_is_not_satisfied() {
        let resolver = PlatformResolver;
        let identity = BinaryIdentity {
            path: PathBuf::from("/bin/echo"),
            digest: "a".repeat(64),
        };
        let requirement = CodeRequirement::sha256_hex("b".repeat(64)).unwrap();
        assert!(!resolver.satisfies(&identity, &requirement));
    }
}
