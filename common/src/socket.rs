#[cfg(unix)]
use std::os::unix::net::UnixStream;
#[cfg(windows)]
use std::os::windows::io::{AsRawHandle, BorrowedHandle};

use anyhow::{anyhow, Result};
#[cfg(target_os = "linux")]
use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};
#[cfg(windows)]
use windows::Win32::Foundation::HANDLE;

use crate::{AuditToken, Peer};

/// Borrowed transport connection, one variant per platform channel type.
pub enum SocketPeer<'a> {
    #[cfg(unix)]
    /// Unix domain socket
    Unix(&'a UnixStream),
    #[cfg(windows)]
    /// Windows named pipe handle
    NamedPipe(BorrowedHandle<'a>),
}

impl Peer for SocketPeer<'_> {
    fn pid(&self) -> Result<u32> {
        match self {
            #[cfg(unix)]
            SocketPeer::Unix(stream) => {
                #[cfg(target_os = "linux")]
                {
                    let creds = getsockopt(*stream, PeerCredentials)
                        .map_err(|e| anyhow!("failed to get peer credentials: {e}"))?;
                    tracing::debug!("Linux socket peer PID: {}", creds.pid());
                    Ok(creds.pid() as u32)
                }

                #[cfg(target_os = "macos")]
                {
                    use std::os::unix::io::AsRawFd;

                    let mut pid: libc::pid_t = 0;
                    let mut pid_len = std::mem::size_of::<libc::pid_t>() as libc::socklen_t;

                    // SAFETY: getsockopt is safe when called with:
                    // - Valid file descriptor (stream.as_raw_fd())
                    // - Valid socket level and option (SOL_LOCAL, LOCAL_PEERPID)
                    // - Proper buffer pointer and size (pid is a valid stack variable,
                    //   pid_len matches)
                    let result = unsafe {
                        libc::getsockopt(
                            stream.as_raw_fd(),
                            libc::SOL_LOCAL,
                            libc::LOCAL_PEERPID,
                            &mut pid as *mut _ as *mut libc::c_void,
                            &mut pid_len,
                        )
                    };

                    if result != 0 {
                        return Err(anyhow!(
                            "failed to get peer PID: {}",
                            std::io::Error::last_os_error()
                        ));
                    }

                    tracing::debug!("macOS socket peer PID: {}", pid);
                    Ok(pid as u32)
                }

                #[cfg(all(unix, not(any(target_os = "linux", target_os = "macos"))))]
                {
                    let _ = stream;
                    Err(anyhow!(
                        "peer PID extraction is not supported on this Unix platform. Supported \
                         platforms: Linux (SO_PEERCRED), macOS (LOCAL_PEERPID)."
                    ))
                }
            }
            #[cfg(windows)]
            SocketPeer::NamedPipe(handle) => {
                use windows::Win32::System::Pipes::GetNamedPipeClientProcessId;

                let mut client_pid = 0u32;
                // SAFETY: GetNamedPipeClientProcessId is safe when called with a valid
                // pipe handle and a mutable reference to u32. The borrowed handle is
                // guaranteed live for the duration of the call.
                unsafe {
                    GetNamedPipeClientProcessId(
                        HANDLE(handle.as_raw_handle()),
                        &mut client_pid,
                    )
                }
                .map_err(|e| anyhow!("failed to get named pipe client process ID: {e}"))?;

                Ok(client_pid)
            }
        }
    }

    fn audit_token(&self) -> Result<AuditToken> {
        match self {
            #[cfg(target_os = "macos")]
            SocketPeer::Unix(stream) => {
                use std::os::unix::io::AsRawFd;

                // From sys/un.h; not exposed through the libc crate.
                const LOCAL_PEERTOKEN: libc::c_int = 0x006;

                let mut fields = [0u32; 8];
                let mut len = std::mem::size_of_val(&fields) as libc::socklen_t;

                // SAFETY: getsockopt fills at most `len` bytes of the output buffer;
                // the buffer is a valid stack array of exactly that size and the fd
                // is live for the duration of the call.
                let result = unsafe {
                    libc::getsockopt(
                        stream.as_raw_fd(),
                        libc::SOL_LOCAL,
                        LOCAL_PEERTOKEN,
                        fields.as_mut_ptr() as *mut libc::c_void,
                        &mut len,
                    )
                };

                if result != 0 {
                    return Err(anyhow!(
                        "failed to get peer audit token: {}",
                        std::io::Error::last_os_error()
                    ));
                }
                if len as usize != AuditToken::LEN {
                    return Err(anyhow!(
                        "peer audit token has unexpected size {} (expected {})",
                        len,
                        AuditToken::LEN
                    ));
                }

                Ok(AuditToken::new(fields))
            }
            #[cfg(not(target_os = "macos"))]
            _ => Err(anyhow!("audit tokens are not available on this platform")),
        }
    }
}
