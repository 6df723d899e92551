//! Lazy resolution of dynamic symbols.
//!
//! Some platform identity primitives are private API, reachable only by
//! name through the dynamic linker. The installed OS cannot change under a
//! running process, so a symbol is looked up at most once per process and
//! the result is kept for the remainder of its lifetime.

use std::ffi::CStr;
use std::num::NonZeroUsize;
use std::sync::OnceLock;

/// A function address resolved by name through `dlsym`, at most once per
/// process.
///
/// Concurrent first calls are safe: exactly one lookup runs and every
/// caller observes the same result.
pub struct LazySymbol {
    name: &'static CStr,
    address: OnceLock<Option<NonZeroUsize>>,
}

impl LazySymbol {
    /// A symbol to be resolved on first use.
    pub const fn new(name: &'static CStr) -> Self {
        Self {
            name,
            address: OnceLock::new(),
        }
    }

    /// The symbol name as given to the dynamic linker.
    pub fn name(&self) -> &'static CStr {
        self.name
    }

    /// The resolved address, or `None` when the running OS does not export
    /// the symbol. Use for optional, capability-gating symbols.
    pub fn try_address(&self) -> Option<NonZeroUsize> {
        self.resolve_with(|| lookup(self.name))
    }

    /// The resolved address of a symbol this gate cannot operate without.
    ///
    /// A missing symbol means the deployment target violates a platform
    /// assumption, not that an attacker did anything. Continuing would
    /// silently disable the security boundary, so the process halts with a
    /// diagnostic instead.
    pub fn address(&self) -> NonZeroUsize {
        match self.try_address() {
            Some(address) => address,
            None => die_unsupported(self.name),
        }
    }

    fn resolve_with(
        &self,
        lookup: impl FnOnce() -> Option<NonZeroUsize>,
    ) -> Option<NonZeroUsize> {
        *self.address.get_or_init(lookup)
    }
}

fn lookup(name: &CStr) -> Option<NonZeroUsize> {
    // SAFETY: dlsym with RTLD_DEFAULT searches the global symbol scope; the
    // name pointer is a valid NUL-terminated string for the duration of the
    // call.
    let address = unsafe { libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr()) };
    NonZeroUsize::new(address as usize)
}

fn die_unsupported(name: &CStr) -> ! {
    let release = os_release();
    tracing::error!(
        "required symbol {:?} is not exported by this OS (release {}); this platform is not \
         supported",
        name,
        release
    );
    eprintln!(
        "peergate: required symbol {name:?} is not exported by this OS (release {release}); \
         this platform is not supported"
    );
    std::process::abort();
}

fn os_release() -> String {
    // SAFETY: uname fills the zero-initialized utsname struct it is handed;
    // the pointer is valid for the duration of the call.
    let mut info: libc::utsname = unsafe { std::mem::zeroed() };
    if unsafe { libc::uname(&mut info) } != 0 {
        return "unknown".to_string();
    }

    // SAFETY: the kernel NUL-terminates every utsname field.
    let release = unsafe { CStr::from_ptr(info.release.as_ptr()) };
    release.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;

    #[test]
    fn resolves_a_known_symbol() {
        static GETPID: LazySymbol = LazySymbol::new(c"getpid");
        let address = GETPID.address();
        assert_eq!(GETPID.try_address(), Some(address));
    }

    #[test]
    fn missing_symbol_resolves_to_none() {
        static MISSING: LazySymbol = LazySymbol::new(c"peergate_no_such_symbol");
        assert_eq!(MISSING.try_address(), None);
        // Memoized, not retried.
        assert_eq!(MISSING.try_address(), None);
    }

    #[test]
    fn concurrent_first_calls_resolve_exactly_once() {
        let resolutions = AtomicUsize::new(0);
        let symbol = LazySymbol::new(c"getpid");
        let expected = NonZeroUsize::new(0x1000);

        let addresses: Vec<_> = thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    scope.spawn(|| {
                        symbol.resolve_with(|| {
                            resolutions.fetch_add(1, Ordering::SeqCst);
                            expected
                        })
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(resolutions.load(Ordering::SeqCst), 1);
        assert!(addresses.iter().all(|address| *address == expected));
    }

    #[test]
    fn real_lookup_agrees_across_threads() {
        static GETUID: LazySymbol = LazySymbol::new(c"getuid");
        let addresses: Vec<_> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8).map(|_| scope.spawn(|| GETUID.address())).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(addresses.windows(2).all(|pair| pair[0] == pair[1]));
    }
}
