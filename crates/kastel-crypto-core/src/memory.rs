//! Secure containers for key material and decrypted content.
//!
//! Everything secret in the engine flows through one of three types:
//! - [`SecretBytes<N>`] — fixed-size keys and seeds
//! - [`SecretBuffer`] — variable-length buffers (decrypted payloads)
//! - [`SecretString`] — textual secrets (entry passwords)
//!
//! All three zero their backing storage when dropped and mask their
//! `Debug`/`Display` output. Fixed and variable buffers additionally
//! `mlock` their pages on Unix, best-effort: a failed lock is logged
//! once and the buffer still works.

use crate::error::CryptoError;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretSlice};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

// ---------------------------------------------------------------------------
// Page locking
// ---------------------------------------------------------------------------

/// RAII guard over an `mlock`ed region; `munlock`s on drop.
///
/// Locking is best-effort. The guard never fails construction: if the
/// kernel refuses the lock (quota, privileges), the region simply stays
/// unlocked and a single warning is emitted for the whole process.
pub(crate) struct PageLock {
    ptr: *const u8,
    len: usize,
    locked: bool,
}

// SAFETY: the pointer is only handed to mlock/munlock; the pointee is
// owned and accessed exclusively by the surrounding secret container.
unsafe impl Send for PageLock {}
unsafe impl Sync for PageLock {}

impl PageLock {
    pub(crate) fn acquire(ptr: *const u8, len: usize) -> Self {
        let locked = sys::lock(ptr, len);
        if !locked && len > 0 {
            static WARNED: std::sync::Once = std::sync::Once::new();
            WARNED.call_once(|| {
                log::warn!(
                    "mlock failed; secret pages may be swapped to disk \
                     (consider raising RLIMIT_MEMLOCK)"
                );
            });
        }
        Self { ptr, len, locked }
    }

    const fn unlocked() -> Self {
        Self {
            ptr: std::ptr::null(),
            len: 0,
            locked: false,
        }
    }
}

impl Drop for PageLock {
    fn drop(&mut self) {
        if self.locked {
            sys::unlock(self.ptr, self.len);
        }
    }
}

// ---------------------------------------------------------------------------
// SecretBytes<N>
// ---------------------------------------------------------------------------

/// Fixed-size secret: keys, seeds, transform output.
///
/// The bytes are zeroed on drop. There is intentionally no `Clone`:
/// duplicating key material must be an explicit, visible act.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes<const N: usize> {
    bytes: [u8; N],
    #[zeroize(skip)]
    lock: PageLock,
}

impl<const N: usize> SecretBytes<N> {
    /// Take ownership of a key array. The caller's copy is moved, not
    /// duplicated.
    ///
    /// The page lock is taken at the array's current address. Moving the
    /// value afterwards leaves a stale (harmless) lock; `munlock` on a
    /// stale address is a no-op and zeroization does not depend on it.
    #[must_use]
    pub fn new(bytes: [u8; N]) -> Self {
        let mut secret = Self {
            bytes,
            lock: PageLock::unlocked(),
        };
        secret.lock = PageLock::acquire(secret.bytes.as_ptr(), N);
        secret
    }

    /// Fill a fresh secret from the system CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Rng`] if the entropy source fails.
    pub fn random() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; N];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| CryptoError::Rng(format!("CSPRNG fill failed: {e}")))?;
        Ok(Self::new(bytes))
    }

    /// Expose the raw bytes for a cryptographic operation. Keep the
    /// borrow short-lived.
    #[must_use]
    pub const fn expose(&self) -> &[u8; N] {
        &self.bytes
    }
}

impl<const N: usize> From<[u8; N]> for SecretBytes<N> {
    fn from(bytes: [u8; N]) -> Self {
        Self::new(bytes)
    }
}

impl<const N: usize> fmt::Debug for SecretBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes<{N}>(***)")
    }
}

impl<const N: usize> fmt::Display for SecretBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes<{N}>(***)")
    }
}

// ---------------------------------------------------------------------------
// SecretBuffer
// ---------------------------------------------------------------------------

/// Variable-length secret buffer, used for decrypted payloads.
///
/// Wraps [`SecretSlice<u8>`] (zeroized on drop by `secrecy`) and locks
/// the allocation's pages while alive.
pub struct SecretBuffer {
    inner: SecretSlice<u8>,
    _lock: PageLock,
}

impl SecretBuffer {
    /// Copy `data` into a fresh locked allocation. The caller should
    /// zeroize its source copy afterwards.
    #[must_use]
    pub fn new(data: &[u8]) -> Self {
        let inner: SecretSlice<u8> = data.to_vec().into();
        let exposed = inner.expose_secret();
        let lock = PageLock::acquire(exposed.as_ptr(), exposed.len());
        Self { inner, _lock: lock }
    }

    /// Expose the underlying bytes. Keep the borrow short-lived.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        self.inner.expose_secret()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.expose_secret().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SecretBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretBuffer(***)")
    }
}

impl fmt::Display for SecretBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretBuffer(***)")
    }
}

// ---------------------------------------------------------------------------
// SecretString
// ---------------------------------------------------------------------------

/// A textual secret, zeroed on drop.
///
/// Entry passwords live here. No page locking: these values are small,
/// frequently reallocated by edits, and the zeroize-on-drop guarantee is
/// the property the format actually requires.
#[derive(Default, Zeroize, ZeroizeOnDrop)]
pub struct SecretString {
    inner: String,
}

impl SecretString {
    #[must_use]
    pub fn new(value: String) -> Self {
        Self { inner: value }
    }

    /// Expose the cleartext. Keep the borrow short-lived.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.inner
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value.to_owned())
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

// ---------------------------------------------------------------------------
// Platform shims
// ---------------------------------------------------------------------------

#[cfg(unix)]
mod sys {
    pub(super) fn lock(ptr: *const u8, len: usize) -> bool {
        if len == 0 {
            return true;
        }
        // SAFETY: mlock accepts any valid pointer/length pair; failure is
        // reported through the return code and handled by the caller.
        unsafe { libc::mlock(ptr.cast(), len) == 0 }
    }

    pub(super) fn unlock(ptr: *const u8, len: usize) {
        if len == 0 {
            return;
        }
        // SAFETY: munlock failure is non-critical.
        unsafe {
            libc::munlock(ptr.cast(), len);
        }
    }
}

#[cfg(not(unix))]
mod sys {
    pub(super) fn lock(_ptr: *const u8, _len: usize) -> bool {
        false
    }

    pub(super) fn unlock(_ptr: *const u8, _len: usize) {}
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
