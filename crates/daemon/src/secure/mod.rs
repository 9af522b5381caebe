//! Guarded memory for session secrets
//!
//! Passphrases, token secrets, master keys, and unsealed private scalars live
//! in buffers allocated through the [`Guard`]. Buffers are pinned with
//! `mlock(2)` so they never reach swap, and are overwritten with zeros before
//! their pages are returned to the allocator. A failure to lock memory is
//! logged once and degrades to zeroize-only.
//!
//! Handles are affine: they can be borrowed (shared or mutable) but not
//! copied, and releasing one wipes it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use zeroize::Zeroize;

#[derive(Debug, thiserror::Error)]
pub enum SecureError {
    #[error("guarded buffers cannot be empty")]
    EmptyBuffer,
}

#[derive(Debug, Default)]
struct GuardInner {
    live: AtomicUsize,
    mlock_warned: AtomicBool,
}

/// Allocator for guarded buffers. Cheap to clone; all clones share one pool.
#[derive(Debug, Clone, Default)]
pub struct Guard {
    inner: Arc<GuardInner>,
}

impl Guard {
    pub fn new() -> Self {
        Guard::default()
    }

    /// Allocate a zeroed guarded buffer of `len` bytes.
    pub fn alloc(&self, len: usize) -> Result<SecretHandle, SecureError> {
        if len == 0 {
            return Err(SecureError::EmptyBuffer);
        }

        let data = vec![0u8; len].into_boxed_slice();
        let locked = lock_pages(&data);
        if !locked && !self.inner.mlock_warned.swap(true, Ordering::Relaxed) {
            tracing::warn!("mlock unavailable; secrets are zeroized but may reach swap");
        }

        self.inner.live.fetch_add(1, Ordering::Relaxed);
        Ok(SecretHandle {
            data,
            locked,
            pool: self.inner.clone(),
        })
    }

    /// Move `bytes` into a guarded buffer, zeroizing the source.
    pub fn import(&self, bytes: &mut [u8]) -> Result<SecretHandle, SecureError> {
        let mut handle = self.alloc(bytes.len())?;
        handle.borrow_mut().copy_from_slice(bytes);
        bytes.zeroize();
        Ok(handle)
    }

    /// Number of guarded buffers currently alive.
    pub fn live(&self) -> usize {
        self.inner.live.load(Ordering::Relaxed)
    }

    /// Called at daemon shutdown. Outstanding handles wipe themselves on
    /// drop; this only reports any that are still held.
    pub fn drain(&self) {
        let live = self.live();
        if live > 0 {
            tracing::warn!(live, "guarded buffers still alive at shutdown");
        }
    }
}

/// An owned, guarded byte buffer
pub struct SecretHandle {
    data: Box<[u8]>,
    locked: bool,
    pool: Arc<GuardInner>,
}

impl SecretHandle {
    pub fn borrow(&self) -> &[u8] {
        &self.data
    }

    pub fn borrow_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn wipe(&mut self) {
        self.data.zeroize();
        if self.locked {
            unlock_pages(&self.data);
            self.locked = false;
        }
    }
}

impl Drop for SecretHandle {
    fn drop(&mut self) {
        self.wipe();
        self.pool.live.fetch_sub(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for SecretHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretHandle({} bytes)", self.data.len())
    }
}

fn lock_pages(data: &[u8]) -> bool {
    // SAFETY: the pointer and length describe a live heap allocation that
    // outlives the lock; mlock does not alias or mutate the memory.
    unsafe { libc::mlock(data.as_ptr() as *const libc::c_void, data.len()) == 0 }
}

fn unlock_pages(data: &[u8]) {
    // SAFETY: only called on a range previously passed to mlock.
    unsafe {
        libc::munlock(data.as_ptr() as *const libc::c_void, data.len());
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_alloc_is_zeroed() {
        let guard = Guard::new();
        let handle = guard.alloc(32).unwrap();
        assert_eq!(handle.borrow(), &[0u8; 32]);
    }

    #[test]
    fn test_import_zeroizes_source() {
        let guard = Guard::new();
        let mut secret = b"correct horse battery staple".to_vec();
        let handle = guard.import(&mut secret).unwrap();

        assert_eq!(handle.borrow(), b"correct horse battery staple");
        assert!(secret.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_wipe_overwrites_buffer() {
        let guard = Guard::new();
        let mut handle = guard.alloc(16).unwrap();
        handle.borrow_mut().copy_from_slice(&[0xAA; 16]);

        handle.wipe();
        assert_eq!(handle.borrow(), &[0u8; 16]);
    }

    #[test]
    fn test_live_count_tracks_handles() {
        let guard = Guard::new();
        assert_eq!(guard.live(), 0);

        let a = guard.alloc(8).unwrap();
        let b = guard.alloc(8).unwrap();
        assert_eq!(guard.live(), 2);

        drop(a);
        assert_eq!(guard.live(), 1);
        drop(b);
        assert_eq!(guard.live(), 0);
    }

    #[test]
    fn test_empty_alloc_rejected() {
        let guard = Guard::new();
        assert!(matches!(guard.alloc(0), Err(SecureError::EmptyBuffer)));
    }
}
