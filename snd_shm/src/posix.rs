//! POSIX shared-memory segment creation and mapping.
//!
//! A segment is created with `memfd_create` (anonymous, sealable, does not
//! need `/dev/shm` bookkeeping) and `mmap`'d into the creating process. The
//! underlying fd is what gets sent across the control socket as ancillary
//! data so the client can map the same pages.

use std::{
    num::NonZeroUsize,
    os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd},
    ptr::NonNull,
};

use nix::{
    sys::{
        memfd::{MFdFlags, memfd_create},
        mman::{MapFlags, ProtFlags, mmap, munmap},
    },
    unistd::ftruncate,
};

use crate::error::{Result, ShmError};

/// A single `memfd`-backed, `mmap`'d region.
pub struct ShmSegment {
    fd: OwnedFd,
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapped region is only ever accessed through the atomics /
// explicit synchronization built on top in `ring.rs`; the segment itself is
// just bytes plus an owned fd, both `Send`.
unsafe impl Send for ShmSegment {}
unsafe impl Sync for ShmSegment {}

impl ShmSegment {
    /// Create a new anonymous shared-memory segment of exactly `len` bytes
    /// and map it read-write into this process.
    pub fn create(name: &str, len: usize) -> Result<Self> {
        let len = len.max(1);
        let fd = memfd_create(name, MFdFlags::MFD_CLOEXEC).map_err(|_| ShmError::Alloc)?;
        ftruncate(&fd, len as i64).map_err(|_| ShmError::Alloc)?;
        let ptr = map_fd(fd.as_fd(), len)?;
        Ok(Self { fd, ptr, len })
    }

    /// Map an existing fd (received from the server over the control
    /// socket) into this process. Used on the client side.
    pub fn from_fd(fd: OwnedFd, len: usize) -> Result<Self> {
        let ptr = map_fd(fd.as_fd(), len)?;
        Ok(Self { fd, ptr, len })
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Duplicate the underlying fd so it can be handed to `sendmsg` as
    /// `SCM_RIGHTS` ancillary data without losing the mapping.
    pub fn try_clone_fd(&self) -> Result<OwnedFd> {
        self.fd.try_clone().map_err(|_| ShmError::Alloc)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

fn map_fd(fd: BorrowedFd<'_>, len: usize) -> Result<NonNull<u8>> {
    let len = NonZeroUsize::new(len).ok_or(ShmError::Alloc)?;
    // SAFETY: `fd` refers to a valid, sized shared-memory object for the
    // lifetime of this call; the mapping is dropped via `munmap` in `Drop`.
    let ptr = unsafe { mmap(None, len, ProtFlags::PROT_READ | ProtFlags::PROT_WRITE, MapFlags::MAP_SHARED, fd, 0) }
        .map_err(|_| ShmError::Alloc)?;
    Ok(ptr.cast())
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        if let Some(len) = NonZeroUsize::new(self.len) {
            // SAFETY: `ptr` was returned by a matching `mmap` of `len` bytes
            // and is not used again after this call.
            unsafe {
                let _ = munmap(self.ptr.cast(), len.get());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_map_round_trips_bytes() {
        let seg = ShmSegment::create("snd_shm_test", 4096).unwrap();
        assert_eq!(seg.len(), 4096);
        unsafe {
            *seg.as_ptr() = 0xAB;
            assert_eq!(*seg.as_ptr(), 0xAB);
        }
    }

    #[test]
    fn fd_can_be_cloned_without_unmapping() {
        let seg = ShmSegment::create("snd_shm_test_clone", 64).unwrap();
        let dup = seg.try_clone_fd().unwrap();
        assert!(dup.as_raw_fd() >= 0);
    }
}
