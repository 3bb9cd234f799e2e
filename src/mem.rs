//! Allocator indirection.
//!
//! Every heap request the decoder makes goes through a caller-supplied
//! [`Allocator`]. [`ByteVec`] is the single owner type for those
//! allocations; its `Drop` impl guarantees that partial buffers are
//! returned to the allocator on every failure path. Unsafe code is
//! confined to this module.

use core::ptr::NonNull;
use core::slice;

use crate::error::DecodeError;

/// Caller-supplied allocation entry points.
///
/// `allocate` and `reallocate` return `None` to signal out-of-memory; the
/// decode in progress then unwinds, releasing everything it has allocated
/// so far, and reports [`DecodeError::OutOfMemory`].
///
/// Contract for implementors:
/// - a returned pointer must be valid for `size` bytes (alignment 1) until
///   passed to `release` or `reallocate`;
/// - `reallocate` preserves the first `min(old_size, new_size)` bytes;
/// - `release(None, _)` must be accepted silently.
///
/// The engine itself is single-threaded per decode; an allocator shared
/// across concurrent decodes must be safe for concurrent invocation.
pub trait Allocator {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>>;
    fn reallocate(&self, ptr: NonNull<u8>, old_size: usize, new_size: usize)
    -> Option<NonNull<u8>>;
    fn release(&self, ptr: Option<NonNull<u8>>, size: usize);
}

/// Adapter over the process global allocator. Used by
/// [`DecodeRequest::new`](crate::DecodeRequest::new) unless the caller
/// supplies an allocator of their own.
#[derive(Debug, Default, Clone, Copy)]
pub struct Global;

/// A shared `Global` with `'static` lifetime for default requests.
pub(crate) static GLOBAL: Global = Global;

impl Allocator for Global {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        debug_assert!(size > 0);
        let layout = core::alloc::Layout::from_size_align(size, 1).ok()?;
        // SAFETY: layout has non-zero size (callers never request 0).
        NonNull::new(unsafe { alloc::alloc::alloc(layout) })
    }

    fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        debug_assert!(old_size > 0 && new_size > 0);
        let layout = core::alloc::Layout::from_size_align(old_size, 1).ok()?;
        // SAFETY: `ptr` came from `allocate`/`reallocate` with `old_size`.
        NonNull::new(unsafe { alloc::alloc::realloc(ptr.as_ptr(), layout, new_size) })
    }

    fn release(&self, ptr: Option<NonNull<u8>>, size: usize) {
        if let Some(ptr) = ptr {
            let Ok(layout) = core::alloc::Layout::from_size_align(size, 1) else {
                return;
            };
            // SAFETY: `ptr` came from `allocate`/`reallocate` with `size`.
            unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) }
        }
    }
}

/// Growable byte buffer backed by a caller-supplied allocator.
///
/// The decoder's only owner of heap memory: scanline buffers, inflate
/// output, component planes, and the final pixel buffer are all `ByteVec`s.
pub struct ByteVec<'a> {
    ptr: NonNull<u8>,
    len: usize,
    cap: usize,
    alloc: &'a dyn Allocator,
}

impl<'a> ByteVec<'a> {
    pub(crate) fn new(alloc: &'a dyn Allocator) -> Self {
        ByteVec {
            ptr: NonNull::dangling(),
            len: 0,
            cap: 0,
            alloc,
        }
    }

    pub(crate) fn with_capacity(
        alloc: &'a dyn Allocator,
        cap: usize,
    ) -> Result<Self, DecodeError> {
        let mut v = ByteVec::new(alloc);
        if cap > 0 {
            v.ptr = alloc.allocate(cap).ok_or(DecodeError::OutOfMemory)?;
            v.cap = cap;
        }
        Ok(v)
    }

    /// Allocate a buffer of `len` zero bytes.
    pub(crate) fn zeroed(alloc: &'a dyn Allocator, len: usize) -> Result<Self, DecodeError> {
        let mut v = ByteVec::with_capacity(alloc, len)?;
        if len > 0 {
            // SAFETY: capacity is exactly `len` bytes.
            unsafe { core::ptr::write_bytes(v.ptr.as_ptr(), 0, len) };
        }
        v.len = len;
        Ok(v)
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        // SAFETY: the first `len` bytes are initialized.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: the first `len` bytes are initialized and owned.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    pub(crate) fn allocator(&self) -> &'a dyn Allocator {
        self.alloc
    }

    fn grow_to(&mut self, needed: usize) -> Result<(), DecodeError> {
        if needed <= self.cap {
            return Ok(());
        }
        let new_cap = needed.max(self.cap.saturating_mul(2)).max(64);
        let new_ptr = if self.cap == 0 {
            self.alloc.allocate(new_cap)
        } else {
            self.alloc.reallocate(self.ptr, self.cap, new_cap)
        }
        .ok_or(DecodeError::OutOfMemory)?;
        self.ptr = new_ptr;
        self.cap = new_cap;
        Ok(())
    }

    pub(crate) fn reserve(&mut self, additional: usize) -> Result<(), DecodeError> {
        let needed = self
            .len
            .checked_add(additional)
            .ok_or(DecodeError::LimitExceeded("buffer size overflows usize"))?;
        self.grow_to(needed)
    }

    pub(crate) fn push(&mut self, byte: u8) -> Result<(), DecodeError> {
        if self.len == self.cap {
            self.grow_to(self.len + 1)?;
        }
        // SAFETY: capacity > len after grow_to.
        unsafe { self.ptr.as_ptr().add(self.len).write(byte) };
        self.len += 1;
        Ok(())
    }

    pub(crate) fn extend_from_slice(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        self.reserve(bytes.len())?;
        // SAFETY: capacity >= len + bytes.len(); regions cannot overlap
        // because `bytes` borrows immutably while we own our buffer.
        unsafe {
            core::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.ptr.as_ptr().add(self.len),
                bytes.len(),
            )
        };
        self.len += bytes.len();
        Ok(())
    }

    /// Copy `len` bytes from `src_off` to the end of the buffer. The source
    /// range may overlap the written range byte-by-byte (LZ77 semantics:
    /// earlier copies feed later ones).
    pub(crate) fn copy_back_reference(
        &mut self,
        src_off: usize,
        len: usize,
    ) -> Result<(), DecodeError> {
        debug_assert!(src_off < self.len);
        self.reserve(len)?;
        for i in 0..len {
            // SAFETY: src_off + i < len + i <= cap; dst slot is in capacity.
            unsafe {
                let b = self.ptr.as_ptr().add(src_off + i).read();
                self.ptr.as_ptr().add(self.len + i).write(b);
            }
        }
        self.len += len;
        Ok(())
    }
}

impl Drop for ByteVec<'_> {
    fn drop(&mut self) {
        if self.cap > 0 {
            self.alloc.release(Some(self.ptr), self.cap);
        }
    }
}

impl PartialEq for ByteVec<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl core::fmt::Debug for ByteVec<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ByteVec")
            .field("len", &self.len)
            .field("cap", &self.cap)
            .finish()
    }
}
