//! Allocate-once storage.
//!
//! Every region the engine owns is a [`FixedBuffer`]: it is allocated exactly
//! once, at construction, from an allocator chosen by the embedding
//! application, and released exactly once when dropped. The buffer never
//! grows, so code holding one can rely on it never calling into the
//! allocator again.

use core::{
    alloc::{GlobalAlloc, Layout},
    fmt,
    mem::MaybeUninit,
    ops::{Deref, DerefMut},
    ptr::NonNull,
};

/// The allocator capability used for every engine-owned region.
///
/// Allocator state (what C APIs usually pass as `user_data`) lives in the
/// allocator value itself.
pub type Allocator = &'static (dyn GlobalAlloc + Sync);

/// Error returned when an allocator could not satisfy a request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AllocError {
    /// The number of bytes that were requested. `usize::MAX` when the size
    /// itself overflowed.
    pub bytes: usize,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bytes == usize::MAX {
            write!(f, "requested buffer size overflows usize")
        } else {
            write!(f, "failed to allocate {} bytes", self.bytes)
        }
    }
}

impl core::error::Error for AllocError {}

/// A fixed number of `T` values allocated once from an [`Allocator`].
///
/// A capacity of zero (or a zero-sized `T`) never reaches the allocator and
/// yields an empty, always-valid slice.
pub struct FixedBuffer<T: Copy> {
    /// # Safety
    ///
    /// 1. When `layout` is `Some`, `ptr` was returned by
    ///    `allocator.alloc(layout)` and points to `capacity` initialized
    ///    values of `T`.
    /// 2. When `layout` is `None`, `ptr` is dangling and the region it
    ///    describes is zero bytes long.
    ptr: NonNull<T>,
    capacity: usize,
    layout: Option<Layout>,
    allocator: Allocator,
}

// SAFETY: The buffer exclusively owns its region, like a `Box<[T]>`. The
// allocator is a shared `'static` reference to a `Sync` value, so it may be
// used from any thread.
unsafe impl<T: Copy + Send> Send for FixedBuffer<T> {}

// SAFETY: Shared access only hands out `&[T]`, which is `Sync` when `T` is.
unsafe impl<T: Copy + Sync> Sync for FixedBuffer<T> {}

impl<T: Copy> FixedBuffer<T> {
    /// Creates a buffer with no capacity. Never allocates.
    #[must_use]
    pub fn empty(allocator: Allocator) -> Self {
        Self {
            ptr: NonNull::dangling(),
            capacity: 0,
            layout: None,
            allocator,
        }
    }

    /// Allocates room for `capacity` values and initializes each one to
    /// `fill`.
    pub fn new(allocator: Allocator, capacity: usize, fill: T) -> Result<Self, AllocError> {
        let layout = Layout::array::<T>(capacity).map_err(|_| AllocError { bytes: usize::MAX })?;
        if layout.size() == 0 {
            return Ok(Self {
                ptr: NonNull::dangling(),
                capacity,
                layout: None,
                allocator,
            });
        }

        // SAFETY: `layout` has a non-zero size, as `GlobalAlloc::alloc`
        // requires.
        let raw = unsafe { allocator.alloc(layout) };
        let ptr = NonNull::new(raw.cast::<T>()).ok_or(AllocError {
            bytes: layout.size(),
        })?;

        // SAFETY: The allocation is valid for `capacity` values of `T` and is
        // not yet shared with anyone. Viewing it as `MaybeUninit<T>` makes no
        // claim about its contents.
        let uninit = unsafe {
            core::slice::from_raw_parts_mut(ptr.as_ptr().cast::<MaybeUninit<T>>(), capacity)
        };
        for slot in uninit {
            slot.write(fill);
        }

        Ok(Self {
            ptr,
            capacity,
            layout: Some(layout),
            allocator,
        })
    }

    /// The number of values in the buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The allocator this buffer was created with.
    #[inline]
    pub fn allocator(&self) -> Allocator {
        self.allocator
    }

    /// Returns the buffer contents.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: Per the field invariants, `ptr` is either valid for
        // `capacity` initialized values or describes a zero-byte region, for
        // which a dangling pointer is allowed.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.capacity) }
    }

    /// Returns the buffer contents mutably.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: Same as `as_slice`; `&mut self` guarantees exclusivity.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.capacity) }
    }
}

impl<T: Copy> Deref for FixedBuffer<T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T: Copy> DerefMut for FixedBuffer<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<T: Copy> Drop for FixedBuffer<T> {
    fn drop(&mut self) {
        if let Some(layout) = self.layout {
            // SAFETY: `ptr` was returned by `allocator.alloc(layout)` and is
            // released exactly once, here.
            unsafe { self.allocator.dealloc(self.ptr.as_ptr().cast::<u8>(), layout) }
        }
    }
}

impl<T: Copy> fmt::Debug for FixedBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedBuffer")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
