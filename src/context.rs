//! Per-thread context stacks.
//!
//! A context is a `&'static str` label naming the area of the program that
//! "owns" whatever fails next. Each thread has its own fixed-capacity stack
//! of labels, created the first time it pushes one. Push and pop touch only
//! the calling thread's stack and take no lock.
//!
//! A thread keeps one stack per engine it has used, keyed by engine id, so
//! engines used side by side on one thread never see each other's labels.
//! Every stack is also registered with the engine that created it, so that
//! dropping the engine frees every thread's buffer without waiting for
//! those threads to exit. Handles left over from dropped engines are pruned
//! the next time the thread creates a stack.

use core::{
    cell::{RefCell, UnsafeCell},
    marker::PhantomData,
    sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};

use forensics_internals::{Allocator, FixedBuffer};
use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use triomphe::Arc;

use crate::Engine;

type ThreadStacks = IndexMap<u64, Arc<ContextStack>, FxBuildHasher>;

thread_local! {
    /// The calling thread's stacks, by engine id.
    static THREAD_STACKS: RefCell<ThreadStacks> =
        const { RefCell::new(IndexMap::with_hasher(FxBuildHasher)) };
}

/// Returned by a pop that has nothing to pop.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct ContextUnderflow;

pub(crate) struct ContextStack {
    /// # Safety
    ///
    /// Only the thread whose `THREAD_STACKS` holds this stack reads or
    /// writes the labels, except in [`ContextStack::release`], which
    /// requires that no other access is possible.
    labels: UnsafeCell<FixedBuffer<&'static str>>,
    depth: AtomicUsize,
    overflow: AtomicUsize,
    /// Set once the owning registry has freed the labels.
    released: AtomicBool,
    key: u64,
}

// SAFETY: The labels are only accessed from the owning thread (see the field
// invariant); the counters are atomics. Other threads only hold the `Arc` to
// keep the stack registered.
unsafe impl Sync for ContextStack {}

impl ContextStack {
    fn push(&self, label: &'static str) {
        let depth = self.depth.load(Ordering::Relaxed);
        // SAFETY: Called on the owning thread through `THREAD_STACKS`, so
        // there is no concurrent access to the labels.
        let labels = unsafe { &mut *self.labels.get() };
        if let Some(slot) = labels.get_mut(depth) {
            *slot = label;
            // Publishes the label before the depth, for a fault handler
            // interrupting this thread.
            self.depth.store(depth + 1, Ordering::Release);
        } else {
            self.overflow.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn pop(&self) -> Result<(), ContextUnderflow> {
        let overflow = self.overflow.load(Ordering::Relaxed);
        if overflow > 0 {
            self.overflow.store(overflow - 1, Ordering::Relaxed);
            return Ok(());
        }
        let depth = self.depth.load(Ordering::Relaxed);
        if depth == 0 {
            return Err(ContextUnderflow);
        }
        self.depth.store(depth - 1, Ordering::Release);
        Ok(())
    }

    /// Copies the innermost labels, outermost first, into `out`.
    fn copy_into(&self, out: &mut [&'static str]) -> usize {
        let depth = self.depth.load(Ordering::Acquire);
        // SAFETY: Called on the owning thread through `THREAD_STACKS`.
        let labels = unsafe { &*self.labels.get() };
        let depth = depth.min(labels.len());
        let copied = depth.min(out.len());
        out[..copied].copy_from_slice(&labels[depth - copied..depth]);
        copied
    }

    /// Frees the label buffer and empties the stack.
    ///
    /// # Safety
    ///
    /// No other reference to the labels may be live, and no push, pop or
    /// copy may run concurrently.
    unsafe fn release(&self) {
        // SAFETY: Guaranteed by the caller.
        let labels = unsafe { &mut *self.labels.get() };
        let allocator = labels.allocator();
        *labels = FixedBuffer::empty(allocator);
        self.depth.store(0, Ordering::Relaxed);
        self.overflow.store(0, Ordering::Relaxed);
        self.released.store(true, Ordering::Release);
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

/// The set of stacks created by one engine.
pub(crate) struct ContextRegistry {
    engine_id: u64,
    depth: usize,
    allocator: Allocator,
    stacks: spin::Mutex<IndexMap<u64, Arc<ContextStack>, FxBuildHasher>>,
    next_key: AtomicU64,
}

impl ContextRegistry {
    pub(crate) fn new(engine_id: u64, depth: usize, allocator: Allocator) -> Self {
        Self {
            engine_id,
            depth,
            allocator,
            stacks: spin::Mutex::new(IndexMap::with_hasher(FxBuildHasher)),
            next_key: AtomicU64::new(0),
        }
    }

    pub(crate) fn begin(&self, label: &'static str) {
        self.with_stack(|stack| stack.push(label));
    }

    /// Pops the innermost label. Never creates a stack: a thread without
    /// one has nothing to pop. A thread whose locals are already gone is
    /// treated as balanced.
    pub(crate) fn end(&self) -> Result<(), ContextUnderflow> {
        match self.with_existing(ContextStack::pop) {
            Some(Some(popped)) => popped,
            Some(None) => Err(ContextUnderflow),
            None => Ok(()),
        }
    }

    /// Copies the calling thread's labels into `out`, never creating a
    /// stack. Safe to call from a fault handler.
    pub(crate) fn snapshot(&self, out: &mut [&'static str]) -> usize {
        self.with_existing(|stack| stack.copy_into(out))
            .flatten()
            .unwrap_or(0)
    }

    /// Unregisters the calling thread's stack and frees it.
    pub(crate) fn release_current_thread(&self) {
        let released = THREAD_STACKS
            .try_with(|stacks| {
                stacks
                    .try_borrow_mut()
                    .ok()?
                    .swap_remove(&self.engine_id)
            })
            .ok()
            .flatten();

        if let Some(stack) = released {
            self.stacks.lock().swap_remove(&stack.key);
            tracing::trace!(key = stack.key, "released thread context stack");
        }
    }

    /// Number of registered stacks.
    pub(crate) fn len(&self) -> usize {
        self.stacks.lock().len()
    }

    /// Runs `f` on the calling thread's stack for this engine, creating it
    /// if needed.
    fn with_stack<R>(&self, f: impl FnOnce(&ContextStack) -> R) -> Option<R> {
        THREAD_STACKS
            .try_with(|stacks| {
                let mut stacks = stacks.try_borrow_mut().ok()?;
                if !stacks.contains_key(&self.engine_id) {
                    stacks.retain(|_, stack| !stack.is_released());
                    stacks.insert(self.engine_id, self.create());
                }
                stacks.get(&self.engine_id).map(|stack| f(stack))
            })
            .ok()
            .flatten()
    }

    /// Runs `f` on the calling thread's stack for this engine if it has
    /// one. The outer `None` means the thread locals are unavailable.
    fn with_existing<R>(&self, f: impl FnOnce(&ContextStack) -> R) -> Option<Option<R>> {
        THREAD_STACKS
            .try_with(|stacks| {
                let stacks = stacks.try_borrow().ok()?;
                Some(stacks.get(&self.engine_id).map(|stack| f(stack)))
            })
            .ok()
            .flatten()
    }

    fn create(&self) -> Arc<ContextStack> {
        let labels = match FixedBuffer::new(self.allocator, self.depth, "") {
            Ok(labels) => labels,
            Err(error) => {
                tracing::warn!(%error, "context stack allocation failed, contexts will be counted only");
                FixedBuffer::empty(self.allocator)
            }
        };
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        let stack = Arc::new(ContextStack {
            labels: UnsafeCell::new(labels),
            depth: AtomicUsize::new(0),
            overflow: AtomicUsize::new(0),
            released: AtomicBool::new(false),
            key,
        });
        self.stacks.lock().insert(key, stack.clone());
        tracing::trace!(key, depth = self.depth, "created thread context stack");
        stack
    }
}

impl Drop for ContextRegistry {
    fn drop(&mut self) {
        for (_, stack) in self.stacks.get_mut().drain(..) {
            // SAFETY: The registry is being dropped with the engine, so no
            // engine method is running on any thread. Thread-local handles
            // to these stacks are only used through an engine with a
            // matching id, and engine ids are never reused. The rest only
            // read `released` before dropping their handle.
            unsafe { stack.release() };
        }
    }
}

/// Ends a context when dropped.
///
/// Returned by [`Engine::enter_context`] and [`crate::context`]. The guard
/// must be dropped on the thread that created it.
#[must_use = "the context ends as soon as the guard is dropped"]
pub struct ContextGuard<'a> {
    engine: Option<&'a Engine>,
    _not_send: PhantomData<*const ()>,
}

impl<'a> ContextGuard<'a> {
    pub(crate) fn new(engine: Option<&'a Engine>) -> Self {
        Self {
            engine,
            _not_send: PhantomData,
        }
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        match self.engine {
            Some(engine) => engine.end_context(),
            None => crate::global::end_context(),
        }
    }
}

impl core::fmt::Debug for ContextGuard<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ContextGuard")
            .field("global", &self.engine.is_none())
            .finish()
    }
}
