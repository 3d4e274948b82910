use std::any::Any;
use std::cell::{Cell, RefCell};

/// Owns the addressable copies handed to native invokers during one top-level dispatch.
///
/// Every value is boxed individually, so addresses stay put while the slot list grows under
/// nested dispatches.
#[derive(Default)]
pub struct MarshalStorage {
    slots: Vec<Box<dyn Any>>,
}

impl MarshalStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves `value` into the buffer and returns its address.
    pub fn store<T: Any>(&mut self, value: T) -> *mut () {
        let mut boxed = Box::new(value);
        let ptr = &mut *boxed as *mut T as *mut ();
        self.slots.push(boxed);
        ptr
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drops the stored values; capacity is kept.
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

thread_local! {
    static SCRATCH: RefCell<MarshalStorage> = RefCell::new(MarshalStorage::new());
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Marks one dispatcher entry point on this thread. The outermost scope clears the scratch
/// buffer on entry; nested scopes leave it alone so their callers' slots survive.
pub(crate) struct ScratchScope {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl ScratchScope {
    pub(crate) fn enter() -> Self {
        let depth = DEPTH.with(|depth| {
            let current = depth.get();
            depth.set(current + 1);
            current
        });
        if depth == 0 {
            SCRATCH.with(|scratch| scratch.borrow_mut().clear());
        }
        Self { _not_send: std::marker::PhantomData }
    }
}

impl Drop for ScratchScope {
    fn drop(&mut self) {
        DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Runs `f` against this thread's scratch buffer. The borrow must not be held across a native
/// call, which may re-enter the dispatcher.
pub(crate) fn with_scratch<R>(f: impl FnOnce(&mut MarshalStorage) -> R) -> R {
    SCRATCH.with(|scratch| f(&mut scratch.borrow_mut()))
}

/// Number of values currently held in this thread's scratch buffer.
pub fn scratch_len() -> usize {
    SCRATCH.with(|scratch| scratch.borrow().len())
}
