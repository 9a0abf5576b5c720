use std::{
    alloc::{GlobalAlloc, Layout, System},
    sync::atomic::{AtomicUsize, Ordering},
};

/// Global allocator that forwards to [`System`] and counts what passes through it.
///
/// Install it with `#[global_allocator]` in a binary or integration test. It never allocates or
/// logs itself, so it is safe to use before `main` and from any thread.
pub struct CountingAlloc {
    allocations: AtomicUsize,
    deallocations: AtomicUsize,
    reallocations: AtomicUsize,
    allocated_bytes: AtomicUsize,
}

impl CountingAlloc {
    pub const fn new() -> Self {
        Self {
            allocations: AtomicUsize::new(0),
            deallocations: AtomicUsize::new(0),
            reallocations: AtomicUsize::new(0),
            allocated_bytes: AtomicUsize::new(0),
        }
    }

    pub fn stats(&self) -> AllocStats {
        AllocStats {
            allocations: self.allocations.load(Ordering::Relaxed),
            deallocations: self.deallocations.load(Ordering::Relaxed),
            reallocations: self.reallocations.load(Ordering::Relaxed),
            allocated_bytes: self.allocated_bytes.load(Ordering::Relaxed),
        }
    }

    #[inline]
    fn record(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        if !ptr.is_null() {
            self.allocations.fetch_add(1, Ordering::Relaxed);
            self.allocated_bytes.fetch_add(size, Ordering::Relaxed);
        }

        ptr
    }
}

impl Default for CountingAlloc {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.record(System.alloc(layout), layout.size())
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        self.record(System.alloc_zeroed(layout), layout.size())
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = System.realloc(ptr, layout, new_size);

        if !new_ptr.is_null() {
            self.reallocations.fetch_add(1, Ordering::Relaxed);
            self.allocated_bytes
                .fetch_add(new_size.saturating_sub(layout.size()), Ordering::Relaxed);
        }

        new_ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.deallocations.fetch_add(1, Ordering::Relaxed);
        System.dealloc(ptr, layout)
    }
}

/// Point-in-time copy of the counters of a [`CountingAlloc`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocStats {
    pub allocations: usize,
    pub deallocations: usize,
    pub reallocations: usize,
    /// Bytes handed out, ignoring frees. Shrinking reallocations do not subtract.
    pub allocated_bytes: usize,
}

impl AllocStats {
    /// Counters accumulated between `earlier` and `self`.
    pub fn since(self, earlier: AllocStats) -> AllocStats {
        AllocStats {
            allocations: self.allocations.saturating_sub(earlier.allocations),
            deallocations: self.deallocations.saturating_sub(earlier.deallocations),
            reallocations: self.reallocations.saturating_sub(earlier.reallocations),
            allocated_bytes: self.allocated_bytes.saturating_sub(earlier.allocated_bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_direct_calls() {
        let alloc = CountingAlloc::new();
        let layout = Layout::from_size_align(128, 8).unwrap();

        unsafe {
            let ptr = alloc.alloc(layout);
            assert!(!ptr.is_null());
            let ptr = alloc.realloc(ptr, layout, 256);
            assert!(!ptr.is_null());
            alloc.dealloc(ptr, Layout::from_size_align(256, 8).unwrap());

            let zeroed = alloc.alloc_zeroed(layout);
            assert_eq!(*zeroed, 0);
            alloc.dealloc(zeroed, layout);
        }

        let stats = alloc.stats();
        assert_eq!(stats.allocations, 2);
        assert_eq!(stats.reallocations, 1);
        assert_eq!(stats.deallocations, 2);
        assert_eq!(stats.allocated_bytes, 128 + 128 + 128);
    }

    #[test]
    fn since_subtracts_and_saturates() {
        let earlier = AllocStats {
            allocations: 10,
            deallocations: 4,
            reallocations: 0,
            allocated_bytes: 1000,
        };
        let later = AllocStats {
            allocations: 15,
            deallocations: 9,
            reallocations: 2,
            allocated_bytes: 1640,
        };

        let delta = later.since(earlier);
        assert_eq!(delta.allocations, 5);
        assert_eq!(delta.deallocations, 5);
        assert_eq!(delta.reallocations, 2);
        assert_eq!(delta.allocated_bytes, 640);

        assert_eq!(earlier.since(later), AllocStats::default());
    }
}
