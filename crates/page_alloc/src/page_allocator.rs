use core::{ops::Range, ptr::NonNull};

use mutex_api::Mutex;

use crate::{NoFreePage, PageFrameAllocator};

/// Byte written over a page when it is handed out. Using memory after
/// allocation but before initialization must fail loudly, not look like
/// valid zeroed data.
const ALLOC_FILL: u8 = 5;

/// Byte written over a page when it is returned, to catch dangling refs.
const FREE_FILL: u8 = 1;

/// The shared page pool: a [`PageFrameAllocator`] behind a mutex.
///
/// One instance is created by the boot sequence, fed the physical memory
/// extents left over after the kernel image, and handed by shared reference
/// to every subsystem that needs pages. The mutex type is pluggable so the
/// kernel can use its spinlock while host tests use `std::sync::Mutex`.
///
/// Fill patterns are written outside the critical section; the lock is held
/// only for the chain manipulation itself.
pub struct PageAllocator<const PAGE_SIZE: usize, M> {
    allocator: M,
}

impl<const PAGE_SIZE: usize, M> Default for PageAllocator<PAGE_SIZE, M>
where
    M: Mutex<Data = PageFrameAllocator<PAGE_SIZE>>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const PAGE_SIZE: usize, M> PageAllocator<PAGE_SIZE, M>
where
    M: Mutex<Data = PageFrameAllocator<PAGE_SIZE>>,
{
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self {
            allocator: M::new(PageFrameAllocator::new()),
        }
    }

    /// Hands the pool a contiguous extent of physical memory.
    ///
    /// May be called once per extent discovered at boot; the pages from
    /// every extent aggregate into one logical pool.
    ///
    /// # Safety
    ///
    /// Same contract as [`PageFrameAllocator::add_region`]: the range must
    /// be valid, exclusively owned, and disjoint from earlier regions.
    pub unsafe fn add_region(&self, region: Range<NonNull<u8>>) {
        unsafe { self.allocator.lock().add_region(region) }
    }

    /// Allocates one page of physical memory.
    ///
    /// The page is filled with a fixed non-zero pattern so that reads
    /// before initialization are detectable. Returns [`NoFreePage`] when
    /// the pool is exhausted; that is recoverable and the pool is left
    /// unchanged.
    pub fn alloc_page(&self) -> Result<NonNull<u8>, NoFreePage> {
        let page = self.allocator.lock().alloc().ok_or(NoFreePage)?;
        unsafe {
            page.write_bytes(ALLOC_FILL, PAGE_SIZE);
        }
        Ok(page)
    }

    /// Allocates one zeroed page of physical memory.
    pub fn alloc_zeroed_page(&self) -> Result<NonNull<u8>, NoFreePage> {
        self.allocator.lock().alloc_zeroed().ok_or(NoFreePage)
    }

    /// Frees the page of physical memory pointed at by `page`, which
    /// normally should have been returned by a call to
    /// [`alloc_page`](Self::alloc_page).
    ///
    /// # Safety
    ///
    /// The page must have been allocated from this pool, must not be
    /// accessed after this call, and must not be freed twice.
    ///
    /// # Panics
    ///
    /// Panics if the page is misaligned or outside every region handed to
    /// [`add_region`](Self::add_region); the pool is left unchanged.
    pub unsafe fn free_page(&self, page: NonNull<u8>) {
        assert_eq!(page.addr().get() % PAGE_SIZE, 0, "page = {page:#p}");

        // Fill with junk to catch dangling refs.
        unsafe {
            page.write_bytes(FREE_FILL, PAGE_SIZE);
        }

        unsafe { self.allocator.lock().free(page) }
    }

    /// Counts the pages currently free in the pool.
    ///
    /// The lock is held across the whole chain walk, so the count never
    /// reflects a half-applied allocation or free. O(n) in the number of
    /// free pages; this is a diagnostic, not an allocation-path operation.
    #[must_use]
    pub fn free_page_count(&self) -> usize {
        self.allocator.lock().free_pages()
    }

    /// Checks whether `ptr` is a page-aligned address inside the pool's
    /// managed memory.
    #[must_use]
    pub fn manages(&self, ptr: NonNull<u8>) -> bool {
        self.allocator.lock().manages(ptr)
    }
}

#[cfg(test)]
mod tests {
    use core::cell::UnsafeCell;
    use std::{collections::HashSet, sync::Mutex as StdMutex, thread};

    use super::*;

    const PAGE_SIZE: usize = 64;
    const HEAP_PAGES: usize = 40;

    type Pool = PageAllocator<PAGE_SIZE, StdMutex<PageFrameAllocator<PAGE_SIZE>>>;

    #[repr(align(64))]
    struct Heap(UnsafeCell<[u8; PAGE_SIZE * HEAP_PAGES]>);

    impl Heap {
        fn new() -> Self {
            Self(UnsafeCell::new([0; PAGE_SIZE * HEAP_PAGES]))
        }

        fn pages(&self, first: usize, count: usize) -> Range<NonNull<u8>> {
            let base = NonNull::new(self.0.get().cast::<u8>()).unwrap();
            let start = unsafe { base.byte_add(first * PAGE_SIZE) };
            let end = unsafe { start.byte_add(count * PAGE_SIZE) };
            start..end
        }
    }

    fn pool_with_pages(heap: &Heap, count: usize) -> Pool {
        let pool = Pool::new();
        unsafe {
            pool.add_region(heap.pages(0, count));
        }
        pool
    }

    #[test]
    fn four_page_pool_lifecycle() {
        let heap = Heap::new();
        let pool = pool_with_pages(&heap, 4);
        assert_eq!(pool.free_page_count(), 4);

        let mut pages = vec![];
        let mut addrs = HashSet::new();
        for remaining in (0..4).rev() {
            let page = pool.alloc_page().unwrap();
            assert!(addrs.insert(page.addr()), "page is duplicated");
            assert_eq!(pool.free_page_count(), remaining);
            pages.push(page);
        }

        // fifth allocation fails without disturbing the pool
        assert_eq!(pool.alloc_page(), Err(NoFreePage));
        assert_eq!(pool.free_page_count(), 0);

        unsafe {
            pool.free_page(pages.pop().unwrap());
        }
        assert_eq!(pool.free_page_count(), 1);
    }

    #[test]
    fn alloc_free_round_trip_restores_count() {
        let heap = Heap::new();
        let pool = pool_with_pages(&heap, 4);

        let before = pool.free_page_count();
        let page = pool.alloc_page().unwrap();
        assert_eq!(pool.free_page_count(), before - 1);
        unsafe {
            pool.free_page(page);
        }
        assert_eq!(pool.free_page_count(), before);

        // the freed page is available again
        pool.alloc_page().unwrap();
    }

    #[test]
    fn exhausted_empty_pool_reports_no_free_page() {
        let pool = Pool::new();
        assert_eq!(pool.free_page_count(), 0);
        assert_eq!(pool.alloc_page(), Err(NoFreePage));
        assert_eq!(pool.free_page_count(), 0);
    }

    #[test]
    fn allocated_page_carries_fill_pattern() {
        let heap = Heap::new();
        let pool = pool_with_pages(&heap, 1);

        let page = pool.alloc_page().unwrap();
        let bytes = unsafe { core::slice::from_raw_parts(page.as_ptr(), PAGE_SIZE) };
        assert!(bytes.iter().all(|&b| b == 5));
    }

    #[test]
    fn freed_page_is_junked() {
        let heap = Heap::new();
        let pool = pool_with_pages(&heap, 1);

        let page = pool.alloc_page().unwrap();
        unsafe {
            pool.free_page(page);
        }

        // The chain link occupies the first bytes of a free page; the rest
        // must hold the junk byte.
        let bytes = unsafe { core::slice::from_raw_parts(page.as_ptr(), PAGE_SIZE) };
        assert!(bytes[16..].iter().all(|&b| b == 1));
    }

    #[test]
    #[should_panic(expected = "page = ")]
    fn free_misaligned_page_is_fatal() {
        let heap = Heap::new();
        let pool = pool_with_pages(&heap, 2);

        let misaligned = unsafe { heap.pages(0, 1).start.byte_add(8) };
        unsafe {
            pool.free_page(misaligned);
        }
    }

    #[test]
    #[should_panic(expected = "outside every managed region")]
    fn free_foreign_page_is_fatal() {
        let heap = Heap::new();
        let stray = Heap::new();
        let pool = pool_with_pages(&heap, 2);

        unsafe {
            pool.free_page(stray.pages(0, 1).start);
        }
    }

    struct SendPage(NonNull<u8>);
    unsafe impl Send for SendPage {}

    #[test]
    fn concurrent_allocations_never_double_issue() {
        const THREADS: usize = 4;

        let heap = Heap::new();
        let pool = pool_with_pages(&heap, HEAP_PAGES);
        let taken = StdMutex::new(Vec::new());

        thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    while let Ok(page) = pool.alloc_page() {
                        taken.lock().unwrap().push(SendPage(page));
                    }
                });
            }
        });

        let taken = taken.into_inner().unwrap();
        assert_eq!(taken.len(), HEAP_PAGES);
        assert_eq!(pool.free_page_count(), 0);

        let addrs: HashSet<_> = taken.iter().map(|p| p.0.addr()).collect();
        assert_eq!(addrs.len(), HEAP_PAGES, "a page was issued twice");

        for page in taken {
            unsafe {
                pool.free_page(page.0);
            }
        }
        assert_eq!(pool.free_page_count(), HEAP_PAGES);
    }
}
