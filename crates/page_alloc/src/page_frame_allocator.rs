use core::{num::NonZero, ops::Range, ptr::NonNull};

use arrayvec::ArrayVec;

/// Maximum number of distinct memory extents the allocator can manage.
///
/// Platform memory-layout discovery hands over a handful of contiguous
/// ranges at boot; exceeding this cap is a fatal misconfiguration.
pub const MAX_REGIONS: usize = 8;

/// A link written into the first bytes of a free page.
///
/// Free pages have no other content, so their own memory stores the chain.
struct Run {
    next: Option<NonNull<Run>>,
}

/// Single-threaded core of the page allocator.
///
/// Manages one or more page-aligned extents of physical memory and tracks
/// free pages in an intrusive singly linked list. Callers needing shared
/// access wrap this in a lock; see [`PageAllocator`](crate::PageAllocator).
#[derive(Debug)]
pub struct PageFrameAllocator<const PAGE_SIZE: usize> {
    /// Extents handed over for management, page-aligned, mutually disjoint.
    regions: ArrayVec<Range<NonNull<u8>>, MAX_REGIONS>,
    /// Head of the free chain; `None` when the pool is exhausted.
    free_list: Option<NonNull<Run>>,
}

impl<const PAGE_SIZE: usize> Default for PageFrameAllocator<PAGE_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const PAGE_SIZE: usize> PageFrameAllocator<PAGE_SIZE> {
    const fn page_roundup(addr: usize) -> usize {
        (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
    }

    const fn page_rounddown(addr: usize) -> usize {
        addr & !(PAGE_SIZE - 1)
    }

    /// Creates an allocator managing no memory.
    ///
    /// Pages arrive later through [`add_region`](Self::add_region), once
    /// per extent discovered at boot.
    #[must_use]
    pub const fn new() -> Self {
        const {
            assert!(PAGE_SIZE.is_power_of_two());
            assert!(size_of::<Run>() <= PAGE_SIZE);
        }

        Self {
            regions: ArrayVec::new_const(),
            free_list: None,
        }
    }

    /// Hands the allocator a contiguous extent of physical memory.
    ///
    /// The range is rounded inward to page boundaries and carved into
    /// consecutive pages, each pushed onto the free chain. A range that
    /// covers no whole page after rounding (including an empty or inverted
    /// one) contributes nothing; that is not an error.
    ///
    /// # Safety
    ///
    /// The range must be valid, exclusively owned by the allocator from
    /// this point on, and must not overlap any previously added region.
    ///
    /// # Panics
    ///
    /// Panics if more than [`MAX_REGIONS`] non-empty regions are added.
    pub unsafe fn add_region(&mut self, region: Range<NonNull<u8>>) {
        let start = Self::page_roundup(region.start.addr().get());
        let end = Self::page_rounddown(region.end.addr().get());
        if start >= end {
            return;
        }

        let start = region.start.with_addr(NonZero::new(start).unwrap());
        let end = region.start.with_addr(NonZero::new(end).unwrap());
        self.regions.push(start..end);

        // Carve from the top down so the chain head lands on the lowest
        // address.
        let mut p = end;
        while p > start {
            p = unsafe { p.byte_sub(PAGE_SIZE) };
            unsafe {
                self.free(p);
            }
        }
    }

    /// Checks whether `ptr` is a page this allocator manages: page-aligned
    /// and inside one of the added regions.
    #[must_use]
    pub fn manages(&self, ptr: NonNull<u8>) -> bool {
        ptr.addr().get() % PAGE_SIZE == 0 && self.regions.iter().any(|r| r.contains(&ptr))
    }

    /// Allocates a page of physical memory.
    ///
    /// Returns `None` if the pool is exhausted.
    pub fn alloc(&mut self) -> Option<NonNull<u8>> {
        let page = self.free_list.take()?;
        self.free_list = unsafe { page.as_ref().next };
        Some(page.cast())
    }

    /// Allocates a page of physical memory and zeroes it.
    pub fn alloc_zeroed(&mut self) -> Option<NonNull<u8>> {
        let page = self.alloc()?;
        unsafe {
            page.write_bytes(0, PAGE_SIZE);
        }
        Some(page)
    }

    /// Frees a page of physical memory.
    ///
    /// # Safety
    ///
    /// The page must have been returned by [`alloc`](Self::alloc) (or be
    /// part of a region currently being added), must not be accessed after
    /// this call, and must not already be on the free chain. Double-free is
    /// a caller-enforced invariant and is not detected.
    ///
    /// # Panics
    ///
    /// Panics if the page is misaligned or lies outside every managed
    /// region. Accepting such an address would corrupt the free chain, so
    /// the allocator refuses to continue.
    pub unsafe fn free(&mut self, page: NonNull<u8>) {
        assert_eq!(page.addr().get() % PAGE_SIZE, 0, "page = {page:#p}");
        assert!(
            self.regions.iter().any(|r| r.contains(&page)),
            "page = {page:#p} is outside every managed region"
        );

        let mut run = page.cast::<Run>();
        unsafe {
            run.as_mut().next = self.free_list;
        }
        self.free_list = Some(run);
    }

    /// Counts the pages currently on the free chain.
    ///
    /// Walks the entire chain; O(n) in the number of free pages. This is a
    /// diagnostic, off every allocation path, and measuring the structure
    /// itself avoids a running counter that could drift from it.
    #[must_use]
    pub fn free_pages(&self) -> usize {
        let mut pages = 0;
        let mut cursor = self.free_list;
        while let Some(run) = cursor {
            pages += 1;
            cursor = unsafe { run.as_ref().next };
        }
        pages
    }
}

unsafe impl<const PAGE_SIZE: usize> Send for PageFrameAllocator<PAGE_SIZE> {}
