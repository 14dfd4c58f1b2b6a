//! Physical memory allocator, for user processes, kernel stacks,
//! page-table pages, and pipe buffers.
//!
//! Allocates whole fixed-size pages. Two layers:
//!
//! - [`PageFrameAllocator`] is the single-threaded core: free pages are
//!   threaded into an intrusive linked list, with the link stored in the
//!   page's own memory. All pointer manipulation is confined here.
//! - [`PageAllocator`] wraps the core in a [`mutex_api::Mutex`] so any
//!   execution context can allocate, free, or count pages concurrently.
//!   It also fills pages with fixed patterns on allocation and free so
//!   that use-before-init and use-after-free fail loudly.
//!
//! Exhaustion is the recoverable [`NoFreePage`] error; freeing an address
//! the allocator does not manage panics, since continuing would corrupt
//! the free list and every allocation after it.

#![cfg_attr(not(test), no_std)]

mod error;
pub mod page_allocator;
pub mod page_frame_allocator;

pub use self::{
    error::NoFreePage,
    page_allocator::PageAllocator,
    page_frame_allocator::{MAX_REGIONS, PageFrameAllocator},
};
