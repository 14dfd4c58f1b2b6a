/// The free pool was empty at the moment of an allocation request.
///
/// This is a normal, recoverable condition: the caller decides whether to
/// retry later, fail the requesting operation, or report out-of-memory
/// upward. The allocator never blocks waiting for memory to become free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no free page available")]
pub struct NoFreePage;
