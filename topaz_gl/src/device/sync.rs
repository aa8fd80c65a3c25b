/// Host and GPU synchronisation primitives

use std::any::Any;
use crate::error::Result;

/// GPU-to-host fence
pub trait Fence: Send + Sync + Any {
    /// Block until the fence is signalled
    fn wait(&self) -> Result<()>;

    /// Return the fence to the unsignalled state
    fn reset(&self) -> Result<()>;

    fn is_signalled(&self) -> Result<bool>;

    fn as_any(&self) -> &dyn Any;
}

/// GPU-to-GPU semaphore, binary or timeline
pub trait Semaphore: Send + Sync + Any {
    fn is_timeline(&self) -> bool;

    /// Current counter value (timeline semaphores only)
    fn value(&self) -> Result<u64>;

    /// Signal `value` from the host (timeline semaphores only)
    fn signal(&self, value: u64) -> Result<()>;

    /// Block until the counter reaches `value` (timeline semaphores only)
    fn wait(&self, value: u64) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}
