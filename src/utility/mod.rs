pub mod counter;
pub mod perf_timer;
pub mod synchronization;

use crate::core::worker::Worker;

/// A type that allows us to make sure that an object is Send.
pub trait IsSend: Send {}

/// A type that allows us to make sure that an object is Sync.
pub trait IsSync: Sync {}

/// A cheap magic-number field for catching use-after-free and type confusion
/// in debug builds. Stores nothing in release builds.
#[derive(Debug)]
pub struct Magic<const M: u32> {
    #[cfg(debug_assertions)]
    magic: u32,
}

impl<const M: u32> Magic<M> {
    pub fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            magic: M,
        }
    }

    pub fn debug_check(&self) {
        #[cfg(debug_assertions)]
        {
            assert_eq!(self.magic, M);
        }
    }
}

impl<const M: u32> Default for Magic<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts the allocation on construction and the deallocation on drop, under
/// the given object name. Embed one in any struct whose population should show
/// up in the end-of-run object counts.
#[derive(Debug)]
pub struct ObjectCounter {
    name: &'static str,
}

impl ObjectCounter {
    pub fn new(name: &'static str) -> Self {
        Worker::increment_object_alloc_counter(name);
        Self { name }
    }
}

impl std::ops::Drop for ObjectCounter {
    fn drop(&mut self) {
        Worker::increment_object_dealloc_counter(self.name);
    }
}
