//! Partition loader interface

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::id::PartitionId;
use crate::manager::LinkManager;

/// Streams spatial partitions in and out.
///
/// Loading normally happens in the background; completed partitions are
/// bound on the editing thread by [`tick`](PartitionLoader::tick), which
/// attaches their linkables to the manager.
pub trait PartitionLoader: Send + Sync {
    /// Request that a partition be loaded as soon as possible
    fn load_partition_now(&self, partition: &PartitionId);

    /// Check if any load is still outstanding
    fn is_loading(&self) -> bool;

    /// Switch between synchronous and asynchronous operation
    fn set_synchronous_mode(&self, synchronous: bool);

    /// Bind completed loads
    fn tick(&self, manager: &LinkManager);
}

/// Keeps a loader in synchronous mode for the guard's lifetime.
///
/// Guards nest: only the outermost one switches the mode.
pub(crate) struct SynchronousGuard<'a> {
    loader: &'a dyn PartitionLoader,
    depth: &'a AtomicUsize,
}

impl<'a> SynchronousGuard<'a> {
    pub(crate) fn new(loader: &'a dyn PartitionLoader, depth: &'a AtomicUsize) -> Self {
        if depth.fetch_add(1, Ordering::SeqCst) == 0 {
            loader.set_synchronous_mode(true);
        }
        Self { loader, depth }
    }
}

impl Drop for SynchronousGuard<'_> {
    fn drop(&mut self) {
        if self.depth.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.loader.set_synchronous_mode(false);
        }
    }
}

/// Loader for worlds without streaming: nothing is ever loading.
#[derive(Debug, Default)]
pub struct ResidentLoader;

impl PartitionLoader for ResidentLoader {
    fn load_partition_now(&self, partition: &PartitionId) {
        log::debug!("Partition {} requested from a fully resident world", partition);
    }

    fn is_loading(&self) -> bool {
        false
    }

    fn set_synchronous_mode(&self, _synchronous: bool) {}

    fn tick(&self, _manager: &LinkManager) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct ModeLoader {
        synchronous: AtomicBool,
    }

    impl PartitionLoader for ModeLoader {
        fn load_partition_now(&self, _partition: &PartitionId) {}

        fn is_loading(&self) -> bool {
            false
        }

        fn set_synchronous_mode(&self, synchronous: bool) {
            self.synchronous.store(synchronous, Ordering::SeqCst);
        }

        fn tick(&self, _manager: &LinkManager) {}
    }

    #[test]
    fn test_guard_restores_async_mode() {
        let loader = ModeLoader::default();
        let depth = AtomicUsize::new(0);
        {
            let _guard = SynchronousGuard::new(&loader, &depth);
            assert!(loader.synchronous.load(Ordering::SeqCst));
            {
                let _inner = SynchronousGuard::new(&loader, &depth);
            }
            assert!(loader.synchronous.load(Ordering::SeqCst));
        }
        assert!(!loader.synchronous.load(Ordering::SeqCst));
        assert_eq!(depth.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_guard_restores_async_mode_on_unwind() {
        let loader = ModeLoader::default();
        let depth = AtomicUsize::new(0);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = SynchronousGuard::new(&loader, &depth);
            panic!("loader failure");
        }));
        assert!(result.is_err());
        assert!(!loader.synchronous.load(Ordering::SeqCst));
    }
}
