//! Resource Tracker
//!
//! Collects resources opened by one-shot connection attempts so their
//! parent connector can release them in bulk. The tracker is either open
//! (holding the current list) or sealed. Sealing swaps the list out in a
//! single step and closes everything that was held; any attempt finishing
//! afterwards gets its resource handed back and must close it itself.
//!
//! Resources their owner has already released are pruned as new ones
//! arrive.

use crate::closeable::{close_all, Closeable};
use parking_lot::Mutex;

/// Swappable list of owned resources with a terminal sealed state
pub struct ResourceTracker {
    /// `None` once sealed
    resources: Mutex<Option<Vec<Box<dyn Closeable>>>>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self {
            resources: Mutex::new(Some(Vec::new())),
        }
    }

    /// Append a resource while the tracker is open.
    ///
    /// Returns the resource back when the tracker has already been sealed;
    /// the caller owns it again and is expected to close it.
    pub fn track(&self, resource: Box<dyn Closeable>) -> Result<(), Box<dyn Closeable>> {
        let mut guard = self.resources.lock();
        match guard.as_mut() {
            Some(list) => {
                list.retain(|held| !held.is_closed());
                list.push(resource);
                Ok(())
            }
            None => Err(resource),
        }
    }

    /// Seal the tracker and close every resource it held.
    ///
    /// Returns how many resources were released. Subsequent calls release
    /// nothing.
    pub fn close_all(&self) -> usize {
        // Swap under the lock, close outside it
        let held = self.resources.lock().take();

        match held {
            Some(list) => {
                let count = list.len();
                close_all(list.iter().map(|r| &**r as &dyn Closeable));
                count
            }
            None => 0,
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.resources.lock().is_none()
    }

    /// Number of held resources that are still open
    pub fn len(&self) -> usize {
        self.resources
            .lock()
            .as_ref()
            .map_or(0, |list| list.iter().filter(|held| !held.is_closed()).count())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResourceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResourceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceTracker")
            .field("sealed", &self.is_sealed())
            .field("tracked", &self.len())
            .finish()
    }
}
