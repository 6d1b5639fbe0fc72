//! NAS-Port handle allocation for client sessions.

use std::collections::BTreeSet;

/// Default number of concurrently assignable handles.
pub const DEFAULT_MAX_SESSIONS: u16 = 1024;

/// Issues NAS-Port handles in `1..=max`, lowest free handle first.
///
/// A handle is never issued twice before it has been released. Owned by the
/// single foreground thread, so it takes `&mut self` and carries no lock.
#[derive(Debug)]
pub struct PortAllocator {
    /// Largest issuable handle (inclusive).
    max_port: u16,
    /// Handles currently outstanding.
    used_ports: BTreeSet<u16>,
}

impl PortAllocator {
    /// Create an allocator issuing handles `1..=max_port`.
    pub fn new(max_port: u16) -> Self {
        Self {
            max_port,
            used_ports: BTreeSet::new(),
        }
    }

    /// Allocate the lowest free handle.
    ///
    /// Returns `None` once every handle is outstanding.
    pub fn allocate(&mut self) -> Option<u16> {
        let port = (1..=self.max_port).find(|port| !self.used_ports.contains(port))?;
        self.used_ports.insert(port);
        Some(port)
    }

    /// Return a handle to the pool. Returns `false` if it was not outstanding.
    pub fn release(&mut self, port: u16) -> bool {
        self.used_ports.remove(&port)
    }

    pub fn is_allocated(&self, port: u16) -> bool {
        self.used_ports.contains(&port)
    }

    pub fn allocated_count(&self) -> usize {
        self.used_ports.len()
    }

    pub fn available_count(&self) -> usize {
        (self.max_port as usize).saturating_sub(self.allocated_count())
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SESSIONS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_release() {
        let mut allocator = PortAllocator::new(3);

        assert_eq!(allocator.allocate(), Some(1));
        assert_eq!(allocator.allocate(), Some(2));
        assert_eq!(allocator.allocate(), Some(3));
        assert_eq!(allocator.allocate(), None);

        assert!(allocator.release(2));
        assert_eq!(allocator.allocate(), Some(2));
        assert_eq!(allocator.allocate(), None);
    }

    #[test]
    fn test_double_release_is_noop() {
        let mut allocator = PortAllocator::new(2);
        let port = allocator.allocate().unwrap();
        assert!(allocator.release(port));
        assert!(!allocator.release(port));
        assert_eq!(allocator.allocated_count(), 0);
    }

    #[test]
    fn test_no_reuse_before_release() {
        let mut allocator = PortAllocator::new(64);
        let issued: Vec<u16> = (0..64).filter_map(|_| allocator.allocate()).collect();
        let mut sorted = issued.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 64);
        assert!(issued.iter().all(|p| allocator.is_allocated(*p)));
    }

    #[test]
    fn test_available_count() {
        let mut allocator = PortAllocator::new(5);
        assert_eq!(allocator.available_count(), 5);
        assert_eq!(allocator.allocated_count(), 0);

        allocator.allocate();
        allocator.allocate();
        assert_eq!(allocator.available_count(), 3);
        assert_eq!(allocator.allocated_count(), 2);
    }
}
