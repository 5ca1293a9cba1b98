//! Cyclic selection over egress points and purchase hostnames.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use dropfleet_domain::{EgressPoint, Marketplace};

/// Round-robin over a mutable list.
///
/// `next` advances first, so the first call on a fresh rotator returns the
/// second element. Concurrent callers may observe a skipped or repeated
/// element.
#[derive(Debug)]
pub struct Rotator<T> {
    items: RwLock<Vec<T>>,
    cursor: AtomicUsize,
}

impl<T> Default for Rotator<T> {
    fn default() -> Self {
        Self {
            items: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }
}

impl<T: Clone + PartialEq> Rotator<T> {
    /// Create a rotator over `items`.
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: RwLock::new(items),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Advance and return the element at the new position.
    pub fn next(&self) -> Option<T> {
        let items = self.items.read();
        let len = items.len();
        if len == 0 {
            return None;
        }

        let advance = |c: usize| Some(if c + 1 >= len { 0 } else { c + 1 });
        let previous = self
            .cursor
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, advance)
            .unwrap_or(0);
        let index = advance(previous).unwrap_or(0);

        items.get(index).cloned()
    }

    /// Append `item` unless an equal item is present.
    pub fn add(&self, item: T) {
        let mut items = self.items.write();
        if !items.contains(&item) {
            items.push(item);
        }
    }

    /// Remove every item equal to `item`.
    pub fn remove(&self, item: &T) {
        self.items.write().retain(|i| i != item);
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Whether the rotator has no items.
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

/// All rotators a worker draws its transport identity from.
#[derive(Debug, Default)]
pub struct Rotators {
    /// Egress points for live checkouts
    pub checkout: Rotator<EgressPoint>,
    /// Egress points for health probes
    pub auxiliary: Rotator<EgressPoint>,
    hosts: HashMap<Marketplace, Rotator<String>>,
}

impl Rotators {
    /// Build rotators from loaded inventories.
    pub fn new(
        checkout: Vec<EgressPoint>,
        auxiliary: Vec<EgressPoint>,
        hosts: HashMap<Marketplace, Vec<String>>,
    ) -> Self {
        Self {
            checkout: Rotator::new(checkout),
            auxiliary: Rotator::new(auxiliary),
            hosts: hosts.into_iter().map(|(m, list)| (m, Rotator::new(list))).collect(),
        }
    }

    /// Next purchase hostname for a marketplace.
    pub fn next_host(&self, marketplace: Marketplace) -> Option<String> {
        self.hosts.get(&marketplace).and_then(Rotator::next)
    }

    /// Hostname rotator of a marketplace.
    pub fn hosts(&self, marketplace: Marketplace) -> Option<&Rotator<String>> {
        self.hosts.get(&marketplace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_advances_before_returning() {
        let rotator = Rotator::new(vec!["a", "b", "c"]);

        let seen: Vec<_> = (0..4).filter_map(|_| rotator.next()).collect();
        assert_eq!(seen, vec!["b", "c", "a", "b"]);
    }

    #[test]
    fn test_single_item_always_returned() {
        let rotator = Rotator::new(vec![7]);
        assert_eq!(rotator.next(), Some(7));
        assert_eq!(rotator.next(), Some(7));
    }

    #[test]
    fn test_empty_returns_none() {
        let rotator: Rotator<u8> = Rotator::new(vec![]);
        assert_eq!(rotator.next(), None);
        assert!(rotator.is_empty());
    }

    #[test]
    fn test_add_skips_duplicates_and_remove_drops_all() {
        let rotator = Rotator::new(vec!["a", "b", "a"]);
        rotator.add("b");
        rotator.add("c");
        assert_eq!(rotator.len(), 4);

        rotator.remove(&"a");
        assert_eq!(rotator.len(), 2);
    }

    #[test]
    fn test_hosts_per_marketplace() {
        let mut hosts = HashMap::new();
        hosts.insert(Marketplace::Us, vec!["us-1".to_string(), "us-2".to_string()]);
        let rotators = Rotators::new(vec![], vec![], hosts);

        assert_eq!(rotators.next_host(Marketplace::Us).as_deref(), Some("us-2"));
        assert_eq!(rotators.next_host(Marketplace::Uk), None);
        assert!(rotators.checkout.next().is_none());
    }
}
