use std::{collections::HashMap, hash::Hash, sync::Arc};

use arc_swap::ArcSwap;
use parking_lot::Mutex;

/// Read-mostly map: readers load an immutable snapshot, writers copy, insert and
/// swap under a narrow lock.
#[derive(Debug)]
pub struct CowMap<K, V> {
    snapshot: ArcSwap<HashMap<K, Arc<V>>>,
    write: Mutex<()>,
}

impl<K, V> Default for CowMap<K, V> {
    fn default() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(HashMap::new()),
            write: Mutex::new(()),
        }
    }
}

impl<K: Eq + Hash + Clone, V> CowMap<K, V> {
    pub fn get<Q>(&self, key: &Q) -> Option<Arc<V>>
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.snapshot.load().get(key).cloned()
    }

    pub fn get_or_insert_with(&self, key: K, make: impl FnOnce() -> V) -> Arc<V> {
        if let Some(value) = self.snapshot.load().get(&key) {
            return Arc::clone(value);
        }

        let _guard = self.write.lock();
        let current = self.snapshot.load_full();
        if let Some(value) = current.get(&key) {
            return Arc::clone(value);
        }
        let value = Arc::new(make());
        let mut next = HashMap::clone(&current);
        next.insert(key, Arc::clone(&value));
        self.snapshot.store(Arc::new(next));
        value
    }

    pub fn snapshot(&self) -> Arc<HashMap<K, Arc<V>>> {
        self.snapshot.load_full()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read-mostly list of shared children, deduplicated by pointer identity.
#[derive(Debug)]
pub struct CowList<T> {
    snapshot: ArcSwap<Vec<Arc<T>>>,
    write: Mutex<()>,
}

impl<T> Default for CowList<T> {
    fn default() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Vec::new()),
            write: Mutex::new(()),
        }
    }
}

impl<T> CowList<T> {
    /// Returns `false` when the item was already present.
    pub fn insert(&self, item: Arc<T>) -> bool {
        let _guard = self.write.lock();
        let current = self.snapshot.load_full();
        if current.iter().any(|existing| Arc::ptr_eq(existing, &item)) {
            return false;
        }
        let mut next = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(item);
        self.snapshot.store(Arc::new(next));
        true
    }

    pub fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.snapshot.load_full()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn map_creates_each_key_once_under_contention() {
        let map: Arc<CowMap<String, usize>> = Arc::default();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let map = Arc::clone(&map);
                thread::spawn(move || *map.get_or_insert_with("origin".to_owned(), || i))
            })
            .collect();
        let values: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(values.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn old_snapshots_are_unaffected_by_inserts() {
        let list = CowList::default();
        let first = Arc::new(1);
        assert!(list.insert(Arc::clone(&first)));
        let before = list.snapshot();
        assert!(!list.insert(Arc::clone(&first)));
        assert!(list.insert(Arc::new(2)));
        assert_eq!(before.len(), 1);
        assert_eq!(list.len(), 2);
    }
}
