use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;

/// Associative container kept sorted by a caller-supplied order key.
///
/// Entries are ordered by `(order_key(value), key)`, so equal order keys are
/// broken by the entry key and iteration order is a strict total order.
/// Point lookups go through a hash map; insert and delete are O(log n).
pub struct OrderedIndex<K, V, S> {
    order_key: fn(&V) -> S,
    entries: HashMap<K, V>,
    order: BTreeSet<(S, K)>,
}

impl<K, V, S> OrderedIndex<K, V, S>
where
    K: Ord + Hash + Clone,
    S: Ord + Clone,
{
    pub fn new(order_key: fn(&V) -> S) -> Self {
        Self {
            order_key,
            entries: HashMap::new(),
            order: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Insert or replace. Returns the previous value for `key`, if any.
    pub fn set(&mut self, key: K, value: V) -> Option<V> {
        let new_order = (self.order_key)(&value);

        if let Some(existing) = self.entries.get(&key) {
            let old_order = (self.order_key)(existing);
            if old_order != new_order {
                self.order.remove(&(old_order, key.clone()));
                self.order.insert((new_order, key.clone()));
            }
        } else {
            self.order.insert((new_order, key.clone()));
        }

        self.entries.insert(key, value)
    }

    /// Remove by key. No-op (returns None) if absent.
    pub fn delete(&mut self, key: &K) -> Option<V> {
        let value = self.entries.remove(key)?;
        self.order.remove(&((self.order_key)(&value), key.clone()));
        Some(value)
    }

    /// Remove every entry for which `keep` returns false. Returns how many were removed.
    pub fn retain<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&K, &V) -> bool,
    {
        let doomed: Vec<K> = self
            .entries
            .iter()
            .filter(|&(k, v)| !keep(k, v))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &doomed {
            self.delete(key);
        }

        doomed.len()
    }

    /// Entries in ascending order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&K, &V)> + '_ {
        self.order
            .iter()
            .filter_map(move |(_, key)| self.entries.get_key_value(key))
    }

    pub fn values(&self) -> impl DoubleEndedIterator<Item = &V> + '_ {
        self.iter().map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl DoubleEndedIterator<Item = &K> + '_ {
        self.order.iter().map(|(_, k)| k)
    }

    pub fn first(&self) -> Option<&V> {
        self.values().next()
    }

    pub fn last(&self) -> Option<&V> {
        self.values().next_back()
    }
}

impl<K: Clone, V: Clone, S: Clone> Clone for OrderedIndex<K, V, S> {
    fn clone(&self) -> Self {
        Self {
            order_key: self.order_key,
            entries: self.entries.clone(),
            order: self.order.clone(),
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug, S> fmt::Debug for OrderedIndex<K, V, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedIndex")
            .field("len", &self.entries.len())
            .field("entries", &self.entries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        ts: u64,
        label: &'static str,
    }

    fn by_ts(item: &Item) -> u64 {
        item.ts
    }

    fn index() -> OrderedIndex<String, Item, u64> {
        OrderedIndex::new(by_ts)
    }

    fn labels(idx: &OrderedIndex<String, Item, u64>) -> Vec<&'static str> {
        idx.values().map(|i| i.label).collect()
    }

    #[test]
    fn test_empty_index() {
        let idx = index();
        assert!(idx.is_empty());
        assert_eq!(idx.len(), 0);
        assert!(idx.first().is_none());
        assert!(idx.get(&"x".to_string()).is_none());
    }

    #[test]
    fn test_iterates_in_order_regardless_of_insertion() {
        let mut idx = index();
        idx.set("c".into(), Item { ts: 30, label: "c" });
        idx.set("a".into(), Item { ts: 10, label: "a" });
        idx.set("b".into(), Item { ts: 20, label: "b" });

        assert_eq!(labels(&idx), vec!["a", "b", "c"]);
        assert_eq!(idx.first().map(|i| i.label), Some("a"));
        assert_eq!(idx.last().map(|i| i.label), Some("c"));
    }

    #[test]
    fn test_ties_broken_by_key() {
        let mut idx = index();
        idx.set("zz".into(), Item { ts: 5, label: "zz" });
        idx.set("aa".into(), Item { ts: 5, label: "aa" });
        idx.set("mm".into(), Item { ts: 5, label: "mm" });

        assert_eq!(labels(&idx), vec!["aa", "mm", "zz"]);
    }

    #[test]
    fn test_replace_moves_entry() {
        let mut idx = index();
        idx.set("a".into(), Item { ts: 10, label: "a" });
        idx.set("b".into(), Item { ts: 20, label: "b" });

        let old = idx.set("a".into(), Item { ts: 30, label: "a2" });
        assert_eq!(old.map(|i| i.label), Some("a"));
        assert_eq!(idx.len(), 2);
        assert_eq!(labels(&idx), vec!["b", "a2"]);
    }

    #[test]
    fn test_delete_is_noop_when_absent() {
        let mut idx = index();
        idx.set("a".into(), Item { ts: 10, label: "a" });

        assert!(idx.delete(&"missing".to_string()).is_none());
        assert_eq!(idx.len(), 1);

        assert!(idx.delete(&"a".to_string()).is_some());
        assert!(idx.is_empty());
        assert_eq!(idx.keys().count(), 0);
    }

    #[test]
    fn test_retain_reports_removed() {
        let mut idx = index();
        for (k, ts) in [("a", 1), ("b", 2), ("c", 3), ("d", 4)] {
            idx.set(k.into(), Item { ts, label: k });
        }

        let removed = idx.retain(|_, item| item.ts % 2 == 0);
        assert_eq!(removed, 2);
        assert_eq!(labels(&idx), vec!["b", "d"]);

        assert_eq!(idx.retain(|_, _| true), 0);
    }

    #[test]
    fn test_clone_is_independent() {
        let mut idx = index();
        idx.set("a".into(), Item { ts: 1, label: "a" });
        let snapshot = idx.clone();
        idx.set("b".into(), Item { ts: 2, label: "b" });

        assert_eq!(snapshot.len(), 1);
        assert_eq!(idx.len(), 2);
    }
}
