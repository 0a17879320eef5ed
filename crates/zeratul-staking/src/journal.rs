//! Journaled tables
//!
//! Ledger collections remember what each call changed until the call
//! commits or rolls back, so undoing a failed call costs time in what it
//! touched rather than in the size of the ledger.
//!
//! ```text
//!   Table    first touch of a key  ──▶ undo: (key, original row)
//!   History  append / rewrite tail ──▶ undo: (key, old length, old tail)
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{Index, RangeBounds};

/// Ordered map that can restore every row changed since its last commit
pub(crate) struct Table<K, V> {
    rows: BTreeMap<K, V>,
    touched: BTreeSet<K>,
    undo: Vec<(K, Option<V>)>,
}

impl<K: Ord + Clone, V: Clone> Table<K, V> {
    fn touch(&mut self, key: &K) {
        if self.touched.insert(key.clone()) {
            self.undo.push((key.clone(), self.rows.get(key).cloned()));
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.rows.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.rows.contains_key(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        if !self.rows.contains_key(key) {
            return None;
        }
        self.touch(key);
        self.rows.get_mut(key)
    }

    pub fn get_or_default(&mut self, key: K) -> &mut V
    where
        V: Default,
    {
        self.touch(&key);
        self.rows.entry(key).or_default()
    }

    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.touch(&key);
        self.rows.insert(key, value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        if !self.rows.contains_key(key) {
            return None;
        }
        self.touch(key);
        self.rows.remove(key)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) {
        let doomed: Vec<K> = self.rows.iter().filter(|&(k, v)| !keep(k, v)).map(|(k, _)| k.clone()).collect();
        for key in doomed {
            self.remove(&key);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.rows.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.rows.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.rows.values()
    }

    pub fn range<R: RangeBounds<K>>(&self, range: R) -> impl Iterator<Item = (&K, &V)> {
        self.rows.range(range)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows changed since the last commit
    pub fn pending(&self) -> usize {
        self.undo.len()
    }

    pub fn commit(&mut self) {
        self.touched.clear();
        self.undo.clear();
    }

    pub fn rollback(&mut self) {
        while let Some((key, original)) = self.undo.pop() {
            match original {
                Some(row) => self.rows.insert(key, row),
                None => self.rows.remove(&key),
            };
        }
        self.touched.clear();
    }
}

impl<K: Ord, V> Index<&K> for Table<K, V> {
    type Output = V;

    fn index(&self, key: &K) -> &V {
        &self.rows[key]
    }
}

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self { rows: BTreeMap::new(), touched: BTreeSet::new(), undo: Vec::new() }
    }
}

impl<K: Clone, V: Clone> Clone for Table<K, V> {
    fn clone(&self) -> Self {
        Self { rows: self.rows.clone(), touched: BTreeSet::new(), undo: Vec::new() }
    }
}

impl<K: PartialEq, V: PartialEq> PartialEq for Table<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.rows == other.rows
    }
}

impl<K: Eq, V: Eq> Eq for Table<K, V> {}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for Table<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.rows.fmt(f)
    }
}

impl<K: Serialize, V: Serialize> Serialize for Table<K, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.rows.serialize(serializer)
    }
}

impl<'de, K: Deserialize<'de> + Ord, V: Deserialize<'de>> Deserialize<'de> for Table<K, V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let rows = BTreeMap::deserialize(deserializer)?;
        Ok(Self { rows, touched: BTreeSet::new(), undo: Vec::new() })
    }
}

/// Append-only sequences per key
///
/// Only the tail is ever rewritten, so undo truncates to the committed
/// length and puts the old tail back.
pub(crate) struct History<K, T> {
    rows: BTreeMap<K, Vec<T>>,
    undo: Vec<(K, usize, Option<T>)>,
}

impl<K: Ord + Clone, T: Clone> History<K, T> {
    pub fn get(&self, key: &K) -> &[T] {
        self.rows.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn push(&mut self, key: K, item: T) {
        let seq = self.rows.entry(key.clone()).or_default();
        self.undo.push((key, seq.len(), None));
        seq.push(item);
    }

    /// Append `item`, or overwrite the tail when `same_slot` says both
    /// describe the same instant
    pub fn record(&mut self, key: K, item: T, same_slot: impl Fn(&T, &T) -> bool) {
        let seq = self.rows.entry(key.clone()).or_default();
        let len = seq.len();
        match seq.last_mut() {
            Some(last) if same_slot(last, &item) => {
                self.undo.push((key, len, Some(last.clone())));
                *last = item;
            }
            _ => {
                self.undo.push((key, len, None));
                seq.push(item);
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.undo.len()
    }

    pub fn commit(&mut self) {
        self.undo.clear();
    }

    pub fn rollback(&mut self) {
        while let Some((key, len, tail)) = self.undo.pop() {
            let Some(seq) = self.rows.get_mut(&key) else {
                continue;
            };
            seq.truncate(len);
            if let (Some(tail), Some(slot)) = (tail, seq.last_mut()) {
                *slot = tail;
            }
            if seq.is_empty() {
                self.rows.remove(&key);
            }
        }
    }
}

impl<K, T> Default for History<K, T> {
    fn default() -> Self {
        Self { rows: BTreeMap::new(), undo: Vec::new() }
    }
}

impl<K: Clone, T: Clone> Clone for History<K, T> {
    fn clone(&self) -> Self {
        Self { rows: self.rows.clone(), undo: Vec::new() }
    }
}

impl<K: PartialEq, T: PartialEq> PartialEq for History<K, T> {
    fn eq(&self, other: &Self) -> bool {
        self.rows == other.rows
    }
}

impl<K: Eq, T: Eq> Eq for History<K, T> {}

impl<K: fmt::Debug, T: fmt::Debug> fmt::Debug for History<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.rows.fmt(f)
    }
}

impl<K: Serialize, T: Serialize> Serialize for History<K, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.rows.serialize(serializer)
    }
}

impl<'de, K: Deserialize<'de> + Ord, T: Deserialize<'de>> Deserialize<'de> for History<K, T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let rows = BTreeMap::deserialize(deserializer)?;
        Ok(Self { rows, undo: Vec::new() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_rollback_restores_first_value() {
        let mut t: Table<u8, u32> = Table::default();
        t.insert(1, 10);
        t.insert(2, 20);
        t.commit();

        *t.get_mut(&1).unwrap() += 5;
        t.insert(1, 99);
        t.remove(&2);
        t.insert(3, 30);
        *t.get_or_default(4) += 1;
        assert_eq!(t.pending(), 4);

        t.rollback();
        assert_eq!(t.iter().map(|(k, v)| (*k, *v)).collect::<Vec<_>>(), vec![(1, 10), (2, 20)]);
        assert_eq!(t.pending(), 0);
    }

    #[test]
    fn test_table_commit_keeps_changes() {
        let mut t: Table<u8, u32> = Table::default();
        t.insert(1, 10);
        t.retain(|_, v| *v > 10);
        t.insert(2, 20);
        t.commit();
        t.rollback();
        assert_eq!(t.get(&1), None);
        assert_eq!(t.get(&2), Some(&20));
    }

    #[test]
    fn test_reads_and_missing_keys_are_not_journaled() {
        let mut t: Table<u8, u32> = Table::default();
        assert!(t.get_mut(&1).is_none());
        assert!(t.remove(&1).is_none());
        assert_eq!(t.get(&1), None);
        assert_eq!(t.pending(), 0);
    }

    #[test]
    fn test_history_rollback_truncates_and_restores_tail() {
        let mut h: History<u8, (u64, u32)> = History::default();
        h.push(1, (0, 1));
        h.push(1, (5, 2));
        h.commit();

        let same = |a: &(u64, u32), b: &(u64, u32)| a.0 == b.0;
        h.record(1, (5, 3), same);
        h.record(1, (9, 4), same);
        h.record(2, (9, 7), same);
        assert_eq!(h.get(&1), &[(0, 1), (5, 3), (9, 4)]);

        h.rollback();
        assert_eq!(h.get(&1), &[(0, 1), (5, 2)]);
        assert!(h.get(&2).is_empty());
    }

    #[test]
    fn test_clone_drops_journal() {
        let mut t: Table<u8, u32> = Table::default();
        t.insert(1, 1);
        let copy = t.clone();
        assert_eq!(copy.pending(), 0);
        assert_eq!(copy, t);
    }
}
