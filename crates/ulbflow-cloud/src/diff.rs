//! Set diffing between two declarations
//!
//! The diff is keyed by a caller-supplied function so the same engine works
//! for any collection with a natural identity. For attachments the key is the
//! member id: a port or enabled change on an existing id is an in-place change,
//! never a remove + add pair.

use crate::model::{AttachmentSet, Member};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;

/// An element present on both sides whose value changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change<T> {
    pub before: T,
    pub after: T,
}

/// Partition of two collections by key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff<T> {
    pub added: Vec<T>,
    pub removed: Vec<T>,
    pub changed: Vec<Change<T>>,
    pub unchanged: Vec<T>,
}

/// Diff of two attachment sets
pub type DiffResult = Diff<Member>;

impl<T> Default for Diff<T> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            removed: Vec::new(),
            changed: Vec::new(),
            unchanged: Vec::new(),
        }
    }
}

impl<T> Diff<T> {
    /// True when applying this diff needs no remote call
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.added.len() + self.removed.len() + self.changed.len()
    }

    /// New-side values of the changed bucket
    pub fn changed_after(&self) -> impl Iterator<Item = &T> {
        self.changed.iter().map(|c| &c.after)
    }

    /// Everything the new side declares: added, changed and unchanged
    pub fn desired(&self) -> impl Iterator<Item = &T> {
        self.added
            .iter()
            .chain(self.changed_after())
            .chain(self.unchanged.iter())
    }
}

/// Diff `old` against `new` using `key` as identity.
///
/// Output order follows the input: added/changed/unchanged in `new` order,
/// removed in `old` order. When a key repeats inside one side the last
/// occurrence wins.
pub fn diff_by<T, K, F>(old: &[T], new: &[T], key: F) -> Diff<T>
where
    T: Clone + PartialEq,
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let old_index: HashMap<K, usize> = old.iter().enumerate().map(|(i, v)| (key(v), i)).collect();
    let new_index: HashMap<K, usize> = new.iter().enumerate().map(|(i, v)| (key(v), i)).collect();

    let mut result = Diff::default();

    for (i, item) in new.iter().enumerate() {
        let k = key(item);
        if new_index.get(&k) != Some(&i) {
            continue;
        }
        match old_index.get(&k) {
            None => result.added.push(item.clone()),
            Some(&j) if old[j] == *item => result.unchanged.push(item.clone()),
            Some(&j) => result.changed.push(Change {
                before: old[j].clone(),
                after: item.clone(),
            }),
        }
    }

    for (i, item) in old.iter().enumerate() {
        let k = key(item);
        if old_index.get(&k) != Some(&i) {
            continue;
        }
        if !new_index.contains_key(&k) {
            result.removed.push(item.clone());
        }
    }

    result
}

/// Diff two attachment sets keyed by member id
pub fn diff(old: &AttachmentSet, new: &AttachmentSet) -> DiffResult {
    diff_by(old.members(), new.members(), |m| m.id.clone())
}
