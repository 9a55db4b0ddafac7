//! Inverted index from label to the sessions carrying it.
//!
//! Derived entirely from session label sets; every mutation flows through
//! the store's atomic-update path, which applies the delta here while still
//! holding the session's lock. Counts and reverse lookups never scan the
//! session table.

use std::collections::{BTreeSet, HashMap, HashSet};

use parking_lot::RwLock;

#[derive(Debug, Default)]
pub(crate) struct LabelIndex {
    inner: RwLock<HashMap<String, HashSet<String>>>,
}

impl LabelIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Apply the symmetric difference between a session's previous and new
    /// label sets. Only the delta touches the index; unchanged labels cost
    /// nothing.
    pub(crate) fn sync(&self, session_id: &str, old: &BTreeSet<String>, new: &BTreeSet<String>) {
        if old == new {
            return;
        }
        let mut index = self.inner.write();
        for added in new.difference(old) {
            index
                .entry(added.clone())
                .or_default()
                .insert(session_id.to_string());
        }
        for dropped in old.difference(new) {
            if let Some(ids) = index.get_mut(dropped) {
                ids.remove(session_id);
                if ids.is_empty() {
                    index.remove(dropped);
                }
            }
        }
    }

    /// Register a session's full label set (snapshot load path).
    pub(crate) fn insert_session(&self, session_id: &str, labels: &BTreeSet<String>) {
        if labels.is_empty() {
            return;
        }
        let mut index = self.inner.write();
        for label in labels {
            index
                .entry(label.clone())
                .or_default()
                .insert(session_id.to_string());
        }
    }

    /// Drop every contribution a session made to the index (eviction path).
    pub(crate) fn remove_session(&self, session_id: &str, labels: &BTreeSet<String>) {
        if labels.is_empty() {
            return;
        }
        let mut index = self.inner.write();
        for label in labels {
            if let Some(ids) = index.get_mut(label) {
                ids.remove(session_id);
                if ids.is_empty() {
                    index.remove(label);
                }
            }
        }
    }

    pub(crate) fn all_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.inner.read().keys().cloned().collect();
        labels.sort();
        labels
    }

    pub(crate) fn counts(&self) -> HashMap<String, usize> {
        self.inner
            .read()
            .iter()
            .map(|(label, ids)| (label.clone(), ids.len()))
            .collect()
    }

    pub(crate) fn sessions_with(&self, label: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .read()
            .get(label)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(labels: &[&str]) -> BTreeSet<String> {
        labels.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn sync_applies_only_the_delta() {
        let index = LabelIndex::new();
        index.sync("s1", &set(&[]), &set(&["prod", "team-a"]));
        index.sync("s1", &set(&["prod", "team-a"]), &set(&["prod", "team-b"]));

        assert_eq!(index.all_labels(), vec!["prod", "team-b"]);
        assert_eq!(index.sessions_with("team-a"), Vec::<String>::new());
        assert_eq!(index.sessions_with("team-b"), vec!["s1"]);
    }

    #[test]
    fn counts_reflect_cardinality_across_sessions() {
        let index = LabelIndex::new();
        index.sync("s1", &set(&[]), &set(&["prod"]));
        index.sync("s2", &set(&[]), &set(&["prod"]));
        index.sync("s1", &set(&["prod"]), &set(&[]));

        assert_eq!(index.counts().get("prod"), Some(&1));
        assert_eq!(index.sessions_with("prod"), vec!["s2"]);
    }

    #[test]
    fn removing_last_holder_drops_the_label() {
        let index = LabelIndex::new();
        index.insert_session("s1", &set(&["prod"]));
        index.remove_session("s1", &set(&["prod"]));
        assert!(index.all_labels().is_empty());
        assert!(index.counts().is_empty());
    }
}
