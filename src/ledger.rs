//! Durable record of handled message ids.

use crate::error::{FailureKind, PersistenceError};
use crate::notify::{Alert, Notifier};
use crate::types::MessageId;
use log::{debug, info, warn};
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::PathBuf;

/// Set of opaque ids persisted as a JSON array after every insertion.
///
/// Ids are kept in insertion order so an optional cap can drop the oldest.
#[derive(Debug)]
pub struct PersistedSet {
    path: PathBuf,
    members: HashSet<MessageId>,
    order: VecDeque<MessageId>,
    cap: Option<usize>,
}

impl PersistedSet {
    /// Load from `path`. A missing, truncated or otherwise corrupt file
    /// yields an empty set.
    pub fn load(path: impl Into<PathBuf>, cap: Option<usize>) -> Self {
        let path = path.into();
        let ids: Vec<MessageId> = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!("ledger {} is corrupt, starting empty: {}", path.display(), e);
                Vec::new()
            }),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("ledger {} unreadable, starting empty: {}", path.display(), e);
                }
                Vec::new()
            }
        };

        let mut set = Self {
            path,
            members: HashSet::with_capacity(ids.len()),
            order: VecDeque::with_capacity(ids.len()),
            cap,
        };
        for id in ids {
            if set.members.insert(id.clone()) {
                set.order.push_back(id);
            }
        }
        set.evict_overflow();
        info!(
            "ledger {} loaded with {} id(s)",
            set.path.display(),
            set.len()
        );
        set
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.members.contains(id)
    }

    /// Insert in memory. Returns false if already present.
    pub fn insert(&mut self, id: MessageId) -> bool {
        if !self.members.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id);
        self.evict_overflow();
        true
    }

    /// Rewrite the whole file. No temp file or rename: a crash mid-write
    /// leaves a file that the next `load` treats as empty.
    pub fn save(&self) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec(&self.order).map_err(|source| PersistenceError::Encode {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, bytes).map_err(|source| PersistenceError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn evict_overflow(&mut self) {
        let Some(cap) = self.cap else {
            return;
        };
        while self.order.len() > cap {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }
}

pub struct MessageLedger {
    ids: PersistedSet,
    notifier: Notifier,
}

impl MessageLedger {
    pub fn new(ids: PersistedSet, notifier: Notifier) -> Self {
        Self { ids, notifier }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns whether `id` had already been processed. An unseen id is
    /// recorded and saved before returning so a crash right after cannot
    /// cause it to be handled again.
    pub fn check_and_mark(&mut self, id: &MessageId) -> bool {
        if self.ids.contains(id) {
            debug!("message {} already processed", id);
            return true;
        }
        self.ids.insert(id.clone());
        if let Err(e) = self.ids.save() {
            warn!("failed to persist ledger: {}", e);
            self.notifier.notify(Alert::new(
                FailureKind::FileError,
                format!("Error saving processed message IDs: {}", e),
            ));
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn ledger_at(path: &Path) -> MessageLedger {
        MessageLedger::new(PersistedSet::load(path, None), Notifier::disabled())
    }

    #[test]
    fn check_and_mark_is_idempotent_across_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("processed_message_ids.json");
        let id = MessageId::from(1392837025354219571u64);

        let mut ledger = ledger_at(&path);
        assert!(!ledger.check_and_mark(&id));
        assert!(ledger.check_and_mark(&id));
        drop(ledger);

        let mut reloaded = ledger_at(&path);
        assert!(reloaded.check_and_mark(&id));
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn loads_numeric_ids_written_by_older_builds() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ids.json");
        fs::write(&path, "[101, 102, \"103\"]").unwrap();
        let mut ledger = ledger_at(&path);
        assert!(ledger.check_and_mark(&MessageId::from("101")));
        assert!(ledger.check_and_mark(&MessageId::from(103u64)));
        assert!(!ledger.check_and_mark(&MessageId::from("104")));
    }

    #[test]
    fn truncated_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ids.json");
        fs::write(&path, "[\"1\", \"2").unwrap();
        let set = PersistedSet::load(&path, None);
        assert!(set.is_empty());
    }

    #[test]
    fn cap_drops_oldest_ids() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ids.json");
        let mut set = PersistedSet::load(&path, Some(2));
        for n in 1..=3u64 {
            set.insert(MessageId::from(n));
        }
        set.save().unwrap();
        assert!(!set.contains(&MessageId::from(1u64)));
        assert!(set.contains(&MessageId::from(3u64)));

        let reloaded = PersistedSet::load(&path, Some(2));
        assert_eq!(reloaded.len(), 2);
    }

    #[tokio::test]
    async fn save_failure_alerts_but_still_marks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("no/such/dir/ids.json");
        let (notifier, mut rx) = Notifier::channel();
        let mut ledger = MessageLedger::new(PersistedSet::load(&path, None), notifier);
        let id = MessageId::from("42");
        assert!(!ledger.check_and_mark(&id));
        assert!(ledger.check_and_mark(&id));
        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.kind, FailureKind::FileError);
        assert!(rx.try_recv().is_err());
    }
}
