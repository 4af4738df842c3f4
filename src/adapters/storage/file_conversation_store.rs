//! File-based Conversation Store Adapter
//!
//! One pretty-printed JSON document per conversation, named `<id>.json`.
//! Every write goes to a temporary sibling first and is then renamed over the
//! target, so a reader sees either the old record or the new one.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::domain::conversation::Conversation;
use crate::domain::foundation::ConversationId;
use crate::ports::{stamp_for_save, ConversationStore, StoreError};

const RECORD_EXTENSION: &str = "json";

/// File-based storage for conversations
#[derive(Debug, Clone)]
pub struct FileConversationStore {
    base_path: PathBuf,
    closed: Arc<AtomicBool>,
}

impl FileConversationStore {
    /// Opens a store rooted at `base_path`, creating the directory if needed.
    ///
    /// # Example
    /// ```ignore
    /// let store = FileConversationStore::open("./data/conversations").await?;
    /// ```
    pub async fn open<P: AsRef<Path>>(base_path: P) -> Result<Self, StoreError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).await?;
        tracing::debug!(path = %base_path.display(), "conversation store opened");
        Ok(Self {
            base_path,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn record_path(&self, id: ConversationId) -> PathBuf {
        self.base_path.join(format!("{}.{}", id, RECORD_EXTENSION))
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    async fn read_record(&self, id: ConversationId) -> Result<Conversation, StoreError> {
        let json = match fs::read_to_string(self.record_path(id)).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StoreError::NotFound(id)),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&json)?)
    }

    /// Writes the record through a temp file and an atomic rename.
    async fn write_record(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(conversation)?;
        let target = self.record_path(conversation.id());
        let tmp = self
            .base_path
            .join(format!(".{}.{}.tmp", conversation.id(), Uuid::new_v4().simple()));

        let result = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(json.as_bytes()).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&tmp, &target).await
        }
        .await;

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Paths of committed records.
    async fn record_paths(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut paths = Vec::new();
        let mut entries = fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_record = path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXTENSION)
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with('.'));
            if is_record {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

#[async_trait]
impl ConversationStore for FileConversationStore {
    async fn create(&self, title: Option<String>) -> Result<Conversation, StoreError> {
        self.ensure_open()?;
        let conversation = Conversation::new(title);
        self.write_record(&conversation).await?;
        tracing::info!(conversation_id = %conversation.id(), "conversation created");
        Ok(conversation)
    }

    async fn get(&self, id: ConversationId) -> Result<Conversation, StoreError> {
        self.ensure_open()?;
        self.read_record(id).await
    }

    async fn save(&self, conversation: Conversation) -> Result<Conversation, StoreError> {
        self.ensure_open()?;
        let previous = match self.read_record(conversation.id()).await {
            Ok(previous) => Some(previous),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let stamped = stamp_for_save(conversation, previous.as_ref());
        self.write_record(&stamped).await?;
        tracing::debug!(
            conversation_id = %stamped.id(),
            message_count = stamped.message_count(),
            "conversation saved"
        );
        Ok(stamped)
    }

    async fn delete(&self, id: ConversationId) -> Result<(), StoreError> {
        self.ensure_open()?;
        match fs::remove_file(self.record_path(id)).await {
            Ok(()) => {
                tracing::info!(conversation_id = %id, "conversation deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<Conversation>, StoreError> {
        self.ensure_open()?;
        let mut conversations = Vec::new();
        for path in self.record_paths().await? {
            let json = match fs::read_to_string(&path).await {
                Ok(json) => json,
                // Deleted between listing and reading.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match serde_json::from_str::<Conversation>(&json) {
                Ok(conversation) => conversations.push(conversation),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable conversation record");
                }
            }
        }
        Ok(conversations)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut entries = fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let ours = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == RECORD_EXTENSION || e == "tmp");
            if ours {
                match fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        tracing::info!(path = %self.base_path.display(), "conversation store cleared");
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::conversation::{Message, Topic};
    use tempfile::TempDir;

    async fn open_store() -> (TempDir, FileConversationStore) {
        let dir = TempDir::new().unwrap();
        let store = FileConversationStore::open(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn open_creates_missing_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        FileConversationStore::open(&nested).await.unwrap();
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn create_then_get() {
        let (_dir, store) = open_store().await;
        let created = store.create(Some("Demo".into())).await.unwrap();

        let loaded = store.get(created.id()).await.unwrap();
        assert_eq!(loaded, created);
        assert_eq!(loaded.title(), "Demo");
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let (_dir, store) = open_store().await;
        let id = ConversationId::new();
        assert_eq!(store.get(id).await, Err(StoreError::NotFound(id)));
    }

    #[tokio::test]
    async fn save_recomputes_count_and_keeps_one_record() {
        let (dir, store) = open_store().await;
        let conv = store.create(None).await.unwrap();
        let conv = conv
            .with_message(Message::user("Hi").unwrap())
            .with_message(Message::assistant("Hello!"));

        let first = store.save(conv.clone()).await.unwrap();
        let second = store.save(conv).await.unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(second.message_count(), 2);
        assert!(!second.updated_at().is_before(&first.updated_at()));
        assert_eq!(store.list().await.unwrap().len(), 1);

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn save_of_unknown_id_creates_it() {
        let (_dir, store) = open_store().await;
        let conv = Conversation::new(Some("Imported".into()));
        store.save(conv.clone()).await.unwrap();
        assert_eq!(store.get(conv.id()).await.unwrap().title(), "Imported");
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let (_dir, store) = open_store().await;
        let conv = store.create(None).await.unwrap();

        store.delete(conv.id()).await.unwrap();
        assert!(matches!(store.get(conv.id()).await, Err(StoreError::NotFound(_))));
        assert_eq!(store.delete(conv.id()).await, Err(StoreError::NotFound(conv.id())));
    }

    #[tokio::test]
    async fn list_skips_corrupt_records() {
        let (dir, store) = open_store().await;
        store.create(Some("Good".into())).await.unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title(), "Good");
    }

    #[tokio::test]
    async fn search_and_filters_use_persisted_records() {
        let (_dir, store) = open_store().await;
        let rust = store.create(Some("Rust talk".into())).await.unwrap();
        store
            .save(rust.with_topic(Topic::Skills))
            .await
            .unwrap();
        store.create(Some("Other".into())).await.unwrap();

        assert_eq!(store.search("").await.unwrap().len(), 2);
        assert_eq!(store.search("RUST").await.unwrap().len(), 1);
        assert_eq!(store.search("skills").await.unwrap().len(), 1);
        assert_eq!(store.filter_by_topic(Topic::Skills).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let (_dir, store) = open_store().await;
        store.create(None).await.unwrap();
        store.create(None).await.unwrap();

        store.clear().await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn closed_store_rejects_operations() {
        let (_dir, store) = open_store().await;
        let conv = store.create(None).await.unwrap();
        store.close().await.unwrap();

        assert_eq!(store.get(conv.id()).await, Err(StoreError::Closed));
        assert_eq!(store.list().await, Err(StoreError::Closed));
        assert!(matches!(store.save(conv).await, Err(StoreError::Closed)));
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let (dir, store) = open_store().await;
        let conv = store.create(Some("Persisted".into())).await.unwrap();
        store.close().await.unwrap();

        let reopened = FileConversationStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.get(conv.id()).await.unwrap().title(), "Persisted");
    }
}
