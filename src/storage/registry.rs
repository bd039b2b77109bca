//! The topic registry: discovers topics on startup, creates them on demand,
//! and owns every [`Topic`] for the life of the process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::fs;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::storage::Topic;

/// Maps topic names to their open [`Topic`] instances.
///
/// The registry guard is held only for map reads and writes, never across a
/// topic's own file operations, so it does not serialize appends or reads on
/// different topics. The one exception is topic construction: `get_or_create`
/// keeps the write guard across `Topic::open` so that two concurrent calls
/// for a fresh name observe exactly one construction and one directory.
pub struct TopicRegistry {
    base_dir: PathBuf,
    topics: RwLock<HashMap<String, Arc<Topic>>>,
}

impl TopicRegistry {
    /// Open a registry rooted at `base_dir`, creating the directory if needed
    /// and loading every topic found in it.
    ///
    /// A topic that fails to open is logged and skipped; the registry still
    /// comes up with the remaining topics.
    pub async fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();

        match fs::metadata(&base_dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(Error::InvalidArgument(format!(
                    "base path {} exists but is not a directory",
                    base_dir.display()
                )));
            }
            Err(_) => fs::create_dir_all(&base_dir).await?,
        }

        let mut topics = HashMap::new();
        let mut entries = fs::read_dir(&base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if !file_type.is_dir() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                warn!(path = %entry.path().display(), "skipping non-UTF-8 topic directory");
                continue;
            };
            match Topic::open(&name, entry.path(), false).await {
                Ok(topic) => {
                    topics.insert(name, Arc::new(topic));
                }
                Err(e) => {
                    warn!(topic = %name, error = %e, "failed to load topic; skipping");
                }
            }
        }

        info!(
            base_dir = %base_dir.display(),
            topics = topics.len(),
            "topic registry loaded"
        );

        Ok(Self {
            base_dir,
            topics: RwLock::new(topics),
        })
    }

    /// Look up an existing topic.
    pub async fn get(&self, name: &str) -> Option<Arc<Topic>> {
        self.topics.read().await.get(name).cloned()
    }

    /// Look up a topic, creating it if it does not exist.
    pub async fn get_or_create(&self, name: &str) -> Result<Arc<Topic>> {
        if let Some(topic) = self.topics.read().await.get(name) {
            return Ok(topic.clone());
        }

        let mut topics = self.topics.write().await;
        // Another task may have created it between the guards.
        if let Some(topic) = topics.get(name) {
            return Ok(topic.clone());
        }

        info!(topic = %name, "creating topic");
        let topic = Arc::new(Topic::open(name, self.base_dir.join(name), true).await?);
        topics.insert(name.to_string(), topic.clone());
        Ok(topic)
    }

    /// Create a topic if missing; `true` on success (including already
    /// existing).
    pub async fn create(&self, name: &str) -> Result<bool> {
        self.get_or_create(name).await.map(|_| true)
    }

    /// Snapshot of the current topic names, sorted for determinism.
    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.topics.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.topics.read().await.is_empty()
    }

    /// Flush every topic's writers; used at shutdown.
    pub async fn flush_all(&self) -> Result<()> {
        let topics: Vec<Arc<Topic>> = self.topics.read().await.values().cloned().collect();
        for topic in topics {
            topic.flush().await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for TopicRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicRegistry")
            .field("base_dir", &self.base_dir)
            .finish_non_exhaustive()
    }
}
