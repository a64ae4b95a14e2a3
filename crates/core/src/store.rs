//! # Persistence Store
//!
//! The seam to conversational persistence. The orchestrator reads reply
//! context and writes agent posts and final artifacts through the
//! [`Store`] trait; it never owns schema decisions beyond its own two
//! tables in the SQLite adapter.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// A persisted conversation post
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub parent_id: Option<String>,
    /// Agent identity (or user handle) that authored the post
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A post to be created
#[derive(Debug, Clone)]
pub struct NewPost {
    pub parent_id: Option<String>,
    pub author: String,
    pub content: String,
}

/// An artifact to be created (e.g. a synthesized document)
#[derive(Debug, Clone)]
pub struct NewArtifact {
    /// Artifact type tag, e.g. "document" or "synthesis"
    pub kind: String,
    pub title: String,
    pub content: String,
    /// Post the artifact was derived from
    pub post_id: Option<String>,
}

/// Conversational persistence consumed by the orchestrator
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_post(&self, post: NewPost) -> Result<Post>;
    async fn get_replies(&self, parent_id: &str) -> Result<Vec<Post>>;
    /// Persist an artifact, returning its id
    async fn create_artifact(&self, artifact: NewArtifact) -> Result<String>;
}

fn next_id(prefix: &str) -> String {
    format!("{}-{:x}", prefix, Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

/// In-memory store double for tests and offline demos
#[derive(Default)]
pub struct MemoryStore {
    posts: Mutex<Vec<Post>>,
    artifacts: Mutex<Vec<(String, NewArtifact)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all persisted posts
    pub fn posts(&self) -> Vec<Post> {
        self.posts.lock().unwrap().clone()
    }

    /// Ids of all persisted artifacts
    pub fn artifact_ids(&self) -> Vec<String> {
        self.artifacts
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Look up a persisted artifact by id
    pub fn artifact(&self, id: &str) -> Option<NewArtifact> {
        self.artifacts
            .lock()
            .unwrap()
            .iter()
            .find(|(aid, _)| aid == id)
            .map(|(_, a)| a.clone())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_post(&self, post: NewPost) -> Result<Post> {
        let created = Post {
            id: next_id("post"),
            parent_id: post.parent_id,
            author: post.author,
            content: post.content,
            created_at: Utc::now(),
        };
        self.posts.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn get_replies(&self, parent_id: &str) -> Result<Vec<Post>> {
        Ok(self
            .posts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect())
    }

    async fn create_artifact(&self, artifact: NewArtifact) -> Result<String> {
        let id = next_id("artifact");
        self.artifacts.lock().unwrap().push((id.clone(), artifact));
        Ok(id)
    }
}

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// SQLite-backed store
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the store database at the given path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(path.as_ref()).context("Failed to open symposium database")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.run_migrations()?;
        Ok(store)
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            conn.execute(
                r#"
                CREATE TABLE IF NOT EXISTS posts (
                    id TEXT PRIMARY KEY,
                    parent_id TEXT,
                    author TEXT NOT NULL,
                    content TEXT NOT NULL,
                    created_at TEXT NOT NULL
                )
                "#,
                [],
            )?;
            conn.execute(
                r#"
                CREATE TABLE IF NOT EXISTS artifacts (
                    id TEXT PRIMARY KEY,
                    kind TEXT NOT NULL,
                    title TEXT NOT NULL,
                    content TEXT NOT NULL,
                    post_id TEXT,
                    created_at TEXT NOT NULL
                )
                "#,
                [],
            )?;
            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_posts_parent ON posts(parent_id)",
                [],
            )?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [1],
            )?;
        }

        tracing::debug!("SqliteStore ready at schema version {}", SCHEMA_VERSION);
        Ok(())
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_post(&self, post: NewPost) -> Result<Post> {
        let created = Post {
            id: next_id("post"),
            parent_id: post.parent_id,
            author: post.author,
            content: post.content,
            created_at: Utc::now(),
        };

        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        conn.execute(
            "INSERT INTO posts (id, parent_id, author, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                created.id,
                created.parent_id,
                created.author,
                created.content,
                created.created_at.to_rfc3339()
            ],
        )?;

        Ok(created)
    }

    async fn get_replies(&self, parent_id: &str) -> Result<Vec<Post>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT id, parent_id, author, content, created_at FROM posts WHERE parent_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![parent_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut posts = Vec::new();
        for row in rows {
            let (id, parent_id, author, content, created_at) = row?;
            posts.push(Post {
                id,
                parent_id,
                author,
                content,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            });
        }
        Ok(posts)
    }

    async fn create_artifact(&self, artifact: NewArtifact) -> Result<String> {
        let id = next_id("artifact");
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
        conn.execute(
            "INSERT INTO artifacts (id, kind, title, content, post_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                artifact.kind,
                artifact.title,
                artifact.content,
                artifact.post_id,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_replies() {
        let store = MemoryStore::new();
        let root = store
            .create_post(NewPost {
                parent_id: None,
                author: "user".to_string(),
                content: "topic".to_string(),
            })
            .await
            .unwrap();

        store
            .create_post(NewPost {
                parent_id: Some(root.id.clone()),
                author: "TechAnalyst".to_string(),
                content: "a reply".to_string(),
            })
            .await
            .unwrap();

        let replies = store.get_replies(&root.id).await.unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].author, "TechAnalyst");
    }

    #[tokio::test]
    async fn test_sqlite_store_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let root = store
            .create_post(NewPost {
                parent_id: None,
                author: "user".to_string(),
                content: "topic".to_string(),
            })
            .await
            .unwrap();
        store
            .create_post(NewPost {
                parent_id: Some(root.id.clone()),
                author: "agent".to_string(),
                content: "reply".to_string(),
            })
            .await
            .unwrap();

        let replies = store.get_replies(&root.id).await.unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].content, "reply");

        let artifact_id = store
            .create_artifact(NewArtifact {
                kind: "document".to_string(),
                title: "Findings".to_string(),
                content: "# Findings".to_string(),
                post_id: Some(root.id),
            })
            .await
            .unwrap();
        assert!(artifact_id.starts_with("artifact-"));
    }

    #[test]
    fn test_sqlite_migrations_idempotent() {
        // Open twice against the same file - second open must not fail
        let dir = std::env::temp_dir().join("symposium_store_test");
        let path = dir.join("store.db");
        let _ = std::fs::remove_file(&path);

        let first = SqliteStore::open_at(&path).unwrap();
        drop(first);
        let _second = SqliteStore::open_at(&path).unwrap();

        let _ = std::fs::remove_file(&path);
    }
}
