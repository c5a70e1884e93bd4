//! Durable thread/message log on SQLite.
//!
//! Threads are created lazily on first message. Messages are immutable once
//! written and ordered by creation time within a thread (insertion order
//! breaks millisecond ties).

use serde::Serialize;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::Result;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Bot => "bot",
        }
    }

    fn from_db(s: &str) -> Sender {
        if s == "bot" {
            Sender::Bot
        } else {
            Sender::User
        }
    }
}

/// One sender/text pair from a thread's history.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub sender: Sender,
    pub text: String,
}

/// A thread as shown in the conversation list; the title is the text of the
/// thread's most recent message.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadSummary {
    pub id: String,
    pub title: String,
}

/// Append-only conversation store shared by the chat flow and the HTTP layer.
#[derive(Clone)]
pub struct ConversationStore {
    pool: SqlitePool,
}

impl ConversationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the thread if absent. Idempotent on `thread_id`.
    pub async fn get_or_create_thread(&self, thread_id: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        sqlx::query("INSERT OR IGNORE INTO threads (id, created_at) VALUES (?, ?)")
            .bind(thread_id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn append_message(
        &self,
        thread_id: &str,
        sender: Sender,
        text: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        sqlx::query(
            "INSERT INTO messages (id, thread_id, sender, text, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(thread_id)
        .bind(sender.as_str())
        .bind(text)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Messages for a thread in chronological order.
    pub async fn list_messages(
        &self,
        thread_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT sender, text FROM messages
            WHERE thread_id = ?
            ORDER BY created_at, rowid
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(thread_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let sender: String = row.get("sender");
                HistoryEntry {
                    sender: Sender::from_db(&sender),
                    text: row.get("text"),
                }
            })
            .collect())
    }

    /// All threads that have at least one message, most recently active
    /// first, each titled by its latest message's text.
    pub async fn list_threads_with_latest_title(&self) -> Result<Vec<ThreadSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT thread_id, text FROM messages
            WHERE rowid IN (SELECT MAX(rowid) FROM messages GROUP BY thread_id)
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ThreadSummary {
                id: row.get("thread_id"),
                title: row.get("text"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;

    async fn memory_store() -> ConversationStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        ConversationStore::new(pool)
    }

    #[tokio::test]
    async fn get_or_create_thread_is_idempotent() {
        let store = memory_store().await;
        store.get_or_create_thread("t1").await.unwrap();
        store.get_or_create_thread("t1").await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM threads WHERE id = 't1'")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn history_is_chronological() {
        let store = memory_store().await;
        store.get_or_create_thread("t1").await.unwrap();
        store.append_message("t1", Sender::User, "hello").await.unwrap();
        store.append_message("t1", Sender::Bot, "hi there").await.unwrap();
        store.append_message("t1", Sender::User, "how?").await.unwrap();

        let history = store.list_messages("t1", 50, 0).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].sender, Sender::User);
        assert_eq!(history[0].text, "hello");
        assert_eq!(history[1].sender, Sender::Bot);
        assert_eq!(history[2].text, "how?");
    }

    #[tokio::test]
    async fn history_respects_limit_and_offset() {
        let store = memory_store().await;
        store.get_or_create_thread("t1").await.unwrap();
        for i in 0..5 {
            store
                .append_message("t1", Sender::User, &format!("m{}", i))
                .await
                .unwrap();
        }

        let page = store.list_messages("t1", 2, 1).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].text, "m1");
        assert_eq!(page[1].text, "m2");
    }

    #[tokio::test]
    async fn threads_listed_latest_first_with_latest_text_as_title() {
        let store = memory_store().await;
        store.get_or_create_thread("a").await.unwrap();
        store.get_or_create_thread("b").await.unwrap();
        store.append_message("a", Sender::User, "first in a").await.unwrap();
        store.append_message("b", Sender::User, "first in b").await.unwrap();
        store.append_message("a", Sender::Bot, "latest in a").await.unwrap();

        let threads = store.list_threads_with_latest_title().await.unwrap();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].id, "a");
        assert_eq!(threads[0].title, "latest in a");
        assert_eq!(threads[1].id, "b");
        assert_eq!(threads[1].title, "first in b");
    }
}
