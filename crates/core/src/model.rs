use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

opaque_id!(CategoryId);
opaque_id!(BookId);
opaque_id!(PublicId);

/// Canonical book status. The upstream's raw status string is normalized to
/// this enum at the `ResponseParser` boundary so the core never has to
/// reason about locale variants of "completed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookStatus {
    Ongoing,
    Completed,
    Hiatus,
    Unknown,
}

impl BookStatus {
    pub fn is_completed(self) -> bool {
        matches!(self, BookStatus::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookStatus::Ongoing => "ongoing",
            BookStatus::Completed => "completed",
            BookStatus::Hiatus => "hiatus",
            BookStatus::Unknown => "unknown",
        }
    }

    /// Normalizes a raw upstream status token to the canonical enum.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "completed" | "complete" | "finished" | "end" | "ended" => BookStatus::Completed,
            "hiatus" | "paused" | "on hold" | "on_hold" => BookStatus::Hiatus,
            "ongoing" | "active" | "updating" | "in progress" | "in_progress" => {
                BookStatus::Ongoing
            }
            _ => BookStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub category_id: CategoryId,
    pub name: String,
    pub upstream_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub book_id: BookId,
    pub public_id: PublicId,
    pub name: String,
    pub author: String,
    pub book_type: String,
    pub status: BookStatus,
    pub update_date: Option<chrono::DateTime<chrono::Utc>>,
    pub description: String,
    pub bookmark_count: i64,
    pub view_count: i64,
    pub last_chapter_number: i64,
    pub last_chapter_title: Option<String>,
    pub last_chapter_url: Option<String>,
}

impl Book {
    pub fn new_stub(book_id: BookId, public_id: PublicId) -> Self {
        Self {
            book_id,
            public_id,
            name: String::new(),
            author: String::new(),
            book_type: String::new(),
            status: BookStatus::Unknown,
            update_date: None,
            description: String::new(),
            bookmark_count: 0,
            view_count: 0,
            last_chapter_number: 0,
            last_chapter_title: None,
            last_chapter_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub book_id: BookId,
    pub number: i64,
    pub title: String,
    pub upstream_url: String,
    pub public_id: Option<PublicId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterContent {
    pub book_id: BookId,
    /// A chapter is addressed by either its number or a separate public key
    /// depending on what the caller has on hand; callers canonicalize to a
    /// string key before reaching the store (see `cache_manager::chapter_content_key`).
    pub chapter_key: String,
    pub text: String,
    pub fetched_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Syncing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Syncing => "syncing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "syncing" => QueueStatus::Syncing,
            "completed" => QueueStatus::Completed,
            "failed" => QueueStatus::Failed,
            _ => QueueStatus::Pending,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncQueueEntry {
    pub book_id: BookId,
    pub added_at: chrono::DateTime<chrono::Utc>,
    pub accessed_at: chrono::DateTime<chrono::Utc>,
    pub access_count: i64,
    pub priority: i64,
    pub last_attempt: Option<chrono::DateTime<chrono::Utc>>,
    pub status: QueueStatus,
}

/// Default priority for a user-triggered access.
pub const PRIORITY_USER_ACCESS: i64 = 0;
/// Priority floor for a manual force-resync trigger.
pub const PRIORITY_MANUAL_TRIGGER: i64 = 10;
/// Priority used by the nightly auto-enqueue pass.
pub const PRIORITY_NIGHTLY: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Active,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: u64,
    pub book_id: BookId,
    pub priority: i64,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub state: JobState,
    pub error: Option<String>,
}
