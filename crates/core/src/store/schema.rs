/// Schema bootstrap, applied idempotently every time `DurableStore::open` is
/// called: one `execute_batch` call with `CREATE TABLE IF NOT EXISTS` +
/// explicit indices, in WAL mode since the store has concurrent readers from
/// HTTP handlers while a worker writes.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS category (
    category_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    upstream_url TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS book (
    book_id TEXT PRIMARY KEY,
    public_id TEXT NOT NULL,
    category_id TEXT,
    name TEXT NOT NULL,
    author TEXT NOT NULL,
    book_type TEXT NOT NULL,
    status TEXT NOT NULL,
    update_date TEXT,
    description TEXT NOT NULL,
    bookmark_count INTEGER NOT NULL DEFAULT 0,
    view_count INTEGER NOT NULL DEFAULT 0,
    last_chapter_number INTEGER NOT NULL DEFAULT 0,
    last_chapter_title TEXT,
    last_chapter_url TEXT
);

CREATE INDEX IF NOT EXISTS idx_book_status ON book(status);
CREATE INDEX IF NOT EXISTS idx_book_category ON book(category_id);

CREATE TABLE IF NOT EXISTS chapter (
    book_id TEXT NOT NULL,
    number INTEGER NOT NULL,
    title TEXT NOT NULL,
    upstream_url TEXT NOT NULL,
    public_id TEXT,
    PRIMARY KEY (book_id, number)
);

CREATE INDEX IF NOT EXISTS idx_chapter_book_number ON chapter(book_id, number);

CREATE TABLE IF NOT EXISTS chapter_content (
    book_id TEXT NOT NULL,
    chapter_key TEXT NOT NULL,
    text TEXT NOT NULL,
    fetched_at TEXT NOT NULL,
    PRIMARY KEY (book_id, chapter_key)
);

CREATE TABLE IF NOT EXISTS sync_queue (
    book_id TEXT PRIMARY KEY,
    added_at TEXT NOT NULL,
    accessed_at TEXT NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,
    priority INTEGER NOT NULL DEFAULT 0,
    last_attempt TEXT,
    status TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_status ON sync_queue(status);
CREATE INDEX IF NOT EXISTS idx_sync_queue_accessed ON sync_queue(accessed_at);
";
