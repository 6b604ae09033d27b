//! `SQLite` schema definitions for herblink.
//!
//! Timestamps are stored as RFC 3339 text with nanosecond precision and a
//! `Z` suffix so that string order matches time order.

/// SQL statement to create the submissions table.
pub const CREATE_SUBMISSIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS submissions (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    local_id TEXT NOT NULL UNIQUE,
    remote_id TEXT,
    herb_name TEXT NOT NULL,
    harvest_date TEXT NOT NULL,
    quantity_kg REAL NOT NULL,
    location TEXT NOT NULL,
    farm TEXT NOT NULL,
    pesticides_used TEXT,
    submission_type TEXT NOT NULL,
    status TEXT NOT NULL,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    last_error TEXT,
    failure_kind TEXT,
    last_attempt_at TEXT,
    next_retry_at TEXT,
    payload_hash TEXT NOT NULL
)
";

/// Index backing FIFO listing by status.
pub const CREATE_STATUS_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_submissions_status ON submissions(status, created_at, seq)
";

/// Remote ids are unique; NULLs are allowed for unsynced rows.
pub const CREATE_REMOTE_ID_INDEX: &str = r"
CREATE UNIQUE INDEX IF NOT EXISTS idx_submissions_remote_id ON submissions(remote_id)
";

/// SQL statement to create an index on `payload_hash` for duplicate detection.
pub const CREATE_HASH_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_submissions_hash ON submissions(payload_hash)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_SUBMISSIONS_TABLE,
    CREATE_STATUS_INDEX,
    CREATE_REMOTE_ID_INDEX,
    CREATE_HASH_INDEX,
    CREATE_METADATA_TABLE,
];
