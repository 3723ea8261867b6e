/// Schema for the durable offline store.
pub const SCHEMA: &str = r#"
-- Last-known-good copies of user-scoped collections
CREATE TABLE IF NOT EXISTS offline_data (
    id TEXT PRIMARY KEY,
    category TEXT NOT NULL,
    owner TEXT NOT NULL,
    payload TEXT NOT NULL,
    captured_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_offline_data_category ON offline_data(category);

-- Outbox of mutations waiting for the network; seq gives FIFO order
CREATE TABLE IF NOT EXISTS pending_actions (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_pending_actions_kind ON pending_actions(kind);
CREATE INDEX IF NOT EXISTS idx_pending_actions_created ON pending_actions(created_at);

-- Actions that ran out of retries
CREATE TABLE IF NOT EXISTS discarded_actions (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    retry_count INTEGER NOT NULL,
    reason TEXT NOT NULL,
    discarded_at TEXT NOT NULL
);

-- Query results keyed by hashed query string
CREATE TABLE IF NOT EXISTS query_cache (
    query_key TEXT PRIMARY KEY,
    query TEXT NOT NULL,
    payload TEXT NOT NULL,
    cached_at TEXT NOT NULL
);
"#;
