use rusqlite_migration::{Migrations, M};

/// Schema migrations, tracked through SQLite's `user_version` pragma.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "-- Migration 1: users seen by the relay, and relayed messages

CREATE TABLE users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL,
    last_seen_at TEXT NOT NULL
);

CREATE TABLE messages (
    id TEXT PRIMARY KEY,
    sender TEXT NOT NULL,
    recipient TEXT NOT NULL,
    text TEXT,
    attachment_ref TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX idx_messages_pair ON messages(sender, recipient, created_at);
",
    )])
}
