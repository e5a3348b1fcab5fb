//! v001 -- Initial schema: one row per profile document.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
    uid        TEXT PRIMARY KEY NOT NULL,   -- identity provider user id
    json       TEXT NOT NULL,               -- serialized UserProfile
    updated_at TEXT NOT NULL                -- RFC-3339
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
