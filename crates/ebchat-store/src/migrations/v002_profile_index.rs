use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Contact lists are ordered by display name.
ALTER TABLE profiles ADD COLUMN name TEXT NOT NULL DEFAULT '';
CREATE INDEX IF NOT EXISTS idx_profiles_name ON profiles(name);
UPDATE profiles SET name = COALESCE(json_extract(json, '$.name'), '');
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
