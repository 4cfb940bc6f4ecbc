use crate::context::{ConversationContext, ConversationTurn, Role, MAX_TURNS};
use crate::emotion::Emotion;
use crate::error::StoreError;
use crate::persona::{Gender, UserProfile};
use crate::store::{MemoryStore, ProfileStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// SQLite-backed profile and memory store. One connection, serialized by a
/// mutex and only touched from blocking tasks.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Unavailable(format!("cannot create {}: {}", parent.display(), e)))?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "
            -- Personality sliders per user
            CREATE TABLE IF NOT EXISTS user_profiles (
                user_id TEXT PRIMARY KEY,
                empathy_level INTEGER NOT NULL DEFAULT 75,
                humor_level INTEGER NOT NULL DEFAULT 50,
                formality_level INTEGER NOT NULL DEFAULT 40,
                verbosity_level INTEGER NOT NULL DEFAULT 60,
                gender TEXT NOT NULL DEFAULT 'not_set',
                updated_at TEXT NOT NULL
            );

            -- Conversation turns with detected emotion
            CREATE TABLE IF NOT EXISTS turns (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                role TEXT NOT NULL,
                text TEXT NOT NULL,
                emotion TEXT,
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_turns_user_seq ON turns(user_id, seq);
            ",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_connection<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&guard)
        })
        .await?
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl ProfileStore for SqliteStore {
    async fn get(&self, user_id: &str) -> Result<UserProfile, StoreError> {
        let user_id = user_id.to_string();
        self.with_connection(move |conn| {
            let row = conn
                .query_row(
                    "SELECT empathy_level, humor_level, formality_level, verbosity_level, gender
                     FROM user_profiles WHERE user_id = ?1",
                    [&user_id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    },
                )
                .optional()?;
            Ok(match row {
                Some((empathy, humor, formality, verbosity, gender)) => {
                    UserProfile::clamped(empathy, humor, formality, verbosity, Gender::from_str(&gender))
                }
                None => UserProfile::default(),
            })
        })
        .await
    }

    async fn save(&self, user_id: &str, profile: &UserProfile) -> Result<(), StoreError> {
        let user_id = user_id.to_string();
        let profile = profile.clone();
        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO user_profiles (user_id, empathy_level, humor_level, formality_level, verbosity_level, gender, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(user_id) DO UPDATE SET
                    empathy_level = excluded.empathy_level,
                    humor_level = excluded.humor_level,
                    formality_level = excluded.formality_level,
                    verbosity_level = excluded.verbosity_level,
                    gender = excluded.gender,
                    updated_at = excluded.updated_at",
                params![
                    user_id,
                    profile.empathy_level,
                    profile.humor_level,
                    profile.formality_level,
                    profile.verbosity_level,
                    profile.gender.as_str(),
                    Utc::now().to_rfc3339()
                ],
            )?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl MemoryStore for SqliteStore {
    async fn get(&self, user_id: &str) -> Result<ConversationContext, StoreError> {
        let user_id = user_id.to_string();
        self.with_connection(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT role, text, emotion, timestamp
                 FROM turns
                 WHERE user_id = ?1
                 ORDER BY seq DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![user_id, MAX_TURNS as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;

            let mut turns = Vec::new();
            for row in rows {
                let (role, text, emotion, timestamp) = row?;
                let Some(role) = Role::from_str(&role) else {
                    continue;
                };
                turns.push(ConversationTurn {
                    role,
                    text,
                    timestamp: parse_timestamp(&timestamp),
                    emotion: emotion.as_deref().and_then(Emotion::from_str),
                });
            }
            turns.reverse();
            Ok(ConversationContext::from_turns(turns))
        })
        .await
    }

    async fn append(&self, user_id: &str, turn: ConversationTurn) -> Result<(), StoreError> {
        let user_id = user_id.to_string();
        self.with_connection(move |conn| {
            let next_seq: i64 = conn.query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM turns WHERE user_id = ?1",
                [&user_id],
                |row| row.get(0),
            )?;
            conn.execute(
                "INSERT INTO turns (id, user_id, seq, role, text, emotion, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    Uuid::new_v4().to_string(),
                    user_id,
                    next_seq,
                    turn.role.as_str(),
                    turn.text,
                    turn.emotion.map(|e| e.as_str()),
                    turn.timestamp.to_rfc3339()
                ],
            )?;
            // Only the newest turns are ever read back.
            conn.execute(
                "DELETE FROM turns WHERE user_id = ?1 AND seq <= ?2",
                params![user_id, next_seq - MAX_TURNS as i64],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn profile_round_trip_and_default() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(ProfileStore::get(&store, "new").await.unwrap(), UserProfile::default());

        let profile = UserProfile::clamped(90, 10, 80, 20, Gender::Male);
        store.save("u1", &profile).await.unwrap();
        assert_eq!(ProfileStore::get(&store, "u1").await.unwrap(), profile);
    }

    #[tokio::test]
    async fn out_of_range_columns_are_clamped_on_read() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .with_connection(|conn| {
                conn.execute(
                    "INSERT INTO user_profiles VALUES ('raw', 150, -3, 50, 50, 'robot', '2024-01-01T00:00:00Z')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();
        let profile = ProfileStore::get(&store, "raw").await.unwrap();
        assert_eq!(profile.empathy_level, 100);
        assert_eq!(profile.humor_level, 0);
        assert_eq!(profile.gender, Gender::NotSet);
    }

    #[tokio::test]
    async fn turns_keep_order_emotion_and_bound() {
        let store = SqliteStore::open_in_memory().unwrap();
        for i in 0..13 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            let emotion = (role == Role::User).then_some(Emotion::Joy);
            store
                .append("u1", ConversationTurn::new(role, &format!("turn {}", i), emotion))
                .await
                .unwrap();
        }

        let history = MemoryStore::get(&store, "u1").await.unwrap();
        assert_eq!(history.len(), MAX_TURNS);
        let texts: Vec<&str> = history.turns().map(|t| t.text.as_str()).collect();
        assert_eq!(texts.first(), Some(&"turn 3"));
        assert_eq!(texts.last(), Some(&"turn 12"));
        assert_eq!(history.last_user_emotion(), Some(Emotion::Joy));
        assert!(MemoryStore::get(&store, "other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn opens_file_database_in_nested_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("attune.db");
        let store = SqliteStore::open(&path).unwrap();
        store.append("u", ConversationTurn::new(Role::User, "hi", None)).await.unwrap();
        assert!(path.exists());
    }
}
