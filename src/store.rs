//! # Game Session Store
//!
//! Pre-generated game content (quizzes, matching games, ...) is written by
//! the content pipeline into a `game_sessions` table; this service only looks
//! up the newest record for a course, game type and optionally a lesson.
//!
//! ## Table Layout:
//! | column       | type              | notes                                  |
//! |--------------|-------------------|----------------------------------------|
//! | `id`         | INTEGER PK        | tie-breaker for equal timestamps        |
//! | `course_id`  | TEXT NOT NULL     |                                        |
//! | `lesson_id`  | TEXT NULL         | disambiguates sessions of one course    |
//! | `game_type`  | TEXT NOT NULL     |                                        |
//! | `content`    | TEXT NOT NULL     | JSON document                           |
//! | `concepts`   | TEXT NOT NULL     | JSON document                           |
//! | `created_at` | TEXT NOT NULL     | RFC 3339 UTC, microsecond precision     |

use crate::error::{AppError, AppResult};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS game_sessions (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    course_id   TEXT NOT NULL,
    lesson_id   TEXT,
    game_type   TEXT NOT NULL,
    content     TEXT NOT NULL,
    concepts    TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_game_sessions_lookup
    ON game_sessions (course_id, game_type, created_at);
";

/// Lookup key for a game session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSessionQuery {
    pub course_id: String,
    pub game_type: String,
    /// `None` matches sessions of any lesson
    pub lesson_id: Option<String>,
}

/// One stored game session.
#[derive(Debug, Clone, PartialEq)]
pub struct GameSession {
    pub id: i64,
    pub course_id: String,
    pub lesson_id: Option<String>,
    pub game_type: String,
    pub content: serde_json::Value,
    pub concepts: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A game session about to be written by the content pipeline.
#[derive(Debug, Clone)]
pub struct NewGameSession {
    pub course_id: String,
    pub lesson_id: Option<String>,
    pub game_type: String,
    pub content: serde_json::Value,
    pub concepts: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Storage for game sessions. The HTTP layer only reads; writes come from the
/// content pipeline and tests.
pub trait GameSessionStore: Send + Sync {
    /// Most recently created session matching `query`, if any.
    fn latest(&self, query: &GameSessionQuery) -> AppResult<Option<GameSession>>;

    /// Insert a session, returning its id.
    fn insert(&self, session: &NewGameSession) -> AppResult<i64>;
}

/// SQLite-backed store. The connection is serialized behind a mutex.
pub struct SqliteGameSessionStore {
    conn: Mutex<Connection>,
}

impl SqliteGameSessionStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    ///
    /// `":memory:"` opens a private in-memory database.
    pub fn open(path: &str) -> AppResult<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        conn.execute_batch(SCHEMA)?;

        info!(path = %path, "Game session store ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn json_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<GameSession> {
    let created_at: String = row.get(6)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);

    Ok(GameSession {
        id: row.get(0)?,
        course_id: row.get(1)?,
        lesson_id: row.get(2)?,
        game_type: row.get(3)?,
        content: json_column(row, 4)?,
        concepts: json_column(row, 5)?,
        created_at,
    })
}

impl GameSessionStore for SqliteGameSessionStore {
    fn latest(&self, query: &GameSessionQuery) -> AppResult<Option<GameSession>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let session = conn
            .query_row(
                "SELECT id, course_id, lesson_id, game_type, content, concepts, created_at
                 FROM game_sessions
                 WHERE course_id = ?1 AND game_type = ?2 AND (?3 IS NULL OR lesson_id = ?3)
                 ORDER BY created_at DESC, id DESC
                 LIMIT 1",
                params![query.course_id, query.game_type, query.lesson_id],
                row_to_session,
            )
            .optional()
            .map_err(AppError::from)?;

        debug!(
            course_id = %query.course_id,
            game_type = %query.game_type,
            lesson_id = ?query.lesson_id,
            found = session.is_some(),
            "Game session lookup"
        );
        Ok(session)
    }

    fn insert(&self, session: &NewGameSession) -> AppResult<i64> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT INTO game_sessions (course_id, lesson_id, game_type, content, concepts, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session.course_id,
                session.lesson_id,
                session.game_type,
                session.content.to_string(),
                session.concepts.to_string(),
                session.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn session(lesson: Option<&str>, game_type: &str, minutes: i64, marker: &str) -> NewGameSession {
        NewGameSession {
            course_id: "course-1".to_string(),
            lesson_id: lesson.map(str::to_string),
            game_type: game_type.to_string(),
            content: json!({ "marker": marker }),
            concepts: json!(["fractions"]),
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes),
        }
    }

    fn query(game_type: &str, lesson: Option<&str>) -> GameSessionQuery {
        GameSessionQuery {
            course_id: "course-1".to_string(),
            game_type: game_type.to_string(),
            lesson_id: lesson.map(str::to_string),
        }
    }

    #[test]
    fn test_latest_returns_newest_record() {
        let store = SqliteGameSessionStore::open(":memory:").unwrap();
        store.insert(&session(None, "quiz", 0, "old")).unwrap();
        store.insert(&session(None, "quiz", 30, "new")).unwrap();
        store.insert(&session(None, "quiz", 10, "middle")).unwrap();

        let found = store.latest(&query("quiz", None)).unwrap().unwrap();
        assert_eq!(found.content, json!({ "marker": "new" }));
        assert_eq!(found.concepts, json!(["fractions"]));
    }

    #[test]
    fn test_equal_timestamps_prefer_last_inserted() {
        let store = SqliteGameSessionStore::open(":memory:").unwrap();
        store.insert(&session(None, "quiz", 5, "first")).unwrap();
        let second = store.insert(&session(None, "quiz", 5, "second")).unwrap();

        let found = store.latest(&query("quiz", None)).unwrap().unwrap();
        assert_eq!(found.id, second);
    }

    #[test]
    fn test_lesson_disambiguates() {
        let store = SqliteGameSessionStore::open(":memory:").unwrap();
        store.insert(&session(Some("lesson-a"), "quiz", 0, "a")).unwrap();
        store.insert(&session(Some("lesson-b"), "quiz", 10, "b")).unwrap();

        let found = store.latest(&query("quiz", Some("lesson-a"))).unwrap().unwrap();
        assert_eq!(found.content["marker"], "a");
        assert_eq!(found.lesson_id.as_deref(), Some("lesson-a"));

        let any = store.latest(&query("quiz", None)).unwrap().unwrap();
        assert_eq!(any.content["marker"], "b");
    }

    #[test]
    fn test_no_match_is_none() {
        let store = SqliteGameSessionStore::open(":memory:").unwrap();
        store.insert(&session(Some("lesson-a"), "quiz", 0, "a")).unwrap();

        assert!(store.latest(&query("matching", None)).unwrap().is_none());
        assert!(store.latest(&query("quiz", Some("lesson-z"))).unwrap().is_none());
    }

    #[test]
    fn test_created_at_round_trips() {
        let store = SqliteGameSessionStore::open(":memory:").unwrap();
        let new = session(None, "quiz", 42, "x");
        store.insert(&new).unwrap();

        let found = store.latest(&query("quiz", None)).unwrap().unwrap();
        assert_eq!(found.created_at, new.created_at);
    }
}
