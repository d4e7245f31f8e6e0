use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Serialize;

use crate::db::{self, SqlitePool, SqlitePooledConn};
use crate::error::VerdantError;
use crate::schema::journals;
use crate::session::Session;
use crate::Result;

/// A dated note about one plant. Entries are immutable once written; the only
/// mutation is deletion (directly, or via the plant cascade).
#[derive(Debug, Clone, Serialize)]
pub struct JournalEntry {
    pub id: i32,
    pub plant_id: i32,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Queryable)]
struct JournalRow {
    id: i32,
    #[allow(dead_code)]
    owner_id: String,
    plant_id: i32,
    text: String,
    created_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = journals)]
struct NewJournal<'a> {
    owner_id: &'a str,
    plant_id: i32,
    text: &'a str,
    created_at: &'a str,
}

pub struct JournalStore {
    pool: SqlitePool,
}

impl JournalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_entry(
        &self,
        session: &Session,
        plant_id: i32,
        text: &str,
    ) -> Result<JournalEntry> {
        let owner_id = session.user_id()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(VerdantError::Validation("journal text is required".into()));
        }

        let now = db::format_ts(Utc::now());
        let new = NewJournal {
            owner_id,
            plant_id,
            text,
            created_at: &now,
        };

        let mut conn = self.conn().await?;
        diesel::insert_into(journals::table)
            .values(&new)
            .execute(&mut conn)
            .await
            .map_err(|e| VerdantError::Runtime(e.to_string()))?;

        let row: JournalRow = journals::table
            .filter(journals::owner_id.eq(owner_id))
            .order(journals::id.desc())
            .first(&mut conn)
            .await
            .map_err(|e| VerdantError::Runtime(e.to_string()))?;
        map_row(row)
    }

    /// Entries for one plant, newest first.
    pub async fn entries_for_plant(
        &self,
        session: &Session,
        plant_id: i32,
    ) -> Result<Vec<JournalEntry>> {
        let owner_id = session.user_id()?;
        let mut conn = self.conn().await?;
        let rows: Vec<JournalRow> = journals::table
            .filter(journals::owner_id.eq(owner_id))
            .filter(journals::plant_id.eq(plant_id))
            .order(journals::created_at.desc())
            .load(&mut conn)
            .await
            .map_err(|e| VerdantError::Runtime(e.to_string()))?;
        rows.into_iter().map(map_row).collect()
    }

    pub async fn delete_entry(&self, session: &Session, id: i32) -> Result<bool> {
        let owner_id = session.user_id()?;
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(
            journals::table
                .filter(journals::owner_id.eq(owner_id))
                .filter(journals::id.eq(id)),
        )
        .execute(&mut conn)
        .await
        .map_err(|e| VerdantError::Runtime(e.to_string()))?;
        Ok(deleted > 0)
    }

    async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        db::checkout(&self.pool).await
    }
}

fn map_row(row: JournalRow) -> Result<JournalEntry> {
    Ok(JournalEntry {
        id: row.id,
        plant_id: row.plant_id,
        text: row.text,
        created_at: db::parse_ts(&row.created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plants::{PlantDraft, PlantStore};

    struct Fixture {
        _dir: tempfile::TempDir,
        plants: PlantStore,
        journals: JournalStore,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("temp dir");
        let pool = db::connect(dir.path().join("garden.db").to_string_lossy())
            .await
            .expect("pool");
        Fixture {
            _dir: dir,
            plants: PlantStore::new(pool.clone()),
            journals: JournalStore::new(pool),
        }
    }

    async fn plant(fx: &Fixture, session: &Session, name: &str) -> i32 {
        fx.plants
            .create_plant(
                session,
                &PlantDraft {
                    name: name.to_string(),
                    ..PlantDraft::default()
                },
            )
            .await
            .expect("plant")
            .id
    }

    #[tokio::test]
    async fn entries_come_back_newest_first() {
        let fx = fixture().await;
        let session = Session::authenticated("u1");
        let tomato = plant(&fx, &session, "Tomato #1").await;
        let basil = plant(&fx, &session, "Basil").await;

        let first = fx
            .journals
            .create_entry(&session, tomato, "Sprouted")
            .await
            .expect("first entry");
        let second = fx
            .journals
            .create_entry(&session, tomato, "First true leaves")
            .await
            .expect("second entry");
        fx.journals
            .create_entry(&session, basil, "Other plant")
            .await
            .expect("other plant entry");

        let entries = fx
            .journals
            .entries_for_plant(&session, tomato)
            .await
            .expect("list");
        assert_eq!(entries.len(), 2);
        assert!(entries[0].created_at >= entries[1].created_at);
        assert_eq!(entries[0].id, second.id);
        assert_eq!(entries[1].id, first.id);
    }

    #[tokio::test]
    async fn blank_text_is_rejected_before_any_write() {
        let fx = fixture().await;
        let session = Session::authenticated("u1");
        let tomato = plant(&fx, &session, "Tomato #1").await;

        let err = fx
            .journals
            .create_entry(&session, tomato, "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, VerdantError::Validation(_)));
        assert!(fx
            .journals
            .entries_for_plant(&session, tomato)
            .await
            .expect("list")
            .is_empty());
    }

    #[tokio::test]
    async fn entries_are_owner_scoped() {
        let fx = fixture().await;
        let alice = Session::authenticated("alice");
        let bob = Session::authenticated("bob");
        let fern = plant(&fx, &alice, "Fern").await;

        let entry = fx
            .journals
            .create_entry(&alice, fern, "Mine")
            .await
            .expect("alice entry");
        assert!(fx
            .journals
            .entries_for_plant(&bob, fern)
            .await
            .expect("bob list")
            .is_empty());
        assert!(!fx.journals.delete_entry(&bob, entry.id).await.expect("bob delete"));
        assert!(fx.journals.delete_entry(&alice, entry.id).await.expect("alice delete"));
    }

    #[tokio::test]
    async fn anonymous_sessions_cannot_write() {
        let fx = fixture().await;
        let err = fx
            .journals
            .create_entry(&Session::anonymous(), 1, "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, VerdantError::Unauthenticated));
    }
}
