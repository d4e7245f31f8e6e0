use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Serialize;

use crate::db::{self, SqlitePool, SqlitePooledConn};
use crate::error::VerdantError;
use crate::schema::{journals, photos};
use crate::session::Session;
use crate::storage::{self, PhotoStorage};
use crate::Result;

/// A stored photo row. `journal_id` links the photo to the entry it
/// illustrates; without one the photo is a standalone timeline item.
#[derive(Debug, Clone, Serialize)]
pub struct Photo {
    pub id: i32,
    pub plant_id: i32,
    pub journal_id: Option<i32>,
    pub storage_path: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Queryable)]
struct PhotoRow {
    id: i32,
    #[allow(dead_code)]
    owner_id: String,
    plant_id: i32,
    journal_id: Option<i32>,
    storage_path: String,
    uploaded_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = photos)]
struct NewPhoto<'a> {
    owner_id: &'a str,
    plant_id: i32,
    journal_id: Option<i32>,
    storage_path: &'a str,
    uploaded_at: &'a str,
}

pub struct PhotoStore {
    pool: SqlitePool,
}

impl PhotoStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Uploads the image bytes to the object store, then records the row.
    /// Object first, row second: an interruption strands a file, not a row
    /// pointing at nothing.
    pub async fn upload_photo(
        &self,
        session: &Session,
        photo_storage: &PhotoStorage,
        plant_id: i32,
        journal_id: Option<i32>,
        bytes: &[u8],
    ) -> Result<Photo> {
        let owner_id = session.user_id()?;
        // Check the attachment before writing anything so a rejected journal
        // link cannot strand an object.
        self.ensure_journal_attachment(owner_id, plant_id, journal_id)
            .await?;
        let uploaded_at = Utc::now();
        let path = storage::photo_object_path(owner_id, plant_id, uploaded_at);
        photo_storage.upload(&path, bytes)?;
        self.add_photo_record(session, plant_id, journal_id, &path, uploaded_at)
            .await
    }

    pub async fn add_photo_record(
        &self,
        session: &Session,
        plant_id: i32,
        journal_id: Option<i32>,
        storage_path: &str,
        uploaded_at: DateTime<Utc>,
    ) -> Result<Photo> {
        let owner_id = session.user_id()?;
        self.ensure_journal_attachment(owner_id, plant_id, journal_id)
            .await?;
        let stamp = db::format_ts(uploaded_at);
        let new = NewPhoto {
            owner_id,
            plant_id,
            journal_id,
            storage_path,
            uploaded_at: &stamp,
        };

        let mut conn = self.conn().await?;
        diesel::insert_into(photos::table)
            .values(&new)
            .execute(&mut conn)
            .await
            .map_err(|e| VerdantError::Runtime(e.to_string()))?;

        let row: PhotoRow = photos::table
            .filter(photos::owner_id.eq(owner_id))
            .order(photos::id.desc())
            .first(&mut conn)
            .await
            .map_err(|e| VerdantError::Runtime(e.to_string()))?;
        map_row(row)
    }

    /// All of a plant's photos, newest first, attached and standalone alike.
    pub async fn photos_for_plant(&self, session: &Session, plant_id: i32) -> Result<Vec<Photo>> {
        let owner_id = session.user_id()?;
        let mut conn = self.conn().await?;
        let rows: Vec<PhotoRow> = photos::table
            .filter(photos::owner_id.eq(owner_id))
            .filter(photos::plant_id.eq(plant_id))
            .order(photos::uploaded_at.desc())
            .load(&mut conn)
            .await
            .map_err(|e| VerdantError::Runtime(e.to_string()))?;
        rows.into_iter().map(map_row).collect()
    }

    pub async fn delete_photo(&self, session: &Session, id: i32) -> Result<bool> {
        let owner_id = session.user_id()?;
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(
            photos::table
                .filter(photos::owner_id.eq(owner_id))
                .filter(photos::id.eq(id)),
        )
        .execute(&mut conn)
        .await
        .map_err(|e| VerdantError::Runtime(e.to_string()))?;
        Ok(deleted > 0)
    }

    /// A journal attachment must point at the same owner's entry on the same
    /// plant; anything else would fold the photo into a stranger's entry or
    /// drop it between feeds.
    async fn ensure_journal_attachment(
        &self,
        owner_id: &str,
        plant_id: i32,
        journal_id: Option<i32>,
    ) -> Result<()> {
        let Some(journal_id) = journal_id else {
            return Ok(());
        };
        let mut conn = self.conn().await?;
        let parent: Option<i32> = journals::table
            .filter(journals::owner_id.eq(owner_id))
            .filter(journals::id.eq(journal_id))
            .filter(journals::plant_id.eq(plant_id))
            .select(journals::id)
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| VerdantError::Runtime(e.to_string()))?;
        if parent.is_none() {
            return Err(VerdantError::Validation(format!(
                "journal entry {journal_id} does not belong to plant {plant_id}"
            )));
        }
        Ok(())
    }

    async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        db::checkout(&self.pool).await
    }
}

fn map_row(row: PhotoRow) -> Result<Photo> {
    Ok(Photo {
        id: row.id,
        plant_id: row.plant_id,
        journal_id: row.journal_id,
        storage_path: row.storage_path,
        uploaded_at: db::parse_ts(&row.uploaded_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plants::{PlantDraft, PlantStore};

    struct Fixture {
        _dir: tempfile::TempDir,
        _photo_dir: tempfile::TempDir,
        pool: SqlitePool,
        plants: PlantStore,
        photos: PhotoStore,
        storage: PhotoStorage,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("temp dir");
        let photo_dir = tempfile::tempdir().expect("photo dir");
        let pool = db::connect(dir.path().join("garden.db").to_string_lossy())
            .await
            .expect("pool");
        Fixture {
            plants: PlantStore::new(pool.clone()),
            photos: PhotoStore::new(pool.clone()),
            storage: PhotoStorage::open(photo_dir.path()).expect("storage"),
            pool,
            _dir: dir,
            _photo_dir: photo_dir,
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
    async fn upload_writes_the_object_then_the_row() {
        let fx = fixture().await;
        let session = Session::authenticated("u1");
        let plant_id = plant(&fx, &session, "Tomato #1").await;

        let photo = fx
            .photos
            .upload_photo(&session, &fx.storage, plant_id, None, b"jpeg-bytes")
            .await
            .expect("upload");

        assert!(photo.storage_path.starts_with(&format!("u1/{plant_id}/")));
        assert!(photo.storage_path.ends_with(".jpg"));
        assert_eq!(
            fx.storage
                .list_files(&storage::plant_photo_prefix("u1", plant_id))
                .expect("objects"),
            vec![photo.storage_path.clone()]
        );

        let listed = fx.photos.photos_for_plant(&session, plant_id).await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, photo.id);
        assert!(listed[0].journal_id.is_none());
    }

    #[tokio::test]
    async fn attachments_must_target_an_entry_on_the_same_plant() {
        let fx = fixture().await;
        let session = Session::authenticated("u1");
        let tomato = plant(&fx, &session, "Tomato #1").await;
        let basil = plant(&fx, &session, "Basil").await;
        let journals = crate::journal::JournalStore::new(fx.pool.clone());
        let entry = journals
            .create_entry(&session, tomato, "Sprouted")
            .await
            .expect("entry");

        // Another plant's entry, a nonexistent entry, and another owner's
        // entry are all rejected before any object is written.
        for (target_plant, journal_id, who) in [
            (basil, entry.id, &session),
            (tomato, 9999, &session),
            (tomato, entry.id, &Session::authenticated("intruder")),
        ] {
            let err = fx
                .photos
                .upload_photo(who, &fx.storage, target_plant, Some(journal_id), b"jpeg")
                .await
                .unwrap_err();
            assert!(matches!(err, VerdantError::Validation(_)));
        }
        assert!(fx
            .storage
            .list_files(&storage::plant_photo_prefix("u1", basil))
            .expect("objects")
            .is_empty());

        // The legitimate attachment still goes through.
        let photo = fx
            .photos
            .upload_photo(&session, &fx.storage, tomato, Some(entry.id), b"jpeg")
            .await
            .expect("attach");
        assert_eq!(photo.journal_id, Some(entry.id));
    }

    #[tokio::test]
    async fn photos_are_owner_scoped() {
        let fx = fixture().await;
        let alice = Session::authenticated("alice");
        let bob = Session::authenticated("bob");
        let plant_id = plant(&fx, &alice, "Fern").await;

        let photo = fx
            .photos
            .upload_photo(&alice, &fx.storage, plant_id, None, b"jpeg")
            .await
            .expect("upload");

        assert!(fx
            .photos
            .photos_for_plant(&bob, plant_id)
            .await
            .expect("bob list")
            .is_empty());
        assert!(!fx.photos.delete_photo(&bob, photo.id).await.expect("bob delete"));
    }
}
