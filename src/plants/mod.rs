use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Serialize;

use crate::db::{self, SqlitePool, SqlitePooledConn};
use crate::error::VerdantError;
use crate::schema::{garden_beds, plant_varieties, plants};
use crate::session::Session;
use crate::storage::{self, PhotoStorage};
use crate::Result;

/// A plant in the garden, with its variety and bed display names joined in.
#[derive(Debug, Clone, Serialize)]
pub struct Plant {
    pub id: i32,
    pub name: String,
    pub variety_id: Option<i32>,
    pub variety_name: Option<String>,
    pub bed_id: Option<i32>,
    pub bed_name: Option<String>,
    pub from_seed: bool,
    pub seed_source: Option<String>,
    pub planted_date: Option<DateTime<Utc>>,
    pub transplanted_date: Option<DateTime<Utc>>,
    pub expected_harvest_date: Option<DateTime<Utc>>,
    pub family: Option<String>,
    pub days_to_harvest: Option<i32>,
    pub notes: Option<String>,
    pub profile_photo_path: Option<String>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Catalog entry plants can be pre-filled from.
#[derive(Debug, Clone, Serialize, Queryable)]
pub struct Variety {
    pub id: i32,
    pub common_name: String,
    pub family: Option<String>,
    pub days_to_harvest: Option<i32>,
}

#[derive(Debug, Clone, Default)]
pub struct PlantDraft {
    pub name: String,
    pub variety_id: Option<i32>,
    pub bed_id: Option<i32>,
    pub from_seed: bool,
    pub seed_source: Option<String>,
    pub planted_date: Option<DateTime<Utc>>,
    pub transplanted_date: Option<DateTime<Utc>>,
    pub expected_harvest_date: Option<DateTime<Utc>>,
    pub family: Option<String>,
    pub days_to_harvest: Option<i32>,
    pub notes: Option<String>,
    pub profile_photo_path: Option<String>,
}

impl PlantDraft {
    /// Pre-fill from a variety catalog entry, the way the creation form offers
    /// a "plant template".
    pub fn from_variety(variety: &Variety) -> Self {
        Self {
            name: variety.common_name.clone(),
            variety_id: Some(variety.id),
            family: variety.family.clone(),
            days_to_harvest: variety.days_to_harvest,
            ..Self::default()
        }
    }
}

#[derive(Queryable)]
struct PlantRow {
    id: i32,
    #[allow(dead_code)]
    owner_id: String,
    name: String,
    variety_id: Option<i32>,
    bed_id: Option<i32>,
    from_seed: bool,
    seed_source: Option<String>,
    planted_date: Option<String>,
    transplanted_date: Option<String>,
    expected_harvest_date: Option<String>,
    family: Option<String>,
    days_to_harvest: Option<i32>,
    notes: Option<String>,
    profile_photo_path: Option<String>,
    archived: bool,
    created_at: String,
    updated_at: String,
}

type JoinedRow = (PlantRow, Option<String>, Option<String>);

#[derive(Insertable)]
#[diesel(table_name = plants)]
struct NewPlant<'a> {
    owner_id: &'a str,
    name: &'a str,
    variety_id: Option<i32>,
    bed_id: Option<i32>,
    from_seed: bool,
    seed_source: Option<&'a str>,
    planted_date: Option<&'a str>,
    transplanted_date: Option<&'a str>,
    expected_harvest_date: Option<&'a str>,
    family: Option<&'a str>,
    days_to_harvest: Option<i32>,
    notes: Option<&'a str>,
    profile_photo_path: Option<&'a str>,
    archived: bool,
    created_at: &'a str,
    updated_at: &'a str,
}

pub struct PlantStore {
    pool: SqlitePool,
}

impl PlantStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_plant(&self, session: &Session, draft: &PlantDraft) -> Result<Plant> {
        let owner_id = session.user_id()?;
        let name = draft.name.trim();
        if name.is_empty() {
            return Err(VerdantError::Validation("plant name is required".into()));
        }

        let now = db::format_ts(Utc::now());
        let planted = draft.planted_date.map(db::format_ts);
        let transplanted = draft.transplanted_date.map(db::format_ts);
        let harvest = draft.expected_harvest_date.map(db::format_ts);
        let new = NewPlant {
            owner_id,
            name,
            variety_id: draft.variety_id,
            bed_id: draft.bed_id,
            from_seed: draft.from_seed,
            seed_source: draft.seed_source.as_deref(),
            planted_date: planted.as_deref(),
            transplanted_date: transplanted.as_deref(),
            expected_harvest_date: harvest.as_deref(),
            family: draft.family.as_deref(),
            days_to_harvest: draft.days_to_harvest,
            notes: draft.notes.as_deref(),
            profile_photo_path: draft.profile_photo_path.as_deref(),
            archived: false,
            created_at: &now,
            updated_at: &now,
        };

        let mut conn = self.conn().await?;
        diesel::insert_into(plants::table)
            .values(&new)
            .execute(&mut conn)
            .await
            .map_err(|e| VerdantError::Runtime(e.to_string()))?;

        let id: i32 = plants::table
            .filter(plants::owner_id.eq(owner_id))
            .select(plants::id)
            .order(plants::id.desc())
            .first(&mut conn)
            .await
            .map_err(|e| VerdantError::Runtime(e.to_string()))?;
        drop(conn);
        self.get_plant(session, id).await
    }

    pub async fn update_plant(
        &self,
        session: &Session,
        id: i32,
        draft: &PlantDraft,
    ) -> Result<Plant> {
        let owner_id = session.user_id()?;
        let name = draft.name.trim();
        if name.is_empty() {
            return Err(VerdantError::Validation("plant name is required".into()));
        }

        let now = db::format_ts(Utc::now());
        let planted = draft.planted_date.map(db::format_ts);
        let transplanted = draft.transplanted_date.map(db::format_ts);
        let harvest = draft.expected_harvest_date.map(db::format_ts);

        let mut conn = self.conn().await?;
        let updated = diesel::update(
            plants::table
                .filter(plants::owner_id.eq(owner_id))
                .filter(plants::id.eq(id)),
        )
        .set((
            plants::name.eq(name),
            plants::variety_id.eq(draft.variety_id),
            plants::bed_id.eq(draft.bed_id),
            plants::from_seed.eq(draft.from_seed),
            plants::seed_source.eq(draft.seed_source.as_deref()),
            plants::planted_date.eq(planted.as_deref()),
            plants::transplanted_date.eq(transplanted.as_deref()),
            plants::expected_harvest_date.eq(harvest.as_deref()),
            plants::family.eq(draft.family.as_deref()),
            plants::days_to_harvest.eq(draft.days_to_harvest),
            plants::notes.eq(draft.notes.as_deref()),
            plants::profile_photo_path.eq(draft.profile_photo_path.as_deref()),
            plants::updated_at.eq(&now),
        ))
        .execute(&mut conn)
        .await
        .map_err(|e| VerdantError::Runtime(e.to_string()))?;
        if updated == 0 {
            return Err(VerdantError::NotFound(format!("plant {id}")));
        }
        drop(conn);
        self.get_plant(session, id).await
    }

    pub async fn get_plant(&self, session: &Session, id: i32) -> Result<Plant> {
        let owner_id = session.user_id()?;
        let mut conn = self.conn().await?;
        let row: Option<JoinedRow> = plants::table
            .left_join(plant_varieties::table)
            .left_join(garden_beds::table)
            .filter(plants::owner_id.eq(owner_id))
            .filter(plants::id.eq(id))
            .select((
                plants::all_columns,
                plant_varieties::common_name.nullable(),
                garden_beds::name.nullable(),
            ))
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| VerdantError::Runtime(e.to_string()))?;
        row.map(map_row)
            .transpose()?
            .ok_or_else(|| VerdantError::NotFound(format!("plant {id}")))
    }

    /// Unarchived plants, newest first.
    pub async fn list_plants(&self, session: &Session) -> Result<Vec<Plant>> {
        let owner_id = session.user_id()?;
        let mut conn = self.conn().await?;
        let rows: Vec<JoinedRow> = plants::table
            .left_join(plant_varieties::table)
            .left_join(garden_beds::table)
            .filter(plants::owner_id.eq(owner_id))
            .filter(plants::archived.eq(false))
            .select((
                plants::all_columns,
                plant_varieties::common_name.nullable(),
                garden_beds::name.nullable(),
            ))
            .order(plants::created_at.desc())
            .load(&mut conn)
            .await
            .map_err(|e| VerdantError::Runtime(e.to_string()))?;
        rows.into_iter().map(map_row).collect()
    }

    pub async fn plants_in_bed(&self, session: &Session, bed_id: i32) -> Result<Vec<Plant>> {
        let owner_id = session.user_id()?;
        let mut conn = self.conn().await?;
        let rows: Vec<JoinedRow> = plants::table
            .left_join(plant_varieties::table)
            .left_join(garden_beds::table)
            .filter(plants::owner_id.eq(owner_id))
            .filter(plants::bed_id.eq(bed_id))
            .filter(plants::archived.eq(false))
            .select((
                plants::all_columns,
                plant_varieties::common_name.nullable(),
                garden_beds::name.nullable(),
            ))
            .order(plants::created_at.desc())
            .load(&mut conn)
            .await
            .map_err(|e| VerdantError::Runtime(e.to_string()))?;
        rows.into_iter().map(map_row).collect()
    }

    pub async fn archive_plant(&self, session: &Session, id: i32) -> Result<bool> {
        let owner_id = session.user_id()?;
        let now = db::format_ts(Utc::now());
        let mut conn = self.conn().await?;
        let updated = diesel::update(
            plants::table
                .filter(plants::owner_id.eq(owner_id))
                .filter(plants::id.eq(id)),
        )
        .set((plants::archived.eq(true), plants::updated_at.eq(&now)))
        .execute(&mut conn)
        .await
        .map_err(|e| VerdantError::Runtime(e.to_string()))?;
        Ok(updated > 0)
    }

    /// Permanently deletes a plant: storage cleanup first, then the record,
    /// whose FK cascade removes journals, photos, and tasks. An interruption
    /// between the phases can only strand storage objects, never rows.
    pub async fn delete_plant(
        &self,
        session: &Session,
        id: i32,
        photo_storage: &PhotoStorage,
    ) -> Result<()> {
        let owner_id = session.user_id()?;
        let mut conn = self.conn().await?;
        let exists: Option<i32> = plants::table
            .filter(plants::owner_id.eq(owner_id))
            .filter(plants::id.eq(id))
            .select(plants::id)
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| VerdantError::Runtime(e.to_string()))?;
        if exists.is_none() {
            return Err(VerdantError::NotFound(format!("plant {id}")));
        }

        let prefix = storage::plant_photo_prefix(owner_id, id);
        let objects = photo_storage.list_files(&prefix)?;
        if !objects.is_empty() {
            tracing::info!(plant_id = id, count = objects.len(), "removing stored photos");
            photo_storage.delete(&objects)?;
        }

        let deleted = diesel::delete(
            plants::table
                .filter(plants::owner_id.eq(owner_id))
                .filter(plants::id.eq(id)),
        )
        .execute(&mut conn)
        .await
        .map_err(|e| {
            tracing::warn!(plant_id = id, "plant row deletion failed after storage cleanup");
            VerdantError::Runtime(e.to_string())
        })?;
        if deleted == 0 {
            return Err(VerdantError::NotFound(format!("plant {id}")));
        }
        tracing::info!(plant_id = id, "deleted plant and cascaded dependents");
        Ok(())
    }

    /// The shared variety catalog backing "plant template" pre-fill.
    pub async fn list_varieties(&self) -> Result<Vec<Variety>> {
        let mut conn = self.conn().await?;
        plant_varieties::table
            .order(plant_varieties::common_name.asc())
            .load(&mut conn)
            .await
            .map_err(|e| VerdantError::Runtime(e.to_string()))
    }

    pub async fn add_variety(
        &self,
        common_name: &str,
        family: Option<&str>,
        days_to_harvest: Option<i32>,
    ) -> Result<Variety> {
        let common_name = common_name.trim();
        if common_name.is_empty() {
            return Err(VerdantError::Validation("variety name is required".into()));
        }
        let mut conn = self.conn().await?;
        diesel::insert_into(plant_varieties::table)
            .values((
                plant_varieties::common_name.eq(common_name),
                plant_varieties::family.eq(family),
                plant_varieties::days_to_harvest.eq(days_to_harvest),
            ))
            .execute(&mut conn)
            .await
            .map_err(|e| VerdantError::Runtime(e.to_string()))?;
        plant_varieties::table
            .order(plant_varieties::id.desc())
            .first(&mut conn)
            .await
            .map_err(|e| VerdantError::Runtime(e.to_string()))
    }

    async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        db::checkout(&self.pool).await
    }
}

fn map_row((row, variety_name, bed_name): JoinedRow) -> Result<Plant> {
    Ok(Plant {
        id: row.id,
        name: row.name,
        variety_id: row.variety_id,
        variety_name,
        bed_id: row.bed_id,
        bed_name,
        from_seed: row.from_seed,
        seed_source: row.seed_source,
        planted_date: db::parse_ts_opt(row.planted_date.as_deref())?,
        transplanted_date: db::parse_ts_opt(row.transplanted_date.as_deref())?,
        expected_harvest_date: db::parse_ts_opt(row.expected_harvest_date.as_deref())?,
        family: row.family,
        days_to_harvest: row.days_to_harvest,
        notes: row.notes,
        profile_photo_path: row.profile_photo_path,
        archived: row.archived,
        created_at: db::parse_ts(&row.created_at)?,
        updated_at: db::parse_ts(&row.updated_at)?,
    })
}
