use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Serialize;

use crate::db::{self, SqlitePool, SqlitePooledConn};
use crate::error::VerdantError;
use crate::schema::garden_beds;
use crate::session::Session;
use crate::Result;

#[derive(Debug, Clone, Serialize)]
pub struct GardenBed {
    pub id: i32,
    pub name: String,
    pub location: Option<String>,
    pub size: Option<String>,
    pub description: Option<String>,
    pub sun_exposure: Option<String>,
    pub irrigation: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied bed fields; everything except the name is optional.
#[derive(Debug, Clone, Default)]
pub struct BedDraft {
    pub name: String,
    pub location: Option<String>,
    pub size: Option<String>,
    pub description: Option<String>,
    pub sun_exposure: Option<String>,
    pub irrigation: Option<String>,
}

#[derive(Queryable)]
struct BedRow {
    id: i32,
    #[allow(dead_code)]
    owner_id: String,
    name: String,
    location: Option<String>,
    size: Option<String>,
    description: Option<String>,
    sun_exposure: Option<String>,
    irrigation: Option<String>,
    active: bool,
    created_at: String,
}

#[derive(Insertable)]
#[diesel(table_name = garden_beds)]
struct NewBed<'a> {
    owner_id: &'a str,
    name: &'a str,
    location: Option<&'a str>,
    size: Option<&'a str>,
    description: Option<&'a str>,
    sun_exposure: Option<&'a str>,
    irrigation: Option<&'a str>,
    active: bool,
    created_at: &'a str,
}

pub struct GardenBedStore {
    pool: SqlitePool,
}

impl GardenBedStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_bed(&self, session: &Session, draft: &BedDraft) -> Result<GardenBed> {
        let owner_id = session.user_id()?;
        let name = draft.name.trim();
        if name.is_empty() {
            return Err(VerdantError::Validation("bed name is required".into()));
        }

        let now = db::format_ts(Utc::now());
        let new = NewBed {
            owner_id,
            name,
            location: draft.location.as_deref(),
            size: draft.size.as_deref(),
            description: draft.description.as_deref(),
            sun_exposure: draft.sun_exposure.as_deref(),
            irrigation: draft.irrigation.as_deref(),
            active: true,
            created_at: &now,
        };

        let mut conn = self.conn().await?;
        diesel::insert_into(garden_beds::table)
            .values(&new)
            .execute(&mut conn)
            .await
            .map_err(|e| VerdantError::Runtime(e.to_string()))?;

        let row: BedRow = garden_beds::table
            .filter(garden_beds::owner_id.eq(owner_id))
            .order(garden_beds::id.desc())
            .first(&mut conn)
            .await
            .map_err(|e| VerdantError::Runtime(e.to_string()))?;
        map_row(row)
    }

    pub async fn update_bed(
        &self,
        session: &Session,
        id: i32,
        draft: &BedDraft,
    ) -> Result<GardenBed> {
        let owner_id = session.user_id()?;
        let name = draft.name.trim();
        if name.is_empty() {
            return Err(VerdantError::Validation("bed name is required".into()));
        }

        let mut conn = self.conn().await?;
        let updated = diesel::update(
            garden_beds::table
                .filter(garden_beds::owner_id.eq(owner_id))
                .filter(garden_beds::id.eq(id)),
        )
        .set((
            garden_beds::name.eq(name),
            garden_beds::location.eq(draft.location.as_deref()),
            garden_beds::size.eq(draft.size.as_deref()),
            garden_beds::description.eq(draft.description.as_deref()),
            garden_beds::sun_exposure.eq(draft.sun_exposure.as_deref()),
            garden_beds::irrigation.eq(draft.irrigation.as_deref()),
        ))
        .execute(&mut conn)
        .await
        .map_err(|e| VerdantError::Runtime(e.to_string()))?;
        if updated == 0 {
            return Err(VerdantError::NotFound(format!("garden bed {id}")));
        }
        self.get_bed(session, id).await
    }

    pub async fn get_bed(&self, session: &Session, id: i32) -> Result<GardenBed> {
        let owner_id = session.user_id()?;
        let mut conn = self.conn().await?;
        let row: Option<BedRow> = garden_beds::table
            .filter(garden_beds::owner_id.eq(owner_id))
            .filter(garden_beds::id.eq(id))
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| VerdantError::Runtime(e.to_string()))?;
        row.map(map_row)
            .transpose()?
            .ok_or_else(|| VerdantError::NotFound(format!("garden bed {id}")))
    }

    /// Active beds, newest first. Deactivated beds are kept but hidden.
    pub async fn list_beds(&self, session: &Session) -> Result<Vec<GardenBed>> {
        let owner_id = session.user_id()?;
        let mut conn = self.conn().await?;
        let rows: Vec<BedRow> = garden_beds::table
            .filter(garden_beds::owner_id.eq(owner_id))
            .filter(garden_beds::active.eq(true))
            .order(garden_beds::created_at.desc())
            .load(&mut conn)
            .await
            .map_err(|e| VerdantError::Runtime(e.to_string()))?;
        rows.into_iter().map(map_row).collect()
    }

    pub async fn deactivate_bed(&self, session: &Session, id: i32) -> Result<bool> {
        let owner_id = session.user_id()?;
        let mut conn = self.conn().await?;
        let updated = diesel::update(
            garden_beds::table
                .filter(garden_beds::owner_id.eq(owner_id))
                .filter(garden_beds::id.eq(id)),
        )
        .set(garden_beds::active.eq(false))
        .execute(&mut conn)
        .await
        .map_err(|e| VerdantError::Runtime(e.to_string()))?;
        Ok(updated > 0)
    }

    async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        db::checkout(&self.pool).await
    }
}

fn map_row(row: BedRow) -> Result<GardenBed> {
    Ok(GardenBed {
        id: row.id,
        name: row.name,
        location: row.location,
        size: row.size,
        description: row.description,
        sun_exposure: row.sun_exposure,
        irrigation: row.irrigation,
        active: row.active,
        created_at: db::parse_ts(&row.created_at)?,
    })
}
