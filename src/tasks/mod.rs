use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::Serialize;

use crate::db::{self, SqlitePool, SqlitePooledConn};
use crate::error::VerdantError;
use crate::recurrence::RecurrenceRule;
use crate::schema::{garden_beds, plants, tasks};
use crate::session::Session;
use crate::Result;

/// A care task, with linked plant/bed display names joined in.
#[derive(Debug, Clone, Serialize)]
pub struct TaskItem {
    pub id: i32,
    pub plant_id: Option<i32>,
    pub garden_bed_id: Option<i32>,
    pub plant_name: Option<String>,
    pub bed_name: Option<String>,
    pub title: String,
    pub notes: Option<String>,
    pub due_date: DateTime<Utc>,
    pub completed: bool,
    pub recurring_rule: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied task template. With `apply_to_plants` set and a bed id
/// present, creation fans out into one task per plant in the bed.
#[derive(Debug, Clone)]
pub struct TaskDraft {
    pub title: String,
    pub notes: Option<String>,
    pub due_date: DateTime<Utc>,
    pub recurring_rule: Option<String>,
    pub plant_id: Option<i32>,
    pub garden_bed_id: Option<i32>,
    pub apply_to_plants: bool,
}

impl Default for TaskDraft {
    fn default() -> Self {
        Self {
            title: String::new(),
            notes: None,
            due_date: Utc::now(),
            recurring_rule: None,
            plant_id: None,
            garden_bed_id: None,
            apply_to_plants: false,
        }
    }
}

/// What completing a task produced. A recurring task with a future occurrence
/// leaves its completed record behind and spawns exactly one open successor.
#[derive(Debug)]
pub enum CompletionOutcome {
    Single(TaskItem),
    Recurring { completed: TaskItem, next: TaskItem },
}

#[derive(Clone, Copy, Debug)]
pub enum TaskStatus {
    Open,
    Completed,
    All,
}

impl TaskStatus {
    pub fn from_option(value: Option<&str>) -> Self {
        value
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(TaskStatus::Open)
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = ();

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match value {
            "completed" => TaskStatus::Completed,
            "all" => TaskStatus::All,
            _ => TaskStatus::Open,
        })
    }
}

#[derive(Queryable)]
struct TaskRow {
    id: i32,
    #[allow(dead_code)]
    owner_id: String,
    plant_id: Option<i32>,
    garden_bed_id: Option<i32>,
    title: String,
    notes: Option<String>,
    due_date: String,
    completed: bool,
    recurring_rule: Option<String>,
    created_at: String,
    updated_at: String,
}

type JoinedTaskRow = (TaskRow, Option<String>, Option<String>);

#[derive(Insertable)]
#[diesel(table_name = tasks)]
struct NewTask<'a> {
    owner_id: &'a str,
    plant_id: Option<i32>,
    garden_bed_id: Option<i32>,
    title: &'a str,
    notes: Option<&'a str>,
    due_date: &'a str,
    completed: bool,
    recurring_rule: Option<&'a str>,
    created_at: &'a str,
    updated_at: &'a str,
}

pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the task(s) described by `draft`. Bulk-apply fan-out creates
    /// one independent task per plant currently in the bed; an empty bed
    /// creates nothing and is not an error.
    pub async fn create_task(&self, session: &Session, draft: &TaskDraft) -> Result<Vec<TaskItem>> {
        let owner_id = session.user_id()?;
        let title = draft.title.trim();
        if title.is_empty() {
            return Err(VerdantError::Validation("task title is required".into()));
        }
        // A rule that cannot be parsed must never reach the database.
        if let Some(raw) = draft.recurring_rule.as_deref() {
            RecurrenceRule::parse(raw)?;
        }

        let now = db::format_ts(Utc::now());
        let due = db::format_ts(draft.due_date);

        let mut conn = self.conn().await?;
        let mut created = Vec::new();

        match draft.garden_bed_id {
            Some(bed_id) if draft.apply_to_plants => {
                let plant_ids: Vec<i32> = plants::table
                    .filter(plants::owner_id.eq(owner_id))
                    .filter(plants::bed_id.eq(bed_id))
                    .filter(plants::archived.eq(false))
                    .select(plants::id)
                    .order(plants::id.asc())
                    .load(&mut conn)
                    .await
                    .map_err(|e| VerdantError::Runtime(e.to_string()))?;
                for plant_id in plant_ids {
                    let id = insert_task(
                        &mut conn,
                        NewTask {
                            owner_id,
                            plant_id: Some(plant_id),
                            garden_bed_id: Some(bed_id),
                            title,
                            notes: draft.notes.as_deref(),
                            due_date: &due,
                            completed: false,
                            recurring_rule: draft.recurring_rule.as_deref(),
                            created_at: &now,
                            updated_at: &now,
                        },
                    )
                    .await?;
                    created.push(id);
                }
                tracing::debug!(bed_id, count = created.len(), "fanned task out to bed plants");
            }
            _ => {
                let id = insert_task(
                    &mut conn,
                    NewTask {
                        owner_id,
                        plant_id: draft.plant_id,
                        garden_bed_id: draft.garden_bed_id,
                        title,
                        notes: draft.notes.as_deref(),
                        due_date: &due,
                        completed: false,
                        recurring_rule: draft.recurring_rule.as_deref(),
                        created_at: &now,
                        updated_at: &now,
                    },
                )
                .await?;
                created.push(id);
            }
        }
        drop(conn);

        let mut items = Vec::with_capacity(created.len());
        for id in created {
            items.push(self.get_task(session, id).await?);
        }
        Ok(items)
    }

    /// Marks a task complete. Recurring tasks keep their completed record as
    /// history and spawn the next occurrence strictly after `now`, computed
    /// from the rule anchored at the task's due date. Both writes run in one
    /// transaction. A malformed stored rule aborts the whole transition.
    pub async fn complete_task(
        &self,
        session: &Session,
        id: i32,
        now: DateTime<Utc>,
    ) -> Result<CompletionOutcome> {
        let owner_id = session.user_id()?;
        let row: TaskRow = {
            let mut conn = self.conn().await?;
            tasks::table
                .filter(tasks::owner_id.eq(owner_id))
                .filter(tasks::id.eq(id))
                .first(&mut conn)
                .await
                .optional()
                .map_err(|e| VerdantError::Runtime(e.to_string()))?
                .ok_or_else(|| VerdantError::NotFound(format!("task {id}")))?
        };

        let stamp = db::format_ts(now);

        let next = match row.recurring_rule.as_deref() {
            None => None,
            Some(raw) => {
                let rule = RecurrenceRule::parse(raw)?;
                let due = db::parse_ts(&row.due_date)?;
                rule.next_after(due, now)
            }
        };

        match next {
            None => {
                let mut conn = self.conn().await?;
                diesel::update(
                    tasks::table
                        .filter(tasks::owner_id.eq(owner_id))
                        .filter(tasks::id.eq(id)),
                )
                .set((tasks::completed.eq(true), tasks::updated_at.eq(&stamp)))
                .execute(&mut conn)
                .await
                .map_err(|e| VerdantError::Runtime(e.to_string()))?;
                drop(conn);
                Ok(CompletionOutcome::Single(self.get_task(session, id).await?))
            }
            Some(next) => {
                let next_stamp = db::format_ts(next);
                // Everything the closure borrows is declared before the
                // connection it runs on, so the borrows outlive the checkout.
                let mut conn = self.conn().await?;
                let next_id = conn
                    .transaction::<_, VerdantError, _>(|conn| {
                        let row = &row;
                        let stamp = &stamp;
                        let next_stamp = &next_stamp;
                        async move {
                            diesel::update(
                                tasks::table
                                    .filter(tasks::owner_id.eq(owner_id))
                                    .filter(tasks::id.eq(id)),
                            )
                            .set((tasks::completed.eq(true), tasks::updated_at.eq(stamp)))
                            .execute(conn)
                            .await?;

                            // Fresh identity, copied fields, inherited linkage.
                            diesel::insert_into(tasks::table)
                                .values(&NewTask {
                                    owner_id,
                                    plant_id: row.plant_id,
                                    garden_bed_id: row.garden_bed_id,
                                    title: &row.title,
                                    notes: row.notes.as_deref(),
                                    due_date: next_stamp,
                                    completed: false,
                                    recurring_rule: row.recurring_rule.as_deref(),
                                    created_at: stamp,
                                    updated_at: stamp,
                                })
                                .execute(conn)
                                .await?;

                            let next_id: i32 = tasks::table
                                .filter(tasks::owner_id.eq(owner_id))
                                .select(tasks::id)
                                .order(tasks::id.desc())
                                .first(conn)
                                .await?;
                            Ok(next_id)
                        }
                        .scope_boxed()
                    })
                    .await?;
                drop(conn);
                tracing::debug!(completed = id, next = next_id, "recurring task rolled forward");
                Ok(CompletionOutcome::Recurring {
                    completed: self.get_task(session, id).await?,
                    next: self.get_task(session, next_id).await?,
                })
            }
        }
    }

    /// Plain flag flip for non-recurring tasks. Tasks with a recurrence rule
    /// are managed through `complete_task`; in particular, reopening one after
    /// its successor was spawned would leave two live occurrences, so it is
    /// rejected outright.
    pub async fn set_completed(
        &self,
        session: &Session,
        id: i32,
        completed: bool,
    ) -> Result<TaskItem> {
        let owner_id = session.user_id()?;
        let mut conn = self.conn().await?;
        let rule: Option<String> = tasks::table
            .filter(tasks::owner_id.eq(owner_id))
            .filter(tasks::id.eq(id))
            .select(tasks::recurring_rule)
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| VerdantError::Runtime(e.to_string()))?
            .ok_or_else(|| VerdantError::NotFound(format!("task {id}")))?;
        if rule.is_some() {
            return Err(VerdantError::Validation(
                "recurring tasks cannot be toggled; complete them instead".into(),
            ));
        }

        let stamp = db::format_ts(Utc::now());
        diesel::update(
            tasks::table
                .filter(tasks::owner_id.eq(owner_id))
                .filter(tasks::id.eq(id)),
        )
        .set((tasks::completed.eq(completed), tasks::updated_at.eq(&stamp)))
        .execute(&mut conn)
        .await
        .map_err(|e| VerdantError::Runtime(e.to_string()))?;
        drop(conn);
        self.get_task(session, id).await
    }

    pub async fn get_task(&self, session: &Session, id: i32) -> Result<TaskItem> {
        let owner_id = session.user_id()?;
        let mut conn = self.conn().await?;
        let row: Option<JoinedTaskRow> = tasks::table
            .left_join(plants::table)
            .left_join(garden_beds::table)
            .filter(tasks::owner_id.eq(owner_id))
            .filter(tasks::id.eq(id))
            .select((
                tasks::all_columns,
                plants::name.nullable(),
                garden_beds::name.nullable(),
            ))
            .first(&mut conn)
            .await
            .optional()
            .map_err(|e| VerdantError::Runtime(e.to_string()))?;
        row.map(map_row)
            .transpose()?
            .ok_or_else(|| VerdantError::NotFound(format!("task {id}")))
    }

    /// All of the owner's tasks in the requested state, soonest due first.
    pub async fn list_tasks(&self, session: &Session, status: TaskStatus) -> Result<Vec<TaskItem>> {
        self.list_filtered(session, status, None, None).await
    }

    pub async fn tasks_for_plant(
        &self,
        session: &Session,
        plant_id: i32,
        status: TaskStatus,
    ) -> Result<Vec<TaskItem>> {
        self.list_filtered(session, status, Some(plant_id), None).await
    }

    pub async fn tasks_for_bed(
        &self,
        session: &Session,
        bed_id: i32,
        status: TaskStatus,
    ) -> Result<Vec<TaskItem>> {
        self.list_filtered(session, status, None, Some(bed_id)).await
    }

    pub async fn delete_task(&self, session: &Session, id: i32) -> Result<bool> {
        let owner_id = session.user_id()?;
        let mut conn = self.conn().await?;
        let deleted = diesel::delete(
            tasks::table
                .filter(tasks::owner_id.eq(owner_id))
                .filter(tasks::id.eq(id)),
        )
        .execute(&mut conn)
        .await
        .map_err(|e| VerdantError::Runtime(e.to_string()))?;
        Ok(deleted > 0)
    }

    async fn list_filtered(
        &self,
        session: &Session,
        status: TaskStatus,
        plant_id: Option<i32>,
        bed_id: Option<i32>,
    ) -> Result<Vec<TaskItem>> {
        let owner_id = session.user_id()?;
        let mut conn = self.conn().await?;
        let mut query = tasks::table
            .left_join(plants::table)
            .left_join(garden_beds::table)
            .filter(tasks::owner_id.eq(owner_id))
            .select((
                tasks::all_columns,
                plants::name.nullable(),
                garden_beds::name.nullable(),
            ))
            .into_boxed();

        match status {
            TaskStatus::Open => query = query.filter(tasks::completed.eq(false)),
            TaskStatus::Completed => query = query.filter(tasks::completed.eq(true)),
            TaskStatus::All => {}
        }
        if let Some(plant_id) = plant_id {
            query = query.filter(tasks::plant_id.eq(plant_id));
        }
        if let Some(bed_id) = bed_id {
            query = query.filter(tasks::garden_bed_id.eq(bed_id));
        }

        let rows: Vec<JoinedTaskRow> = query
            .order(tasks::due_date.asc())
            .load(&mut conn)
            .await
            .map_err(|e| VerdantError::Runtime(e.to_string()))?;
        rows.into_iter().map(map_row).collect()
    }

    async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        db::checkout(&self.pool).await
    }
}

async fn insert_task(conn: &mut SqlitePooledConn<'_>, new: NewTask<'_>) -> Result<i32> {
    diesel::insert_into(tasks::table)
        .values(&new)
        .execute(conn)
        .await
        .map_err(|e| VerdantError::Runtime(e.to_string()))?;
    tasks::table
        .filter(tasks::owner_id.eq(new.owner_id))
        .select(tasks::id)
        .order(tasks::id.desc())
        .first(conn)
        .await
        .map_err(|e| VerdantError::Runtime(e.to_string()))
}

fn map_row((row, plant_name, bed_name): JoinedTaskRow) -> Result<TaskItem> {
    Ok(TaskItem {
        id: row.id,
        plant_id: row.plant_id,
        garden_bed_id: row.garden_bed_id,
        plant_name,
        bed_name,
        title: row.title,
        notes: row.notes,
        due_date: db::parse_ts(&row.due_date)?,
        completed: row.completed,
        recurring_rule: row.recurring_rule,
        created_at: db::parse_ts(&row.created_at)?,
        updated_at: db::parse_ts(&row.updated_at)?,
    })
}
