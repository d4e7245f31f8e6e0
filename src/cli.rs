use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};

use crate::beds::{BedDraft, GardenBedStore};
use crate::config::Config;
use crate::error::VerdantError;
use crate::journal::JournalStore;
use crate::photos::PhotoStore;
use crate::plants::{PlantDraft, PlantStore};
use crate::session::Session;
use crate::storage::PhotoStorage;
use crate::tasks::{CompletionOutcome, TaskDraft, TaskStatus, TaskStore};
use crate::{db, timeline, Result};

#[derive(Parser, Debug)]
#[command(name = "verdant")]
#[command(about = "Track plants, beds, journals, photos, and care tasks")]
#[command(version, long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("VERDANT_GIT_SHA"), ")"))]
pub struct Cli {
    /// Path to a JSON config file; missing files fall back to defaults.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database path (overrides the config file and platform default).
    #[arg(long, global = true, env = "VERDANT_DB")]
    pub db: Option<String>,

    /// Photo storage root (overrides the config file and platform default).
    #[arg(long, global = true, env = "VERDANT_PHOTOS")]
    pub photos: Option<PathBuf>,

    /// Acting user; every record is scoped to this id.
    #[arg(long, global = true, env = "VERDANT_USER")]
    pub user: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage plants
    #[command(subcommand)]
    Plants(PlantsCommand),
    /// Manage garden beds
    #[command(subcommand)]
    Beds(BedsCommand),
    /// Manage care tasks
    #[command(subcommand)]
    Tasks(TasksCommand),
    /// Add or list journal entries
    #[command(subcommand)]
    Journal(JournalCommand),
    /// Attach photos to plants
    #[command(subcommand)]
    Photos(PhotosCommand),
    /// Show a plant's merged journal-and-photo history, newest first
    Timeline {
        plant_id: i32,
    },
    /// Browse or extend the variety catalog
    #[command(subcommand)]
    Varieties(VarietiesCommand),
}

#[derive(Subcommand, Debug)]
pub enum PlantsCommand {
    Add(PlantAddArgs),
    List,
    Show {
        id: i32,
    },
    /// Hide a plant from listings without losing its history
    Archive {
        id: i32,
    },
    /// Permanently delete a plant, its photos, journals, and tasks
    Rm {
        id: i32,
    },
}

#[derive(Args, Debug)]
pub struct PlantAddArgs {
    pub name: String,
    /// Pre-fill family and harvest window from this catalog variety
    #[arg(long)]
    pub variety: Option<i32>,
    #[arg(long)]
    pub bed: Option<i32>,
    #[arg(long)]
    pub from_seed: bool,
    #[arg(long)]
    pub seed_source: Option<String>,
    /// Planted date, YYYY-MM-DD
    #[arg(long)]
    pub planted: Option<String>,
    #[arg(long)]
    pub notes: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum BedsCommand {
    Add {
        name: String,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        size: Option<String>,
        #[arg(long)]
        sun: Option<String>,
        #[arg(long)]
        irrigation: Option<String>,
    },
    List,
    /// Retire a bed; its record and history are kept
    Deactivate {
        id: i32,
    },
}

#[derive(Subcommand, Debug)]
pub enum TasksCommand {
    Add(TaskAddArgs),
    List {
        /// open (default), completed, or all
        #[arg(long)]
        status: Option<String>,
    },
    /// Complete a task; recurring tasks spawn their next occurrence
    Done {
        id: i32,
    },
    Rm {
        id: i32,
    },
}

#[derive(Args, Debug)]
pub struct TaskAddArgs {
    pub title: String,
    /// Due date, YYYY-MM-DD (defaults to today)
    #[arg(long)]
    pub due: Option<String>,
    #[arg(long)]
    pub notes: Option<String>,
    /// Recurrence rule, e.g. FREQ=WEEKLY or FREQ=DAILY;INTERVAL=3
    #[arg(long)]
    pub repeat: Option<String>,
    #[arg(long)]
    pub plant: Option<i32>,
    #[arg(long)]
    pub bed: Option<i32>,
    /// With --bed: create one task per plant in the bed instead of one bed task
    #[arg(long, requires = "bed")]
    pub each_plant: bool,
}

#[derive(Subcommand, Debug)]
pub enum JournalCommand {
    Add {
        plant_id: i32,
        text: String,
    },
    List {
        plant_id: i32,
    },
    Rm {
        id: i32,
    },
}

#[derive(Subcommand, Debug)]
pub enum PhotosCommand {
    /// Upload an image file and record it against a plant
    Add {
        plant_id: i32,
        file: PathBuf,
        /// Attach to a journal entry; attached photos fold into that entry
        #[arg(long)]
        journal: Option<i32>,
    },
    List {
        plant_id: i32,
    },
}

#[derive(Subcommand, Debug)]
pub enum VarietiesCommand {
    List,
    Add {
        name: String,
        #[arg(long)]
        family: Option<String>,
        #[arg(long)]
        days_to_harvest: Option<i32>,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::load_or_default(cli.config.as_deref())?;
    let db_path = cli.db.clone().unwrap_or_else(|| config.resolve_db_path());
    let photo_root = cli
        .photos
        .clone()
        .unwrap_or_else(|| config.resolve_photo_root());
    let user = cli
        .user
        .clone()
        .or_else(|| config.default_user.clone())
        .unwrap_or_else(|| "gardener".to_string());
    let session = Session::authenticated(user);

    tracing::debug!(db = %db_path, photos = %photo_root.to_string_lossy(), "opening stores");
    let pool = db::connect(&db_path).await?;
    let photo_storage = PhotoStorage::open(photo_root)?;
    let plants = PlantStore::new(pool.clone());
    let beds = GardenBedStore::new(pool.clone());
    let tasks = TaskStore::new(pool.clone());
    let journals = JournalStore::new(pool.clone());
    let photos = PhotoStore::new(pool);

    match cli.command {
        Command::Plants(command) => match command {
            PlantsCommand::Add(args) => {
                let mut draft = match args.variety {
                    Some(variety_id) => {
                        let varieties = plants.list_varieties().await?;
                        let variety = varieties
                            .iter()
                            .find(|v| v.id == variety_id)
                            .ok_or_else(|| {
                                VerdantError::NotFound(format!("variety {variety_id}"))
                            })?;
                        PlantDraft::from_variety(variety)
                    }
                    None => PlantDraft::default(),
                };
                draft.name = args.name;
                draft.bed_id = args.bed;
                draft.from_seed = args.from_seed;
                draft.seed_source = args.seed_source;
                draft.planted_date = args.planted.as_deref().map(parse_date).transpose()?;
                draft.notes = args.notes;
                print_json(&plants.create_plant(&session, &draft).await?)
            }
            PlantsCommand::List => print_json(&plants.list_plants(&session).await?),
            PlantsCommand::Show { id } => print_json(&plants.get_plant(&session, id).await?),
            PlantsCommand::Archive { id } => {
                if plants.archive_plant(&session, id).await? {
                    println!("archived plant {id}");
                } else {
                    println!("plant {id} not found");
                }
                Ok(())
            }
            PlantsCommand::Rm { id } => {
                plants.delete_plant(&session, id, &photo_storage).await?;
                println!("deleted plant {id}");
                Ok(())
            }
        },
        Command::Beds(command) => match command {
            BedsCommand::Add {
                name,
                location,
                size,
                sun,
                irrigation,
            } => print_json(
                &beds
                    .create_bed(
                        &session,
                        &BedDraft {
                            name,
                            location,
                            size,
                            sun_exposure: sun,
                            irrigation,
                            ..BedDraft::default()
                        },
                    )
                    .await?,
            ),
            BedsCommand::List => print_json(&beds.list_beds(&session).await?),
            BedsCommand::Deactivate { id } => {
                if beds.deactivate_bed(&session, id).await? {
                    println!("deactivated bed {id}");
                } else {
                    println!("bed {id} not found");
                }
                Ok(())
            }
        },
        Command::Tasks(command) => match command {
            TasksCommand::Add(args) => {
                let due_date = match args.due.as_deref() {
                    Some(raw) => parse_date(raw)?,
                    None => Utc::now(),
                };
                let created = tasks
                    .create_task(
                        &session,
                        &TaskDraft {
                            title: args.title,
                            notes: args.notes,
                            due_date,
                            recurring_rule: args.repeat,
                            plant_id: args.plant,
                            garden_bed_id: args.bed,
                            apply_to_plants: args.each_plant,
                        },
                    )
                    .await?;
                if created.is_empty() {
                    println!("bed has no plants; nothing created");
                    Ok(())
                } else {
                    print_json(&created)
                }
            }
            TasksCommand::List { status } => print_json(
                &tasks
                    .list_tasks(&session, TaskStatus::from_option(status.as_deref()))
                    .await?,
            ),
            TasksCommand::Done { id } => {
                match tasks.complete_task(&session, id, Utc::now()).await? {
                    CompletionOutcome::Single(item) => {
                        println!("completed \"{}\"", item.title);
                    }
                    CompletionOutcome::Recurring { completed, next } => {
                        println!(
                            "completed \"{}\"; next due {}",
                            completed.title,
                            next.due_date.format("%Y-%m-%d")
                        );
                    }
                }
                Ok(())
            }
            TasksCommand::Rm { id } => {
                if tasks.delete_task(&session, id).await? {
                    println!("deleted task {id}");
                } else {
                    println!("task {id} not found");
                }
                Ok(())
            }
        },
        Command::Journal(command) => match command {
            JournalCommand::Add { plant_id, text } => {
                print_json(&journals.create_entry(&session, plant_id, &text).await?)
            }
            JournalCommand::List { plant_id } => {
                print_json(&journals.entries_for_plant(&session, plant_id).await?)
            }
            JournalCommand::Rm { id } => {
                if journals.delete_entry(&session, id).await? {
                    println!("deleted entry {id}");
                } else {
                    println!("entry {id} not found");
                }
                Ok(())
            }
        },
        Command::Photos(command) => match command {
            PhotosCommand::Add {
                plant_id,
                file,
                journal,
            } => {
                let bytes = std::fs::read(&file).map_err(|e| {
                    VerdantError::Storage(format!(
                        "failed to read {}: {e}",
                        file.to_string_lossy()
                    ))
                })?;
                print_json(
                    &photos
                        .upload_photo(&session, &photo_storage, plant_id, journal, &bytes)
                        .await?,
                )
            }
            PhotosCommand::List { plant_id } => {
                print_json(&photos.photos_for_plant(&session, plant_id).await?)
            }
        },
        Command::Timeline { plant_id } => print_json(
            &timeline::plant_timeline(&journals, &photos, &photo_storage, &session, plant_id)
                .await?,
        ),
        Command::Varieties(command) => match command {
            VarietiesCommand::List => print_json(&plants.list_varieties().await?),
            VarietiesCommand::Add {
                name,
                family,
                days_to_harvest,
            } => print_json(
                &plants
                    .add_variety(&name, family.as_deref(), days_to_harvest)
                    .await?,
            ),
        },
    }
}

/// Accepts a bare `YYYY-MM-DD` (taken as UTC midnight) or a full RFC 3339
/// timestamp.
fn parse_date(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| VerdantError::Validation(format!("invalid date: {raw}")))?;
        return Ok(midnight.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| VerdantError::Validation(format!("invalid date: {raw} (expected YYYY-MM-DD)")))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| VerdantError::Runtime(format!("failed to render output: {e}")))?;
    println!("{rendered}");
    Ok(())
}
