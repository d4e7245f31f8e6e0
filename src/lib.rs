pub mod beds;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod journal;
pub mod logging;
pub mod photos;
pub mod plants;
pub mod recurrence;
pub mod runtime_paths;
pub mod schema;
pub mod session;
pub mod storage;
pub mod tasks;
pub mod timeline;

pub type Result<T> = std::result::Result<T, error::VerdantError>;
