pub mod config;
pub mod database;
pub mod fetch_repository;
pub mod job_repository;

pub use config::DatabaseConfig;
pub use database::Database;
pub use fetch_repository::FetchRecordRepository;
pub use job_repository::ScheduledJobRepository;
