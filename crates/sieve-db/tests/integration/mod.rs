pub mod common;
mod fetch_record_tests;
mod scheduled_job_tests;
