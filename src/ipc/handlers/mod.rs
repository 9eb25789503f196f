pub mod cohort;
pub mod core;
pub mod courses;
pub mod ingest;
