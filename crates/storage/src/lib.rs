//! Storage implementations for StudyGuide.

pub mod sqlite;

pub use sqlite::SqliteStore;
