mod delegation;
mod sqlite;

pub use sqlite::SqliteStore;
