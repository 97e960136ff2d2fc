mod core;
mod defs;
mod lease;
mod submissions;
mod tasks;
mod testbeds;

pub use core::SqliteStore;

use crate::delegation::impl_store_delegates;

impl_store_delegates!(SqliteStore, SqliteStore::run_migrations_impl);
