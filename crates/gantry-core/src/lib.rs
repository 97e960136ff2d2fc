pub mod config;
pub mod dispatch;
pub mod error;
pub mod evaluate;
pub mod models;
pub mod registry;
pub mod scheduler;
pub mod store;

pub use error::{GantryError, GantryResult};
