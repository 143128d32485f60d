//! Data layer module
//!
//! Handles all data persistence and caching:
//! - SQLite database operations
//! - Active viewer cache (volatile)

mod cache;
mod database;
mod models;

pub use cache::ViewerCache;
pub use database::{
    ConversationFilter, Database, SEARCH_HISTORY_LIMIT, SafetyColumns, SafetyRecords,
    SearchFilter,
};
pub use models::*;

#[cfg(test)]
mod database_test;
