//! SQLite persistence for conversation turns.

#[macro_use]
extern crate tracing;

mod db;
mod migrations;
mod sqlite;

pub use db::Database;
pub use sqlite::SqliteStore;
