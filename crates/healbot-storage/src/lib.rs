//! HealBot storage crate - SQLite key/value database and the patient
//! identity store built on it.

pub mod db;
pub mod identity;
pub mod migrations;

pub use db::Database;
pub use identity::{IdentityStore, MemoryIdentityStore, SqliteIdentityStore};
