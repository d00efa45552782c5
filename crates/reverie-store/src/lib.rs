//! # reverie-store
//!
//! SQLite persistence for journal entries, encryption profiles, friendships
//! and POV sharing bookkeeping.
//!
//! Journal titles and bodies reach this crate already encrypted; the store
//! never sees key material. The crate exposes a synchronous `Database` handle
//! that wraps a `rusqlite::Connection` and provides typed CRUD helpers for
//! every domain model.

pub mod blocks;
pub mod database;
pub mod entries;
pub mod friendships;
pub mod migrations;
pub mod models;
pub mod profiles;
pub mod replies;
pub mod users;

mod convert;
mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
