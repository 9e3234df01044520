//! Database module: row models and SQL repositories.
//!
//! Split into two submodules:
//! - `model`: typed rows returned by queries.
//! - `repo`: SQL-only functions that map rows into those types.
//!
//! External modules should import from `tg_showwatch::db` — the repository
//! API and the row models are re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::CatalogEntry;
