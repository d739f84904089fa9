//! Bullhorn Storage - Database access layer
//!
//! This crate provides the Postgres-backed persistence for Bullhorn:
//! campaign rows (status, lease, cursor, counters), contact lists, and
//! per-recipient failure records.

pub mod db;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use models::*;
pub use repository::*;
