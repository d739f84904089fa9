//! Repository layer for data access

pub mod campaigns;
pub mod contacts;
pub mod send_failures;

pub use campaigns::{CampaignStore, DbCampaignStore};
pub use contacts::{ContactStore, DbContactStore};
pub use send_failures::{DbSendFailureStore, SendFailureStore};

/// Map a sqlx error into the common error type
pub(crate) fn db_err(e: sqlx::Error) -> bullhorn_common::Error {
    bullhorn_common::Error::Database(e.to_string())
}
