pub mod database;
pub mod stores;

pub use database::Database;
pub use stores::{SqliteAlertStore, SqliteDecisionStore, SqliteTradeStore, SqliteUsageStore};
