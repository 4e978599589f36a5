pub mod db;
pub mod ledger;
pub mod repository;

pub use db::Db;
pub use ledger::{Ledger, SOURCE_PRIORITY};
pub use repository::{ChunkFailure, Repository, UpsertOutcome};
