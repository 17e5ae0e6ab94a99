//! Data storage and persistence
//!
//! The append-only state log and its sled indices, layered views over it,
//! the ledger operations that append to those views, and the transaction
//! pool.

pub mod keyvalue;
pub mod ledger;
pub mod record;
pub mod state_log;
pub mod state_view;
pub mod transaction_pool;
pub mod transfer_cursor;

pub use keyvalue::{KeyValueTree, TreeKey};
pub use ledger::{ISSUED, STATE_CHUNK_SIZE};
pub use record::{RecordKind, StateRecord};
pub use state_log::{AccountKey, StateLog};
pub use state_view::{Base, Savepoint, StateView, ViewHandle};
pub use transaction_pool::{Tier, TransactionPool};
pub use transfer_cursor::{TransferCursor, TransferLogEntry};
