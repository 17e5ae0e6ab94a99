//! Walking an account's transfer history.
//!
//! Every `TransferLog` links back to the previous transfer for each of its two
//! accounts, so an account's history is a singly linked list threaded through
//! the log. [`TransferCursor`] follows it newest first.

use crate::error::Result;
use crate::storage::record::{StateRecord, TransferLog};
use crate::storage::state_log::AccountKey;
use crate::storage::state_view::StateView;
use serde::Serialize;

/// A transfer resolved to names, as shown to users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferLogEntry {
    pub from: String,
    pub to: String,
    pub stock: String,
    pub amount: u64,
    pub from_balance: u64,
    pub to_balance: u64,
    /// Milliseconds, from the owning transaction. Zero when there is none.
    pub utc_time: u64,
}

pub struct TransferCursor<'a> {
    view: &'a StateView,
    offset: u64,
    record: TransferLog,
}

impl<'a> TransferCursor<'a> {
    pub fn at(view: &'a StateView, offset: u64) -> Result<TransferCursor<'a>> {
        let record = view.get_transfer(offset)?;
        Ok(TransferCursor {
            view,
            offset,
            record,
        })
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn record(&self) -> &TransferLog {
        &self.record
    }

    pub fn utc_time(&self) -> Result<u64> {
        let offset = match self.record.owning_transaction_offset {
            Some(offset) => offset,
            None => return Ok(0),
        };
        match self.view.get_record(offset)? {
            StateRecord::StartTransaction(start) => Ok(start.utc_time),
            _ => Ok(0),
        }
    }

    pub fn entry(&self) -> Result<TransferLogEntry> {
        Ok(TransferLogEntry {
            from: self.view.get_name_for_index(self.record.from_idx)?,
            to: self.view.get_name_for_index(self.record.to_idx)?,
            stock: self.view.get_name_for_index(self.record.type_idx)?,
            amount: self.record.amount,
            from_balance: self.record.new_from_balance,
            to_balance: self.record.new_to_balance,
            utc_time: self.utc_time()?,
        })
    }

    /// Steps to the previous transfer touching `account_idx`. Returns false
    /// at the start of the history; an issue record is always the start.
    pub fn previous(&mut self, account_idx: u64) -> Result<bool> {
        if self.record.from_idx == self.record.to_idx {
            return Ok(false);
        }
        let link = if account_idx == self.record.to_idx {
            self.record.last_to_offset
        } else if account_idx == self.record.from_idx {
            self.record.last_from_offset
        } else {
            None
        };
        match link {
            Some(prev) if prev < self.offset => {
                self.record = self.view.get_transfer(prev)?;
                self.offset = prev;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl StateView {
    pub fn get_last_transfer(&self, account: &str, stock: &str) -> Result<Option<TransferCursor<'_>>> {
        let (account_idx, type_idx) =
            match (self.get_name_index(account)?, self.get_name_index(stock)?) {
                (Some(a), Some(t)) => (a, t),
                _ => return Ok(None),
            };
        match self.last_transfer(&AccountKey::new(account_idx, type_idx))? {
            Some(offset) => Ok(Some(TransferCursor::at(self, offset)?)),
            None => Ok(None),
        }
    }

    /// History of one (account, stock) pair, newest first, restricted to
    /// transfers whose time lies in `[start, end]`.
    pub fn get_transaction_log(
        &self,
        account: &str,
        stock: &str,
        start: u64,
        end: u64,
    ) -> Result<Vec<TransferLogEntry>> {
        let account_idx = match self.get_name_index(account)? {
            Some(idx) => idx,
            None => return Ok(vec![]),
        };
        let mut cursor = match self.get_last_transfer(account, stock)? {
            Some(cursor) => cursor,
            None => return Ok(vec![]),
        };

        let mut log = vec![];
        loop {
            let utc_time = cursor.utc_time()?;
            if utc_time < start {
                break;
            }
            if utc_time <= end {
                log.push(cursor.entry()?);
            }
            if !cursor.previous(account_idx)? {
                break;
            }
        }
        Ok(log)
    }
}
