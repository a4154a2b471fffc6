//! Transaction engine
//!
//! A transaction is an ordered list of [`Operation`]s run as one unit. Each
//! operation yields its own [`OperationResult`]; a failed operation is
//! recorded and the next one still runs, so the caller gets a complete trace.
//! Chip select bracketing (controllers) and the bus transfer lock are handled
//! by the resource around [`execute`].

use std::ops::Deref;

use crate::error::{Result, SpiError};
use crate::resource::Lease;

/// One step of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Read this many words
    Read(u64),
    /// Write these bytes (a whole number of words)
    Write(Vec<u8>),
    /// Full-duplex transfer of these bytes (a whole number of words)
    Transfer(Vec<u8>),
    /// Wait this many microseconds without touching the data lines
    Delay(u64),
}

/// Outcome of one operation
///
/// `Ok(Some(bytes))` for reads and transfers, `Ok(None)` for writes and delays.
pub type OperationResult = Result<Option<Vec<u8>>>;

/// Results of a transaction, one per operation, in order
///
/// Dereferences to `[OperationResult]`. A failure to release chip select at
/// the end is reported separately through
/// [`deselect_fault`](TransactionResults::deselect_fault) so it cannot be
/// mistaken for the failure of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionResults {
    results: Vec<OperationResult>,
    deselect_fault: Option<SpiError>,
}

impl TransactionResults {
    pub(crate) fn new(results: Vec<OperationResult>, deselect_fault: Option<SpiError>) -> Self {
        Self {
            results,
            deselect_fault,
        }
    }

    /// Every operation failed with the same error before anything ran
    pub(crate) fn failed(len: usize, err: SpiError) -> Self {
        Self::new(vec![Err(err); len], None)
    }

    /// Error raised while deasserting chip select after the last operation
    pub fn deselect_fault(&self) -> Option<&SpiError> {
        self.deselect_fault.as_ref()
    }

    /// True if every operation succeeded and chip select was released cleanly
    pub fn is_ok(&self) -> bool {
        self.deselect_fault.is_none() && self.results.iter().all(|r| r.is_ok())
    }

    /// Index and error of the first failed operation
    pub fn first_error(&self) -> Option<(usize, &SpiError)> {
        self.results
            .iter()
            .enumerate()
            .find_map(|(i, r)| r.as_ref().err().map(|e| (i, e)))
    }

    /// Per-operation results
    pub fn into_vec(self) -> Vec<OperationResult> {
        self.results
    }
}

impl Deref for TransactionResults {
    type Target = [OperationResult];

    fn deref(&self) -> &Self::Target {
        &self.results
    }
}

impl IntoIterator for TransactionResults {
    type Item = OperationResult;
    type IntoIter = std::vec::IntoIter<OperationResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

/// Run every operation in order, capturing one result each
pub(crate) fn execute(lease: &Lease, operations: &[Operation]) -> Vec<OperationResult> {
    operations
        .iter()
        .enumerate()
        .map(|(i, op)| {
            let result = execute_one(lease, op);
            if let Err(e) = &result {
                log::debug!(
                    "{}: transaction step {} ({}) failed: {}",
                    lease.line().label(),
                    i,
                    op.name(),
                    e
                );
            }
            result
        })
        .collect()
}

fn execute_one(lease: &Lease, op: &Operation) -> OperationResult {
    lease.check_live()?;
    match op {
        Operation::Read(count) => {
            let words = lease.read_words(*count)?;
            Ok(Some(lease.unpack(&words)))
        }
        Operation::Write(bytes) => {
            let words = lease.pack(bytes)?;
            lease.write_words(&words)?;
            Ok(None)
        }
        Operation::Transfer(bytes) => {
            let words = lease.pack(bytes)?;
            let read = lease.transfer_words(&words)?;
            Ok(Some(lease.unpack(&read)))
        }
        Operation::Delay(us) => {
            lease.delay(*us)?;
            Ok(None)
        }
    }
}

impl Operation {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Read(_) => "read",
            Self::Write(_) => "write",
            Self::Transfer(_) => "transfer",
            Self::Delay(_) => "delay",
        }
    }
}
