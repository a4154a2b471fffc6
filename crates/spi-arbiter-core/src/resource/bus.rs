//! Whole-bus resource

use std::sync::Arc;

use crate::config::SpiConfig;
use crate::error::{Result, SpiError};
use crate::registry::{ClaimMode, Registry};
use crate::transaction::{self, Operation, TransactionResults};

use super::Lease;

/// Exclusive ownership of one bus, without chip select management
///
/// Every data argument must be a whole number of words (see
/// [`codec`](crate::codec)); anything else fails with `WrongAmountOfData`
/// before the bus is touched.
pub struct Bus {
    lease: Lease,
}

impl Bus {
    /// Claim a whole bus
    ///
    /// `config.cs_pin` must be `None`.
    pub fn get(registry: &Arc<Registry>, config: SpiConfig) -> Result<Self> {
        if config.cs_pin.is_some() {
            return Err(SpiError::OperationNotSupported);
        }
        let lease = Lease::acquire(registry, config, ClaimMode::ExclusiveBus)?;
        log::debug!("bus {}: acquired", lease.config().bus);
        Ok(Self { lease })
    }

    /// Configuration this bus was created with
    pub fn config(&self) -> &SpiConfig {
        self.lease.config()
    }

    /// True until the bus is released or invalidated
    pub fn is_live(&self) -> bool {
        self.lease.is_live()
    }

    /// Write a single word
    pub fn write_word(&mut self, word: &[u8]) -> Result<()> {
        let _span = self.lease.span()?;
        let word = self.lease.pack_one(word)?;
        self.lease.write_words(&[word])
    }

    /// Write a whole number of words
    pub fn write_n_words(&mut self, words: &[u8]) -> Result<()> {
        let _span = self.lease.span()?;
        let words = self.lease.pack(words)?;
        self.lease.write_words(&words)
    }

    /// Read a single word
    pub fn read_word(&mut self) -> Result<Vec<u8>> {
        self.read_n_words(1)
    }

    /// Read `count` words
    ///
    /// Fails with `OperationNotSupported` on full-duplex-only backends.
    pub fn read_n_words(&mut self, count: u64) -> Result<Vec<u8>> {
        let _span = self.lease.span()?;
        let words = self.lease.read_words(count)?;
        Ok(self.lease.unpack(&words))
    }

    /// Write one word while reading one back
    pub fn transfer_word(&mut self, word: &[u8]) -> Result<Vec<u8>> {
        let _span = self.lease.span()?;
        let word = self.lease.pack_one(word)?;
        let read = self.lease.transfer_words(&[word])?;
        Ok(self.lease.unpack(&read))
    }

    /// Full-duplex transfer of a whole number of words
    pub fn transfer_n_words(&mut self, words: &[u8]) -> Result<Vec<u8>> {
        let _span = self.lease.span()?;
        let words = self.lease.pack(words)?;
        let read = self.lease.transfer_words(&words)?;
        Ok(self.lease.unpack(&read))
    }

    /// Run operations back to back while holding the bus
    pub fn transaction(&mut self, operations: &[Operation]) -> TransactionResults {
        let _span = match self.lease.span() {
            Ok(span) => span,
            Err(e) => return TransactionResults::failed(operations.len(), e),
        };
        TransactionResults::new(transaction::execute(&self.lease, operations), None)
    }

    /// Give the bus back to the registry
    ///
    /// Fails with `ResourceInvalidated` if the bus was already invalidated.
    pub fn release(mut self) -> Result<()> {
        log::debug!("bus {}: released", self.lease.config().bus);
        self.lease.release()
    }
}
