//! Controller resource: a bus plus one chip select

use std::sync::Arc;

use crate::backend::BackendFeatures;
use crate::config::SpiConfig;
use crate::error::{Result, SpiError};
use crate::registry::{ClaimMode, Registry};
use crate::transaction::{self, Operation, TransactionResults};

use super::Lease;

/// Controller driving one chip select on a (possibly shared) bus
///
/// Data operations select the chip automatically: assert CS, wait the
/// configured transmission delay, transfer, deassert CS. After
/// [`select_chip`](Controller::select_chip) the chip stays selected and data
/// operations just transfer, until [`deselect_chip`](Controller::deselect_chip).
///
/// While the chip is selected the controller holds the bus transfer lock, so
/// controllers on other chip selects of the same bus wait.
pub struct Controller {
    lease: Lease,
    cs: String,
    selected: bool,
}

impl Controller {
    /// Claim a chip select
    ///
    /// `config.cs_pin` is required. Fails with `OperationNotSupported` if the
    /// backend cannot drive chip select lines.
    pub fn get(registry: &Arc<Registry>, config: SpiConfig) -> Result<Self> {
        let Some(cs) = config.cs_pin.clone() else {
            return Err(SpiError::OperationNotSupported);
        };
        let lease = Lease::acquire(registry, config, ClaimMode::ExclusiveCs)?;
        if !lease.features().contains(BackendFeatures::CHIP_SELECT) {
            return Err(SpiError::OperationNotSupported);
        }
        log::debug!("controller {}/{}: acquired", lease.config().bus, cs);
        Ok(Self {
            lease,
            cs,
            selected: false,
        })
    }

    /// Configuration this controller was created with
    pub fn config(&self) -> &SpiConfig {
        self.lease.config()
    }

    /// True until the controller is released or invalidated
    pub fn is_live(&self) -> bool {
        self.lease.is_live()
    }

    /// True while the chip is manually selected
    pub fn is_chip_selected(&self) -> bool {
        self.selected
    }

    /// Assert chip select and keep it asserted across data operations
    ///
    /// Fails with `ChipSelectFault` if the chip is already selected.
    pub fn select_chip(&mut self) -> Result<()> {
        self.lease.check_live()?;
        if self.selected {
            return Err(SpiError::ChipSelectFault);
        }

        let owner = self.lease.id();
        let acquired = self.lease.line().lock_wire(owner);
        match self.assert_cs() {
            Ok(()) => {
                self.selected = true;
                Ok(())
            }
            Err(e) => {
                self.abort_select();
                if acquired {
                    self.lease.line().unlock_wire(owner);
                }
                Err(e)
            }
        }
    }

    /// Deassert a manually asserted chip select
    ///
    /// Fails with `ChipSelectFault` if the chip is not selected.
    pub fn deselect_chip(&mut self) -> Result<()> {
        self.lease.check_live()?;
        if !self.selected {
            return Err(SpiError::ChipSelectFault);
        }
        self.selected = false;
        let result = self.deassert_cs();
        self.lease.line().unlock_wire(self.lease.id());
        result
    }

    /// Write a single word
    pub fn write_word(&mut self, word: &[u8]) -> Result<()> {
        self.with_chip_selected(|lease| {
            let word = lease.pack_one(word)?;
            lease.write_words(&[word])
        })
    }

    /// Write a whole number of words
    pub fn write_n_words(&mut self, words: &[u8]) -> Result<()> {
        self.with_chip_selected(|lease| {
            let words = lease.pack(words)?;
            lease.write_words(&words)
        })
    }

    /// Read a single word
    pub fn read_word(&mut self) -> Result<Vec<u8>> {
        self.read_n_words(1)
    }

    /// Read `count` words
    ///
    /// Fails with `OperationNotSupported` on full-duplex-only backends.
    pub fn read_n_words(&mut self, count: u64) -> Result<Vec<u8>> {
        self.with_chip_selected(|lease| {
            let words = lease.read_words(count)?;
            Ok(lease.unpack(&words))
        })
    }

    /// Write one word while reading one back
    pub fn transfer_word(&mut self, word: &[u8]) -> Result<Vec<u8>> {
        self.with_chip_selected(|lease| {
            let word = lease.pack_one(word)?;
            let read = lease.transfer_words(&[word])?;
            Ok(lease.unpack(&read))
        })
    }

    /// Full-duplex transfer of a whole number of words
    pub fn transfer_n_words(&mut self, words: &[u8]) -> Result<Vec<u8>> {
        self.with_chip_selected(|lease| {
            let words = lease.pack(words)?;
            let read = lease.transfer_words(&words)?;
            Ok(lease.unpack(&read))
        })
    }

    /// Run operations with chip select held for the whole sequence
    ///
    /// Returns one result per operation. If the chip was not manually
    /// selected, CS is asserted before the first operation and deasserted
    /// after the last whatever the outcomes; a deassert failure shows up in
    /// [`TransactionResults::deselect_fault`].
    pub fn transaction(&mut self, operations: &[Operation]) -> TransactionResults {
        if let Err(e) = self.lease.check_live() {
            return TransactionResults::failed(operations.len(), e);
        }
        if self.selected {
            return TransactionResults::new(transaction::execute(&self.lease, operations), None);
        }

        let _span = match self.lease.span() {
            Ok(span) => span,
            Err(e) => return TransactionResults::failed(operations.len(), e),
        };
        if let Err(e) = self.assert_cs() {
            self.abort_select();
            return TransactionResults::failed(operations.len(), e);
        }

        let results = transaction::execute(&self.lease, operations);
        let deselect_fault = self.deassert_cs().err();
        if let Some(e) = &deselect_fault {
            log::warn!(
                "controller {}/{}: chip select release failed after transaction: {}",
                self.lease.config().bus,
                self.cs,
                e
            );
        }
        TransactionResults::new(results, deselect_fault)
    }

    /// Give the chip select back to the registry
    ///
    /// A manually selected chip is deselected first. Fails with
    /// `ResourceInvalidated` if the controller was already invalidated.
    pub fn release(mut self) -> Result<()> {
        self.force_deselect();
        log::debug!("controller {}/{}: released", self.lease.config().bus, self.cs);
        self.lease.release()
    }

    /// Run `f` with the chip selected, bracketing it with CS if needed
    fn with_chip_selected<T>(&mut self, f: impl FnOnce(&Lease) -> Result<T>) -> Result<T> {
        self.lease.check_live()?;
        if self.selected {
            return f(&self.lease);
        }

        let _span = self.lease.span()?;
        if let Err(e) = self.assert_cs() {
            self.abort_select();
            return Err(e);
        }
        let result = f(&self.lease);
        let deassert = self.deassert_cs();
        let value = result?;
        deassert?;
        Ok(value)
    }

    fn assert_cs(&self) -> Result<()> {
        log::trace!("controller {}/{}: CS assert", self.lease.config().bus, self.cs);
        self.lease.set_cs(&self.cs, true)?;
        let delay = self.lease.config().transmission_delay;
        if delay > 0 {
            self.lease.delay(delay)?;
        }
        Ok(())
    }

    /// Deassert chip select
    ///
    /// Once the claim is dead the registry has already released the line, so
    /// there is nothing left to drive.
    fn deassert_cs(&self) -> Result<()> {
        log::trace!("controller {}/{}: CS deassert", self.lease.config().bus, self.cs);
        match self.lease.set_cs(&self.cs, false) {
            Err(SpiError::ResourceInvalidated) => Ok(()),
            result => result,
        }
    }

    /// Leave the line idle after a failed assert, which may have half-happened
    fn abort_select(&self) {
        if let Err(e) = self.deassert_cs() {
            log::warn!(
                "controller {}/{}: chip select release after failed assert failed: {}",
                self.lease.config().bus,
                self.cs,
                e
            );
        }
    }

    fn force_deselect(&mut self) {
        if self.selected {
            self.selected = false;
            if let Err(e) = self.deassert_cs() {
                log::warn!(
                    "controller {}/{}: chip select release failed: {}",
                    self.lease.config().bus,
                    self.cs,
                    e
                );
            }
            self.lease.line().unlock_wire(self.lease.id());
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.force_deselect();
    }
}
