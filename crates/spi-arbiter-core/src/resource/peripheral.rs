//! Peripheral resource
//!
//! A peripheral does not drive the clock or chip select; it reacts to an
//! external controller. Every bit cycle must be sampled before it is driven:
//! [`Peripheral::write_bit`] is only accepted after a
//! [`Peripheral::read_bit`] for the same cycle.

use std::sync::Arc;

use crate::backend::BackendFeatures;
use crate::codec::{self, Word};
use crate::config::SpiConfig;
use crate::error::{Result, SpiError};
use crate::registry::{ClaimMode, Registry};

use super::Lease;

/// Bus claimed in peripheral mode
pub struct Peripheral {
    lease: Lease,
    /// Chip select state seen by the last poll
    selected: bool,
    /// The current bit cycle has been sampled but not yet driven
    pending_read: bool,
}

impl Peripheral {
    /// Claim a bus in peripheral mode
    ///
    /// `config.cs_pin` must be `None`: chip select is driven externally.
    /// Fails with `OperationNotSupported` if the backend has no peripheral mode.
    pub fn become_peripheral(registry: &Arc<Registry>, config: SpiConfig) -> Result<Self> {
        if config.cs_pin.is_some() {
            return Err(SpiError::OperationNotSupported);
        }
        let lease = Lease::acquire(registry, config, ClaimMode::Peripheral)?;
        if !lease.features().contains(BackendFeatures::PERIPHERAL) {
            return Err(SpiError::OperationNotSupported);
        }
        log::debug!("peripheral {}: acquired", lease.config().bus);
        Ok(Self {
            lease,
            selected: false,
            pending_read: false,
        })
    }

    /// Configuration this peripheral was created with
    pub fn config(&self) -> &SpiConfig {
        self.lease.config()
    }

    /// True until the peripheral is released or invalidated
    pub fn is_live(&self) -> bool {
        self.lease.is_live()
    }

    /// Poll whether the external controller currently selects us
    pub fn is_selected(&mut self) -> Result<bool> {
        self.lease.check_live()?;
        let now = self.lease.call(|b| b.peripheral_selected())?;
        if now != self.selected {
            log::debug!(
                "peripheral {}: {}",
                self.lease.config().bus,
                if now { "selected" } else { "deselected" }
            );
            self.pending_read = false;
        }
        self.selected = now;
        Ok(now)
    }

    /// Sample the next incoming bit, starting a new bit cycle
    ///
    /// Fails with `NotEnabled` while not selected, `ChipSelectFault` if the
    /// controller deselects us mid-bit.
    pub fn read_bit(&mut self) -> Result<bool> {
        self.lease.check_live()?;
        if !self.selected {
            return Err(SpiError::NotEnabled);
        }
        let timing = self.lease.wire().timing;
        match self.lease.call(|b| b.peripheral_read_bit(&timing)) {
            Ok(bit) => {
                self.pending_read = true;
                Ok(bit)
            }
            Err(e) => {
                self.pending_read = false;
                Err(e)
            }
        }
    }

    /// Drive the outgoing bit of the current cycle
    ///
    /// Fails with `OperationNotSupported` unless [`read_bit`](Self::read_bit)
    /// was called for this cycle, and `NotEnabled` while not selected.
    pub fn write_bit(&mut self, bit: bool) -> Result<()> {
        self.lease.check_live()?;
        if !self.selected {
            return Err(SpiError::NotEnabled);
        }
        if !self.pending_read {
            return Err(SpiError::OperationNotSupported);
        }
        self.pending_read = false;
        let timing = self.lease.wire().timing;
        self.lease.call(|b| b.peripheral_write_bit(&timing, bit))
    }

    /// Receive one word
    pub fn read_word(&mut self) -> Result<Vec<u8>> {
        self.read_n_words(1)
    }

    /// Receive `count` words
    ///
    /// Fails with `NotEnabled` while not selected.
    pub fn read_n_words(&mut self, count: u64) -> Result<Vec<u8>> {
        self.lease.check_live()?;
        if !self.selected {
            return Err(SpiError::NotEnabled);
        }
        let word_size = self.lease.wire().word_size;
        let mut words = codec::word_buffer(count)?;
        for word in words.iter_mut() {
            *word = self.receive_word(word_size)?;
        }
        Ok(codec::unpack(&words, word_size))
    }

    /// Send one word
    ///
    /// Each bit is sampled from the controller before it is driven.
    pub fn write_word(&mut self, word: &[u8]) -> Result<()> {
        self.lease.check_live()?;
        let word = self.lease.pack_one(word)?;
        self.send_word(word)
    }

    /// Send a whole number of words
    pub fn write_n_words(&mut self, words: &[u8]) -> Result<()> {
        self.lease.check_live()?;
        let words = self.lease.pack(words)?;
        for word in words {
            self.send_word(word)?;
        }
        Ok(())
    }

    /// Give the bus back to the registry
    ///
    /// Fails with `ResourceInvalidated` if the peripheral was already invalidated.
    pub fn release(mut self) -> Result<()> {
        log::debug!("peripheral {}: released", self.lease.config().bus);
        self.lease.release()
    }

    fn receive_word(&mut self, word_size: u64) -> Result<Word> {
        let mut word: Word = 0;
        for _ in 0..word_size {
            word = (word << 1) | self.read_bit()? as Word;
        }
        Ok(word)
    }

    fn send_word(&mut self, word: Word) -> Result<()> {
        let word_size = self.lease.wire().word_size;
        for bit in codec::bits(word, word_size) {
            self.read_bit()?;
            self.write_bit(bit)?;
        }
        Ok(())
    }
}
