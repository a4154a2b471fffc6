//! Resource handles
//!
//! [`Bus`], [`Controller`] and [`Peripheral`] all sit on a [`Lease`]: the
//! registry claim, the bus line and the configuration snapshot. The lease
//! checks liveness before every call and releases the claim exactly once,
//! either through `release()` or on drop.

mod bus;
mod controller;
mod peripheral;

pub use bus::Bus;
pub use controller::Controller;
pub use peripheral::Peripheral;

use std::sync::Arc;

use crate::backend::{BackendFeatures, SpiBackend};
use crate::codec::{self, Word};
use crate::config::{SpiConfig, WireFormat};
use crate::error::{Result, SpiError};
use crate::registry::{BusLine, ClaimId, ClaimKey, ClaimMode, ClaimToken, Registry, WireSpan};

/// Claim plus everything needed to reach the backend
pub(crate) struct Lease {
    registry: Arc<Registry>,
    token: Option<ClaimToken>,
    line: Arc<BusLine>,
    config: SpiConfig,
    wire: WireFormat,
}

impl Lease {
    /// Validate `config` and claim it from the registry
    pub(crate) fn acquire(registry: &Arc<Registry>, config: SpiConfig, mode: ClaimMode) -> Result<Self> {
        config.validate()?;
        let key = ClaimKey {
            bus: config.bus.clone(),
            cs: config.cs_pin.clone(),
        };
        let token = registry.claim(key, mode)?;
        let line = match registry.line(&config.bus) {
            Ok(line) => line,
            Err(e) => {
                let _ = registry.release(token);
                return Err(e);
            }
        };
        let wire = config.wire_format();
        Ok(Self {
            registry: Arc::clone(registry),
            token: Some(token),
            line,
            config,
            wire,
        })
    }

    pub(crate) fn config(&self) -> &SpiConfig {
        &self.config
    }

    pub(crate) fn wire(&self) -> &WireFormat {
        &self.wire
    }

    pub(crate) fn id(&self) -> ClaimId {
        self.token.as_ref().map_or(0, ClaimToken::id)
    }

    pub(crate) fn line(&self) -> &BusLine {
        &self.line
    }

    pub(crate) fn features(&self) -> BackendFeatures {
        self.line.backend().features()
    }

    pub(crate) fn is_live(&self) -> bool {
        self.token
            .as_ref()
            .is_some_and(|token| self.registry.is_live(token))
    }

    pub(crate) fn check_live(&self) -> Result<()> {
        if self.is_live() {
            Ok(())
        } else {
            Err(SpiError::ResourceInvalidated)
        }
    }

    /// Take the bus transfer lock, then confirm the claim survived the wait
    pub(crate) fn span(&self) -> Result<WireSpan<'_>> {
        let span = self.line.wire_span(self.id());
        self.check_live()?;
        Ok(span)
    }

    /// Run one backend call, invalidating the claim if the error is fatal
    ///
    /// Liveness is checked with the backend locked: once the registry has
    /// reclaimed a dead claim's wires, nothing from its handle reaches the bus.
    pub(crate) fn call<T>(&self, f: impl FnOnce(&mut dyn SpiBackend) -> Result<T>) -> Result<T> {
        let mut backend = self.line.backend();
        self.check_live()?;
        let result = f(&mut **backend);
        if let Err(e) = &result {
            if backend.is_fatal(e) {
                drop(backend);
                log::warn!("{}: fatal backend error: {}", self.line.label(), e);
                if let Some(token) = &self.token {
                    self.registry.invalidate(token);
                }
            }
        }
        result
    }

    /// Release the claim; later calls fail with `ResourceInvalidated`
    pub(crate) fn release(&mut self) -> Result<()> {
        match self.token.take() {
            Some(token) => self.registry.release(token),
            None => Err(SpiError::ResourceInvalidated),
        }
    }

    /// Drive a chip select edge and record it on the line
    pub(crate) fn set_cs(&self, cs: &str, active: bool) -> Result<()> {
        self.call(|b| {
            b.set_cs(cs, active)?;
            self.line.note_cs(self.id(), cs, active);
            Ok(())
        })
    }

    // Raw word transfers. Chip select and the transfer lock are the caller's job.

    pub(crate) fn write_words(&self, words: &[Word]) -> Result<()> {
        log::trace!("{}: write {} word(s)", self.line.label(), words.len());
        self.call(|b| b.write(&self.wire, words))
    }

    pub(crate) fn read_words(&self, count: u64) -> Result<Vec<Word>> {
        if !self.features().contains(BackendFeatures::HALF_DUPLEX_READ) {
            return Err(SpiError::OperationNotSupported);
        }
        log::trace!("{}: read {} word(s)", self.line.label(), count);
        let mut words = codec::word_buffer(count)?;
        self.call(|b| b.read(&self.wire, &mut words))?;
        Ok(words)
    }

    pub(crate) fn transfer_words(&self, words: &[Word]) -> Result<Vec<Word>> {
        log::trace!("{}: transfer {} word(s)", self.line.label(), words.len());
        let mut read = vec![0; words.len()];
        self.call(|b| b.transfer(&self.wire, words, &mut read))?;
        Ok(read)
    }

    pub(crate) fn delay(&self, us: u64) -> Result<()> {
        self.call(|b| {
            b.delay_us(us);
            Ok(())
        })
    }

    // Byte-level helpers shared by Bus and Controller

    pub(crate) fn pack(&self, bytes: &[u8]) -> Result<Vec<Word>> {
        codec::pack(bytes, self.wire.word_size)
    }

    pub(crate) fn pack_one(&self, bytes: &[u8]) -> Result<Word> {
        codec::pack_one(bytes, self.wire.word_size)
    }

    pub(crate) fn unpack(&self, words: &[Word]) -> Vec<u8> {
        codec::unpack(words, self.wire.word_size)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            // An invalidated claim has nothing left to release
            let _ = self.registry.release(token);
        }
    }
}
