//! spi-arbiter-sim - In-memory SPI bus for testing
//!
//! This crate provides [`SimBus`], a backend that emulates one SPI bus in
//! memory. It is useful for testing and development without real hardware.
//!
//! A `SimBus` is a cheap handle onto shared state: attach one clone to the
//! registry and keep another to script MISO data, inject faults, drive the
//! external chip select in peripheral mode, and inspect what happened on the
//! wire afterwards.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use spi_arbiter_core::codec;
use spi_arbiter_core::{BackendFeatures, SpiBackend, SpiError, Timing, WireFormat, Word};

/// Configuration for the simulated bus
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Features advertised to the core
    pub features: BackendFeatures,
    /// Echo written words back on full-duplex transfers
    pub loopback: bool,
    /// Word returned when no MISO data is queued (masked to the word size)
    pub fill: Word,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            features: BackendFeatures::all(),
            loopback: true,
            fill: Word::MAX,
        }
    }
}

/// Something that happened on the simulated wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Chip select driven
    ChipSelect {
        /// Chip select label
        cs: String,
        /// True when asserted
        active: bool,
    },
    /// Words clocked out
    Write(Vec<Word>),
    /// Words clocked in
    Read(Vec<Word>),
    /// Full-duplex transfer (words out, words in)
    Transfer(Vec<Word>, Vec<Word>),
    /// Delay in microseconds
    Delay(u64),
    /// Peripheral sampled an incoming bit
    PeripheralRead(bool),
    /// Peripheral drove an outgoing bit
    PeripheralWrite(bool),
}

#[derive(Debug)]
struct SimState {
    config: SimConfig,
    events: Vec<Event>,
    miso: VecDeque<Word>,
    active_cs: Option<String>,
    /// Data phases seen so far (writes and transfers)
    writes: usize,
    write_faults: HashMap<usize, SpiError>,
    /// Chip select changes seen so far
    cs_changes: usize,
    cs_faults: HashMap<usize, SpiError>,
    fatal: Vec<SpiError>,
    // Peripheral side
    ext_selected: bool,
    incoming: VecDeque<bool>,
    driven: Vec<bool>,
}

/// Simulated SPI bus
#[derive(Debug, Clone)]
pub struct SimBus {
    state: Arc<Mutex<SimState>>,
}

impl SimBus {
    /// Create a new simulated bus with the given configuration
    pub fn new(config: SimConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                config,
                events: Vec::new(),
                miso: VecDeque::new(),
                active_cs: None,
                writes: 0,
                write_faults: HashMap::new(),
                cs_changes: 0,
                cs_faults: HashMap::new(),
                fatal: Vec::new(),
                ext_selected: false,
                incoming: VecDeque::new(),
                driven: Vec::new(),
            })),
        }
    }

    /// Create a simulated bus with every feature and loopback enabled
    pub fn new_default() -> Self {
        Self::new(SimConfig::default())
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Everything recorded so far
    pub fn events(&self) -> Vec<Event> {
        self.state().events.clone()
    }

    /// Forget recorded events
    pub fn clear_events(&self) {
        self.state().events.clear();
    }

    /// Words clocked out by writes and transfers, in order
    pub fn written_words(&self) -> Vec<Word> {
        self.state()
            .events
            .iter()
            .flat_map(|event| match event {
                Event::Write(words) | Event::Transfer(words, _) => words.clone(),
                _ => Vec::new(),
            })
            .collect()
    }

    /// Chip select currently asserted, if any
    pub fn active_cs(&self) -> Option<String> {
        self.state().active_cs.clone()
    }

    /// Queue words for the device to send back
    pub fn queue_miso(&self, words: &[Word]) {
        self.state().miso.extend(words.iter().copied());
    }

    /// Fail the `n`-th data phase (1-based, writes and transfers) with `err`
    pub fn fail_write(&self, n: usize, err: SpiError) {
        self.state().write_faults.insert(n, err);
    }

    /// Fail the `n`-th chip select change (1-based) with `err`
    pub fn fail_cs_change(&self, n: usize, err: SpiError) {
        self.state().cs_faults.insert(n, err);
    }

    /// Report `err` as fatal for the claiming handle
    pub fn set_fatal(&self, err: SpiError) {
        self.state().fatal.push(err);
    }

    /// External controller asserts chip select and clocks `bits` towards us
    pub fn select_peripheral(&self, bits: &[bool]) {
        let mut state = self.state();
        state.ext_selected = true;
        state.incoming.extend(bits.iter().copied());
    }

    /// External controller releases chip select
    pub fn deselect_peripheral(&self) {
        let mut state = self.state();
        state.ext_selected = false;
        state.incoming.clear();
    }

    /// Bits driven by the peripheral so far
    pub fn driven_bits(&self) -> Vec<bool> {
        self.state().driven.clone()
    }
}

impl SimState {
    fn next_write(&mut self) -> Result<(), SpiError> {
        self.writes += 1;
        match self.write_faults.remove(&self.writes) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn next_miso(&mut self, mask: Word) -> Word {
        self.miso.pop_front().unwrap_or(self.config.fill) & mask
    }

    fn check_words(wire: &WireFormat, words: &[Word]) -> Result<(), SpiError> {
        let mask = wire.mask();
        if words.iter().any(|w| w & !mask != 0) {
            return Err(SpiError::FrameFormat);
        }
        Ok(())
    }
}

impl SpiBackend for SimBus {
    fn features(&self) -> BackendFeatures {
        self.state().config.features
    }

    fn set_cs(&mut self, cs: &str, active: bool) -> Result<(), SpiError> {
        let mut state = self.state();
        state.cs_changes += 1;
        let n = state.cs_changes;
        if let Some(err) = state.cs_faults.remove(&n) {
            return Err(err);
        }

        let current = state.active_cs.clone();
        match (current.as_deref(), active) {
            // Two devices selected at once means two transfers interleaved
            (Some(current), true) if current != cs => return Err(SpiError::ModeFault),
            (Some(current), false) if current == cs => state.active_cs = None,
            (None, true) => state.active_cs = Some(cs.to_string()),
            _ => {}
        }
        state.events.push(Event::ChipSelect {
            cs: cs.to_string(),
            active,
        });
        Ok(())
    }

    fn write(&mut self, wire: &WireFormat, words: &[Word]) -> Result<(), SpiError> {
        let mut state = self.state();
        SimState::check_words(wire, words)?;
        state.next_write()?;
        state.events.push(Event::Write(words.to_vec()));
        Ok(())
    }

    fn read(&mut self, wire: &WireFormat, words: &mut [Word]) -> Result<(), SpiError> {
        let mut state = self.state();
        if !state.config.features.contains(BackendFeatures::HALF_DUPLEX_READ) {
            return Err(SpiError::OperationNotSupported);
        }
        let mask = wire.mask();
        for word in words.iter_mut() {
            *word = state.next_miso(mask);
        }
        state.events.push(Event::Read(words.to_vec()));
        Ok(())
    }

    fn transfer(&mut self, wire: &WireFormat, write: &[Word], read: &mut [Word]) -> Result<(), SpiError> {
        let mut state = self.state();
        SimState::check_words(wire, write)?;
        if write.len() != read.len() {
            return Err(SpiError::WrongAmountOfData);
        }
        state.next_write()?;
        let mask = wire.mask();
        for (out, &sent) in read.iter_mut().zip(write) {
            *out = if state.config.loopback {
                sent
            } else {
                state.next_miso(mask)
            };
        }
        state.events.push(Event::Transfer(write.to_vec(), read.to_vec()));
        Ok(())
    }

    fn delay_us(&mut self, us: u64) {
        self.state().events.push(Event::Delay(us));
    }

    fn peripheral_selected(&mut self) -> Result<bool, SpiError> {
        let state = self.state();
        if !state.config.features.contains(BackendFeatures::PERIPHERAL) {
            return Err(SpiError::OperationNotSupported);
        }
        Ok(state.ext_selected)
    }

    fn peripheral_read_bit(&mut self, _timing: &Timing) -> Result<bool, SpiError> {
        let mut state = self.state();
        if !state.ext_selected {
            return Err(SpiError::ChipSelectFault);
        }
        match state.incoming.pop_front() {
            Some(bit) => {
                state.events.push(Event::PeripheralRead(bit));
                Ok(bit)
            }
            None => {
                // The controller stopped clocking and released chip select
                state.ext_selected = false;
                Err(SpiError::ChipSelectFault)
            }
        }
    }

    fn peripheral_write_bit(&mut self, _timing: &Timing, bit: bool) -> Result<(), SpiError> {
        let mut state = self.state();
        if !state.ext_selected {
            return Err(SpiError::ChipSelectFault);
        }
        state.driven.push(bit);
        state.events.push(Event::PeripheralWrite(bit));
        Ok(())
    }

    fn is_fatal(&self, err: &SpiError) -> bool {
        self.state().fatal.contains(err)
    }
}

/// Bits of `bytes` in wire order for the given word size
///
/// Convenience for scripting [`SimBus::select_peripheral`].
pub fn wire_bits(bytes: &[u8], word_size: u64) -> Result<Vec<bool>, SpiError> {
    let words = codec::pack(bytes, word_size)?;
    Ok(words
        .into_iter()
        .flat_map(|w| codec::bits(w, word_size))
        .collect())
}
