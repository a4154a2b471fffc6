//! Word codec
//!
//! Converts between client byte buffers and fixed-width words. A word of
//! `word_size` bits occupies `ceil(word_size / 8)` bytes in a buffer, stored
//! big-endian (most significant byte first). Bits go on the wire MSB first.
//!
//! Buffers that are not a whole number of words are rejected outright: no
//! partial transfer is ever attempted.

use crate::error::{Result, SpiError};

/// A single SPI word, right-aligned
pub type Word = u64;

/// Largest supported word size in bits
pub const MAX_WORD_SIZE: u64 = 64;

/// Check that a word size can be represented
pub fn check_word_size(word_size: u64) -> Result<()> {
    if word_size == 0 || word_size > MAX_WORD_SIZE {
        return Err(SpiError::OperationNotSupported);
    }
    Ok(())
}

/// Number of buffer bytes used by one word of `word_size` bits
pub fn word_bytes(word_size: u64) -> usize {
    word_size.div_ceil(8) as usize
}

/// Mask covering the valid bits of a word
pub fn word_mask(word_size: u64) -> Word {
    if word_size >= MAX_WORD_SIZE {
        Word::MAX
    } else {
        (1 << word_size) - 1
    }
}

/// Pack a byte buffer into words
///
/// Fails with `WrongAmountOfData` if the buffer is not an exact multiple of
/// the word width, or if a word carries bits above `word_size`.
pub fn pack(bytes: &[u8], word_size: u64) -> Result<Vec<Word>> {
    check_word_size(word_size)?;
    let width = word_bytes(word_size);
    if bytes.len() % width != 0 {
        return Err(SpiError::WrongAmountOfData);
    }

    let mask = word_mask(word_size);
    bytes
        .chunks_exact(width)
        .map(|chunk| {
            let word = chunk.iter().fold(0 as Word, |acc, &b| (acc << 8) | b as Word);
            if word & !mask != 0 {
                Err(SpiError::WrongAmountOfData)
            } else {
                Ok(word)
            }
        })
        .collect()
}

/// Pack a buffer that must hold exactly one word
pub fn pack_one(bytes: &[u8], word_size: u64) -> Result<Word> {
    check_word_size(word_size)?;
    if bytes.len() != word_bytes(word_size) {
        return Err(SpiError::WrongAmountOfData);
    }
    Ok(pack(bytes, word_size)?[0])
}

/// Unpack words into a byte buffer
///
/// Bits above `word_size` are discarded.
pub fn unpack(words: &[Word], word_size: u64) -> Vec<u8> {
    let width = word_bytes(word_size).min(8);
    let mask = word_mask(word_size);
    let mut out = Vec::with_capacity(words.len() * width);
    for &word in words {
        let be = (word & mask).to_be_bytes();
        out.extend_from_slice(&be[8 - width..]);
    }
    out
}

/// Zeroed buffer for `count` incoming words
///
/// Fails with `WrongAmountOfData` if that many words cannot be buffered.
pub fn word_buffer(count: u64) -> Result<Vec<Word>> {
    let count = usize::try_from(count).map_err(|_| SpiError::WrongAmountOfData)?;
    let mut words = Vec::new();
    words
        .try_reserve_exact(count)
        .map_err(|_| SpiError::WrongAmountOfData)?;
    words.resize(count, 0);
    Ok(words)
}

/// Iterate the bits of a word in wire order (MSB first)
pub fn bits(word: Word, word_size: u64) -> impl Iterator<Item = bool> {
    (0..word_size).rev().map(move |i| (word >> i) & 1 != 0)
}

/// Assemble a word from bits received in wire order (MSB first)
pub fn from_bits<I: IntoIterator<Item = bool>>(bits: I) -> Word {
    bits.into_iter()
        .fold(0 as Word, |acc, bit| (acc << 1) | bit as Word)
}
