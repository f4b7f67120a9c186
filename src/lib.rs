//! The core of the BLAKE3 hash function: the compression pipeline, the
//! per-chunk block state, the Merkle subtree accumulator, and the
//! extendable-output reader.
//!
//! BLAKE3 produces a digest of any length (32 bytes by default) from input of
//! any length, and supports three domain-separated modes:
//!
//! - plain hashing, via [`Hasher::new`]
//! - a keyed MAC, via [`Hasher::new_keyed`]
//! - context-separated key derivation, via [`Hasher::new_derive_key`]
//!
//! Input is split into 1024-byte chunks, each compressed as up to sixteen
//! 64-byte blocks. Chunk chaining values feed an incremental binary Merkle
//! tree, merged in the order dictated by the trailing zeros of the chunk
//! count, so streaming input produces the same root as one-shot input
//! without ever materializing the tree. Whole groups of four chunks ahead of
//! the final one are compressed four at a time through the SIMD kernel in
//! `sse41`; the scalar kernel in `portable` is the normative reference and
//! the only path for single blocks.
//!
//! Finalization is a pure read of hasher state. Callers may finalize, keep
//! updating, and finalize again.

#![cfg_attr(not(feature = "std"), no_std)]

mod platform;
mod portable;
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod sse41;
#[cfg(test)]
mod test;

use arrayref::array_ref;
use arrayvec::{ArrayString, ArrayVec};
use core::cmp;
use core::fmt;

use crate::platform::Platform;

/// The default number of bytes in a hash, 32.
pub const OUT_LEN: usize = 32;

/// The number of bytes in a key, 32.
pub const KEY_LEN: usize = 32;

// These are pub for tests and benchmarks. Callers don't need them.
#[doc(hidden)]
pub const BLOCK_LEN: usize = 64;
#[doc(hidden)]
pub const CHUNK_LEN: usize = 1024;

// A chunk is 2^10 bytes and the chunk counter is 64 bits, so 54 stacked
// subtree chaining values cover any input up to 2^64 bytes.
const MAX_DEPTH: usize = 54;

// The widest batched compression handles four chunks at once.
const WIDE_LEN: usize = 4 * CHUNK_LEN;

pub(crate) type CVWords = [u32; 8];
pub(crate) type CVBytes = [u8; 32];

const IV: CVWords = [
    0x6A09E667, 0xBB67AE85, 0x3C6EF372, 0xA54FF53A, 0x510E527F, 0x9B05688C, 0x1F83D9AB, 0x5BE0CD19,
];

// Each row is the order in which one round's eight G calls consume the
// sixteen message words. Row 1 is the BLAKE3 permutation itself; the rows
// after it are that permutation applied repeatedly.
const MSG_SCHEDULE: [[usize; 16]; 7] = [
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15],
    [2, 6, 3, 10, 7, 0, 4, 13, 1, 11, 12, 5, 9, 14, 15, 8],
    [3, 4, 10, 12, 13, 2, 7, 14, 6, 5, 9, 0, 11, 15, 8, 1],
    [10, 7, 12, 9, 14, 3, 13, 15, 4, 0, 11, 2, 5, 8, 1, 6],
    [12, 13, 9, 11, 15, 10, 14, 8, 7, 2, 5, 3, 0, 1, 6, 4],
    [9, 14, 11, 5, 8, 12, 15, 1, 13, 3, 0, 10, 2, 6, 4, 7],
    [11, 15, 5, 0, 1, 9, 8, 6, 14, 10, 2, 12, 3, 4, 7, 13],
];

// These are the flags that domain separate chunk beginning/middle/end,
// chunk/parent, root/non-root, and the three hasher modes. Every compression
// carries the hasher's mode bits; the structural bits are OR-ed in per block.
bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct Flags: u8 {
        const CHUNK_START = 1 << 0;
        const CHUNK_END = 1 << 1;
        const PARENT = 1 << 2;
        const ROOT = 1 << 3;
        const KEYED_HASH = 1 << 4;
        const DERIVE_KEY_CONTEXT = 1 << 5;
        const DERIVE_KEY_MATERIAL = 1 << 6;
    }
}

fn counter_low(counter: u64) -> u32 {
    counter as u32
}

fn counter_high(counter: u64) -> u32 {
    (counter >> 32) as u32
}

// Whether the compression counter advances from one input to the next in the
// batched kernels. Yes for chunks, where it's the chunk counter; No for
// parent nodes, where it's always zero.
#[derive(Clone, Copy, Debug)]
pub(crate) enum IncrementCounter {
    Yes,
    No,
}

impl IncrementCounter {
    #[inline]
    fn yes(&self) -> bool {
        matches!(self, IncrementCounter::Yes)
    }
}

/// Errors surfaced by the fallible parts of the API.
///
/// Compression, update, and finalization are total functions of their inputs
/// and cannot fail; only the runtime-checked keyed constructor and the
/// buffer-oriented finalization return `Result`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A keyed hasher was given a key that isn't exactly [`KEY_LEN`] bytes.
    InvalidKeyLength { length: usize },
    /// An output buffer is shorter than the requested output length.
    OutputBufferTooSmall { requested: usize, available: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidKeyLength { length } => {
                write!(f, "keyed hashing requires a {}-byte key, got {}", KEY_LEN, length)
            }
            Error::OutputBufferTooSmall { requested, available } => {
                write!(f, "output buffer holds {} bytes, {} requested", available, requested)
            }
        }
    }
}

impl core::error::Error for Error {}

/// A BLAKE3 output of the default size, 32 bytes, which implements
/// constant-time equality.
#[derive(Clone, Copy)]
pub struct Hash([u8; OUT_LEN]);

impl Hash {
    pub fn as_bytes(&self) -> &[u8; OUT_LEN] {
        &self.0
    }

    /// The hash encoded as lowercase hexadecimal, without allocating.
    pub fn to_hex(&self) -> ArrayString<{ 2 * OUT_LEN }> {
        let mut s = ArrayString::new();
        let table = b"0123456789abcdef";
        for &b in self.0.iter() {
            s.push(table[(b >> 4) as usize] as char);
            s.push(table[(b & 0xf) as usize] as char);
        }
        s
    }
}

impl From<[u8; OUT_LEN]> for Hash {
    fn from(bytes: [u8; OUT_LEN]) -> Self {
        Self(bytes)
    }
}

impl From<Hash> for [u8; OUT_LEN] {
    fn from(hash: Hash) -> Self {
        hash.0
    }
}

/// This implementation is constant-time.
impl PartialEq for Hash {
    fn eq(&self, other: &Hash) -> bool {
        constant_time_eq::constant_time_eq(&self.0[..], &other.0[..])
    }
}

/// This implementation is constant-time.
impl PartialEq<[u8; OUT_LEN]> for Hash {
    fn eq(&self, other: &[u8; OUT_LEN]) -> bool {
        constant_time_eq::constant_time_eq(&self.0[..], other)
    }
}

impl Eq for Hash {}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Hash(0x{})", self.to_hex())
    }
}

// Each chunk or parent node can produce either an 8-word chaining value or,
// by setting the ROOT flag, any number of final output bytes. The Output
// struct captures the state just prior to choosing between those two
// possibilities.
#[derive(Clone)]
struct Output {
    input_chaining_value: CVWords,
    block: [u8; BLOCK_LEN],
    block_len: u8,
    counter: u64,
    flags: Flags,
}

impl Output {
    fn chaining_value(&self) -> CVWords {
        let mut cv = self.input_chaining_value;
        portable::compress_in_place(
            &mut cv,
            &self.block,
            self.block_len,
            self.counter,
            self.flags.bits(),
        );
        cv
    }

    fn root_hash(&self) -> Hash {
        debug_assert_eq!(self.counter, 0);
        let out = portable::compress_xof(
            &self.input_chaining_value,
            &self.block,
            self.block_len,
            0,
            (self.flags | Flags::ROOT).bits(),
        );
        Hash(*array_ref!(out, 0, OUT_LEN))
    }

    // The extended output block at the given position in the output stream.
    // The counter carries the output block index here, not a chunk index.
    fn root_output_block(&self, counter: u64) -> [u8; BLOCK_LEN] {
        debug_assert_eq!(self.counter, 0);
        portable::compress_xof(
            &self.input_chaining_value,
            &self.block,
            self.block_len,
            counter,
            (self.flags | Flags::ROOT).bits(),
        )
    }
}

#[derive(Clone)]
struct ChunkState {
    cv: CVWords,
    chunk_counter: u64,
    buf: [u8; BLOCK_LEN],
    buf_len: u8,
    blocks_compressed: u8,
    flags: Flags,
}

impl ChunkState {
    fn new(key: &CVWords, chunk_counter: u64, flags: Flags) -> Self {
        Self {
            cv: *key,
            chunk_counter,
            buf: [0; BLOCK_LEN],
            buf_len: 0,
            blocks_compressed: 0,
            flags,
        }
    }

    fn len(&self) -> usize {
        BLOCK_LEN * self.blocks_compressed as usize + self.buf_len as usize
    }

    fn fill_buf(&mut self, input: &mut &[u8]) {
        let want = BLOCK_LEN - self.buf_len as usize;
        let take = cmp::min(want, input.len());
        self.buf[self.buf_len as usize..][..take].copy_from_slice(&input[..take]);
        self.buf_len += take as u8;
        *input = &input[take..];
    }

    fn start_flag(&self) -> Flags {
        if self.blocks_compressed == 0 {
            Flags::CHUNK_START
        } else {
            Flags::empty()
        }
    }

    // The caller splits input at chunk boundaries; a single call never
    // crosses the 1024-byte mark. The last block of the chunk always stays
    // in the buffer, so that output() can compress it with CHUNK_END.
    fn update(&mut self, mut input: &[u8]) {
        debug_assert!(self.len() + input.len() <= CHUNK_LEN);

        if self.buf_len > 0 {
            self.fill_buf(&mut input);
            if !input.is_empty() {
                debug_assert_eq!(self.buf_len as usize, BLOCK_LEN);
                let block_flags = self.flags | self.start_flag();
                portable::compress_in_place(
                    &mut self.cv,
                    &self.buf,
                    BLOCK_LEN as u8,
                    self.chunk_counter,
                    block_flags.bits(),
                );
                self.blocks_compressed += 1;
                self.buf = [0; BLOCK_LEN];
                self.buf_len = 0;
            }
        }

        while input.len() > BLOCK_LEN {
            debug_assert_eq!(self.buf_len, 0);
            let block_flags = self.flags | self.start_flag();
            portable::compress_in_place(
                &mut self.cv,
                array_ref!(input, 0, BLOCK_LEN),
                BLOCK_LEN as u8,
                self.chunk_counter,
                block_flags.bits(),
            );
            self.blocks_compressed += 1;
            input = &input[BLOCK_LEN..];
        }

        self.fill_buf(&mut input);
        debug_assert!(input.is_empty());
        debug_assert!(self.len() <= CHUNK_LEN);
    }

    fn output(&self) -> Output {
        let block_flags = self.flags | self.start_flag() | Flags::CHUNK_END;
        Output {
            input_chaining_value: self.cv,
            block: self.buf,
            block_len: self.buf_len,
            counter: self.chunk_counter,
            flags: block_flags,
        }
    }
}

fn parent_output(
    left_child: &CVWords,
    right_child: &CVWords,
    key: &CVWords,
    flags: Flags,
) -> Output {
    let mut block = [0; BLOCK_LEN];
    block[..32].copy_from_slice(&platform::le_bytes_from_words_32(left_child));
    block[32..].copy_from_slice(&platform::le_bytes_from_words_32(right_child));
    Output {
        input_chaining_value: *key,
        block,
        block_len: BLOCK_LEN as u8,
        counter: 0, // Always 0 for parent nodes.
        flags: flags | Flags::PARENT,
    }
}

/// An incremental hasher that can accept any number of writes.
#[derive(Clone)]
pub struct Hasher {
    key_words: CVWords,
    chunk_state: ChunkState,
    // Completed subtrees along the right edge of the tree, smallest on top.
    // After N chunks have been folded in, the stack holds one chaining value
    // per set bit of N.
    cv_stack: ArrayVec<CVWords, MAX_DEPTH>,
    platform: Platform,
}

impl Hasher {
    fn new_internal(key_words: &CVWords, flags: Flags) -> Self {
        Self {
            key_words: *key_words,
            chunk_state: ChunkState::new(key_words, 0, flags),
            cv_stack: ArrayVec::new(),
            platform: Platform::detect(),
        }
    }

    /// Construct a new `Hasher` for the regular hash function.
    pub fn new() -> Self {
        Self::new_internal(&IV, Flags::empty())
    }

    /// Construct a new `Hasher` for the keyed hash function.
    pub fn new_keyed(key: &[u8; KEY_LEN]) -> Self {
        let key_words = platform::words_from_le_bytes_32(key);
        Self::new_internal(&key_words, Flags::KEYED_HASH)
    }

    /// Like [`new_keyed`](Hasher::new_keyed), but taking the key as a slice
    /// checked at runtime.
    pub fn new_keyed_from_slice(key: &[u8]) -> Result<Self, Error> {
        let key: &[u8; KEY_LEN] = key
            .try_into()
            .map_err(|_| Error::InvalidKeyLength { length: key.len() })?;
        Ok(Self::new_keyed(key))
    }

    /// Construct a new `Hasher` for the key derivation function. The context
    /// should be hardcoded, globally unique, and application-specific.
    pub fn new_derive_key(context: &[u8]) -> Self {
        // The context string is hashed in its own domain to produce the key
        // words for the material stage.
        let mut context_hasher = Self::new_internal(&IV, Flags::DERIVE_KEY_CONTEXT);
        context_hasher.update(context);
        let context_key = context_hasher.finalize();
        let context_key_words = platform::words_from_le_bytes_32(context_key.as_bytes());
        Self::new_internal(&context_key_words, Flags::DERIVE_KEY_MATERIAL)
    }

    /// The total number of bytes hashed so far.
    pub fn count(&self) -> u64 {
        self.chunk_state.chunk_counter * CHUNK_LEN as u64 + self.chunk_state.len() as u64
    }

    /// Return the hasher to its initial state, keeping the key and mode.
    pub fn reset(&mut self) -> &mut Self {
        let flags = self.chunk_state.flags;
        self.chunk_state = ChunkState::new(&self.key_words, 0, flags);
        self.cv_stack.clear();
        self
    }

    // The chunk chaining value just produced may complete subtrees along the
    // right edge of the tree, one per trailing zero bit of the chunk count.
    // Merge each completed pair into a parent before pushing, leaving the
    // stack at popcount(total_chunks) entries.
    fn push_cv(&mut self, mut cv: CVWords, total_chunks: u64) {
        debug_assert!(total_chunks > 0);
        let post_merge_depth = total_chunks.count_ones() as usize;
        while self.cv_stack.len() >= post_merge_depth {
            let left_child = self.cv_stack.pop().unwrap();
            cv = parent_output(&left_child, &cv, &self.key_words, self.chunk_state.flags)
                .chaining_value();
        }
        self.cv_stack.push(cv);
    }

    /// Add input to the hash state. This can be called any number of times.
    pub fn update(&mut self, mut input: &[u8]) -> &mut Self {
        while !input.is_empty() {
            // A full chunk with more input arriving behind it can't be the
            // root. Fold in its chaining value and start the next chunk.
            if self.chunk_state.len() == CHUNK_LEN {
                let chunk_cv = self.chunk_state.output().chaining_value();
                let total_chunks = self.chunk_state.chunk_counter + 1;
                let flags = self.chunk_state.flags;
                self.push_cv(chunk_cv, total_chunks);
                self.chunk_state = ChunkState::new(&self.key_words, total_chunks, flags);
            }

            // At a chunk boundary with more than four chunks of input ahead,
            // take the wide path: compress groups of four whole chunks in
            // one batched call and fold in their chaining values in order.
            // The group leaves at least one byte behind, so none of its
            // chunks can be the root, and the accumulator's merge order
            // doesn't depend on how the chaining values were produced.
            if self.chunk_state.len() == 0 {
                while input.len() > WIDE_LEN {
                    let counter = self.chunk_state.chunk_counter;
                    let chunks: [&[u8; CHUNK_LEN]; 4] = [
                        array_ref!(input, 0, CHUNK_LEN),
                        array_ref!(input, CHUNK_LEN, CHUNK_LEN),
                        array_ref!(input, 2 * CHUNK_LEN, CHUNK_LEN),
                        array_ref!(input, 3 * CHUNK_LEN, CHUNK_LEN),
                    ];
                    let mut cv_bytes = [0; 4 * OUT_LEN];
                    self.platform.hash_many(
                        &chunks,
                        &self.key_words,
                        counter,
                        IncrementCounter::Yes,
                        self.chunk_state.flags.bits(),
                        Flags::CHUNK_START.bits(),
                        Flags::CHUNK_END.bits(),
                        &mut cv_bytes,
                    );
                    for i in 0..4 {
                        let cv = platform::words_from_le_bytes_32(array_ref!(
                            cv_bytes,
                            i * OUT_LEN,
                            OUT_LEN
                        ));
                        self.push_cv(cv, counter + i as u64 + 1);
                    }
                    let flags = self.chunk_state.flags;
                    self.chunk_state = ChunkState::new(&self.key_words, counter + 4, flags);
                    input = &input[WIDE_LEN..];
                }
            }

            let want = CHUNK_LEN - self.chunk_state.len();
            let take = cmp::min(want, input.len());
            self.chunk_state.update(&input[..take]);
            input = &input[take..];
        }
        self
    }

    // Starting with the current chunk's output, fold in the stacked subtree
    // chaining values from the top down. The last Output is the root node.
    // This only reads hasher state, so finalization can be repeated and
    // interleaved with further updates.
    fn final_output(&self) -> Output {
        let mut output = self.chunk_state.output();
        for subtree_cv in self.cv_stack.iter().rev() {
            output = parent_output(
                subtree_cv,
                &output.chaining_value(),
                &self.key_words,
                self.chunk_state.flags,
            );
        }
        output
    }

    /// Finalize the hash state and return the 32-byte digest.
    pub fn finalize(&self) -> Hash {
        self.final_output().root_hash()
    }

    /// Finalize the hash state and write the first `out_len` output bytes to
    /// the front of `out`.
    pub fn finalize_into(&self, out_len: usize, out: &mut [u8]) -> Result<(), Error> {
        if out.len() < out_len {
            return Err(Error::OutputBufferTooSmall {
                requested: out_len,
                available: out.len(),
            });
        }
        self.finalize_xof().fill(&mut out[..out_len]);
        Ok(())
    }

    /// Finalize the hash state into a seekable reader for any number of
    /// output bytes.
    pub fn finalize_xof(&self) -> OutputReader {
        OutputReader::new(self.final_output())
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Hasher")
            .field("count", &self.count())
            .field("platform", &self.platform)
            .finish()
    }
}

#[cfg(feature = "std")]
impl std::io::Write for Hasher {
    fn write(&mut self, input: &[u8]) -> std::io::Result<usize> {
        self.update(input);
        Ok(input.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// An incremental reader for any number of output bytes.
///
/// The stream is addressed by block: the byte at offset `o` is byte `o % 64`
/// of the extended output produced with counter `o / 64`, so seeking never
/// recomputes earlier blocks.
#[derive(Clone)]
pub struct OutputReader {
    inner: Output,
    position: u64,
}

impl OutputReader {
    fn new(inner: Output) -> Self {
        Self { inner, position: 0 }
    }

    /// Fill `buf` with the next `buf.len()` bytes of the output stream.
    pub fn fill(&mut self, mut buf: &mut [u8]) {
        while !buf.is_empty() {
            let block = self
                .inner
                .root_output_block(self.position / BLOCK_LEN as u64);
            let within = (self.position % BLOCK_LEN as u64) as usize;
            let take = cmp::min(buf.len(), BLOCK_LEN - within);
            buf[..take].copy_from_slice(&block[within..][..take]);
            buf = &mut buf[take..];
            self.position += take as u64;
        }
    }

    /// The current read offset in the output stream.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Seek to an absolute offset in the output stream.
    pub fn set_position(&mut self, position: u64) {
        self.position = position;
    }
}

// Don't leak the root node's key material into Debug output.
impl fmt::Debug for OutputReader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OutputReader")
            .field("position", &self.position)
            .finish()
    }
}

#[cfg(feature = "std")]
impl std::io::Read for OutputReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.fill(buf);
        Ok(buf.len())
    }
}

#[cfg(feature = "std")]
impl std::io::Seek for OutputReader {
    fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
        use std::io::{Error, ErrorKind, SeekFrom};
        match pos {
            SeekFrom::Start(offset) => self.position = offset,
            SeekFrom::End(_) => {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    "cannot seek from the end of an unbounded output stream",
                ));
            }
            SeekFrom::Current(delta) => {
                self.position = self.position.checked_add_signed(delta).ok_or_else(|| {
                    Error::new(ErrorKind::InvalidInput, "seek past the ends of the stream")
                })?;
            }
        }
        Ok(self.position)
    }
}
