use crate::platform::Platform;
use crate::*;
use arrayref::array_ref;

pub const TEST_KEY: &[u8; KEY_LEN] = b"whats the Elvish word for friend";
pub const TEST_CONTEXT: &[u8] = b"BLAKE3 2019-12-27 16:29:52 test vectors context";

pub fn test_key_words() -> CVWords {
    platform::words_from_le_bytes_32(TEST_KEY)
}

// Input lengths that cross every interesting boundary: within a block, at
// block edges, at chunk edges, around the 4-chunk wide path, and deep enough
// to exercise uneven Merkle merge patterns (31 = 16 + 8 + 4 + 2 + 1).
pub const TEST_CASES: &[usize] = &[
    0,
    1,
    2,
    3,
    BLOCK_LEN - 1,
    BLOCK_LEN,
    BLOCK_LEN + 1,
    2 * BLOCK_LEN,
    CHUNK_LEN - 1,
    CHUNK_LEN,
    CHUNK_LEN + 1,
    2 * CHUNK_LEN,
    2 * CHUNK_LEN + 1,
    3 * CHUNK_LEN,
    4 * CHUNK_LEN,
    4 * CHUNK_LEN + 1,
    5 * CHUNK_LEN,
    8 * CHUNK_LEN,
    8 * CHUNK_LEN + 1,
    16 * CHUNK_LEN,
    31 * CHUNK_LEN,
];

// Paint the input with a repeating byte pattern. The cycle length of 251 is
// the largest prime less than 256, so swapping any two adjacent blocks or
// chunks can't give the same answer.
pub fn paint_test_input(buf: &mut [u8]) {
    for (i, b) in buf.iter_mut().enumerate() {
        *b = (i % 251) as u8;
    }
}

fn painted_input(len: usize) -> Vec<u8> {
    let mut input = vec![0; len];
    paint_test_input(&mut input);
    input
}

// One-shot hash of the input, pinned to the scalar kernel.
fn portable_hash_all(input: &[u8]) -> Hash {
    let mut hasher = Hasher::new();
    hasher.platform = Platform::Portable;
    hasher.update(input);
    hasher.finalize()
}

pub type HashManyChunksFn =
    fn(&[&[u8; CHUNK_LEN]], &CVWords, u64, IncrementCounter, u8, u8, u8, &mut [u8]);
pub type HashManyParentsFn =
    fn(&[&[u8; BLOCK_LEN]], &CVWords, u64, IncrementCounter, u8, u8, u8, &mut [u8]);

// Check a hash_many implementation against the portable one, for both the
// chunk shape (counter increments) and the parent shape (counter pinned to
// zero). Seven inputs cover one whole SIMD group plus a partial group.
pub fn test_hash_many_fn(chunks_fn: HashManyChunksFn, parents_fn: HashManyParentsFn) {
    const NUM_INPUTS: usize = 7;
    let key = test_key_words();
    // A counter one below the 32-bit boundary, so the increment carries into
    // the high word.
    let counter = (1 << 32) - 1;

    let mut chunk_buf = [0; NUM_INPUTS * CHUNK_LEN];
    paint_test_input(&mut chunk_buf);
    let mut chunk_refs = arrayvec::ArrayVec::<&[u8; CHUNK_LEN], NUM_INPUTS>::new();
    for chunk in chunk_buf.chunks_exact(CHUNK_LEN) {
        chunk_refs.push(array_ref!(chunk, 0, CHUNK_LEN));
    }
    let mut expected = [0; NUM_INPUTS * OUT_LEN];
    portable::hash_many(
        &chunk_refs,
        &key,
        counter,
        IncrementCounter::Yes,
        Flags::KEYED_HASH.bits(),
        Flags::CHUNK_START.bits(),
        Flags::CHUNK_END.bits(),
        &mut expected,
    );
    let mut found = [0; NUM_INPUTS * OUT_LEN];
    chunks_fn(
        &chunk_refs,
        &key,
        counter,
        IncrementCounter::Yes,
        Flags::KEYED_HASH.bits(),
        Flags::CHUNK_START.bits(),
        Flags::CHUNK_END.bits(),
        &mut found,
    );
    assert_eq!(&expected[..], &found[..], "chunk outputs disagree");

    let mut parent_buf = [0; NUM_INPUTS * BLOCK_LEN];
    paint_test_input(&mut parent_buf);
    let mut parent_refs = arrayvec::ArrayVec::<&[u8; BLOCK_LEN], NUM_INPUTS>::new();
    for parent in parent_buf.chunks_exact(BLOCK_LEN) {
        parent_refs.push(array_ref!(parent, 0, BLOCK_LEN));
    }
    let mut expected = [0; NUM_INPUTS * OUT_LEN];
    portable::hash_many(
        &parent_refs,
        &key,
        0,
        IncrementCounter::No,
        (Flags::KEYED_HASH | Flags::PARENT).bits(),
        0,
        0,
        &mut expected,
    );
    let mut found = [0; NUM_INPUTS * OUT_LEN];
    parents_fn(
        &parent_refs,
        &key,
        0,
        IncrementCounter::No,
        (Flags::KEYED_HASH | Flags::PARENT).bits(),
        0,
        0,
        &mut found,
    );
    assert_eq!(&expected[..], &found[..], "parent outputs disagree");
}

#[test]
fn test_detected_platform_degree() {
    let platform = Platform::detect();
    assert!(platform.simd_degree() <= crate::platform::MAX_SIMD_DEGREE);
    assert!(platform.simd_degree() == 1 || platform.simd_degree() == 4);
}

// The detected platform and the scalar path must agree bit-for-bit at every
// power of two from one byte to a mebibyte, which walks through every Merkle
// stack depth along the way.
#[test]
fn test_power_of_two_boundaries() {
    let input = painted_input(1 << 20);
    for bits in 0..=20 {
        let len = 1 << bits;
        let expected = portable_hash_all(&input[..len]);
        let mut hasher = Hasher::new();
        hasher.update(&input[..len]);
        assert_eq!(expected, hasher.finalize(), "length {}", len);
    }
}

#[test]
fn test_update_splits() {
    for &case in TEST_CASES {
        let input = painted_input(case);
        let mut oneshot = Hasher::new();
        oneshot.update(&input);
        let expected = oneshot.finalize();
        assert_eq!(expected, portable_hash_all(&input), "case {}", case);

        for stride in [1, 63, 64, 65, CHUNK_LEN - 1, CHUNK_LEN, WIDE_LEN + 1] {
            let mut hasher = Hasher::new();
            for piece in input.chunks(stride) {
                hasher.update(piece);
            }
            assert_eq!(expected, hasher.finalize(), "case {} stride {}", case, stride);
        }
    }
}

#[test]
fn test_random_splits() {
    use rand::prelude::*;
    let mut rng = rand::rngs::StdRng::seed_from_u64(0xb3);
    let input = painted_input(31 * CHUNK_LEN + 7);
    let mut oneshot = Hasher::new();
    oneshot.update(&input);
    let expected = oneshot.finalize();

    for _ in 0..16 {
        let mut hasher = Hasher::new();
        let mut rest = &input[..];
        while !rest.is_empty() {
            let take = rng.gen_range(0..=rest.len().min(3 * CHUNK_LEN));
            hasher.update(&rest[..take]);
            rest = &rest[take..];
        }
        assert_eq!(expected, hasher.finalize());
    }
}

// Invariant: after N whole chunks have been folded into the tree, the stack
// holds exactly popcount(N) subtree chaining values.
#[test]
fn test_cv_stack_depth() {
    let input = painted_input(64 * CHUNK_LEN + 1);
    for n in 1..=64usize {
        let mut hasher = Hasher::new();
        // One byte past the boundary, so the nth chunk gets folded in.
        hasher.update(&input[..n * CHUNK_LEN + 1]);
        assert_eq!(
            hasher.cv_stack.len(),
            (n as u64).count_ones() as usize,
            "n = {}",
            n
        );
    }
}

#[test]
fn test_finalize_is_read_only() {
    let input = painted_input(5 * CHUNK_LEN + 3);
    let (a, b) = input.split_at(2 * CHUNK_LEN + 1);

    let mut hasher = Hasher::new();
    hasher.update(a);
    let first = hasher.finalize();
    assert_eq!(first, hasher.finalize());
    let mut xof_bytes = [0; 96];
    hasher.finalize_xof().fill(&mut xof_bytes);
    assert_eq!(first.as_bytes(), array_ref!(xof_bytes, 0, OUT_LEN));

    // Updating after a finalize behaves as if the finalize never happened.
    hasher.update(b);
    let mut whole = Hasher::new();
    whole.update(&input);
    assert_eq!(whole.finalize(), hasher.finalize());
}

#[test]
fn test_finalize_into() {
    let input = painted_input(3 * CHUNK_LEN);
    let mut hasher = Hasher::new();
    hasher.update(&input);

    let mut short = [0; OUT_LEN];
    hasher.finalize_into(OUT_LEN, &mut short).unwrap();
    assert_eq!(hasher.finalize().as_bytes(), &short);

    let mut long = [0; 300];
    hasher.finalize_into(300, &mut long).unwrap();
    let mut expected = [0; 300];
    hasher.finalize_xof().fill(&mut expected);
    assert_eq!(&expected[..], &long[..]);

    let err = hasher.finalize_into(301, &mut long).unwrap_err();
    assert_eq!(
        err,
        Error::OutputBufferTooSmall {
            requested: 301,
            available: 300
        }
    );
}

#[test]
fn test_xof_streams() {
    let mut hasher = Hasher::new();
    hasher.update(&painted_input(4 * CHUNK_LEN + 17));

    let mut all = [0; 1000];
    hasher.finalize_xof().fill(&mut all);

    // One byte at a time.
    let mut reader = hasher.finalize_xof();
    for (i, &expected) in all.iter().enumerate() {
        let mut byte = [0];
        reader.fill(&mut byte);
        assert_eq!(expected, byte[0], "offset {}", i);
    }
    assert_eq!(reader.position(), all.len() as u64);

    // Two uneven reads concatenate to one long read.
    let mut reader = hasher.finalize_xof();
    let mut first = [0; 333];
    let mut second = [0; 667];
    reader.fill(&mut first);
    reader.fill(&mut second);
    assert_eq!(&all[..333], &first[..]);
    assert_eq!(&all[333..], &second[..]);

    // Seeking lands on the same bytes the stream produced.
    let mut reader = hasher.finalize_xof();
    for position in [0, 1, 63, 64, 65, 127, 128, 500, 999] {
        reader.set_position(position as u64);
        let mut byte = [0];
        reader.fill(&mut byte);
        assert_eq!(all[position], byte[0], "position {}", position);
    }
}

#[test]
fn test_modes_are_domain_separated() {
    let input = painted_input(CHUNK_LEN + 5);
    let mut hasher = Hasher::new();
    hasher.update(&input);
    let mut keyed = Hasher::new_keyed(TEST_KEY);
    keyed.update(&input);
    let mut derive = Hasher::new_derive_key(TEST_CONTEXT);
    derive.update(&input);

    let digests = [hasher.finalize(), keyed.finalize(), derive.finalize()];
    assert_ne!(digests[0], digests[1]);
    assert_ne!(digests[0], digests[2]);
    assert_ne!(digests[1], digests[2]);
}

#[test]
fn test_keyed_from_slice() {
    let input = painted_input(100);
    let mut expected = Hasher::new_keyed(TEST_KEY);
    expected.update(&input);
    let mut checked = Hasher::new_keyed_from_slice(&TEST_KEY[..]).unwrap();
    checked.update(&input);
    assert_eq!(expected.finalize(), checked.finalize());

    for bad_len in [0, 31, 33] {
        let err = Hasher::new_keyed_from_slice(&[0; 64][..bad_len]).unwrap_err();
        assert_eq!(err, Error::InvalidKeyLength { length: bad_len });
    }
}

#[test]
fn test_count_and_reset() {
    let input = painted_input(3 * CHUNK_LEN + 10);
    let mut hasher = Hasher::new_keyed(TEST_KEY);
    assert_eq!(hasher.count(), 0);
    hasher.update(&input[..1000]);
    assert_eq!(hasher.count(), 1000);
    hasher.update(&input[1000..]);
    assert_eq!(hasher.count(), input.len() as u64);

    // Reset keeps the key and mode.
    hasher.reset();
    assert_eq!(hasher.count(), 0);
    hasher.update(&input);
    let mut fresh = Hasher::new_keyed(TEST_KEY);
    fresh.update(&input);
    assert_eq!(fresh.finalize(), hasher.finalize());
}

#[test]
fn test_hash_conversions() {
    let hash = Hasher::new().update(b"conversions").finalize();
    let bytes: [u8; OUT_LEN] = hash.into();
    assert_eq!(hash, bytes);
    assert_eq!(hash, Hash::from(bytes));
    assert_eq!(hash.to_hex().len(), 2 * OUT_LEN);
    assert_eq!(
        format!("{:?}", hash),
        format!("Hash(0x{})", hash.to_hex())
    );
}

#[cfg(feature = "std")]
#[test]
fn test_io_traits() {
    use std::io::{Read, Seek, SeekFrom, Write};

    let input = painted_input(2 * CHUNK_LEN + 100);
    let mut hasher = Hasher::new();
    hasher.write_all(&input).unwrap();
    let mut expected = Hasher::new();
    expected.update(&input);
    assert_eq!(expected.finalize(), hasher.finalize());

    let mut all = [0; 200];
    hasher.finalize_xof().fill(&mut all);
    let mut reader = hasher.finalize_xof();
    let mut buf = [0; 100];
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(&all[..100], &buf[..]);
    reader.seek(SeekFrom::Start(50)).unwrap();
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(&all[50..150], &buf[..]);
    reader.seek(SeekFrom::Current(-100)).unwrap();
    assert_eq!(reader.position(), 50);
    assert!(reader.seek(SeekFrom::End(0)).is_err());
}
