//! OpenSubtitles content hash
//!
//! The hash is the file size plus the wrapping sum of the little-endian
//! 64-bit words of the first and last 64 KiB of the file. Subtitle providers
//! use it to match subtitles to an exact release.

use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use crate::models::{FileMetadata, MovieHash};

/// Size of each sampled window
pub const HASH_CHUNK_SIZE: u64 = 64 * 1024;

/// Compute the hash from the file size and its head and tail windows
pub fn compute(file_size: u64, head: &[u8], tail: &[u8]) -> MovieHash {
    let sum = head
        .chunks(8)
        .chain(tail.chunks(8))
        .fold(file_size, |hash, chunk| {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            hash.wrapping_add(u64::from_le_bytes(word))
        });
    MovieHash(sum)
}

/// Collects the pieces overlapping the hash windows of a file
///
/// Ranges are torrent-global byte offsets.
#[derive(Debug)]
pub struct HashSampler {
    file_length: u64,
    piece_length: u64,
    head: Range<u64>,
    tail: Range<u64>,
    missing: BTreeSet<u32>,
    pieces: BTreeMap<u32, Bytes>,
}

impl HashSampler {
    pub fn new(file: &FileMetadata) -> Self {
        let window = HASH_CHUNK_SIZE.min(file.length);
        let file_end = file.offset + file.length;
        let head = file.offset..file.offset + window;
        let tail = file_end - window..file_end;
        let piece_length = file.piece_length.max(1);

        let mut missing = BTreeSet::new();
        for range in [&head, &tail] {
            if range.is_empty() {
                continue;
            }
            let first = (range.start / piece_length) as u32;
            let last = ((range.end - 1) / piece_length) as u32;
            missing.extend(first..=last);
        }

        Self {
            file_length: file.length,
            piece_length,
            head,
            tail,
            missing,
            pieces: BTreeMap::new(),
        }
    }

    /// Whether this piece is needed to compute the hash
    pub fn wants(&self, index: u32) -> bool {
        self.missing.contains(&index)
    }

    /// Pieces still missing
    pub fn missing(&self) -> impl Iterator<Item = u32> + '_ {
        self.missing.iter().copied()
    }

    /// Offer a verified piece; returns the hash once every sampled piece is present
    pub fn offer(&mut self, index: u32, data: &Bytes) -> Option<MovieHash> {
        if !self.missing.remove(&index) {
            return None;
        }
        self.pieces.insert(index, data.clone());
        if !self.missing.is_empty() {
            return None;
        }

        let head = self.read(self.head.clone())?;
        let tail = self.read(self.tail.clone())?;
        self.pieces.clear();
        Some(compute(self.file_length, &head, &tail))
    }

    fn read(&self, range: Range<u64>) -> Option<Vec<u8>> {
        let mut out = Vec::with_capacity((range.end - range.start) as usize);
        let mut pos = range.start;
        while pos < range.end {
            let index = (pos / self.piece_length) as u32;
            let piece_start = index as u64 * self.piece_length;
            let data = self.pieces.get(&index)?;
            let from = (pos - piece_start) as usize;
            let to = ((range.end - piece_start) as usize).min(data.len());
            if from >= to {
                return None;
            }
            out.extend_from_slice(&data[from..to]);
            pos = piece_start + to as u64;
        }
        Some(out)
    }
}
