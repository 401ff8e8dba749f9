// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

//! Merkle tree math for append-only logs.
//!
//! Node hashes are stored in a single flat array in the order they become
//! computable: appending record N first stores N's leaf hash, then the hash
//! of every subtree N completes, from the bottom up. [`stored_hash_index`]
//! maps a `(level, index)` tree coordinate to its position in that array and
//! [`stored_hash_count`] gives the array length for a tree of N records, so
//! the hashes file size is a pure function of the records file size.
//!
//! Leaf and interior hashes use the 0x00/0x01 domain-separation prefixes of
//! certificate-transparency-style logs.

use sha2::{Digest, Sha256};

use crate::LogError;

/// One Merkle tree node hash.
pub type Hash = [u8; 32];

/// Height of one hash tile: tiles hold `2^TILE_HEIGHT` hashes.
pub const TILE_HEIGHT: u32 = 8;

/// Hash of a leaf record: `SHA256(0x00 || data)`.
pub fn record_hash(data: &[u8]) -> Hash {
    let mut h = Sha256::new();
    h.update([0u8]);
    h.update(data);
    h.finalize().into()
}

/// Hash of an interior node: `SHA256(0x01 || left || right)`.
pub fn node_hash(left: &Hash, right: &Hash) -> Hash {
    let mut h = Sha256::new();
    h.update([1u8]);
    h.update(left);
    h.update(right);
    h.finalize().into()
}

/// Position of the level-`level` tree node with index `n` in the stored
/// hash array.
pub fn stored_hash_index(level: u32, mut n: u64) -> u64 {
    // Level L's n'th hash is stored right after level L+1's 2n+1'th hash.
    // Work down to the leaf ordering, where the n'th leaf-adjacent slot
    // begins at n + n/2 + n/4 + ...
    for _ in 0..level {
        n = 2 * n + 1;
    }
    let mut i = 0u64;
    while n > 0 {
        i += n;
        n >>= 1;
    }
    i + level as u64
}

/// Total number of stored hashes for a tree of `n` records.
pub fn stored_hash_count(n: u64) -> u64 {
    2 * n - n.count_ones() as u64
}

/// Read access to the stored hash array.
pub trait HashReader {
    fn read_hashes(&self, indexes: &[u64]) -> Result<Vec<Hash>, LogError>;
}

/// The hashes that become stored when record `n` (0-indexed) with payload
/// `data` is appended: the record's own leaf hash followed by the hash of
/// each subtree the append completes.
pub fn stored_hashes_for_record<R: HashReader>(
    n: u64,
    data: &[u8],
    reader: &R,
) -> Result<Vec<Hash>, LogError> {
    let mut h = record_hash(data);
    let completed = n.trailing_ones();
    let indexes: Vec<u64> = (0..completed)
        .map(|level| stored_hash_index(level, (n >> level) - 1))
        .collect();
    let siblings = reader.read_hashes(&indexes)?;

    let mut hashes = Vec::with_capacity(1 + completed as usize);
    hashes.push(h);
    for sibling in &siblings {
        h = node_hash(sibling, &h);
        hashes.push(h);
    }
    Ok(hashes)
}

/// Root hash of the tree over records `[0, n)`.
///
/// The tree decomposes into complete subtrees along the binary expansion of
/// `n`; each subtree root is a stored hash, and the root combines them
/// right to left.
pub fn tree_hash<R: HashReader>(n: u64, reader: &R) -> Result<Hash, LogError> {
    if n == 0 {
        return Ok(Sha256::digest([]).into());
    }

    let mut indexes = Vec::new();
    let mut lo = 0u64;
    while lo < n {
        let k = 1u64 << (63 - (n - lo).leading_zeros());
        let level = k.trailing_zeros();
        indexes.push(stored_hash_index(level, lo >> level));
        lo += k;
    }
    let hashes = reader.read_hashes(&indexes)?;

    let mut h = *hashes.last().expect("n > 0 yields at least one subtree");
    for sub in hashes[..hashes.len() - 1].iter().rev() {
        h = node_hash(sub, &h);
    }
    Ok(h)
}

/// Coordinates of one hash tile: `2^TILE_HEIGHT` consecutive hashes at tree
/// level `TILE_HEIGHT * level`, starting at node index `n << TILE_HEIGHT`.
/// `width` may be smaller than a full tile for the ragged right edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub level: u32,
    pub n: u64,
    pub width: u32,
}

impl Tile {
    /// Stored-hash positions of the tile's hashes, left to right.
    pub fn data_indexes(&self) -> Result<Vec<u64>, LogError> {
        if self.width == 0 || self.width > 1 << TILE_HEIGHT {
            return Err(LogError::BadTile {
                reason: format!("width {} out of range", self.width),
            });
        }
        let level = TILE_HEIGHT * self.level;
        let start = self.n << TILE_HEIGHT;
        Ok((0..self.width as u64)
            .map(|i| stored_hash_index(level, start + i))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-memory hash store: appends like the real log, reads by index.
    struct MemHashes(Vec<Hash>);

    impl HashReader for MemHashes {
        fn read_hashes(&self, indexes: &[u64]) -> Result<Vec<Hash>, LogError> {
            indexes
                .iter()
                .map(|&i| {
                    self.0
                        .get(i as usize)
                        .copied()
                        .ok_or_else(|| LogError::consistency(format!("missing hash {i}")))
                })
                .collect()
        }
    }

    fn build(n: u64) -> MemHashes {
        let mut mem = MemHashes(Vec::new());
        for i in 0..n {
            let new = stored_hashes_for_record(i, format!("record {i}").as_bytes(), &mem).unwrap();
            mem.0.extend(new);
        }
        mem
    }

    /// Straightforward reference root: hash all leaves pairwise, recursing
    /// on the largest power-of-two split.
    fn reference_root(leaves: &[Hash]) -> Hash {
        match leaves.len() {
            0 => Sha256::digest([]).into(),
            1 => leaves[0],
            n => {
                let mut k = 1usize;
                while k * 2 < n {
                    k *= 2;
                }
                node_hash(&reference_root(&leaves[..k]), &reference_root(&leaves[k..]))
            }
        }
    }

    #[test]
    fn test_stored_hash_index() {
        // Append order for the first four records:
        //   r0: leaf0            -> index 0
        //   r1: leaf1, node(1,0) -> 1, 2
        //   r2: leaf2            -> 3
        //   r3: leaf3, node(1,1), node(2,0) -> 4, 5, 6
        assert_eq!(stored_hash_index(0, 0), 0);
        assert_eq!(stored_hash_index(0, 1), 1);
        assert_eq!(stored_hash_index(1, 0), 2);
        assert_eq!(stored_hash_index(0, 2), 3);
        assert_eq!(stored_hash_index(0, 3), 4);
        assert_eq!(stored_hash_index(1, 1), 5);
        assert_eq!(stored_hash_index(2, 0), 6);
        assert_eq!(stored_hash_index(0, 4), 7);
    }

    #[test]
    fn test_stored_hash_count() {
        assert_eq!(stored_hash_count(0), 0);
        assert_eq!(stored_hash_count(1), 1);
        assert_eq!(stored_hash_count(2), 3);
        assert_eq!(stored_hash_count(3), 4);
        assert_eq!(stored_hash_count(4), 7);
        assert_eq!(stored_hash_count(8), 15);
        // Count matches what appends actually store.
        for n in 0..64u64 {
            assert_eq!(build(n).0.len() as u64, stored_hash_count(n), "n={n}");
        }
    }

    #[test]
    fn test_known_hashes() {
        // Domain-separated empty hashes from the standard construction.
        let empty: Hash = Sha256::digest([]).into();
        assert_eq!(
            hex(&empty),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            hex(&record_hash(b"")),
            "6e340b9cffb37a989ca544e6bb780a2c78901d3fb33738768511a30617afa01d"
        );
    }

    #[test]
    fn test_tree_hash_matches_reference() {
        for n in 0..40u64 {
            let mem = build(n);
            let leaves: Vec<Hash> = (0..n)
                .map(|i| record_hash(format!("record {i}").as_bytes()))
                .collect();
            assert_eq!(
                tree_hash(n, &mem).unwrap(),
                reference_root(&leaves),
                "n={n}"
            );
        }
    }

    #[test]
    fn test_tile_indexes() {
        // Level-0 tiles address leaf hashes directly.
        let tile = Tile { level: 0, n: 0, width: 4 };
        assert_eq!(tile.data_indexes().unwrap(), vec![0, 1, 3, 4]);

        assert!(Tile { level: 0, n: 0, width: 0 }.data_indexes().is_err());
        assert!(
            Tile { level: 0, n: 0, width: 1 + (1 << TILE_HEIGHT) }
                .data_indexes()
                .is_err()
        );
    }

    fn hex(h: &Hash) -> String {
        h.iter().map(|b| format!("{b:02x}")).collect()
    }
}
