// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

//! Record inclusion proofs.
//!
//! A proof for record `n` in a tree of `size` records is the list of
//! sibling subtree hashes from the leaf up to the root. Verifiers
//! recompute the root from the record hash and the proof and compare it
//! against a signed tree head, without trusting the server's store.

use crate::tree::{Hash, HashReader, node_hash};
use crate::LogError;

/// Largest power of two strictly smaller than `n`. The left subtree of a
/// tree over `n > 1` records covers exactly this many leaves.
fn split_point(n: u64) -> u64 {
    let mut k = 1u64;
    while k * 2 < n {
        k *= 2;
    }
    k
}

/// Hash path proving record `n`'s inclusion in the tree over
/// `[0, tree_size)`, ordered leaf to root.
pub fn prove_record<R: HashReader>(
    tree_size: u64,
    n: u64,
    reader: &R,
) -> Result<Vec<Hash>, LogError> {
    if n >= tree_size {
        return Err(LogError::OutOfRange {
            id: n,
            n: 1,
            size: tree_size,
        });
    }
    let mut indexes = Vec::new();
    leaf_proof_indexes(0, tree_size, n, &mut indexes);
    let hashes = reader.read_hashes(&indexes)?;
    let (proof, rest) = leaf_proof(0, tree_size, n, &hashes);
    debug_assert!(rest.is_empty(), "proof consumed all fetched hashes");
    Ok(proof)
}

/// Verify that `record_hash` is record `n` of the tree with the given
/// size and root.
pub fn check_record(
    proof: &[Hash],
    tree_size: u64,
    root: &Hash,
    n: u64,
    record_hash: &Hash,
) -> Result<(), LogError> {
    let bad = |reason: &str| LogError::BadProof {
        reason: reason.to_string(),
    };
    if n >= tree_size {
        return Err(bad("record index outside the tree"));
    }
    let computed = run_record_proof(proof, 0, tree_size, n, record_hash)
        .ok_or(bad("proof has the wrong length"))?;
    if computed != *root {
        return Err(bad("proof does not land on the signed root"));
    }
    Ok(())
}

fn leaf_proof_indexes(lo: u64, hi: u64, n: u64, out: &mut Vec<u64>) {
    if lo + 1 == hi {
        return;
    }
    let k = split_point(hi - lo);
    if n < lo + k {
        leaf_proof_indexes(lo, lo + k, n, out);
        sub_tree_indexes(lo + k, hi, out);
    } else {
        sub_tree_indexes(lo, lo + k, out);
        leaf_proof_indexes(lo + k, hi, n, out);
    }
}

fn leaf_proof<'a>(lo: u64, hi: u64, n: u64, hashes: &'a [Hash]) -> (Vec<Hash>, &'a [Hash]) {
    if lo + 1 == hi {
        return (Vec::new(), hashes);
    }
    let k = split_point(hi - lo);
    if n < lo + k {
        let (mut proof, rest) = leaf_proof(lo, lo + k, n, hashes);
        let (sibling, rest) = sub_tree_hash(lo + k, hi, rest);
        proof.push(sibling);
        (proof, rest)
    } else {
        let (sibling, rest) = sub_tree_hash(lo, lo + k, hashes);
        let (mut proof, rest) = leaf_proof(lo + k, hi, n, rest);
        proof.push(sibling);
        (proof, rest)
    }
}

/// Stored-hash positions of the complete-subtree decomposition of
/// `[lo, hi)`, leftmost subtree first.
fn sub_tree_indexes(mut lo: u64, hi: u64, out: &mut Vec<u64>) {
    while lo < hi {
        let k = 1u64 << (63 - (hi - lo).leading_zeros());
        let level = k.trailing_zeros();
        out.push(crate::tree::stored_hash_index(level, lo >> level));
        lo += k;
    }
}

/// Combine the decomposition hashes of `[lo, hi)` into the subtree's
/// hash, right to left, consuming them from the front of `hashes`.
fn sub_tree_hash(lo: u64, hi: u64, hashes: &[Hash]) -> (Hash, &[Hash]) {
    let mut count = 0usize;
    let mut at = lo;
    while at < hi {
        let k = 1u64 << (63 - (hi - at).leading_zeros());
        at += k;
        count += 1;
    }
    let (own, rest) = hashes.split_at(count);
    let mut h = *own.last().expect("subtree spans at least one record");
    for sub in own[..own.len() - 1].iter().rev() {
        h = node_hash(sub, &h);
    }
    (h, rest)
}

fn run_record_proof(
    proof: &[Hash],
    lo: u64,
    hi: u64,
    n: u64,
    record_hash: &Hash,
) -> Option<Hash> {
    if lo + 1 == hi {
        if !proof.is_empty() {
            return None;
        }
        return Some(*record_hash);
    }
    let (&sibling, inner) = proof.split_last()?;
    let k = split_point(hi - lo);
    if n < lo + k {
        let sub = run_record_proof(inner, lo, lo + k, n, record_hash)?;
        Some(node_hash(&sub, &sibling))
    } else {
        let sub = run_record_proof(inner, lo + k, hi, n, record_hash)?;
        Some(node_hash(&sibling, &sub))
    }
}
