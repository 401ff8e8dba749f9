// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

//! Append-only transparency log over successful builds.
//!
//! The log is a pair of files maintained in strict consistency: `records`
//! holds fixed-stride, length-prefixed textual records; `hashes` holds the
//! Merkle tree nodes in the canonical stored-hash ordering for an
//! append-only log. Tree heads are published as ed25519-signed notes.
//!
//! Appends go through [`Log::add_record`], which serializes writers and
//! treats any failure between the two file appends as a fatal consistency
//! error: the log refuses further writes until an operator repairs it.

mod error;
mod log_file;
mod note;
mod proof;
mod record;
mod server;
mod tree;

pub use error::LogError;
pub use log_file::Log;
pub use note::{Signer, format_tree, parse_tree, verify_note};
pub use proof::{check_record, prove_record};
pub use record::{BuildResult, HASH_SIZE, MAX_PAYLOAD, RECORD_STRIDE, pack_record, unpack_record};
pub use server::LogServer;
pub use tree::{
    Hash, HashReader, Tile, TILE_HEIGHT, node_hash, record_hash, stored_hash_count,
    stored_hash_index, stored_hashes_for_record, tree_hash,
};
