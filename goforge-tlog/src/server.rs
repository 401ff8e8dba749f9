// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

use crate::Tile;

/// The verifier-protocol capability set a log server exposes.
///
/// [`crate::Log`] provides the storage-backed pieces; the daemon implements
/// this trait on top of it, adding the `lookup` path that can trigger a
/// build for a key the log does not hold yet.
pub trait LogServer {
    type Error;

    /// The signed, newline-terminated tree head.
    fn signed(&self) -> impl Future<Output = Result<String, Self::Error>> + Send;

    /// Payloads of records `[id, id + n)`, `n > 0`.
    fn read_records(
        &self,
        id: u64,
        n: u64,
    ) -> impl Future<Output = Result<Vec<Vec<u8>>, Self::Error>> + Send;

    /// Resolve a canonical build-spec key to its record number, building it
    /// first if the log has no record for it yet.
    fn lookup(&self, key: &str) -> impl Future<Output = Result<u64, Self::Error>> + Send;

    /// Concatenated hashes forming the requested tile.
    fn read_tile_data(
        &self,
        tile: Tile,
    ) -> impl Future<Output = Result<Vec<u8>, Self::Error>> + Send;
}
