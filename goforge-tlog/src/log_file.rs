// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

//! The on-disk log: a `records` file and a `hashes` file kept in strict
//! consistency.
//!
//! Both files are opened once and only ever appended to. The pair invariant
//! is `hashes.len == stored_hash_count(records.len / 512) * 32`; it is
//! checked at startup and before every append. A failure after the hash
//! append but before the record append completes leaves the pair out of
//! step; the log then refuses all further writes and an operator must
//! repair the files.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::error;
use tokio::sync::Mutex;

use crate::error::IoContext;
use crate::note::{Signer, format_tree};
use crate::record::{BuildResult, HASH_SIZE, RECORD_STRIDE, pack_record, unpack_record};
use crate::tree::{Hash, HashReader, Tile, stored_hash_count, stored_hashes_for_record, tree_hash};
use crate::LogError;

#[derive(Debug)]
pub struct Log {
    dir: PathBuf,
    records: File,
    hashes: File,
    signer: Signer,
    append: Mutex<()>,
    poisoned: AtomicBool,
    consistency_errors: AtomicU64,
}

impl Log {
    /// Open (creating if absent) the `records`/`hashes` pair under `dir`
    /// and validate the pair invariant. Refuses to open a log whose files
    /// disagree.
    pub fn open(dir: &Path, signer: Signer) -> Result<Log, LogError> {
        std::fs::create_dir_all(dir)
            .io_context(|| format!("creating log directory {}", dir.display()))?;
        let open = |name: &str| {
            OpenOptions::new()
                .read(true)
                .append(true)
                .create(true)
                .open(dir.join(name))
                .io_context(|| format!("opening {}", dir.join(name).display()))
        };
        let records = open("records")?;
        let hashes = open("hashes")?;

        let log = Log {
            dir: dir.to_path_buf(),
            records,
            hashes,
            signer,
            append: Mutex::new(()),
            poisoned: AtomicBool::new(false),
            consistency_errors: AtomicU64::new(0),
        };
        log.validate_pair()?;
        Ok(log)
    }

    /// Number of records in the log.
    pub fn count(&self) -> Result<u64, LogError> {
        let len = self
            .records
            .metadata()
            .io_context(|| "records metadata".to_string())?
            .len();
        if len % RECORD_STRIDE as u64 != 0 {
            return Err(LogError::consistency(format!(
                "records file size {len} is not a multiple of {RECORD_STRIDE}"
            )));
        }
        Ok(len / RECORD_STRIDE as u64)
    }

    fn validate_pair(&self) -> Result<u64, LogError> {
        let n = self.count()?;
        let hashes_len = self
            .hashes
            .metadata()
            .io_context(|| "hashes metadata".to_string())?
            .len();
        let want = stored_hash_count(n) * HASH_SIZE as u64;
        if hashes_len != want {
            return Err(LogError::consistency(format!(
                "hashes file is {hashes_len} bytes, want {want} for {n} records"
            )));
        }
        Ok(n)
    }

    /// Append a record for `result`, whose artifacts have been staged in
    /// `tmpdir`, and publish the staging directory at `store_dir`.
    ///
    /// Writes `recordnumber` into `tmpdir`, appends the new Merkle hashes
    /// and the packed record (each a single fsynced write), then renames
    /// `tmpdir` to `store_dir`. Returns the assigned record number.
    pub async fn add_record(
        &self,
        tmpdir: &Path,
        store_dir: &Path,
        result: &BuildResult,
    ) -> Result<u64, LogError> {
        let _guard = self.append.lock().await;

        if self.poisoned.load(Ordering::SeqCst) {
            return Err(LogError::consistency(
                "log refuses writes after an earlier partial append",
            ));
        }
        let n = match self.validate_pair() {
            Ok(n) => n,
            Err(e) => return Err(self.fatal(e.to_string())),
        };
        if store_dir.exists() {
            return Err(LogError::StoreDirExists {
                dir: store_dir.display().to_string(),
            });
        }

        let payload = result.to_line().into_bytes();
        let slot = pack_record(&payload)?;

        std::fs::write(tmpdir.join("recordnumber"), format!("{n}"))
            .io_context(|| format!("writing recordnumber in {}", tmpdir.display()))?;

        // Up to and including the hash append, a failure leaves the pair
        // untouched as far as the invariant is concerned.
        let new_hashes = stored_hashes_for_record(n, &payload, self)?;
        let mut buf = Vec::with_capacity(new_hashes.len() * HASH_SIZE);
        for h in &new_hashes {
            buf.extend_from_slice(h);
        }
        (&self.hashes)
            .write_all(&buf)
            .io_context(|| "appending hashes".to_string())?;
        self.hashes
            .sync_data()
            .io_context(|| "syncing hashes".to_string())?;

        // The hashes file now claims n+1 records. Anything that stops the
        // record append or the rename leaves the pair out of step.
        if let Err(e) = self.finish_append(&slot, tmpdir, store_dir) {
            return Err(self.fatal(format!("partial append of record {n}: {e}")));
        }
        Ok(n)
    }

    fn finish_append(
        &self,
        slot: &[u8; RECORD_STRIDE],
        tmpdir: &Path,
        store_dir: &Path,
    ) -> Result<(), LogError> {
        (&self.records)
            .write_all(slot)
            .io_context(|| "appending record".to_string())?;
        self.records
            .sync_data()
            .io_context(|| "syncing records".to_string())?;
        std::fs::rename(tmpdir, store_dir).io_context(|| {
            format!(
                "renaming {} to {}",
                tmpdir.display(),
                store_dir.display()
            )
        })?;
        Ok(())
    }

    fn fatal(&self, reason: String) -> LogError {
        error!("transparency log consistency error: {reason}");
        self.consistency_errors.fetch_add(1, Ordering::SeqCst);
        self.poisoned.store(true, Ordering::SeqCst);
        LogError::consistency(reason)
    }

    /// How many consistency errors have been detected since startup.
    /// Non-zero means the log needs operator attention.
    pub fn consistency_errors(&self) -> u64 {
        self.consistency_errors.load(Ordering::SeqCst)
    }

    /// Payloads of records `[id, id + n)`, lengths honored.
    pub fn read_records(&self, id: u64, n: u64) -> Result<Vec<Vec<u8>>, LogError> {
        let size = self.count()?;
        if n == 0 || id.checked_add(n).is_none_or(|end| end > size) {
            return Err(LogError::OutOfRange { id, n, size });
        }
        let mut out = Vec::with_capacity(n as usize);
        for i in id..id + n {
            let mut slot = [0u8; RECORD_STRIDE];
            self.records
                .read_exact_at(&mut slot, i * RECORD_STRIDE as u64)
                .io_context(|| format!("reading record {i}"))?;
            out.push(unpack_record(&slot)?);
        }
        Ok(out)
    }

    /// Parse record `id` into a [`BuildResult`].
    pub fn read_result(&self, id: u64) -> Result<BuildResult, LogError> {
        let payloads = self.read_records(id, 1)?;
        let line = String::from_utf8(payloads.into_iter().next().expect("n == 1"))
            .map_err(|_| LogError::BadRecord {
                reason: "record is not utf-8".to_string(),
            })?;
        BuildResult::parse_line(&line)
    }

    /// The signed, newline-terminated tree head for the current log.
    pub fn signed(&self) -> Result<String, LogError> {
        let n = self.count()?;
        let root = tree_hash(n, self)?;
        Ok(self.signer.sign(&format_tree(n, &root)))
    }

    /// Concatenated hashes forming the requested tile.
    pub fn read_tile_data(&self, tile: Tile) -> Result<Vec<u8>, LogError> {
        let indexes = tile.data_indexes()?;
        let stored = stored_hash_count(self.count()?);
        if indexes.iter().any(|&i| i >= stored) {
            return Err(LogError::BadTile {
                reason: format!("tile {tile:?} extends past the tree"),
            });
        }
        let hashes = self.read_hashes(&indexes)?;
        let mut out = Vec::with_capacity(hashes.len() * HASH_SIZE);
        for h in &hashes {
            out.extend_from_slice(h);
        }
        Ok(out)
    }

    /// Inclusion proof for record `n` against the current tree, for
    /// clients verifying a record against a signed head.
    pub fn prove_record(&self, n: u64) -> Result<Vec<Hash>, LogError> {
        crate::proof::prove_record(self.count()?, n, self)
    }

    /// Wait for any in-flight append to finish. Used at shutdown so the
    /// pair is never torn down mid-write.
    pub async fn quiesce(&self) {
        let _guard = self.append.lock().await;
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl HashReader for Log {
    fn read_hashes(&self, indexes: &[u64]) -> Result<Vec<Hash>, LogError> {
        indexes
            .iter()
            .map(|&i| {
                let mut h: Hash = [0; HASH_SIZE];
                self.hashes
                    .read_exact_at(&mut h, i * HASH_SIZE as u64)
                    .io_context(|| format!("reading stored hash {i}"))?;
                Ok(h)
            })
            .collect()
    }
}
