// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

//! Content-addressed result store.
//!
//! Each build spec owns one directory, named by the base64url of the
//! 20-byte SHA-256 prefix of the spec's canonical string and bucketed under
//! the identifier's first character:
//!
//! ```text
//! <result_dir>/<bucket>/<id>/
//!     recordnumber      present iff the build succeeded and entered the log
//!     binary.gz         gzipped binary; background GC may remove it
//!     log.gz            gzipped build output, success and failure alike
//!     builderror.txt    spec plus error message, failures only
//! ```
//!
//! Directories are staged as a `<id>.tmp` sibling and renamed into place,
//! so a store directory is always complete when it exists. A `log.gz`
//! without `recordnumber` marks a permanent build failure; clients retry by
//! purging the directory.

mod error;

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use log::{info, warn};

use goforge_spec::BuildSpec;
use goforge_tlog::{BuildResult, Log};

pub use error::StoreError;
use error::IoContext;

pub const RECORD_NUMBER_FILE: &str = "recordnumber";
pub const BINARY_FILE: &str = "binary.gz";
pub const LOG_FILE: &str = "log.gz";
pub const BUILD_ERROR_FILE: &str = "builderror.txt";
pub const FAILURES_FILE: &str = "buildfailures.txt";

/// What the store knows about a spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// The build succeeded and holds a log record. The binary may have
    /// been reclaimed by GC; the record remains canonical.
    Success {
        record_number: u64,
        result: BuildResult,
        binary_present: bool,
    },
    /// A prior build failed permanently; `log.gz` and `builderror.txt`
    /// describe it.
    Failed,
    /// No prior attempt (or only a cleaned-up staging directory).
    Absent,
}

pub struct Store {
    result_dir: PathBuf,
}

impl Store {
    pub fn new(result_dir: impl Into<PathBuf>) -> Store {
        Store {
            result_dir: result_dir.into(),
        }
    }

    /// The store directory for a spec.
    pub fn dir_for(&self, spec: &BuildSpec) -> PathBuf {
        let id = spec.storage_id();
        let bucket = &id[..1];
        self.result_dir.join(bucket).join(&id)
    }

    /// A staging sibling of the spec's store directory, on the same
    /// filesystem so the final rename is atomic. Any stale staging
    /// directory from a crashed build is removed first. Creates the
    /// bucket directory as a side effect.
    pub fn stage_dir_for(&self, spec: &BuildSpec) -> Result<PathBuf, StoreError> {
        let dir = self.dir_for(spec);
        let parent = dir.parent().expect("store dir has a bucket parent");
        fs::create_dir_all(parent)
            .io_context(|| format!("creating bucket {}", parent.display()))?;
        let stage = dir.with_extension("tmp");
        if stage.exists() {
            warn!("removing stale staging directory {}", stage.display());
            fs::remove_dir_all(&stage)
                .io_context(|| format!("removing stale {}", stage.display()))?;
        }
        fs::create_dir(&stage).io_context(|| format!("creating {}", stage.display()))?;
        Ok(stage)
    }

    /// Atomically publish a staged directory at its final location.
    pub fn move_in(&self, stage: &Path, dir: &Path) -> Result<(), StoreError> {
        fs::rename(stage, dir)
            .io_context(|| format!("renaming {} to {}", stage.display(), dir.display()))
    }

    /// What does the store hold for this spec?
    ///
    /// A present `recordnumber` is resolved through the transparency log
    /// and cross-checked against the spec; `log.gz` alone marks a
    /// permanent failure; neither means no prior attempt.
    pub fn lookup(&self, log: &Log, spec: &BuildSpec) -> Result<LookupOutcome, StoreError> {
        let dir = self.dir_for(spec);

        match fs::read_to_string(dir.join(RECORD_NUMBER_FILE)) {
            Ok(contents) => {
                let record_number: u64 =
                    contents
                        .trim()
                        .parse()
                        .map_err(|_| StoreError::BadRecordNumber {
                            dir: dir.display().to_string(),
                            contents: contents.clone(),
                        })?;
                let result = log.read_result(record_number)?;
                if result.spec != *spec {
                    return Err(StoreError::SpecMismatch {
                        record_number,
                        want: spec.to_string(),
                        got: result.spec.to_string(),
                    });
                }
                let binary_present = dir.join(BINARY_FILE).exists();
                Ok(LookupOutcome::Success {
                    record_number,
                    result,
                    binary_present,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if dir.join(LOG_FILE).exists() {
                    Ok(LookupOutcome::Failed)
                } else {
                    Ok(LookupOutcome::Absent)
                }
            }
            Err(e) => Err(StoreError::io(
                format!("reading {}", dir.join(RECORD_NUMBER_FILE).display()),
                e,
            )),
        }
    }

    /// Persist a permanent build failure: gzipped output prefixed with the
    /// error, the error text itself, and a line in the global failure list.
    pub fn save_failure(
        &self,
        spec: &BuildSpec,
        error: &str,
        output: &[u8],
    ) -> Result<(), StoreError> {
        let stage = self.stage_dir_for(spec)?;

        let log_path = stage.join(LOG_FILE);
        let file = fs::File::create(&log_path)
            .io_context(|| format!("creating {}", log_path.display()))?;
        let mut gz = GzEncoder::new(file, Compression::default());
        gz.write_all(error.as_bytes())
            .and_then(|_| gz.write_all(b"\n\n"))
            .and_then(|_| gz.write_all(output))
            .and_then(|_| gz.finish().map(|_| ()))
            .io_context(|| format!("writing {}", log_path.display()))?;

        fs::write(
            stage.join(BUILD_ERROR_FILE),
            format!("{spec}\n{error}\n"),
        )
        .io_context(|| "writing builderror.txt".to_string())?;

        let failures = self.result_dir.join(FAILURES_FILE);
        let mut list = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&failures)
            .io_context(|| format!("opening {}", failures.display()))?;
        writeln!(list, "{spec}").io_context(|| format!("appending to {}", failures.display()))?;

        self.move_in(&stage, &self.dir_for(spec))
    }

    /// Gzip build output into a staged directory, for success commits.
    pub fn write_log(&self, stage: &Path, output: &[u8]) -> Result<(), StoreError> {
        let path = stage.join(LOG_FILE);
        let file =
            fs::File::create(&path).io_context(|| format!("creating {}", path.display()))?;
        let mut gz = GzEncoder::new(file, Compression::default());
        gz.write_all(output)
            .and_then(|_| gz.finish().map(|_| ()))
            .io_context(|| format!("writing {}", path.display()))
    }

    /// Gzip the compiled binary at `binary` into `dir/binary.gz`.
    pub fn write_binary(&self, dir: &Path, binary: &Path) -> Result<(), StoreError> {
        let mut src =
            fs::File::open(binary).io_context(|| format!("opening {}", binary.display()))?;
        let path = dir.join(BINARY_FILE);
        let file =
            fs::File::create(&path).io_context(|| format!("creating {}", path.display()))?;
        let mut gz = GzEncoder::new(file, Compression::default());
        std::io::copy(&mut src, &mut gz)
            .and_then(|_| gz.finish().map(|_| ()))
            .io_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// Read back the gzipped build output of a prior attempt.
    pub fn read_log(&self, spec: &BuildSpec) -> Result<Vec<u8>, StoreError> {
        let path = self.dir_for(spec).join(LOG_FILE);
        let file = fs::File::open(&path).io_context(|| format!("opening {}", path.display()))?;
        let mut out = Vec::new();
        GzDecoder::new(file)
            .read_to_end(&mut out)
            .io_context(|| format!("reading {}", path.display()))?;
        Ok(out)
    }

    /// Drop a failed build's directory so the next request rebuilds.
    /// Refuses to purge a successful build.
    pub fn purge_failure(&self, log: &Log, spec: &BuildSpec) -> Result<(), StoreError> {
        match self.lookup(log, spec)? {
            LookupOutcome::Failed => {
                let dir = self.dir_for(spec);
                fs::remove_dir_all(&dir)
                    .io_context(|| format!("removing {}", dir.display()))?;
                info!("purged failed build {spec} for retry");
                Ok(())
            }
            LookupOutcome::Absent => Ok(()),
            LookupOutcome::Success { .. } => Err(StoreError::NotFailed {
                spec: spec.to_string(),
            }),
        }
    }

    /// Remove `binary.gz` from successful build directories whose binary
    /// is older than `max_age`. The record stays canonical; a later
    /// request rebuilds the binary under its recorded sum. Returns how
    /// many binaries were reclaimed.
    pub fn gc_binaries(&self, max_age: std::time::Duration) -> Result<u64, StoreError> {
        let cutoff = SystemTime::now() - max_age;
        let mut reclaimed = 0u64;

        let buckets = match fs::read_dir(&self.result_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(StoreError::io(
                    format!("reading {}", self.result_dir.display()),
                    e,
                ));
            }
        };
        for bucket in buckets {
            let bucket = bucket.io_context(|| "reading bucket entry".to_string())?;
            if !bucket.file_type().io_context(|| "bucket type".to_string())?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(bucket.path())
                .io_context(|| format!("reading {}", bucket.path().display()))?
            {
                let dir = entry.io_context(|| "reading store entry".to_string())?.path();
                let binary = dir.join(BINARY_FILE);
                if !dir.join(RECORD_NUMBER_FILE).exists() || !binary.exists() {
                    continue;
                }
                let mtime = fs::metadata(&binary)
                    .and_then(|m| m.modified())
                    .io_context(|| format!("statting {}", binary.display()))?;
                if mtime < cutoff {
                    fs::remove_file(&binary)
                        .io_context(|| format!("removing {}", binary.display()))?;
                    reclaimed += 1;
                }
            }
        }
        if reclaimed > 0 {
            info!("binary gc reclaimed {reclaimed} binaries");
        }
        Ok(reclaimed)
    }

    pub fn result_dir(&self) -> &Path {
        &self.result_dir
    }
}

#[cfg(test)]
mod tests {
    use goforge_spec::Sum;
    use goforge_tlog::Signer;
    use sha2::{Digest, Sha256};

    use super::*;

    fn spec(version: &str) -> BuildSpec {
        BuildSpec::new(
            "example.com/cmd/hello",
            version,
            "/",
            "linux",
            "amd64",
            "go1.22.1",
        )
        .unwrap()
    }

    fn open_log(dir: &Path) -> Log {
        let signer = Signer::new("store.test", ed25519_dalek::SigningKey::from_bytes(&[3u8; 32]));
        Log::open(&dir.join("log"), signer).unwrap()
    }

    async fn commit(store: &Store, log: &Log, spec: &BuildSpec) -> u64 {
        let digest: [u8; 32] = Sha256::digest(spec.version.as_bytes()).into();
        let result = BuildResult {
            spec: spec.clone(),
            filesize: 77,
            sum: Sum::from_digest(&digest),
        };
        let stage = store.stage_dir_for(spec).unwrap();
        store.write_log(&stage, b"build ok\n").unwrap();
        let bin = stage.join("plain-binary");
        fs::write(&bin, b"fake binary contents").unwrap();
        store.write_binary(&stage, &bin).unwrap();
        fs::remove_file(&bin).unwrap();
        log.add_record(&stage, &store.dir_for(spec), &result)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_lookup_states() {
        let tmp = tempfile::tempdir().unwrap();
        let log = open_log(tmp.path());
        let store = Store::new(tmp.path().join("results"));

        // Absent before any attempt.
        assert_eq!(
            store.lookup(&log, &spec("v1.0.0")).unwrap(),
            LookupOutcome::Absent
        );

        // Success once committed through the log.
        let n = commit(&store, &log, &spec("v1.0.0")).await;
        match store.lookup(&log, &spec("v1.0.0")).unwrap() {
            LookupOutcome::Success {
                record_number,
                result,
                binary_present,
            } => {
                assert_eq!(record_number, n);
                assert_eq!(result.spec, spec("v1.0.0"));
                assert!(binary_present);
            }
            other => panic!("want success, got {other:?}"),
        }

        // Failure state for a different spec.
        store
            .save_failure(&spec("v2.0.0"), "exit status 1", b"compile output")
            .unwrap();
        assert_eq!(
            store.lookup(&log, &spec("v2.0.0")).unwrap(),
            LookupOutcome::Failed
        );
        let output = store.read_log(&spec("v2.0.0")).unwrap();
        assert!(output.starts_with(b"exit status 1\n\n"));
        let failures =
            fs::read_to_string(tmp.path().join("results").join(FAILURES_FILE)).unwrap();
        assert_eq!(failures, format!("{}\n", spec("v2.0.0")));
    }

    #[tokio::test]
    async fn test_purge_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let log = open_log(tmp.path());
        let store = Store::new(tmp.path().join("results"));

        store
            .save_failure(&spec("v1.0.0"), "not a main package", b"")
            .unwrap();
        store.purge_failure(&log, &spec("v1.0.0")).unwrap();
        assert_eq!(
            store.lookup(&log, &spec("v1.0.0")).unwrap(),
            LookupOutcome::Absent
        );

        // A successful build cannot be purged.
        commit(&store, &log, &spec("v2.0.0")).await;
        assert!(store.purge_failure(&log, &spec("v2.0.0")).is_err());
    }

    #[tokio::test]
    async fn test_gc_reclaims_old_binaries() {
        let tmp = tempfile::tempdir().unwrap();
        let log = open_log(tmp.path());
        let store = Store::new(tmp.path().join("results"));
        commit(&store, &log, &spec("v1.0.0")).await;

        // Nothing young enough to reclaim.
        assert_eq!(store.gc_binaries(std::time::Duration::from_secs(3600)).unwrap(), 0);

        // With a zero cutoff everything qualifies.
        assert_eq!(store.gc_binaries(std::time::Duration::ZERO).unwrap(), 1);
        match store.lookup(&log, &spec("v1.0.0")).unwrap() {
            LookupOutcome::Success { binary_present, .. } => assert!(!binary_present),
            other => panic!("want success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stale_stage_dir_replaced() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path().join("results"));

        let first = store.stage_dir_for(&spec("v1.0.0")).unwrap();
        fs::write(first.join("leftover"), b"crashed build").unwrap();
        let second = store.stage_dir_for(&spec("v1.0.0")).unwrap();
        assert_eq!(first, second);
        assert!(!second.join("leftover").exists());
    }
}
