// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

//! Record wire format.
//!
//! A record is the textual line
//! `module version dir goos goarch goversion filesize sum\n`, stored in the
//! records file as a big-endian `u16` length followed by the payload,
//! zero-padded to a fixed 512-byte stride so record N lives at byte offset
//! `N * 512`.

use serde::{Deserialize, Serialize};

use goforge_spec::{BuildSpec, Sum};

use crate::LogError;

/// Fixed stride of one record slot in the records file.
pub const RECORD_STRIDE: usize = 512;

/// Size of one stored Merkle node hash.
pub const HASH_SIZE: usize = 32;

/// Maximum payload length: the stride minus the two length bytes.
pub const MAX_PAYLOAD: usize = RECORD_STRIDE - 2;

/// A successful build: the spec, the compiled binary's size, and its sum.
/// This is the unit the transparency log records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    pub spec: BuildSpec,
    pub filesize: u64,
    pub sum: Sum,
}

impl BuildResult {
    /// Render the record line. Always newline-terminated.
    pub fn to_line(&self) -> String {
        let s = &self.spec;
        format!(
            "{} {} {} {} {} {} {} {}\n",
            s.module, s.version, s.dir, s.goos, s.goarch, s.goversion, self.filesize, self.sum
        )
    }

    /// Parse a record line produced by [`BuildResult::to_line`].
    pub fn parse_line(line: &str) -> Result<BuildResult, LogError> {
        let bad = |reason: &str| LogError::BadRecord {
            reason: reason.to_string(),
        };

        let line = line.strip_suffix('\n').ok_or(bad("missing newline"))?;
        let fields: Vec<&str> = line.split(' ').collect();
        if fields.len() != 8 {
            return Err(bad("expected 8 fields"));
        }
        if fields
            .iter()
            .any(|f| f.is_empty() || f.bytes().any(|b| b <= 0x20))
        {
            return Err(bad("empty field or whitespace inside field"));
        }

        let spec = BuildSpec::new(fields[0], fields[1], fields[2], fields[3], fields[4], fields[5])?;
        let filesize: u64 = fields[6]
            .parse()
            .map_err(|_| bad("filesize not an integer"))?;
        if filesize == 0 {
            return Err(bad("filesize must be positive"));
        }
        let sum = Sum::parse(fields[7])?;

        Ok(BuildResult {
            spec,
            filesize,
            sum,
        })
    }
}

/// Pack a payload into one record slot.
pub fn pack_record(payload: &[u8]) -> Result<[u8; RECORD_STRIDE], LogError> {
    if payload.is_empty() {
        return Err(LogError::BadRecord {
            reason: "empty payload".to_string(),
        });
    }
    if payload.len() > MAX_PAYLOAD {
        return Err(LogError::RecordTooLarge {
            len: payload.len(),
        });
    }
    let mut slot = [0u8; RECORD_STRIDE];
    slot[..2].copy_from_slice(&(payload.len() as u16).to_be_bytes());
    slot[2..2 + payload.len()].copy_from_slice(payload);
    Ok(slot)
}

/// Extract the payload from one record slot, honoring the embedded length.
pub fn unpack_record(slot: &[u8]) -> Result<Vec<u8>, LogError> {
    if slot.len() != RECORD_STRIDE {
        return Err(LogError::BadRecord {
            reason: format!("slot is {} bytes, want {RECORD_STRIDE}", slot.len()),
        });
    }
    let len = u16::from_be_bytes([slot[0], slot[1]]) as usize;
    if len == 0 || len > MAX_PAYLOAD {
        return Err(LogError::BadRecord {
            reason: format!("embedded length {len} out of range"),
        });
    }
    Ok(slot[2..2 + len].to_vec())
}
