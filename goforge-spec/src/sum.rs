// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

use std::fmt;
use std::io::{self, Read};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::SpecError;

/// How many bytes of the SHA-256 digest make it into a sum.
const DIGEST_PREFIX: usize = 20;

/// Length of the textual form: a leading `0` plus 27 base64url characters
/// encoding the 20-byte digest prefix.
pub const SUM_LEN: usize = 28;

/// The content hash of a compiled binary: `"0" + base64url(sha256[..20])`.
///
/// Two compliant instances building the same spec must arrive at the same
/// sum; it is the value cross-checked with peer verifiers and recorded in
/// the transparency log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sum(String);

impl Sum {
    pub fn from_digest(digest: &[u8; 32]) -> Sum {
        let mut s = String::with_capacity(SUM_LEN);
        s.push('0');
        s.push_str(&URL_SAFE_NO_PAD.encode(&digest[..DIGEST_PREFIX]));
        Sum(s)
    }

    /// Stream `r` through SHA-256, returning the byte count and sum.
    pub fn from_reader<R: Read>(mut r: R) -> io::Result<(u64, Sum)> {
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        let mut size = 0u64;
        loop {
            let n = r.read(&mut buf)?;
            if n == 0 {
                break;
            }
            size += n as u64;
            hasher.update(&buf[..n]);
        }
        Ok((size, Sum::from_digest(&hasher.finalize().into())))
    }

    pub fn parse(s: &str) -> Result<Sum, SpecError> {
        let bad = |reason| SpecError::BadSum {
            sum: s.to_string(),
            reason,
        };
        if s.len() != SUM_LEN {
            return Err(bad("must be 28 characters"));
        }
        let rest = s.strip_prefix('0').ok_or(bad("must start with 0"))?;
        let decoded = URL_SAFE_NO_PAD
            .decode(rest)
            .map_err(|_| bad("not base64url"))?;
        if decoded.len() != DIGEST_PREFIX {
            return Err(bad("must encode 20 bytes"));
        }
        Ok(Sum(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Sum {
    type Error = SpecError;

    fn try_from(s: String) -> Result<Sum, SpecError> {
        Sum::parse(&s)
    }
}

impl From<Sum> for String {
    fn from(sum: Sum) -> String {
        sum.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_digest() {
        let digest: [u8; 32] = Sha256::digest(b"hello world").into();
        let sum = Sum::from_digest(&digest);
        assert_eq!(sum.as_str().len(), SUM_LEN);
        assert!(sum.as_str().starts_with('0'));
        // Independently computed: sha256("hello world")[..20] base64url.
        assert_eq!(sum.as_str(), "0uU0nuZNNPgilLlLX2n2r-sSE7-M");
    }

    #[test]
    fn test_from_reader_matches_digest() {
        let data = b"some compiled binary bytes";
        let (size, sum) = Sum::from_reader(&data[..]).unwrap();
        assert_eq!(size, data.len() as u64);
        let digest: [u8; 32] = Sha256::digest(data).into();
        assert_eq!(sum, Sum::from_digest(&digest));
    }

    #[test]
    fn test_parse() {
        let digest: [u8; 32] = Sha256::digest(b"x").into();
        let sum = Sum::from_digest(&digest);
        assert_eq!(Sum::parse(sum.as_str()).unwrap(), sum);

        assert!(Sum::parse("").is_err());
        assert!(Sum::parse("0short").is_err());
        // Right length, wrong prefix.
        assert!(Sum::parse("1uU0nuZNNPgilLlLX2n2r-sSE7-N").is_err());
        // Right length, invalid base64url.
        assert!(Sum::parse("0uU0nuZNNPgilLlLX2n2r+sSE7?N").is_err());
    }
}
