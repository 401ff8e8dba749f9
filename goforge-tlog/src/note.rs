// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

//! Signed tree heads.
//!
//! A tree head is the textual description of the current log, three lines:
//! a fixed banner, the record count, and the base64 root hash. It is
//! published wrapped in a signed note: the text, a blank line, and one
//! signature line `— <name> <base64(keyid || signature)>`, where the 4-byte
//! key id ties the signature to the signer's public key.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::{Hash, LogError};

/// First line of the tree text.
const TREE_BANNER: &str = "goforge build tree";

/// Algorithm byte mixed into the key id, one value per signature scheme.
const ALG_ED25519: u8 = 1;

/// Render the tree text for a log of `size` records with root hash `root`.
pub fn format_tree(size: u64, root: &Hash) -> String {
    format!("{TREE_BANNER}\n{size}\n{}\n", STANDARD.encode(root))
}

/// Parse a tree text back into `(size, root)`.
pub fn parse_tree(text: &str) -> Result<(u64, Hash), LogError> {
    let bad = |reason: &str| LogError::BadNote {
        reason: reason.to_string(),
    };
    let mut lines = text.lines();
    if lines.next() != Some(TREE_BANNER) {
        return Err(bad("wrong banner"));
    }
    let size: u64 = lines
        .next()
        .and_then(|l| l.parse().ok())
        .ok_or(bad("bad size line"))?;
    let root_b64 = lines.next().ok_or(bad("missing root line"))?;
    let root: Hash = STANDARD
        .decode(root_b64)
        .ok()
        .and_then(|v| v.try_into().ok())
        .ok_or(bad("bad root hash"))?;
    if lines.next().is_some() {
        return Err(bad("trailing lines"));
    }
    Ok((size, root))
}

/// The log's signing identity: a name and an ed25519 key.
#[derive(Debug)]
pub struct Signer {
    name: String,
    key: SigningKey,
}

impl Signer {
    pub fn new(name: impl Into<String>, key: SigningKey) -> Signer {
        Signer {
            name: name.into(),
            key,
        }
    }

    /// Load a key file of the form `name:base64(seed | keypair)`, with a
    /// 32-byte seed or 64-byte keypair.
    pub fn from_key_file(path: &Path) -> Result<Signer, LogError> {
        let bad = |reason: &str| LogError::BadKey {
            reason: format!("{}: {reason}", path.display()),
        };
        let contents = std::fs::read_to_string(path)
            .map_err(|e| LogError::io(format!("reading key file {}", path.display()), e))?;
        let (name, key_b64) = contents
            .split_once(':')
            .ok_or(bad("missing name: prefix"))?;
        let key_bytes = STANDARD
            .decode(key_b64.trim())
            .map_err(|_| bad("key not base64"))?;

        let key = match key_bytes.len() {
            32 => {
                let seed: [u8; 32] = key_bytes.as_slice().try_into().expect("length checked");
                SigningKey::from_bytes(&seed)
            }
            64 => {
                let pair: [u8; 64] = key_bytes.as_slice().try_into().expect("length checked");
                SigningKey::from_keypair_bytes(&pair)
                    .map_err(|_| bad("invalid ed25519 keypair"))?
            }
            n => {
                return Err(bad(if n < 32 {
                    "key too short"
                } else {
                    "key must be 32 or 64 bytes"
                }));
            }
        };
        Ok(Signer::new(name.to_string(), key))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Sign `text` (which must be newline-terminated) into a note.
    pub fn sign(&self, text: &str) -> String {
        debug_assert!(text.ends_with('\n'));
        let sig = self.key.sign(text.as_bytes());
        let mut blob = Vec::with_capacity(4 + 64);
        blob.extend_from_slice(&key_id(&self.name, &self.key.verifying_key()));
        blob.extend_from_slice(&sig.to_bytes());
        format!("{text}\n\u{2014} {} {}\n", self.name, STANDARD.encode(blob))
    }
}

/// The 4-byte key id: a prefix of `SHA256(name || '\n' || alg || pubkey)`.
fn key_id(name: &str, key: &VerifyingKey) -> [u8; 4] {
    let mut h = Sha256::new();
    h.update(name.as_bytes());
    h.update([b'\n', ALG_ED25519]);
    h.update(key.as_bytes());
    let digest = h.finalize();
    [digest[0], digest[1], digest[2], digest[3]]
}

/// Verify a note against the given signer identity, returning the text.
pub fn verify_note(note: &str, name: &str, key: &VerifyingKey) -> Result<String, LogError> {
    let bad = |reason: &str| LogError::BadNote {
        reason: reason.to_string(),
    };

    let sep = note.rfind("\n\n").ok_or(bad("missing signature section"))?;
    let text = &note[..sep + 1];
    let sig_lines = &note[sep + 2..];

    for line in sig_lines.lines() {
        let rest = match line.strip_prefix("\u{2014} ") {
            Some(rest) => rest,
            None => return Err(bad("malformed signature line")),
        };
        let (sig_name, blob_b64) = rest.split_once(' ').ok_or(bad("malformed signature line"))?;
        if sig_name != name {
            continue;
        }
        let blob = STANDARD
            .decode(blob_b64)
            .map_err(|_| bad("signature not base64"))?;
        if blob.len() != 4 + 64 {
            return Err(bad("signature blob has wrong length"));
        }
        if blob[..4] != key_id(name, key) {
            return Err(bad("key id mismatch"));
        }
        let sig_bytes: [u8; 64] = blob[4..].try_into().expect("length checked");
        let sig = Signature::from_bytes(&sig_bytes);
        key.verify(text.as_bytes(), &sig)
            .map_err(|_| bad("signature does not verify"))?;
        return Ok(text.to_string());
    }
    Err(bad("no signature from the expected signer"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> Signer {
        Signer::new("log.example.org", SigningKey::from_bytes(&[7u8; 32]))
    }

    #[test]
    fn test_tree_text_round_trip() {
        let root = [0xabu8; 32];
        let text = format_tree(42, &root);
        assert_eq!(text.lines().count(), 3);
        let (size, parsed) = parse_tree(&text).unwrap();
        assert_eq!(size, 42);
        assert_eq!(parsed, root);
    }

    #[test]
    fn test_sign_verify() {
        let signer = signer();
        let text = format_tree(7, &[1u8; 32]);
        let note = signer.sign(&text);

        let recovered = verify_note(&note, signer.name(), &signer.verifying_key()).unwrap();
        assert_eq!(recovered, text);
        let (size, _) = parse_tree(&recovered).unwrap();
        assert_eq!(size, 7);
    }

    #[test]
    fn test_verify_rejects() {
        let signer = signer();
        let note = signer.sign(&format_tree(7, &[1u8; 32]));

        // Wrong name.
        assert!(verify_note(&note, "other.example.org", &signer.verifying_key()).is_err());
        // Wrong key.
        let other = SigningKey::from_bytes(&[8u8; 32]);
        assert!(verify_note(&note, signer.name(), &other.verifying_key()).is_err());
        // Tampered text.
        let tampered = note.replace('7', "8");
        assert!(verify_note(&tampered, signer.name(), &signer.verifying_key()).is_err());
    }
}
