// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

use std::fmt;

use crate::SpecError;

/// Oldest toolchain minor the service will build with. Earlier releases
/// predate reproducible `-trimpath` output.
pub const MIN_MINOR: u32 = 13;

/// A parsed toolchain version token of the form
/// `go1.<minor>[.<patch>][<pre>]`, e.g. `go1.22.1` or `go1.23rc2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GoVersion {
    pub minor: u32,
    pub patch: Option<u32>,
    pub prerelease: Option<String>,
}

impl GoVersion {
    /// Parse a version token. `latest` is not accepted here; symbolic
    /// versions are resolved before a spec reaches the core.
    pub fn parse(token: &str) -> Result<GoVersion, SpecError> {
        let bad = |reason| SpecError::BadGoversion {
            goversion: token.to_string(),
            reason,
        };

        let rest = token
            .strip_prefix("go1.")
            .ok_or(bad("must start with go1."))?;

        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits_end == 0 {
            return Err(bad("missing minor version"));
        }
        let minor: u32 = rest[..digits_end]
            .parse()
            .map_err(|_| bad("minor version out of range"))?;
        if minor < MIN_MINOR {
            return Err(bad("toolchain too old"));
        }
        let mut rest = &rest[digits_end..];

        let mut patch = None;
        if let Some(after_dot) = rest.strip_prefix('.') {
            let digits_end = after_dot
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(after_dot.len());
            if digits_end == 0 {
                return Err(bad("missing patch version"));
            }
            patch = Some(
                after_dot[..digits_end]
                    .parse()
                    .map_err(|_| bad("patch version out of range"))?,
            );
            rest = &after_dot[digits_end..];
        }

        let prerelease = if rest.is_empty() {
            None
        } else {
            // Pre-release suffixes like rc1 or beta2: alphabetic tag
            // followed by a number, only on patchless versions.
            if patch.is_some() {
                return Err(bad("pre-release not allowed after patch version"));
            }
            if !rest.starts_with(|c: char| c.is_ascii_lowercase())
                || !rest.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            {
                return Err(bad("malformed pre-release suffix"));
            }
            Some(rest.to_string())
        };

        Ok(GoVersion {
            minor,
            patch,
            prerelease,
        })
    }
}

impl fmt::Display for GoVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "go1.{}", self.minor)?;
        if let Some(patch) = self.patch {
            write!(f, ".{patch}")?;
        }
        if let Some(pre) = &self.prerelease {
            write!(f, "{pre}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let v = GoVersion::parse("go1.22.1").unwrap();
        assert_eq!(v.minor, 22);
        assert_eq!(v.patch, Some(1));
        assert_eq!(v.prerelease, None);
        assert_eq!(v.to_string(), "go1.22.1");

        let v = GoVersion::parse("go1.13").unwrap();
        assert_eq!(v.minor, 13);
        assert_eq!(v.patch, None);

        let v = GoVersion::parse("go1.23rc2").unwrap();
        assert_eq!(v.minor, 23);
        assert_eq!(v.prerelease.as_deref(), Some("rc2"));
        assert_eq!(v.to_string(), "go1.23rc2");
    }

    #[test]
    fn test_parse_rejects() {
        for bad in [
            "latest", "go1", "go1.", "go2.0", "go1.12", "go1.22.", "go1.22.1rc1", "go1.22-rc1",
            "go1.22.x", "1.22", "go1.22 ",
        ] {
            assert!(GoVersion::parse(bad).is_err(), "accepted {bad:?}");
        }
    }
}
