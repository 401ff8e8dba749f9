// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{GoVersion, SpecError, target_supported};

/// The immutable six-tuple identifying one reproducible build.
///
/// All fields are validated on construction; a value of this type is always
/// canonical. The `Display` form is the canonical serialization
/// `{module}@{version}/{dir-without-leading-slash-with-trailing-slash}{goos}-{goarch}-{goversion}/`
/// and `parse` inverts it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuildSpec {
    /// Module path, e.g. `github.com/user/repo`. No trailing slash, no `.`
    /// or `..` segments.
    pub module: String,
    /// Explicit canonical module version, e.g. `v1.2.3`. Symbolic versions
    /// like `latest` never reach the core.
    pub version: String,
    /// Subdirectory inside the module holding the main package. Always
    /// starts with `/`; `/` is the module root.
    pub dir: String,
    pub goos: String,
    pub goarch: String,
    /// Toolchain version token, e.g. `go1.22.1`.
    pub goversion: String,
}

impl BuildSpec {
    pub fn new(
        module: &str,
        version: &str,
        dir: &str,
        goos: &str,
        goarch: &str,
        goversion: &str,
    ) -> Result<BuildSpec, SpecError> {
        check_module(module)?;
        check_version(version)?;
        check_dir(dir)?;
        if !target_supported(goos, goarch) {
            return Err(SpecError::UnknownTarget {
                goos: goos.to_string(),
                goarch: goarch.to_string(),
            });
        }
        GoVersion::parse(goversion)?;
        Ok(BuildSpec {
            module: module.to_string(),
            version: version.to_string(),
            dir: dir.to_string(),
            goos: goos.to_string(),
            goarch: goarch.to_string(),
            goversion: goversion.to_string(),
        })
    }

    /// Parse the canonical serialization back into a spec.
    pub fn parse(s: &str) -> Result<BuildSpec, SpecError> {
        let bad = |reason| SpecError::BadPath { reason };

        let (module, rest) = s.split_once('@').ok_or(bad("missing @version"))?;
        let mut segments: Vec<&str> = rest.split('/').collect();
        // The canonical form ends in a slash, leaving one empty segment.
        match segments.pop() {
            Some("") => {}
            _ => return Err(bad("missing trailing slash")),
        }
        if segments.len() < 2 {
            return Err(bad("missing target segment"));
        }
        let version = segments.remove(0);
        let target = segments.pop().expect("len checked above");
        let (goos, goarch, goversion) = split_target(target)?;

        let dir = if segments.is_empty() {
            "/".to_string()
        } else {
            if segments.iter().any(|seg| seg.is_empty()) {
                return Err(bad("empty directory segment"));
            }
            format!("/{}", segments.join("/"))
        };

        BuildSpec::new(module, version, &dir, goos, goarch, goversion)
    }

    /// Identifier of the store directory for this spec: base64url of the
    /// 20-byte SHA-256 prefix of the canonical serialization. The store
    /// buckets directories under the identifier's first character.
    pub fn storage_id(&self) -> String {
        let digest = Sha256::digest(self.to_string().as_bytes());
        URL_SAFE_NO_PAD.encode(&digest[..20])
    }

    /// Name of the compiled binary: the base name of the package directory,
    /// or of the module for builds at the module root.
    pub fn base_name(&self) -> &str {
        let path = if self.dir == "/" { &self.module } else { &self.dir };
        path.rsplit('/').next().unwrap_or(path)
    }

    /// File name offered for download:
    /// `{base_name}-{version}-{goversion}` plus `.exe` on windows.
    pub fn download_name(&self) -> String {
        let ext = if self.goos == "windows" { ".exe" } else { "" };
        format!(
            "{}-{}-{}{}",
            self.base_name(),
            self.version,
            self.goversion,
            ext
        )
    }

    /// Import path of the package: module plus subdirectory.
    pub fn package_path(&self) -> String {
        if self.dir == "/" {
            self.module.clone()
        } else {
            format!("{}{}", self.module, self.dir)
        }
    }
}

impl fmt::Display for BuildSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/", self.module, self.version)?;
        if self.dir != "/" {
            write!(f, "{}/", &self.dir[1..])?;
        }
        write!(f, "{}-{}-{}/", self.goos, self.goarch, self.goversion)
    }
}

impl FromStr for BuildSpec {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<BuildSpec, SpecError> {
        BuildSpec::parse(s)
    }
}

/// Split a `goos-goarch-goversion` path segment at its first two dashes.
pub(crate) fn split_target(segment: &str) -> Result<(&str, &str, &str), SpecError> {
    let mut parts = segment.splitn(3, '-');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(goos), Some(goarch), Some(goversion))
            if !goos.is_empty() && !goarch.is_empty() && !goversion.is_empty() =>
        {
            Ok((goos, goarch, goversion))
        }
        _ => Err(SpecError::BadPath {
            reason: "malformed goos-goarch-goversion segment",
        }),
    }
}

fn field_chars_ok(s: &str) -> bool {
    s.bytes().all(|b| b > 0x20 && b != 0x7f)
}

fn check_module(module: &str) -> Result<(), SpecError> {
    let bad = |reason| SpecError::BadModule {
        module: module.to_string(),
        reason,
    };
    if module.is_empty() {
        return Err(bad("empty"));
    }
    if !field_chars_ok(module) {
        return Err(bad("contains whitespace or control characters"));
    }
    if module.starts_with('/') || module.ends_with('/') {
        return Err(bad("leading or trailing slash"));
    }
    let mut segments = module.split('/');
    let host = segments.next().expect("split yields at least one segment");
    if !host.contains('.') {
        return Err(bad("first segment must be a dotted host"));
    }
    for seg in module.split('/') {
        match seg {
            "" => return Err(bad("empty path segment")),
            "." | ".." => return Err(bad("relative path segment")),
            _ => {}
        }
    }
    Ok(())
}

fn check_version(version: &str) -> Result<(), SpecError> {
    let bad = |reason| SpecError::BadVersion {
        version: version.to_string(),
        reason,
    };
    if version == "latest" {
        return Err(bad("symbolic versions must be resolved before building"));
    }
    let rest = version.strip_prefix('v').ok_or(bad("must start with v"))?;
    if !field_chars_ok(rest) {
        return Err(bad("contains whitespace or control characters"));
    }

    // Optional "+incompatible" build suffix, then optional "-pre" chain.
    let rest = rest.strip_suffix("+incompatible").unwrap_or(rest);
    let core = match rest.split_once('-') {
        Some((core, pre)) => {
            for ident in pre.split('.') {
                if ident.is_empty()
                    || !ident.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
                {
                    return Err(bad("malformed pre-release"));
                }
            }
            core
        }
        None => rest,
    };

    let fields: Vec<&str> = core.split('.').collect();
    if fields.len() != 3 {
        return Err(bad("must have major.minor.patch"));
    }
    for field in fields {
        if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad("non-numeric version field"));
        }
        if field.len() > 1 && field.starts_with('0') {
            return Err(bad("leading zero in version field"));
        }
    }
    Ok(())
}

fn check_dir(dir: &str) -> Result<(), SpecError> {
    let bad = |reason| SpecError::BadDir {
        dir: dir.to_string(),
        reason,
    };
    if dir == "/" {
        return Ok(());
    }
    let rest = dir.strip_prefix('/').ok_or(bad("must start with /"))?;
    if rest.ends_with('/') {
        return Err(bad("trailing slash"));
    }
    if !field_chars_ok(rest) {
        return Err(bad("contains whitespace or control characters"));
    }
    for seg in rest.split('/') {
        match seg {
            "" => return Err(bad("empty path segment")),
            "." | ".." => return Err(bad("relative path segment")),
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(dir: &str) -> BuildSpec {
        BuildSpec::new(
            "github.com/user/tool",
            "v1.2.3",
            dir,
            "linux",
            "amd64",
            "go1.22.1",
        )
        .unwrap()
    }

    #[test]
    fn test_canonical_string() {
        assert_eq!(
            spec("/").to_string(),
            "github.com/user/tool@v1.2.3/linux-amd64-go1.22.1/"
        );
        assert_eq!(
            spec("/cmd/tool").to_string(),
            "github.com/user/tool@v1.2.3/cmd/tool/linux-amd64-go1.22.1/"
        );
    }

    #[test]
    fn test_round_trip() {
        for dir in ["/", "/cmd/tool", "/internal/x"] {
            let s = spec(dir);
            let parsed = BuildSpec::parse(&s.to_string()).unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn test_parse_rejects() {
        for bad in [
            "",
            "github.com/user/tool",
            "github.com/user/tool@v1.2.3",
            "github.com/user/tool@v1.2.3/linux-amd64-go1.22.1",
            "github.com/user/tool@latest/linux-amd64-go1.22.1/",
            "github.com/user/tool@v1.2.3/linux-amd64-latest/",
            "github.com/user/tool@v1.2.3/../linux-amd64-go1.22.1/",
            "github.com/user/tool@v1.2.3/beos-amd64-go1.22.1/",
            "nodots@v1.2.3/linux-amd64-go1.22.1/",
        ] {
            assert!(BuildSpec::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_versions() {
        for ok in [
            "v1.2.3",
            "v0.0.0-20240101120000-0123456789ab",
            "v2.0.0+incompatible",
            "v1.0.0-rc.1",
        ] {
            assert!(
                BuildSpec::new("example.com/m", ok, "/", "linux", "amd64", "go1.22.1").is_ok(),
                "rejected {ok:?}"
            );
        }
        for bad in ["latest", "1.2.3", "v1.2", "v1.02.3", "v1.2.x", "v1.2.3 "] {
            assert!(
                BuildSpec::new("example.com/m", bad, "/", "linux", "amd64", "go1.22.1").is_err(),
                "accepted {bad:?}"
            );
        }
    }

    proptest::proptest! {
        /// Canonical serialization round-trips for arbitrary well-formed specs.
        #[test]
        fn prop_round_trip(
            host in "[a-z]{1,5}\\.[a-z]{2,3}",
            seg in "[a-z0-9]{1,8}",
            dirseg in proptest::option::of("[a-z0-9]{1,8}"),
            minor in 13u32..40,
        ) {
            let module = format!("{host}/{seg}");
            let dir = match dirseg {
                Some(d) => format!("/{d}"),
                None => "/".to_string(),
            };
            let goversion = format!("go1.{minor}");
            let spec =
                BuildSpec::new(&module, "v1.0.0", &dir, "linux", "amd64", &goversion).unwrap();
            proptest::prop_assert_eq!(BuildSpec::parse(&spec.to_string()).unwrap(), spec);
        }
    }

    #[test]
    fn test_serde_round_trip() {
        // Specs travel inside JSON-encoded build updates.
        let s = spec("/cmd/tool");
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(serde_json::from_str::<BuildSpec>(&json).unwrap(), s);
    }

    #[test]
    fn test_storage_id() {
        let id = spec("/").storage_id();
        assert_eq!(id.len(), 27);
        // Stable across calls and instances.
        assert_eq!(id, spec("/").storage_id());
        assert_ne!(id, spec("/cmd/tool").storage_id());
    }

    #[test]
    fn test_names() {
        assert_eq!(spec("/").base_name(), "tool");
        assert_eq!(spec("/cmd/frontend").base_name(), "frontend");
        assert_eq!(
            spec("/").download_name(),
            "tool-v1.2.3-go1.22.1"
        );
        let win = BuildSpec::new(
            "github.com/user/tool",
            "v1.2.3",
            "/",
            "windows",
            "amd64",
            "go1.22.1",
        )
        .unwrap();
        assert_eq!(win.download_name(), "tool-v1.2.3-go1.22.1.exe");
        assert_eq!(spec("/cmd/tool").package_path(), "github.com/user/tool/cmd/tool");
        assert_eq!(spec("/").package_path(), "github.com/user/tool");
    }
}
