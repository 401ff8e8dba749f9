// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

//! Request path parsing.
//!
//! Paths follow the canonical spec serialization with an optional sum
//! segment and a trailing page selector:
//! `/<module>@<version>/<dir>/<goos>-<goarch>-<goversion>/[<sum>/]<page>`.
//! Non-canonical paths are rejected outright rather than redirected; the
//! edge resolves symbolic versions before a path reaches this parser.

use crate::spec::split_target;
use crate::{BuildSpec, GoVersion, SpecError, Sum, target_supported};

/// What a request addresses within one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    /// The build itself; triggers or reports the build.
    Index,
    /// Compile output.
    Log,
    /// Binary download redirect.
    Dl,
    /// The transparency log record.
    Record,
    /// Build progress event stream.
    Events,
    /// The binary, under its versioned download name.
    Download,
    /// The gzipped binary.
    DownloadGz,
}

/// A parsed request: the spec it addresses, an optional expected sum, and
/// the page selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub spec: BuildSpec,
    pub sum: Option<Sum>,
    pub page: Page,
}

impl Request {
    pub fn parse(path: &str) -> Result<Request, SpecError> {
        let bad = |reason| SpecError::BadPath { reason };

        let path = path.strip_prefix('/').ok_or(bad("must start with /"))?;
        let (module, rest) = path.split_once('@').ok_or(bad("missing @version"))?;
        let mut segments: Vec<&str> = rest.split('/').collect();
        if segments.len() < 2 {
            return Err(bad("missing target segment"));
        }
        let version = segments.remove(0);

        // The first segment that reads as a supported target triplet closes
        // the directory part; everything after it is sum and page.
        let target_at = segments
            .iter()
            .position(|seg| is_target(seg))
            .ok_or(bad("missing target segment"))?;
        let (goos, goarch, goversion) = split_target(segments[target_at])?;
        let dir = if target_at == 0 {
            "/".to_string()
        } else {
            if segments[..target_at].iter().any(|seg| seg.is_empty()) {
                return Err(bad("empty directory segment"));
            }
            format!("/{}", segments[..target_at].join("/"))
        };
        let spec = BuildSpec::new(module, version, &dir, goos, goarch, goversion)?;

        let mut tail = &segments[target_at + 1..];
        if tail.is_empty() {
            return Err(bad("missing trailing slash after target"));
        }

        let sum = match Sum::parse(tail[0]) {
            Ok(sum) => {
                tail = &tail[1..];
                if tail.is_empty() {
                    return Err(bad("missing trailing slash after sum"));
                }
                Some(sum)
            }
            Err(_) => None,
        };

        if tail.len() != 1 {
            return Err(bad("trailing path segments"));
        }
        let page = match tail[0] {
            "" => Page::Index,
            "log" => Page::Log,
            "dl" => Page::Dl,
            "record" => Page::Record,
            "events" => Page::Events,
            name if name == spec.download_name() => Page::Download,
            name if name == format!("{}.gz", spec.download_name()) => Page::DownloadGz,
            _ => return Err(bad("unknown page")),
        };

        Ok(Request { spec, sum, page })
    }
}

fn is_target(segment: &str) -> bool {
    match split_target(segment) {
        Ok((goos, goarch, goversion)) => {
            target_supported(goos, goarch) && GoVersion::parse(goversion).is_ok()
        }
        Err(_) => false,
    }
}
