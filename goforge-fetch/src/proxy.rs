// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

//! Module proxy client.
//!
//! The proxy is an immutable, content-addressed HTTP service. The only
//! endpoint the core consults directly is `/{module}/@latest`; source
//! fetching goes through toolchain subprocesses with `GOPROXY` pointed at
//! the same base URL.

use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::FetchError;

/// Deadline for latest-version queries.
const LATEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Proxy path escaping: uppercase letters become `!` plus the lowercase
/// letter, so case-insensitive filesystems can host the proxy cache.
pub fn escape_module_path(module: &str) -> String {
    let mut out = String::with_capacity(module.len());
    for c in module.chars() {
        if c.is_ascii_uppercase() {
            out.push('!');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[derive(Debug, Clone, Deserialize)]
pub struct LatestInfo {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Time")]
    pub time: String,
}

pub struct ModuleProxy {
    base_url: Url,
    client: reqwest::Client,
}

impl ModuleProxy {
    pub fn new(base_url: &str) -> Result<ModuleProxy, FetchError> {
        let base_url = Url::parse(base_url).map_err(|e| FetchError::BadUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(FetchError::BadUrl {
                url: base_url.to_string(),
                reason: "not a base url".to_string(),
            });
        }
        Ok(ModuleProxy {
            base_url,
            client: reqwest::Client::new(),
        })
    }

    /// The proxy's `@latest` endpoint for a module, with the module path
    /// escaped per the proxy rules.
    fn latest_url(&self, module: &str) -> Url {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .expect("proxy url is validated as a base url")
            .pop_if_empty()
            .extend(escape_module_path(module).split('/'))
            .push("@latest");
        url
    }

    /// Resolve a module's newest version via the proxy's `@latest`
    /// endpoint. Unknown modules are not-exist; proxy misbehavior is
    /// classified as remote.
    pub async fn resolve_module_latest(&self, module: &str) -> Result<LatestInfo, FetchError> {
        let url = self.latest_url(module);
        let response = self
            .client
            .get(url.clone())
            .timeout(LATEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| FetchError::remote(format!("querying {url}: {e}")))?;

        match response.status() {
            s if s.is_success() => {}
            reqwest::StatusCode::NOT_FOUND | reqwest::StatusCode::GONE => {
                return Err(FetchError::not_exist(format!("module {module} not known")));
            }
            s => {
                return Err(FetchError::remote(format!("{url} returned status {s}")));
            }
        }
        let info: LatestInfo = response
            .json()
            .await
            .map_err(|e| FetchError::remote(format!("decoding {url}: {e}")))?;
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(escape_module_path("example.com/tool"), "example.com/tool");
        assert_eq!(
            escape_module_path("github.com/Azure/azure-sdk"),
            "github.com/!azure/azure-sdk"
        );
        assert_eq!(escape_module_path("X/Y"), "!x/!y");
    }

    #[test]
    fn test_latest_url() {
        let proxy = ModuleProxy::new("https://proxy.example.org").unwrap();
        assert_eq!(
            proxy.latest_url("github.com/Azure/azure-sdk").as_str(),
            "https://proxy.example.org/github.com/!azure/azure-sdk/@latest"
        );
        // A trailing slash on the base does not double up.
        let proxy = ModuleProxy::new("https://proxy.example.org/").unwrap();
        assert_eq!(
            proxy.latest_url("example.com/tool").as_str(),
            "https://proxy.example.org/example.com/tool/@latest"
        );
    }

    #[test]
    fn test_new_rejects_malformed_urls() {
        assert!(ModuleProxy::new("not a url").is_err());
        assert!(ModuleProxy::new("data:text/plain,x").is_err());
        assert!(ModuleProxy::new("https://proxy.example.org").is_ok());
    }

    #[test]
    fn test_latest_decodes() {
        let info: LatestInfo =
            serde_json::from_str(r#"{"Version":"v1.5.2","Time":"2026-01-02T15:04:05Z"}"#).unwrap();
        assert_eq!(info.version, "v1.5.2");
        assert_eq!(info.time, "2026-01-02T15:04:05Z");
    }
}
