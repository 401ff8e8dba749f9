// SPDX-FileCopyrightText: 2026 goforge contributors
// SPDX-License-Identifier: MIT

//! Toolchain subprocess adapters.
//!
//! Module resolution, source fetching and package interrogation all go
//! through `go` subprocesses running under a controlled environment: the
//! process-managed home, the configured module proxy, and no toolchain
//! auto-switching. Network is allowed here; it is the compile step that
//! runs with the proxy denied.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tokio::process::Command;

use crate::cmd::{AuxCommands, command_failed};
use crate::FetchError;

pub struct Toolchain {
    gobin: PathBuf,
    home: PathBuf,
    proxy_url: String,
    aux: Arc<AuxCommands>,
}

#[derive(Debug, Deserialize)]
struct ModuleJson {
    #[serde(rename = "Path", default)]
    path: String,
    #[serde(rename = "Version", default)]
    version: String,
    #[serde(rename = "Dir", default)]
    dir: String,
    #[serde(rename = "Error", default)]
    error: Option<ModuleJsonError>,
}

/// `go list -m -json` and `go mod download -json` disagree on the shape of
/// the error field; accept both.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ModuleJsonError {
    Message(String),
    Wrapped { #[serde(rename = "Err")] err: String },
}

impl ModuleJsonError {
    fn message(&self) -> &str {
        match self {
            ModuleJsonError::Message(s) => s,
            ModuleJsonError::Wrapped { err } => err,
        }
    }
}

impl Toolchain {
    pub fn new(
        gobin: impl Into<PathBuf>,
        home: impl Into<PathBuf>,
        proxy_url: impl Into<String>,
        aux: Arc<AuxCommands>,
    ) -> Toolchain {
        Toolchain {
            gobin: gobin.into(),
            home: home.into(),
            proxy_url: proxy_url.into(),
            aux,
        }
    }

    pub fn gobin(&self) -> &Path {
        &self.gobin
    }

    fn command(&self, dir: &Path) -> Command {
        let mut cmd = Command::new(&self.gobin);
        cmd.current_dir(dir);
        cmd.env_clear();
        cmd.env("PATH", std::env::var_os("PATH").unwrap_or_default());
        cmd.env("HOME", &self.home);
        cmd.env("GOPATH", self.home.join("go"));
        cmd.env("GO111MODULE", "on");
        cmd.env("GOTOOLCHAIN", "local");
        cmd.env("GOPROXY", &self.proxy_url);
        cmd.env("GOSUMDB", "off");
        cmd
    }

    /// Expand a possibly-symbolic module version (a tag, branch or query)
    /// to the canonical version the proxy serves.
    pub async fn resolve_module_version(
        &self,
        module: &str,
        version: &str,
    ) -> Result<String, FetchError> {
        let mut cmd = self.command(&self.home);
        cmd.args(["list", "-m", "-json"]);
        cmd.arg(format!("{module}@{version}"));
        let output = self.aux.run(cmd, "go list -m").await?;
        if !output.status.success() {
            return Err(classify(command_failed("go list -m", &output)));
        }
        let parsed: ModuleJson = serde_json::from_slice(&output.stdout)
            .map_err(|e| FetchError::temporary(format!("decoding go list -m output: {e}")))?;
        if let Some(err) = parsed.error {
            return Err(FetchError::not_exist(format!(
                "{module}@{version}: {}",
                err.message()
            )));
        }
        if parsed.version.is_empty() {
            return Err(FetchError::not_exist(format!(
                "{module}@{version}: no version resolved"
            )));
        }
        Ok(parsed.version)
    }

    /// Fetch a module into the module cache (or reuse it), returning the
    /// cache directory holding its extracted source and the subprocess
    /// output for the build log.
    pub async fn ensure_module(
        &self,
        module: &str,
        version: &str,
    ) -> Result<(PathBuf, Vec<u8>), FetchError> {
        let mut cmd = self.command(&self.home);
        cmd.args(["mod", "download", "-json"]);
        cmd.arg(format!("{module}@{version}"));
        let output = self.aux.run(cmd, "go mod download").await?;

        // `go mod download -json` reports per-module errors in the JSON
        // even when exiting non-zero; prefer the structured message.
        match serde_json::from_slice::<ModuleJson>(&output.stdout) {
            Ok(parsed) => {
                if let Some(err) = parsed.error {
                    return Err(FetchError::not_exist(format!(
                        "{module}@{version}: {}",
                        err.message()
                    )));
                }
                if !output.status.success() || parsed.dir.is_empty() {
                    return Err(classify(command_failed("go mod download", &output)));
                }
                if parsed.path != module {
                    return Err(FetchError::not_exist(format!(
                        "proxy returned module {} for {module}",
                        parsed.path
                    )));
                }
                Ok((PathBuf::from(parsed.dir), output.stdout))
            }
            Err(_) if !output.status.success() => {
                Err(classify(command_failed("go mod download", &output)))
            }
            Err(e) => Err(FetchError::temporary(format!(
                "decoding go mod download output: {e}"
            ))),
        }
    }

    /// Subpaths (always `/`-prefixed, `/` for the module root) of the
    /// packages under `mod_dir` whose package name is `main`.
    pub async fn list_main_packages(&self, mod_dir: &Path) -> Result<Vec<String>, FetchError> {
        let mut cmd = self.command(mod_dir);
        cmd.args(["list", "-f", "{{.Name}} {{.Dir}}", "./..."]);
        let output = self.aux.run(cmd, "go list ./...").await?;
        if !output.status.success() {
            return Err(classify(command_failed("go list ./...", &output)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut mains = Vec::new();
        for line in stdout.lines() {
            let Some((name, dir)) = line.split_once(' ') else {
                continue;
            };
            if name != "main" {
                continue;
            }
            let sub = Path::new(dir)
                .strip_prefix(mod_dir)
                .map(|p| format!("/{}", p.display()))
                .unwrap_or_else(|_| "/".to_string());
            mains.push(if sub == "/." { "/".to_string() } else { sub });
        }
        Ok(mains)
    }

    /// The package name of the package in `pkg_dir`. A buildable target
    /// must report `main`.
    pub async fn package_kind(&self, pkg_dir: &Path) -> Result<String, FetchError> {
        let mut cmd = self.command(pkg_dir);
        cmd.args(["list", "-f", "{{.Name}}", "."]);
        let output = self.aux.run(cmd, "go list .").await?;
        if !output.status.success() {
            return Err(classify(command_failed("go list .", &output)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Non-stdlib dependencies of the package in `pkg_dir` that need cgo.
    /// Non-empty means the package is unbuildable here: native interop is
    /// disabled for reproducibility.
    pub async fn cgo_dependencies(&self, pkg_dir: &Path) -> Result<Vec<String>, FetchError> {
        let mut cmd = self.command(pkg_dir);
        cmd.args([
            "list",
            "-deps",
            "-f",
            "{{if and (not .Standard) .CgoFiles}}{{.ImportPath}}{{end}}",
            ".",
        ]);
        let output = self.aux.run(cmd, "go list -deps").await?;
        if !output.status.success() {
            return Err(classify(command_failed("go list -deps", &output)));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.trim().to_string())
            .collect())
    }
}

/// Map toolchain stderr to the error taxonomy: revision and module
/// resolution failures are absence, everything else stays as-is.
fn classify(err: FetchError) -> FetchError {
    let FetchError::Command { ref stderr, .. } = err else {
        return err;
    };
    const NOT_EXIST_MARKERS: &[&str] = &[
        "unknown revision",
        "no matching versions",
        "not a known dependency",
        "missing go.sum entry",
        "no required module provides package",
        "does not contain package",
        "404 Not Found",
        "410 Gone",
        "invalid version",
        "malformed module path",
    ];
    if NOT_EXIST_MARKERS.iter().any(|m| stderr.contains(m)) {
        FetchError::NotExist {
            reason: err.to_string(),
        }
    } else {
        err
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    /// Install a stub `go` binary that prints canned output per subcommand.
    fn stub_toolchain(dir: &Path, script_body: &str) -> Toolchain {
        let gobin = dir.join("go");
        std::fs::write(&gobin, format!("#!/bin/sh\n{script_body}\n")).unwrap();
        std::fs::set_permissions(&gobin, std::fs::Permissions::from_mode(0o755)).unwrap();
        Toolchain::new(
            gobin,
            dir.to_path_buf(),
            "https://proxy.invalid",
            Arc::new(AuxCommands::default()),
        )
    }

    #[tokio::test]
    async fn test_package_kind() {
        let tmp = tempfile::tempdir().unwrap();
        let tc = stub_toolchain(tmp.path(), "echo main");
        assert_eq!(tc.package_kind(tmp.path()).await.unwrap(), "main");
    }

    #[tokio::test]
    async fn test_list_main_packages() {
        let tmp = tempfile::tempdir().unwrap();
        let tc = stub_toolchain(
            tmp.path(),
            r#"printf 'main %s\nmain %s/cmd/x\nhelper %s/internal/y\n' "$PWD" "$PWD" "$PWD""#,
        );
        let mod_dir = tmp.path().canonicalize().unwrap();
        let mains = tc.list_main_packages(&mod_dir).await.unwrap();
        assert_eq!(mains, vec!["/".to_string(), "/cmd/x".to_string()]);
    }

    #[tokio::test]
    async fn test_resolve_module_version() {
        let tmp = tempfile::tempdir().unwrap();
        let tc = stub_toolchain(
            tmp.path(),
            r#"echo '{"Path":"example.com/m","Version":"v1.2.3"}'"#,
        );
        let v = tc
            .resolve_module_version("example.com/m", "v1.2")
            .await
            .unwrap();
        assert_eq!(v, "v1.2.3");
    }

    #[tokio::test]
    async fn test_ensure_module_error_is_not_exist() {
        let tmp = tempfile::tempdir().unwrap();
        let tc = stub_toolchain(
            tmp.path(),
            r#"echo '{"Path":"example.com/m","Version":"v9.9.9","Error":"unknown revision v9.9.9"}'; exit 1"#,
        );
        let err = tc
            .ensure_module("example.com/m", "v9.9.9")
            .await
            .unwrap_err();
        assert!(err.is_not_exist(), "got {err}");
    }

    #[tokio::test]
    async fn test_cgo_dependencies() {
        let tmp = tempfile::tempdir().unwrap();
        let tc = stub_toolchain(tmp.path(), "printf 'github.com/x/cgolib\n\n'");
        let deps = tc.cgo_dependencies(tmp.path()).await.unwrap();
        assert_eq!(deps, vec!["github.com/x/cgolib".to_string()]);
    }
}
