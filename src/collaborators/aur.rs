// src/collaborators/aur.rs

//! AUR-backed source archive
//!
//! Metadata comes from the RPC v5 `info` endpoint, recipes from the
//! per-package git repositories, and the full package list from the
//! gzipped `packages.gz` index.

use super::command::{describe, run_inherited};
use super::{FetchOutcome, SourceArchive, SourcePackage};
use crate::config::Config;
use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for RPC requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum retry attempts for failed requests
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

/// Names per info request; keeps the query string under server limits
const RPC_CHUNK_SIZE: usize = 150;

/// RPC response envelope
#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    results: Vec<RpcPackage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RpcPackage {
    name: String,
    package_base: String,
    version: String,
    #[serde(default)]
    depends: Vec<String>,
    #[serde(default)]
    make_depends: Vec<String>,
    #[serde(default)]
    check_depends: Vec<String>,
    #[serde(default)]
    provides: Vec<String>,
}

impl From<RpcPackage> for SourcePackage {
    fn from(pkg: RpcPackage) -> Self {
        Self {
            name: pkg.name,
            package_base: pkg.package_base,
            version: pkg.version,
            depends: pkg.depends,
            make_depends: pkg.make_depends,
            check_depends: pkg.check_depends,
            provides: pkg.provides,
        }
    }
}

pub struct AurArchive {
    client: Client,
    base_url: String,
    git_bin: String,
    cache: Mutex<HashMap<String, Option<SourcePackage>>>,
}

impl AurArchive {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("aurum/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Http(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.aur_base().to_string(),
            git_bin: config.git_bin.clone(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// RPC info URL with every name form-encoded as an `arg[]` parameter
    fn info_url(&self, names: &[String]) -> Result<Url> {
        let params = [("v", "5"), ("type", "info")]
            .into_iter()
            .chain(names.iter().map(|name| ("arg[]", name.as_str())));
        Url::parse_with_params(&format!("{}/rpc/", self.base_url), params)
            .map_err(|e| Error::Http(format!("invalid archive URL {}: {e}", self.base_url)))
    }

    /// GET with retries on transport errors; HTTP error statuses fail immediately
    fn get(&self, url: &str) -> Result<reqwest::blocking::Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(url).send() {
                Ok(response) => {
                    if !response.status().is_success() {
                        return Err(Error::Http(format!("HTTP {} from {}", response.status(), url)));
                    }
                    return Ok(response);
                }
                Err(e) => {
                    if attempt >= MAX_RETRIES {
                        return Err(Error::Http(format!(
                            "request failed after {attempt} attempts: {e}"
                        )));
                    }
                    warn!("Request to {} failed (attempt {}): {}", url, attempt, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
                }
            }
        }
    }

    fn query_info(&self, names: &[String]) -> Result<Vec<SourcePackage>> {
        let url = self.info_url(names)?;
        let response: RpcResponse = self
            .get(url.as_str())?
            .json()
            .map_err(|e| Error::Http(format!("failed to parse RPC response: {e}")))?;
        parse_rpc(response)
    }
}

fn parse_rpc(response: RpcResponse) -> Result<Vec<SourcePackage>> {
    if response.kind == "error" {
        return Err(Error::Http(
            response.error.unwrap_or_else(|| "unknown RPC error".to_string()),
        ));
    }
    Ok(response.results.into_iter().map(SourcePackage::from).collect())
}

/// Names from a packages.gz body, skipping the comment header
fn parse_package_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

impl SourceArchive for AurArchive {
    fn resolve(&self, name: &str) -> Result<Option<SourcePackage>> {
        let found = self.resolve_many(&[name.to_string()])?;
        Ok(found.into_iter().find(|p| p.name == name))
    }

    fn resolve_many(&self, names: &[String]) -> Result<Vec<SourcePackage>> {
        let mut found = Vec::new();
        let mut missing = Vec::new();

        if let Ok(cache) = self.cache.lock() {
            for name in names {
                match cache.get(name) {
                    Some(Some(pkg)) => found.push(pkg.clone()),
                    Some(None) => {}
                    None => missing.push(name.clone()),
                }
            }
        } else {
            missing.extend(names.iter().cloned());
        }

        for chunk in missing.chunks(RPC_CHUNK_SIZE) {
            debug!("Querying archive for {} package(s)", chunk.len());
            let results = self.query_info(chunk)?;

            if let Ok(mut cache) = self.cache.lock() {
                for name in chunk {
                    let hit = results.iter().find(|p| &p.name == name).cloned();
                    cache.insert(name.clone(), hit);
                }
            }
            found.extend(results);
        }

        Ok(found)
    }

    fn fetch_or_update(&self, package_base: &str, dest: &Path) -> Result<FetchOutcome> {
        if dest.join(".git").is_dir() {
            let mut cmd = Command::new(&self.git_bin);
            cmd.arg("-C").arg(dest).args(["pull", "--ff-only", "-q"]);
            run_inherited(&mut cmd).map_err(|e| Error::FetchFailed {
                package: package_base.to_string(),
                message: e.to_string(),
            })?;
            debug!("Updated {} in {}", package_base, dest.display());
            return Ok(FetchOutcome::Updated);
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let url = format!("{}/{}.git", self.base_url, package_base);
        let mut cmd = Command::new(&self.git_bin);
        cmd.args(["clone", "-q", "--", &url]).arg(dest);
        info!("Cloning {}", package_base);
        run_inherited(&mut cmd).map_err(|e| Error::FetchFailed {
            package: package_base.to_string(),
            message: format!("{}: {}", describe(&cmd), e),
        })?;
        Ok(FetchOutcome::Cloned)
    }

    fn package_names(&self) -> Result<Vec<String>> {
        let url = format!("{}/packages.gz", self.base_url);
        let response = self.get(&url)?;
        let bytes = response.bytes()?;

        // reqwest transparently decodes gzip only with the gzip feature, which
        // is off, so the body is still compressed here
        let mut decoder = GzDecoder::new(&bytes[..]);
        let mut content = String::new();
        decoder.read_to_string(&mut content)?;

        let names = parse_package_list(&content);
        debug!("Archive lists {} packages", names.len());
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    #[test]
    fn test_parse_rpc_results() {
        let json = r#"{
            "version": 5,
            "type": "multiinfo",
            "resultcount": 1,
            "results": [{
                "Name": "yay",
                "PackageBase": "yay",
                "Version": "12.3.5-1",
                "Depends": ["pacman>6.1", "git"],
                "MakeDepends": ["go>=1.21"]
            }]
        }"#;

        let response: RpcResponse = serde_json::from_str(json).unwrap();
        let pkgs = parse_rpc(response).unwrap();
        assert_eq!(pkgs.len(), 1);
        assert_eq!(pkgs[0].package_base, "yay");
        assert_eq!(pkgs[0].depends, vec!["pacman>6.1", "git"]);
        assert_eq!(pkgs[0].make_depends, vec!["go>=1.21"]);
        assert!(pkgs[0].check_depends.is_empty());
    }

    #[test]
    fn test_parse_rpc_error() {
        let json = r#"{"version":5,"type":"error","resultcount":0,"results":[],"error":"Too many package results."}"#;
        let response: RpcResponse = serde_json::from_str(json).unwrap();
        let err = parse_rpc(response).unwrap_err();
        assert!(err.to_string().contains("Too many"));
    }

    #[test]
    fn test_parse_gzipped_package_list() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(b"# AUR package list, generated on Fri, 16 Oct 2026\nyay\nparu\n\n")
            .unwrap();
        let compressed = encoder.finish().unwrap();

        let mut content = String::new();
        GzDecoder::new(&compressed[..])
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(parse_package_list(&content), vec!["yay", "paru"]);
    }

    #[test]
    fn test_info_url() {
        let archive = AurArchive::new(&Config {
            aur_url: "https://aur.example.org/".to_string(),
            ..Config::default()
        })
        .unwrap();
        let url = archive
            .info_url(&["a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://aur.example.org/rpc/?v=5&type=info&arg%5B%5D=a&arg%5B%5D=b"
        );
    }

    #[test]
    fn test_info_url_encodes_reserved_characters() {
        let archive = AurArchive::new(&Config {
            aur_url: "https://aur.example.org".to_string(),
            ..Config::default()
        })
        .unwrap();
        let names: Vec<String> = ["libc++", "a#b", "x%y", "q?r", "s/t", "u v"]
            .iter()
            .map(|n| n.to_string())
            .collect();
        let url = archive.info_url(&names).unwrap();

        assert!(url.fragment().is_none());
        let args: Vec<String> = url
            .query_pairs()
            .filter(|(k, _)| k == "arg[]")
            .map(|(_, v)| v.into_owned())
            .collect();
        assert_eq!(args, names);
        assert!(url.as_str().contains("arg%5B%5D=a%23b"));
        assert!(url.as_str().contains("arg%5B%5D=libc%2B%2B"));
    }
}
