use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use std::process::Command;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

const USER_AGENT: &str = concat!("quarry/", env!("CARGO_PKG_VERSION"));
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const DOWNLOAD_ATTEMPTS: usize = 3;

/// How the caller means to use a retrieved file. Anything but `In` must get
/// a copy it can modify without touching the source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    #[default]
    In,
    Out,
    InOut,
}

impl Intent {
    pub fn may_share(self) -> bool {
        self == Intent::In
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Intent::In => "in",
            Intent::Out => "out",
            Intent::InOut => "inout",
        })
    }
}

impl FromStr for Intent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "in" => Ok(Intent::In),
            "out" => Ok(Intent::Out),
            "inout" => Ok(Intent::InOut),
            other => Err(format!("unknown intent '{other}' (expected in, out or inout)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpawnOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl SpawnOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Byte-moving collaborator the stores call out to.
pub trait Transport: fmt::Debug + Send + Sync {
    /// Materialises `src` at `dst`, replacing anything already there.
    fn copy(&self, src: &Path, dst: &Path, intent: Intent) -> Result<()>;
    fn spawn(&self, program: &str, args: &[String]) -> Result<SpawnOutput>;
    fn exists(&self, path: &Path) -> bool;
    fn size(&self, path: &Path) -> Result<u64>;
    /// Lowercase hex sha256 of the file.
    fn hash(&self, path: &Path) -> Result<String>;
    /// Downloads `url` into `dst`; `None` when the server has no such file.
    fn fetch(&self, url: &str, dst: &Path) -> Result<Option<u64>>;
}

#[derive(Debug, Default)]
pub struct SystemTransport;

impl SystemTransport {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Transport for SystemTransport {
    fn copy(&self, src: &Path, dst: &Path, intent: Intent) -> Result<()> {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        if dst.exists() {
            fs::remove_file(dst).with_context(|| format!("failed to replace {}", dst.display()))?;
        }
        if intent.may_share() {
            match fs::hard_link(src, dst) {
                Ok(()) => {
                    debug!(src = %src.display(), dst = %dst.display(), "hardlinked");
                    return Ok(());
                }
                Err(err) => {
                    debug!(src = %src.display(), %err, "hardlink refused, copying");
                }
            }
        }
        fs::copy(src, dst)
            .with_context(|| format!("failed to copy {} to {}", src.display(), dst.display()))?;
        if !intent.may_share() {
            let mut perms = fs::metadata(dst)?.permissions();
            #[allow(clippy::permissions_set_readonly_false)]
            perms.set_readonly(false);
            fs::set_permissions(dst, perms)?;
        }
        Ok(())
    }

    fn spawn(&self, program: &str, args: &[String]) -> Result<SpawnOutput> {
        debug!(program, ?args, "spawning");
        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("failed to start {program}"))?;
        Ok(SpawnOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn size(&self, path: &Path) -> Result<u64> {
        Ok(fs::metadata(path)
            .with_context(|| format!("failed to stat {}", path.display()))?
            .len())
    }

    fn hash(&self, path: &Path) -> Result<String> {
        compute_sha256(path)
    }

    fn fetch(&self, url: &str, dst: &Path) -> Result<Option<u64>> {
        download_with_retry(url, dst)
    }
}

pub(crate) fn compute_sha256(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 32 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn download_with_retry(url: &str, dst: &Path) -> Result<Option<u64>> {
    let mut last_err = None;
    for attempt in 1..=DOWNLOAD_ATTEMPTS {
        match download_once(url, dst) {
            Ok(result) => return Ok(result),
            Err(err) => {
                debug!(url, attempt, %err, "download attempt failed");
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow!("failed to download {url}; no attempts left")))
}

fn download_once(url: &str, dst: &Path) -> Result<Option<u64>> {
    let client = http_client()?;
    let mut response = client
        .get(url)
        .send()
        .with_context(|| format!("failed to fetch {url}"))?;
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !response.status().is_success() {
        bail!("unexpected response {} for {url}", response.status());
    }
    let mut file =
        File::create(dst).with_context(|| format!("failed to create {}", dst.display()))?;
    let written = io::copy(&mut response, &mut file)
        .with_context(|| format!("stream error for {url}"))?;
    file.sync_all()?;
    Ok(Some(written))
}

fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("failed to build http client")
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::{matchers::*, responders::*, Expectation, Server};
    use std::panic;
    use tempfile::tempdir;

    #[test]
    fn intent_parses_and_prints() {
        assert_eq!("InOut".parse::<Intent>(), Ok(Intent::InOut));
        assert_eq!(Intent::Out.to_string(), "out");
        assert!("sideways".parse::<Intent>().is_err());
    }

    #[test]
    fn copy_links_only_for_read_intent() -> Result<()> {
        let temp = tempdir()?;
        let src = temp.path().join("src.grb");
        fs::write(&src, b"payload")?;
        let transport = SystemTransport::new();

        let shared = temp.path().join("shared/out.grb");
        transport.copy(&src, &shared, Intent::In)?;
        let private = temp.path().join("private/out.grb");
        transport.copy(&src, &private, Intent::InOut)?;
        fs::write(&private, b"changed")?;

        assert_eq!(fs::read(&src)?, b"payload");
        assert_eq!(fs::read(&shared)?, b"payload");
        assert_eq!(transport.size(&private)?, 7);
        assert_eq!(transport.hash(&src)?, transport.hash(&shared)?);
        Ok(())
    }

    #[test]
    fn fetch_distinguishes_missing_from_present() -> Result<()> {
        let server = match panic::catch_unwind(Server::run) {
            Ok(server) => server,
            Err(_) => {
                eprintln!("skipping fetch test (httptest server unavailable)");
                return Ok(());
            }
        };
        server.expect(
            Expectation::matching(request::method_path("GET", "/data/grid.grb"))
                .respond_with(status_code(200).body("gridded")),
        );
        server.expect(
            Expectation::matching(request::method_path("GET", "/data/none.grb"))
                .respond_with(status_code(404)),
        );
        let temp = tempdir()?;
        let dst = temp.path().join("grid.grb");
        let transport = SystemTransport::new();
        let fetched = transport.fetch(&server.url_str("/data/grid.grb"), &dst)?;
        assert_eq!(fetched, Some(7));
        assert_eq!(fs::read(&dst)?, b"gridded");
        let missing = transport.fetch(&server.url_str("/data/none.grb"), &dst)?;
        assert_eq!(missing, None);
        Ok(())
    }
}
