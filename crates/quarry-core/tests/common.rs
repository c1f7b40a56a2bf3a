#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use quarry_core::{Config, Intent, Session, SpawnOutput, SystemTransport, Transport};
use quarry_domain::{bag, Bag, Value};

pub fn session(root: &Path) -> Session {
    Session::with_builtins(Config::for_root(root))
}

/// Artifact bag served by the experiment provider, stored locally under
/// `work`.
pub fn artifact(work: &Path) -> Bag {
    bag([
        ("kind", Value::str("analysis")),
        ("model", Value::str("arpege")),
        ("date", Value::str("2024010100")),
        ("cutoff", Value::str("production")),
        ("experiment", Value::str("oper")),
        ("block", Value::str("forecast")),
        (
            "filename",
            Value::str(format!("{}/[kind].[model].grib", work.display())),
        ),
    ])
}

pub fn entry_path(root: &Path, tier: &str, relative: &str) -> PathBuf {
    root.join(tier).join(relative)
}

pub fn write_file(path: &Path, contents: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("parent dirs");
    }
    fs::write(path, contents).expect("write file");
}

/// Counts every copy, delegating the work to the system transport.
#[derive(Debug, Default)]
pub struct CountingTransport {
    inner: SystemTransport,
    copies: AtomicUsize,
}

impl CountingTransport {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn copies(&self) -> usize {
        self.copies.load(Ordering::SeqCst)
    }
}

impl Transport for CountingTransport {
    fn copy(&self, src: &Path, dst: &Path, intent: Intent) -> Result<()> {
        self.copies.fetch_add(1, Ordering::SeqCst);
        self.inner.copy(src, dst, intent)
    }

    fn spawn(&self, program: &str, args: &[String]) -> Result<SpawnOutput> {
        self.inner.spawn(program, args)
    }

    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }

    fn size(&self, path: &Path) -> Result<u64> {
        self.inner.size(path)
    }

    fn hash(&self, path: &Path) -> Result<String> {
        self.inner.hash(path)
    }

    fn fetch(&self, url: &str, dst: &Path) -> Result<Option<u64>> {
        self.inner.fetch(url, dst)
    }
}

/// Writes only the first half of every copied file.
#[derive(Debug, Default)]
pub struct TruncatingTransport {
    inner: SystemTransport,
}

impl Transport for TruncatingTransport {
    fn copy(&self, src: &Path, dst: &Path, _intent: Intent) -> Result<()> {
        let bytes = fs::read(src)?;
        fs::write(dst, &bytes[..bytes.len() / 2])?;
        Ok(())
    }

    fn spawn(&self, program: &str, args: &[String]) -> Result<SpawnOutput> {
        self.inner.spawn(program, args)
    }

    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }

    fn size(&self, path: &Path) -> Result<u64> {
        self.inner.size(path)
    }

    fn hash(&self, path: &Path) -> Result<String> {
        self.inner.hash(path)
    }

    fn fetch(&self, url: &str, dst: &Path) -> Result<Option<u64>> {
        self.inner.fetch(url, dst)
    }
}
