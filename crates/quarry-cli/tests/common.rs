#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::assert::Assert;
use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use serde_json::Value;

pub fn parse_json(assert: &Assert) -> Value {
    serde_json::from_slice(&assert.get_output().stdout).expect("valid json")
}

/// `quarry` with cache and archive rooted under `root`.
pub fn quarry(root: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("quarry");
    cmd.env("QUARRY_CACHE_PATH", root.join("cache"))
        .env("QUARRY_ARCHIVE_PATH", root.join("archive"))
        .env_remove("QUARRY_ARCHIVE_GET")
        .env_remove("QUARRY_ARCHIVE_PUT")
        .env_remove("QUARRY_AMBIGUOUS")
        .env_remove("QUARRY_FALLTHROUGH")
        .env("NO_COLOR", "1");
    cmd
}

pub fn artifact_args(local: &Path) -> Vec<String> {
    [
        "kind=analysis",
        "model=arpege",
        "date=2024010100",
        "cutoff=p",
        "experiment=oper",
        "block=forecast",
    ]
    .iter()
    .flat_map(|pair| ["-a".to_string(), (*pair).to_string()])
    .chain(["-a".to_string(), format!("filename={}", local.display())])
    .collect()
}

pub fn archived(root: &Path, relative: &str, contents: &[u8]) -> PathBuf {
    let path = root.join("archive").join(relative);
    fs::create_dir_all(path.parent().expect("parent")).expect("dirs");
    fs::write(&path, contents).expect("write archive entry");
    path
}
