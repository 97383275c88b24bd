use std::fs;
use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use formula_model::Workbook;
use formula_qr::fsutil::atomic_write_bytes;

pub fn read_workbook(path: &Path) -> Result<Workbook> {
    let bytes = fs::read(path).with_context(|| format!("read workbook {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse workbook {}", path.display()))
}

pub fn write_workbook(path: &Path, workbook: &Workbook) -> Result<()> {
    let json = serde_json::to_vec_pretty(workbook).context("serialize workbook")?;
    write_atomic(path, &json)
}

pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    atomic_write_bytes(path, bytes).with_context(|| format!("write {}", path.display()))
}

/// Write to stdout, treating a closed pipe as success.
pub fn write_stdout(bytes: &[u8]) -> Result<()> {
    let mut stdout = io::stdout().lock();
    match stdout.write_all(bytes).and_then(|()| stdout.flush()) {
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other.context("write stdout"),
    }
}
