use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a file's contents.
pub fn compute_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Failed to read file for hashing: {}", path.display()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Sidecar location used when no explicit digest path is given: `<file>.sha256`.
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(".sha256");
    PathBuf::from(raw)
}

/// Write `<digest>  <file name>` in `sha256sum` format and return the digest.
pub fn write_sha256(path: &Path, output: &Path) -> Result<String> {
    let digest = compute_sha256(path)?;
    if let Some(parent) = output.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create digest directory: {}", parent.display()))?;
    }
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    fs::write(output, format!("{digest}  {name}\n"))
        .with_context(|| format!("Failed to write digest file: {}", output.display()))?;
    Ok(digest)
}

/// Check a file against a digest previously written by [`write_sha256`].
pub fn verify_sha256(path: &Path, digest_file: &Path) -> Result<()> {
    let recorded = fs::read_to_string(digest_file)
        .with_context(|| format!("Failed to read digest file: {}", digest_file.display()))?;
    let Some(expected) = recorded.split_whitespace().next() else {
        bail!("Digest file is empty: {}", digest_file.display());
    };
    let actual = compute_sha256(path)?;
    if !actual.eq_ignore_ascii_case(expected) {
        bail!(
            "Digest mismatch for {}: expected {}, found {}",
            path.display(),
            expected,
            actual
        );
    }
    Ok(())
}
