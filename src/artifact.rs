use std::path::{Path, PathBuf};

use serde::Serialize;

/// A materialized file produced by an input resolution or a step, together
/// with the extension it carries forward.
///
/// The extension is tracked separately from the path because tools further
/// down the chain write to paths they are handed and never report a format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactRef {
    pub output_path: PathBuf,
    /// Includes the leading dot, or is empty when the file has no extension.
    pub extension: String,
}

impl ArtifactRef {
    pub fn new(output_path: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            output_path: output_path.into(),
            extension: extension.into(),
        }
    }

    /// Build a reference for an existing file, taking the extension from its name.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let output_path = path.into();
        let extension = extension_of(&output_path);
        Self {
            output_path,
            extension,
        }
    }
}

pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

/// Append `extension` to the final component of `stem` without replacing
/// anything already after a dot.
pub fn with_extension_suffix(stem: &Path, extension: &str) -> PathBuf {
    let mut raw = stem.as_os_str().to_os_string();
    raw.push(extension);
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_keeps_leading_dot() {
        assert_eq!(extension_of(Path::new("/tmp/b.mp4")), ".mp4");
        assert_eq!(extension_of(Path::new("/tmp/archive.tar.gz")), ".gz");
        assert_eq!(extension_of(Path::new("/tmp/README")), "");
    }

    #[test]
    fn suffix_does_not_replace_dotted_stem() {
        let path = with_extension_suffix(Path::new("out/show.s01/step_0_trim"), ".mkv");
        assert_eq!(path, PathBuf::from("out/show.s01/step_0_trim.mkv"));
        let bare = with_extension_suffix(Path::new("out/a/manual_download"), "");
        assert_eq!(bare, PathBuf::from("out/a/manual_download"));
    }
}
