use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where a pipeline's first artifact comes from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputSource {
    /// A file that already exists on disk.
    LocalPath { path: PathBuf },
    /// A link opened in the host browser; the browser writes the file into
    /// the watched downloads directory on its own schedule.
    ManualDownload { link: String },
    /// A show/season/episode triple resolved against the configured catalog.
    CataloguedEpisode { show: String, season: u32, episode: u32 },
}

impl InputSource {
    pub const TAGS: &'static [&'static str] =
        &["local_path", "manual_download", "catalogued_episode"];

    /// Stable tag used in output file names and reports.
    pub fn tag(&self) -> &'static str {
        match self {
            InputSource::LocalPath { .. } => "local_path",
            InputSource::ManualDownload { .. } => "manual_download",
            InputSource::CataloguedEpisode { .. } => "catalogued_episode",
        }
    }
}
