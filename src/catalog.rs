use std::path::PathBuf;

use glob::glob;
use tracing::debug;

use crate::config::CatalogSettings;
use crate::error::CatalogError;

/// Resolves a show/season/episode triple to a file on disk.
pub trait CatalogResolver {
    fn resolve(&self, show: &str, season: u32, episode: u32) -> Result<PathBuf, CatalogError>;
}

/// Looks episodes up in a media library directory using a file-name pattern.
///
/// Pattern placeholders: `{show}`, `{season}`, `{season:02}`, `{episode}`,
/// `{episode:02}`. The rest of the pattern is a glob.
#[derive(Debug, Clone)]
pub struct GlobCatalog {
    settings: CatalogSettings,
}

impl GlobCatalog {
    pub fn new(settings: CatalogSettings) -> Self {
        Self { settings }
    }

    pub fn expand_pattern(&self, show: &str, season: u32, episode: u32) -> String {
        let pattern = self
            .settings
            .pattern
            .replace("{show}", &glob::Pattern::escape(show))
            .replace("{season:02}", &format!("{season:02}"))
            .replace("{season}", &season.to_string())
            .replace("{episode:02}", &format!("{episode:02}"))
            .replace("{episode}", &episode.to_string());
        let library = glob::Pattern::escape(&self.settings.library.to_string_lossy());
        format!("{}/{}", library.trim_end_matches('/'), pattern)
    }
}

impl CatalogResolver for GlobCatalog {
    fn resolve(&self, show: &str, season: u32, episode: u32) -> Result<PathBuf, CatalogError> {
        let pattern = self.expand_pattern(show, season, episode);
        let matches = glob(&pattern).map_err(|source| CatalogError::Pattern {
            pattern: pattern.clone(),
            source,
        })?;
        let mut files: Vec<PathBuf> = matches
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .collect();
        files.sort();
        debug!(pattern = %pattern, matches = files.len(), "Catalog lookup");
        files
            .into_iter()
            .next()
            .ok_or(CatalogError::NotFound { pattern })
    }
}

/// Resolver used when the configuration has no catalog section.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCatalog;

impl CatalogResolver for NoCatalog {
    fn resolve(&self, _show: &str, _season: u32, _episode: u32) -> Result<PathBuf, CatalogError> {
        Err(CatalogError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn catalog(library: PathBuf) -> GlobCatalog {
        GlobCatalog::new(CatalogSettings {
            library,
            pattern: "{show}/Season {season:02}/*S{season:02}E{episode:02}*".into(),
        })
    }

    #[test]
    fn expands_zero_padded_placeholders() {
        let catalog = catalog(PathBuf::from("/lib"));
        let pattern = catalog.expand_pattern("Nightwatch", 2, 7);
        assert!(pattern.ends_with("Nightwatch/Season 02/*S02E07*"));
    }

    #[test]
    fn resolves_first_matching_file() {
        let temp = tempdir().unwrap();
        let season = temp.path().join("Nightwatch").join("Season 02");
        fs::create_dir_all(&season).unwrap();
        fs::write(season.join("Nightwatch.S02E07.1080p.mkv"), b"x").unwrap();
        fs::write(season.join("Nightwatch.S02E08.1080p.mkv"), b"x").unwrap();

        let resolved = catalog(temp.path().to_path_buf())
            .resolve("Nightwatch", 2, 7)
            .unwrap();
        assert_eq!(
            resolved.file_name().unwrap().to_string_lossy(),
            "Nightwatch.S02E07.1080p.mkv"
        );
    }

    #[test]
    fn missing_episode_is_not_found() {
        let temp = tempdir().unwrap();
        let err = catalog(temp.path().to_path_buf())
            .resolve("Nightwatch", 9, 1)
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFound { .. }));
    }
}
