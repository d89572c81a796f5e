//! Detection of a file written into a shared directory by an uncooperative
//! writer, typically a browser finishing a download.
//!
//! There is no completion signal to wait on. A new entry counts as finished
//! once its size stays the same for a number of consecutive polls and every
//! other new entry is equally quiet. When several candidates qualify, the most
//! recently modified one wins, which skips a partial file the writer left
//! behind before producing the final one.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, info, warn};

use crate::artifact::{ArtifactRef, extension_of, with_extension_suffix};
use crate::cancel::CancellationToken;
use crate::error::WatchError;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_STABLE_POLLS: u32 = 2;

/// Held from the directory snapshot until the selected file has been moved
/// away, so two resolutions never claim the same arrival.
static DOWNLOAD_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStat {
    pub size: u64,
    pub modified: SystemTime,
}

/// Filesystem operations the watcher needs.
pub trait DirectoryProbe {
    fn list(&self, dir: &Path) -> io::Result<BTreeSet<OsString>>;

    /// Returns `Ok(None)` when the entry is gone or is not a regular file.
    fn stat(&self, path: &Path) -> io::Result<Option<EntryStat>>;

    /// Move `from` to `to`, creating missing parent directories of `to`.
    fn relocate(&self, from: &Path, to: &Path) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDirectory;

impl DirectoryProbe for LocalDirectory {
    fn list(&self, dir: &Path) -> io::Result<BTreeSet<OsString>> {
        let mut names = BTreeSet::new();
        for entry in fs::read_dir(dir)? {
            match entry {
                Ok(entry) => {
                    names.insert(entry.file_name());
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(names)
    }

    fn stat(&self, path: &Path) -> io::Result<Option<EntryStat>> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        if !metadata.is_file() {
            return Ok(None);
        }
        Ok(Some(EntryStat {
            size: metadata.len(),
            modified: metadata.modified()?,
        }))
    }

    fn relocate(&self, from: &Path, to: &Path) -> io::Result<()> {
        if let Some(parent) = to.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        match fs::rename(from, to) {
            Ok(()) => Ok(()),
            Err(rename_err) => {
                // Downloads commonly live on another filesystem than the output root.
                debug!(error = %rename_err, "Rename failed, copying instead");
                move_by_copy(from, to, |path| fs::remove_file(path))
            }
        }
    }
}

/// Copy `from` to `to`, then remove `from`. If the source cannot be removed
/// the copy is deleted again, so a failed move leaves only the original.
fn move_by_copy<R>(from: &Path, to: &Path, remove_source: R) -> io::Result<()>
where
    R: FnOnce(&Path) -> io::Result<()>,
{
    fs::copy(from, to)?;
    if let Err(err) = remove_source(from) {
        if let Err(cleanup_err) = fs::remove_file(to) {
            warn!(
                copy = %to.display(),
                error = %cleanup_err,
                "Failed to remove copy after an incomplete move"
            );
        }
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
    Idle,
    AwaitingFirstFile,
    Tracking,
    Stable,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySnapshot {
    pub name: OsString,
    pub size: u64,
    pub modified: SystemTime,
}

#[derive(Debug, Clone)]
struct Tracked {
    size: u64,
    modified: SystemTime,
    unchanged_polls: u32,
}

/// Per-candidate stability bookkeeping, fed one directory observation per poll.
#[derive(Debug)]
pub struct ArrivalTracker {
    before: BTreeSet<OsString>,
    stable_polls: u32,
    tracked: BTreeMap<OsString, Tracked>,
    phase: WatchPhase,
}

impl ArrivalTracker {
    /// `stable_polls` below 1 is raised to 1: a file is never taken on the
    /// poll that first sees it.
    pub fn new(before: BTreeSet<OsString>, stable_polls: u32) -> Self {
        Self {
            before,
            stable_polls: stable_polls.max(1),
            tracked: BTreeMap::new(),
            phase: WatchPhase::AwaitingFirstFile,
        }
    }

    pub fn phase(&self) -> WatchPhase {
        self.phase
    }

    pub fn is_candidate(&self, name: &OsString) -> bool {
        !self.before.contains(name)
    }

    /// Record one poll worth of present entries. Entries from the initial
    /// snapshot are ignored. Returns the selected entry once every present
    /// candidate is stable.
    pub fn observe<I>(&mut self, present: I) -> Option<EntrySnapshot>
    where
        I: IntoIterator<Item = EntrySnapshot>,
    {
        let present: BTreeMap<OsString, EntrySnapshot> = present
            .into_iter()
            .filter(|entry| self.is_candidate(&entry.name))
            .map(|entry| (entry.name.clone(), entry))
            .collect();

        self.tracked.retain(|name, _| {
            let keep = present.contains_key(name);
            if !keep {
                debug!(file = %name.to_string_lossy(), "Candidate vanished, dropping it");
            }
            keep
        });

        for (name, entry) in &present {
            match self.tracked.get_mut(name) {
                Some(tracked) => {
                    if tracked.size == entry.size {
                        tracked.unchanged_polls = tracked.unchanged_polls.saturating_add(1);
                    } else {
                        tracked.unchanged_polls = 0;
                        tracked.size = entry.size;
                    }
                    tracked.modified = entry.modified;
                }
                None => {
                    debug!(file = %name.to_string_lossy(), size = entry.size, "New candidate");
                    self.tracked.insert(
                        name.clone(),
                        Tracked {
                            size: entry.size,
                            modified: entry.modified,
                            unchanged_polls: 0,
                        },
                    );
                }
            }
        }

        if present.is_empty() {
            return None;
        }
        self.phase = WatchPhase::Tracking;

        let all_stable = self
            .tracked
            .values()
            .all(|tracked| tracked.unchanged_polls >= self.stable_polls);
        if !all_stable {
            return None;
        }

        let (name, tracked) = self.tracked.iter().max_by(|(a_name, a), (b_name, b)| {
            a.modified.cmp(&b.modified).then_with(|| a_name.cmp(b_name))
        })?;
        self.phase = WatchPhase::Stable;
        Some(EntrySnapshot {
            name: name.clone(),
            size: tracked.size,
            modified: tracked.modified,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WatchSettings {
    pub poll_interval: Duration,
    pub stable_polls: u32,
    /// `None` waits until the file shows up or the token is cancelled.
    pub max_wait: Option<Duration>,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            stable_polls: DEFAULT_STABLE_POLLS,
            max_wait: None,
        }
    }
}

/// A resolved download, already moved out of the watched directory.
#[derive(Debug, Clone)]
pub struct Download {
    pub artifact: ArtifactRef,
    pub source: PathBuf,
    pub polls: u64,
    pub waited: Duration,
}

pub struct DownloadWatcher<P: DirectoryProbe = LocalDirectory> {
    directory: PathBuf,
    settings: WatchSettings,
    probe: P,
    cancel: CancellationToken,
}

impl DownloadWatcher<LocalDirectory> {
    pub fn local(
        directory: impl Into<PathBuf>,
        settings: WatchSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self::new(directory, settings, LocalDirectory, cancel)
    }
}

impl<P: DirectoryProbe> DownloadWatcher<P> {
    pub fn new(
        directory: impl Into<PathBuf>,
        settings: WatchSettings,
        probe: P,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            directory: directory.into(),
            settings,
            probe,
            cancel,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Snapshot the directory, run `trigger`, then block until a new file has
    /// settled. The file is moved to `destination_stem` with its own extension
    /// appended.
    pub fn watch<F>(&self, trigger: F, destination_stem: &Path) -> Result<Download, WatchError>
    where
        F: FnOnce() -> io::Result<()>,
    {
        let _claim = DOWNLOAD_LOCK
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut phase = WatchPhase::Idle;

        let before = self.probe.list(&self.directory).map_err(|err| {
            WatchError::io(
                format!("failed to list {}", self.directory.display()),
                err,
            )
        })?;
        trigger().map_err(WatchError::Launch)?;

        let mut tracker = ArrivalTracker::new(before, self.settings.stable_polls);
        self.advance(&mut phase, tracker.phase());
        let started = Instant::now();
        let mut polls = 0u64;

        let selected = loop {
            if self.cancel.is_cancelled() {
                return Err(WatchError::Cancelled);
            }
            polls += 1;
            let snapshots = self.observe(&tracker)?;
            let selected = tracker.observe(snapshots);
            self.advance(&mut phase, tracker.phase());
            if let Some(entry) = selected {
                break entry;
            }

            if let Some(max_wait) = self.settings.max_wait {
                let waited = started.elapsed();
                if waited >= max_wait {
                    return Err(WatchError::TimedOut { waited });
                }
            }
            if self.cancel.sleep(self.settings.poll_interval) {
                return Err(WatchError::Cancelled);
            }
        };

        let source = self.directory.join(&selected.name);
        let extension = extension_of(&source);
        let destination = with_extension_suffix(destination_stem, &extension);
        self.probe.relocate(&source, &destination).map_err(|err| {
            WatchError::io(
                format!(
                    "failed to move {} to {}",
                    source.display(),
                    destination.display()
                ),
                err,
            )
        })?;
        self.advance(&mut phase, WatchPhase::Done);

        let waited = started.elapsed();
        info!(
            source = %source.display(),
            destination = %destination.display(),
            size = selected.size,
            polls,
            waited_ms = waited.as_millis() as u64,
            "Download settled"
        );

        Ok(Download {
            artifact: ArtifactRef::new(destination, extension),
            source,
            polls,
            waited,
        })
    }

    fn observe(&self, tracker: &ArrivalTracker) -> Result<Vec<EntrySnapshot>, WatchError> {
        let names = self.probe.list(&self.directory).map_err(|err| {
            WatchError::io(
                format!("failed to list {}", self.directory.display()),
                err,
            )
        })?;

        let mut snapshots = Vec::new();
        for name in names.into_iter().filter(|name| tracker.is_candidate(name)) {
            let path = self.directory.join(&name);
            match self.probe.stat(&path) {
                Ok(Some(stat)) => snapshots.push(EntrySnapshot {
                    name,
                    size: stat.size,
                    modified: stat.modified,
                }),
                Ok(None) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(WatchError::io(
                        format!("failed to stat {}", path.display()),
                        err,
                    ));
                }
            }
        }
        Ok(snapshots)
    }

    fn advance(&self, phase: &mut WatchPhase, next: WatchPhase) {
        let previous = *phase;
        if previous != next {
            debug!(
                from = ?previous,
                to = ?next,
                directory = %self.directory.display(),
                "Watch phase"
            );
            *phase = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn entry(name: &str, size: u64, modified: u64) -> EntrySnapshot {
        EntrySnapshot {
            name: name.into(),
            size,
            modified: at(modified),
        }
    }

    fn before(names: &[&str]) -> BTreeSet<OsString> {
        names.iter().map(OsString::from).collect()
    }

    #[test]
    fn waits_for_first_candidate() {
        let mut tracker = ArrivalTracker::new(before(&["a.txt"]), 2);
        for _ in 0..5 {
            assert_eq!(tracker.observe(vec![entry("a.txt", 3, 1)]), None);
        }
        assert_eq!(tracker.phase(), WatchPhase::AwaitingFirstFile);
    }

    #[test]
    fn selects_only_after_threshold_unchanged_polls() {
        let mut tracker = ArrivalTracker::new(BTreeSet::new(), 2);
        assert_eq!(tracker.observe(vec![entry("clip.mp4", 10, 1)]), None);
        assert_eq!(tracker.observe(vec![entry("clip.mp4", 25, 2)]), None);
        assert_eq!(tracker.observe(vec![entry("clip.mp4", 40, 3)]), None);
        // Final size seen for the first time above; two more quiet polls needed.
        assert_eq!(tracker.observe(vec![entry("clip.mp4", 40, 3)]), None);
        assert_eq!(tracker.phase(), WatchPhase::Tracking);
        let selected = tracker.observe(vec![entry("clip.mp4", 40, 3)]).unwrap();
        assert_eq!(selected.name, OsString::from("clip.mp4"));
        assert_eq!(selected.size, 40);
        assert_eq!(tracker.phase(), WatchPhase::Stable);
    }

    #[test]
    fn growth_resets_the_counter() {
        let mut tracker = ArrivalTracker::new(BTreeSet::new(), 2);
        tracker.observe(vec![entry("f.bin", 5, 1)]);
        tracker.observe(vec![entry("f.bin", 5, 1)]);
        assert_eq!(tracker.observe(vec![entry("f.bin", 6, 2)]), None);
        assert_eq!(tracker.observe(vec![entry("f.bin", 6, 2)]), None);
        assert!(tracker.observe(vec![entry("f.bin", 6, 2)]).is_some());
    }

    #[test]
    fn renamed_temp_file_is_replaced_by_final_file() {
        let mut tracker = ArrivalTracker::new(before(&["a.txt"]), 2);
        let existing = entry("a.txt", 1, 0);
        assert_eq!(
            tracker.observe(vec![existing.clone(), entry("b.tmp", 10, 5)]),
            None
        );
        assert_eq!(
            tracker.observe(vec![existing.clone(), entry("b.tmp", 10, 5)]),
            None
        );
        // Writer renames b.tmp to b.mp4.
        assert_eq!(
            tracker.observe(vec![existing.clone(), entry("b.mp4", 10, 5)]),
            None
        );
        assert_eq!(
            tracker.observe(vec![existing.clone(), entry("b.mp4", 10, 5)]),
            None
        );
        let selected = tracker
            .observe(vec![existing, entry("b.mp4", 10, 5)])
            .unwrap();
        assert_eq!(selected.name, OsString::from("b.mp4"));
    }

    #[test]
    fn most_recent_stable_candidate_wins() {
        let mut tracker = ArrivalTracker::new(BTreeSet::new(), 2);
        let listing = || vec![entry("video.part", 7, 10), entry("video.webm", 90, 12)];
        tracker.observe(listing());
        tracker.observe(listing());
        let selected = tracker.observe(listing()).unwrap();
        assert_eq!(selected.name, OsString::from("video.webm"));
    }

    #[test]
    fn unstable_sibling_blocks_selection() {
        let mut tracker = ArrivalTracker::new(BTreeSet::new(), 2);
        tracker.observe(vec![entry("a.part", 7, 10), entry("b.mkv", 1, 11)]);
        tracker.observe(vec![entry("a.part", 7, 10), entry("b.mkv", 2, 12)]);
        assert_eq!(
            tracker.observe(vec![entry("a.part", 7, 10), entry("b.mkv", 3, 13)]),
            None
        );
    }

    #[test]
    fn failed_source_removal_rolls_back_the_copy() {
        let temp = tempfile::tempdir().unwrap();
        let from = temp.path().join("clip.mp4");
        let to = temp.path().join("out.mp4");
        fs::write(&from, b"clip").unwrap();

        let err = move_by_copy(&from, &to, |_| {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"))
        })
        .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert!(from.is_file());
        assert!(!to.exists());

        move_by_copy(&from, &to, |path| fs::remove_file(path)).unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read(&to).unwrap(), b"clip");
    }

    #[test]
    fn zero_threshold_still_needs_one_quiet_poll() {
        let mut tracker = ArrivalTracker::new(BTreeSet::new(), 0);
        assert!(tracker.observe(Vec::new()).is_none());
        assert!(tracker.observe(vec![entry("x.mp4", 1, 1)]).is_none());
        assert!(tracker.observe(vec![entry("x.mp4", 1, 1)]).is_some());
    }

    #[test]
    fn empty_poll_after_arrival_does_not_complete() {
        let mut tracker = ArrivalTracker::new(BTreeSet::new(), 1);
        tracker.observe(vec![entry("x.tmp", 1, 1)]);
        assert!(tracker.observe(Vec::new()).is_none());
        assert_eq!(tracker.phase(), WatchPhase::Tracking);
    }
}
