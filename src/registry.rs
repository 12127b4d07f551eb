use crate::config::RecordingConfig;
use crate::error::{LiveDetectError, Result};
use crate::recorder::SessionMetadata;
use crate::session::{SessionId, SessionPaths, SessionStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One browsable session, rebuilt from the files on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub video_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
    pub metadata: Option<SessionMetadata>,
}

impl RegistryEntry {
    /// Terminal status from the sidecar; `None` for sessions recorded without one
    pub fn status(&self) -> Option<SessionStatus> {
        self.metadata.as_ref().map(|m| m.status)
    }

    pub fn is_failed(&self) -> bool {
        self.status() == Some(SessionStatus::Failed)
    }
}

/// Directory layout under the recordings root
#[derive(Debug, Clone)]
pub struct RecordingLayout {
    pub videos: PathBuf,
    pub logs: PathBuf,
    pub metadata: PathBuf,
}

impl RecordingLayout {
    pub fn from_config(config: &RecordingConfig) -> Self {
        Self {
            videos: config.root.join(&config.videos_dir),
            logs: config.root.join(&config.logs_dir),
            metadata: config.root.join(&config.metadata_dir),
        }
    }

    pub fn paths_for(&self, id: &SessionId, video_extension: &str) -> SessionPaths {
        SessionPaths {
            video: self.videos.join(format!("{}.{}", id, video_extension)),
            log: self.logs.join(format!("{}.txt", id)),
            metadata: self.metadata.join(format!("{}.json", id)),
        }
    }

    fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.videos, &self.logs, &self.metadata] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct RegistryState {
    /// Ids handed to in-flight sessions; hidden from listing and protected from delete
    reserved: HashSet<SessionId>,
}

/// Filesystem-backed listing of recorded sessions.
///
/// Nothing is cached: every read rescans the recordings root. Mutations
/// (reserve, publish, release, delete) are serialized by one mutex.
///
/// A reservation is also written to disk as `<metadata>/<id>.lock` holding the
/// owner's pid, so a second registry on the same root (another process, or the
/// CLI `delete` subcommand) treats the session as in use. Locks whose process
/// is gone are ignored.
pub struct SessionRegistry {
    layout: RecordingLayout,
    video_extension: String,
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    pub fn new(layout: RecordingLayout, video_extension: impl Into<String>) -> Result<Self> {
        layout.ensure_dirs()?;
        Ok(Self {
            layout,
            video_extension: video_extension.into(),
            state: Mutex::new(RegistryState::default()),
        })
    }

    pub fn layout(&self) -> &RecordingLayout {
        &self.layout
    }

    pub fn video_extension(&self) -> &str {
        &self.video_extension
    }

    /// Claim `id` (or the first free `<id>_<n>`) and its paths for a new session
    pub fn reserve(&self, id: SessionId) -> Result<(SessionId, SessionPaths)> {
        let mut state = self.state.lock();
        let mut candidate = id.clone();
        let mut n = 1;
        loop {
            let paths = self.layout.paths_for(&candidate, &self.video_extension);
            let taken = self.is_reserved(&state, &candidate)
                || paths.video.exists()
                || paths.log.exists()
                || paths.metadata.exists();
            if !taken && self.acquire_lock(&candidate)? {
                debug!("Reserved session paths for {}", candidate);
                state.reserved.insert(candidate.clone());
                return Ok((candidate, paths));
            }
            candidate = id.with_suffix(n);
            n += 1;
        }
    }

    /// Drop a reservation whose session never started
    pub fn release(&self, id: &SessionId) {
        let mut state = self.state.lock();
        if state.reserved.remove(id) {
            self.remove_lock(id);
            debug!("Released reservation for {}", id);
        }
    }

    /// Make a finished session visible: write its sidecar and drop the reservation
    pub fn publish(&self, metadata: &SessionMetadata) -> Result<()> {
        let mut state = self.state.lock();
        let paths = self.layout.paths_for(&metadata.id, &self.video_extension);
        let saved = metadata.save(&paths.metadata);
        if state.reserved.remove(&metadata.id) {
            self.remove_lock(&metadata.id);
        }
        saved?;
        info!(
            "Published session {} ({:?}, {} frames)",
            metadata.id, metadata.status, metadata.frames_recorded
        );
        Ok(())
    }

    /// All finished sessions, most recent first
    pub fn list(&self) -> Result<Vec<RegistryEntry>> {
        let state = self.state.lock();
        let mut found: BTreeMap<SessionId, PartialEntry> = BTreeMap::new();

        for (path, id) in scan(&self.layout.logs, Some("txt"))? {
            found.entry(id).or_default().log_path = Some(path);
        }
        for (path, id) in scan(&self.layout.videos, None)? {
            found.entry(id).or_default().video_path = Some(path);
        }

        let mut entries: Vec<RegistryEntry> = found
            .into_iter()
            .filter(|(id, _)| !self.is_reserved(&state, id))
            .map(|(id, partial)| self.complete(id, partial))
            .collect();
        drop(state);

        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(entries)
    }

    pub fn get(&self, id: &SessionId) -> Result<RegistryEntry> {
        let state = self.state.lock();
        if self.is_reserved(&state, id) {
            return Err(LiveDetectError::InUse {
                session_id: id.to_string(),
            });
        }

        let paths = self.layout.paths_for(id, &self.video_extension);
        let partial = PartialEntry {
            video_path: find_video(&self.layout.videos, id)?.or_else(|| existing(paths.video)),
            log_path: existing(paths.log),
        };
        if partial.video_path.is_none() && partial.log_path.is_none() {
            return Err(LiveDetectError::NotFound {
                session_id: id.to_string(),
            });
        }
        Ok(self.complete(id.clone(), partial))
    }

    /// Remove a session's sidecar, video and log.
    ///
    /// Every file is attempted even when an earlier removal fails; the first
    /// failure is returned and the rest are logged.
    pub fn delete(&self, id: &SessionId) -> Result<RegistryEntry> {
        let state = self.state.lock();
        if self.is_reserved(&state, id) {
            return Err(LiveDetectError::InUse {
                session_id: id.to_string(),
            });
        }

        let paths = self.layout.paths_for(id, &self.video_extension);
        let video = find_video(&self.layout.videos, id)?.or_else(|| existing(paths.video));
        let log = existing(paths.log);
        if video.is_none() && log.is_none() {
            return Err(LiveDetectError::NotFound {
                session_id: id.to_string(),
            });
        }

        let entry = self.complete(
            id.clone(),
            PartialEntry {
                video_path: video.clone(),
                log_path: log.clone(),
            },
        );

        let sidecar = paths.metadata.exists().then_some(paths.metadata);
        let mut first_error: Option<std::io::Error> = None;
        for path in [sidecar, video, log].into_iter().flatten() {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if first_error.is_none() => {
                    warn!("Failed to remove {}: {}", path.display(), e);
                    first_error = Some(e);
                }
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        drop(state);

        if let Some(e) = first_error {
            return Err(e.into());
        }

        info!("Deleted session {}", id);
        Ok(entry)
    }

    fn lock_path(&self, id: &SessionId) -> PathBuf {
        self.layout.metadata.join(format!("{}.lock", id))
    }

    /// Held by this registry, or by a live owner of an on-disk lock
    fn is_reserved(&self, state: &RegistryState, id: &SessionId) -> bool {
        state.reserved.contains(id) || lock_is_held(&self.lock_path(id))
    }

    /// Write the on-disk lock for `id`; `false` when another owner got there first
    fn acquire_lock(&self, id: &SessionId) -> Result<bool> {
        let path = self.lock_path(id);
        // Only reached when any existing lock is stale
        match std::fs::remove_file(&path) {
            Ok(()) => debug!("Removed stale lock {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if let Err(e) = write!(file, "{}", std::process::id()) {
            drop(file);
            let _ = std::fs::remove_file(&path);
            return Err(e.into());
        }
        Ok(true)
    }

    fn remove_lock(&self, id: &SessionId) {
        let path = self.lock_path(id);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove reservation lock {}: {}", path.display(), e),
        }
    }

    fn complete(&self, id: SessionId, partial: PartialEntry) -> RegistryEntry {
        let metadata_path = self.layout.paths_for(&id, &self.video_extension).metadata;
        let metadata = if metadata_path.exists() {
            match SessionMetadata::load(&metadata_path) {
                Ok(metadata) => Some(metadata),
                Err(e) => {
                    warn!("Ignoring unreadable metadata {}: {}", metadata_path.display(), e);
                    None
                }
            }
        } else {
            None
        };

        let created_at = metadata
            .as_ref()
            .map(|m| m.started_at)
            .or_else(|| {
                [partial.log_path.as_ref(), partial.video_path.as_ref()]
                    .into_iter()
                    .flatten()
                    .filter_map(|p| modified_at(p))
                    .min()
            })
            .unwrap_or_else(Utc::now);

        RegistryEntry {
            id,
            created_at,
            video_path: partial.video_path,
            log_path: partial.log_path,
            metadata,
        }
    }
}

#[derive(Default)]
struct PartialEntry {
    video_path: Option<PathBuf>,
    log_path: Option<PathBuf>,
}

/// Session files in `dir`, optionally restricted to one extension
fn scan(dir: &Path, extension: Option<&str>) -> Result<Vec<(PathBuf, SessionId)>> {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for entry in read_dir {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let ext = path.extension().and_then(|e| e.to_str());
        if ext.is_none() || ext == Some("tmp") {
            continue;
        }
        if extension.is_some() && ext != extension {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Ok(id) = SessionId::parse(stem) {
            files.push((path, id));
        }
    }
    Ok(files)
}

/// Video for `id` in any container format
fn find_video(videos: &Path, id: &SessionId) -> Result<Option<PathBuf>> {
    Ok(scan(videos, None)?
        .into_iter()
        .find(|(_, found)| found == id)
        .map(|(path, _)| path))
}

/// A lock counts until its owning process is known to be gone
fn lock_is_held(path: &Path) -> bool {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return false,
        Err(_) => return true,
    };
    let Ok(pid) = contents.trim().parse::<u32>() else {
        return true;
    };
    if pid == std::process::id() || process_alive(pid) {
        return true;
    }
    debug!("Ignoring lock {} left by exited process {}", path.display(), pid);
    false
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    path.is_file().then_some(path)
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorSettings;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> SessionRegistry {
        let mut config = crate::config::LiveDetectConfig::default().recording;
        config.root = dir.path().to_path_buf();
        SessionRegistry::new(RecordingLayout::from_config(&config), "mjpeg").unwrap()
    }

    fn id(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    fn metadata(id: &SessionId, started_at: DateTime<Utc>, status: SessionStatus) -> SessionMetadata {
        SessionMetadata {
            id: id.clone(),
            started_at,
            ended_at: started_at,
            status,
            cancelled: false,
            failure: None,
            frames_recorded: 1,
            detections_logged: 0,
            frame_size: Some((8, 8)),
            detector: DetectorSettings::default(),
            video_format: "mjpeg".to_string(),
        }
    }

    fn record(registry: &SessionRegistry, raw: &str, started_at: DateTime<Utc>, status: SessionStatus) -> SessionId {
        let (id, paths) = registry.reserve(id(raw)).unwrap();
        std::fs::write(&paths.video, b"video").unwrap();
        std::fs::write(&paths.log, b"").unwrap();
        registry.publish(&metadata(&id, started_at, status)).unwrap();
        id
    }

    #[test]
    fn test_session_id_validation() {
        assert!(SessionId::parse("detect_20240101_120000_000").is_ok());
        assert!(SessionId::parse("detect_20240101_120000_000_2").is_ok());
        assert!(SessionId::parse("../etc/passwd").is_err());
        assert!(SessionId::parse("detect_../../x").is_err());
        assert!(SessionId::parse("detect_").is_err());
        assert!(SessionId::parse("other_20240101").is_err());

        let at = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        assert_eq!(SessionId::from_timestamp(&at).as_str(), "detect_20240506_070809_000");
    }

    #[test]
    fn test_list_most_recent_first() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap();

        record(&registry, "detect_20240101_100000_000", early, SessionStatus::Stopped);
        record(&registry, "detect_20240101_110000_000", late, SessionStatus::Failed);

        let entries = registry.list().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id.as_str(), "detect_20240101_110000_000");
        assert!(entries[0].is_failed());
        assert_eq!(entries[1].status(), Some(SessionStatus::Stopped));
        assert!(entries[1].video_path.is_some());
        assert!(entries[1].log_path.is_some());
    }

    #[test]
    fn test_reserve_disambiguates_and_hides() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let base = id("detect_20240101_100000_000");

        let (first, paths) = registry.reserve(base.clone()).unwrap();
        std::fs::write(&paths.log, b"").unwrap();
        let (second, _) = registry.reserve(base.clone()).unwrap();

        assert_eq!(first, base);
        assert_eq!(second.as_str(), "detect_20240101_100000_000_1");
        assert!(registry.list().unwrap().is_empty());
        assert!(matches!(registry.delete(&first), Err(LiveDetectError::InUse { .. })));

        registry.release(&first);
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[test]
    fn test_delete_removes_artifacts() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let session = record(&registry, "detect_20240101_100000_000", Utc::now(), SessionStatus::Stopped);
        let paths = registry.layout().paths_for(&session, "mjpeg");

        let removed = registry.delete(&session).unwrap();
        assert_eq!(removed.id, session);
        assert!(!paths.video.exists());
        assert!(!paths.log.exists());
        assert!(!paths.metadata.exists());
        assert!(registry.list().unwrap().is_empty());

        assert!(matches!(registry.delete(&session), Err(LiveDetectError::NotFound { .. })));
        assert!(matches!(registry.get(&session), Err(LiveDetectError::NotFound { .. })));
    }

    #[test]
    fn test_listing_reflects_external_changes() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let session = record(&registry, "detect_20240101_100000_000", Utc::now(), SessionStatus::Stopped);
        let paths = registry.layout().paths_for(&session, "mjpeg");

        // Log-only sessions without a sidecar are still listed
        std::fs::write(registry.layout().logs.join("detect_20230101_000000_000.txt"), b"").unwrap();
        std::fs::write(registry.layout().logs.join("notes.txt"), b"").unwrap();
        let entries = registry.list().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.metadata.is_none()));

        std::fs::remove_file(&paths.video).unwrap();
        std::fs::remove_file(&paths.log).unwrap();
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[test]
    fn test_reservation_is_shared_across_registries() {
        let dir = TempDir::new().unwrap();
        let owner = registry(&dir);
        let other = registry(&dir);
        let base = id("detect_20240101_100000_000");

        let (session, paths) = owner.reserve(base.clone()).unwrap();
        std::fs::write(&paths.video, b"partial").unwrap();
        std::fs::write(&paths.log, b"").unwrap();

        assert!(other.list().unwrap().is_empty());
        assert!(matches!(other.get(&session), Err(LiveDetectError::InUse { .. })));
        assert!(matches!(other.delete(&session), Err(LiveDetectError::InUse { .. })));
        assert!(paths.video.exists());
        let (next, _) = other.reserve(base).unwrap();
        assert_eq!(next.as_str(), "detect_20240101_100000_000_1");
        other.release(&next);

        owner
            .publish(&metadata(&session, Utc::now(), SessionStatus::Stopped))
            .unwrap();
        let entries = other.list().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, session);
        other.delete(&session).unwrap();
        assert!(!paths.video.exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_lock_of_exited_process_is_ignored() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let session = id("detect_20240101_100000_000");
        std::fs::write(registry.layout().logs.join(format!("{}.txt", session)), b"").unwrap();
        std::fs::write(registry.lock_path(&session), u32::MAX.to_string()).unwrap();

        let entries = registry.list().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(registry.get(&session).is_ok());
    }

    #[test]
    fn test_delete_removes_what_it_can() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let session = record(&registry, "detect_20240101_100000_000", Utc::now(), SessionStatus::Stopped);
        let paths = registry.layout().paths_for(&session, "mjpeg");

        // A directory where the sidecar should be cannot be removed as a file
        std::fs::remove_file(&paths.metadata).unwrap();
        std::fs::create_dir(&paths.metadata).unwrap();
        std::fs::write(paths.metadata.join("keep"), b"").unwrap();

        assert!(matches!(registry.delete(&session), Err(LiveDetectError::Io(_))));
        assert!(!paths.video.exists());
        assert!(!paths.log.exists());
        assert!(matches!(registry.get(&session), Err(LiveDetectError::NotFound { .. })));
    }

    #[test]
    fn test_corrupt_metadata_is_ignored() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let session = record(&registry, "detect_20240101_100000_000", Utc::now(), SessionStatus::Stopped);
        let paths = registry.layout().paths_for(&session, "mjpeg");
        std::fs::write(&paths.metadata, b"{not json").unwrap();

        let entry = registry.get(&session).unwrap();
        assert!(entry.metadata.is_none());
        assert!(entry.status().is_none());
    }
}
