//! Versioned store of approved reference images.
//!
//! Baselines are keyed by `(screen_id, device_profile)` and versioned by
//! release. Approval is the only write path and never overwrites an existing
//! version. Approvals for the same key are serialized by a per-key lock that
//! readers never touch. A reader holds the index read guard only long enough
//! to clone one `Arc` version list; the write guard is held only to insert
//! the new list after the image is persisted. Reads therefore never wait on
//! approval I/O, only on that map insert.
//!
//! A store opened on a directory persists every approval as
//! `{root}/{screen}/{profile_key}/{version}.png` plus a `.json` record, each
//! path component encoded by [`sanitize_component`] so distinct keys never
//! share a directory. Version files are created exclusively and an existing
//! file is reported as [`EspejoError::InvalidState`]. The record is written
//! after the image, so a record on disk always has its image.

use crate::device::{sanitize_component, DeviceProfile};
use crate::result::{EspejoError, EspejoResult};
use crate::screenshot::Screenshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// An approved reference image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Baseline {
    /// Screen identifier
    pub screen_id: String,
    /// Device profile the image was approved for
    pub device_profile: DeviceProfile,
    /// Release version label
    pub release_version: String,
    /// Approved image
    pub image: Screenshot,
    /// Approval time
    pub approved_at: DateTime<Utc>,
    /// Who approved it
    pub approver: String,
    /// Monotonic per-key sequence number (1-based)
    pub sequence: u64,
    /// SHA-256 of the RGBA pixels, hex encoded
    pub content_hash: String,
}

impl Baseline {
    /// Create a standalone baseline (sequence 1), e.g. for direct comparisons
    #[must_use]
    pub fn new(
        screen_id: impl Into<String>,
        device_profile: DeviceProfile,
        release_version: impl Into<String>,
        image: Screenshot,
        approver: impl Into<String>,
    ) -> Self {
        let content_hash = content_hash(&image);
        Self {
            screen_id: screen_id.into(),
            device_profile,
            release_version: release_version.into(),
            image,
            approved_at: Utc::now(),
            approver: approver.into(),
            sequence: 1,
            content_hash,
        }
    }

    fn record(&self) -> BaselineRecord {
        BaselineRecord {
            screen_id: self.screen_id.clone(),
            device_profile: self.device_profile.clone(),
            release_version: self.release_version.clone(),
            approved_at: self.approved_at,
            approver: self.approver.clone(),
            sequence: self.sequence,
            content_hash: self.content_hash.clone(),
            width: self.image.width,
            height: self.image.height,
        }
    }
}

/// On-disk metadata for one baseline version
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BaselineRecord {
    screen_id: String,
    device_profile: DeviceProfile,
    release_version: String,
    approved_at: DateTime<Utc>,
    approver: String,
    sequence: u64,
    content_hash: String,
    width: u32,
    height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BaselineKey {
    screen_id: String,
    profile: DeviceProfile,
}

impl BaselineKey {
    fn new(screen_id: &str, profile: &DeviceProfile) -> Self {
        Self {
            screen_id: screen_id.to_string(),
            profile: profile.clone(),
        }
    }
}

/// Versions of one key, oldest first
type VersionList = Arc<Vec<Arc<Baseline>>>;

/// Versioned baseline repository
#[derive(Debug, Default)]
pub struct BaselineStore {
    index: RwLock<HashMap<BaselineKey, VersionList>>,
    write_locks: Mutex<HashMap<BaselineKey, Arc<Mutex<()>>>>,
    root: Option<PathBuf>,
}

impl BaselineStore {
    /// Create an empty, memory-only store
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open (or create) a store persisted under `root`, loading existing versions
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be read or a record is corrupt
    pub fn open(root: impl Into<PathBuf>) -> EspejoResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let mut index: HashMap<BaselineKey, Vec<Arc<Baseline>>> = HashMap::new();

        for record_path in find_records(&root)? {
            let record: BaselineRecord = serde_json::from_slice(&fs::read(&record_path)?)?;
            let image_path = record_path.with_extension("png");
            let mut image = Screenshot::from_png(&fs::read(&image_path)?)?;
            image.captured_at = record.approved_at;
            if image.dimensions() != (record.width, record.height) {
                return Err(EspejoError::InvalidState {
                    message: format!(
                        "baseline image {} does not match its record",
                        image_path.display()
                    ),
                });
            }
            let key = BaselineKey::new(&record.screen_id, &record.device_profile);
            index.entry(key).or_default().push(Arc::new(Baseline {
                screen_id: record.screen_id,
                device_profile: record.device_profile,
                release_version: record.release_version,
                image,
                approved_at: record.approved_at,
                approver: record.approver,
                sequence: record.sequence,
                content_hash: record.content_hash,
            }));
        }

        let index = index
            .into_iter()
            .map(|(key, mut versions)| {
                versions.sort_by_key(|b| b.sequence);
                (key, Arc::new(versions))
            })
            .collect::<HashMap<_, _>>();
        tracing::debug!(root = %root.display(), keys = index.len(), "opened baseline store");

        Ok(Self {
            index: RwLock::new(index),
            write_locks: Mutex::new(HashMap::new()),
            root: Some(root),
        })
    }

    /// Directory backing this store, if persisted
    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Resolve a baseline; `None` for `release_version` means latest
    ///
    /// # Errors
    ///
    /// Returns [`EspejoError::MissingBaseline`] when nothing matches
    pub fn get(
        &self,
        screen_id: &str,
        profile: &DeviceProfile,
        release_version: Option<&str>,
    ) -> EspejoResult<Arc<Baseline>> {
        let versions = self.snapshot(&BaselineKey::new(screen_id, profile));
        let found = match release_version {
            None => versions.last().cloned(),
            Some(v) => versions.iter().find(|b| b.release_version == v).cloned(),
        };
        found.ok_or_else(|| EspejoError::MissingBaseline {
            screen_id: screen_id.to_string(),
            profile: profile.key(),
        })
    }

    /// All versions for a key, newest first
    #[must_use]
    pub fn list_versions(&self, screen_id: &str, profile: &DeviceProfile) -> Vec<Arc<Baseline>> {
        self.snapshot(&BaselineKey::new(screen_id, profile))
            .iter()
            .rev()
            .cloned()
            .collect()
    }

    /// Approve a new version labelled `v{sequence}`, or the next free `v{n}`
    /// when an explicit label already took that name
    ///
    /// # Errors
    ///
    /// Returns error if persisting the approval fails
    pub fn approve(
        &self,
        screen_id: &str,
        profile: &DeviceProfile,
        image: Screenshot,
        approver: &str,
    ) -> EspejoResult<Arc<Baseline>> {
        self.approve_inner(screen_id, profile, image, approver, None)
    }

    /// Approve a new version with an explicit release label
    ///
    /// # Errors
    ///
    /// Returns [`EspejoError::InvalidState`] if the label already exists for
    /// this key, or an I/O error if persisting fails
    pub fn approve_as(
        &self,
        screen_id: &str,
        profile: &DeviceProfile,
        image: Screenshot,
        approver: &str,
        release_version: &str,
    ) -> EspejoResult<Arc<Baseline>> {
        self.approve_inner(screen_id, profile, image, approver, Some(release_version))
    }

    /// Number of distinct `(screen, profile)` keys
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn approve_inner(
        &self,
        screen_id: &str,
        profile: &DeviceProfile,
        image: Screenshot,
        approver: &str,
        release_version: Option<&str>,
    ) -> EspejoResult<Arc<Baseline>> {
        let key = BaselineKey::new(screen_id, profile);
        let key_lock = self.key_lock(&key);
        let _serialized = key_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let current = self.snapshot(&key);
        let sequence = current.last().map_or(1, |b| b.sequence + 1);
        let taken = |label: &str| current.iter().any(|b| b.release_version == label);
        let label = match release_version {
            Some(label) => label.to_string(),
            None => {
                let mut n = sequence;
                while taken(format!("v{n}").as_str()) {
                    n += 1;
                }
                format!("v{n}")
            }
        };
        if taken(label.as_str()) {
            return Err(EspejoError::InvalidState {
                message: format!(
                    "baseline {label} already approved for {screen_id} on {}",
                    profile.key()
                ),
            });
        }

        let mut baseline = Baseline::new(screen_id, profile.clone(), label, image, approver);
        baseline.sequence = sequence;
        if let Some(root) = &self.root {
            persist(root, &baseline)?;
        }

        let baseline = Arc::new(baseline);
        let mut versions = current.as_ref().clone();
        versions.push(Arc::clone(&baseline));
        self.index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::new(versions));

        tracing::info!(
            screen = screen_id,
            profile = %profile.key(),
            version = %baseline.release_version,
            approver,
            "baseline approved"
        );
        Ok(baseline)
    }

    fn snapshot(&self, key: &BaselineKey) -> VersionList {
        self.index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    fn key_lock(&self, key: &BaselineKey) -> Arc<Mutex<()>> {
        let mut locks = self
            .write_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.clone()).or_default())
    }
}

fn content_hash(image: &Screenshot) -> String {
    let digest = Sha256::digest(&image.pixels);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

fn version_dir(root: &Path, screen_id: &str, profile: &DeviceProfile) -> PathBuf {
    root.join(sanitize_component(screen_id)).join(profile.key())
}

fn persist(root: &Path, baseline: &Baseline) -> EspejoResult<()> {
    let dir = version_dir(root, &baseline.screen_id, &baseline.device_profile);
    fs::create_dir_all(&dir)?;
    let stem = sanitize_component(&baseline.release_version);
    write_new(&dir.join(format!("{stem}.png")), &baseline.image.to_png()?)?;
    let record = serde_json::to_vec_pretty(&baseline.record())?;
    write_new(&dir.join(format!("{stem}.json")), &record)?;
    Ok(())
}

fn write_new(path: &Path, bytes: &[u8]) -> EspejoResult<()> {
    let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(EspejoError::InvalidState {
                message: format!("baseline file {} already exists", path.display()),
            });
        }
        Err(e) => return Err(e.into()),
    };
    file.write_all(bytes)?;
    Ok(())
}

/// `{root}/*/*/*.json`
fn find_records(root: &Path) -> EspejoResult<Vec<PathBuf>> {
    let mut records = Vec::new();
    for screen in fs::read_dir(root)? {
        let screen = screen?.path();
        if !screen.is_dir() {
            continue;
        }
        for profile in fs::read_dir(&screen)? {
            let profile = profile?.path();
            if !profile.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&profile)? {
                let path = entry?.path();
                if path.extension().is_some_and(|e| e == "json") {
                    records.push(path);
                }
            }
        }
    }
    records.sort();
    Ok(records)
}
