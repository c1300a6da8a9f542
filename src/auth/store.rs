use std::fs;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::StoreError;

/// Well-known key of the single credential slot.
pub const SLOT_KEY: &str = "session";

const SLOT_FILE_VERSION: u32 = 1;
const SIGNED_IN_MARKER: &str = "signed-in-before";

/// The (access, refresh) pair held in the credential slot.
///
/// Both tokens always belong to the same session payload; the slot is either
/// fully populated or absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentialPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl StoredCredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Both halves carry a value.
    pub fn is_complete(&self) -> bool {
        !self.access_token.is_empty() && !self.refresh_token.is_empty()
    }
}

/// On-device storage for the current credential pair.
///
/// Implementations never notify on write; the caller emits on the
/// [`ChangeNotifier`](super::notifier::ChangeNotifier) once its writes are done.
pub trait CredentialStore: Send + Sync {
    /// Read the slot. A missing slot is `Ok(None)`, never an error.
    fn get(&self) -> Result<Option<StoredCredentialPair>, StoreError>;
    /// Replace the whole slot.
    fn set(&self, pair: &StoredCredentialPair) -> Result<(), StoreError>;
    /// Remove the slot. Clearing an empty slot succeeds.
    fn clear(&self) -> Result<(), StoreError>;
    /// Whether any sign-in has ever completed on this device.
    fn has_signed_in_before(&self) -> Result<bool, StoreError>;
    /// Record that a sign-in completed. Survives [`clear`](Self::clear).
    fn mark_signed_in(&self) -> Result<(), StoreError>;
}

/// Configuration for file-backed credential storage.
#[derive(Debug, Clone)]
pub struct CredentialStoreConfig {
    pub base_dir: PathBuf,
}

impl CredentialStoreConfig {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn default_dir() -> PathBuf {
        default_ballot_dir()
    }
}

/// File-backed credential slot stored as TOML with owner-only permissions.
///
/// # Example
/// ```no_run
/// use ballot_session::auth::{CredentialStore, CredentialStoreConfig, FileCredentialStore};
/// use ballot_session::auth::StoredCredentialPair;
///
/// let store = FileCredentialStore::new(CredentialStoreConfig::new("/tmp/ballot".into()));
/// store.set(&StoredCredentialPair::new("access", "refresh"))?;
/// # Ok::<(), ballot_session::auth::StoreError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    base_dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(config: CredentialStoreConfig) -> Self {
        Self {
            base_dir: config.base_dir,
        }
    }

    pub fn new_default() -> Self {
        Self {
            base_dir: default_ballot_dir(),
        }
    }

    fn slot_path(&self) -> PathBuf {
        self.base_dir.join(format!("{SLOT_KEY}.toml"))
    }

    fn marker_path(&self) -> PathBuf {
        self.base_dir.join(SIGNED_IN_MARKER)
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Result<Option<StoredCredentialPair>, StoreError> {
        let path = self.slot_path();
        let raw = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::Io(err.to_string())),
        };
        let file: SlotFile = toml::from_str(&raw)?;
        if file.version != SLOT_FILE_VERSION {
            return Err(StoreError::Corrupt(format!(
                "unsupported slot version {} at {}",
                file.version,
                path.display()
            )));
        }
        if file.slot != SLOT_KEY {
            return Err(StoreError::Corrupt(format!(
                "unexpected slot key {:?} at {}",
                file.slot,
                path.display()
            )));
        }
        Ok(Some(file.pair))
    }

    fn set(&self, pair: &StoredCredentialPair) -> Result<(), StoreError> {
        let file = SlotFile {
            version: SLOT_FILE_VERSION,
            slot: SLOT_KEY.to_string(),
            saved_at: Utc::now(),
            pair: pair.clone(),
        };
        let serialized = toml::to_string(&file)?;
        atomic_write(&self.slot_path(), serialized.as_bytes())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(self.slot_path()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::Io(err.to_string())),
        }
    }

    fn has_signed_in_before(&self) -> Result<bool, StoreError> {
        Ok(self.marker_path().try_exists()?)
    }

    fn mark_signed_in(&self) -> Result<(), StoreError> {
        atomic_write(&self.marker_path(), b"true\n")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SlotFile {
    version: u32,
    slot: String,
    saved_at: DateTime<Utc>,
    pair: StoredCredentialPair,
}

/// Process-local credential slot; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    pair: Mutex<Option<StoredCredentialPair>>,
    signed_in_before: Mutex<bool>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Result<Option<StoredCredentialPair>, StoreError> {
        Ok(self
            .pair
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn set(&self, pair: &StoredCredentialPair) -> Result<(), StoreError> {
        *self.pair.lock().unwrap_or_else(PoisonError::into_inner) = Some(pair.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.pair
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }

    fn has_signed_in_before(&self) -> Result<bool, StoreError> {
        Ok(*self
            .signed_in_before
            .lock()
            .unwrap_or_else(PoisonError::into_inner))
    }

    fn mark_signed_in(&self) -> Result<(), StoreError> {
        *self
            .signed_in_before
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = true;
        Ok(())
    }
}

fn default_ballot_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".ballot"))
        .unwrap_or_else(|| PathBuf::from(".ballot"))
}

/// Write via a sibling temp file and rename, so readers never see a partial slot.
fn atomic_write(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file_name = path.file_name().ok_or_else(|| {
        StoreError::Io(format!("slot path {} has no file name", path.display()))
    })?;
    let temp_name = format!(
        ".{}.tmp-{}-{}",
        file_name.to_string_lossy(),
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    );
    let temp_path = path.with_file_name(temp_name);

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let write_result = (|| -> std::io::Result<()> {
        let mut temp_file = options.open(&temp_path)?;
        temp_file.write_all(data)?;
        temp_file.sync_all()?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(err.into());
    }

    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(err.into());
    }

    #[cfg(unix)]
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

    Ok(())
}
