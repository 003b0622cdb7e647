use rand::{rngs::OsRng, RngCore};
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// 32 bytes = 256 bits, 64 hex characters once encoded.
const API_KEY_BYTES: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("failed to write API key to '{}': {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to read API key from '{}': {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("API key file '{}' is empty", .path.display())]
    Empty { path: PathBuf },
}

/// Holds the API key for the lifetime of the process.
///
/// The key comes from the configured override when one is set; otherwise it
/// is read from the secret file, which is created with a fresh random key on
/// first use. Once resolved, the value is cached and never changes.
#[derive(Debug)]
pub struct ApiKeyStore {
    secret_file: PathBuf,
    override_key: Option<String>,
    cached: Mutex<Option<String>>,
}

impl ApiKeyStore {
    pub fn new(secret_file: impl Into<PathBuf>, override_key: Option<String>) -> Self {
        ApiKeyStore {
            secret_file: secret_file.into(),
            override_key: override_key.filter(|k| !k.is_empty()),
            cached: Mutex::new(None),
        }
    }

    pub fn get_or_generate(&self) -> Result<String, KeyStoreError> {
        if let Some(key) = &self.override_key {
            return Ok(key.clone());
        }

        // The lock is held across the file check so only one caller can create it
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(key) = cached.as_ref() {
            return Ok(key.clone());
        }

        let key = match self.create_secret_file()? {
            Some(key) => {
                info!(path = %self.secret_file.display(), "Generated new API key");
                key
            }
            None => self.read_secret_file()?,
        };
        *cached = Some(key.clone());
        Ok(key)
    }

    /// Returns `Ok(None)` when the file already exists.
    ///
    /// The key is written to a temp file in the same directory and then
    /// hard-linked into place, so readers never see a partially written file.
    fn create_secret_file(&self) -> Result<Option<String>, KeyStoreError> {
        let write_err = |source| KeyStoreError::Write {
            path: self.secret_file.clone(),
            source,
        };
        if self.secret_file.exists() {
            return Ok(None);
        }

        let dir = match self.secret_file.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        // NamedTempFile is created 0600 and unlinked on drop
        let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
        let key = generate_api_key();
        tmp.write_all(key.as_bytes())
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(write_err)?;

        match fs::hard_link(tmp.path(), &self.secret_file) {
            Ok(()) => Ok(Some(key)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(source) => Err(write_err(source)),
        }
    }

    fn read_secret_file(&self) -> Result<String, KeyStoreError> {
        debug!(path = %self.secret_file.display(), "Reading API key from secret file");
        let key = fs::read_to_string(&self.secret_file).map_err(|source| KeyStoreError::Read {
            path: self.secret_file.clone(),
            source,
        })?;
        if key.is_empty() {
            return Err(KeyStoreError::Empty {
                path: self.secret_file.clone(),
            });
        }
        Ok(key)
    }
}

pub fn generate_api_key() -> String {
    let mut bytes = [0u8; API_KEY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use tempfile::TempDir;

    #[test]
    fn generated_key_is_64_hex_chars() {
        let key = generate_api_key();
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(key, generate_api_key());
    }

    #[test]
    fn generates_and_persists_key_when_file_missing() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("api_key.secret");
        let store = ApiKeyStore::new(&path, None);

        let key = store.get_or_generate().expect("key");
        assert_eq!(key.len(), 64);

        let stored = fs::read_to_string(&path).expect("read secret file");
        assert_eq!(stored, key);

        // Same process, no external change: identical key
        assert_eq!(store.get_or_generate().expect("key"), key);
    }

    #[cfg(unix)]
    #[test]
    fn secret_file_is_owner_read_write_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("api_key.secret");
        ApiKeyStore::new(&path, None).get_or_generate().expect("key");

        let mode = fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn existing_file_is_reused_across_stores() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("api_key.secret");

        let first = ApiKeyStore::new(&path, None).get_or_generate().expect("key");
        // A fresh store stands in for a process restart
        let second = ApiKeyStore::new(&path, None).get_or_generate().expect("key");
        assert_eq!(first, second);
    }

    #[test]
    fn override_takes_precedence_over_existing_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("api_key.secret");
        fs::write(&path, "persisted-key").expect("write");

        let store = ApiKeyStore::new(&path, Some("override-key".to_string()));
        assert_eq!(store.get_or_generate().expect("key"), "override-key");
        assert_eq!(fs::read_to_string(&path).expect("read"), "persisted-key");
    }

    #[test]
    fn override_does_not_create_secret_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("api_key.secret");

        let store = ApiKeyStore::new(&path, Some("override-key".to_string()));
        store.get_or_generate().expect("key");
        assert!(!path.exists());
    }

    #[test]
    fn empty_override_is_ignored() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("api_key.secret");
        fs::write(&path, "persisted-key").expect("write");

        let store = ApiKeyStore::new(&path, Some(String::new()));
        assert_eq!(store.get_or_generate().expect("key"), "persisted-key");
    }

    #[test]
    fn empty_secret_file_is_an_error() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("api_key.secret");
        fs::write(&path, "").expect("write");

        let result = ApiKeyStore::new(&path, None).get_or_generate();
        assert!(matches!(result, Err(KeyStoreError::Empty { .. })));
    }

    #[test]
    fn unwritable_location_is_an_error() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("missing-dir").join("api_key.secret");

        let result = ApiKeyStore::new(&path, None).get_or_generate();
        assert!(matches!(result, Err(KeyStoreError::Write { .. })));
    }

    #[test]
    fn concurrent_first_calls_agree_on_one_key() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("api_key.secret");
        let store = Arc::new(ApiKeyStore::new(&path, None));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.get_or_generate().expect("key"))
            })
            .collect();
        let keys: Vec<String> = handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .collect();

        assert!(keys.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(fs::read_to_string(&path).expect("read"), keys[0]);
    }

    #[test]
    fn independent_stores_racing_on_one_path_agree() {
        for _ in 0..100 {
            let dir = TempDir::new().expect("tempdir");
            let path = dir.path().join("api_key.secret");
            let barrier = Arc::new(Barrier::new(2));

            // Separate stores do not share a lock, like two processes
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let store = ApiKeyStore::new(&path, None);
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        store.get_or_generate()
                    })
                })
                .collect();
            let keys: Vec<String> = handles
                .into_iter()
                .map(|h| h.join().expect("join").expect("key"))
                .collect();

            assert_eq!(keys[0], keys[1]);
            assert_eq!(fs::read_to_string(&path).expect("read"), keys[0]);
            // Only the published key remains, no temp files
            assert_eq!(fs::read_dir(dir.path()).expect("read_dir").count(), 1);
        }
    }
}
