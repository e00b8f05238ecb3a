//! Named, expiring credential entries persisted in the data directory.
//!
//! Two entries are used: `auth_token` (bearer token for REST calls) and
//! `user` (JSON profile of the logged-in user). An expired entry reads as
//! absent and is dropped on the next write.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use cardtrain::records::UserProfile;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::CredentialError;

pub const AUTH_TOKEN: &str = "auth_token";
pub const USER: &str = "user";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    lifetime: Duration,
    entries: BTreeMap<String, Entry>,
}

impl CredentialStore {
    /// Open the store at `path`; a missing file is an empty store.
    pub fn open(path: impl AsRef<Path>, lifetime_days: i64) -> Result<Self, CredentialError> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let text = fs::read_to_string(&path).map_err(|e| CredentialError::Read {
                path: path.clone(),
                source: e,
            })?;
            serde_json::from_str(&text).map_err(|e| CredentialError::Parse {
                path: path.clone(),
                source: e,
            })?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            entries,
            ..Self::empty(path, lifetime_days)
        })
    }

    /// An in-memory store backed by `path`; nothing is read.
    pub fn empty(path: impl Into<PathBuf>, lifetime_days: i64) -> Self {
        Self {
            path: path.into(),
            lifetime: Duration::days(lifetime_days),
            entries: BTreeMap::new(),
        }
    }

    /// Open the store, falling back to an empty one.
    ///
    /// A corrupt file is deleted. An unreadable file is left in place.
    pub fn open_or_empty(path: impl AsRef<Path>, lifetime_days: i64) -> Self {
        let path = path.as_ref();
        match Self::open(path, lifetime_days) {
            Ok(store) => store,
            Err(e @ CredentialError::Parse { .. }) => {
                warn!("{e}; starting with no saved login");
                if let Err(e) = fs::remove_file(path) {
                    warn!("could not remove {}: {e}", path.display());
                }
                Self::empty(path, lifetime_days)
            }
            Err(e) => {
                error!("{e}; credentials will not survive a restart");
                Self::empty(path, lifetime_days)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_at(name, Utc::now())
    }

    fn get_at(&self, name: &str, now: DateTime<Utc>) -> Option<&str> {
        self.entries
            .get(name)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.as_str())
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) -> Result<(), CredentialError> {
        self.set_at(name, value, Utc::now())
    }

    fn set_at(
        &mut self,
        name: &str,
        value: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), CredentialError> {
        self.entries.retain(|_, e| e.expires_at > now);
        self.entries.insert(
            name.to_string(),
            Entry {
                value: value.into(),
                expires_at: now + self.lifetime,
            },
        );
        self.persist()
    }

    pub fn remove(&mut self, name: &str) -> Result<(), CredentialError> {
        if self.entries.remove(name).is_some() {
            self.persist()?;
        }
        Ok(())
    }

    pub fn token(&self) -> Option<&str> {
        self.get(AUTH_TOKEN)
    }

    pub fn store_login(&mut self, token: &str, user: &UserProfile) -> Result<(), CredentialError> {
        let profile = serde_json::to_string(user).map_err(|e| CredentialError::Parse {
            path: self.path.clone(),
            source: e,
        })?;
        self.set(AUTH_TOKEN, token)?;
        self.set(USER, profile)
    }

    /// The logged-in user, if both entries are present and valid.
    ///
    /// An unreadable profile clears both entries.
    pub fn user(&mut self) -> Result<Option<UserProfile>, CredentialError> {
        let (Some(_), Some(raw)) = (self.get(AUTH_TOKEN), self.get(USER)) else {
            return Ok(None);
        };
        match serde_json::from_str::<UserProfile>(raw) {
            Ok(user) => Ok(Some(user)),
            Err(e) => {
                warn!("stored user profile is invalid, clearing credentials: {e}");
                self.clear()?;
                Ok(None)
            }
        }
    }

    pub fn clear(&mut self) -> Result<(), CredentialError> {
        self.entries.remove(AUTH_TOKEN);
        self.entries.remove(USER);
        self.persist()
    }

    fn persist(&self) -> Result<(), CredentialError> {
        let write_err = |e| CredentialError::Write {
            path: self.path.clone(),
            source: e,
        };
        let json = serde_json::to_vec_pretty(&self.entries).map_err(|e| CredentialError::Parse {
            path: self.path.clone(),
            source: e,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(write_err)?;
        fs::rename(&tmp, &self.path).map_err(write_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> UserProfile {
        UserProfile {
            user_id: 1,
            email: "admin@cccd.vn".into(),
            username: "admin".into(),
        }
    }

    #[test]
    fn login_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");

        let mut store = CredentialStore::open(&path, 1).unwrap();
        assert_eq!(store.token(), None);
        store.store_login("tok-123", &profile()).unwrap();

        let mut reopened = CredentialStore::open(&path, 1).unwrap();
        assert_eq!(reopened.token(), Some("tok-123"));
        assert_eq!(reopened.user().unwrap(), Some(profile()));
    }

    #[test]
    fn expired_entries_read_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CredentialStore::open(dir.path().join("c.json"), 1).unwrap();
        let past = Utc::now() - Duration::days(2);
        store.set_at(AUTH_TOKEN, "old", past).unwrap();
        assert_eq!(store.get(AUTH_TOKEN), None);
        assert_eq!(store.get_at(AUTH_TOKEN, past), Some("old"));
    }

    #[test]
    fn corrupt_profile_clears_both_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CredentialStore::open(dir.path().join("c.json"), 1).unwrap();
        store.set(AUTH_TOKEN, "tok").unwrap();
        store.set(USER, "{not json").unwrap();

        assert_eq!(store.user().unwrap(), None);
        assert_eq!(store.token(), None);
        assert_eq!(store.get(USER), None);
    }

    #[test]
    fn corrupt_file_is_removed_and_store_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            CredentialStore::open(&path, 1),
            Err(CredentialError::Parse { .. })
        ));

        let mut store = CredentialStore::open_or_empty(&path, 1);
        assert_eq!(store.token(), None);
        assert!(!path.exists());
        store.store_login("tok", &profile()).unwrap();
        assert_eq!(CredentialStore::open(&path, 1).unwrap().token(), Some("tok"));
    }

    #[test]
    fn unreadable_file_is_kept_and_store_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        // A directory exists but cannot be read as a file.
        let path = dir.path().join("cookies.json");
        fs::create_dir(&path).unwrap();
        assert!(matches!(
            CredentialStore::open(&path, 1),
            Err(CredentialError::Read { .. })
        ));

        let store = CredentialStore::open_or_empty(&path, 1);
        assert_eq!(store.token(), None);
        assert!(path.is_dir());
    }

    #[test]
    fn remove_only_touches_named_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CredentialStore::open(dir.path().join("c.json"), 1).unwrap();
        store.store_login("tok", &profile()).unwrap();
        store.remove(USER).unwrap();
        assert_eq!(store.token(), Some("tok"));
        assert_eq!(store.user().unwrap(), None);
    }
}
