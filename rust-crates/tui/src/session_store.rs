use berryclub::ledger::AccountId;
use chrono::Utc;
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
};

const SESSION_FILE: &str = "session.json";

/// The signed-in account, persisted between runs.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub account_id: AccountId,
    pub network: String,
    pub connected_at: String,
}

impl SessionRecord {
    pub fn new(account_id: AccountId, network: impl Into<String>) -> Self {
        Self {
            account_id,
            network: network.into(),
            connected_at: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        let path = ensure_store(data_dir)?;
        Ok(Self { path })
    }

    /// `None` when nobody is signed in.
    pub fn load(&self) -> Result<Option<SessionRecord>> {
        read_record(&self.path)
    }

    pub fn save(&self, record: &SessionRecord) -> Result<()> {
        write_record(&self.path, record)
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path).wrap_err("Failed to remove session file")?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn ensure_store(data_dir: &Path) -> Result<PathBuf> {
    if !data_dir.exists() {
        fs::create_dir_all(data_dir).wrap_err_with(|| {
            format!("Failed to create data directory {}", data_dir.display())
        })?;
    }
    Ok(data_dir.join(SESSION_FILE))
}

fn read_record(path: impl AsRef<Path>) -> Result<Option<SessionRecord>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read(path).wrap_err("Failed to read session file")?;
    if data.is_empty() {
        return Ok(None);
    }
    let record = serde_json::from_slice::<SessionRecord>(&data)
        .wrap_err("Failed to parse session file JSON")?;
    Ok(Some(record))
}

fn write_record(path: impl AsRef<Path>, record: &SessionRecord) -> Result<()> {
    let json = serde_json::to_vec_pretty(record).wrap_err("Failed to serialize session")?;
    fs::write(path.as_ref(), json).wrap_err("Failed to write session file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn session_store__missing_file_means_signed_out() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();

        // when
        let record = store.load().unwrap();

        // then
        assert_eq!(record, None);
    }

    #[test]
    fn session_store__save_then_load_then_clear() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(&dir.path().join("nested")).unwrap();
        let record = SessionRecord::new(AccountId::parse("alice.near").unwrap(), "mainnet");

        // when
        store.save(&record).unwrap();
        let loaded = store.load().unwrap();
        store.clear().unwrap();

        // then
        assert_eq!(loaded, Some(record));
        assert_eq!(store.load().unwrap(), None);
        assert!(!store.path().exists());
    }

    #[test]
    fn session_store__corrupt_file_is_an_error() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        fs::write(store.path(), b"{not json").unwrap();

        // when
        let result = store.load();

        // then
        assert!(result.is_err());
    }
}
