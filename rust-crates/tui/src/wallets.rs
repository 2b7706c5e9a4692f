use berryclub::ledger::AccountId;
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use serde::Deserialize;
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
};

const KEY_PREFIXES: [&str; 2] = ["ed25519:", "secp256k1:"];

/// One account key file in the NEAR credentials directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CredentialDescriptor {
    pub account_id: AccountId,
    pub path: PathBuf,
}

impl CredentialDescriptor {
    pub fn new(account_id: AccountId, path: PathBuf) -> Self {
        Self { account_id, path }
    }
}

/// What can be safely shown about a key file. The secret never leaves
/// [`validate_key_file`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeySummary {
    pub account_id: AccountId,
    pub public_key: String,
}

#[derive(Deserialize)]
struct KeyFile {
    account_id: String,
    public_key: String,
    #[serde(alias = "secret_key")]
    private_key: String,
}

pub fn default_credentials_dir(network: &str) -> Result<PathBuf> {
    let home = std::env::var("HOME").wrap_err("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".near-credentials").join(network))
}

pub fn resolve_credentials_dir(dir: Option<&str>, network: &str) -> Result<PathBuf> {
    match dir {
        Some(raw) => {
            let expanded = shellexpand::tilde(raw);
            Ok(PathBuf::from(expanded.into_owned()))
        }
        None => default_credentials_dir(network),
    }
}

pub fn list_credentials(dir: &Path) -> Result<Vec<CredentialDescriptor>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut credentials = Vec::new();
    for entry in fs::read_dir(dir).wrap_err("Failed to read credentials directory")? {
        let entry = entry.wrap_err("Failed to read credentials entry")?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| eyre!("Invalid key filename {:?}", path))?;
        let Some(account_id) = AccountId::parse(stem) else {
            continue;
        };
        credentials.push(CredentialDescriptor::new(account_id, path));
    }
    credentials.sort_by(|a, b| a.account_id.cmp(&b.account_id));
    Ok(credentials)
}

pub fn find_credentials(dir: &Path, account_id: &AccountId) -> Result<CredentialDescriptor> {
    let credentials = list_credentials(dir)?;
    credentials
        .into_iter()
        .find(|c| &c.account_id == account_id)
        .ok_or_else(|| {
            eyre!(
                "No key for '{account_id}' in {}",
                dir.to_string_lossy()
            )
        })
}

pub fn validate_key_file(descriptor: &CredentialDescriptor) -> Result<KeySummary> {
    let data = fs::read(&descriptor.path).wrap_err_with(|| {
        format!("Failed to read key file for '{}'", descriptor.account_id)
    })?;
    let key: KeyFile = serde_json::from_slice(&data).map_err(|_| {
        eyre!("Key file for '{}' is not a NEAR key file", descriptor.account_id)
    })?;
    if key.account_id.trim() != descriptor.account_id.as_str() {
        return Err(eyre!(
            "Key file for '{}' belongs to '{}'",
            descriptor.account_id,
            key.account_id
        ));
    }
    if !has_key_prefix(&key.public_key) || !has_key_prefix(&key.private_key) {
        return Err(eyre!(
            "Key file for '{}' uses an unsupported key type",
            descriptor.account_id
        ));
    }
    Ok(KeySummary {
        account_id: descriptor.account_id.clone(),
        public_key: key.public_key,
    })
}

fn has_key_prefix(key: &str) -> bool {
    KEY_PREFIXES.iter().any(|prefix| key.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use serde_json::json;

    fn write_key(dir: &Path, account: &str, body: serde_json::Value) -> PathBuf {
        let path = dir.join(format!("{account}.json"));
        fs::write(&path, serde_json::to_vec(&body).unwrap()).unwrap();
        path
    }

    fn key_body(account: &str) -> serde_json::Value {
        json!({
            "account_id": account,
            "public_key": "ed25519:8hSHprDq2StXwMtNd43wDTXQYsjXcD4MJTXQYsjXcc",
            "private_key": "ed25519:3D4YudUahN1nawWogh8pAKSj92sUNMdbZGjn7kERKzYoTy8tnFQuwoGUC51DowKqorvkr2pytJSnwuSbsNVfqygr"
        })
    }

    #[test]
    fn list_credentials__lists_json_key_files_sorted() {
        // given
        let dir = tempfile::tempdir().unwrap();
        write_key(dir.path(), "zed.near", key_body("zed.near"));
        write_key(dir.path(), "alice.near", key_body("alice.near"));
        fs::write(dir.path().join("notes.txt"), b"ignore me").unwrap();

        // when
        let credentials = list_credentials(dir.path()).unwrap();

        // then
        let names: Vec<&str> = credentials.iter().map(|c| c.account_id.as_str()).collect();
        assert_eq!(names, vec!["alice.near", "zed.near"]);
    }

    #[test]
    fn list_credentials__missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();

        let credentials = list_credentials(&dir.path().join("absent")).unwrap();

        assert!(credentials.is_empty());
    }

    #[test]
    fn validate_key_file__accepts_matching_key() {
        // given
        let dir = tempfile::tempdir().unwrap();
        write_key(dir.path(), "alice.near", key_body("alice.near"));
        let alice = AccountId::parse("alice.near").unwrap();
        let descriptor = find_credentials(dir.path(), &alice).unwrap();

        // when
        let summary = validate_key_file(&descriptor).unwrap();

        // then
        assert_eq!(summary.account_id, alice);
        assert!(summary.public_key.starts_with("ed25519:"));
    }

    #[test]
    fn validate_key_file__rejects_key_for_another_account() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let path = write_key(dir.path(), "alice.near", key_body("mallory.near"));
        let descriptor =
            CredentialDescriptor::new(AccountId::parse("alice.near").unwrap(), path);

        // when
        let err = validate_key_file(&descriptor).unwrap_err();

        // then
        assert!(err.to_string().contains("mallory.near"));
    }

    #[test]
    fn validate_key_file__error_never_echoes_the_secret() {
        // given
        let dir = tempfile::tempdir().unwrap();
        let path = write_key(
            dir.path(),
            "alice.near",
            json!({
                "account_id": "alice.near",
                "public_key": "ed25519:abc",
                "private_key": "plaintext-secret"
            }),
        );
        let descriptor =
            CredentialDescriptor::new(AccountId::parse("alice.near").unwrap(), path);

        // when
        let err = validate_key_file(&descriptor).unwrap_err();

        // then
        assert!(!format!("{err:?}").contains("plaintext-secret"));
    }

    #[test]
    fn resolve_credentials_dir__uses_explicit_path() {
        let dir = resolve_credentials_dir(Some("/tmp/keys"), "testnet").unwrap();

        assert_eq!(dir, PathBuf::from("/tmp/keys"));
    }
}
