use crate::{
    near_cli::NearCli,
    session_store::{
        SessionRecord,
        SessionStore,
    },
    wallets::{
        self,
        KeySummary,
    },
};
use async_trait::async_trait;
use berryclub::{
    ledger::{
        AccountId,
        TransactionRequest,
        TransactionResult,
    },
    session::{
        SessionChannels,
        SessionEvent,
        WalletError,
        WalletErrorKind,
        WalletSession,
    },
};
use std::path::PathBuf;
use tokio::sync::{
    broadcast,
    watch,
};
use tracing::{
    debug,
    info,
    warn,
};

/// Wallet session backed by the legacy NEAR key store on disk. Identity is
/// persisted in the [`SessionStore`]; signing is done by the NEAR CLI.
pub struct KeychainWallet {
    network: String,
    credentials_dir: PathBuf,
    store: SessionStore,
    cli: NearCli,
    channels: SessionChannels,
}

impl KeychainWallet {
    pub fn new(
        network: impl Into<String>,
        credentials_dir: PathBuf,
        store: SessionStore,
        cli: NearCli,
    ) -> Self {
        Self {
            network: network.into(),
            credentials_dir,
            store,
            cli,
            channels: SessionChannels::new(),
        }
    }

    /// Accounts that have a key file and could be signed in with.
    pub fn available_accounts(&self) -> Result<Vec<AccountId>, WalletError> {
        let credentials = wallets::list_credentials(&self.credentials_dir)
            .map_err(|err| WalletError::new(WalletErrorKind::Storage, format!("{err:#}")))?;
        Ok(credentials.into_iter().map(|c| c.account_id).collect())
    }

    fn check_credentials(&self, account_id: &AccountId) -> Result<KeySummary, WalletError> {
        let descriptor = wallets::find_credentials(&self.credentials_dir, account_id)
            .map_err(|err| WalletError::new(WalletErrorKind::NotFound, format!("{err:#}")))?;
        wallets::validate_key_file(&descriptor)
            .map_err(|err| WalletError::new(WalletErrorKind::Storage, format!("{err:#}")))
    }
}

fn storage_error(err: color_eyre::eyre::Report) -> WalletError {
    WalletError::new(WalletErrorKind::Storage, format!("{err:#}"))
}

#[async_trait]
impl WalletSession for KeychainWallet {
    async fn restore(&self) -> Result<Option<AccountId>, WalletError> {
        let record = match self.store.load() {
            Ok(record) => record,
            Err(err) => {
                self.channels.resolve(None);
                return Err(storage_error(err));
            }
        };
        let Some(record) = record else {
            self.channels.resolve(None);
            return Ok(None);
        };
        if record.network != self.network {
            info!(
                account = %record.account_id,
                saved = %record.network,
                "Ignoring session saved for another network"
            );
            self.channels.resolve(None);
            return Ok(None);
        }
        let summary = match self.check_credentials(&record.account_id) {
            Ok(summary) => summary,
            Err(err) => {
                self.channels.resolve(None);
                return Err(err);
            }
        };
        debug!(account = %summary.account_id, public_key = %summary.public_key, "Session key found");
        self.channels.resolve(Some(record.account_id.clone()));
        Ok(Some(record.account_id))
    }

    async fn connect(&self, account_id: &AccountId) -> Result<AccountId, WalletError> {
        let summary = self.check_credentials(account_id)?;
        let record = SessionRecord::new(account_id.clone(), self.network.clone());
        self.store.save(&record).map_err(storage_error)?;
        info!(
            account = %summary.account_id,
            public_key = %summary.public_key,
            session = %self.store.path().display(),
            "Signed in"
        );
        self.channels.set_connected(account_id.clone());
        Ok(account_id.clone())
    }

    async fn disconnect(&self) -> Result<(), WalletError> {
        self.store.clear().map_err(storage_error)?;
        info!("Signed out");
        self.channels.set_disconnected();
        Ok(())
    }

    fn account_id(&self) -> Option<AccountId> {
        self.channels.current()
    }

    async fn send_transaction(
        &self,
        request: TransactionRequest,
    ) -> Result<TransactionResult, WalletError> {
        match self.account_id() {
            Some(account) if account == request.signer_id => {}
            Some(account) => {
                warn!(%account, signer = %request.signer_id, "signer is not the connected account");
                return Err(WalletError::new(
                    WalletErrorKind::NotConnected,
                    format!("{} is not signed in", request.signer_id),
                ));
            }
            None => {
                return Err(WalletError::new(
                    WalletErrorKind::NotConnected,
                    "wallet is not connected",
                ));
            }
        }
        self.cli.send(&request).await
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.channels.subscribe()
    }

    fn account_changes(&self) -> watch::Receiver<Option<AccountId>> {
        self.channels.account_changes()
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use berryclub::submitter::{
        Intent,
        build_action,
    };
    use serde_json::json;
    use std::{
        fs,
        path::Path,
    };
    use tempfile::TempDir;

    struct TestContext {
        _dir: TempDir,
        credentials: PathBuf,
        data: PathBuf,
    }

    impl TestContext {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let credentials = dir.path().join("credentials");
            let data = dir.path().join("data");
            fs::create_dir_all(&credentials).unwrap();
            Self {
                _dir: dir,
                credentials,
                data,
            }
        }

        fn add_key(&self, account: &str) {
            write_key(&self.credentials, account);
        }

        fn wallet(&self, network: &str) -> KeychainWallet {
            KeychainWallet::new(
                network,
                self.credentials.clone(),
                SessionStore::new(&self.data).unwrap(),
                NearCli::new("/definitely/not/a/near-cli", network),
            )
        }
    }

    fn write_key(dir: &Path, account: &str) {
        let body = json!({
            "account_id": account,
            "public_key": "ed25519:8hSHprDq2StXwMtNd43wDTXQYsjXcD4MJTXQYsjXcc",
            "private_key": "ed25519:3D4YudUahN1nawWogh8pAKSj92sUNMdbZGjn7kERKzYo"
        });
        fs::write(
            dir.join(format!("{account}.json")),
            serde_json::to_vec(&body).unwrap(),
        )
        .unwrap();
    }

    fn alice() -> AccountId {
        AccountId::parse("alice.near").unwrap()
    }

    #[tokio::test]
    async fn restore__empty_store_resolves_signed_out() {
        // given
        let ctx = TestContext::new();
        let wallet = ctx.wallet("mainnet");
        let changes = wallet.account_changes();

        // when
        let restored = wallet.restore().await.unwrap();

        // then
        assert_eq!(restored, None);
        assert!(changes.has_changed().unwrap());
        assert!(!wallet.is_connected());
    }

    #[tokio::test]
    async fn connect__persists_session_for_next_run() {
        // given
        let ctx = TestContext::new();
        ctx.add_key("alice.near");
        let wallet = ctx.wallet("mainnet");
        let mut events = wallet.subscribe();

        // when
        wallet.connect(&alice()).await.unwrap();
        let next_run = ctx.wallet("mainnet");
        let restored = next_run.restore().await.unwrap();

        // then
        assert_eq!(events.try_recv().unwrap(), SessionEvent::Connected(alice()));
        assert_eq!(restored, Some(alice()));
        assert_eq!(next_run.account_id(), Some(alice()));
    }

    #[tokio::test]
    async fn connect__without_key_file_is_not_found() {
        // given
        let ctx = TestContext::new();
        let wallet = ctx.wallet("mainnet");

        // when
        let err = wallet.connect(&alice()).await.unwrap_err();

        // then
        assert_eq!(err.kind(), WalletErrorKind::NotFound);
        assert_eq!(wallet.account_id(), None);
    }

    #[tokio::test]
    async fn restore__ignores_session_from_other_network() {
        // given
        let ctx = TestContext::new();
        ctx.add_key("alice.near");
        ctx.wallet("testnet").connect(&alice()).await.unwrap();

        // when
        let restored = ctx.wallet("mainnet").restore().await.unwrap();

        // then
        assert_eq!(restored, None);
    }

    #[tokio::test]
    async fn restore__removed_key_file_fails_without_identity() {
        // given
        let ctx = TestContext::new();
        ctx.add_key("alice.near");
        ctx.wallet("mainnet").connect(&alice()).await.unwrap();
        fs::remove_file(ctx.credentials.join("alice.near.json")).unwrap();
        let wallet = ctx.wallet("mainnet");

        // when
        let err = wallet.restore().await.unwrap_err();

        // then
        assert_eq!(err.kind(), WalletErrorKind::NotFound);
        assert_eq!(wallet.account_id(), None);
    }

    #[tokio::test]
    async fn disconnect__clears_session_and_notifies() {
        // given
        let ctx = TestContext::new();
        ctx.add_key("alice.near");
        let wallet = ctx.wallet("mainnet");
        wallet.connect(&alice()).await.unwrap();
        let mut events = wallet.subscribe();

        // when
        wallet.disconnect().await.unwrap();

        // then
        assert_eq!(events.try_recv().unwrap(), SessionEvent::Disconnected);
        assert_eq!(ctx.wallet("mainnet").restore().await.unwrap(), None);
    }

    #[tokio::test]
    async fn send_transaction__requires_connected_signer() {
        // given
        let ctx = TestContext::new();
        let wallet = ctx.wallet("mainnet");
        let request = TransactionRequest {
            signer_id: alice(),
            receiver_id: "berryclub.ek.near".to_string(),
            actions: vec![build_action(Intent::BuyTokens, 0, 50)],
        };

        // when
        let err = wallet.send_transaction(request).await.unwrap_err();

        // then
        assert_eq!(err.kind(), WalletErrorKind::NotConnected);
    }

    #[tokio::test]
    async fn send_transaction__missing_cli_is_unavailable() {
        // given
        let ctx = TestContext::new();
        ctx.add_key("alice.near");
        let wallet = ctx.wallet("mainnet");
        wallet.connect(&alice()).await.unwrap();
        let request = TransactionRequest {
            signer_id: alice(),
            receiver_id: "berryclub.ek.near".to_string(),
            actions: vec![build_action(Intent::DrawPixel, 7, 50)],
        };

        // when
        let err = wallet.send_transaction(request).await.unwrap_err();

        // then
        assert_eq!(err.kind(), WalletErrorKind::Unavailable);
    }

    #[test]
    fn check_credentials__summarises_the_public_key() {
        // given
        let ctx = TestContext::new();
        ctx.add_key("alice.near");

        // when
        let summary = ctx.wallet("mainnet").check_credentials(&alice()).unwrap();

        // then
        assert_eq!(summary.account_id, alice());
        assert_eq!(
            summary.public_key,
            "ed25519:8hSHprDq2StXwMtNd43wDTXQYsjXcD4MJTXQYsjXcc"
        );
    }

    #[test]
    fn available_accounts__lists_key_files() {
        // given
        let ctx = TestContext::new();
        ctx.add_key("bob.near");
        ctx.add_key("alice.near");

        // when
        let accounts = ctx.wallet("mainnet").available_accounts().unwrap();

        // then
        assert_eq!(
            accounts,
            vec![alice(), AccountId::parse("bob.near").unwrap()]
        );
    }
}
