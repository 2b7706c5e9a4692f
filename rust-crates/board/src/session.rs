use crate::ledger::{
    AccountId,
    TransactionRequest,
    TransactionResult,
};
use async_trait::async_trait;
use std::{
    fmt,
    sync::Arc,
};
use tokio::sync::{
    broadcast,
    watch,
};
use tracing::{
    debug,
    info,
    warn,
};

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum SessionState {
    #[default]
    Unresolved,
    Connected(AccountId),
    Disconnected,
}

impl SessionState {
    pub fn from_account(account: Option<AccountId>) -> Self {
        match account {
            Some(id) => SessionState::Connected(id),
            None => SessionState::Disconnected,
        }
    }

    pub fn account_id(&self) -> Option<&AccountId> {
        match self {
            SessionState::Connected(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, SessionState::Unresolved)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WalletErrorKind {
    /// The user declined to sign.
    UserRejected,
    NotConnected,
    NotFound,
    /// The signer could not be reached at all.
    Unavailable,
    Storage,
    Timeout,
    /// Provider gave no structured reason; only the message is known.
    Unclassified,
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("{message}")]
pub struct WalletError {
    kind: WalletErrorKind,
    message: String,
}

impl WalletError {
    pub fn new(kind: WalletErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unclassified(message: impl Into<String>) -> Self {
        Self::new(WalletErrorKind::Unclassified, message)
    }

    pub fn kind(&self) -> WalletErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SessionEvent {
    Connected(AccountId),
    Disconnected,
}

/// The wallet the user signs in with. Restore is called once per process.
#[async_trait]
pub trait WalletSession: Send + Sync {
    async fn restore(&self) -> Result<Option<AccountId>, WalletError>;

    async fn connect(&self, account_id: &AccountId) -> Result<AccountId, WalletError>;

    async fn disconnect(&self) -> Result<(), WalletError>;

    fn account_id(&self) -> Option<AccountId>;

    fn is_connected(&self) -> bool {
        self.account_id().is_some()
    }

    async fn send_transaction(
        &self,
        request: TransactionRequest,
    ) -> Result<TransactionResult, WalletError>;

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;

    /// Current identity, updated on every change including the initial
    /// restore.
    fn account_changes(&self) -> watch::Receiver<Option<AccountId>>;
}

/// Identity plus the two notification channels every wallet implementation
/// has to provide.
pub struct SessionChannels {
    account: watch::Sender<Option<AccountId>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Default for SessionChannels {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionChannels {
    pub fn new() -> Self {
        let (account, _) = watch::channel(None);
        let (events, _) = broadcast::channel(16);
        Self { account, events }
    }

    pub fn current(&self) -> Option<AccountId> {
        self.account.borrow().clone()
    }

    /// Record the restored identity without emitting connect/disconnect.
    pub fn resolve(&self, account: Option<AccountId>) {
        self.account.send_replace(account);
    }

    pub fn set_connected(&self, account: AccountId) {
        self.account.send_replace(Some(account.clone()));
        let _ = self.events.send(SessionEvent::Connected(account));
    }

    pub fn set_disconnected(&self) {
        self.account.send_replace(None);
        let _ = self.events.send(SessionEvent::Disconnected);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn account_changes(&self) -> watch::Receiver<Option<AccountId>> {
        self.account.subscribe()
    }
}

/// Awaitable handle on the one-time session restore.
#[derive(Clone, Debug)]
pub struct RestoreGate {
    settled: watch::Receiver<bool>,
}

/// Write half of [`RestoreGate`]; settling consumes it.
#[derive(Debug)]
pub struct RestoreSettler {
    settled: watch::Sender<bool>,
}

impl RestoreGate {
    pub fn new() -> (RestoreSettler, RestoreGate) {
        let (tx, rx) = watch::channel(false);
        (RestoreSettler { settled: tx }, RestoreGate { settled: rx })
    }

    /// A gate that is already open.
    pub fn settled() -> RestoreGate {
        let (settler, gate) = Self::new();
        settler.settle();
        gate
    }

    pub fn is_settled(&self) -> bool {
        *self.settled.borrow()
    }

    pub async fn wait(&self) {
        let mut settled = self.settled.clone();
        if settled.wait_for(|done| *done).await.is_err() {
            // settler dropped without settling; nothing left to wait for
            debug!("restore settler dropped before settling");
        }
    }
}

impl RestoreSettler {
    pub fn settle(self) {
        self.settled.send_replace(true);
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unresolved => write!(f, "unresolved"),
            SessionState::Connected(id) => write!(f, "connected as {id}"),
            SessionState::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Kick off the one and only session restore and return the gate that
/// opens once it settles, whatever the outcome.
pub fn start_restore(wallet: Arc<dyn WalletSession>) -> RestoreGate {
    let (settler, gate) = RestoreGate::new();
    tokio::spawn(async move {
        match wallet.restore().await {
            Ok(Some(account)) => info!(%account, "Restored wallet session"),
            Ok(None) => debug!("no wallet session to restore"),
            Err(err) => warn!(error = %err, "Wallet restore failed"),
        }
        settler.settle();
    });
    gate
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::test_helpers::FakeWallet;
    use std::time::Duration;

    #[tokio::test]
    async fn restore_gate__wait_returns_after_settle() {
        // given
        let (settler, gate) = RestoreGate::new();
        assert!(!gate.is_settled());

        // when
        settler.settle();

        // then
        gate.wait().await;
        assert!(gate.is_settled());
    }

    #[tokio::test]
    async fn restore_gate__dropped_settler_does_not_hang() {
        // given
        let (settler, gate) = RestoreGate::new();

        // when
        drop(settler);

        // then
        tokio::time::timeout(Duration::from_secs(1), gate.wait())
            .await
            .expect("gate wait should return");
    }

    #[tokio::test]
    async fn start_restore__settles_even_when_restore_fails() {
        // given
        let wallet = Arc::new(FakeWallet::new());
        wallet.fail_restore(WalletError::unclassified("storage exploded"));

        // when
        let gate = start_restore(wallet.clone());
        gate.wait().await;

        // then
        assert!(gate.is_settled());
        assert_eq!(wallet.account_id(), None);
        assert_eq!(wallet.restore_calls(), 1);
    }

    #[test]
    fn session_channels__connect_notifies_both_streams() {
        // given
        let channels = SessionChannels::new();
        let mut events = channels.subscribe();
        let changes = channels.account_changes();
        let alice = AccountId::parse("alice").unwrap();

        // when
        channels.set_connected(alice.clone());

        // then
        assert_eq!(events.try_recv().unwrap(), SessionEvent::Connected(alice.clone()));
        assert_eq!(*changes.borrow(), Some(alice));
    }
}
