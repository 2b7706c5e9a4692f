//! Scriptable in-memory ledger and wallet for tests.

use crate::{
    ledger::{
        AccountId,
        LedgerError,
        LedgerView,
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
use async_trait::async_trait;
use base64::{
    Engine,
    engine::general_purpose::STANDARD,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    collections::{
        HashMap,
        VecDeque,
    },
    time::Duration,
};
use tokio::sync::{
    broadcast,
    watch,
};

/// Base64 row token: a 4 byte header followed by one 8 byte record per
/// color.
pub fn encode_line(colors: &[u32]) -> String {
    let mut bytes = (colors.len() as u32).to_le_bytes().to_vec();
    for color in colors {
        bytes.extend_from_slice(&color.to_le_bytes());
        bytes.extend_from_slice(&[0; 4]);
    }
    STANDARD.encode(bytes)
}

#[derive(Clone, Debug)]
pub struct Reply {
    result: Result<Value, String>,
    delay: Option<Duration>,
}

impl Reply {
    pub fn ok(value: Value) -> Self {
        Self {
            result: Ok(value),
            delay: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            result: Err(message.into()),
            delay: None,
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Default)]
struct FakeLedgerState {
    standing: HashMap<String, Reply>,
    queued: HashMap<String, VecDeque<Reply>>,
    calls: Vec<(String, Value)>,
}

/// Answers view calls from scripted replies. Queued one-shot replies are
/// used before the standing reply for a method.
#[derive(Default)]
pub struct FakeLedger {
    state: Mutex<FakeLedgerState>,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, method: &str, reply: Reply) {
        self.state.lock().standing.insert(method.to_string(), reply);
    }

    pub fn once(&self, method: &str, reply: Reply) {
        self.state
            .lock()
            .queued
            .entry(method.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(called, _)| called == method)
            .count()
    }

    pub fn calls_to(&self, method: &str) -> Vec<Value> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(called, _)| called == method)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().calls.len()
    }
}

#[async_trait]
impl LedgerView for FakeLedger {
    async fn view(
        &self,
        _contract_id: &str,
        method: &str,
        args: Value,
    ) -> Result<Value, LedgerError> {
        let reply = {
            let mut state = self.state.lock();
            state.calls.push((method.to_string(), args));
            let queued = state
                .queued
                .get_mut(method)
                .and_then(VecDeque::pop_front);
            queued.or_else(|| state.standing.get(method).cloned())
        };
        let Some(reply) = reply else {
            return Err(LedgerError::Rpc(format!("no reply scripted for {method}")));
        };
        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        reply.result.map_err(LedgerError::Rpc)
    }
}

struct FakeWalletState {
    restore_result: Result<Option<AccountId>, WalletError>,
    restore_delay: Option<Duration>,
    restore_calls: usize,
    send_replies: VecDeque<Result<TransactionResult, WalletError>>,
    send_delay: Option<Duration>,
    sent: Vec<TransactionRequest>,
}

/// Wallet whose restore, identity and transaction replies are scripted.
/// Unscripted sends succeed.
pub struct FakeWallet {
    channels: SessionChannels,
    state: Mutex<FakeWalletState>,
}

impl Default for FakeWallet {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeWallet {
    pub fn new() -> Self {
        Self {
            channels: SessionChannels::new(),
            state: Mutex::new(FakeWalletState {
                restore_result: Ok(None),
                restore_delay: None,
                restore_calls: 0,
                send_replies: VecDeque::new(),
                send_delay: None,
                sent: Vec::new(),
            }),
        }
    }

    pub fn restore_to(&self, account: Option<AccountId>) {
        self.state.lock().restore_result = Ok(account);
    }

    pub fn fail_restore(&self, err: WalletError) {
        self.state.lock().restore_result = Err(err);
    }

    pub fn restore_after(&self, delay: Duration) {
        self.state.lock().restore_delay = Some(delay);
    }

    pub fn restore_calls(&self) -> usize {
        self.state.lock().restore_calls
    }

    /// Change the identity the way an external account switch would.
    pub fn resolve_account(&self, account: Option<AccountId>) {
        self.channels.resolve(account);
    }

    pub fn reply_to_send(&self, reply: Result<TransactionResult, WalletError>) {
        self.state.lock().send_replies.push_back(reply);
    }

    pub fn send_after(&self, delay: Duration) {
        self.state.lock().send_delay = Some(delay);
    }

    pub fn sent(&self) -> Vec<TransactionRequest> {
        self.state.lock().sent.clone()
    }
}

#[async_trait]
impl WalletSession for FakeWallet {
    async fn restore(&self) -> Result<Option<AccountId>, WalletError> {
        let (result, delay) = {
            let mut state = self.state.lock();
            state.restore_calls += 1;
            (state.restore_result.clone(), state.restore_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.channels
            .resolve(result.as_ref().ok().cloned().flatten());
        result
    }

    async fn connect(&self, account_id: &AccountId) -> Result<AccountId, WalletError> {
        self.channels.set_connected(account_id.clone());
        Ok(account_id.clone())
    }

    async fn disconnect(&self) -> Result<(), WalletError> {
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
        if self.account_id().is_none() {
            return Err(WalletError::new(
                WalletErrorKind::NotConnected,
                "wallet is not connected",
            ));
        }
        let (reply, delay) = {
            let mut state = self.state.lock();
            state.sent.push(request);
            (state.send_replies.pop_front(), state.send_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        reply.unwrap_or_else(|| {
            Ok(TransactionResult {
                transaction_hash: Some("FakeTx1111".to_string()),
                output: String::new(),
            })
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.channels.subscribe()
    }

    fn account_changes(&self) -> watch::Receiver<Option<AccountId>> {
        self.channels.account_changes()
    }
}
