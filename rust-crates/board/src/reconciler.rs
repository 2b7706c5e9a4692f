use crate::{
    BOARD_HEIGHT,
    display::{
        DEFAULT_BALANCE,
        SUPPLY_FALLBACK,
        balance_text,
        supply_text,
    },
    ledger::{
        DEFAULT_CONTRACT_ID,
        LedgerError,
        LedgerView,
        METHOD_GET_ACCOUNT,
        METHOD_GET_LINES,
        METHOD_TOTAL_SUPPLY,
        account_args,
        lines_args,
        parse_lines,
        total_supply_args,
    },
    line_decoder::BoardSnapshot,
    session::{
        RestoreGate,
        SessionState,
        WalletSession,
    },
    surface::{
        ReconciledFields,
        ViewSurface,
    },
};
use serde_json::Value;
use std::{
    sync::{
        Arc,
        atomic::{
            AtomicUsize,
            Ordering,
        },
    },
    time::Duration,
};
use tokio::{
    sync::{
        broadcast,
        mpsc,
    },
    task::JoinHandle,
    time,
};
use tracing::{
    debug,
    error,
    info,
    warn,
};

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    pub contract_id: String,
    pub board_height: u32,
    pub read_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            contract_id: DEFAULT_CONTRACT_ID.to_string(),
            board_height: BOARD_HEIGHT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PassOutcome {
    Committed,
    /// A newer pass was issued before this one could commit.
    Superseded,
}

/// Drives reconciliation passes: waits for the session restore, reads supply,
/// balance and board concurrently and commits the merged result to the
/// [`ViewSurface`].
#[derive(Clone)]
pub struct Reconciler {
    ledger: Arc<dyn LedgerView>,
    wallet: Arc<dyn WalletSession>,
    gate: RestoreGate,
    surface: ViewSurface,
    config: Arc<ReconcilerConfig>,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<dyn LedgerView>,
        wallet: Arc<dyn WalletSession>,
        gate: RestoreGate,
        surface: ViewSurface,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            ledger,
            wallet,
            gate,
            surface,
            config: Arc::new(config),
        }
    }

    pub fn surface(&self) -> &ViewSurface {
        &self.surface
    }

    pub async fn reconcile(&self) -> PassOutcome {
        let pass = self.surface.begin_pass();
        self.gate.wait().await;

        let session = SessionState::from_account(self.wallet.account_id());
        let account = session.account_id().cloned();
        if !self.surface.commit_session(pass, session) {
            debug!(pass, "pass superseded before rendering session");
            return PassOutcome::Superseded;
        }

        let balance_read = async {
            match &account {
                Some(account) => Some(
                    self.read(METHOD_GET_ACCOUNT, account_args(account))
                        .await,
                ),
                None => None,
            }
        };
        let (supply, balance, lines) = tokio::join!(
            self.read(METHOD_TOTAL_SUPPLY, total_supply_args()),
            balance_read,
            self.read(METHOD_GET_LINES, lines_args(self.config.board_height)),
        );

        let fields = ReconciledFields {
            supply: merge_supply(supply),
            balance: merge_balance(balance),
            board: merge_board(lines),
        };
        if self.surface.commit_fields(pass, fields) {
            debug!(pass, "reconciliation pass committed");
            PassOutcome::Committed
        } else {
            debug!(pass, "reconciliation pass superseded");
            PassOutcome::Superseded
        }
    }

    /// One view call with a bounded timeout, retried once.
    async fn read(&self, method: &str, args: Value) -> Result<Value, LedgerError> {
        match self.read_once(method, args.clone()).await {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(method, error = %err, "ledger read failed, retrying once");
                self.read_once(method, args).await
            }
        }
    }

    async fn read_once(&self, method: &str, args: Value) -> Result<Value, LedgerError> {
        let timeout = self.config.read_timeout;
        let call = self.ledger.view(&self.config.contract_id, method, args);
        match time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout {
                method: method.to_string(),
                timeout,
            }),
        }
    }
}

fn merge_supply(result: Result<Value, LedgerError>) -> String {
    match result {
        Ok(value) => supply_text(&value),
        Err(err) => {
            error!(method = METHOD_TOTAL_SUPPLY, error = %err, "Failed to load total supply");
            SUPPLY_FALLBACK.to_string()
        }
    }
}

// `None` means there was no identity to read a balance for.
fn merge_balance(result: Option<Result<Value, LedgerError>>) -> String {
    match result {
        None => DEFAULT_BALANCE.to_string(),
        Some(Ok(value)) => balance_text(Some(&value)),
        Some(Err(err)) => {
            error!(method = METHOD_GET_ACCOUNT, error = %err, "Failed to load balance");
            DEFAULT_BALANCE.to_string()
        }
    }
}

fn merge_board(result: Result<Value, LedgerError>) -> Option<BoardSnapshot> {
    match result.and_then(parse_lines) {
        Ok(lines) => Some(BoardSnapshot::from_lines(&lines)),
        Err(err) => {
            error!(method = METHOD_GET_LINES, error = %err, "Failed to load board");
            None
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RefreshReason {
    Startup,
    SessionEvent,
    AccountChanged,
    TransactionSettled,
    Manual,
    Tick,
}

#[derive(Debug)]
pub enum ReconcileCommand {
    Refresh(RefreshReason),
    Shutdown,
}

/// Sending half of the refresh worker's command channel.
#[derive(Clone, Debug)]
pub struct RefreshHandle {
    tx: mpsc::UnboundedSender<ReconcileCommand>,
}

impl RefreshHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ReconcileCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns false once the worker is gone.
    pub fn request(&self, reason: RefreshReason) -> bool {
        self.tx.send(ReconcileCommand::Refresh(reason)).is_ok()
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(ReconcileCommand::Shutdown);
    }
}

impl RefreshReason {
    /// Refreshes that any pass already in flight satisfies.
    fn is_coalesced(self) -> bool {
        matches!(self, RefreshReason::Tick | RefreshReason::Manual)
    }
}

/// Start one independent pass per refresh request, plus one per `tick` when
/// a periodic refresh is configured. Ticks and manual refreshes are dropped
/// while a pass is running.
pub async fn reconcile_worker(
    reconciler: Reconciler,
    mut cmd_rx: mpsc::UnboundedReceiver<ReconcileCommand>,
    tick: Option<Duration>,
) {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let mut ticker = tick.map(|period| {
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
        ticker
    });

    loop {
        let reason = tokio::select! {
            _ = next_tick(&mut ticker) => RefreshReason::Tick,
            cmd = cmd_rx.recv() => match cmd {
                Some(ReconcileCommand::Refresh(reason)) => reason,
                Some(ReconcileCommand::Shutdown) | None => break,
            },
        };
        if reason.is_coalesced() && in_flight.load(Ordering::SeqCst) > 0 {
            debug!(?reason, "pass already running, refresh skipped");
            continue;
        }
        spawn_pass(&reconciler, &in_flight, reason);
    }
    debug!("reconcile worker stopped");
}

async fn next_tick(ticker: &mut Option<time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn spawn_pass(reconciler: &Reconciler, in_flight: &Arc<AtomicUsize>, reason: RefreshReason) {
    let reconciler = reconciler.clone();
    let guard = InFlight::enter(in_flight);
    tokio::spawn(async move {
        let _guard = guard;
        let outcome = reconciler.reconcile().await;
        debug!(?reason, ?outcome, "reconciliation pass finished");
    });
}

pub fn spawn_reconcile_worker(
    reconciler: Reconciler,
    tick: Option<Duration>,
) -> (RefreshHandle, JoinHandle<()>) {
    let (handle, cmd_rx) = RefreshHandle::channel();
    let worker = tokio::spawn(reconcile_worker(reconciler, cmd_rx, tick));
    (handle, worker)
}

/// Request a pass for every session event and every account change the
/// wallet reports, until either stream or the worker goes away.
pub fn forward_session_events(
    wallet: &dyn WalletSession,
    refresh: RefreshHandle,
) -> JoinHandle<()> {
    let mut events = wallet.subscribe();
    let mut accounts = wallet.account_changes();
    tokio::spawn(async move {
        loop {
            let reason = tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => {
                        info!(?event, "Wallet session changed");
                        RefreshReason::SessionEvent
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed wallet session events");
                        RefreshReason::SessionEvent
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = accounts.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let account = accounts.borrow_and_update().clone();
                    debug!(?account, "wallet account changed");
                    RefreshReason::AccountChanged
                }
            };
            if !refresh.request(reason) {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        ledger::AccountId,
        test_helpers::{
            FakeLedger,
            FakeWallet,
            Reply,
            encode_line,
        },
    };
    use serde_json::json;

    fn reconciler(ledger: &Arc<FakeLedger>, wallet: &Arc<FakeWallet>) -> Reconciler {
        Reconciler::new(
            ledger.clone(),
            wallet.clone(),
            RestoreGate::settled(),
            ViewSurface::new(),
            ReconcilerConfig {
                board_height: 2,
                ..ReconcilerConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn reconcile__renders_all_three_fields() {
        // given
        let ledger = Arc::new(FakeLedger::new());
        ledger.set(METHOD_TOTAL_SUPPLY, Reply::ok(json!("1000000000000000000")));
        ledger.set(
            METHOD_GET_ACCOUNT,
            Reply::ok(json!({ "avocado_balance": "2500000000000000000" })),
        );
        ledger.set(
            METHOD_GET_LINES,
            Reply::ok(json!([encode_line(&[0x00ff00]), encode_line(&[0xff])])),
        );
        let wallet = Arc::new(FakeWallet::new());
        wallet.resolve_account(AccountId::parse("alice.near"));
        let reconciler = reconciler(&ledger, &wallet);

        // when
        let outcome = reconciler.reconcile().await;

        // then
        assert_eq!(outcome, PassOutcome::Committed);
        let view = reconciler.surface().snapshot();
        assert_eq!(view.supply, "1.0000 🥑");
        assert_eq!(view.balance, "2.5000 🥑");
        let board = view.board.snapshot.expect("board rendered");
        assert_eq!(board.height(), 2);
        assert_eq!(board.rows()[0][0].hex(), "00ff00");
        assert!(!view.board.stale);
        assert_eq!(
            ledger.calls_to(METHOD_GET_LINES),
            vec![json!({ "lines": [0, 1] })]
        );
    }

    #[tokio::test]
    async fn reconcile__timed_out_read_falls_back() {
        // given
        let ledger = Arc::new(FakeLedger::new());
        ledger.set(
            METHOD_TOTAL_SUPPLY,
            Reply::ok(json!("1")).after(Duration::from_secs(60)),
        );
        ledger.set(METHOD_GET_LINES, Reply::ok(json!([])));
        let wallet = Arc::new(FakeWallet::new());
        let reconciler = Reconciler::new(
            ledger.clone(),
            wallet,
            RestoreGate::settled(),
            ViewSurface::new(),
            ReconcilerConfig {
                read_timeout: Duration::from_millis(20),
                ..ReconcilerConfig::default()
            },
        );

        // when
        let outcome = reconciler.reconcile().await;

        // then
        assert_eq!(outcome, PassOutcome::Committed);
        assert_eq!(reconciler.surface().snapshot().supply, SUPPLY_FALLBACK);
        assert_eq!(ledger.call_count(METHOD_TOTAL_SUPPLY), 2);
    }

    #[tokio::test]
    async fn refresh_handle__request_fails_after_worker_stops() {
        // given
        let (handle, cmd_rx) = RefreshHandle::channel();

        // when
        drop(cmd_rx);

        // then
        assert!(!handle.request(RefreshReason::Manual));
    }

    #[tokio::test]
    async fn forward_session_events__connect_requests_refresh() {
        // given
        let wallet = Arc::new(FakeWallet::new());
        let (handle, mut cmd_rx) = RefreshHandle::channel();
        let _forwarder = forward_session_events(wallet.as_ref(), handle);
        let alice = AccountId::parse("alice.near").unwrap();

        // when
        wallet.connect(&alice).await.unwrap();

        // then
        let cmd = time::timeout(Duration::from_secs(1), cmd_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(cmd, ReconcileCommand::Refresh(_)));
    }
}
