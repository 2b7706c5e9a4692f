use crate::{
    BOARD_HEIGHT,
    ledger::{
        Action,
        DEFAULT_CONTRACT_ID,
        FunctionCall,
        METHOD_BUY_TOKENS,
        METHOD_DRAW,
        ONE_NEAR,
        TGAS,
        TransactionRequest,
        TransactionResult,
    },
    reconciler::{
        RefreshHandle,
        RefreshReason,
    },
    session::{
        WalletError,
        WalletErrorKind,
        WalletSession,
    },
    surface::{
        ActivityLevel,
        ControlId,
        ViewSurface,
    },
};
use rand::Rng;
use regex::Regex;
use serde_json::json;
use std::{
    fmt,
    sync::{
        Arc,
        LazyLock,
    },
    time::Duration,
};
use tracing::{
    debug,
    error,
    info,
    warn,
};

pub const ACTION_GAS: u64 = 100 * TGAS;
pub const BUY_DEPOSIT: u128 = ONE_NEAR / 10;
pub const DRAW_COLOR: u32 = 0x00ff00;
pub const DEFAULT_SUBMIT_TIMEOUT: Duration = Duration::from_secs(120);

static CANCELLATION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)reject|cancel").ok());

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Intent {
    BuyTokens,
    DrawPixel,
}

impl Intent {
    pub fn control(self) -> ControlId {
        match self {
            Intent::BuyTokens => ControlId::Buy,
            Intent::DrawPixel => ControlId::Draw,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::BuyTokens => write!(f, "Buy"),
            Intent::DrawPixel => write!(f, "Draw"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PixelCoordinate {
    pub x: u32,
    pub y: u32,
}

/// Map a value in `[0, height²)` onto the board: column `v mod H`, row
/// `(v / H) mod H`.
pub fn draw_coordinate(value: u64, height: u32) -> PixelCoordinate {
    let height = u64::from(height.max(1));
    PixelCoordinate {
        x: (value % height) as u32,
        y: ((value / height) % height) as u32,
    }
}

pub fn random_draw_value(height: u32) -> u64 {
    let height = u64::from(height.max(1));
    rand::rng().random_range(0..height * height)
}

/// The single action submitted for `intent`. `scalar` only matters for a
/// draw, where it picks the pixel.
pub fn build_action(intent: Intent, scalar: u64, height: u32) -> Action {
    let call = match intent {
        Intent::BuyTokens => FunctionCall {
            method_name: METHOD_BUY_TOKENS.to_string(),
            gas: ACTION_GAS,
            deposit: BUY_DEPOSIT,
            args: json!({}),
        },
        Intent::DrawPixel => {
            let PixelCoordinate { x, y } = draw_coordinate(scalar, height);
            FunctionCall {
                method_name: METHOD_DRAW.to_string(),
                gas: ACTION_GAS,
                deposit: 0,
                args: json!({
                    "pixels": [{ "x": x, "y": y, "color": DRAW_COLOR }]
                }),
            }
        }
    };
    Action::FunctionCall(call)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureClass {
    Cancelled,
    Failed,
}

/// Structured kind first. Only errors the provider left unclassified fall
/// back to matching the message text.
pub fn classify_failure(err: &WalletError) -> FailureClass {
    match err.kind() {
        WalletErrorKind::UserRejected => FailureClass::Cancelled,
        WalletErrorKind::Unclassified if mentions_cancellation(err.message()) => {
            FailureClass::Cancelled
        }
        _ => FailureClass::Failed,
    }
}

fn mentions_cancellation(message: &str) -> bool {
    CANCELLATION
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(message))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Succeeded(TransactionResult),
    Cancelled(String),
    Failed(String),
    NotSignedIn,
    /// The control was already busy with an earlier submission.
    Busy,
}

/// Holds a control in its busy state until dropped.
struct BusyGuard<'a> {
    surface: &'a ViewSurface,
    control: ControlId,
}

impl<'a> BusyGuard<'a> {
    fn acquire(surface: &'a ViewSurface, control: ControlId) -> Option<Self> {
        surface
            .try_mark_busy(control)
            .then_some(Self { surface, control })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.surface.release_busy(self.control);
    }
}

#[derive(Clone, Debug)]
pub struct SubmitterConfig {
    pub contract_id: String,
    pub board_height: u32,
    pub submit_timeout: Duration,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            contract_id: DEFAULT_CONTRACT_ID.to_string(),
            board_height: BOARD_HEIGHT,
            submit_timeout: DEFAULT_SUBMIT_TIMEOUT,
        }
    }
}

#[derive(Clone)]
pub struct ActionSubmitter {
    wallet: Arc<dyn WalletSession>,
    surface: ViewSurface,
    refresh: RefreshHandle,
    config: Arc<SubmitterConfig>,
}

impl ActionSubmitter {
    pub fn new(
        wallet: Arc<dyn WalletSession>,
        surface: ViewSurface,
        refresh: RefreshHandle,
        config: SubmitterConfig,
    ) -> Self {
        Self {
            wallet,
            surface,
            refresh,
            config: Arc::new(config),
        }
    }

    pub async fn submit(&self, intent: Intent) -> SubmitOutcome {
        let Some(signer_id) = self.wallet.account_id() else {
            warn!(%intent, "Not signed in");
            self.surface
                .push_activity(ActivityLevel::Warn, "Not signed in");
            return SubmitOutcome::NotSignedIn;
        };
        let Some(_busy) = BusyGuard::acquire(&self.surface, intent.control()) else {
            debug!(%intent, "submission already in flight");
            return SubmitOutcome::Busy;
        };

        let scalar = random_draw_value(self.config.board_height);
        let request = TransactionRequest {
            signer_id,
            receiver_id: self.config.contract_id.clone(),
            actions: vec![build_action(intent, scalar, self.config.board_height)],
        };

        match self.send(request).await {
            Ok(result) => {
                info!(%intent, %result, "Transaction succeeded");
                self.surface
                    .push_activity(ActivityLevel::Info, format!("{intent}: {result}"));
                self.refresh.request(RefreshReason::TransactionSettled);
                SubmitOutcome::Succeeded(result)
            }
            Err(err) => match classify_failure(&err) {
                FailureClass::Cancelled => {
                    info!(%intent, reason = %err, "User cancelled transaction");
                    self.surface.push_activity(
                        ActivityLevel::Info,
                        format!("{intent} cancelled"),
                    );
                    SubmitOutcome::Cancelled(err.message().to_string())
                }
                FailureClass::Failed => {
                    error!(%intent, kind = ?err.kind(), error = %err, "Transaction failed");
                    self.surface.push_activity(
                        ActivityLevel::Error,
                        format!("{intent} failed: {err}"),
                    );
                    SubmitOutcome::Failed(err.message().to_string())
                }
            },
        }
    }

    async fn send(&self, request: TransactionRequest) -> Result<TransactionResult, WalletError> {
        let timeout = self.config.submit_timeout;
        match tokio::time::timeout(timeout, self.wallet.send_transaction(request)).await {
            Ok(result) => result,
            Err(_) => Err(WalletError::new(
                WalletErrorKind::Timeout,
                format!("no answer from the wallet after {timeout:?}"),
            )),
        }
    }
}
