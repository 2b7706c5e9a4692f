use crate::{
    keychain_wallet::KeychainWallet,
    near_cli::NearCli,
    rpc_client::{
        DEFAULT_MAINNET_RPC_URL,
        DEFAULT_TESTNET_RPC_URL,
        RpcClient,
    },
    session_store::SessionStore,
    ui,
};
use berryclub::{
    ActionSubmitter,
    Intent,
    Reconciler,
    ReconcilerConfig,
    RefreshHandle,
    RefreshReason,
    ViewSurface,
    ledger::{
        AccountId,
        DEFAULT_CONTRACT_ID,
    },
    reconciler::{
        forward_session_events,
        spawn_reconcile_worker,
    },
    session::{
        WalletSession,
        start_restore,
    },
    submitter::SubmitterConfig,
    surface::ActivityLevel,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use std::{
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tracing::{
    error,
    info,
    warn,
};

pub const DEFAULT_DATA_DIR: &str = "~/.berryclub";
pub const DEFAULT_NEAR_CLI: &str = "near";

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NetworkTarget {
    Mainnet { url: String },
    Testnet { url: String },
}

impl NetworkTarget {
    pub fn mainnet(url: Option<String>) -> Self {
        NetworkTarget::Mainnet {
            url: url.unwrap_or_else(|| DEFAULT_MAINNET_RPC_URL.to_string()),
        }
    }

    pub fn testnet(url: Option<String>) -> Self {
        NetworkTarget::Testnet {
            url: url.unwrap_or_else(|| DEFAULT_TESTNET_RPC_URL.to_string()),
        }
    }

    /// Network id as the NEAR CLI and the credentials directory spell it.
    pub fn name(&self) -> &'static str {
        match self {
            NetworkTarget::Mainnet { .. } => "mainnet",
            NetworkTarget::Testnet { .. } => "testnet",
        }
    }

    pub fn rpc_url(&self) -> &str {
        match self {
            NetworkTarget::Mainnet { url } | NetworkTarget::Testnet { url } => url,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub network: NetworkTarget,
    pub contract_id: String,
    pub credentials_dir: PathBuf,
    pub data_dir: PathBuf,
    pub near_cli: PathBuf,
    pub refresh_interval: Option<Duration>,
}

impl AppConfig {
    pub fn new(network: NetworkTarget, credentials_dir: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            network,
            contract_id: DEFAULT_CONTRACT_ID.to_string(),
            credentials_dir,
            data_dir,
            near_cli: PathBuf::from(DEFAULT_NEAR_CLI),
            refresh_interval: None,
        }
    }
}

/// Everything the event loop needs to act on user input.
struct AppController {
    wallet: Arc<KeychainWallet>,
    surface: ViewSurface,
    submitter: ActionSubmitter,
    refresh: RefreshHandle,
}

impl AppController {
    fn new(config: &AppConfig) -> Result<(Self, tokio::task::JoinHandle<()>)> {
        let ledger = Arc::new(RpcClient::new(config.network.rpc_url())?);
        let store = SessionStore::new(&config.data_dir)
            .wrap_err("failed to open the session store")?;
        let wallet = Arc::new(KeychainWallet::new(
            config.network.name(),
            config.credentials_dir.clone(),
            store,
            NearCli::new(config.near_cli.clone(), config.network.name()),
        ));
        let surface = ViewSurface::new();

        let gate = start_restore(wallet.clone());
        let reconciler = Reconciler::new(
            ledger,
            wallet.clone(),
            gate,
            surface.clone(),
            ReconcilerConfig {
                contract_id: config.contract_id.clone(),
                ..ReconcilerConfig::default()
            },
        );
        let (refresh, worker) = spawn_reconcile_worker(reconciler, config.refresh_interval);
        let submitter = ActionSubmitter::new(
            wallet.clone(),
            surface.clone(),
            refresh.clone(),
            SubmitterConfig {
                contract_id: config.contract_id.clone(),
                ..SubmitterConfig::default()
            },
        );
        let controller = Self {
            wallet,
            surface,
            submitter,
            refresh,
        };
        Ok((controller, worker))
    }

    fn submit(&self, intent: Intent) {
        let submitter = self.submitter.clone();
        tokio::spawn(async move {
            submitter.submit(intent).await;
        });
    }

    fn sign_in(&self, account: AccountId) {
        let wallet = self.wallet.clone();
        let surface = self.surface.clone();
        tokio::spawn(async move {
            match wallet.connect(&account).await {
                Ok(account) => {
                    surface.push_activity(ActivityLevel::Info, format!("Signed in as {account}"));
                }
                Err(err) => {
                    warn!(%account, error = %err, "sign in failed");
                    surface.push_activity(ActivityLevel::Error, format!("Sign in failed: {err}"));
                }
            }
        });
    }

    fn sign_out(&self) {
        let wallet = self.wallet.clone();
        let surface = self.surface.clone();
        tokio::spawn(async move {
            match wallet.disconnect().await {
                Ok(()) => surface.push_activity(ActivityLevel::Info, "Signed out"),
                Err(err) => {
                    warn!(error = %err, "sign out failed");
                    surface.push_activity(ActivityLevel::Error, format!("Sign out failed: {err}"));
                }
            }
        });
    }

    fn open_sign_in(&self, ui_state: &mut ui::UiState) {
        match self.wallet.available_accounts() {
            Ok(accounts) => ui_state.open_account_picker(accounts),
            Err(err) => {
                error!(error = %err, "failed to list credentials");
                self.surface.push_activity(
                    ActivityLevel::Error,
                    format!("Could not list accounts: {err}"),
                );
            }
        }
    }
}

pub async fn run_app(config: AppConfig) -> Result<()> {
    info!(
        network = config.network.name(),
        rpc = config.network.rpc_url(),
        contract = %config.contract_id,
        "Starting client"
    );
    let (controller, worker) = AppController::new(&config)?;
    let forwarder = forward_session_events(controller.wallet.as_ref(), controller.refresh.clone());
    controller.refresh.request(RefreshReason::Startup);

    let mut ui_state = ui::UiState::default();
    let mut input_events = ui::input_event_stream();
    ui::terminal_enter(&mut ui_state)?;
    info!("UI ready");
    let res = run_loop(&controller, &mut ui_state, &mut input_events).await;
    ui::terminal_exit()?;

    controller.refresh.shutdown();
    forwarder.abort();
    if let Err(err) = worker.await {
        warn!(?err, "reconcile worker did not stop cleanly");
    }
    res
}

async fn run_loop(
    controller: &AppController,
    ui_state: &mut ui::UiState,
    input_events: &mut ui::InputEventReceiver,
) -> Result<()> {
    let mut view_rx = controller.surface.subscribe();
    let mut snapshot = view_rx.borrow_and_update().clone();
    ui::draw(ui_state, &snapshot).wrap_err("initial draw failed")?;

    loop {
        tokio::select! {
            changed = view_rx.changed() => {
                if changed.is_err() {
                    warn!("view surface closed");
                    break;
                }
                snapshot = view_rx.borrow_and_update().clone();
                ui::draw(ui_state, &snapshot).wrap_err("draw after view update failed")?;
            }
            _ = tokio::signal::ctrl_c() => break,
            raw_ev = ui::next_raw_event(input_events) => {
                let event = raw_ev?;
                let Some(ev) = ui::interpret_event(ui_state, event) else {
                    continue;
                };
                match ev {
                    ui::UserEvent::Quit => break,
                    ui::UserEvent::Refresh => {
                        controller.refresh.request(RefreshReason::Manual);
                    }
                    ui::UserEvent::Buy => controller.submit(Intent::BuyTokens),
                    ui::UserEvent::Draw => controller.submit(Intent::DrawPixel),
                    ui::UserEvent::OpenSignIn => {
                        controller.open_sign_in(ui_state);
                        ui::draw(ui_state, &snapshot).wrap_err("draw after opening sign in failed")?;
                    }
                    ui::UserEvent::SignIn(account) => {
                        controller.sign_in(account);
                        ui::draw(ui_state, &snapshot).wrap_err("draw after sign in failed")?;
                    }
                    ui::UserEvent::SignOut => {
                        controller.sign_out();
                        ui::draw(ui_state, &snapshot).wrap_err("draw after sign out failed")?;
                    }
                    ui::UserEvent::Redraw => {
                        ui::draw(ui_state, &snapshot).wrap_err("redraw failed")?;
                    }
                }
            }
        }
    }
    Ok(())
}
