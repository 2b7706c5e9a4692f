//! Signing goes through the NEAR command line wallet; this module builds its
//! invocation and reads back the result.

use berryclub::{
    ledger::{
        Action,
        ONE_NEAR,
        TGAS,
        TransactionRequest,
        TransactionResult,
    },
    session::{
        WalletError,
        WalletErrorKind,
    },
};
use regex::Regex;
use std::{
    io,
    path::PathBuf,
    process::Stdio,
    sync::LazyLock,
};
use tokio::process::Command;
use tracing::debug;

const YOCTO_DIGITS: usize = 24;

static TRANSACTION_ID: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?:Transaction ID:\s*|/txns?/|/transactions/)([1-9A-HJ-NP-Za-km-z]{32,44})").ok()
});

#[derive(Clone, Debug)]
pub struct NearCli {
    program: PathBuf,
    network: String,
}

impl NearCli {
    pub fn new(program: impl Into<PathBuf>, network: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            network: network.into(),
        }
    }

    /// Arguments for `near contract call-function as-transaction`, one per
    /// token, without any shell quoting.
    pub fn call_args(&self, request: &TransactionRequest) -> Result<Vec<String>, WalletError> {
        let [Action::FunctionCall(call)] = request.actions.as_slice() else {
            return Err(WalletError::unclassified(format!(
                "expected exactly one function call, got {} actions",
                request.actions.len()
            )));
        };
        Ok(vec![
            "contract".to_string(),
            "call-function".to_string(),
            "as-transaction".to_string(),
            request.receiver_id.clone(),
            call.method_name.clone(),
            "json-args".to_string(),
            call.args.to_string(),
            "prepaid-gas".to_string(),
            format_gas(call.gas),
            "attached-deposit".to_string(),
            format_near(call.deposit),
            "sign-as".to_string(),
            request.signer_id.to_string(),
            "network-config".to_string(),
            self.network.clone(),
            "sign-with-legacy-keychain".to_string(),
            "send".to_string(),
        ])
    }

    pub async fn send(&self, request: &TransactionRequest) -> Result<TransactionResult, WalletError> {
        let args = self.call_args(request)?;
        debug!(program = %self.program.display(), method = request.actions[0].method_name(), "invoking near cli");
        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| self.spawn_error(err))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(WalletError::unclassified(failure_summary(&stderr, &stdout)));
        }
        let combined = format!("{stdout}{stderr}");
        Ok(TransactionResult {
            transaction_hash: parse_transaction_hash(&combined),
            output: combined,
        })
    }

    fn spawn_error(&self, err: io::Error) -> WalletError {
        let kind = match err.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                WalletErrorKind::Unavailable
            }
            _ => WalletErrorKind::Unclassified,
        };
        WalletError::new(
            kind,
            format!("could not run {}: {err}", self.program.display()),
        )
    }
}

/// Yocto amount as the CLI expects it, e.g. `0.1 NEAR`.
pub fn format_near(yocto: u128) -> String {
    let whole = yocto / ONE_NEAR;
    let fraction = yocto % ONE_NEAR;
    if fraction == 0 {
        return format!("{whole} NEAR");
    }
    let digits = format!("{fraction:0width$}", width = YOCTO_DIGITS);
    format!("{whole}.{} NEAR", digits.trim_end_matches('0'))
}

pub fn format_gas(gas: u64) -> String {
    if gas % TGAS == 0 {
        format!("{} Tgas", gas / TGAS)
    } else {
        format!("{gas} gas")
    }
}

pub fn parse_transaction_hash(output: &str) -> Option<String> {
    let pattern = TRANSACTION_ID.as_ref()?;
    pattern
        .captures(output)
        .and_then(|captures| captures.get(1))
        .map(|hash| hash.as_str().to_string())
}

fn failure_summary(stderr: &str, stdout: &str) -> String {
    let last_line = |text: &str| {
        text.lines()
            .map(str::trim)
            .rev()
            .find(|line| !line.is_empty())
            .map(str::to_string)
    };
    last_line(stderr)
        .or_else(|| last_line(stdout))
        .unwrap_or_else(|| "near cli exited with an error".to_string())
}
