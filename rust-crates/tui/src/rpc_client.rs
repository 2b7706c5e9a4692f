use async_trait::async_trait;
use base64::{
    Engine,
    engine::general_purpose::STANDARD,
};
use berryclub::ledger::{
    LedgerError,
    LedgerView,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use serde::Deserialize;
use serde_json::{
    Value,
    json,
};

pub const DEFAULT_MAINNET_RPC_URL: &str = "https://rpc.mainnet.fastnear.com";
pub const DEFAULT_TESTNET_RPC_URL: &str = "https://rpc.testnet.fastnear.com";

const REQUEST_ID: &str = "berryclub";

/// Read-only NEAR JSON-RPC client for contract view calls.
#[derive(Clone)]
pub struct RpcClient {
    url: String,
    http: reqwest::Client,
}

impl RpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let url = url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .build()
            .wrap_err("failed to build HTTP client for rpc")?;
        Ok(Self { url, http })
    }
}

#[async_trait]
impl LedgerView for RpcClient {
    async fn view(
        &self,
        contract_id: &str,
        method: &str,
        args: Value,
    ) -> Result<Value, LedgerError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": REQUEST_ID,
            "method": "query",
            "params": {
                "request_type": "call_function",
                "finality": "final",
                "account_id": contract_id,
                "method_name": method,
                "args_base64": STANDARD.encode(args.to_string()),
            }
        });
        let res = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(format!("rpc request failed: {e}")))?;
        let status = res.status();
        let bytes = res
            .bytes()
            .await
            .map_err(|e| LedgerError::Transport(format!("failed to read rpc response body: {e}")))?;
        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes);
            return Err(LedgerError::Transport(format!(
                "rpc responded with {status} when calling {method}: {body}"
            )));
        }
        let dto: RpcResponseDto = serde_json::from_slice(&bytes)
            .map_err(|e| LedgerError::Decode(format!("invalid rpc payload for {method}: {e}")))?;
        dto.into_value(method)
    }
}

#[derive(Deserialize)]
struct RpcResponseDto {
    result: Option<CallResultDto>,
    error: Option<RpcErrorDto>,
}

#[derive(Deserialize)]
struct CallResultDto {
    #[serde(default)]
    result: Option<Vec<u8>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct RpcErrorDto {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    cause: Option<Value>,
}

impl RpcErrorDto {
    fn describe(&self) -> String {
        let detail = self
            .cause
            .as_ref()
            .or(self.data.as_ref())
            .map(|value| match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            });
        match (&self.message, detail) {
            (Some(message), Some(detail)) => format!("{message}: {detail}"),
            (Some(message), None) => message.clone(),
            (None, Some(detail)) => detail,
            (None, None) => "unknown rpc error".to_string(),
        }
    }
}

impl RpcResponseDto {
    fn into_value(self, method: &str) -> Result<Value, LedgerError> {
        if let Some(error) = self.error {
            return Err(LedgerError::Rpc(format!("{method}: {}", error.describe())));
        }
        let result = self
            .result
            .ok_or_else(|| LedgerError::Decode(format!("{method}: response has no result")))?;
        if let Some(error) = result.error {
            return Err(LedgerError::Rpc(format!("{method}: {error}")));
        }
        let bytes = result.result.unwrap_or_default();
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| LedgerError::Decode(format!("{method} returned non-JSON bytes: {e}")))
    }
}
