use async_trait::async_trait;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json::{
    Value,
    json,
};
use std::{
    fmt,
    time::Duration,
};

pub const DEFAULT_CONTRACT_ID: &str = "berryclub.ek.near";

pub const METHOD_TOTAL_SUPPLY: &str = "ft_total_supply";
pub const METHOD_GET_ACCOUNT: &str = "get_account";
pub const METHOD_GET_LINES: &str = "get_lines";
pub const METHOD_BUY_TOKENS: &str = "buy_tokens";
pub const METHOD_DRAW: &str = "draw";

pub const TGAS: u64 = 1_000_000_000_000;
pub const ONE_NEAR: u128 = 1_000_000_000_000_000_000_000_000;

#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Trimmed, non-empty account name.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("{method} timed out after {timeout:?}")]
    Timeout {
        method: String,
        timeout: Duration,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("invalid response: {0}")]
    Decode(String),
}

/// Read side of the remote ledger: a contract view call returning JSON.
#[async_trait]
pub trait LedgerView: Send + Sync {
    async fn view(
        &self,
        contract_id: &str,
        method: &str,
        args: Value,
    ) -> Result<Value, LedgerError>;
}

pub fn total_supply_args() -> Value {
    json!({})
}

pub fn account_args(account_id: &AccountId) -> Value {
    json!({ "account_id": account_id })
}

pub fn lines_args(board_height: u32) -> Value {
    let lines: Vec<u32> = (0..board_height).collect();
    json!({ "lines": lines })
}

pub fn parse_lines(value: Value) -> Result<Vec<String>, LedgerError> {
    serde_json::from_value(value)
        .map_err(|e| LedgerError::Decode(format!("{METHOD_GET_LINES} payload: {e}")))
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCall {
    pub method_name: String,
    pub gas: u64,
    #[serde(with = "u128_string")]
    pub deposit: u128,
    pub args: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params")]
pub enum Action {
    FunctionCall(FunctionCall),
}

impl Action {
    pub fn method_name(&self) -> &str {
        match self {
            Action::FunctionCall(call) => &call.method_name,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub signer_id: AccountId,
    pub receiver_id: String,
    pub actions: Vec<Action>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransactionResult {
    pub transaction_hash: Option<String>,
    pub output: String,
}

impl fmt::Display for TransactionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.transaction_hash {
            Some(hash) => write!(f, "transaction {hash}"),
            None => write!(f, "transaction submitted"),
        }
    }
}

mod u128_string {
    use serde::{
        Deserialize,
        Deserializer,
        Serializer,
        de::Error,
    };

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn account_id__rejects_blank_names() {
        assert_eq!(AccountId::parse("   "), None);
        assert_eq!(
            AccountId::parse(" alice.near ").map(|id| id.to_string()),
            Some("alice.near".to_string())
        );
    }

    #[test]
    fn lines_args__lists_every_row_index() {
        // when
        let args = lines_args(3);

        // then
        assert_eq!(args, json!({ "lines": [0, 1, 2] }));
    }

    #[test]
    fn transaction_request__serializes_in_wallet_shape() {
        // given
        let request = TransactionRequest {
            signer_id: AccountId::parse("alice.near").unwrap(),
            receiver_id: DEFAULT_CONTRACT_ID.to_string(),
            actions: vec![Action::FunctionCall(FunctionCall {
                method_name: METHOD_BUY_TOKENS.to_string(),
                gas: 100 * TGAS,
                deposit: ONE_NEAR / 10,
                args: json!({}),
            })],
        };

        // when
        let value = serde_json::to_value(&request).unwrap();

        // then
        assert_eq!(
            value,
            json!({
                "signerId": "alice.near",
                "receiverId": "berryclub.ek.near",
                "actions": [{
                    "type": "FunctionCall",
                    "params": {
                        "methodName": "buy_tokens",
                        "gas": 100_000_000_000_000u64,
                        "deposit": "100000000000000000000000",
                        "args": {}
                    }
                }]
            })
        );
    }

    #[test]
    fn parse_lines__rejects_non_string_rows() {
        let err = parse_lines(json!([1, 2])).unwrap_err();

        assert!(matches!(err, LedgerError::Decode(_)));
    }
}
