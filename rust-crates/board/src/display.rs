use serde_json::Value;

pub const CURRENCY_GLYPH: &str = "🥑";
pub const DEFAULT_BALANCE: &str = "0.0000 🥑";
pub const SUPPLY_FALLBACK: &str = "-";

const TOKEN_SCALE: f64 = 1e18;
const BALANCE_FIELD: &str = "avocado_balance";

/// `value / 10^18` with four decimals and the currency glyph, or `None`
/// when the value is missing or not a number.
pub fn format_token_amount(value: &Value) -> Option<String> {
    let amount = match value {
        Value::String(raw) => parse_amount(raw)?,
        Value::Number(number) => number.as_f64()?,
        _ => return None,
    };
    Some(format!("{:.4} {CURRENCY_GLYPH}", amount / TOKEN_SCALE))
}

fn parse_amount(raw: &str) -> Option<f64> {
    let amount = raw.trim().parse::<f64>().ok()?;
    amount.is_finite().then_some(amount)
}

pub fn supply_text(value: &Value) -> String {
    format_token_amount(value).unwrap_or_else(|| SUPPLY_FALLBACK.to_string())
}

/// Balance text for the `get_account` result. The contract answers `null` for
/// accounts it has never seen.
pub fn balance_text(account: Option<&Value>) -> String {
    account
        .and_then(|account| account.get(BALANCE_FIELD))
        .and_then(format_token_amount)
        .unwrap_or_else(|| DEFAULT_BALANCE.to_string())
}
