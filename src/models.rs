use serde::{Deserialize, Serialize};

/// The normalized quote every downstream step consumes, regardless of which
/// provider shape it was pasted in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalRecord {
    pub tx: TxPayload,
    pub quote: Quote,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approve_tx: Option<ApprovalPayload>,
    pub chain_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<Warning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxPayload {
    pub data: String,
    pub gas: String,
    pub gas_price: String,
    pub from: String,
    pub to: String,
    pub value: String,
}

/// Allowance step submitted ahead of the main transaction. Never carries value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalPayload {
    pub data: String,
    pub gas: String,
    pub gas_price: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub from_asset: Asset,
    pub to_asset: Asset,
    pub from_amount: String,
    pub to_amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<QuoteWarning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub name: String,
    pub currency_code: String,
    pub address: String,
    pub decimals: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteWarning {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub description: String,
}

/// Provider-level warning attached next to the quote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    /// Providers emit both numeric and string codes; kept as received.
    pub code: serde_json::Value,
    pub message: String,
}
