//! Detection and normalization of pasted quote payloads.
//!
//! Two provider shapes are understood:
//!
//! * **wrapped**: `{"result": {"tx", "quote", "approveTx"?, "chainId"}, "warning"?}`
//!   with camelCase fields already matching the canonical record;
//! * **flat**: `{"tx", "quote": {.., "chain_id"}, "approve_tx"?, "fee"?}` with
//!   snake_case fields throughout.
//!
//! Detection is ordered: a `result` key always selects the wrapped shape, even if
//! `tx` and `quote` are also present at the top level.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::models::{
    ApprovalPayload, Asset, CanonicalRecord, Quote, QuoteWarning, TxPayload, Warning,
};

/// Quantity used for a flat `tx` that omits `value`.
const ZERO_QUANTITY: &str = "0";

#[derive(thiserror::Error, Debug)]
pub enum NormalizeError {
    #[error("invalid JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("unrecognized quote format: expected a `result` object or top-level `tx` and `quote`")]
    UnrecognizedFormat,
    #[error("missing required fields: {}", .0.join(", "))]
    MissingRequiredFields(Vec<&'static str>),
    #[error("invalid chain id: {0}")]
    InvalidChainId(String),
    #[error("{format} quote has an unexpected shape: {source}")]
    InvalidShape {
        format: &'static str,
        source: serde_json::Error,
    },
}

impl NormalizeError {
    pub fn kind(&self) -> &'static str {
        match self {
            NormalizeError::JsonParse(_) => "json_parse_error",
            NormalizeError::UnrecognizedFormat => "unrecognized_format",
            NormalizeError::MissingRequiredFields(_) => "missing_required_fields",
            NormalizeError::InvalidChainId(_) => "invalid_chain_id",
            NormalizeError::InvalidShape { .. } => "invalid_shape",
        }
    }
}

/// Parses raw pasted text and normalizes it.
pub fn parse_and_normalize(text: &str) -> Result<CanonicalRecord, NormalizeError> {
    let raw: Value = serde_json::from_str(text)?;
    normalize(&raw)
}

pub fn normalize(raw: &Value) -> Result<CanonicalRecord, NormalizeError> {
    let format = SourceFormat::detect(raw)?;
    debug!("detected {} quote format", format.name());
    format.into_record()
}

enum SourceFormat {
    Wrapped(WrappedEnvelope),
    Flat(FlatEnvelope),
}

impl SourceFormat {
    fn detect(raw: &Value) -> Result<Self, NormalizeError> {
        let Some(object) = raw.as_object() else {
            return Err(NormalizeError::UnrecognizedFormat);
        };

        if object.contains_key("result") {
            let envelope = WrappedEnvelope::deserialize(raw).map_err(|source| {
                NormalizeError::InvalidShape {
                    format: "wrapped",
                    source,
                }
            })?;
            return Ok(SourceFormat::Wrapped(envelope));
        }

        if object.contains_key("tx") && object.contains_key("quote") {
            let envelope = FlatEnvelope::deserialize(raw).map_err(|source| {
                NormalizeError::InvalidShape {
                    format: "flat",
                    source,
                }
            })?;
            return Ok(SourceFormat::Flat(envelope));
        }

        Err(NormalizeError::UnrecognizedFormat)
    }

    fn name(&self) -> &'static str {
        match self {
            SourceFormat::Wrapped(_) => "wrapped",
            SourceFormat::Flat(_) => "flat",
        }
    }

    fn into_record(self) -> Result<CanonicalRecord, NormalizeError> {
        let mapped = match self {
            SourceFormat::Wrapped(envelope) => envelope.into_mapped()?,
            SourceFormat::Flat(envelope) => envelope.into_mapped()?,
        };
        mapped.require()
    }
}

/// Structural mapping result before the required-field check.
struct MappedRecord {
    tx: Option<TxPayload>,
    quote: Option<Quote>,
    approve_tx: Option<ApprovalPayload>,
    chain_id: Option<u64>,
    warning: Option<Warning>,
}

impl MappedRecord {
    fn require(self) -> Result<CanonicalRecord, NormalizeError> {
        match (self.tx, self.quote, self.chain_id) {
            (Some(tx), Some(quote), Some(chain_id)) => Ok(CanonicalRecord {
                tx,
                quote,
                approve_tx: self.approve_tx,
                chain_id,
                warning: self.warning,
            }),
            (tx, quote, chain_id) => {
                let mut missing = Vec::new();
                if tx.is_none() {
                    missing.push("tx");
                }
                if quote.is_none() {
                    missing.push("quote");
                }
                if chain_id.is_none() {
                    missing.push("chainId");
                }
                Err(NormalizeError::MissingRequiredFields(missing))
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChainIdField {
    Number(u64),
    Text(String),
    Other(Value),
}

impl ChainIdField {
    fn parse(self) -> Result<u64, NormalizeError> {
        let parsed = match &self {
            ChainIdField::Number(id) => Some(*id),
            ChainIdField::Text(text) => text.trim().parse::<u64>().ok(),
            ChainIdField::Other(_) => None,
        };
        parsed.filter(|id| *id > 0).ok_or_else(|| {
            NormalizeError::InvalidChainId(match self {
                ChainIdField::Number(id) => id.to_string(),
                ChainIdField::Text(text) => text,
                ChainIdField::Other(value) => value.to_string(),
            })
        })
    }
}

#[derive(Deserialize)]
struct WrappedEnvelope {
    result: Option<WrappedResult>,
    #[serde(default)]
    warning: Option<Warning>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WrappedResult {
    #[serde(default)]
    tx: Option<TxPayload>,
    #[serde(default)]
    quote: Option<Quote>,
    #[serde(default)]
    approve_tx: Option<ApprovalPayload>,
    #[serde(default)]
    chain_id: Option<ChainIdField>,
}

impl WrappedEnvelope {
    fn into_mapped(self) -> Result<MappedRecord, NormalizeError> {
        let Some(result) = self.result else {
            return Err(NormalizeError::MissingRequiredFields(vec![
                "tx", "quote", "chainId",
            ]));
        };
        let chain_id = result.chain_id.map(ChainIdField::parse).transpose()?;
        Ok(MappedRecord {
            tx: result.tx,
            quote: result.quote,
            approve_tx: result.approve_tx,
            chain_id,
            warning: self.warning,
        })
    }
}

#[derive(Deserialize)]
struct FlatEnvelope {
    tx: Option<FlatTx>,
    quote: Option<FlatQuote>,
    #[serde(default)]
    approve_tx: Option<FlatApproval>,
    #[serde(default)]
    fee: Option<Value>,
}

#[derive(Deserialize)]
struct FlatTx {
    data: String,
    gas: String,
    gas_price: String,
    from: String,
    to: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Deserialize)]
struct FlatApproval {
    data: String,
    gas: String,
    gas_price: String,
    from: String,
    to: String,
}

#[derive(Deserialize)]
struct FlatQuote {
    from_asset: FlatAsset,
    to_asset: FlatAsset,
    from_amount: String,
    to_amount: String,
    #[serde(default)]
    chain_id: Option<ChainIdField>,
    #[serde(default)]
    warning: Option<QuoteWarning>,
}

#[derive(Deserialize)]
struct FlatAsset {
    name: String,
    currency_code: String,
    address: String,
    decimals: u8,
}

impl FlatEnvelope {
    fn into_mapped(self) -> Result<MappedRecord, NormalizeError> {
        if let Some(fee) = &self.fee {
            debug!("ignoring flat quote fee: {}", fee);
        }

        let (quote, chain_id) = match self.quote {
            Some(quote) => {
                let chain_id = quote.chain_id.map(ChainIdField::parse).transpose()?;
                let quote = Quote {
                    from_asset: quote.from_asset.into(),
                    to_asset: quote.to_asset.into(),
                    from_amount: quote.from_amount,
                    to_amount: quote.to_amount,
                    warning: quote.warning,
                };
                (Some(quote), chain_id)
            }
            None => (None, None),
        };

        Ok(MappedRecord {
            tx: self.tx.map(Into::into),
            quote,
            approve_tx: self.approve_tx.map(Into::into),
            chain_id,
            warning: None,
        })
    }
}

impl From<FlatTx> for TxPayload {
    fn from(tx: FlatTx) -> Self {
        TxPayload {
            data: tx.data,
            gas: tx.gas,
            gas_price: tx.gas_price,
            from: tx.from,
            to: tx.to,
            value: tx.value.unwrap_or_else(|| ZERO_QUANTITY.to_string()),
        }
    }
}

impl From<FlatApproval> for ApprovalPayload {
    fn from(tx: FlatApproval) -> Self {
        ApprovalPayload {
            data: tx.data,
            gas: tx.gas,
            gas_price: tx.gas_price,
            from: tx.from,
            to: tx.to,
        }
    }
}

impl From<FlatAsset> for Asset {
    fn from(asset: FlatAsset) -> Self {
        Asset {
            name: asset.name,
            currency_code: asset.currency_code,
            address: asset.address,
            decimals: asset.decimals,
        }
    }
}
