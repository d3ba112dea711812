//! Human-facing summary of a canonical record, shown before anything is signed.

use std::fmt;
use std::str::FromStr;

use ethers_core::abi::{self, ParamType, Token};
use ethers_core::types::{Address, Bytes, U256};
use serde::Serialize;

use crate::amount::{format_amount, product, AmountError};
use crate::models::{ApprovalPayload, Asset, CanonicalRecord};

const NATIVE_DECIMALS: u8 = 18;
const GWEI_DECIMALS: u8 = 9;
const APPROVE_SELECTOR: [u8; 4] = [0x09, 0x5e, 0xa7, 0xb3];

#[derive(Debug, Clone, Serialize)]
pub struct TxPreview {
    pub chain_id: u64,
    pub network: Option<&'static str>,
    pub sell: AssetAmount,
    pub buy: AssetAmount,
    pub target: String,
    pub call: CallSummary,
    pub native_value: String,
    pub gas_limit: String,
    pub gas_price_gwei: Option<String>,
    pub max_network_fee: Option<String>,
    pub approval: Option<ApprovalPreview>,
    pub banners: Vec<Banner>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetAmount {
    pub symbol: String,
    pub name: String,
    pub address: String,
    pub amount: String,
    pub raw_amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSummary {
    pub selector: Option<String>,
    pub method: Option<&'static str>,
    pub calldata_bytes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalPreview {
    pub token: String,
    pub spender: Option<String>,
    /// Formatted in the sold asset's units, or `unlimited` for `uint256::MAX`.
    pub allowance: Option<String>,
    pub call: CallSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Banner {
    pub source: &'static str,
    pub kind: Option<String>,
    pub message: String,
    pub detail: Option<String>,
}

pub fn build_preview(record: &CanonicalRecord) -> Result<TxPreview, AmountError> {
    let quote = &record.quote;
    let tx = &record.tx;

    let max_network_fee = product(&tx.gas, &tx.gas_price)
        .and_then(|wei| format_amount(&wei, NATIVE_DECIMALS))
        .ok();

    let mut banners = Vec::new();
    if let Some(warning) = &record.warning {
        banners.push(Banner {
            source: "provider",
            kind: None,
            message: warning.message.clone(),
            detail: Some(format!("code {}", warning.code)),
        });
    }
    if let Some(warning) = &quote.warning {
        banners.push(Banner {
            source: "quote",
            kind: Some(warning.kind.clone()),
            message: warning.message.clone(),
            detail: Some(warning.description.clone()),
        });
    }

    Ok(TxPreview {
        chain_id: record.chain_id,
        network: network_name(record.chain_id),
        sell: AssetAmount::new(&quote.from_asset, &quote.from_amount)?,
        buy: AssetAmount::new(&quote.to_asset, &quote.to_amount)?,
        target: tx.to.clone(),
        call: CallSummary::from_calldata(&tx.data),
        native_value: native_amount(&tx.value),
        gas_limit: tx.gas.clone(),
        gas_price_gwei: format_amount(&tx.gas_price, GWEI_DECIMALS).ok(),
        max_network_fee,
        approval: record
            .approve_tx
            .as_ref()
            .map(|approval| ApprovalPreview::new(approval, &quote.from_asset)),
        banners,
    })
}

impl AssetAmount {
    fn new(asset: &Asset, raw_amount: &str) -> Result<Self, AmountError> {
        Ok(Self {
            symbol: asset.currency_code.clone(),
            name: asset.name.clone(),
            address: asset.address.clone(),
            amount: format_amount(raw_amount, asset.decimals)?,
            raw_amount: raw_amount.to_string(),
        })
    }
}

impl CallSummary {
    pub fn from_calldata(data: &str) -> Self {
        let hex = data.strip_prefix("0x").unwrap_or(data);
        let selector = hex.get(..8).map(|s| format!("0x{}", s.to_ascii_lowercase()));
        let method = selector.as_deref().and_then(known_method);
        Self {
            selector,
            method,
            calldata_bytes: hex.len() / 2,
        }
    }
}

impl ApprovalPreview {
    fn new(approval: &ApprovalPayload, asset: &Asset) -> Self {
        let decoded = decode_approve(&approval.data);
        let allowance = decoded.and_then(|(_, amount)| {
            if amount == U256::MAX {
                Some("unlimited".to_string())
            } else {
                format_amount(&amount.to_string(), asset.decimals).ok()
            }
        });
        Self {
            token: approval.to.clone(),
            spender: decoded.map(|(spender, _)| format!("{:?}", spender)),
            allowance,
            call: CallSummary::from_calldata(&approval.data),
        }
    }
}

fn decode_approve(data: &str) -> Option<(Address, U256)> {
    let bytes = Bytes::from_str(data).ok()?;
    if bytes.len() < 4 || bytes[..4] != APPROVE_SELECTOR {
        return None;
    }
    let tokens = abi::decode(&[ParamType::Address, ParamType::Uint(256)], &bytes[4..]).ok()?;
    match tokens.as_slice() {
        [Token::Address(spender), Token::Uint(amount)] => Some((*spender, *amount)),
        _ => None,
    }
}

fn known_method(selector: &str) -> Option<&'static str> {
    let method = match selector {
        "0x095ea7b3" => "approve(address,uint256)",
        "0xa9059cbb" => "transfer(address,uint256)",
        "0x23b872dd" => "transferFrom(address,address,uint256)",
        "0x3593564c" => "execute(bytes,bytes[],uint256)",
        "0x12aa3caf" => "swap(address,(address,address,address,address,uint256,uint256,uint256),bytes,bytes)",
        "0xe449022e" => "uniswapV3Swap(uint256,uint256,uint256[])",
        "0x0502b1c5" => "unoswap(address,uint256,uint256,uint256[])",
        "0x415565b0" => "transformERC20(address,address,uint256,uint256,(uint32,bytes)[])",
        _ => return None,
    };
    Some(method)
}

pub fn network_name(chain_id: u64) -> Option<&'static str> {
    let name = match chain_id {
        1 => "Ethereum",
        10 => "Optimism",
        56 => "BNB Smart Chain",
        100 => "Gnosis",
        137 => "Polygon",
        324 => "zkSync Era",
        8453 => "Base",
        42161 => "Arbitrum One",
        43114 => "Avalanche C-Chain",
        59144 => "Linea",
        11155111 => "Sepolia",
        _ => return None,
    };
    Some(name)
}

/// Wallet-bound quantities may be hex; an unreadable value is shown as given
/// rather than blocking the summary.
fn native_amount(raw: &str) -> String {
    let decimal = match raw.strip_prefix("0x") {
        Some(hex) => U256::from_str_radix(hex, 16).map(|wei| wei.to_string()).ok(),
        None => Some(raw.to_string()),
    };
    decimal
        .and_then(|wei| format_amount(&wei, NATIVE_DECIMALS).ok())
        .unwrap_or_else(|| raw.to_string())
}

impl fmt::Display for TxPreview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.network {
            Some(name) => writeln!(f, "Network:   {} ({})", name, self.chain_id)?,
            None => writeln!(f, "Network:   chain {}", self.chain_id)?,
        }
        writeln!(f, "Sell:      {} {}", self.sell.amount, self.sell.symbol)?;
        writeln!(f, "Buy:       {} {}", self.buy.amount, self.buy.symbol)?;
        match self.call.method {
            Some(method) => writeln!(f, "Target:    {} [{}]", self.target, method)?,
            None => writeln!(f, "Target:    {}", self.target)?,
        }
        writeln!(f, "Value:     {}", self.native_value)?;
        write!(f, "Gas:       {}", self.gas_limit)?;
        if let Some(gwei) = &self.gas_price_gwei {
            write!(f, " @ {} gwei", gwei)?;
        }
        if let Some(fee) = &self.max_network_fee {
            write!(f, " (max fee {})", fee)?;
        }
        writeln!(f)?;
        if let Some(approval) = &self.approval {
            writeln!(
                f,
                "Approval:  {} on {} for {}",
                approval.spender.as_deref().unwrap_or("unknown spender"),
                approval.token,
                approval.allowance.as_deref().unwrap_or("unknown amount"),
            )?;
        }
        for banner in &self.banners {
            match &banner.detail {
                Some(detail) => writeln!(f, "Warning:   {} ({})", banner.message, detail)?,
                None => writeln!(f, "Warning:   {}", banner.message)?,
            }
        }
        Ok(())
    }
}
