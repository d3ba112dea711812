use num_bigint::BigUint;
use num_traits::Zero;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount {0:?} is not a non-negative integer")]
    InvalidAmount(String),
}

/// Splits a smallest-unit amount into whole units and the remainder below one
/// unit, using exact integer arithmetic.
pub fn split_amount(amount: &str, decimals: u8) -> Result<(BigUint, BigUint), AmountError> {
    let raw = parse_amount(amount)?;
    let scale = BigUint::from(10u8).pow(u32::from(decimals));
    Ok((&raw / &scale, &raw % &scale))
}

/// Renders a smallest-unit amount as a decimal string, e.g. `1500000000000000000`
/// with 18 decimals becomes `1.5`. Trailing fractional zeros are dropped.
pub fn format_amount(amount: &str, decimals: u8) -> Result<String, AmountError> {
    let (whole, fraction) = split_amount(amount, decimals)?;
    if fraction.is_zero() {
        return Ok(whole.to_string());
    }

    let padded = format!("{:0>width$}", fraction.to_string(), width = usize::from(decimals));
    let trimmed = padded.trim_end_matches('0');
    if trimmed.is_empty() {
        Ok(whole.to_string())
    } else {
        Ok(format!("{}.{}", whole, trimmed))
    }
}

/// Exact product of two integer strings, e.g. gas limit times gas price.
pub fn product(lhs: &str, rhs: &str) -> Result<String, AmountError> {
    Ok((parse_amount(lhs)? * parse_amount(rhs)?).to_string())
}

fn parse_amount(amount: &str) -> Result<BigUint, AmountError> {
    if amount.is_empty() || !amount.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AmountError::InvalidAmount(amount.to_string()));
    }
    amount
        .parse::<BigUint>()
        .map_err(|_| AmountError::InvalidAmount(amount.to_string()))
}
