use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const WALLET_ADDRESS_BYTES: usize = 20;
pub const MAX_BOOK_ID_LEN: usize = 256;
pub const MAX_PASSPHRASE_LEN: usize = 1024;
/// Largest power of ten that fits in a u128.
pub const MAX_DECIMALS: u32 = 38;

/// Prefix of `error_message` when a transfer was broadcast but its outcome
/// was never observed. Rows carrying it must be checked on-chain by `tx_hash`
/// before anyone pays the wallet again.
pub const AMBIGUOUS_ERROR_PREFIX: &str = "confirmation-ambiguous";
pub const REVERTED_ERROR_PREFIX: &str = "transfer-reverted";
pub const SUBMISSION_ERROR_PREFIX: &str = "submission-error";
/// Prefix of `error_message` when `eth_sendTransaction` got no usable
/// answer. `tx_hash` is unknown, so the sender's history must be checked
/// before the wallet is paid again.
pub const SUBMISSION_AMBIGUOUS_ERROR_PREFIX: &str = "submission-ambiguous";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
    Pending,
    Completed,
    Failed,
}

impl ClaimStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            ClaimStatus::Pending => "PENDING",
            ClaimStatus::Completed => "COMPLETED",
            ClaimStatus::Failed => "FAILED",
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, ClaimStatus::Pending)
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown claim status {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for ClaimStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "PENDING" => Ok(ClaimStatus::Pending),
            "COMPLETED" => Ok(ClaimStatus::Completed),
            "FAILED" => Ok(ClaimStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub id: i64,
    pub recipient_address: String,
    pub book_id: Option<String>,
    pub passphrase_hash: Option<String>,
    pub status: ClaimStatus,
    pub tx_hash: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Claim {
    /// Broadcast but not yet resolved.
    pub fn is_in_flight(&self) -> bool {
        self.status == ClaimStatus::Pending && self.tx_hash.is_some()
    }
}

/// A validated intake request ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewClaim {
    pub recipient_address: String,
    pub book_id: Option<String>,
    pub passphrase_hash: Option<String>,
}

/// Terminal outcome written by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Completed { tx_hash: String },
    Failed { message: String },
}

impl Resolution {
    pub fn status(&self) -> ClaimStatus {
        match self {
            Resolution::Completed { .. } => ClaimStatus::Completed,
            Resolution::Failed { .. } => ClaimStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    #[error("wallet required")]
    Empty,
    #[error("wallet must be a 0x-prefixed 20 byte hex address")]
    Malformed,
}

/// Trims and checks an EVM address. Letter case is preserved.
pub fn validate_wallet_address(value: &str) -> Result<String, WalletError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(WalletError::Empty);
    }
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or(WalletError::Malformed)?;
    let bytes = hex::decode(digits).map_err(|_| WalletError::Malformed)?;
    if bytes.len() != WALLET_ADDRESS_BYTES {
        return Err(WalletError::Malformed);
    }
    Ok(trimmed.to_string())
}

/// Key used for uniqueness; matches the `lower(recipient_address)` index.
pub fn normalize_wallet(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

pub fn hash_passphrase(phrase: &str) -> String {
    hex::encode(Sha256::digest(phrase.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,
    #[error("amount contains a non-digit character")]
    InvalidDigit,
    #[error("amount has {found} fractional digits but only {decimals} are allowed")]
    TooPrecise { found: usize, decimals: u32 },
    #[error("decimals {0} exceeds the supported maximum of 38")]
    DecimalsTooLarge(u32),
    #[error("amount overflows 128-bit base units")]
    Overflow,
}

/// Converts a decimal token amount such as `"12.5"` into base units.
pub fn parse_units(amount: &str, decimals: u32) -> Result<u128, AmountError> {
    if decimals > MAX_DECIMALS {
        return Err(AmountError::DecimalsTooLarge(decimals));
    }
    let trimmed = amount.trim();
    if trimmed.is_empty() {
        return Err(AmountError::Empty);
    }
    let (whole, fraction) = match trimmed.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (trimmed, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(AmountError::Empty);
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return Err(AmountError::InvalidDigit);
    }
    if fraction.len() > decimals as usize {
        return Err(AmountError::TooPrecise {
            found: fraction.len(),
            decimals,
        });
    }

    let scale = 10u128.pow(decimals);
    let whole_units = if whole.is_empty() {
        0
    } else {
        whole.parse::<u128>().map_err(|_| AmountError::Overflow)?
    };
    let fraction_units = if fraction.is_empty() {
        0
    } else {
        let padding = 10u128.pow(decimals - fraction.len() as u32);
        fraction
            .parse::<u128>()
            .map_err(|_| AmountError::Overflow)?
            * padding
    };

    whole_units
        .checked_mul(scale)
        .and_then(|value| value.checked_add(fraction_units))
        .ok_or(AmountError::Overflow)
}

/// Formats base units as a decimal token amount with trailing zeros trimmed.
pub fn format_units(base_units: u128, decimals: u32) -> String {
    assert!(decimals <= MAX_DECIMALS, "Decimals exceed u128 scale");
    let scale = 10u128.pow(decimals);
    let whole = base_units / scale;
    let frac = base_units % scale;
    if frac == 0 {
        whole.to_string()
    } else {
        let frac_str = format!("{:0width$}", frac, width = decimals as usize);
        let trimmed = frac_str.trim_end_matches('0');
        format!("{}.{}", whole, trimmed)
    }
}
