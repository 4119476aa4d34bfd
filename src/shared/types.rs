//! Common types used across the application

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Reserved asset identifier for the network's native currency.
pub const NATIVE_ASSET_ID: &str = "HBAR";

/// Decimals of the native currency (1 HBAR = 10^8 tinybar).
pub const NATIVE_DECIMALS: u8 = 8;

/// Ledger account identifier, e.g. `0.0.1234`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AccountId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("account id must not be empty".to_string());
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(format!("account id contains whitespace: {:?}", trimmed));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies either the native currency or a fungible token within balance records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AssetId {
    Native,
    Token(String),
}

impl AssetId {
    pub fn token(id: impl Into<String>) -> Self {
        AssetId::Token(id.into())
    }

    pub fn is_native(&self) -> bool {
        matches!(self, AssetId::Native)
    }

    pub fn as_str(&self) -> &str {
        match self {
            AssetId::Native => NATIVE_ASSET_ID,
            AssetId::Token(id) => id,
        }
    }
}

impl FromStr for AssetId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err("asset id must not be empty".to_string());
        }
        if trimmed.eq_ignore_ascii_case(NATIVE_ASSET_ID) {
            Ok(AssetId::Native)
        } else {
            Ok(AssetId::Token(trimmed.to_string()))
        }
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for AssetId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for AssetId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Network identity (`mainnet`, `testnet`, ...), compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct NetworkId(String);

impl NetworkId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for NetworkId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for NetworkId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<NetworkId> for String {
    fn from(id: NetworkId) -> Self {
        id.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Token metadata as listed by the price API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub symbol: String,
    pub decimals: u8,
    #[serde(default)]
    pub price_usd: Option<f64>,
    #[serde(default)]
    pub icon: Option<String>,
}

/// USD price of a single asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPrice {
    pub token_id: String,
    pub price_usd: f64,
}

/// Raw on-ledger amount with its precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount {
    pub value: u64,
    pub decimals: u8,
}

impl Amount {
    pub fn new(value: u64, decimals: u8) -> Self {
        Self { value, decimals }
    }

    pub fn native(tinybars: u64) -> Self {
        Self::new(tinybars, NATIVE_DECIMALS)
    }

    /// Human-readable units (`value / 10^decimals`)
    pub fn to_units(&self) -> f64 {
        self.value as f64 / 10_f64.powi(self.decimals as i32)
    }

    /// Parse a decimal string such as `"1.5"` into raw units.
    pub fn from_units(units: &str, decimals: u8) -> Result<Self, String> {
        let units = units.trim();
        let (whole, frac) = match units.split_once('.') {
            Some((w, f)) => (w, f),
            None => (units, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(format!("invalid amount: {:?}", units));
        }
        if frac.len() > decimals as usize {
            return Err(format!("amount {} has more than {} decimals", units, decimals));
        }
        let digits = format!("{}{:0<width$}", whole, frac, width = decimals as usize);
        let value = digits
            .parse::<u64>()
            .map_err(|e| format!("invalid amount {:?}: {}", units, e))?;
        Ok(Self::new(value, decimals))
    }
}
