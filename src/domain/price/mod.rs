//! Price domain - token metadata and USD prices from the price API

use async_trait::async_trait;

use crate::shared::errors::ApiError;
use crate::shared::types::{AssetId, TokenInfo, TokenPrice, NATIVE_ASSET_ID};

/// Token list and price lookups
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Every token the exchange lists, with prices where known
    async fn known_tokens(&self) -> Result<Vec<TokenInfo>, ApiError>;

    async fn token(&self, token_id: &str) -> Result<TokenInfo, ApiError>;
}

/// Extracts the USD price, treating an unpriced token as not found.
pub fn price_from_info(info: &TokenInfo) -> Result<TokenPrice, ApiError> {
    match info.price_usd {
        Some(price_usd) if price_usd.is_finite() => Ok(TokenPrice {
            token_id: info.id.clone(),
            price_usd,
        }),
        _ => Err(ApiError::NotFound(format!("no USD price for {}", info.id))),
    }
}

/// The listed token that stands for the native asset, matched by symbol.
pub fn native_listing(tokens: &[TokenInfo]) -> Option<&TokenInfo> {
    tokens
        .iter()
        .find(|t| t.symbol.eq_ignore_ascii_case(NATIVE_ASSET_ID))
}

/// Looks `asset` up in a token list.
pub fn find_listing<'a>(tokens: &'a [TokenInfo], asset: &AssetId) -> Option<&'a TokenInfo> {
    match asset {
        AssetId::Native => native_listing(tokens),
        AssetId::Token(id) => tokens.iter().find(|t| &t.id == id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: &str, symbol: &str, price: Option<f64>) -> TokenInfo {
        TokenInfo {
            id: id.to_string(),
            name: symbol.to_string(),
            symbol: symbol.to_string(),
            decimals: 8,
            price_usd: price,
            icon: None,
        }
    }

    #[test]
    fn unpriced_token_is_not_found() {
        let err = price_from_info(&info("0.0.1", "X", None)).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(price_from_info(&info("0.0.2", "Y", Some(1.5))).unwrap().price_usd, 1.5);
    }

    #[test]
    fn native_asset_resolves_by_symbol() {
        let tokens = vec![info("0.0.731861", "SAUCE", Some(0.01)), info("0.0.15058", "HBAR", Some(0.07))];
        assert_eq!(find_listing(&tokens, &AssetId::Native).unwrap().id, "0.0.15058");
        assert_eq!(find_listing(&tokens, &AssetId::token("0.0.731861")).unwrap().symbol, "SAUCE");
        assert!(find_listing(&tokens, &AssetId::token("0.0.9")).is_none());
    }
}
