//! Utility functions and helpers

/// Format a raw amount with proper decimals
pub fn format_amount(amount: u64, decimals: u8) -> String {
    let value = amount as f64 / 10_f64.powi(decimals as i32);
    format!("{:.*}", decimals.min(8) as usize, value)
}

/// Format a USD value with two decimals
pub fn format_usd(value: f64) -> String {
    format!("${:.2}", value)
}

/// Join a base URL and a path without doubling or dropping the slash
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_normalizes_slashes() {
        assert_eq!(join_url("https://mirror/api/v1/", "/accounts/0.0.2"), "https://mirror/api/v1/accounts/0.0.2");
        assert_eq!(join_url("https://mirror/api/v1", "accounts"), "https://mirror/api/v1/accounts");
    }

    #[test]
    fn format_amount_uses_token_decimals() {
        assert_eq!(format_amount(150_000_000, 8), "1.50000000");
        assert_eq!(format_amount(5, 0), "5");
        assert_eq!(format_usd(12.346), "$12.35");
    }
}
