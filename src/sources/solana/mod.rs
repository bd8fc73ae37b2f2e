//! Solana adapters and the helpers they share

pub mod helius;
pub mod rpc;

/// Lamports per SOL, as a power of ten
pub const SOL_DECIMALS: u32 = 9;

pub const CHAIN_ID: &str = "solana";

/// Well-known mints shown by symbol instead of a shortened address
const KNOWN_MINTS: &[(&str, &str)] = &[
    ("So11111111111111111111111111111111111111112", "SOL"),
    ("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v", "USDC"),
    ("Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB", "USDT"),
    ("DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263", "BONK"),
    ("JUPyiwrYJFskUPiHa7hkeR8VUtAeFoSYbKedZNsDvCN", "JUP"),
    ("EKpQGSJtjMFqKZ9KQanSqYXRcF8fBopzLHYxdM65zcjm", "WIF"),
    ("mSoLzYCxHdYgdzU16g5QSh3i5K3z3KZK7ytfqcJm7So", "mSOL"),
];

/// Symbol for a mint, or a `abcd...wxyz` shortened address
pub fn mint_symbol(mint: &str) -> String {
    KNOWN_MINTS
        .iter()
        .find(|(m, _)| *m == mint)
        .map(|(_, s)| s.to_string())
        .unwrap_or_else(|| shorten_address(mint))
}

pub fn shorten_address(address: &str) -> String {
    super::shorten(address, 4, 4)
}

/// Lamports to SOL
pub fn lamports_to_sol(lamports: f64) -> f64 {
    lamports / 10f64.powi(SOL_DECIMALS as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_symbol() {
        assert_eq!(mint_symbol("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"), "USDC");
        assert_eq!(
            mint_symbol("7GCihgDB8fe6KNjn2MYtkzZcRjQy3t9GHdC8uHYmW2hr"),
            "7GCi...W2hr"
        );
        assert_eq!(shorten_address("short"), "short");
    }
}
