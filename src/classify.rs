//! Trade classification rules
//!
//! Pure functions shared by every adapter so the same raw-delta pattern
//! classifies identically regardless of source.

use crate::types::{PerpSide, SpotSide};

/// Classify a spot movement from the wallet's native and token deltas
///
/// Opposing signs decide directly: native in / token out is a BUY,
/// native out / token in is a SELL. Otherwise the token delta's sign
/// decides alone, and a zero token delta is a TRANSFER.
pub fn classify_spot_side(native_delta: f64, token_delta: f64) -> SpotSide {
    if native_delta > 0.0 && token_delta < 0.0 {
        SpotSide::Buy
    } else if native_delta < 0.0 && token_delta > 0.0 {
        SpotSide::Sell
    } else if token_delta > 0.0 {
        SpotSide::Buy
    } else if token_delta < 0.0 {
        SpotSide::Sell
    } else {
        SpotSide::Transfer
    }
}

/// Direction of a native-only movement
pub fn classify_transfer(native_delta: f64) -> SpotSide {
    if native_delta > 0.0 {
        SpotSide::TransferIn
    } else if native_delta < 0.0 {
        SpotSide::TransferOut
    } else {
        SpotSide::Transfer
    }
}

/// Perp side from signed position size. A zero size is LONG.
pub fn classify_perp_side(position_size: f64) -> PerpSide {
    if position_size >= 0.0 {
        PerpSide::Long
    } else {
        PerpSide::Short
    }
}

/// Unit price of a token in native units
///
/// `native_amount` is in base units (lamports, wei) and is scaled down by
/// `decimals`; `token_amount` is already in display units.
pub fn derive_price(native_amount: f64, token_amount: f64, decimals: u32) -> f64 {
    if token_amount == 0.0 {
        return 0.0;
    }
    native_amount / 10f64.powi(decimals as i32) / token_amount
}

/// Map a derived price to the unpriced sentinel when it carries no information
pub fn priced(price: f64) -> Option<f64> {
    if price.is_finite() && price != 0.0 {
        Some(price)
    } else {
        None
    }
}

/// Realized PnL of a position closed at `exit_price`
pub fn realized_pnl(entry_price: f64, exit_price: f64, position_size: f64) -> f64 {
    (exit_price - entry_price) * position_size
}

/// Scale a raw integer amount string by its decimals
pub fn scale_amount(raw: &str, decimals: u32) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .map(|v| v / 10f64.powi(decimals as i32))
}
