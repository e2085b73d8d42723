// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Pricing and Token-Cost Accounting
//!
//! Per-token prices are fixed-precision integers scaled by
//! [`PRICE_PRECISION`]. Native-token and stablecoin prices live in
//! different numeric ranges and are validated separately, at
//! registration time and again at session start. The ranges are tied to
//! the precision constant: changing either is a protocol version bump
//! that invalidates caches.

use ethers::types::{Address, U256};

use crate::error::{Result, SdkError};

/// Fixed-precision divisor for per-token prices.
pub const PRICE_PRECISION: u64 = 1000;

/// Inclusive bounds for native-token prices.
pub const NATIVE_PRICE_MIN: u128 = 227_273;
pub const NATIVE_PRICE_MAX: u128 = 22_727_272_727_273_000;

/// Inclusive bounds for stablecoin prices.
pub const STABLE_PRICE_MIN: u128 = 1;
pub const STABLE_PRICE_MAX: u128 = 100_000_000;

/// Payment token class, which selects the validation range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceKind {
    Native,
    Stable,
}

impl PriceKind {
    /// An absent or zero payment-token address means native.
    pub fn from_payment_token(token: Option<Address>) -> Self {
        match token {
            Some(addr) if addr != Address::zero() => PriceKind::Stable,
            _ => PriceKind::Native,
        }
    }

    fn bounds(self) -> (u128, u128) {
        match self {
            PriceKind::Native => (NATIVE_PRICE_MIN, NATIVE_PRICE_MAX),
            PriceKind::Stable => (STABLE_PRICE_MIN, STABLE_PRICE_MAX),
        }
    }

    fn label(self) -> &'static str {
        match self {
            PriceKind::Native => "native",
            PriceKind::Stable => "stable",
        }
    }
}

/// Validate a per-token price against the range for its token class.
///
/// Zero is out of range for both classes; callers treating zero as
/// "use host default" must resolve the effective price before
/// validating.
pub fn validate_price(price: U256, kind: PriceKind) -> Result<()> {
    let (min, max) = kind.bounds();
    if price < U256::from(min) || price > U256::from(max) {
        return Err(SdkError::PricingValidation {
            kind: kind.label(),
            price,
            min,
            max,
        });
    }
    Ok(())
}

/// Resolve a custom per-model price: zero means "use the host default".
pub fn effective_price(custom: U256, host_default: U256) -> U256 {
    if custom.is_zero() {
        host_default
    } else {
        custom
    }
}

/// Cost of `tokens_used` tokens at `price_per_token`, with truncating
/// integer division by [`PRICE_PRECISION`].
pub fn token_cost(tokens_used: u64, price_per_token: U256) -> U256 {
    U256::from(tokens_used) * price_per_token / U256::from(PRICE_PRECISION)
}
