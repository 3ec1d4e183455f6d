//! Billing units and provider pricing types.
//!
//! This module provides the types the Cost Model works with:
//! - Billing units (what a provider charges for)
//! - Cost rates (amount per billing unit)
//! - Request units (how much of each unit a request is expected to use)
//!
//! # Billing Units
//!
//! Providers bill per request, per token, per minute of audio/compute, per
//! generated image or per character. A provider's billing unit is fixed at
//! registration; an unrecognized unit is a configuration error surfaced when
//! the registration is parsed, never at request time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::ConfigurationError;

// ============================================================================
// Billing Units
// ============================================================================

/// What a provider charges for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BillingUnit {
    /// Flat price per request
    Request,
    /// Price per token (LLM capabilities)
    Token,
    /// Price per minute (speech, compute)
    Minute,
    /// Price per generated image
    Image,
    /// Price per character (SMS, TTS)
    Character,
}

impl BillingUnit {
    /// Canonical lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingUnit::Request => "request",
            BillingUnit::Token => "token",
            BillingUnit::Minute => "minute",
            BillingUnit::Image => "image",
            BillingUnit::Character => "character",
        }
    }
}

impl FromStr for BillingUnit {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "request" | "requests" => Ok(BillingUnit::Request),
            "token" | "tokens" => Ok(BillingUnit::Token),
            "minute" | "minutes" => Ok(BillingUnit::Minute),
            "image" | "images" => Ok(BillingUnit::Image),
            "character" | "characters" | "char" => Ok(BillingUnit::Character),
            _ => Err(ConfigurationError::UnknownBillingUnit(s.to_string())),
        }
    }
}

impl TryFrom<String> for BillingUnit {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BillingUnit> for String {
    fn from(unit: BillingUnit) -> Self {
        unit.as_str().to_string()
    }
}

impl fmt::Display for BillingUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Cost Rate
// ============================================================================

/// Static price of one billing unit at a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRate {
    /// Price of a single unit
    pub amount: f64,

    /// Unit the amount applies to
    pub unit: BillingUnit,

    /// Currency for cost values (default: USD)
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl CostRate {
    /// Create a rate in the default currency.
    pub fn new(amount: f64, unit: BillingUnit) -> Self {
        Self {
            amount,
            unit,
            currency: default_currency(),
        }
    }

    /// Flat per-request price.
    pub fn per_request(amount: f64) -> Self {
        Self::new(amount, BillingUnit::Request)
    }
}

// ============================================================================
// Request Units
// ============================================================================

/// Measured or estimated usage of a single request, per billing unit.
///
/// Units that do not apply to a request are left at zero. A provider billed
/// per request always counts as one unit regardless of these values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestUnits {
    #[serde(default)]
    pub tokens: u64,
    #[serde(default)]
    pub minutes: f64,
    #[serde(default)]
    pub images: u64,
    #[serde(default)]
    pub characters: u64,
}

impl RequestUnits {
    /// Usage for a token-billed request
    pub fn tokens(tokens: u64) -> Self {
        Self {
            tokens,
            ..Default::default()
        }
    }

    /// Quantity of `unit` consumed by this request.
    pub fn quantity(&self, unit: BillingUnit) -> f64 {
        match unit {
            BillingUnit::Request => 1.0,
            BillingUnit::Token => self.tokens as f64,
            BillingUnit::Minute => self.minutes,
            BillingUnit::Image => self.images as f64,
            BillingUnit::Character => self.characters as f64,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
