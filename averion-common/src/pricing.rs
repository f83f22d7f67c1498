//! Credit pricing and batch tier table
//!
//! Centralizes the two product parameters the batch admission logic depends on:
//! - Per-model price in credits per file
//! - Credit-balance tiers mapping to batch file-count ceilings
//!
//! The table is a monotonic step function of the credit balance: a higher
//! balance never yields a lower `max_files`. Tables loaded from TOML are
//! validated against that shape before use.

use crate::{Error, ModelType, Result};
use serde::{Deserialize, Serialize};

/// Limits granted to an account whose balance reaches `min_credits`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    /// Lowest credit balance at which this tier applies
    pub min_credits: u64,
    /// Maximum number of files in a single batch
    pub max_files: usize,
    /// Maximum number of batches per day
    pub max_batches_per_day: u32,
    /// Tier display name
    pub name: String,
    /// Short description of the tier
    #[serde(default)]
    pub description: String,
}

impl TierLimits {
    fn new(
        min_credits: u64,
        max_files: usize,
        max_batches_per_day: u32,
        name: &str,
        description: &str,
    ) -> Self {
        Self {
            min_credits,
            max_files,
            max_batches_per_day,
            name: name.to_string(),
            description: description.to_string(),
        }
    }
}

/// Credits charged per analyzed file, per model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPrices {
    #[serde(default = "default_pneumonia_price")]
    pub pneumonia: u64,
    #[serde(default = "default_skin_cancer_price")]
    pub skin_cancer: u64,
}

fn default_pneumonia_price() -> u64 {
    1
}

fn default_skin_cancer_price() -> u64 {
    2
}

impl Default for ModelPrices {
    fn default() -> Self {
        Self {
            pneumonia: default_pneumonia_price(),
            skin_cancer: default_skin_cancer_price(),
        }
    }
}

/// Raw `[pricing]` section as written in TOML (unvalidated)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierLimits>,
    #[serde(default)]
    pub model_prices: ModelPrices,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            tiers: default_tiers(),
            model_prices: ModelPrices::default(),
        }
    }
}

/// Built-in tiers: thresholds 0/50/100/500/1000 credits → 3/5/10/15/25 files
fn default_tiers() -> Vec<TierLimits> {
    vec![
        TierLimits::new(0, 3, 1, "Low Balance", "Purchase credits for more capacity"),
        TierLimits::new(50, 5, 2, "New User", "Getting started with batches"),
        TierLimits::new(100, 10, 5, "Standard User", "Regular batch processing"),
        TierLimits::new(500, 15, 10, "Active User", "Enhanced batch processing"),
        TierLimits::new(1000, 25, 20, "Power User", "High volume processing available"),
    ]
}

/// Validated pricing table
///
/// Invariants (checked by [`PricingTable::from_config`]):
/// - at least one tier, the first starting at 0 credits
/// - `min_credits` strictly ascending
/// - `max_files` non-decreasing and at least 1
/// - every model price at least 1 credit
#[derive(Debug, Clone, PartialEq)]
pub struct PricingTable {
    tiers: Vec<TierLimits>,
    prices: ModelPrices,
}

impl PricingTable {
    /// Build a table from a TOML section, rejecting non-monotonic tiers
    pub fn from_config(config: PricingConfig) -> Result<Self> {
        let PricingConfig {
            tiers,
            model_prices,
        } = config;

        let first = tiers
            .first()
            .ok_or_else(|| Error::Config("pricing table needs at least one tier".to_string()))?;
        if first.min_credits != 0 {
            return Err(Error::Config(format!(
                "first pricing tier must start at 0 credits (got {})",
                first.min_credits
            )));
        }

        for pair in tiers.windows(2) {
            let (lower, upper) = (&pair[0], &pair[1]);
            if upper.min_credits <= lower.min_credits {
                return Err(Error::Config(format!(
                    "tier '{}' threshold {} is not above '{}' threshold {}",
                    upper.name, upper.min_credits, lower.name, lower.min_credits
                )));
            }
            if upper.max_files < lower.max_files {
                return Err(Error::Config(format!(
                    "tier '{}' allows fewer files ({}) than lower tier '{}' ({})",
                    upper.name, upper.max_files, lower.name, lower.max_files
                )));
            }
        }

        if tiers.iter().any(|t| t.max_files == 0) {
            return Err(Error::Config("tier max_files must be at least 1".to_string()));
        }

        if model_prices.pneumonia == 0 || model_prices.skin_cancer == 0 {
            return Err(Error::Config("model prices must be at least 1 credit".to_string()));
        }

        Ok(Self {
            tiers,
            prices: model_prices,
        })
    }

    /// All tiers, lowest threshold first
    pub fn tiers(&self) -> &[TierLimits] {
        &self.tiers
    }

    /// Tier limits for a credit balance (highest tier whose threshold is reached)
    pub fn tier_for(&self, credit_balance: u64) -> &TierLimits {
        // tiers[0] starts at 0, so the search always matches
        self.tiers
            .iter()
            .rev()
            .find(|tier| credit_balance >= tier.min_credits)
            .unwrap_or(&self.tiers[0])
    }

    /// Credits charged per file for a model
    pub fn cost_per_file(&self, model: ModelType) -> u64 {
        match model {
            ModelType::Pneumonia => self.prices.pneumonia,
            ModelType::SkinCancer => self.prices.skin_cancer,
        }
    }

    /// Total credits for `file_count` files (exact, no rounding)
    ///
    /// Saturates at `u64::MAX`, which no balance can cover.
    pub fn cost(&self, file_count: usize, model: ModelType) -> u64 {
        (file_count as u64).saturating_mul(self.cost_per_file(model))
    }

    /// Whether `credit_balance` covers `file_count` files of `model`
    pub fn can_afford(&self, file_count: usize, model: ModelType, credit_balance: u64) -> bool {
        credit_balance >= self.cost(file_count, model)
    }

    /// Largest file count the balance pays for: `floor(balance / cost_per_file)`
    pub fn max_affordable(&self, model: ModelType, credit_balance: u64) -> usize {
        (credit_balance / self.cost_per_file(model)) as usize
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self {
            tiers: default_tiers(),
            prices: ModelPrices::default(),
        }
    }
}
