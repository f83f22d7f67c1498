//! Batch admission and cost control
//!
//! Decides which files may enter a batch before anything is sent:
//! - file count is capped by the tier derived from the credit balance
//! - total cost (files × per-model price) must not exceed the balance
//!
//! All decisions are synchronous and deterministic. Rejections are returned
//! as [`AdmissionRejection`] values; the selection only changes when an add
//! passes every check. Derived figures (cost, remaining credits,
//! affordability) are computed on every call, never cached.

use averion_common::{ModelType, PricingTable, TierLimits};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// How an add that exceeds the balance is handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AffordabilityPolicy {
    /// Reject the whole add and report the largest affordable file count
    #[default]
    RejectAll,
    /// Accept the largest affordable prefix and report what was dropped
    ClampToAffordable,
}

/// Why an admission operation was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionRejection {
    /// Selection already holds the tier's maximum number of files
    #[error("{tier} limit: {max_files} files per batch")]
    CapacityExceeded { tier: String, max_files: usize },

    /// Balance does not cover the resulting selection
    #[error("Insufficient credits: {required} required, {available} available. You can afford {max_affordable} files max.")]
    InsufficientCredits {
        required: u64,
        available: u64,
        max_affordable: usize,
    },

    /// Nothing to submit
    #[error("No files selected")]
    EmptySelection,
}

/// Result of a successful add
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOutcome {
    /// Files appended to the selection
    pub added: usize,
    /// Candidates beyond the free slots (front-truncated away)
    pub dropped_for_capacity: usize,
    /// Candidates beyond the affordable count (clamping policy only)
    pub dropped_for_affordability: usize,
}

impl AddOutcome {
    /// Some candidates were accepted and some dropped
    pub fn is_partial(&self) -> bool {
        self.dropped_for_capacity > 0 || self.dropped_for_affordability > 0
    }
}

/// Files selected for one batch, with the account context that limits them
///
/// Generic over the file type so the controller works with in-memory
/// uploads, paths, or test doubles alike.
#[derive(Debug, Clone)]
pub struct BatchAdmission<F> {
    selection: Vec<F>,
    model_type: ModelType,
    credit_balance: u64,
    pricing: Arc<PricingTable>,
    policy: AffordabilityPolicy,
}

impl<F> BatchAdmission<F> {
    pub fn new(credit_balance: u64, model_type: ModelType, pricing: Arc<PricingTable>) -> Self {
        Self {
            selection: Vec::new(),
            model_type,
            credit_balance,
            pricing,
            policy: AffordabilityPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: AffordabilityPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Current selection in insertion order
    pub fn selection(&self) -> &[F] {
        &self.selection
    }

    pub fn len(&self) -> usize {
        self.selection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selection.is_empty()
    }

    pub fn model_type(&self) -> ModelType {
        self.model_type
    }

    pub fn credit_balance(&self) -> u64 {
        self.credit_balance
    }

    pub fn policy(&self) -> AffordabilityPolicy {
        self.policy
    }

    /// Tier limits for the current balance
    pub fn tier_info(&self) -> &TierLimits {
        self.pricing.tier_for(self.credit_balance)
    }

    pub fn max_files(&self) -> usize {
        self.tier_info().max_files
    }

    pub fn cost_per_file(&self) -> u64 {
        self.pricing.cost_per_file(self.model_type)
    }

    /// Credits the current selection costs
    pub fn cost(&self) -> u64 {
        self.pricing.cost(self.selection.len(), self.model_type)
    }

    /// Balance left after the current selection (negative when unaffordable)
    pub fn remaining_credits(&self) -> i64 {
        self.credit_balance as i64 - self.cost() as i64
    }

    pub fn can_afford(&self) -> bool {
        self.remaining_credits() >= 0
    }

    /// Free slots under the tier ceiling
    pub fn available_slots(&self) -> usize {
        self.max_files().saturating_sub(self.selection.len())
    }

    /// Add candidates to the selection
    ///
    /// 1. No free slots: reject with the tier limit that was hit.
    /// 2. Keep at most the free-slot count of candidates, in input order.
    /// 3. Check the resulting cost against the balance (per policy).
    /// 4. Only then append. The selection is never partially mutated.
    pub fn add_files(&mut self, candidates: Vec<F>) -> Result<AddOutcome, AdmissionRejection> {
        let tier = self.tier_info();
        let available_slots = tier.max_files.saturating_sub(self.selection.len());
        if available_slots == 0 {
            warn!(
                tier = %tier.name,
                max_files = tier.max_files,
                "Batch add rejected: tier capacity reached"
            );
            return Err(AdmissionRejection::CapacityExceeded {
                tier: tier.name.clone(),
                max_files: tier.max_files,
            });
        }

        let offered = candidates.len();
        let mut accepted = candidates;
        accepted.truncate(available_slots);
        let dropped_for_capacity = offered - accepted.len();

        let total = self.selection.len() + accepted.len();
        let required = self.pricing.cost(total, self.model_type);
        let mut dropped_for_affordability = 0;

        if required > self.credit_balance {
            let max_affordable = self
                .pricing
                .max_affordable(self.model_type, self.credit_balance);
            let affordable_new = max_affordable.saturating_sub(self.selection.len());

            if self.policy == AffordabilityPolicy::RejectAll || affordable_new == 0 {
                warn!(
                    required,
                    available = self.credit_balance,
                    max_affordable,
                    "Batch add rejected: insufficient credits"
                );
                return Err(AdmissionRejection::InsufficientCredits {
                    required,
                    available: self.credit_balance,
                    max_affordable,
                });
            }

            dropped_for_affordability = accepted.len() - affordable_new;
            accepted.truncate(affordable_new);
        }

        let outcome = AddOutcome {
            added: accepted.len(),
            dropped_for_capacity,
            dropped_for_affordability,
        };
        self.selection.extend(accepted);

        debug!(
            added = outcome.added,
            dropped_for_capacity,
            dropped_for_affordability,
            selected = self.selection.len(),
            cost = self.cost(),
            "Batch files admitted"
        );
        Ok(outcome)
    }

    /// Remove the file at `index`; out-of-range indices are a no-op
    pub fn remove_file(&mut self, index: usize) -> Option<F> {
        if index < self.selection.len() {
            Some(self.selection.remove(index))
        } else {
            None
        }
    }

    /// Empty the selection (idempotent)
    pub fn clear(&mut self) {
        self.selection.clear();
    }

    /// Switch model; membership is kept, cost and affordability follow
    pub fn set_model_type(&mut self, model_type: ModelType) {
        self.model_type = model_type;
        if !self.can_afford() {
            info!(
                model = %model_type,
                cost = self.cost(),
                balance = self.credit_balance,
                "Current selection no longer affordable after model change"
            );
        }
    }

    /// Apply a freshly fetched balance (the server owns the real value)
    pub fn set_credit_balance(&mut self, credit_balance: u64) {
        self.credit_balance = credit_balance;
    }

    /// Final checks before submit; hands over the files and clears the state
    pub fn prepare_submission(&mut self) -> Result<(Vec<F>, ModelType), AdmissionRejection> {
        if self.selection.is_empty() {
            return Err(AdmissionRejection::EmptySelection);
        }

        let required = self.cost();
        if required > self.credit_balance {
            return Err(AdmissionRejection::InsufficientCredits {
                required,
                available: self.credit_balance,
                max_affordable: self
                    .pricing
                    .max_affordable(self.model_type, self.credit_balance),
            });
        }

        if self.selection.len() > self.max_files() {
            // Balance dropped below the tier the selection was built under
            let tier = self.tier_info();
            return Err(AdmissionRejection::CapacityExceeded {
                tier: tier.name.clone(),
                max_files: tier.max_files,
            });
        }

        Ok((std::mem::take(&mut self.selection), self.model_type))
    }
}
