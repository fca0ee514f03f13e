//! Attempt and time budget helpers for deterministic orchestration.

use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Complexity tier assigned to a build request by the upstream detector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTier {
    #[default]
    Simple,
    Moderate,
    Complex,
    VeryComplex,
}

impl ComplexityTier {
    /// Extra attempts granted on top of the baseline.
    pub fn level(self) -> u32 {
        match self {
            Self::Simple => 0,
            Self::Moderate => 1,
            Self::Complex => 2,
            Self::VeryComplex => 3,
        }
    }
}

/// Complexity input received with a build request. The orchestrator scales
/// its attempt budget from it but never derives it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityProfile {
    pub tier: ComplexityTier,
}

impl ComplexityProfile {
    pub fn new(tier: ComplexityTier) -> Self {
        Self { tier }
    }
}

/// Attempt budget for a profile: `baseline + tier`, capped at `hard_max`.
///
/// Never returns zero; a session always gets at least one build.
pub fn attempt_budget(profile: &ComplexityProfile, baseline: u32, hard_max: u32) -> u32 {
    baseline
        .saturating_add(profile.tier.level())
        .min(hard_max)
        .max(1)
}

/// Return the remaining time budget until the provided deadline.
pub fn remaining_budget(deadline: Instant) -> Result<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    if remaining.is_zero() {
        return Err(anyhow!("session deadline reached"));
    }
    Ok(remaining)
}

/// Clip `limit` to the time left before `deadline`.
pub fn clipped_timeout(limit: Duration, deadline: Instant) -> Result<Duration> {
    Ok(limit.min(remaining_budget(deadline)?))
}
