//! Reward calculation
//!
//! Pure function over session metrics and per-category rates. No I/O, no
//! clock, no randomness: the same inputs always produce the same amount.

use std::collections::HashMap;

/// Per-category reward rates.
#[derive(Debug, Clone)]
pub struct CategoryRates {
    /// Reward units per streamed minute
    pub duration_rate: f64,
    /// Reward units per concurrent viewer at session end
    pub viewer_rate: f64,
    /// Flat bonus per completed session
    pub session_bonus: f64,
    /// Platform multiplier, percent (120 = x1.2)
    pub multiplier_pct: f64,
}

impl Default for CategoryRates {
    fn default() -> Self {
        // Mirrors the "Gaming" category defaults.
        Self {
            duration_rate: 0.1,
            viewer_rate: 5.0,
            session_bonus: 10.0,
            multiplier_pct: 120.0,
        }
    }
}

/// Category name -> rates, with a fallback for unrecognized categories.
/// Reward distribution must never block on an unknown but otherwise valid
/// category.
#[derive(Debug, Clone)]
pub struct RewardConfig {
    categories: HashMap<String, CategoryRates>,
    fallback: CategoryRates,
}

impl Default for RewardConfig {
    fn default() -> Self {
        let mut categories = HashMap::new();
        categories.insert("Gaming".to_string(), CategoryRates::default());
        Self {
            categories,
            fallback: CategoryRates::default(),
        }
    }
}

impl RewardConfig {
    pub fn with_category(mut self, name: impl Into<String>, rates: CategoryRates) -> Self {
        self.categories.insert(name.into(), rates);
        self
    }

    pub fn rates_for(&self, category: Option<&str>) -> &CategoryRates {
        category
            .and_then(|name| self.categories.get(name))
            .unwrap_or(&self.fallback)
    }
}

/// Compute the reward amount for a completed session.
///
/// `(duration_rate * minutes + viewer_rate * viewers + bonus) * multiplier / 100`.
/// Defined for zero duration and zero viewers (bonus-only, still multiplied).
pub fn reward(
    duration_minutes: i64,
    viewers: i64,
    category: Option<&str>,
    config: &RewardConfig,
) -> f64 {
    let rates = config.rates_for(category);
    let base = rates.duration_rate * duration_minutes as f64
        + rates.viewer_rate * viewers as f64
        + rates.session_bonus;
    base * rates.multiplier_pct / 100.0
}
