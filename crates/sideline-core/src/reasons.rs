//! Reason chip clamping.
//!
//! A projection or risk score on the dashboard is annotated with small badges
//! ("reasons") that explain what moved it. Upstream sends every candidate it
//! has; this module decides which ones are safe to show:
//!
//! 1. Drop reasons below [`MIN_CONFIDENCE`]
//! 2. Rank the rest by descending absolute effect
//! 3. Keep the top `max_chips`
//! 4. If the signed total overshoots `max_abs_total`, scale every kept effect
//!    uniformly so the total lands on the budget (rounded to 2 decimals)
//!
//! Labels and confidences are never modified. Only `effect` is rescaled.

use serde::{Deserialize, Serialize};

/// Reasons below this confidence are never displayed.
pub const MIN_CONFIDENCE: f64 = 0.65;

/// A single explanatory reason ("driver chip") for a displayed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reason {
    /// Short human-readable label, e.g. "Target share up"
    pub label: String,

    /// Signed effect in percentage points
    #[serde(alias = "pct")]
    pub effect: f64,

    /// Upstream confidence in 0..=1
    #[serde(alias = "conf")]
    pub confidence: f64,
}

impl Reason {
    /// Create a new reason.
    pub fn new(label: impl Into<String>, effect: f64, confidence: f64) -> Self {
        Self {
            label: label.into(),
            effect,
            confidence,
        }
    }

    fn is_displayable(&self) -> bool {
        // Written as a positive comparison so NaN confidence is rejected.
        self.effect.is_finite() && self.confidence.is_finite() && self.confidence >= MIN_CONFIDENCE
    }
}

/// Display budget for a set of reason chips.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClampOptions {
    /// Maximum number of chips shown
    pub max_chips: usize,

    /// Maximum absolute sum of the shown effects
    pub max_abs_total: f64,
}

impl ClampOptions {
    pub const DEFAULT_MAX_CHIPS: usize = 2;
    pub const DEFAULT_MAX_ABS_TOTAL: f64 = 3.5;
    pub const EXTENDED_MAX_ABS_TOTAL: f64 = 4.0;

    /// Budget used by the lineup and trade views (4.0 total).
    pub fn extended() -> Self {
        Self {
            max_abs_total: Self::EXTENDED_MAX_ABS_TOTAL,
            ..Self::default()
        }
    }

    /// Set the maximum number of chips.
    pub fn with_max_chips(mut self, max_chips: usize) -> Self {
        self.max_chips = max_chips;
        self
    }

    /// Set the absolute-sum budget. Non-positive or non-finite disables scaling.
    pub fn with_max_abs_total(mut self, max_abs_total: f64) -> Self {
        self.max_abs_total = max_abs_total;
        self
    }
}

impl Default for ClampOptions {
    fn default() -> Self {
        Self {
            max_chips: Self::DEFAULT_MAX_CHIPS,
            max_abs_total: Self::DEFAULT_MAX_ABS_TOTAL,
        }
    }
}

/// Select and scale the reasons that fit the display budget.
///
/// Pure and deterministic. Empty input yields empty output.
pub fn clamp_reasons(reasons: &[Reason], options: &ClampOptions) -> Vec<Reason> {
    let mut selected: Vec<Reason> = reasons
        .iter()
        .filter(|r| r.is_displayable())
        .cloned()
        .collect();

    // Stable sort: equal magnitudes keep upstream order.
    selected.sort_by(|a, b| b.effect.abs().total_cmp(&a.effect.abs()));
    selected.truncate(options.max_chips);

    let budget = options.max_abs_total;
    if !budget.is_finite() || budget <= 0.0 {
        return selected;
    }

    let total: f64 = selected.iter().map(|r| r.effect).sum();
    if total.abs() > budget {
        let scale = budget / total.abs();
        for reason in &mut selected {
            reason.effect = round2(reason.effect * scale);
        }
        tracing::trace!(total, scale, chips = selected.len(), "Scaled reason chips to budget");
    }

    selected
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
