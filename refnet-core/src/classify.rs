//! Performance classification against chapter baselines.
//!
//! Every presentation surface — spreadsheet highlighting, dashboards,
//! coordinator reports — consumes the thresholds through [`classify`] and
//! [`count_tiers`]. The constants live here and nowhere else, so the
//! surfaces cannot drift apart.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Ratio at or above which a member is excellent.
const EXCELLENT_RATIO: f64 = 1.75;
/// Ratio at or above which a member is good/average.
const GOOD_RATIO: f64 = 0.75;
/// Ratio at or above which a member sits in the unhighlighted dead zone.
const NEUTRAL_RATIO: f64 = 0.5;

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

/// A highlighted performance tier relative to the chapter average.
///
/// The 0.5–0.75 ratio band is deliberately unhighlighted — neither praised
/// nor flagged — and therefore has no variant here; [`classify`] returns
/// `None` for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    /// At or above 1.75× the chapter average.
    Excellent,
    /// Between 0.75× and 1.75× the chapter average.
    GoodAverage,
    /// Below 0.5× the chapter average.
    NeedsAttention,
}

impl Tier {
    /// Human-readable label.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::Excellent => "Excellent — well above the chapter average",
            Self::GoodAverage => "Good — around the chapter average",
            Self::NeedsAttention => "Needs attention — well below the chapter average",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Excellent => write!(f, "excellent"),
            Self::GoodAverage => write!(f, "good/average"),
            Self::NeedsAttention => write!(f, "needs attention"),
        }
    }
}

/// Classify one metric value against the chapter average.
///
/// Returns `None` when the member falls in the neutral dead zone, and for
/// everyone when the average is zero (or not finite) — the ratio is
/// undefined, so no tier is assigned for that metric.
#[must_use]
pub fn classify(value: f64, average: f64) -> Option<Tier> {
    if average <= 0.0 || !average.is_finite() || !value.is_finite() {
        return None;
    }
    let ratio = value / average;
    if ratio >= EXCELLENT_RATIO {
        Some(Tier::Excellent)
    } else if ratio >= GOOD_RATIO {
        Some(Tier::GoodAverage)
    } else if ratio >= NEUTRAL_RATIO {
        None
    } else {
        Some(Tier::NeedsAttention)
    }
}

// ---------------------------------------------------------------------------
// Tier breakdowns
// ---------------------------------------------------------------------------

/// Counts and percentages per tier bucket for one metric.
///
/// Counts always sum to the number of classified members; percentages are
/// computed against the full member count, zero-value members included.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TierBreakdown {
    /// Members at or above 1.75× average.
    pub excellent: usize,
    /// Members between 0.75× and 1.75× average.
    pub good_average: usize,
    /// Members in the unhighlighted dead zone (or unclassifiable because
    /// the average was zero).
    pub neutral: usize,
    /// Members below 0.5× average.
    pub needs_attention: usize,
    /// Total members classified.
    pub total: usize,
}

impl TierBreakdown {
    /// Percentage of members in the excellent bucket.
    #[must_use]
    pub fn excellent_pct(&self) -> f64 {
        self.pct(self.excellent)
    }

    /// Percentage of members in the good/average bucket.
    #[must_use]
    pub fn good_average_pct(&self) -> f64 {
        self.pct(self.good_average)
    }

    /// Percentage of members in the neutral bucket.
    #[must_use]
    pub fn neutral_pct(&self) -> f64 {
        self.pct(self.neutral)
    }

    /// Percentage of members in the needs-attention bucket.
    #[must_use]
    pub fn needs_attention_pct(&self) -> f64 {
        self.pct(self.needs_attention)
    }

    fn pct(&self, count: usize) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            count as f64 * 100.0 / self.total as f64
        }
    }
}

/// Count tier membership for one metric across a chapter.
///
/// Members whose ratio is undefined or in the dead zone land in the neutral
/// bucket, so the four counts always sum to `values.len()`.
#[must_use]
pub fn count_tiers(values: &BTreeMap<String, f64>, average: f64) -> TierBreakdown {
    let mut breakdown = TierBreakdown {
        total: values.len(),
        ..TierBreakdown::default()
    };
    for value in values.values() {
        match classify(*value, average) {
            Some(Tier::Excellent) => breakdown.excellent += 1,
            Some(Tier::GoodAverage) => breakdown.good_average += 1,
            Some(Tier::NeedsAttention) => breakdown.needs_attention += 1,
            None => breakdown.neutral += 1,
        }
    }
    breakdown
}

/// Arithmetic mean of a metric-value map; zero for an empty map.
#[must_use]
pub fn chapter_average(values: &BTreeMap<String, f64>) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.values().sum::<f64>() / values.len() as f64
    }
}
