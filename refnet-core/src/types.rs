//! Core type definitions for the refnet analytics engine.
//!
//! All cacheable types are serializable; matrices are plain dense buffers
//! sized to the chapter roster (tens to low hundreds of members).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

/// Unique identifier for a chapter member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberId(pub Uuid);

impl MemberId {
    /// Create a new random member ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MemberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChapterId(pub Uuid);

impl ChapterId {
    /// Create a new random chapter ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChapterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Reporting Periods
// ---------------------------------------------------------------------------

/// A reporting period — one calendar month of relationship activity.
///
/// Ordering is chronological (`2025-12 < 2026-01`), which the aggregator
/// relies on when scanning for a member's last active period.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PeriodKey {
    /// Calendar year.
    pub year: i32,
    /// Calendar month, 1–12.
    pub month: u32,
}

impl PeriodKey {
    /// Create a period key, clamping the month into 1–12.
    #[must_use]
    pub fn new(year: i32, month: u32) -> Self {
        Self {
            year,
            month: month.clamp(1, 12),
        }
    }

    /// Period containing the given calendar date.
    #[must_use]
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// The period immediately after this one.
    #[must_use]
    pub fn next(self) -> Self {
        if self.month == 12 {
            Self::new(self.year + 1, 1)
        } else {
            Self::new(self.year, self.month + 1)
        }
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for PeriodKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (y, m) = s
            .split_once('-')
            .ok_or_else(|| format!("invalid period key: {s}"))?;
        let year: i32 = y.parse().map_err(|_| format!("invalid year in: {s}"))?;
        let month: u32 = m.parse().map_err(|_| format!("invalid month in: {s}"))?;
        if !(1..=12).contains(&month) {
            return Err(format!("month out of range in: {s}"));
        }
        Ok(Self { year, month })
    }
}

// ---------------------------------------------------------------------------
// Members
// ---------------------------------------------------------------------------

/// A chapter-scoped member identity.
///
/// `(chapter, normalized_name)` is unique within the member directory; the
/// directory itself is owned by the calling layer — the engine only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    /// Stable member ID.
    pub id: MemberId,
    /// Chapter this member belongs to.
    pub chapter: ChapterId,
    /// Given name as entered.
    pub first_name: String,
    /// Family name as entered.
    pub last_name: String,
    /// Normalized full-name key (lowercased, whitespace-collapsed,
    /// honorifics and suffixes stripped). Recomputed on rename.
    pub normalized_name: String,
}

impl Member {
    /// Create a member, computing the normalized-name key.
    #[must_use]
    pub fn new(chapter: ChapterId, first_name: &str, last_name: &str) -> Self {
        let mut member = Self {
            id: MemberId::new(),
            chapter,
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
            normalized_name: String::new(),
        };
        member.normalized_name = crate::matcher::normalize(&member.display_name());
        member
    }

    /// Full display name, "First Last".
    #[must_use]
    pub fn display_name(&self) -> String {
        if self.last_name.is_empty() {
            self.first_name.clone()
        } else {
            format!("{} {}", self.first_name, self.last_name)
        }
    }

    /// Rename the member, recomputing the normalized key.
    pub fn rename(&mut self, first_name: &str, last_name: &str) {
        self.first_name = first_name.trim().to_string();
        self.last_name = last_name.trim().to_string();
        self.normalized_name = crate::matcher::normalize(&self.display_name());
    }
}

// ---------------------------------------------------------------------------
// Relationship Events
// ---------------------------------------------------------------------------

/// Category of a relationship event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Directed introduction credit from one member to another.
    Referral,
    /// Undirected relationship-building encounter between two members.
    Meeting,
    /// Monetary value a member reports receiving, optionally attributed.
    Credit,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Referral => write!(f, "referral"),
            Self::Meeting => write!(f, "meeting"),
            Self::Credit => write!(f, "credit"),
        }
    }
}

/// A single resolved relationship event.
///
/// Events arrive pre-validated from the import pipeline: both parties belong
/// to the same chapter and no event is a self-edge. The matrix builder
/// re-checks both invariants and treats a violation as a contract breach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipEvent {
    /// Event category.
    pub kind: EventKind,
    /// Giving party. `None` only for unattributed credits.
    pub giver: Option<MemberId>,
    /// Receiving party.
    pub receiver: MemberId,
    /// Chapter both parties belong to.
    pub chapter: ChapterId,
    /// Reporting period this event falls into.
    pub period: PeriodKey,
    /// Monetary magnitude (credits only).
    pub amount: Option<f64>,
    /// Free-text detail. For credits, non-empty detail marks the business
    /// as closed outside the chapter.
    pub detail: String,
}

impl RelationshipEvent {
    /// A referral from `giver` to `receiver`.
    #[must_use]
    pub fn referral(
        chapter: ChapterId,
        period: PeriodKey,
        giver: MemberId,
        receiver: MemberId,
    ) -> Self {
        Self {
            kind: EventKind::Referral,
            giver: Some(giver),
            receiver,
            chapter,
            period,
            amount: None,
            detail: String::new(),
        }
    }

    /// A one-to-one meeting between `a` and `b`.
    #[must_use]
    pub fn meeting(chapter: ChapterId, period: PeriodKey, a: MemberId, b: MemberId) -> Self {
        Self {
            kind: EventKind::Meeting,
            giver: Some(a),
            receiver: b,
            chapter,
            period,
            amount: None,
            detail: String::new(),
        }
    }

    /// A closed-business credit reported by `receiver`.
    #[must_use]
    pub fn credit(
        chapter: ChapterId,
        period: PeriodKey,
        giver: Option<MemberId>,
        receiver: MemberId,
        amount: f64,
        detail: &str,
    ) -> Self {
        Self {
            kind: EventKind::Credit,
            giver,
            receiver,
            chapter,
            period,
            amount: Some(amount),
            detail: detail.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Relationship Matrices
// ---------------------------------------------------------------------------

/// Dense square matrix of `u32` cells keyed by an ordered member-name list.
///
/// Rows index the giving party and columns the receiving party. Combination
/// matrices reuse the same shape with cell values restricted to 0–3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationMatrix {
    /// Ordered member-name list this matrix is keyed by.
    pub names: Vec<String>,
    /// Row-major cell buffer, `names.len() × names.len()` entries.
    pub cells: Vec<u32>,
}

impl RelationMatrix {
    /// Allocate a zero matrix over the given ordered name list.
    #[must_use]
    pub fn zeroed(names: Vec<String>) -> Self {
        let n = names.len();
        Self {
            names,
            cells: vec![0; n * n],
        }
    }

    /// Number of members (rows == columns).
    #[must_use]
    pub fn size(&self) -> usize {
        self.names.len()
    }

    /// Whether the cell buffer matches the name list.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.cells.len() == self.names.len() * self.names.len()
    }

    /// Cell value at `(row, col)`. Out-of-range indices read as zero.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> u32 {
        let n = self.size();
        if row < n && col < n {
            self.cells[row * n + col]
        } else {
            0
        }
    }

    /// Set the cell at `(row, col)`. Out-of-range indices are ignored.
    pub fn set(&mut self, row: usize, col: usize, value: u32) {
        let n = self.size();
        if row < n && col < n {
            self.cells[row * n + col] = value;
        }
    }

    /// Add `delta` into the cell at `(row, col)`, saturating.
    pub fn add(&mut self, row: usize, col: usize, delta: u32) {
        let n = self.size();
        if row < n && col < n {
            let cell = &mut self.cells[row * n + col];
            *cell = cell.saturating_add(delta);
        }
    }

    /// Index of a member name in the key list, if present.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Cell value for a `(giver, receiver)` name pair; zero if either name
    /// is absent from the key list.
    #[must_use]
    pub fn get_by_name(&self, giver: &str, receiver: &str) -> u32 {
        match (self.index_of(giver), self.index_of(receiver)) {
            (Some(r), Some(c)) => self.get(r, c),
            _ => 0,
        }
    }

    /// Sum of all cells.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.cells.iter().map(|&c| u64::from(c)).sum()
    }

    /// Sum of the given row (activity given by that member).
    #[must_use]
    pub fn row_total(&self, row: usize) -> u64 {
        let n = self.size();
        if row >= n {
            return 0;
        }
        self.cells[row * n..(row + 1) * n]
            .iter()
            .map(|&c| u64::from(c))
            .sum()
    }

    /// Sum of the given column (activity received by that member).
    #[must_use]
    pub fn col_total(&self, col: usize) -> u64 {
        let n = self.size();
        if col >= n {
            return 0;
        }
        (0..n).map(|r| u64::from(self.cells[r * n + col])).sum()
    }
}

// ---------------------------------------------------------------------------
// Credit Summaries
// ---------------------------------------------------------------------------

/// Per-member closed-business totals for one period.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CreditTotals {
    /// Value closed within the chapter.
    pub inside: f64,
    /// Value closed outside the chapter.
    pub outside: f64,
    /// Number of credit events recorded.
    pub count: u32,
}

impl CreditTotals {
    /// Combined inside + outside value.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.inside + self.outside
    }
}

/// Credit totals keyed by member name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CreditSummary {
    /// Per-member totals, sorted by name for stable serialization.
    pub totals: BTreeMap<String, CreditTotals>,
}

impl CreditSummary {
    /// Create an empty summary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a credit amount for a member.
    pub fn record(&mut self, name: &str, amount: f64, outside: bool) {
        let entry = self.totals.entry(name.to_string()).or_default();
        if outside {
            entry.outside += amount;
        } else {
            entry.inside += amount;
        }
        entry.count += 1;
    }

    /// Totals for a member, zeroed if none were recorded.
    #[must_use]
    pub fn get(&self, name: &str) -> CreditTotals {
        self.totals.get(name).copied().unwrap_or_default()
    }

    /// Merge another summary into this one.
    pub fn merge(&mut self, other: &Self) {
        for (name, totals) in &other.totals {
            let entry = self.totals.entry(name.clone()).or_default();
            entry.inside += totals.inside;
            entry.outside += totals.outside;
            entry.count += totals.count;
        }
    }
}

// ---------------------------------------------------------------------------
// Metric Values
// ---------------------------------------------------------------------------

/// Totally-ordered wrapper over an `f64` metric value, used wherever member
/// metrics are ranked or compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricValue(pub OrderedFloat<f64>);

impl MetricValue {
    /// Wrap a raw metric value.
    #[must_use]
    pub fn new(value: f64) -> Self {
        Self(OrderedFloat(value))
    }

    /// The raw value.
    #[must_use]
    pub fn value(self) -> f64 {
        self.0.into_inner()
    }
}
