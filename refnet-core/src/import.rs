//! Batch row-resolution pipeline — raw import rows → relationship events.
//!
//! This is the only ingestion surface: a whole batch of rows goes through
//! name resolution in one pass, producing the event list the matrix builder
//! consumes plus one warning per rejected row. A rejected row is excluded
//! from numeric totals entirely — never zero-filled against a wrong member —
//! and never aborts the batch.

use tracing::debug;

use crate::matcher::{MemberLookup, MissReason, Resolution};
use crate::types::{EventKind, Member, PeriodKey, RelationshipEvent};

/// One raw import row, as extracted from a known spreadsheet layout by the
/// (external) parsing collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEventRow {
    /// Event category this row reports.
    pub kind: EventKind,
    /// Free-text giver name. Absent for unattributed credits.
    pub giver_text: Option<String>,
    /// Free-text receiver name.
    pub receiver_text: String,
    /// Monetary amount (credits only).
    pub amount: Option<f64>,
    /// Free-text detail column.
    pub detail: String,
}

impl RawEventRow {
    /// A referral row.
    #[must_use]
    pub fn referral(giver: &str, receiver: &str) -> Self {
        Self {
            kind: EventKind::Referral,
            giver_text: Some(giver.to_string()),
            receiver_text: receiver.to_string(),
            amount: None,
            detail: String::new(),
        }
    }

    /// A one-to-one meeting row.
    #[must_use]
    pub fn meeting(a: &str, b: &str) -> Self {
        Self {
            kind: EventKind::Meeting,
            giver_text: Some(a.to_string()),
            receiver_text: b.to_string(),
            amount: None,
            detail: String::new(),
        }
    }

    /// A closed-business credit row.
    #[must_use]
    pub fn credit(giver: Option<&str>, receiver: &str, amount: f64, detail: &str) -> Self {
        Self {
            kind: EventKind::Credit,
            giver_text: giver.map(str::to_string),
            receiver_text: receiver.to_string(),
            amount: Some(amount),
            detail: detail.to_string(),
        }
    }
}

/// Why a row was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum RowWarningKind {
    /// A name field failed to resolve.
    NameMiss {
        /// The text as received.
        input: String,
        /// Why resolution failed.
        reason: MissReason,
    },
    /// Giver and receiver resolved to the same member.
    SelfPair {
        /// The member appearing on both sides.
        name: String,
    },
    /// A referral or meeting row without a giver column.
    MissingGiver,
    /// A credit row without an amount.
    MissingAmount,
}

/// A warning attached to one source row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowWarning {
    /// Zero-based index of the row within the batch.
    pub row: usize,
    /// What was wrong with it.
    pub kind: RowWarningKind,
}

/// The outcome of resolving one batch of rows.
#[derive(Debug, Clone, Default)]
pub struct ResolveOutcome {
    /// Events ready for the matrix builder.
    pub events: Vec<RelationshipEvent>,
    /// One warning per rejected row.
    pub warnings: Vec<RowWarning>,
}

impl ResolveOutcome {
    /// Rows that produced an event.
    #[must_use]
    pub fn resolved_count(&self) -> usize {
        self.events.len()
    }

    /// Rows that were rejected.
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.warnings.len()
    }
}

/// Resolve a batch of raw rows against a chapter lookup.
///
/// Every event in the result satisfies the matrix builder's contract: both
/// parties resolved within the lookup's chapter and no self-edges. Rows that
/// cannot satisfy it become warnings instead.
#[must_use]
pub fn resolve_rows(
    period: PeriodKey,
    rows: &[RawEventRow],
    lookup: &MemberLookup,
) -> ResolveOutcome {
    let mut outcome = ResolveOutcome::default();

    for (index, row) in rows.iter().enumerate() {
        match resolve_row(period, row, lookup) {
            Ok(event) => outcome.events.push(event),
            Err(kind) => outcome.warnings.push(RowWarning { row: index, kind }),
        }
    }

    debug!(
        period = %period,
        rows = rows.len(),
        resolved = outcome.resolved_count(),
        skipped = outcome.skipped_count(),
        "Resolved import batch"
    );
    outcome
}

fn resolve_row(
    period: PeriodKey,
    row: &RawEventRow,
    lookup: &MemberLookup,
) -> Result<RelationshipEvent, RowWarningKind> {
    let receiver = resolve_name(&row.receiver_text, lookup)?;

    let giver: Option<Member> = match (&row.giver_text, row.kind) {
        (Some(text), _) if !text.trim().is_empty() => Some(resolve_name(text, lookup)?),
        // Credits may legitimately arrive unattributed.
        (_, EventKind::Credit) => None,
        (_, EventKind::Referral | EventKind::Meeting) => {
            return Err(RowWarningKind::MissingGiver);
        }
    };

    if let Some(ref giver) = giver {
        if giver.id == receiver.id {
            return Err(RowWarningKind::SelfPair {
                name: receiver.display_name(),
            });
        }
    }

    let chapter = receiver.chapter;
    match row.kind {
        EventKind::Referral => {
            let giver = giver.ok_or(RowWarningKind::MissingGiver)?;
            Ok(RelationshipEvent::referral(
                chapter,
                period,
                giver.id,
                receiver.id,
            ))
        }
        EventKind::Meeting => {
            let giver = giver.ok_or(RowWarningKind::MissingGiver)?;
            Ok(RelationshipEvent::meeting(
                chapter,
                period,
                giver.id,
                receiver.id,
            ))
        }
        EventKind::Credit => {
            let amount = row.amount.ok_or(RowWarningKind::MissingAmount)?;
            Ok(RelationshipEvent::credit(
                chapter,
                period,
                giver.map(|g| g.id),
                receiver.id,
                amount,
                &row.detail,
            ))
        }
    }
}

fn resolve_name(text: &str, lookup: &MemberLookup) -> Result<Member, RowWarningKind> {
    match lookup.resolve(text) {
        Resolution::Matched { member, .. } => Ok(member),
        Resolution::Miss { input, reason } => Err(RowWarningKind::NameMiss { input, reason }),
    }
}
