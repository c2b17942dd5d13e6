//! Per-period relationship matrix builder.
//!
//! Pure, side-effect-free conversion of one period's resolved events into
//! the four cached categories: referral counts (directed), meeting counts
//! (symmetric), combination codes (derived), and credit summaries. All
//! outputs are deterministic functions of their inputs; no I/O happens here.
//!
//! Data-quality problems (an event naming a member missing from the roster,
//! a mislabeled period) are reported as [`BuildWarning`]s and the event is
//! excluded from totals. Structural invariants — no self-edges, no
//! cross-chapter edges — are a different matter: they are guaranteed by the
//! import pipeline, so an event breaching one here means the calling layer
//! broke its contract, and the builder fails hard with
//! [`RefnetError::InvariantViolation`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{InvariantViolation, RefnetError, Result};
use crate::types::{
    ChapterId, CreditSummary, EventKind, Member, MemberId, PeriodKey, RelationMatrix,
    RelationshipEvent,
};

// ---------------------------------------------------------------------------
// Combination codes
// ---------------------------------------------------------------------------

/// Combination code: no referrals and no meetings between the pair.
pub const COMBO_NEITHER: u32 = 0;
/// Combination code: meetings only.
pub const COMBO_MEETING_ONLY: u32 = 1;
/// Combination code: referrals only.
pub const COMBO_REFERRAL_ONLY: u32 = 2;
/// Combination code: both referrals and meetings.
pub const COMBO_BOTH: u32 = 3;

// ---------------------------------------------------------------------------
// Period bundle
// ---------------------------------------------------------------------------

/// The cached unit for one period: all four categories plus the ordered
/// member-name list they are keyed by.
///
/// A bundle is a pure derivation from events and is never hand-edited; the
/// cache store replaces all four categories together so no reader observes
/// a half-updated period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodBundle {
    /// Chapter the bundle belongs to.
    pub chapter: ChapterId,
    /// Period the bundle covers.
    pub period: PeriodKey,
    /// Lexically sorted, deduplicated member-name list.
    pub members: Vec<String>,
    /// Directed referral counts.
    pub referral: RelationMatrix,
    /// Symmetric meeting counts.
    pub meeting: RelationMatrix,
    /// Derived combination codes (0–3).
    pub combination: RelationMatrix,
    /// Per-member credit totals.
    pub credit: CreditSummary,
}

impl PeriodBundle {
    /// Whether all four categories agree on the member list and shape.
    ///
    /// The aggregator treats an inconsistent bundle as absent data: it
    /// contributes zero everywhere rather than failing the aggregation.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.members.windows(2).all(|w| w[0] < w[1])
            && self.referral.names == self.members
            && self.meeting.names == self.members
            && self.combination.names == self.members
            && self.referral.is_well_formed()
            && self.meeting.is_well_formed()
            && self.combination.is_well_formed()
            && self.credit.totals.keys().all(|k| self.members.contains(k))
    }
}

// ---------------------------------------------------------------------------
// Build warnings
// ---------------------------------------------------------------------------

/// A non-fatal problem with one event encountered during a build.
///
/// The event is skipped — excluded from totals rather than zero-filled
/// against a wrong member.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildWarning {
    /// An event referenced a member ID absent from the roster.
    UnknownMember {
        /// Event category.
        kind: EventKind,
        /// The unresolvable member ID.
        member: MemberId,
    },
    /// An event carried a period marker other than the one being built.
    WrongPeriod {
        /// Period being built.
        expected: PeriodKey,
        /// Period the event carried.
        actual: PeriodKey,
    },
    /// A credit event arrived without an amount.
    MissingAmount {
        /// The receiving member.
        member: MemberId,
    },
    /// A referral or meeting arrived without a giving party.
    MissingGiver {
        /// Event category.
        kind: EventKind,
        /// The receiving member.
        member: MemberId,
    },
}

/// A built bundle together with the warnings produced along the way.
#[derive(Debug, Clone)]
pub struct PeriodBundleBuild {
    /// The assembled bundle.
    pub bundle: PeriodBundle,
    /// Per-event data-quality warnings.
    pub warnings: Vec<BuildWarning>,
}

// ---------------------------------------------------------------------------
// Roster indexing
// ---------------------------------------------------------------------------

/// Row assignment for a roster: sorted names plus an ID → row map.
struct Roster {
    names: Vec<String>,
    row_of: HashMap<MemberId, usize>,
    chapter: Option<ChapterId>,
}

impl Roster {
    /// Sort and deduplicate the member list, assigning one row per name.
    ///
    /// Returns an error if the roster itself spans chapters — a roster is
    /// chapter-scoped by contract.
    fn index(members: &[Member]) -> Result<Self> {
        let chapter = members.first().map(|m| m.chapter);
        if let Some(expected) = chapter {
            if let Some(stray) = members.iter().find(|m| m.chapter != expected) {
                return Err(RefnetError::InvariantViolation(
                    InvariantViolation::CrossChapter {
                        expected: expected.to_string(),
                        actual: stray.chapter.to_string(),
                    },
                ));
            }
        }

        let mut names: Vec<String> = members.iter().map(Member::display_name).collect();
        names.sort();
        names.dedup();

        let mut row_of = HashMap::with_capacity(members.len());
        for member in members {
            let name = member.display_name();
            if let Ok(row) = names.binary_search(&name) {
                row_of.insert(member.id, row);
            }
        }

        Ok(Self {
            names,
            row_of,
            chapter,
        })
    }

    fn row(&self, id: MemberId) -> Option<usize> {
        self.row_of.get(&id).copied()
    }

    fn name_of(&self, id: MemberId) -> Option<&str> {
        self.row(id).map(|r| self.names[r].as_str())
    }
}

/// Validate the structural invariants on one event.
fn check_event(
    event: &RelationshipEvent,
    roster: &Roster,
    period: PeriodKey,
) -> Result<()> {
    if let Some(expected) = roster.chapter {
        if event.chapter != expected {
            return Err(RefnetError::InvariantViolation(
                InvariantViolation::CrossChapter {
                    expected: expected.to_string(),
                    actual: event.chapter.to_string(),
                },
            ));
        }
    }
    if let Some(giver) = event.giver {
        if giver == event.receiver {
            let member = roster
                .name_of(giver)
                .map_or_else(|| giver.to_string(), str::to_string);
            return Err(RefnetError::InvariantViolation(InvariantViolation::SelfEdge {
                member,
                period: period.to_string(),
            }));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Category builders
// ---------------------------------------------------------------------------

/// Build the directed referral-count matrix for one period.
///
/// `M[giver][receiver] += 1` per referral; the diagonal is zero regardless
/// of input.
///
/// # Errors
///
/// [`RefnetError::InvariantViolation`] on a self-edge or cross-chapter edge.
pub fn referral_matrix(
    members: &[Member],
    events: &[RelationshipEvent],
    period: PeriodKey,
) -> Result<(RelationMatrix, Vec<BuildWarning>)> {
    let roster = Roster::index(members)?;
    let mut matrix = RelationMatrix::zeroed(roster.names.clone());
    let mut warnings = Vec::new();

    for event in events.iter().filter(|e| e.kind == EventKind::Referral) {
        check_event(event, &roster, period)?;
        if event.period != period {
            warnings.push(BuildWarning::WrongPeriod {
                expected: period,
                actual: event.period,
            });
            continue;
        }
        let Some(giver) = event.giver else {
            warnings.push(BuildWarning::MissingGiver {
                kind: EventKind::Referral,
                member: event.receiver,
            });
            continue;
        };
        match (roster.row(giver), roster.row(event.receiver)) {
            (Some(row), Some(col)) => matrix.add(row, col, 1),
            (None, _) => warnings.push(BuildWarning::UnknownMember {
                kind: EventKind::Referral,
                member: giver,
            }),
            (_, None) => warnings.push(BuildWarning::UnknownMember {
                kind: EventKind::Referral,
                member: event.receiver,
            }),
        }
    }

    zero_diagonal(&mut matrix);
    Ok((matrix, warnings))
}

/// Build the symmetric meeting-count matrix for one period.
///
/// Each meeting increments both `M[a][b]` and `M[b][a]`.
///
/// # Errors
///
/// [`RefnetError::InvariantViolation`] on a self-edge or cross-chapter edge.
pub fn meeting_matrix(
    members: &[Member],
    events: &[RelationshipEvent],
    period: PeriodKey,
) -> Result<(RelationMatrix, Vec<BuildWarning>)> {
    let roster = Roster::index(members)?;
    let mut matrix = RelationMatrix::zeroed(roster.names.clone());
    let mut warnings = Vec::new();

    for event in events.iter().filter(|e| e.kind == EventKind::Meeting) {
        check_event(event, &roster, period)?;
        if event.period != period {
            warnings.push(BuildWarning::WrongPeriod {
                expected: period,
                actual: event.period,
            });
            continue;
        }
        let Some(a) = event.giver else {
            warnings.push(BuildWarning::MissingGiver {
                kind: EventKind::Meeting,
                member: event.receiver,
            });
            continue;
        };
        match (roster.row(a), roster.row(event.receiver)) {
            (Some(row), Some(col)) => {
                matrix.add(row, col, 1);
                matrix.add(col, row, 1);
            }
            (None, _) => warnings.push(BuildWarning::UnknownMember {
                kind: EventKind::Meeting,
                member: a,
            }),
            (_, None) => warnings.push(BuildWarning::UnknownMember {
                kind: EventKind::Meeting,
                member: event.receiver,
            }),
        }
    }

    zero_diagonal(&mut matrix);
    Ok((matrix, warnings))
}

/// Derive the combination-code matrix from referral and meeting matrices.
///
/// Per-cell code: `2·(referral>0) + 1·(meeting>0)` ∈ {0,1,2,3}. Combination
/// matrices are always derived this way, never independently populated —
/// codes are not additive, so the aggregator recomputes them from unioned
/// counts instead of summing cached codes.
#[must_use]
pub fn combination_matrix(referral: &RelationMatrix, meeting: &RelationMatrix) -> RelationMatrix {
    let mut combo = RelationMatrix::zeroed(referral.names.clone());
    let n = combo.size();
    for row in 0..n {
        for col in 0..n {
            let has_referral = u32::from(referral.get(row, col) > 0);
            let has_meeting = u32::from(meeting.get(row, col) > 0);
            combo.set(row, col, 2 * has_referral + has_meeting);
        }
    }
    combo
}

/// Build the per-member credit summary for one period.
///
/// A credit counts as closed **outside** the chapter iff its free-text
/// detail is non-empty, **inside** iff blank. This is a pre-existing
/// data-entry convention rather than a structural guarantee; re-validate it
/// before wiring up new import sources.
///
/// # Errors
///
/// [`RefnetError::InvariantViolation`] on a self-edge or cross-chapter edge.
pub fn credit_summary(
    members: &[Member],
    events: &[RelationshipEvent],
    period: PeriodKey,
) -> Result<(CreditSummary, Vec<BuildWarning>)> {
    let roster = Roster::index(members)?;
    let mut summary = CreditSummary::new();
    let mut warnings = Vec::new();

    for event in events.iter().filter(|e| e.kind == EventKind::Credit) {
        check_event(event, &roster, period)?;
        if event.period != period {
            warnings.push(BuildWarning::WrongPeriod {
                expected: period,
                actual: event.period,
            });
            continue;
        }
        let Some(amount) = event.amount else {
            warnings.push(BuildWarning::MissingAmount {
                member: event.receiver,
            });
            continue;
        };
        let Some(name) = roster.name_of(event.receiver) else {
            warnings.push(BuildWarning::UnknownMember {
                kind: EventKind::Credit,
                member: event.receiver,
            });
            continue;
        };
        let outside = !event.detail.trim().is_empty();
        summary.record(name, amount, outside);
    }

    Ok((summary, warnings))
}

/// Build the full four-category bundle for one period.
///
/// This is the single entry point the import flow uses; the cache store
/// persists its output as one atomic unit.
///
/// # Errors
///
/// [`RefnetError::InvariantViolation`] on a self-edge or cross-chapter edge.
pub fn build_period_bundle(
    chapter: ChapterId,
    period: PeriodKey,
    members: &[Member],
    events: &[RelationshipEvent],
) -> Result<PeriodBundleBuild> {
    if let Some(stray) = members.iter().find(|m| m.chapter != chapter) {
        return Err(RefnetError::InvariantViolation(
            InvariantViolation::CrossChapter {
                expected: chapter.to_string(),
                actual: stray.chapter.to_string(),
            },
        ));
    }

    let (referral, mut warnings) = referral_matrix(members, events, period)?;
    let (meeting, meeting_warnings) = meeting_matrix(members, events, period)?;
    let (credit, credit_warnings) = credit_summary(members, events, period)?;
    warnings.extend(meeting_warnings);
    warnings.extend(credit_warnings);

    let combination = combination_matrix(&referral, &meeting);
    let members_list = referral.names.clone();

    debug!(
        chapter = %chapter,
        period = %period,
        members = members_list.len(),
        events = events.len(),
        warnings = warnings.len(),
        "Built period bundle"
    );

    Ok(PeriodBundleBuild {
        bundle: PeriodBundle {
            chapter,
            period,
            members: members_list,
            referral,
            meeting,
            combination,
            credit,
        },
        warnings,
    })
}

fn zero_diagonal(matrix: &mut RelationMatrix) {
    for i in 0..matrix.size() {
        matrix.set(i, i, 0);
    }
}
