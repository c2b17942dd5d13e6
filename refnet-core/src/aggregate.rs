//! Multi-period aggregation.
//!
//! Combines N already-built [`PeriodBundle`]s into one cross-period view:
//! unioned matrices over the full member universe, per-member completeness,
//! inactive-member detection, and chapter statistics.
//!
//! Member sets differ per period, so cells are unioned by member name —
//! never by positional index. Names are resolved to stable integer slots
//! exactly once per aggregation call; the inner loops work on slots.
//!
//! The aggregate is ephemeral: computed on demand, never persisted.

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use crate::matrix::{self, PeriodBundle};
use crate::types::{CreditSummary, MetricValue, PeriodKey, RelationMatrix};

/// How many members the top-contributor rankings keep.
const TOP_N: usize = 5;

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// How many of the aggregated periods a member was present for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completeness {
    /// Periods whose member list contained this member.
    pub present: u32,
    /// Total periods requested (malformed ones included).
    pub total: u32,
}

impl Completeness {
    /// Presence as a percentage of requested periods.
    #[must_use]
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.present) * 100.0 / f64::from(self.total)
        }
    }
}

/// A member present in an earlier period but absent from the latest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InactiveMember {
    /// Member display name.
    pub name: String,
    /// The most recent period the member appeared in — not the first
    /// absence, so a member who disappears and reappears is not mis-flagged.
    pub last_active: PeriodKey,
}

/// A non-fatal problem with one requested period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregateWarning {
    /// A bundle's cached matrices were absent or internally inconsistent.
    /// The period contributed zero everywhere; the gap stays visible through
    /// completeness.
    MalformedBundle {
        /// The affected period.
        period: PeriodKey,
        /// What was wrong with the cached data.
        reason: String,
    },
}

/// Chapter-level statistics over the aggregated span.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChapterStats {
    /// Members in the universe.
    pub member_count: usize,
    /// Periods requested (malformed ones included).
    pub period_count: usize,
    /// Total referrals across the span.
    pub referral_total: u64,
    /// Total distinct meetings across the span.
    pub meeting_total: u64,
    /// Total credit closed within the chapter.
    pub credit_inside_total: f64,
    /// Total credit closed outside the chapter.
    pub credit_outside_total: f64,
    /// Mean referrals given per universe member.
    pub avg_referrals_given: f64,
    /// Mean meetings held per universe member.
    pub avg_meetings_held: f64,
    /// Mean credit received per universe member.
    pub avg_credit_received: f64,
    /// Members ranked by referrals given, best first.
    pub top_referrers: Vec<(String, u64)>,
    /// Members ranked by credit received, best first.
    pub top_credit_receivers: Vec<(String, f64)>,
}

/// The cross-period view produced by [`aggregate`].
#[derive(Debug, Clone)]
pub struct AggregateResult {
    /// Sorted union of every member name seen in any period.
    pub universe: Vec<String>,
    /// Unioned directed referral counts.
    pub referral: RelationMatrix,
    /// Unioned symmetric meeting counts.
    pub meeting: RelationMatrix,
    /// Combination codes recomputed from the unioned counts.
    pub combination: RelationMatrix,
    /// Unioned per-member credit totals.
    pub credit: CreditSummary,
    /// Per-member period presence.
    pub completeness: BTreeMap<String, Completeness>,
    /// Members absent from the latest period, with their last active period.
    pub inactive: Vec<InactiveMember>,
    /// Chapter-level statistics.
    pub stats: ChapterStats,
    /// Structural problems encountered, one per degraded period.
    pub warnings: Vec<AggregateWarning>,
    /// The requested periods in chronological order.
    pub periods: Vec<PeriodKey>,
}

impl AggregateResult {
    /// Referrals given per universe member, as a metric-value map for the
    /// classifier.
    #[must_use]
    pub fn referrals_given(&self) -> BTreeMap<String, f64> {
        self.universe
            .iter()
            .enumerate()
            .map(|(row, name)| (name.clone(), self.referral.row_total(row) as f64))
            .collect()
    }

    /// Meetings held per universe member.
    #[must_use]
    pub fn meetings_held(&self) -> BTreeMap<String, f64> {
        self.universe
            .iter()
            .enumerate()
            .map(|(row, name)| (name.clone(), self.meeting.row_total(row) as f64))
            .collect()
    }

    /// Credit received per universe member (inside + outside).
    #[must_use]
    pub fn credit_received(&self) -> BTreeMap<String, f64> {
        self.universe
            .iter()
            .map(|name| (name.clone(), self.credit.get(name).total()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Union N period bundles into one cross-period view.
///
/// Bundles are sorted chronologically before the churn scan, so callers may
/// pass them in any order. A bundle failing [`PeriodBundle::is_consistent`]
/// contributes zero everywhere and is reported as a warning; it still counts
/// toward each member's completeness denominator. Zero periods yield an
/// empty result, never an error.
#[must_use]
pub fn aggregate(bundles: &[PeriodBundle]) -> AggregateResult {
    let mut ordered: Vec<&PeriodBundle> = bundles.iter().collect();
    ordered.sort_by_key(|b| b.period);

    let periods: Vec<PeriodKey> = ordered.iter().map(|b| b.period).collect();
    let mut warnings = Vec::new();
    let mut usable: Vec<&PeriodBundle> = Vec::with_capacity(ordered.len());
    for bundle in ordered {
        if bundle.is_consistent() {
            usable.push(bundle);
        } else {
            warnings.push(AggregateWarning::MalformedBundle {
                period: bundle.period,
                reason: "cached matrices disagree on the member list".to_string(),
            });
        }
    }

    // Member universe: union over every usable period's member list.
    let mut universe: Vec<String> = usable
        .iter()
        .flat_map(|b| b.members.iter().cloned())
        .collect();
    universe.sort();
    universe.dedup();

    let mut referral = RelationMatrix::zeroed(universe.clone());
    let mut meeting = RelationMatrix::zeroed(universe.clone());
    let mut credit = CreditSummary::new();

    {
        // Name → slot arena, built once; all cell unions go through slots.
        let slot_of: HashMap<&str, usize> = universe
            .iter()
            .enumerate()
            .map(|(slot, name)| (name.as_str(), slot))
            .collect();

        for bundle in &usable {
            // Local row → universe slot, computed once per bundle.
            let slots: Vec<usize> = bundle
                .members
                .iter()
                .map(|name| slot_of[name.as_str()])
                .collect();

            let n = bundle.members.len();
            for row in 0..n {
                for col in 0..n {
                    let r = bundle.referral.get(row, col);
                    if r > 0 {
                        referral.add(slots[row], slots[col], r);
                    }
                    let m = bundle.meeting.get(row, col);
                    if m > 0 {
                        meeting.add(slots[row], slots[col], m);
                    }
                }
            }
            credit.merge(&bundle.credit);
        }
    }

    // Combination codes are not additive; recompute from the unioned counts.
    let combination = matrix::combination_matrix(&referral, &meeting);

    let total_periods = u32::try_from(periods.len()).unwrap_or(u32::MAX);
    let completeness: BTreeMap<String, Completeness> = universe
        .iter()
        .map(|name| {
            let present = usable
                .iter()
                .filter(|b| b.members.binary_search(name).is_ok())
                .count();
            (
                name.clone(),
                Completeness {
                    present: u32::try_from(present).unwrap_or(u32::MAX),
                    total: total_periods,
                },
            )
        })
        .collect();

    let inactive = find_inactive(&universe, &usable);
    let stats = compute_stats(&universe, &referral, &meeting, &credit, periods.len());

    debug!(
        periods = periods.len(),
        degraded = warnings.len(),
        members = universe.len(),
        referrals = stats.referral_total,
        "Aggregated period bundles"
    );

    AggregateResult {
        universe,
        referral,
        meeting,
        combination,
        credit,
        completeness,
        inactive,
        stats,
        warnings,
        periods,
    }
}

/// Members present in an earlier period but absent from the latest usable
/// one. `last_active` scans chronologically for the most recent appearance.
fn find_inactive(universe: &[String], usable: &[&PeriodBundle]) -> Vec<InactiveMember> {
    let Some(latest) = usable.last() else {
        return Vec::new();
    };

    let mut inactive = Vec::new();
    for name in universe {
        if latest.members.binary_search(name).is_ok() {
            continue;
        }
        let last_active = usable
            .iter()
            .filter(|b| b.members.binary_search(name).is_ok())
            .map(|b| b.period)
            .max();
        if let Some(last_active) = last_active {
            inactive.push(InactiveMember {
                name: name.clone(),
                last_active,
            });
        }
    }
    inactive
}

fn compute_stats(
    universe: &[String],
    referral: &RelationMatrix,
    meeting: &RelationMatrix,
    credit: &CreditSummary,
    period_count: usize,
) -> ChapterStats {
    let member_count = universe.len();
    let referral_total = referral.total();
    // The meeting matrix records each encounter twice (symmetry).
    let meeting_total = meeting.total() / 2;
    let credit_inside_total: f64 = credit.totals.values().map(|t| t.inside).sum();
    let credit_outside_total: f64 = credit.totals.values().map(|t| t.outside).sum();

    let denom = member_count as f64;
    let (avg_referrals_given, avg_meetings_held, avg_credit_received) = if member_count == 0 {
        (0.0, 0.0, 0.0)
    } else {
        (
            referral_total as f64 / denom,
            meeting_total as f64 / denom,
            (credit_inside_total + credit_outside_total) / denom,
        )
    };

    let mut top_referrers: Vec<(String, u64)> = universe
        .iter()
        .enumerate()
        .map(|(row, name)| (name.clone(), referral.row_total(row)))
        .filter(|(_, given)| *given > 0)
        .collect();
    top_referrers.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_referrers.truncate(TOP_N);

    let mut top_credit_receivers: Vec<(String, f64)> = universe
        .iter()
        .map(|name| (name.clone(), credit.get(name).total()))
        .filter(|(_, total)| *total > 0.0)
        .collect();
    top_credit_receivers.sort_by(|a, b| {
        MetricValue::new(b.1)
            .cmp(&MetricValue::new(a.1))
            .then_with(|| a.0.cmp(&b.0))
    });
    top_credit_receivers.truncate(TOP_N);

    ChapterStats {
        member_count,
        period_count,
        referral_total,
        meeting_total,
        credit_inside_total,
        credit_outside_total,
        avg_referrals_given,
        avg_meetings_held,
        avg_credit_received,
        top_referrers,
        top_credit_receivers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::build_period_bundle;
    use crate::types::{ChapterId, Member, RelationshipEvent};

    fn bundle_for(
        chapter: ChapterId,
        period: PeriodKey,
        members: &[Member],
        events: &[RelationshipEvent],
    ) -> PeriodBundle {
        build_period_bundle(chapter, period, members, events)
            .expect("build")
            .bundle
    }

    #[test]
    fn empty_input_yields_empty_result() {
        let result = aggregate(&[]);
        assert!(result.universe.is_empty());
        assert_eq!(result.referral.size(), 0);
        assert_eq!(result.stats.member_count, 0);
        assert_eq!(result.stats.referral_total, 0);
        assert!(result.inactive.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn single_period_identity() {
        let chapter = ChapterId::new();
        let members = vec![
            Member::new(chapter, "Ana", "Brooks"),
            Member::new(chapter, "Cole", "Diaz"),
        ];
        let period = PeriodKey::new(2026, 1);
        let events = vec![
            RelationshipEvent::referral(chapter, period, members[0].id, members[1].id),
            RelationshipEvent::meeting(chapter, period, members[0].id, members[1].id),
        ];
        let bundle = bundle_for(chapter, period, &members, &events);

        let result = aggregate(std::slice::from_ref(&bundle));
        assert_eq!(result.referral, bundle.referral);
        assert_eq!(result.meeting, bundle.meeting);
        assert_eq!(result.combination, bundle.combination);
        assert_eq!(result.universe, bundle.members);
    }

    #[test]
    fn union_is_by_name_not_position() {
        let chapter = ChapterId::new();
        let ana = Member::new(chapter, "Ana", "Brooks");
        let cole = Member::new(chapter, "Cole", "Diaz");
        let bea = Member::new(chapter, "Bea", "Cruz");

        // P1: {Ana, Cole}, Ana→Cole ×2.
        let p1 = PeriodKey::new(2026, 1);
        let p1_bundle = bundle_for(
            chapter,
            p1,
            &[ana.clone(), cole.clone()],
            &[
                RelationshipEvent::referral(chapter, p1, ana.id, cole.id),
                RelationshipEvent::referral(chapter, p1, ana.id, cole.id),
            ],
        );

        // P2: {Ana, Bea, Cole} — Bea lands between them lexically, shifting
        // every positional index. Ana→Cole ×3, Ana→Bea ×1.
        let p2 = PeriodKey::new(2026, 2);
        let p2_bundle = bundle_for(
            chapter,
            p2,
            &[ana.clone(), bea.clone(), cole.clone()],
            &[
                RelationshipEvent::referral(chapter, p2, ana.id, cole.id),
                RelationshipEvent::referral(chapter, p2, ana.id, cole.id),
                RelationshipEvent::referral(chapter, p2, ana.id, cole.id),
                RelationshipEvent::referral(chapter, p2, ana.id, bea.id),
            ],
        );

        let result = aggregate(&[p1_bundle, p2_bundle]);
        assert_eq!(result.universe.len(), 3);
        assert_eq!(result.referral.get_by_name("Ana Brooks", "Cole Diaz"), 5);
        assert_eq!(result.referral.get_by_name("Ana Brooks", "Bea Cruz"), 1);
        assert_eq!(result.referral.total(), 6);

        // Completeness: Bea 1/2, the others 2/2.
        assert_eq!(result.completeness["Bea Cruz"].present, 1);
        assert_eq!(result.completeness["Bea Cruz"].total, 2);
        assert_eq!(result.completeness["Ana Brooks"].present, 2);
    }

    #[test]
    fn inactive_member_reports_true_last_active_period() {
        let chapter = ChapterId::new();
        let ana = Member::new(chapter, "Ana", "Brooks");
        let cole = Member::new(chapter, "Cole", "Diaz");

        let p0 = PeriodKey::new(2025, 12);
        let p1 = PeriodKey::new(2026, 1);
        let p2 = PeriodKey::new(2026, 2);
        let both = [ana.clone(), cole.clone()];
        let only_ana = [ana.clone()];

        // Cole present in p0 and p1, gone by p2.
        let bundles = vec![
            bundle_for(chapter, p0, &both, &[]),
            bundle_for(chapter, p1, &both, &[]),
            bundle_for(chapter, p2, &only_ana, &[]),
        ];

        let result = aggregate(&bundles);
        assert_eq!(result.inactive.len(), 1);
        assert_eq!(result.inactive[0].name, "Cole Diaz");
        // Last active is the most recent appearance, not the earliest.
        assert_eq!(result.inactive[0].last_active, p1);
    }

    #[test]
    fn reappearing_member_is_not_flagged_inactive() {
        let chapter = ChapterId::new();
        let ana = Member::new(chapter, "Ana", "Brooks");
        let cole = Member::new(chapter, "Cole", "Diaz");

        let p1 = PeriodKey::new(2026, 1);
        let p2 = PeriodKey::new(2026, 2);
        let p3 = PeriodKey::new(2026, 3);
        let bundles = vec![
            bundle_for(chapter, p1, &[ana.clone(), cole.clone()], &[]),
            bundle_for(chapter, p2, std::slice::from_ref(&ana), &[]),
            bundle_for(chapter, p3, &[ana.clone(), cole.clone()], &[]),
        ];

        let result = aggregate(&bundles);
        assert!(result.inactive.is_empty());
        assert_eq!(result.completeness["Cole Diaz"].present, 2);
    }

    #[test]
    fn bundles_are_sorted_chronologically_before_the_churn_scan() {
        let chapter = ChapterId::new();
        let ana = Member::new(chapter, "Ana", "Brooks");
        let cole = Member::new(chapter, "Cole", "Diaz");

        let p1 = PeriodKey::new(2026, 1);
        let p2 = PeriodKey::new(2026, 2);
        // Passed newest-first; the scan must still see p2 as latest.
        let bundles = vec![
            bundle_for(chapter, p2, std::slice::from_ref(&ana), &[]),
            bundle_for(chapter, p1, &[ana.clone(), cole.clone()], &[]),
        ];

        let result = aggregate(&bundles);
        assert_eq!(result.periods, vec![p1, p2]);
        assert_eq!(result.inactive.len(), 1);
        assert_eq!(result.inactive[0].last_active, p1);
    }

    #[test]
    fn malformed_bundle_contributes_zero_with_warning() {
        let chapter = ChapterId::new();
        let ana = Member::new(chapter, "Ana", "Brooks");
        let cole = Member::new(chapter, "Cole", "Diaz");
        let both = [ana.clone(), cole.clone()];

        let p1 = PeriodKey::new(2026, 1);
        let p2 = PeriodKey::new(2026, 2);
        let good = bundle_for(
            chapter,
            p1,
            &both,
            &[RelationshipEvent::referral(chapter, p1, ana.id, cole.id)],
        );
        let mut bad = bundle_for(
            chapter,
            p2,
            &both,
            &[RelationshipEvent::referral(chapter, p2, ana.id, cole.id)],
        );
        // Simulate a half-written cache entry: referral keyed differently.
        bad.referral.names = vec!["Someone Else".to_string(), "Zz Top".to_string()];

        let result = aggregate(&[good, bad]);
        assert_eq!(result.warnings.len(), 1);
        assert!(matches!(
            result.warnings[0],
            AggregateWarning::MalformedBundle { period, .. } if period == p2
        ));
        // Only the good period counted.
        assert_eq!(result.referral.total(), 1);
        // The gap shows up in completeness: present 1 of 2 requested.
        assert_eq!(result.completeness["Ana Brooks"].present, 1);
        assert_eq!(result.completeness["Ana Brooks"].total, 2);
    }

    #[test]
    fn combination_recomputed_from_unioned_counts() {
        let chapter = ChapterId::new();
        let ana = Member::new(chapter, "Ana", "Brooks");
        let cole = Member::new(chapter, "Cole", "Diaz");
        let both = [ana.clone(), cole.clone()];

        // Referral in one period, meeting in the other: no single period has
        // code 3, but the aggregate must.
        let p1 = PeriodKey::new(2026, 1);
        let p2 = PeriodKey::new(2026, 2);
        let bundles = vec![
            bundle_for(
                chapter,
                p1,
                &both,
                &[RelationshipEvent::referral(chapter, p1, ana.id, cole.id)],
            ),
            bundle_for(
                chapter,
                p2,
                &both,
                &[RelationshipEvent::meeting(chapter, p2, ana.id, cole.id)],
            ),
        ];

        let result = aggregate(&bundles);
        assert_eq!(
            result.combination.get_by_name("Ana Brooks", "Cole Diaz"),
            crate::matrix::COMBO_BOTH
        );
    }

    #[test]
    fn stats_cover_totals_averages_and_rankings() {
        let chapter = ChapterId::new();
        let ana = Member::new(chapter, "Ana", "Brooks");
        let cole = Member::new(chapter, "Cole", "Diaz");
        let both = [ana.clone(), cole.clone()];
        let p1 = PeriodKey::new(2026, 1);

        let events = vec![
            RelationshipEvent::referral(chapter, p1, ana.id, cole.id),
            RelationshipEvent::referral(chapter, p1, ana.id, cole.id),
            RelationshipEvent::referral(chapter, p1, cole.id, ana.id),
            RelationshipEvent::meeting(chapter, p1, ana.id, cole.id),
            RelationshipEvent::credit(chapter, p1, Some(ana.id), cole.id, 500.0, ""),
            RelationshipEvent::credit(chapter, p1, None, ana.id, 200.0, "external"),
        ];
        let result = aggregate(&[bundle_for(chapter, p1, &both, &events)]);

        let stats = &result.stats;
        assert_eq!(stats.referral_total, 3);
        assert_eq!(stats.meeting_total, 1);
        assert!((stats.credit_inside_total - 500.0).abs() < f64::EPSILON);
        assert!((stats.credit_outside_total - 200.0).abs() < f64::EPSILON);
        assert!((stats.avg_referrals_given - 1.5).abs() < f64::EPSILON);
        assert_eq!(stats.top_referrers[0], ("Ana Brooks".to_string(), 2));
        assert_eq!(stats.top_credit_receivers[0].0, "Cole Diaz");
    }
}
