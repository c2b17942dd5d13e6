//! Property-based tests for the refnet engine.
//!
//! Uses `proptest` to verify the structural invariants the presentation
//! layers rely on, under arbitrary event patterns: zero diagonals, meeting
//! symmetry, combination-code coherence, name-keyed union arithmetic, and
//! tier-count conservation.

use std::collections::BTreeMap;

use proptest::prelude::*;

use refnet_core::aggregate::aggregate;
use refnet_core::classify::{chapter_average, count_tiers};
use refnet_core::matcher::normalize;
use refnet_core::matrix::{COMBO_BOTH, COMBO_NEITHER, build_period_bundle};
use refnet_core::types::{ChapterId, Member, PeriodKey, RelationshipEvent};

const FIRST_NAMES: [&str; 6] = ["Ana", "Ben", "Cleo", "Dmitri", "Elif", "Farah"];

fn make_roster(chapter: ChapterId, size: usize) -> Vec<Member> {
    (0..size)
        .map(|i| Member::new(chapter, FIRST_NAMES[i], &format!("Member{i}")))
        .collect()
}

/// An edge as a pair of distinct roster indices.
fn arb_edge(roster_size: usize) -> impl Strategy<Value = (usize, usize)> {
    (0..roster_size, 0..roster_size - 1).prop_map(move |(a, offset)| {
        let b = (a + 1 + offset) % roster_size;
        (a, b)
    })
}

fn referral_events(
    chapter: ChapterId,
    period: PeriodKey,
    roster: &[Member],
    edges: &[(usize, usize)],
) -> Vec<RelationshipEvent> {
    edges
        .iter()
        .map(|&(a, b)| RelationshipEvent::referral(chapter, period, roster[a].id, roster[b].id))
        .collect()
}

fn meeting_events(
    chapter: ChapterId,
    period: PeriodKey,
    roster: &[Member],
    edges: &[(usize, usize)],
) -> Vec<RelationshipEvent> {
    edges
        .iter()
        .map(|&(a, b)| RelationshipEvent::meeting(chapter, period, roster[a].id, roster[b].id))
        .collect()
}

// ---------------------------------------------------------------------------
// Property: the referral diagonal is all zero for any input
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn referral_diagonal_always_zero(
        size in 2..6usize,
        edges in prop::collection::vec(arb_edge(6), 0..40),
    ) {
        let chapter = ChapterId::new();
        let roster = make_roster(chapter, size);
        let period = PeriodKey::new(2026, 1);
        let edges: Vec<_> = edges
            .into_iter()
            .map(|(a, b)| (a % size, b % size))
            .filter(|(a, b)| a != b)
            .collect();
        let events = referral_events(chapter, period, &roster, &edges);

        let bundle = build_period_bundle(chapter, period, &roster, &events)
            .expect("build")
            .bundle;
        for i in 0..bundle.referral.size() {
            prop_assert_eq!(bundle.referral.get(i, i), 0);
        }
    }
}

// ---------------------------------------------------------------------------
// Property: the meeting matrix is symmetric for any meeting list
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn meeting_matrix_always_symmetric(
        size in 2..6usize,
        edges in prop::collection::vec(arb_edge(6), 0..40),
    ) {
        let chapter = ChapterId::new();
        let roster = make_roster(chapter, size);
        let period = PeriodKey::new(2026, 1);
        let edges: Vec<_> = edges
            .into_iter()
            .map(|(a, b)| (a % size, b % size))
            .filter(|(a, b)| a != b)
            .collect();
        let events = meeting_events(chapter, period, &roster, &edges);

        let bundle = build_period_bundle(chapter, period, &roster, &events)
            .expect("build")
            .bundle;
        let n = bundle.meeting.size();
        for a in 0..n {
            for b in 0..n {
                prop_assert_eq!(bundle.meeting.get(a, b), bundle.meeting.get(b, a));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Property: combination codes cohere with their source matrices
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn combination_codes_cohere(
        size in 2..6usize,
        referral_edges in prop::collection::vec(arb_edge(6), 0..20),
        meeting_edges in prop::collection::vec(arb_edge(6), 0..20),
    ) {
        let chapter = ChapterId::new();
        let roster = make_roster(chapter, size);
        let period = PeriodKey::new(2026, 1);

        let clamp = |edges: Vec<(usize, usize)>| -> Vec<(usize, usize)> {
            edges
                .into_iter()
                .map(|(a, b)| (a % size, b % size))
                .filter(|(a, b)| a != b)
                .collect()
        };
        let mut events = referral_events(chapter, period, &roster, &clamp(referral_edges));
        events.extend(meeting_events(chapter, period, &roster, &clamp(meeting_edges)));

        let bundle = build_period_bundle(chapter, period, &roster, &events)
            .expect("build")
            .bundle;
        let n = bundle.combination.size();
        for a in 0..n {
            for b in 0..n {
                let code = bundle.combination.get(a, b);
                let has_referral = bundle.referral.get(a, b) > 0;
                let has_meeting = bundle.meeting.get(a, b) > 0;
                prop_assert_eq!(code == COMBO_BOTH, has_referral && has_meeting);
                prop_assert_eq!(code == COMBO_NEITHER, !has_referral && !has_meeting);
                prop_assert_eq!(code, 2 * u32::from(has_referral) + u32::from(has_meeting));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Property: the union matrix is the cell-wise sum of its periods
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn aggregate_cells_sum_period_cells(
        size in 2..6usize,
        p1_edges in prop::collection::vec(arb_edge(6), 0..25),
        p2_edges in prop::collection::vec(arb_edge(6), 0..25),
    ) {
        let chapter = ChapterId::new();
        let roster = make_roster(chapter, size);
        let p1 = PeriodKey::new(2026, 1);
        let p2 = PeriodKey::new(2026, 2);

        let clamp = |edges: Vec<(usize, usize)>| -> Vec<(usize, usize)> {
            edges
                .into_iter()
                .map(|(a, b)| (a % size, b % size))
                .filter(|(a, b)| a != b)
                .collect()
        };
        let b1 = build_period_bundle(
            chapter,
            p1,
            &roster,
            &referral_events(chapter, p1, &roster, &clamp(p1_edges)),
        )
        .expect("p1")
        .bundle;
        let b2 = build_period_bundle(
            chapter,
            p2,
            &roster,
            &referral_events(chapter, p2, &roster, &clamp(p2_edges)),
        )
        .expect("p2")
        .bundle;

        let result = aggregate(&[b1.clone(), b2.clone()]);
        for giver in &result.universe {
            for receiver in &result.universe {
                prop_assert_eq!(
                    result.referral.get_by_name(giver, receiver),
                    b1.referral.get_by_name(giver, receiver)
                        + b2.referral.get_by_name(giver, receiver)
                );
            }
        }
        prop_assert_eq!(result.referral.total(), b1.referral.total() + b2.referral.total());
    }
}

// ---------------------------------------------------------------------------
// Property: single-period aggregation is the identity
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn single_period_aggregate_is_identity(
        size in 2..6usize,
        edges in prop::collection::vec(arb_edge(6), 0..25),
    ) {
        let chapter = ChapterId::new();
        let roster = make_roster(chapter, size);
        let period = PeriodKey::new(2026, 1);
        let edges: Vec<_> = edges
            .into_iter()
            .map(|(a, b)| (a % size, b % size))
            .filter(|(a, b)| a != b)
            .collect();
        let mut events = referral_events(chapter, period, &roster, &edges);
        events.extend(meeting_events(chapter, period, &roster, &edges));

        let bundle = build_period_bundle(chapter, period, &roster, &events)
            .expect("build")
            .bundle;
        let result = aggregate(std::slice::from_ref(&bundle));

        prop_assert_eq!(&result.referral, &bundle.referral);
        prop_assert_eq!(&result.meeting, &bundle.meeting);
        prop_assert_eq!(&result.combination, &bundle.combination);
    }
}

// ---------------------------------------------------------------------------
// Property: tier counts always sum to the member count
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn tier_counts_conserve_members(
        values in prop::collection::vec(0.0..1000.0f64, 0..30),
    ) {
        let map: BTreeMap<String, f64> = values
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("member {i}"), *v))
            .collect();
        let average = chapter_average(&map);
        let breakdown = count_tiers(&map, average);

        prop_assert_eq!(
            breakdown.excellent
                + breakdown.good_average
                + breakdown.neutral
                + breakdown.needs_attention,
            map.len()
        );
        prop_assert_eq!(breakdown.total, map.len());

        let pct_sum = breakdown.excellent_pct()
            + breakdown.good_average_pct()
            + breakdown.neutral_pct()
            + breakdown.needs_attention_pct();
        if !map.is_empty() {
            prop_assert!((pct_sum - 100.0).abs() < 1e-6);
        }
    }
}

// ---------------------------------------------------------------------------
// Property: normalization is idempotent and whitespace-insensitive
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn normalize_is_idempotent(name in "[A-Za-z. ]{0,40}") {
        let once = normalize(&name);
        let twice = normalize(&once);
        prop_assert_eq!(&once, &twice);
        // Collapsed whitespace never survives normalization.
        prop_assert!(!once.contains("  "));
    }
}
