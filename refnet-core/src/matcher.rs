//! Name normalization and member resolution.
//!
//! Import spreadsheets carry free-text names ("Dr. Jane Doe", "jane   doe",
//! "Jane"). This module maps each one to exactly one [`Member`] or reports a
//! miss. Matching is a priority-ordered sequence of exact strategies — there
//! is deliberately no edit-distance matching, so a typo produces a visible
//! miss instead of silently crediting the wrong member.
//!
//! The [`MemberLookup`] is a short-lived, per-chapter context object: build
//! it from the chapter roster at the start of an import, drop it when the
//! batch finishes. Nothing here is process-wide state.

use std::collections::HashMap;

use tracing::debug;

use crate::types::Member;

/// Honorific prefixes stripped from the front of a name during
/// normalization. Matched with or without the trailing dot.
const HONORIFIC_PREFIXES: [&str; 5] = ["mr", "mrs", "ms", "dr", "prof"];

/// Generational suffixes stripped from the end of a name.
const NAME_SUFFIXES: [&str; 5] = ["jr", "sr", "ii", "iii", "iv"];

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Normalize a free-text name into its canonical lookup key.
///
/// Lowercases, collapses runs of whitespace to single spaces, and strips
/// honorific prefixes and generational suffixes from the string ends.
/// Stripping repeats, so "Prof. Dr. Jane Doe Jr." reduces to "jane doe".
/// Empty or whitespace-only input yields the empty string.
#[must_use]
pub fn normalize(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut tokens: Vec<&str> = lowered.split_whitespace().collect();

    while let Some(first) = tokens.first() {
        if is_honorific(first) {
            tokens.remove(0);
        } else {
            break;
        }
    }

    while let Some(last) = tokens.last() {
        if is_suffix(last) {
            tokens.pop();
        } else {
            break;
        }
    }

    tokens.join(" ")
}

/// Lowercase the input and collapse whitespace runs, without stripping
/// honorifics or suffixes.
#[must_use]
pub fn collapse_lowercase(name: &str) -> String {
    name.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_honorific(token: &str) -> bool {
    let bare = token.strip_suffix('.').unwrap_or(token);
    HONORIFIC_PREFIXES.contains(&bare)
}

fn is_suffix(token: &str) -> bool {
    let bare = token.strip_suffix('.').unwrap_or(token);
    NAME_SUFFIXES.contains(&bare)
}

// ---------------------------------------------------------------------------
// Resolution results
// ---------------------------------------------------------------------------

/// Which match strategy resolved a name. Recorded in the result so callers
/// can diagnose why an import row landed on a particular member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    /// Normalized input matched a member's normalized-name key.
    ExactNormalized,
    /// Trimmed, lowercased input matched a member's raw display name.
    RawLowercase,
    /// Whitespace-collapsed lowercase input matched a raw display name.
    CollapsedLowercase,
    /// Input was a bare first name carried by exactly one chapter member.
    UniqueFirstName,
}

/// Why a name failed to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissReason {
    /// Input was empty or whitespace-only.
    EmptyInput,
    /// Input was a bare first name shared by more than one member.
    AmbiguousFirstName {
        /// How many members carry this first name.
        candidates: usize,
    },
    /// No strategy produced a match.
    Unknown,
}

impl std::fmt::Display for MissReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyInput => write!(f, "empty input"),
            Self::AmbiguousFirstName { candidates } => {
                write!(f, "first name shared by {candidates} members")
            }
            Self::Unknown => write!(f, "no matching member"),
        }
    }
}

/// Outcome of resolving one free-text name.
///
/// A miss is a data-quality signal, not an error: the caller attaches it to
/// the source row as a warning and excludes the row from numeric totals.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The name resolved to a member.
    Matched {
        /// The resolved member.
        member: Member,
        /// Strategy that produced the match.
        strategy: MatchStrategy,
    },
    /// The name did not resolve.
    Miss {
        /// The input as received.
        input: String,
        /// Why resolution failed.
        reason: MissReason,
    },
}

impl Resolution {
    /// The matched member, if any.
    #[must_use]
    pub fn member(&self) -> Option<&Member> {
        match self {
            Self::Matched { member, .. } => Some(member),
            Self::Miss { .. } => None,
        }
    }

    /// Whether this resolution is a miss.
    #[must_use]
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss { .. })
    }
}

// ---------------------------------------------------------------------------
// MemberLookup
// ---------------------------------------------------------------------------

/// Per-chapter name lookup, built once per import batch from the roster.
#[derive(Debug, Clone, Default)]
pub struct MemberLookup {
    /// normalized full name → member
    normalized: HashMap<String, Member>,
    /// lowercase display name → member
    raw_lower: HashMap<String, Member>,
    /// lowercase first name → every member carrying it
    first_name: HashMap<String, Vec<Member>>,
    /// Whether the bare-first-name strategy is enabled.
    pub first_name_fallback: bool,
}

impl MemberLookup {
    /// Build a lookup over a chapter roster.
    ///
    /// Normalized keys are unique per chapter by directory invariant; if a
    /// duplicate slips through, the first roster entry keeps the key.
    #[must_use]
    pub fn build(members: &[Member]) -> Self {
        let mut lookup = Self {
            first_name_fallback: true,
            ..Self::default()
        };
        for member in members {
            lookup
                .normalized
                .entry(member.normalized_name.clone())
                .or_insert_with(|| member.clone());
            lookup
                .raw_lower
                .entry(collapse_lowercase(&member.display_name()))
                .or_insert_with(|| member.clone());
            let first = member.first_name.to_lowercase();
            if !first.is_empty() {
                lookup
                    .first_name
                    .entry(first)
                    .or_default()
                    .push(member.clone());
            }
        }
        lookup
    }

    /// Build a lookup with the bare-first-name strategy toggled.
    #[must_use]
    pub fn build_with_first_name_fallback(members: &[Member], enabled: bool) -> Self {
        let mut lookup = Self::build(members);
        lookup.first_name_fallback = enabled;
        lookup
    }

    /// Number of distinct members in the lookup.
    #[must_use]
    pub fn len(&self) -> usize {
        self.normalized.len()
    }

    /// Whether the lookup holds no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }

    /// Resolve a free-text name to a member.
    ///
    /// Strategies run in priority order, each tagged in the result:
    /// 1. exact normalized match
    /// 2. raw lowercase match
    /// 3. whitespace-collapsed lowercase match
    /// 4. unique bare first name (when enabled)
    ///
    /// A miss never panics or errors.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Resolution {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Resolution::Miss {
                input: name.to_string(),
                reason: MissReason::EmptyInput,
            };
        }

        let normalized = normalize(trimmed);
        if let Some(member) = self.normalized.get(&normalized) {
            return Resolution::Matched {
                member: member.clone(),
                strategy: MatchStrategy::ExactNormalized,
            };
        }

        let raw = trimmed.to_lowercase();
        if let Some(member) = self.raw_lower.get(&raw) {
            return Resolution::Matched {
                member: member.clone(),
                strategy: MatchStrategy::RawLowercase,
            };
        }

        let collapsed = collapse_lowercase(trimmed);
        if collapsed != raw {
            if let Some(member) = self.raw_lower.get(&collapsed) {
                return Resolution::Matched {
                    member: member.clone(),
                    strategy: MatchStrategy::CollapsedLowercase,
                };
            }
        }

        if self.first_name_fallback {
            if let Some(candidates) = self.first_name.get(&collapsed) {
                if candidates.len() == 1 {
                    return Resolution::Matched {
                        member: candidates[0].clone(),
                        strategy: MatchStrategy::UniqueFirstName,
                    };
                }
                debug!(
                    input = %trimmed,
                    candidates = candidates.len(),
                    "Ambiguous first-name match"
                );
                return Resolution::Miss {
                    input: name.to_string(),
                    reason: MissReason::AmbiguousFirstName {
                        candidates: candidates.len(),
                    },
                };
            }
        }

        debug!(input = %trimmed, "Unresolved member name");
        Resolution::Miss {
            input: name.to_string(),
            reason: MissReason::Unknown,
        }
    }
}

/// Resolve a possibly-absent name field.
///
/// `None` behaves like empty input: a miss, never a panic.
#[must_use]
pub fn resolve_member_name(name: Option<&str>, lookup: &MemberLookup) -> Resolution {
    match name {
        Some(text) => lookup.resolve(text),
        None => Resolution::Miss {
            input: String::new(),
            reason: MissReason::EmptyInput,
        },
    }
}
