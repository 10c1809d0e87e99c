//! Land-use code resolution
//!
//! Classifies a single raw code against the reference tables and proposes a
//! replacement where one exists.
//!
//! # Architecture
//! Each table is consulted by a lookup function. Lookups run in fixed
//! precedence order and the first match wins:
//!
//! 1. Valid
//! 2. OutOfDate
//! 3. KnownInvalid
//! 4. Incomplete (exact key, then longest key prefixing the raw code)
//!
//! A code matching nothing is Unresolvable. `resolve` is pure and reports only
//! the direct successor; `resolve_chain` follows successors until a valid code
//! is reached so that corrected records are already in their final form.

pub mod tables;

pub use tables::ReferenceTables;

use crate::error::{PipelineError, PipelineResult};
use crate::types::{normalize_code, LandUseCode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// Upper bound on successor hops followed by `resolve_chain`
pub const MAX_CHAIN_DEPTH: usize = 8;

/// Classification of a raw code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Valid,
    OutOfDate,
    KnownInvalid,
    Incomplete,
    Unresolvable,
}

impl ResolutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::OutOfDate => "out_of_date",
            Self::KnownInvalid => "known_invalid",
            Self::Incomplete => "incomplete",
            Self::Unresolvable => "unresolvable",
        }
    }
}

impl fmt::Display for ResolutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of resolving one code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionOutcome {
    pub status: ResolutionStatus,
    /// Canonical code for Valid, replacement for OutOfDate/KnownInvalid,
    /// the single candidate for an unambiguous Incomplete
    pub resolved: Option<LandUseCode>,
    /// Candidate full codes for Incomplete
    pub candidates: BTreeSet<LandUseCode>,
}

impl ResolutionOutcome {
    fn single(status: ResolutionStatus, code: &LandUseCode) -> Self {
        Self {
            status,
            resolved: Some(code.clone()),
            candidates: BTreeSet::new(),
        }
    }

    fn unresolvable() -> Self {
        Self {
            status: ResolutionStatus::Unresolvable,
            resolved: None,
            candidates: BTreeSet::new(),
        }
    }

    /// Incomplete with more than one candidate
    pub fn is_ambiguous(&self) -> bool {
        self.status == ResolutionStatus::Incomplete && self.resolved.is_none()
    }
}

type Lookup = fn(&ReferenceTables, &str) -> Option<ResolutionOutcome>;

/// Lookups in precedence order
const LOOKUPS: [Lookup; 4] = [
    lookup_valid,
    lookup_out_of_date,
    lookup_known_invalid,
    lookup_incomplete,
];

fn lookup_valid(tables: &ReferenceTables, key: &str) -> Option<ResolutionOutcome> {
    tables
        .valid(key)
        .map(|code| ResolutionOutcome::single(ResolutionStatus::Valid, code))
}

fn lookup_out_of_date(tables: &ReferenceTables, key: &str) -> Option<ResolutionOutcome> {
    tables
        .out_of_date(key)
        .map(|code| ResolutionOutcome::single(ResolutionStatus::OutOfDate, code))
}

fn lookup_known_invalid(tables: &ReferenceTables, key: &str) -> Option<ResolutionOutcome> {
    tables
        .known_invalid(key)
        .map(|code| ResolutionOutcome::single(ResolutionStatus::KnownInvalid, code))
}

fn lookup_incomplete(tables: &ReferenceTables, key: &str) -> Option<ResolutionOutcome> {
    tables.incomplete(key).map(|candidates| {
        let resolved = if candidates.len() == 1 {
            candidates.iter().next().cloned()
        } else {
            None
        };
        ResolutionOutcome {
            status: ResolutionStatus::Incomplete,
            resolved,
            candidates: candidates.clone(),
        }
    })
}

/// Successor chain from a raw code to its final form
#[derive(Debug, Clone, PartialEq)]
pub struct ChainResolution {
    /// Classification of the raw code itself
    pub first: ResolutionOutcome,
    /// Successor codes visited, in order
    pub path: Vec<LandUseCode>,
    /// Status of each outcome whose successor was followed
    pub moves: Vec<ResolutionStatus>,
    /// Outcome for the last code examined
    pub terminal: ResolutionOutcome,
}

impl ChainResolution {
    /// Valid code the raw code ends at, if any
    pub fn final_code(&self) -> Option<&LandUseCode> {
        if self.terminal.status != ResolutionStatus::Valid {
            return None;
        }
        self.terminal.resolved.as_ref()
    }

    /// Some step relied on an incomplete code's single candidate
    pub fn is_inferred(&self) -> bool {
        self.moves.contains(&ResolutionStatus::Incomplete)
    }
}

/// Resolves raw codes against one set of reference tables
#[derive(Debug, Clone, Copy)]
pub struct CodeResolver<'a> {
    tables: &'a ReferenceTables,
}

impl<'a> CodeResolver<'a> {
    pub fn new(tables: &'a ReferenceTables) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> &'a ReferenceTables {
        self.tables
    }

    /// Classify a raw code and report its direct successor
    pub fn resolve(&self, raw: &str) -> ResolutionOutcome {
        let key = normalize_code(raw);
        if key.is_empty() {
            return ResolutionOutcome::unresolvable();
        }

        LOOKUPS
            .iter()
            .find_map(|lookup| lookup(self.tables, &key))
            .unwrap_or_else(ResolutionOutcome::unresolvable)
    }

    /// Follow successors until a valid code, an ambiguity or a dead end
    ///
    /// Cycles and chains longer than `MAX_CHAIN_DEPTH` end as Unresolvable.
    pub fn resolve_chain(&self, raw: &str) -> ChainResolution {
        let first = self.resolve(raw);
        let mut path = Vec::new();
        let mut moves = Vec::new();
        let mut terminal = first.clone();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(normalize_code(raw));

        while terminal.status != ResolutionStatus::Valid {
            let Some(next) = terminal.resolved.clone() else {
                break;
            };
            if path.len() >= MAX_CHAIN_DEPTH || !visited.insert(next.normalized()) {
                terminal = ResolutionOutcome::unresolvable();
                break;
            }
            moves.push(terminal.status);
            terminal = self.resolve(next.as_str());
            path.push(next);
        }

        ChainResolution {
            first,
            path,
            moves,
            terminal,
        }
    }

    /// Valid code `raw` resolves to without ambiguity
    ///
    /// Fails with `UnresolvableCode` when the chain does not end at a valid
    /// code.
    pub fn require(&self, raw: &str) -> PipelineResult<LandUseCode> {
        self.resolve_chain(raw)
            .final_code()
            .cloned()
            .ok_or_else(|| PipelineError::UnresolvableCode {
                code: LandUseCode::new(raw),
            })
    }
}
