//! Land-use code reference tables
//!
//! Four lookups, all keyed by normalised code text:
//! - valid codes
//! - out-of-date code → replacement
//! - known-invalid code → corrected code
//! - incomplete code → candidate full codes
//!
//! Values keep the canonical spelling from the source table so corrected
//! records read naturally (e.g. "E(g)" rather than "e(g)").

use crate::error::{PipelineError, PipelineResult};
use crate::types::{normalize_code, LandUseCode};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

/// Alias accepted for the sui generis class
const SUI_GENERIS_ALIAS: &str = "suigeneris";
const SUI_GENERIS_CODE: &str = "sg";

/// Parsed reference tables for one run
#[derive(Debug, Clone, Default)]
pub struct ReferenceTables {
    valid: HashMap<String, LandUseCode>,
    out_of_date: HashMap<String, LandUseCode>,
    known_invalid: HashMap<String, LandUseCode>,
    incomplete: BTreeMap<String, BTreeSet<LandUseCode>>,
}

impl ReferenceTables {
    /// Build tables from already-parsed rows
    ///
    /// Fails when the valid table is empty or a key maps to two different
    /// replacements within one table.
    pub fn from_parts(
        valid: impl IntoIterator<Item = LandUseCode>,
        out_of_date: impl IntoIterator<Item = (LandUseCode, LandUseCode)>,
        known_invalid: impl IntoIterator<Item = (LandUseCode, LandUseCode)>,
        incomplete: impl IntoIterator<Item = (LandUseCode, LandUseCode)>,
    ) -> PipelineResult<Self> {
        let mut tables = Self::default();

        for code in valid {
            if code.is_blank() {
                continue;
            }
            tables.valid.insert(code.normalized(), code);
        }
        if tables.valid.is_empty() {
            return Err(PipelineError::Configuration(
                "valid land use code table is empty".to_string(),
            ));
        }

        insert_unique(&mut tables.out_of_date, out_of_date, "out of date")?;
        insert_unique(&mut tables.known_invalid, known_invalid, "known invalid")?;

        for (partial, candidate) in incomplete {
            if partial.is_blank() || candidate.is_blank() {
                continue;
            }
            tables
                .incomplete
                .entry(partial.normalized())
                .or_default()
                .insert(candidate);
        }

        tables.warn_on_overlaps();
        Ok(tables)
    }

    /// Register formatting aliases as known-invalid entries
    ///
    /// Valid codes written with brackets ("E(g)") are often entered without
    /// them ("Eg"); "suigeneris" is entered for "sg". An alias is only added
    /// when its spelling is not already a key in some table.
    pub fn with_format_aliases(mut self) -> Self {
        let mut aliases: Vec<(String, LandUseCode)> = self
            .valid
            .values()
            .filter(|code| code.as_str().contains('(') || code.as_str().contains(')'))
            .map(|code| {
                let stripped = code.as_str().replace(['(', ')'], "");
                (normalize_code(&stripped), code.clone())
            })
            .collect();

        if let Some(sg) = self.valid.get(SUI_GENERIS_CODE) {
            aliases.push((SUI_GENERIS_ALIAS.to_string(), sg.clone()));
        }

        aliases.sort();
        for (alias, target) in aliases {
            if alias.is_empty() || self.contains_key(&alias) {
                continue;
            }
            debug!(alias = %alias, target = %target, "Registering format alias");
            self.known_invalid.insert(alias, target);
        }
        self
    }

    fn contains_key(&self, key: &str) -> bool {
        self.valid.contains_key(key)
            || self.out_of_date.contains_key(key)
            || self.known_invalid.contains_key(key)
            || self.incomplete.contains_key(key)
    }

    /// Keys present in more than one table are resolved by precedence
    fn warn_on_overlaps(&self) {
        let mut overlaps: Vec<&String> = self
            .out_of_date
            .keys()
            .chain(self.known_invalid.keys())
            .chain(self.incomplete.keys())
            .filter(|key| self.table_count(key) > 1)
            .collect();
        overlaps.sort();
        overlaps.dedup();

        if !overlaps.is_empty() {
            warn!(
                "{} land use codes appear in more than one reference table, \
                 precedence Valid > OutOfDate > KnownInvalid > Incomplete applies: {:?}",
                overlaps.len(),
                overlaps
            );
        }
    }

    fn table_count(&self, key: &str) -> usize {
        [
            self.valid.contains_key(key),
            self.out_of_date.contains_key(key),
            self.known_invalid.contains_key(key),
            self.incomplete.contains_key(key),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }

    pub fn valid(&self, key: &str) -> Option<&LandUseCode> {
        self.valid.get(key)
    }

    pub fn out_of_date(&self, key: &str) -> Option<&LandUseCode> {
        self.out_of_date.get(key)
    }

    pub fn known_invalid(&self, key: &str) -> Option<&LandUseCode> {
        self.known_invalid.get(key)
    }

    /// Exact match first, then the longest incomplete key prefixing `key`
    pub fn incomplete(&self, key: &str) -> Option<&BTreeSet<LandUseCode>> {
        if let Some(candidates) = self.incomplete.get(key) {
            return Some(candidates);
        }
        self.incomplete
            .iter()
            .filter(|(partial, _)| key.starts_with(partial.as_str()))
            .max_by_key(|(partial, _)| partial.len())
            .map(|(_, candidates)| candidates)
    }

    pub fn is_valid(&self, code: &LandUseCode) -> bool {
        self.valid.contains_key(&code.normalized())
    }

    /// Valid codes in sorted order
    pub fn valid_codes(&self) -> Vec<&LandUseCode> {
        let mut codes: Vec<&LandUseCode> = self.valid.values().collect();
        codes.sort();
        codes
    }
}

fn insert_unique(
    table: &mut HashMap<String, LandUseCode>,
    rows: impl IntoIterator<Item = (LandUseCode, LandUseCode)>,
    table_name: &str,
) -> PipelineResult<()> {
    for (from, to) in rows {
        if from.is_blank() || to.is_blank() {
            continue;
        }
        let key = from.normalized();
        if let Some(existing) = table.get(&key) {
            if existing.normalized() != to.normalized() {
                return Err(PipelineError::Configuration(format!(
                    "{} table maps '{}' to both '{}' and '{}'",
                    table_name, from, existing, to
                )));
            }
            continue;
        }
        table.insert(key, to);
    }
    Ok(())
}
