//! Record Validator
//!
//! Resolves every land-use code on a record and corrects it in place.
//!
//! # Architecture
//! Holds a `CodeResolver` over the run's reference tables and the
//! `user_infill` flag. Each code is resolved as a chain so that a replacement
//! which is itself out of date is carried through to its valid successor;
//! validating an already validated record therefore changes nothing.
//!
//! Codes that remain unresolved are offered to the `ManualResolver` when
//! `user_infill` is enabled. A user choice is only accepted if it resolves to a
//! valid code; otherwise the resolver is told so it can ask again.
//!
//! Records are validated independently; there is no cross-record state.

use crate::audit::{AuditEvent, AuditTrail};
use crate::resolver::{ChainResolution, CodeResolver, ResolutionStatus};
use crate::statistics::ValidationStats;
use crate::types::{CodeField, FieldRef, LandUseCode, PlanningRecord, RecordStatus};
use crate::validators::manual::{ManualRequest, ManualResolver};
use crate::validators::{FieldVerdict, VerdictKind};
use tracing::{debug, info, warn};

/// Land-use code validator
pub struct RecordValidator<'a> {
    resolver: CodeResolver<'a>,
    user_infill: bool,
}

impl<'a> RecordValidator<'a> {
    pub fn new(resolver: CodeResolver<'a>, user_infill: bool) -> Self {
        Self {
            resolver,
            user_infill,
        }
    }

    /// Validate one record in place and return its verdicts
    ///
    /// The verdicts are also stored on the record, replacing any from an
    /// earlier pass.
    pub fn validate(
        &self,
        record: &mut PlanningRecord,
        manual: &mut dyn ManualResolver,
    ) -> Vec<FieldVerdict> {
        let mut verdicts = Vec::new();

        for field in [CodeField::Existing, CodeField::Proposed] {
            for index in 0..record.codes(field).len() {
                let original = record.codes(field)[index].clone();
                let verdict = self.validate_code(
                    &record.site_ref,
                    FieldRef { field, index },
                    original,
                    manual,
                );
                if let Some(resolved) = verdict.resolved.as_ref().filter(|_| verdict.kind.is_change()) {
                    record.codes_mut(field)[index] = resolved.clone();
                }
                verdicts.push(verdict);
            }
        }

        record.status = if verdicts.iter().any(|v| v.kind == VerdictKind::Unresolved) {
            RecordStatus::Invalid
        } else {
            RecordStatus::Valid
        };
        record.verdicts = verdicts.clone();
        verdicts
    }

    fn validate_code(
        &self,
        site_ref: &str,
        field: FieldRef,
        original: LandUseCode,
        manual: &mut dyn ManualResolver,
    ) -> FieldVerdict {
        let chain = self.resolver.resolve_chain(original.as_str());
        let status = chain.first.status;

        if status == ResolutionStatus::Valid {
            return FieldVerdict {
                field,
                original,
                kind: VerdictKind::Valid,
                status,
                resolved: None,
                candidates: Vec::new(),
            };
        }

        if let Some(final_code) = chain.final_code() {
            let kind = if chain.is_inferred() {
                VerdictKind::Inferred
            } else {
                VerdictKind::Corrected
            };
            return FieldVerdict {
                field,
                original,
                kind,
                status,
                resolved: Some(final_code.clone()),
                candidates: Vec::new(),
            };
        }

        let candidates = unresolved_candidates(&chain);
        if self.user_infill {
            let request = ManualRequest {
                site_ref: site_ref.to_string(),
                field: field.field,
                original: original.clone(),
                candidates: candidates.clone(),
            };
            if let Some(chosen) = manual.resolve(&request) {
                match self.resolver.require(chosen.as_str()) {
                    Ok(final_code) => {
                        return FieldVerdict {
                            field,
                            original,
                            kind: VerdictKind::ManuallyResolved,
                            status,
                            resolved: Some(final_code),
                            candidates,
                        };
                    }
                    Err(error) => {
                        warn!(
                            site_ref = %site_ref,
                            original = %original,
                            error = %error,
                            "Manual choice rejected, question reopened"
                        );
                        manual.reject(&request, &chosen);
                    }
                }
            }
        }

        FieldVerdict {
            field,
            original,
            kind: VerdictKind::Unresolved,
            status,
            resolved: None,
            candidates,
        }
    }

    /// Validate a batch, recording audit events and statistics
    pub fn validate_all(
        &self,
        records: &mut [PlanningRecord],
        manual: &mut dyn ManualResolver,
        audit: &mut AuditTrail,
    ) -> ValidationStats {
        info!(records = records.len(), user_infill = self.user_infill, "Validating land use codes");
        let mut stats = ValidationStats::default();

        for record in records.iter_mut() {
            let verdicts = self.validate(record, manual);
            stats.records.increment(record.record_type);
            if record.is_valid() {
                stats.valid.increment(record.record_type);
            } else {
                stats.invalid.increment(record.record_type);
            }

            for verdict in verdicts {
                record_verdict(&record.site_ref, verdict, &mut stats, audit);
            }
        }

        info!("Validation complete: {}", stats.display_string());
        stats
    }
}

/// Candidates to offer for a code that could not be resolved
fn unresolved_candidates(chain: &ChainResolution) -> Vec<LandUseCode> {
    if chain.terminal.status == ResolutionStatus::Incomplete {
        chain.terminal.candidates.iter().cloned().collect()
    } else {
        chain.first.candidates.iter().cloned().collect()
    }
}

fn record_verdict(
    site_ref: &str,
    verdict: FieldVerdict,
    stats: &mut ValidationStats,
    audit: &mut AuditTrail,
) {
    let site_ref = site_ref.to_string();
    let FieldVerdict {
        field,
        original,
        kind,
        status,
        resolved,
        candidates,
    } = verdict;

    match (kind, resolved) {
        (VerdictKind::Valid, _) => {}
        (VerdictKind::Corrected, Some(corrected)) => {
            stats.corrected += 1;
            debug!(site_ref = %site_ref, original = %original, corrected = %corrected, "Code corrected");
            audit.record(AuditEvent::Corrected {
                site_ref,
                field,
                original,
                corrected,
                via: status,
            });
        }
        (VerdictKind::Inferred, Some(corrected)) => {
            stats.inferred += 1;
            debug!(site_ref = %site_ref, original = %original, corrected = %corrected, "Code inferred");
            audit.record(AuditEvent::Inferred {
                site_ref,
                field,
                original,
                corrected,
            });
        }
        (VerdictKind::ManuallyResolved, Some(chosen)) => {
            stats.manually_resolved += 1;
            audit.record(AuditEvent::ManuallyResolved {
                site_ref,
                field,
                original,
                chosen,
            });
        }
        (_, _) => {
            stats.unresolved += 1;
            warn!(
                site_ref = %site_ref,
                field = %field.field,
                code = %original,
                status = %status,
                candidates = candidates.len(),
                "Unresolved land use code"
            );
            audit.record(AuditEvent::Unresolved {
                site_ref,
                field,
                original,
                status,
                candidates,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ReferenceTables;
    use crate::types::RecordType;
    use crate::validators::manual::{NoManualResolution, WorksheetResolver, WorksheetRow};
    use std::collections::HashMap;

    fn code(s: &str) -> LandUseCode {
        LandUseCode::new(s)
    }

    fn tables() -> ReferenceTables {
        ReferenceTables::from_parts(
            vec![code("B2"), code("B8"), code("C3"), code("E(g)"), code("E(g)(i)")],
            vec![(code("B1a"), code("E(g)")), (code("B1"), code("B1a"))],
            vec![(code("B9"), code("B8"))],
            vec![
                (code("E"), code("E(g)")),
                (code("E"), code("E(g)(i)")),
                (code("C"), code("C3")),
            ],
        )
        .unwrap()
    }

    fn record(existing: &[&str], proposed: &[&str]) -> PlanningRecord {
        let mut record = PlanningRecord::new("100", RecordType::Employment);
        record.existing_land_use = existing.iter().map(|c| code(c)).collect();
        record.proposed_land_use = proposed.iter().map(|c| code(c)).collect();
        record
    }

    #[test]
    fn test_out_of_date_code_corrected() {
        let tables = tables();
        let validator = RecordValidator::new(CodeResolver::new(&tables), false);
        let mut rec = record(&[], &["B1a"]);

        let verdicts = validator.validate(&mut rec, &mut NoManualResolution);

        assert_eq!(rec.proposed_land_use, vec![code("E(g)")]);
        assert_eq!(verdicts.len(), 1);
        assert_eq!(verdicts[0].kind, VerdictKind::Corrected);
        assert_eq!(verdicts[0].original, code("B1a"));
        assert_eq!(verdicts[0].resolved, Some(code("E(g)")));
        assert!(rec.is_valid());
    }

    #[test]
    fn test_valid_codes_untouched() {
        let tables = tables();
        let validator = RecordValidator::new(CodeResolver::new(&tables), false);
        let mut rec = record(&["b2"], &["C3"]);

        let verdicts = validator.validate(&mut rec, &mut NoManualResolution);

        assert!(verdicts.iter().all(|v| v.kind == VerdictKind::Valid));
        assert_eq!(rec.existing_land_use, vec![code("b2")]);
        assert_eq!(rec.proposed_land_use, vec![code("C3")]);
    }

    #[test]
    fn test_single_candidate_inferred() {
        let tables = tables();
        let validator = RecordValidator::new(CodeResolver::new(&tables), false);
        let mut rec = record(&[], &["c"]);

        let verdicts = validator.validate(&mut rec, &mut NoManualResolution);
        assert_eq!(verdicts[0].kind, VerdictKind::Inferred);
        assert_eq!(rec.proposed_land_use, vec![code("C3")]);
    }

    #[test]
    fn test_ambiguous_code_unresolved_and_unchanged() {
        let tables = tables();
        let validator = RecordValidator::new(CodeResolver::new(&tables), false);
        let mut rec = record(&["B2"], &["E"]);

        let verdicts = validator.validate(&mut rec, &mut NoManualResolution);

        assert_eq!(verdicts[1].kind, VerdictKind::Unresolved);
        assert_eq!(verdicts[1].candidates.len(), 2);
        assert_eq!(rec.proposed_land_use, vec![code("E")]);
        assert_eq!(rec.status, RecordStatus::Invalid);
    }

    #[test]
    fn test_validation_is_idempotent() {
        let tables = tables();
        let validator = RecordValidator::new(CodeResolver::new(&tables), false);
        let mut rec = record(&["B9"], &["B1", "c"]);

        validator.validate(&mut rec, &mut NoManualResolution);
        let once = (rec.existing_land_use.clone(), rec.proposed_land_use.clone());
        let second = validator.validate(&mut rec, &mut NoManualResolution);

        assert_eq!(once.0, vec![code("B8")]);
        assert_eq!(once.1, vec![code("E(g)"), code("C3")]);
        assert_eq!((rec.existing_land_use.clone(), rec.proposed_land_use.clone()), once);
        assert!(second.iter().all(|v| v.kind == VerdictKind::Valid));
    }

    #[test]
    fn test_manual_choice_accepted_only_when_valid() {
        let tables = tables();
        let validator = RecordValidator::new(CodeResolver::new(&tables), true);

        let mut answers: HashMap<(String, CodeField, String), LandUseCode> = HashMap::new();
        answers.insert(
            ("100".to_string(), CodeField::Proposed, "e".to_string()),
            code("E(g)(i)"),
        );
        answers.insert(
            ("100".to_string(), CodeField::Proposed, "zz".to_string()),
            code("not-a-code"),
        );

        let mut rec = record(&[], &["E", "zz"]);
        let verdicts = validator.validate(&mut rec, &mut answers);

        assert_eq!(verdicts[0].kind, VerdictKind::ManuallyResolved);
        assert_eq!(rec.proposed_land_use[0], code("E(g)(i)"));
        assert_eq!(verdicts[1].kind, VerdictKind::Unresolved);
        assert_eq!(rec.proposed_land_use[1], code("zz"));
        assert!(!rec.is_valid());
    }

    #[test]
    fn test_invalid_worksheet_answer_is_asked_again() {
        let tables = tables();
        let validator = RecordValidator::new(CodeResolver::new(&tables), true);
        let mut worksheet = WorksheetResolver::from_rows(vec![WorksheetRow {
            site_reference_id: "100".to_string(),
            field: CodeField::Proposed,
            original_code: "E".to_string(),
            candidates: "E(g);E(g)(i)".to_string(),
            chosen_code: Some("E(z)".to_string()),
            rejected_code: None,
        }]);

        let mut rec = record(&[], &["E"]);
        let verdicts = validator.validate(&mut rec, &mut worksheet);

        assert_eq!(verdicts[0].kind, VerdictKind::Unresolved);
        assert_eq!(worksheet.answered_count(), 0);
        let open: Vec<_> = worksheet.unanswered().collect();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].chosen_code, None);
        assert_eq!(open[0].rejected_code.as_deref(), Some("E(z)"));
    }

    #[test]
    fn test_manual_resolver_ignored_without_user_infill() {
        let tables = tables();
        let validator = RecordValidator::new(CodeResolver::new(&tables), false);

        let mut answers: HashMap<(String, CodeField, String), LandUseCode> = HashMap::new();
        answers.insert(
            ("100".to_string(), CodeField::Proposed, "e".to_string()),
            code("E(g)"),
        );

        let mut rec = record(&[], &["E"]);
        let verdicts = validator.validate(&mut rec, &mut answers);
        assert_eq!(verdicts[0].kind, VerdictKind::Unresolved);
    }

    #[test]
    fn test_validate_all_records_audit_and_stats() {
        let tables = tables();
        let validator = RecordValidator::new(CodeResolver::new(&tables), false);
        let mut records = vec![record(&[], &["B1a"]), record(&[], &["zz"])];
        records[1].site_ref = "101".to_string();
        records[1].record_type = RecordType::Residential;
        let mut audit = AuditTrail::new();

        let stats = validator.validate_all(&mut records, &mut NoManualResolution, &mut audit);

        assert_eq!(stats.records.total(), 2);
        assert_eq!(stats.valid.employment, 1);
        assert_eq!(stats.invalid.residential, 1);
        assert_eq!(stats.corrected, 1);
        assert_eq!(stats.unresolved, 1);
        assert_eq!(audit.count("corrected"), 1);
        assert_eq!(audit.count("unresolved"), 1);
        assert_eq!(audit.for_site("101").count(), 1);
    }
}
