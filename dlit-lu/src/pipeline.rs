//! Pipeline orchestration
//!
//! Runs the stages in order over one batch of records:
//!
//! 1. **Validate:** resolve and correct land-use codes
//! 2. **Fit:** fit every infill model over the validated batch
//! 3. **Infill:** fill attribute gaps from the fitted models, then missing
//!    build-out years from the modal window of each TAG certainty
//! 4. **Disaggregate:** split volumes across MSOA, category and use state,
//!    converting floor space to jobs and dwellings to residents where the
//!    lookup tables allow
//! 5. **Profile:** optional yearly build-out table
//!
//! One `AuditTrail` is threaded through all stages and returned with the
//! output. Configuration is checked before any record is touched.

use crate::audit::AuditTrail;
use crate::disagg::{
    build_out_profile, converted_totals, DemographicTables, Disaggregator, GeographyProvider,
    ProfileRow, SicConversion, UnitConversions, VolumeRow, VolumeTable,
};
use crate::error::{PipelineError, PipelineResult};
use crate::infill::{infill_build_out_years, AttributeInfiller, InfillPlan};
use crate::resolver::{CodeResolver, ReferenceTables};
use crate::statistics::RunStatistics;
use crate::types::PlanningRecord;
use crate::validators::{ManualResolver, RecordValidator};
use dlit_common::config::{TomlConfig, YearRange};
use dlit_common::InfillMethod;
use tracing::info;
use uuid::Uuid;

/// Values-only configuration consumed by the pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub gfa_infill_method: InfillMethod,
    pub user_infill: bool,
    pub demolition_dampener: f64,
    pub build_out_years: Option<YearRange>,
    pub infill_plan: InfillPlan,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            gfa_infill_method: InfillMethod::Mean,
            user_infill: false,
            demolition_dampener: 1.0,
            build_out_years: None,
            infill_plan: InfillPlan::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml(config: &TomlConfig) -> PipelineResult<Self> {
        let pipeline_config = Self {
            gfa_infill_method: config.infill.gfa_infill_method,
            user_infill: config.infill.user_infill,
            demolition_dampener: config.land_use.demolition_dampener,
            build_out_years: config.land_use.build_out_years,
            infill_plan: InfillPlan::default(),
        };
        pipeline_config.validate()?;
        Ok(pipeline_config)
    }

    /// Reject out-of-range parameters
    pub fn validate(&self) -> PipelineResult<()> {
        if !self.demolition_dampener.is_finite() || !(0.0..=1.0).contains(&self.demolition_dampener) {
            return Err(PipelineError::Configuration(format!(
                "demolition_dampener must be within [0, 1], got {}",
                self.demolition_dampener
            )));
        }
        if let Some(range) = &self.build_out_years {
            if range.end < range.start {
                return Err(PipelineError::Configuration(format!(
                    "build_out_years ends ({}) before it starts ({})",
                    range.end, range.start
                )));
            }
        }
        if self.infill_plan.targets.is_empty() {
            return Err(PipelineError::Configuration(
                "infill plan has no targets".to_string(),
            ));
        }
        Ok(())
    }
}

/// Lookup data shared by every stage
pub struct PipelineInputs<'a> {
    pub tables: &'a ReferenceTables,
    pub geography: &'a dyn GeographyProvider,
    pub sic: &'a SicConversion,
    pub demographics: &'a DemographicTables,
    pub conversions: &'a UnitConversions,
}

/// Everything a run produces
#[derive(Debug)]
pub struct PipelineOutput {
    pub run_id: Uuid,
    /// All records, including invalid ones, with verdicts and provenance
    pub records: Vec<PlanningRecord>,
    pub volumes: VolumeTable,
    /// `volumes` flattened, with jobs and population where known
    pub volume_rows: Vec<VolumeRow>,
    pub profile: Option<Vec<ProfileRow>>,
    pub audit: AuditTrail,
    pub statistics: RunStatistics,
}

/// Configured pipeline
pub struct Pipeline<'a> {
    config: PipelineConfig,
    inputs: PipelineInputs<'a>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: PipelineConfig, inputs: PipelineInputs<'a>) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self { config, inputs })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage over `records`
    pub fn run(
        &self,
        mut records: Vec<PlanningRecord>,
        manual: &mut dyn ManualResolver,
    ) -> PipelineResult<PipelineOutput> {
        let run_id = Uuid::new_v4();
        info!(
            run_id = %run_id,
            records = records.len(),
            method = self.config.gfa_infill_method.as_str(),
            dampener = self.config.demolition_dampener,
            "Starting land use pipeline"
        );

        let mut audit = AuditTrail::new();
        let mut statistics = RunStatistics::default();

        let validator = RecordValidator::new(
            CodeResolver::new(self.inputs.tables),
            self.config.user_infill,
        );
        statistics.validation = validator.validate_all(&mut records, manual, &mut audit);

        let infiller = AttributeInfiller::new(
            self.config.gfa_infill_method,
            self.config.infill_plan.clone(),
        );
        statistics.infill = infiller.run(&mut records, &mut audit)?;
        statistics.infill.windows_imputed = infill_build_out_years(&mut records, &mut audit);

        let disaggregator = Disaggregator::new(
            self.inputs.geography,
            self.inputs.sic,
            self.inputs.demographics,
            &records,
            self.config.demolition_dampener,
        )?;
        let (volumes, disaggregation) = disaggregator.disaggregate_all(&records, &mut audit)?;
        statistics.disaggregation = disaggregation;

        let volume_rows = volumes.rows(self.inputs.conversions);
        let (jobs, population) = converted_totals(&volume_rows);
        statistics.disaggregation.proposed_jobs = jobs;
        statistics.disaggregation.proposed_population = population;

        let profile = self.config.build_out_years.as_ref().map(|range| {
            build_out_profile(&records, &volumes, range, self.inputs.conversions, &mut audit)
        });

        info!(run_id = %run_id, audit_events = audit.len(), "Pipeline complete");
        for line in statistics.display_lines() {
            info!("{}", line);
        }

        Ok(PipelineOutput {
            run_id,
            records,
            volumes,
            volume_rows,
            profile,
            audit,
            statistics,
        })
    }
}
