use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::coverage::{CoverageCatalog, CoverageSchedule};
use crate::endorsement::{CoverageChange, Endorsement, EndorsementKind};
use crate::error::CoverageError;
use crate::ledger::{BoundOption, LedgerView};
use crate::types::{EndorsementId, LedgerVersion, OptionId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PolicyStatus {
    Active,
    Cancelled { effective: NaiveDate, reason: String },
}

/// Terms projection folded from non-coverage endorsements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyFacts {
    pub named_insured: String,
    pub mailing_address: String,
    pub broker_of_record: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub reporting_period_end: Option<NaiveDate>,
    pub status: PolicyStatus,
}

impl PolicyFacts {
    fn from_bound(option: &BoundOption) -> Self {
        let terms = &option.terms;
        PolicyFacts {
            named_insured: terms.named_insured.clone(),
            mailing_address: terms.mailing_address.clone(),
            broker_of_record: terms.broker_of_record.clone(),
            period_start: terms.period_start,
            period_end: terms.period_end,
            reporting_period_end: None,
            status: PolicyStatus::Active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedChange {
    pub endorsement_id: EndorsementId,
    pub description: String,
    pub effective_date: NaiveDate,
}

/// Coverage and terms in force. Derived on every read; never authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectivePolicyState {
    pub option_id: OptionId,
    pub schedule: CoverageSchedule,
    pub facts: PolicyFacts,
    pub changes_applied: Vec<AppliedChange>,
    pub ledger_version: LedgerVersion,
    pub catalog_version: String,
}

/// Replay every issued endorsement over the bound baseline, in
/// `(effective_date, creation_sequence)` order. Always a full fold.
pub fn effective_state(view: &LedgerView, catalog: &CoverageCatalog) -> Result<EffectivePolicyState, CoverageError> {
    let mut issued: Vec<&Endorsement> = view.endorsements.iter().filter(|e| e.is_issued()).collect();
    issued.sort_by_key(|e| e.fold_key());

    let mut schedule = view.option.baseline.clone();
    let mut facts = PolicyFacts::from_bound(&view.option);
    let mut changes_applied = Vec::with_capacity(issued.len());

    for endorsement in issued {
        apply(endorsement, &mut schedule, &mut facts, catalog)?;
        changes_applied.push(AppliedChange {
            endorsement_id: endorsement.id,
            description: endorsement.audit_description(),
            effective_date: endorsement.effective_date,
        });
    }

    schedule.check_sublimits()?;
    debug!(
        option = view.option.id.0,
        applied = changes_applied.len(),
        ledger_version = view.version.0,
        "folded effective policy state"
    );

    Ok(EffectivePolicyState {
        option_id: view.option.id,
        schedule,
        facts,
        changes_applied,
        ledger_version: view.version,
        catalog_version: catalog.version().to_string(),
    })
}

fn apply(
    endorsement: &Endorsement,
    schedule: &mut CoverageSchedule,
    facts: &mut PolicyFacts,
    catalog: &CoverageCatalog,
) -> Result<(), CoverageError> {
    match &endorsement.kind {
        EndorsementKind::CoverageChange(change) => apply_coverage_change(change, schedule, catalog)?,
        EndorsementKind::Cancellation { reason } => {
            facts.status = PolicyStatus::Cancelled { effective: endorsement.effective_date, reason: reason.clone() };
        }
        EndorsementKind::Reinstatement => facts.status = PolicyStatus::Active,
        EndorsementKind::Extension { new_expiration } => facts.period_end = *new_expiration,
        EndorsementKind::NameChange { new_named_insured } => facts.named_insured = new_named_insured.clone(),
        EndorsementKind::AddressChange { new_address } => facts.mailing_address = new_address.clone(),
        EndorsementKind::BorChange { new_broker } => facts.broker_of_record = new_broker.clone(),
        EndorsementKind::Erp { reporting_period_end } => facts.reporting_period_end = Some(*reporting_period_end),
        EndorsementKind::Other { .. } => {}
    }
    Ok(())
}

/// Sparse patch: only keys carrying a `new` value are written. Every key is
/// resolved first so an unknown code fails before anything is applied.
fn apply_coverage_change(
    change: &CoverageChange,
    schedule: &mut CoverageSchedule,
    catalog: &CoverageCatalog,
) -> Result<(), CoverageError> {
    let aggregate = change
        .aggregate_coverages
        .iter()
        .map(|(key, field)| Ok((catalog.resolve(key)?, field.new)))
        .collect::<Result<Vec<_>, CoverageError>>()?;
    let sublimits = change
        .sublimit_coverages
        .iter()
        .map(|(key, field)| Ok((catalog.resolve(key)?, field.new)))
        .collect::<Result<Vec<_>, CoverageError>>()?;

    if let Some(new) = change.aggregate_limit.and_then(|f| f.new) {
        schedule.aggregate_limit = new;
    }
    for (code, new) in aggregate {
        if let Some(limit) = new {
            schedule.aggregate_coverages.insert(code, limit);
        }
    }
    for (code, new) in sublimits {
        if let Some(limit) = new {
            schedule.sublimit_coverages.insert(code, limit);
        }
    }
    Ok(())
}
