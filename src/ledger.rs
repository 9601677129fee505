use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::coverage::{CoverageCatalog, CoverageSchedule, RawCoverageSchedule};
use crate::endorsement::{Endorsement, EndorsementKind, EndorsementStatus};
use crate::error::{CoverageError, LedgerError};
use crate::types::{EndorsementId, LedgerVersion, OptionId, Sequence, SubmissionId};

/// Non-coverage terms fixed at bind and later changed only by endorsement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTerms {
    pub named_insured: String,
    pub mailing_address: String,
    pub broker_of_record: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}

/// The three premium figures as they stood at bind. Cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundPremiums {
    pub technical: u64,
    pub risk_adjusted: u64,
    pub sold: u64,
}

impl BoundPremiums {
    pub fn market_adjustment(&self) -> i128 {
        i128::from(self.sold) - i128::from(self.risk_adjusted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindRequest {
    pub submission_id: SubmissionId,
    pub schedule: RawCoverageSchedule,
    pub retention: u64,
    pub premiums: BoundPremiums,
    pub terms: PolicyTerms,
    pub rate_table_version: String,
}

/// A priced structure once bound. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundOption {
    pub id: OptionId,
    pub submission_id: SubmissionId,
    pub baseline: CoverageSchedule,
    pub retention: u64,
    pub premiums: BoundPremiums,
    pub terms: PolicyTerms,
    pub bound_at: DateTime<Utc>,
    pub rate_table_version: String,
    pub catalog_version: String,
}

/// Consistent copy of one option and its full endorsement history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerView {
    pub option: BoundOption,
    pub endorsements: Vec<Endorsement>,
    pub version: LedgerVersion,
}

/// Edits allowed on a draft. `None` leaves the field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DraftEdit {
    pub kind: Option<EndorsementKind>,
    pub effective_date: Option<NaiveDate>,
    pub description: Option<Option<String>>,
}

/// Append-only endorsement history for one bound option.
pub struct EndorsementLedger {
    option: BoundOption,
    entries: Vec<Endorsement>,
    version: LedgerVersion,
    next_sequence: u64,
}

impl EndorsementLedger {
    pub fn new(option: BoundOption) -> Self {
        EndorsementLedger { option, entries: Vec::new(), version: LedgerVersion(0), next_sequence: 1 }
    }

    pub fn option(&self) -> &BoundOption {
        &self.option
    }

    pub fn version(&self) -> LedgerVersion {
        self.version
    }

    pub fn entries(&self) -> &[Endorsement] {
        &self.entries
    }

    pub fn view(&self) -> LedgerView {
        LedgerView { option: self.option.clone(), endorsements: self.entries.clone(), version: self.version }
    }

    pub fn get(&self, id: EndorsementId) -> Result<&Endorsement, LedgerError> {
        self.entries.iter().find(|e| e.id == id).ok_or(LedgerError::UnknownEndorsement(id))
    }

    fn get_mut(&mut self, id: EndorsementId) -> Result<&mut Endorsement, LedgerError> {
        self.entries.iter_mut().find(|e| e.id == id).ok_or(LedgerError::UnknownEndorsement(id))
    }

    fn check_effective_date(&self, effective_date: NaiveDate) -> Result<(), LedgerError> {
        let inception = self.option.terms.period_start;
        if effective_date < inception {
            return Err(LedgerError::EffectiveBeforeInception { effective_date, inception });
        }
        Ok(())
    }

    pub fn propose(
        &mut self,
        id: EndorsementId,
        kind: EndorsementKind,
        effective_date: NaiveDate,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<&Endorsement, LedgerError> {
        self.check_effective_date(effective_date)?;
        self.entries.push(Endorsement {
            id,
            option_id: self.option.id,
            kind,
            status: EndorsementStatus::Draft,
            effective_date,
            creation_sequence: None,
            description,
            created_at: now,
            issued_at: None,
            voided_at: None,
            void_reason: None,
        });
        Ok(&self.entries[self.entries.len() - 1])
    }

    pub fn update_draft(&mut self, id: EndorsementId, edit: DraftEdit) -> Result<&Endorsement, LedgerError> {
        if let Some(date) = edit.effective_date {
            self.check_effective_date(date)?;
        }
        let entry = self.get_mut(id)?;
        if entry.status != EndorsementStatus::Draft {
            return Err(LedgerError::ImmutableEndorsement(id));
        }
        if let Some(kind) = edit.kind {
            entry.kind = kind;
        }
        if let Some(date) = edit.effective_date {
            entry.effective_date = date;
        }
        if let Some(description) = edit.description {
            entry.description = description;
        }
        Ok(&*entry)
    }

    pub fn delete_draft(&mut self, id: EndorsementId) -> Result<Endorsement, LedgerError> {
        let idx = self.entries.iter().position(|e| e.id == id).ok_or(LedgerError::UnknownEndorsement(id))?;
        if self.entries[idx].status != EndorsementStatus::Draft {
            return Err(LedgerError::ImmutableEndorsement(id));
        }
        Ok(self.entries.remove(idx))
    }

    /// `draft → issued`. The caller passes the ledger version it last read;
    /// if anything was issued or voided since, the call fails and must be
    /// retried against a fresh view. A non-draft fails with
    /// `InvalidTransition` whatever version is passed.
    pub fn issue(
        &mut self,
        id: EndorsementId,
        expected: LedgerVersion,
        now: DateTime<Utc>,
    ) -> Result<&Endorsement, LedgerError> {
        let status = self.get(id)?.status;
        if status != EndorsementStatus::Draft {
            return Err(LedgerError::InvalidTransition {
                id,
                from: status.as_str(),
                to: EndorsementStatus::Issued.as_str(),
            });
        }
        if expected != self.version {
            return Err(LedgerError::ConcurrentModification {
                option: self.option.id,
                expected,
                actual: self.version,
            });
        }
        let sequence = Sequence(self.next_sequence);
        let entry = self.get_mut(id)?;
        entry.status = EndorsementStatus::Issued;
        entry.creation_sequence = Some(sequence);
        entry.issued_at = Some(now);
        self.next_sequence += 1;
        self.version = self.version.next();
        self.get(id)
    }

    /// `issued → voided`. The record stays in the ledger.
    pub fn void(&mut self, id: EndorsementId, reason: String, now: DateTime<Utc>) -> Result<&Endorsement, LedgerError> {
        let entry = self.get_mut(id)?;
        if entry.status != EndorsementStatus::Issued {
            return Err(LedgerError::InvalidTransition {
                id,
                from: entry.status.as_str(),
                to: EndorsementStatus::Voided.as_str(),
            });
        }
        entry.status = EndorsementStatus::Voided;
        entry.voided_at = Some(now);
        entry.void_reason = Some(reason);
        self.version = self.version.next();
        self.get(id)
    }
}

/// Every bound option's ledger, each behind its own lock so that issuance is
/// serialized per option while different options proceed independently.
pub struct PolicyBook {
    ledgers: RwLock<HashMap<OptionId, Arc<Mutex<EndorsementLedger>>>>,
    owners: RwLock<HashMap<EndorsementId, OptionId>>,
    next_option_id: AtomicU64,
    next_endorsement_id: AtomicU64,
}

impl Default for PolicyBook {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyBook {
    pub fn new() -> Self {
        PolicyBook {
            ledgers: RwLock::new(HashMap::new()),
            owners: RwLock::new(HashMap::new()),
            next_option_id: AtomicU64::new(1),
            next_endorsement_id: AtomicU64::new(1),
        }
    }

    fn ledger(&self, option_id: OptionId) -> Result<Arc<Mutex<EndorsementLedger>>, LedgerError> {
        let ledgers = self.ledgers.read().unwrap_or_else(PoisonError::into_inner);
        ledgers.get(&option_id).cloned().ok_or(LedgerError::UnknownOption(option_id))
    }

    fn owner(&self, id: EndorsementId) -> Result<OptionId, LedgerError> {
        let owners = self.owners.read().unwrap_or_else(PoisonError::into_inner);
        owners.get(&id).copied().ok_or(LedgerError::UnknownEndorsement(id))
    }

    fn with_ledger<T>(
        &self,
        option_id: OptionId,
        f: impl FnOnce(&mut EndorsementLedger) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let ledger = self.ledger(option_id)?;
        let mut guard = ledger.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Create the bound option. The schedule is resolved against the catalog
    /// in force and becomes the immutable baseline.
    pub fn bind(&self, request: BindRequest, catalog: &CoverageCatalog) -> Result<BoundOption, LedgerError> {
        let baseline = request.schedule.resolve(catalog)?;
        if request.terms.period_end <= request.terms.period_start {
            return Err(CoverageError::InvalidInput {
                field: "period_end".to_string(),
                reason: "must fall after period_start".to_string(),
            }
            .into());
        }
        let id = OptionId(self.next_option_id.fetch_add(1, Ordering::Relaxed));
        let option = BoundOption {
            id,
            submission_id: request.submission_id,
            baseline,
            retention: request.retention,
            premiums: request.premiums,
            terms: request.terms,
            bound_at: Utc::now(),
            rate_table_version: request.rate_table_version,
            catalog_version: catalog.version().to_string(),
        };
        let mut ledgers = self.ledgers.write().unwrap_or_else(PoisonError::into_inner);
        ledgers.insert(id, Arc::new(Mutex::new(EndorsementLedger::new(option.clone()))));
        info!(option = id.0, submission = option.submission_id.0, "bound option");
        Ok(option)
    }

    pub fn propose(
        &self,
        option_id: OptionId,
        kind: EndorsementKind,
        effective_date: NaiveDate,
        description: Option<String>,
    ) -> Result<Endorsement, LedgerError> {
        let id = EndorsementId(self.next_endorsement_id.fetch_add(1, Ordering::Relaxed));
        let endorsement = self.with_ledger(option_id, |ledger| {
            ledger.propose(id, kind, effective_date, description, Utc::now()).cloned()
        })?;
        let mut owners = self.owners.write().unwrap_or_else(PoisonError::into_inner);
        owners.insert(id, option_id);
        info!(option = option_id.0, endorsement = id.0, kind = endorsement.kind.type_name(), "proposed endorsement");
        Ok(endorsement)
    }

    pub fn update_draft(&self, id: EndorsementId, edit: DraftEdit) -> Result<Endorsement, LedgerError> {
        let option_id = self.owner(id)?;
        self.with_ledger(option_id, |ledger| ledger.update_draft(id, edit).cloned())
    }

    pub fn delete_draft(&self, id: EndorsementId) -> Result<Endorsement, LedgerError> {
        let option_id = self.owner(id)?;
        let removed = self.with_ledger(option_id, |ledger| ledger.delete_draft(id))?;
        let mut owners = self.owners.write().unwrap_or_else(PoisonError::into_inner);
        owners.remove(&id);
        info!(option = option_id.0, endorsement = id.0, "deleted draft endorsement");
        Ok(removed)
    }

    pub fn issue(&self, id: EndorsementId, expected: LedgerVersion) -> Result<Endorsement, LedgerError> {
        let option_id = self.owner(id)?;
        let issued = self.with_ledger(option_id, |ledger| ledger.issue(id, expected, Utc::now()).cloned())?;
        info!(
            option = option_id.0,
            endorsement = id.0,
            sequence = issued.creation_sequence.map(|s| s.0),
            "issued endorsement"
        );
        Ok(issued)
    }

    pub fn void(&self, id: EndorsementId, reason: impl Into<String>) -> Result<Endorsement, LedgerError> {
        let option_id = self.owner(id)?;
        let reason = reason.into();
        let voided = self.with_ledger(option_id, |ledger| ledger.void(id, reason, Utc::now()).cloned())?;
        info!(option = option_id.0, endorsement = id.0, "voided endorsement");
        Ok(voided)
    }

    /// One consistent read of an option and its ledger, taken under the
    /// option's lock.
    pub fn view(&self, option_id: OptionId) -> Result<LedgerView, LedgerError> {
        self.with_ledger(option_id, |ledger| Ok(ledger.view()))
    }

    pub fn option_ids(&self) -> Vec<OptionId> {
        let ledgers = self.ledgers.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<OptionId> = ledgers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
