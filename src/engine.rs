use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{info, instrument};

use crate::config::{CatalogConfig, EngineConfig, RateTableConfig};
use crate::coverage::CoverageCatalog;
use crate::endorsement::{Endorsement, EndorsementKind};
use crate::error::{ConfigError, LedgerError, RatingError, SnapshotError};
use crate::evolution::{self, EffectivePolicyState};
use crate::ledger::{BindRequest, BoundOption, DraftEdit, LedgerView, PolicyBook};
use crate::rate_table::RateTableSnapshot;
use crate::rating::{self, RatingInputs, RatingResult};
use crate::snapshot::{
    CaptureOutcome, CaptureWarning, DecisionPoint, DecisionSnapshot, ExtractedValues, ImportanceWeights,
    SnapshotCapturer, SnapshotSink, SnapshotSubject,
};
use crate::store::VersionedStore;
use crate::types::{EndorsementId, LedgerVersion, OptionId};

/// The call surface the quote and policy workflows use. Owns the reference
/// data stores, the bound-option ledgers and the snapshot capturer.
pub struct Engine {
    rate_tables: VersionedStore<RateTableSnapshot>,
    catalogs: VersionedStore<CoverageCatalog>,
    book: PolicyBook,
    snapshots: SnapshotCapturer,
}

impl Engine {
    pub fn new(config: EngineConfig, sink: Arc<dyn SnapshotSink>) -> Result<Self, ConfigError> {
        let tables = RateTableSnapshot::try_from_config(config.rate_tables)?;
        let catalog = CoverageCatalog::try_from_config(config.coverage_catalog)?;
        if !(0.0..=1.0).contains(&config.snapshot.low_confidence_threshold) {
            return Err(ConfigError::Invalid {
                table: "snapshot",
                reason: format!("low_confidence_threshold {} is outside [0, 1]", config.snapshot.low_confidence_threshold),
            });
        }
        info!(rate_tables = tables.version(), catalog = catalog.version(), "engine ready");
        Ok(Engine {
            rate_tables: VersionedStore::new("rate tables", tables),
            catalogs: VersionedStore::new("coverage catalog", catalog),
            book: PolicyBook::new(),
            snapshots: SnapshotCapturer::new(&config.snapshot, sink),
        })
    }

    pub fn active_rate_tables(&self) -> Arc<RateTableSnapshot> {
        self.rate_tables.active()
    }

    pub fn active_catalog(&self) -> Arc<CoverageCatalog> {
        self.catalogs.active()
    }

    // ── Rating ────────────────────────────────────────────────────────────────

    #[instrument(skip_all, fields(industry = %inputs.industry_code))]
    pub fn calculate_premium(&self, inputs: &RatingInputs) -> Result<RatingResult, RatingError> {
        let tables = self.rate_tables.active();
        rating::calculate(inputs, &tables)
    }

    /// Re-rate against a specific table version, e.g. to reproduce a quote.
    #[instrument(skip(self, inputs), fields(industry = %inputs.industry_code))]
    pub fn calculate_premium_with_version(
        &self,
        inputs: &RatingInputs,
        version: &str,
    ) -> Result<RatingResult, RatingError> {
        let tables =
            self.rate_tables.get(version).ok_or_else(|| RatingError::UnknownRateTableVersion(version.to_string()))?;
        rating::calculate(inputs, &tables)
    }

    /// Every input is rated against the same snapshot, even if a new version
    /// is activated mid-batch.
    #[instrument(skip_all, fields(count = inputs.len()))]
    pub fn calculate_premium_batch(&self, inputs: &[RatingInputs]) -> Vec<Result<RatingResult, RatingError>> {
        let tables = self.rate_tables.active();
        rating::calculate_batch(inputs, &tables)
    }

    // ── Binding and endorsements ──────────────────────────────────────────────

    #[instrument(skip_all, fields(submission = request.submission_id.0))]
    pub fn bind(&self, request: BindRequest) -> Result<BoundOption, LedgerError> {
        let catalog = self.catalogs.active();
        self.book.bind(request, &catalog)
    }

    /// Bind, then capture the `PolicyBound` snapshot. A capture failure is
    /// recorded as a warning and never undoes the bind.
    #[instrument(skip_all, fields(submission = request.submission_id.0))]
    pub fn bind_with_snapshot(
        &self,
        request: BindRequest,
        rating: &RatingResult,
        extracted: &ExtractedValues,
        weights: &ImportanceWeights,
    ) -> Result<(BoundOption, CaptureOutcome), LedgerError> {
        let option = self.bind(request)?;
        let subject = SnapshotSubject { submission_id: option.submission_id, option_id: Some(option.id) };
        let outcome = self.snapshots.record(DecisionPoint::PolicyBound, subject, rating, extracted, weights);
        Ok((option, outcome))
    }

    #[instrument(skip(self, kind, description), fields(kind = kind.type_name()))]
    pub fn propose_endorsement(
        &self,
        option_id: OptionId,
        kind: EndorsementKind,
        effective_date: NaiveDate,
        description: Option<String>,
    ) -> Result<Endorsement, LedgerError> {
        self.book.propose(option_id, kind, effective_date, description)
    }

    #[instrument(skip(self, edit))]
    pub fn update_draft(&self, id: EndorsementId, edit: DraftEdit) -> Result<Endorsement, LedgerError> {
        self.book.update_draft(id, edit)
    }

    #[instrument(skip(self))]
    pub fn delete_draft(&self, id: EndorsementId) -> Result<Endorsement, LedgerError> {
        self.book.delete_draft(id)
    }

    /// `expected` is the ledger version the caller last read. A stale value
    /// fails with the retryable `ConcurrentModification`.
    #[instrument(skip(self))]
    pub fn issue(&self, id: EndorsementId, expected: LedgerVersion) -> Result<Endorsement, LedgerError> {
        self.book.issue(id, expected)
    }

    #[instrument(skip(self, reason))]
    pub fn void(&self, id: EndorsementId, reason: impl Into<String>) -> Result<Endorsement, LedgerError> {
        self.book.void(id, reason)
    }

    pub fn ledger_view(&self, option_id: OptionId) -> Result<LedgerView, LedgerError> {
        self.book.view(option_id)
    }

    /// Fold the full ledger against the catalog version the option was bound
    /// under, so activating a newer catalog never changes an existing
    /// policy's history. Recomputed on every call.
    #[instrument(skip(self))]
    pub fn effective_state(&self, option_id: OptionId) -> Result<EffectivePolicyState, LedgerError> {
        let view = self.book.view(option_id)?;
        // Versions are never unloaded; the bind-time catalog is always present.
        let catalog = self.catalogs.get(&view.option.catalog_version).unwrap_or_else(|| self.catalogs.active());
        Ok(evolution::effective_state(&view, &catalog)?)
    }

    // ── Decision snapshots ────────────────────────────────────────────────────

    pub fn capture_snapshot(
        &self,
        point: DecisionPoint,
        subject: SnapshotSubject,
        rating: &RatingResult,
        extracted: &ExtractedValues,
        weights: &ImportanceWeights,
    ) -> Result<DecisionSnapshot, SnapshotError> {
        self.snapshots.capture(point, subject, rating, extracted, weights)
    }

    /// Workflow hook for quote issue, bind and renewal offer. Never fails.
    pub fn record_decision(
        &self,
        point: DecisionPoint,
        subject: SnapshotSubject,
        rating: &RatingResult,
        extracted: &ExtractedValues,
        weights: &ImportanceWeights,
    ) -> CaptureOutcome {
        self.snapshots.record(point, subject, rating, extracted, weights)
    }

    pub fn capture_warnings(&self) -> Vec<CaptureWarning> {
        self.snapshots.warnings()
    }

    /// Drain recorded capture warnings, e.g. after forwarding them to an
    /// alerting channel.
    pub fn take_capture_warnings(&self) -> Vec<CaptureWarning> {
        self.snapshots.take_warnings()
    }

    // ── Reference data ────────────────────────────────────────────────────────

    /// Validate, publish and activate a new rate table version. Calculations
    /// already running keep the snapshot they started with.
    pub fn activate_rate_tables(&self, config: RateTableConfig) -> Result<String, ConfigError> {
        let tables = RateTableSnapshot::try_from_config(config)?;
        Ok(self.rate_tables.publish_and_activate(tables)?.version().to_string())
    }

    /// Switch back to an already loaded rate table version.
    pub fn activate_rate_table_version(&self, version: &str) -> Result<(), ConfigError> {
        self.rate_tables.activate(version).map(|_| ())
    }

    pub fn activate_catalog(&self, config: CatalogConfig) -> Result<String, ConfigError> {
        let catalog = CoverageCatalog::try_from_config(config)?;
        Ok(self.catalogs.publish_and_activate(catalog)?.version().to_string())
    }

    pub fn rate_table_versions(&self) -> Vec<String> {
        self.rate_tables.versions()
    }
}
