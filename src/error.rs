use thiserror::Error;

use crate::types::{EndorsementId, HazardClass, LedgerVersion, OptionId};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RatingError {
    #[error("industry code {industry_code:?} has no hazard class and no override was given")]
    UnmappedIndustry { industry_code: String },
    #[error("no base rate for hazard class {hazard_class} in revenue band {revenue_band:?}")]
    MissingRateTableEntry { hazard_class: HazardClass, revenue_band: String },
    #[error("invalid rating input {field}: {reason}")]
    InvalidInput { field: &'static str, reason: String },
    #[error("rate table version {0:?} is not loaded")]
    UnknownRateTableVersion(String),
    #[error("{stage} premium {premium} cents is outside the representable range")]
    PremiumOutOfRange { stage: &'static str, premium: f64 },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoverageError {
    #[error("coverage code {code:?} is not in coverage catalog {catalog_version:?}")]
    UnknownCoverageCode { code: String, catalog_version: String },
    #[error("sublimit {code} of {sublimit} exceeds aggregate limit {aggregate_limit}")]
    SublimitExceedsAggregate { code: String, sublimit: u64, aggregate_limit: u64 },
    #[error("invalid coverage field {field}: {reason}")]
    InvalidInput { field: String, reason: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("bound option {0:?} not found")]
    UnknownOption(OptionId),
    #[error("endorsement {0:?} not found")]
    UnknownEndorsement(EndorsementId),
    #[error("endorsement {id:?} cannot move from {from} to {to}")]
    InvalidTransition { id: EndorsementId, from: &'static str, to: &'static str },
    #[error("endorsement {0:?} is no longer a draft and cannot be edited")]
    ImmutableEndorsement(EndorsementId),
    #[error("effective date {effective_date} precedes policy inception {inception}")]
    EffectiveBeforeInception { effective_date: chrono::NaiveDate, inception: chrono::NaiveDate },
    #[error(
        "ledger for option {option:?} moved from version {expected:?} to {actual:?}; re-read and retry"
    )]
    ConcurrentModification { option: OptionId, expected: LedgerVersion, actual: LedgerVersion },
    #[error(transparent)]
    Coverage(#[from] CoverageError),
}

impl LedgerError {
    /// Whether re-reading the ledger and repeating the call can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::ConcurrentModification { .. })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("decision snapshot capture failed: {reason}")]
    SnapshotCaptureFailed { reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid {table}: {reason}")]
    Invalid { table: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_concurrent_modification_is_retryable() {
        let conflict = LedgerError::ConcurrentModification {
            option: OptionId(1),
            expected: LedgerVersion(2),
            actual: LedgerVersion(3),
        };
        assert!(conflict.is_retryable());
        assert!(!LedgerError::UnknownOption(OptionId(1)).is_retryable());
        assert!(!LedgerError::ImmutableEndorsement(EndorsementId(4)).is_retryable());
    }

    #[test]
    fn coverage_error_converts_into_ledger_error() {
        let err: LedgerError = CoverageError::UnknownCoverageCode {
            code: "nonexistent_coverage".to_string(),
            catalog_version: "2025.1".to_string(),
        }
        .into();
        assert!(matches!(err, LedgerError::Coverage(CoverageError::UnknownCoverageCode { .. })));
        assert!(err.to_string().contains("nonexistent_coverage"));
    }
}
