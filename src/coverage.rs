use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::CatalogConfig;
use crate::error::{ConfigError, CoverageError};
use crate::store::Versioned;

/// Every coverage the product has ever offered. Which of these may appear in
/// a schedule is decided by the active `CoverageCatalog` version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageCode {
    // Management liability
    Dno,
    Epl,
    Fiduciary,
    Crime,
    KidnapRansom,
    // Cyber
    NetworkSecurity,
    PrivacyLiability,
    BusinessInterruption,
    CyberExtortion,
    DataRestoration,
    MediaLiability,
    RegulatoryDefense,
    PciFines,
    SocialEngineering,
    FundsTransferFraud,
}

impl CoverageCode {
    pub const ALL: [CoverageCode; 15] = [
        CoverageCode::Dno,
        CoverageCode::Epl,
        CoverageCode::Fiduciary,
        CoverageCode::Crime,
        CoverageCode::KidnapRansom,
        CoverageCode::NetworkSecurity,
        CoverageCode::PrivacyLiability,
        CoverageCode::BusinessInterruption,
        CoverageCode::CyberExtortion,
        CoverageCode::DataRestoration,
        CoverageCode::MediaLiability,
        CoverageCode::RegulatoryDefense,
        CoverageCode::PciFines,
        CoverageCode::SocialEngineering,
        CoverageCode::FundsTransferFraud,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CoverageCode::Dno => "dno",
            CoverageCode::Epl => "epl",
            CoverageCode::Fiduciary => "fiduciary",
            CoverageCode::Crime => "crime",
            CoverageCode::KidnapRansom => "kidnap_ransom",
            CoverageCode::NetworkSecurity => "network_security",
            CoverageCode::PrivacyLiability => "privacy_liability",
            CoverageCode::BusinessInterruption => "business_interruption",
            CoverageCode::CyberExtortion => "cyber_extortion",
            CoverageCode::DataRestoration => "data_restoration",
            CoverageCode::MediaLiability => "media_liability",
            CoverageCode::RegulatoryDefense => "regulatory_defense",
            CoverageCode::PciFines => "pci_fines",
            CoverageCode::SocialEngineering => "social_engineering",
            CoverageCode::FundsTransferFraud => "funds_transfer_fraud",
        }
    }
}

impl fmt::Display for CoverageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoverageCode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CoverageCode::ALL.into_iter().find(|c| c.as_str() == s).ok_or(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyForm {
    Cyber,
    ManagementLiability,
    /// Cyber and management liability on one shared aggregate.
    Combined,
}

/// Versioned set of coverage codes allowed in schedules and endorsements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageCatalog {
    version: String,
    codes: BTreeSet<CoverageCode>,
}

impl Versioned for CoverageCatalog {
    fn version(&self) -> &str {
        &self.version
    }
}

impl CoverageCatalog {
    pub fn try_from_config(config: CatalogConfig) -> Result<Self, ConfigError> {
        if config.version.trim().is_empty() {
            return Err(ConfigError::Invalid {
                table: "coverage catalog",
                reason: "empty version id".to_string(),
            });
        }
        if config.coverages.is_empty() {
            return Err(ConfigError::Invalid {
                table: "coverage catalog",
                reason: format!("catalog {:?} lists no coverages", config.version),
            });
        }
        Ok(CoverageCatalog { version: config.version, codes: config.coverages.into_iter().collect() })
    }

    pub fn canonical() -> Self {
        Self::try_from_config(CatalogConfig::canonical()).expect("canonical coverage catalog is valid")
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn contains(&self, code: CoverageCode) -> bool {
        self.codes.contains(&code)
    }

    /// Resolve a raw key against this catalog. Unknown keys are an error,
    /// never skipped.
    pub fn resolve(&self, raw: &str) -> Result<CoverageCode, CoverageError> {
        match raw.parse::<CoverageCode>() {
            Ok(code) if self.contains(code) => Ok(code),
            _ => Err(CoverageError::UnknownCoverageCode {
                code: raw.to_string(),
                catalog_version: self.version.clone(),
            }),
        }
    }
}

/// A policy's limits. Keys are typed and checked against the catalog when the
/// schedule is built; money is in cents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageSchedule {
    pub policy_form: PolicyForm,
    pub aggregate_limit: u64,
    pub aggregate_coverages: BTreeMap<CoverageCode, u64>,
    pub sublimit_coverages: BTreeMap<CoverageCode, u64>,
}

/// A schedule as it arrives from the workflow layer, keyed by strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCoverageSchedule {
    pub policy_form: PolicyForm,
    pub aggregate_limit: u64,
    #[serde(default)]
    pub aggregate_coverages: BTreeMap<String, u64>,
    #[serde(default)]
    pub sublimit_coverages: BTreeMap<String, u64>,
}

impl RawCoverageSchedule {
    pub fn resolve(&self, catalog: &CoverageCatalog) -> Result<CoverageSchedule, CoverageError> {
        let resolve_map = |raw: &BTreeMap<String, u64>| {
            raw.iter()
                .map(|(key, limit)| Ok((catalog.resolve(key)?, *limit)))
                .collect::<Result<BTreeMap<_, _>, CoverageError>>()
        };
        let schedule = CoverageSchedule {
            policy_form: self.policy_form,
            aggregate_limit: self.aggregate_limit,
            aggregate_coverages: resolve_map(&self.aggregate_coverages)?,
            sublimit_coverages: resolve_map(&self.sublimit_coverages)?,
        };
        schedule.validate(catalog)?;
        Ok(schedule)
    }
}

impl CoverageSchedule {
    /// Check catalog membership of every key and that no sublimit exceeds the
    /// aggregate limit.
    pub fn validate(&self, catalog: &CoverageCatalog) -> Result<(), CoverageError> {
        if self.aggregate_limit == 0 {
            return Err(CoverageError::InvalidInput {
                field: "aggregate_limit".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        let keys = self.aggregate_coverages.keys().chain(self.sublimit_coverages.keys());
        if let Some(code) = keys.copied().find(|c| !catalog.contains(*c)) {
            return Err(CoverageError::UnknownCoverageCode {
                code: code.to_string(),
                catalog_version: catalog.version().to_string(),
            });
        }
        self.check_sublimits()
    }

    /// A sublimit can never exceed the shared aggregate.
    pub fn check_sublimits(&self) -> Result<(), CoverageError> {
        for (code, sublimit) in &self.sublimit_coverages {
            if *sublimit > self.aggregate_limit {
                return Err(CoverageError::SublimitExceedsAggregate {
                    code: code.to_string(),
                    sublimit: *sublimit,
                    aggregate_limit: self.aggregate_limit,
                });
            }
        }
        Ok(())
    }

    pub fn limit_for(&self, code: CoverageCode) -> Option<u64> {
        self.aggregate_coverages.get(&code).or_else(|| self.sublimit_coverages.get(&code)).copied()
    }
}
