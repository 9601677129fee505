use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::coverage::CoverageCode;
use crate::error::ConfigError;

/// One revenue band. Bands are listed in ascending order; `upper_bound` is
/// inclusive and only the last band may be unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueBandConfig {
    pub name: String,
    pub upper_bound: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseRateConfig {
    pub hazard_class: u8,
    pub revenue_band: String,
    /// Cents of premium per `revenue_unit` of revenue.
    pub rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub x: f64,
    pub factor: f64,
}

/// Raw, unvalidated rate tables. Turned into an immutable
/// `RateTableSnapshot` before any premium is calculated against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateTableConfig {
    pub version: String,
    /// Industry code (NAICS) → hazard class 1–5.
    pub hazard_map: BTreeMap<String, u8>,
    pub revenue_bands: Vec<RevenueBandConfig>,
    pub base_rates: Vec<BaseRateConfig>,
    /// Revenue per rating unit, in cents.
    pub revenue_unit: i64,
    pub revenue_exponent: f64,
    /// Limit at which `limit_factor` is 1.0, in cents.
    pub base_limit: i64,
    /// x = requested limit / base limit.
    pub limit_curve: Vec<CurvePoint>,
    /// x = requested retention in cents.
    pub retention_curve: Vec<CurvePoint>,
    /// Control code → signed fractional modifier (-0.10 = 10% credit).
    pub control_modifiers: BTreeMap<String, f64>,
    pub adjustment_floor: f64,
    pub adjustment_ceiling: f64,
    /// Floor on the technical premium, in cents.
    pub minimum_premium: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub version: String,
    pub coverages: Vec<CoverageCode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Extracted values with confidence strictly below this count as gaps.
    pub low_confidence_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub rate_tables: RateTableConfig,
    pub coverage_catalog: CatalogConfig,
    pub snapshot: SnapshotConfig,
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        Self::from_json_str(&text)
    }

    pub fn canonical() -> Self {
        EngineConfig {
            rate_tables: RateTableConfig::canonical(),
            coverage_catalog: CatalogConfig::canonical(),
            snapshot: SnapshotConfig { low_confidence_threshold: 0.7 },
        }
    }
}

// Money below is in cents. $1M = 100_000_000.
const MILLION: i64 = 100_000_000;

impl RateTableConfig {
    pub fn canonical() -> Self {
        // ── Hazard map ────────────────────────────────────────────────────────
        let hazard_map = BTreeMap::from([
            ("531110".to_string(), 1), // lessors of residential buildings
            ("236220".to_string(), 1), // commercial construction
            ("541611".to_string(), 2), // management consulting
            ("541511".to_string(), 3), // custom software
            ("541512".to_string(), 3), // computer systems design
            ("455110".to_string(), 3), // department stores
            ("621111".to_string(), 4), // physician offices
            ("611310".to_string(), 4), // colleges and universities
            ("518210".to_string(), 5), // data processing and hosting
            ("522110".to_string(), 5), // commercial banking
        ]);

        let revenue_bands = vec![
            RevenueBandConfig { name: "low".to_string(),       upper_bound: Some(10 * MILLION) },
            RevenueBandConfig { name: "mid".to_string(),       upper_bound: Some(50 * MILLION) },
            RevenueBandConfig { name: "high".to_string(),      upper_bound: Some(250 * MILLION) },
            RevenueBandConfig { name: "very_high".to_string(), upper_bound: None },
        ];

        // ── Base rates: cents per $1M revenue ────────────────────────────────
        let grid: [(u8, [f64; 4]); 5] = [
            (1, [ 90_000.0,  65_000.0,  42_000.0,  27_000.0]),
            (2, [140_000.0, 100_000.0,  65_000.0,  40_000.0]),
            (3, [210_000.0, 150_000.0,  95_000.0,  60_000.0]),
            (4, [300_000.0, 215_000.0, 135_000.0,  85_000.0]),
            (5, [420_000.0, 300_000.0, 190_000.0, 120_000.0]),
        ];
        let base_rates = grid
            .iter()
            .flat_map(|(hazard, rates)| {
                revenue_bands.iter().zip(rates).map(move |(band, rate)| BaseRateConfig {
                    hazard_class: *hazard,
                    revenue_band: band.name.clone(),
                    rate: *rate,
                })
            })
            .collect();

        let limit_curve = [
            (0.25, 0.45),
            (0.5, 0.70),
            (1.0, 1.00),
            (2.0, 1.60),
            (3.0, 2.10),
            (5.0, 2.90),
            (10.0, 4.50),
        ]
        .map(|(x, factor)| CurvePoint { x, factor })
        .to_vec();

        let retention_curve = [
            (0.0, 1.35),
            (1_000_000.0, 1.15),   // $10k
            (2_500_000.0, 1.00),   // $25k
            (5_000_000.0, 0.90),   // $50k
            (10_000_000.0, 0.80),  // $100k
            (25_000_000.0, 0.70),  // $250k
            (100_000_000.0, 0.60), // $1M
        ]
        .map(|(x, factor)| CurvePoint { x, factor })
        .to_vec();

        let control_modifiers = BTreeMap::from([
            ("MFA".to_string(), -0.10),
            ("EDR".to_string(), -0.075),
            ("OFFLINE_BACKUPS".to_string(), -0.05),
            ("PATCH_MGMT".to_string(), -0.05),
            ("IR_PLAN".to_string(), -0.025),
            ("SECURITY_TRAINING".to_string(), -0.025),
            ("EOL_SOFTWARE".to_string(), 0.15),
            ("OPEN_RDP".to_string(), 0.20),
        ]);

        RateTableConfig {
            version: "2025.1".to_string(),
            hazard_map,
            revenue_bands,
            base_rates,
            revenue_unit: MILLION,
            revenue_exponent: 1.0,
            base_limit: MILLION,
            limit_curve,
            retention_curve,
            control_modifiers,
            adjustment_floor: -0.25,
            adjustment_ceiling: 0.25,
            minimum_premium: 250_000,
        }
    }
}

impl CatalogConfig {
    pub fn canonical() -> Self {
        CatalogConfig { version: "2025.1".to_string(), coverages: CoverageCode::ALL.to_vec() }
    }
}
