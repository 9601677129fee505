use std::collections::BTreeSet;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::RatingError;
use crate::rate_table::RateTableSnapshot;
use crate::types::{HazardClass, MAX_PREMIUM, round_cents};

/// Everything the calculator needs to price one risk. Money in cents; signed
/// so that bad upstream values are rejected rather than wrapped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingInputs {
    pub industry_code: String,
    pub annual_revenue: i64,
    pub requested_limit: i64,
    pub requested_retention: i64,
    #[serde(default)]
    pub hazard_class_override: Option<u8>,
    #[serde(default)]
    pub controls: BTreeSet<String>,
    /// Replaces the itemized control combination when present.
    #[serde(default)]
    pub control_adjustment_override: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentSource {
    Itemized,
    Override,
}

/// Full premium breakdown. Every number that fed the final premium is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingResult {
    pub rate_table_version: String,
    pub technical_premium: u64,
    pub risk_adjusted_premium: u64,
    pub hazard_class: HazardClass,
    pub revenue_band: String,
    pub base_rate: f64,
    pub revenue_scalar: f64,
    pub limit_factor: f64,
    pub retention_factor: f64,
    /// Controls that matched the modifier table, in code order.
    pub applied_controls: Vec<(String, f64)>,
    pub adjustment_source: AdjustmentSource,
    /// Combined control adjustment after clamping.
    pub combined_adjustment: f64,
}

impl RatingResult {
    /// Underwriter's pricing deviation from the modelled figure. Computed on
    /// demand from a sold premium supplied later; never stored.
    pub fn market_adjustment(&self, sold_premium: u64) -> i128 {
        i128::from(sold_premium) - i128::from(self.risk_adjusted_premium)
    }
}

/// Price one risk against one table snapshot. Any unmapped lookup is an
/// error; there is no fallback rate.
pub fn calculate(inputs: &RatingInputs, tables: &RateTableSnapshot) -> Result<RatingResult, RatingError> {
    validate(inputs)?;

    let hazard_class = match inputs.hazard_class_override {
        Some(raw) => HazardClass(raw),
        None => tables.hazard_for(&inputs.industry_code).ok_or_else(|| RatingError::UnmappedIndustry {
            industry_code: inputs.industry_code.clone(),
        })?,
    };

    let band = tables.revenue_band(inputs.annual_revenue);
    let base_rate = tables.base_rate(hazard_class, &band.name).ok_or_else(|| {
        RatingError::MissingRateTableEntry { hazard_class, revenue_band: band.name.clone() }
    })?;

    let revenue_scalar = tables.revenue_scalar(inputs.annual_revenue);
    let limit_factor = tables.limit_factor(inputs.requested_limit);
    let retention_factor = tables.retention_factor(inputs.requested_retention);
    debug!(
        %hazard_class,
        band = %band.name,
        base_rate,
        revenue_scalar,
        limit_factor,
        retention_factor,
        "resolved rating factors"
    );

    let exposure_premium = base_rate * revenue_scalar * limit_factor * retention_factor;
    check_premium("technical", exposure_premium)?;
    let technical_premium = round_cents(exposure_premium).max(tables.minimum_premium());
    check_premium("technical", technical_premium as f64)?;

    let mut applied_controls = Vec::new();
    for code in &inputs.controls {
        match tables.control_modifier(code) {
            Some(modifier) => applied_controls.push((code.clone(), modifier)),
            None => debug!(control = %code, "control has no modifier in this table version"),
        }
    }

    let (adjustment_source, raw_adjustment) = match inputs.control_adjustment_override {
        Some(value) => {
            if !applied_controls.is_empty() {
                // Precedence is unconfirmed by product; the override wins.
                warn!(
                    override_value = value,
                    itemized = applied_controls.len(),
                    "control adjustment override replaces itemized control modifiers"
                );
            }
            applied_controls.clear();
            (AdjustmentSource::Override, value)
        }
        None => (AdjustmentSource::Itemized, applied_controls.iter().map(|(_, m)| m).sum()),
    };
    let combined_adjustment = tables.clamp_adjustment(raw_adjustment);
    let risk_adjusted = technical_premium as f64 * (1.0 + combined_adjustment);
    check_premium("risk-adjusted", risk_adjusted)?;
    let risk_adjusted_premium = round_cents(risk_adjusted);

    Ok(RatingResult {
        rate_table_version: tables.version().to_string(),
        technical_premium,
        risk_adjusted_premium,
        hazard_class,
        revenue_band: band.name.clone(),
        base_rate,
        revenue_scalar,
        limit_factor,
        retention_factor,
        applied_controls,
        adjustment_source,
        combined_adjustment,
    })
}

/// Rate many risks against the same snapshot in parallel. Output order
/// matches input order.
pub fn calculate_batch(
    inputs: &[RatingInputs],
    tables: &RateTableSnapshot,
) -> Vec<Result<RatingResult, RatingError>> {
    inputs.par_iter().map(|i| calculate(i, tables)).collect()
}

/// The linear limit curve has no cap, so extreme inputs can push the product
/// past what fits in cents. Those fail rather than saturate.
fn check_premium(stage: &'static str, premium: f64) -> Result<(), RatingError> {
    if premium.is_finite() && premium <= MAX_PREMIUM as f64 {
        Ok(())
    } else {
        Err(RatingError::PremiumOutOfRange { stage, premium })
    }
}

fn validate(inputs: &RatingInputs) -> Result<(), RatingError> {
    let invalid = |field, reason: &str| Err(RatingError::InvalidInput { field, reason: reason.to_string() });
    if inputs.annual_revenue < 0 {
        return invalid("annual_revenue", "must not be negative");
    }
    if inputs.requested_limit <= 0 {
        return invalid("requested_limit", "must be positive");
    }
    if inputs.requested_retention < 0 {
        return invalid("requested_retention", "must not be negative");
    }
    if let Some(raw) = inputs.hazard_class_override
        && HazardClass::new(raw).is_none()
    {
        return invalid("hazard_class_override", "must be between 1 and 5");
    }
    if inputs.control_adjustment_override.is_some_and(|v| !v.is_finite()) {
        return invalid("control_adjustment_override", "must be a finite number");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::config::RateTableConfig;

    const MILLION: i64 = 100_000_000;

    fn scenario_a() -> RatingInputs {
        RatingInputs {
            industry_code: "541512".to_string(),
            annual_revenue: 50 * MILLION,
            requested_limit: 2 * MILLION,
            requested_retention: 2_500_000,
            hazard_class_override: None,
            controls: BTreeSet::from(["MFA".to_string(), "EDR".to_string()]),
            control_adjustment_override: None,
        }
    }

    // ── Scenario A fixture ────────────────────────────────────────────────────

    #[test]
    fn scenario_a_matches_recorded_fixture() {
        let tables = RateTableSnapshot::canonical();
        let result = calculate(&scenario_a(), &tables).unwrap();

        assert_eq!(result.hazard_class, HazardClass(3));
        assert_eq!(result.revenue_band, "mid");
        assert_eq!(result.base_rate, 150_000.0);
        assert_eq!(result.revenue_scalar, 50.0);
        assert!((result.limit_factor - 1.6).abs() < 1e-12);
        assert_eq!(result.retention_factor, 1.0);
        // $120,000.00 technical, $99,000.00 after a 17.5% control credit.
        assert_eq!(result.technical_premium, 12_000_000);
        assert_eq!(result.risk_adjusted_premium, 9_900_000);
        assert_eq!(
            result.applied_controls.iter().map(|(c, _)| c.as_str()).collect::<Vec<_>>(),
            vec!["EDR", "MFA"]
        );
        assert!((result.combined_adjustment + 0.175).abs() < 1e-12);
        assert_eq!(result.adjustment_source, AdjustmentSource::Itemized);
        assert_eq!(result.rate_table_version, "2025.1");
    }

    #[test]
    fn sold_premium_moves_market_adjustment_linearly() {
        let tables = RateTableSnapshot::canonical();
        let result = calculate(&scenario_a(), &tables).unwrap();
        let before = result.technical_premium;

        assert_eq!(result.market_adjustment(9_900_000), 0);
        assert_eq!(result.market_adjustment(10_000_000), 100_000);
        assert_eq!(result.market_adjustment(10_100_000), 200_000);
        assert_eq!(result.market_adjustment(9_800_000), -100_000);
        assert_eq!(result.market_adjustment(0), -9_900_000);
        assert_eq!(result.market_adjustment(u64::MAX), i128::from(u64::MAX) - 9_900_000);
        assert_eq!(result.technical_premium, before, "sold premium must not touch the breakdown");
    }

    #[test]
    fn same_inputs_same_output() {
        let tables = RateTableSnapshot::canonical();
        let a = calculate(&scenario_a(), &tables).unwrap();
        let b = calculate(&scenario_a(), &tables).unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
    }

    // ── Lookups ───────────────────────────────────────────────────────────────

    #[test]
    fn hazard_override_wins_over_industry_map() {
        let tables = RateTableSnapshot::canonical();
        let mut inputs = scenario_a();
        inputs.hazard_class_override = Some(5);
        let result = calculate(&inputs, &tables).unwrap();
        assert_eq!(result.hazard_class, HazardClass(5));
        assert_eq!(result.base_rate, 300_000.0);
    }

    #[test]
    fn override_rescues_unmapped_industry() {
        let tables = RateTableSnapshot::canonical();
        let mut inputs = scenario_a();
        inputs.industry_code = "000000".to_string();
        inputs.hazard_class_override = Some(2);
        assert_eq!(calculate(&inputs, &tables).unwrap().hazard_class, HazardClass(2));
    }

    #[test]
    fn unmapped_industry_without_override_fails() {
        let tables = RateTableSnapshot::canonical();
        let mut inputs = scenario_a();
        inputs.industry_code = "000000".to_string();
        let err = calculate(&inputs, &tables).unwrap_err();
        assert_eq!(err, RatingError::UnmappedIndustry { industry_code: "000000".to_string() });
    }

    #[test]
    fn missing_base_rate_cell_fails_instead_of_defaulting() {
        let mut config = RateTableConfig::canonical();
        config.base_rates.retain(|c| !(c.hazard_class == 3 && c.revenue_band == "mid"));
        let tables = RateTableSnapshot::try_from_config(config).unwrap();
        let err = calculate(&scenario_a(), &tables).unwrap_err();
        assert_eq!(
            err,
            RatingError::MissingRateTableEntry {
                hazard_class: HazardClass(3),
                revenue_band: "mid".to_string()
            }
        );
    }

    // ── Input validation ──────────────────────────────────────────────────────

    #[test]
    fn negative_revenue_is_invalid() {
        let tables = RateTableSnapshot::canonical();
        let mut inputs = scenario_a();
        inputs.annual_revenue = -1;
        assert!(matches!(
            calculate(&inputs, &tables),
            Err(RatingError::InvalidInput { field: "annual_revenue", .. })
        ));
    }

    #[test]
    fn zero_limit_is_invalid() {
        let tables = RateTableSnapshot::canonical();
        let mut inputs = scenario_a();
        inputs.requested_limit = 0;
        assert!(matches!(
            calculate(&inputs, &tables),
            Err(RatingError::InvalidInput { field: "requested_limit", .. })
        ));
    }

    #[test]
    fn negative_retention_is_invalid() {
        let tables = RateTableSnapshot::canonical();
        let mut inputs = scenario_a();
        inputs.requested_retention = -100;
        assert!(matches!(
            calculate(&inputs, &tables),
            Err(RatingError::InvalidInput { field: "requested_retention", .. })
        ));
    }

    #[test]
    fn hazard_override_out_of_range_is_invalid() {
        let tables = RateTableSnapshot::canonical();
        let mut inputs = scenario_a();
        inputs.hazard_class_override = Some(6);
        assert!(matches!(
            calculate(&inputs, &tables),
            Err(RatingError::InvalidInput { field: "hazard_class_override", .. })
        ));
    }

    #[test]
    fn extreme_inputs_fail_instead_of_saturating() {
        let tables = RateTableSnapshot::canonical();
        let mut inputs = scenario_a();
        inputs.annual_revenue = i64::MAX;
        inputs.requested_limit = i64::MAX;
        inputs.requested_retention = 0;
        let err = calculate(&inputs, &tables).unwrap_err();
        assert!(matches!(err, RatingError::PremiumOutOfRange { stage: "technical", .. }), "got {err:?}");
    }

    #[test]
    fn minimum_premium_above_range_is_rejected() {
        let mut config = RateTableConfig::canonical();
        config.minimum_premium = u64::MAX;
        let tables = RateTableSnapshot::try_from_config(config).unwrap();
        assert!(matches!(calculate(&scenario_a(), &tables), Err(RatingError::PremiumOutOfRange { .. })));
    }

    #[test]
    fn zero_revenue_prices_at_minimum_premium() {
        let tables = RateTableSnapshot::canonical();
        let mut inputs = scenario_a();
        inputs.annual_revenue = 0;
        let result = calculate(&inputs, &tables).unwrap();
        assert_eq!(result.revenue_band, "low");
        assert_eq!(result.technical_premium, tables.minimum_premium());
    }

    // ── Controls ──────────────────────────────────────────────────────────────

    #[test]
    fn unknown_controls_are_not_applied() {
        let tables = RateTableSnapshot::canonical();
        let mut inputs = scenario_a();
        inputs.controls.insert("QUANTUM_FIREWALL".to_string());
        let result = calculate(&inputs, &tables).unwrap();
        assert_eq!(result.applied_controls.len(), 2);
        assert_eq!(result.risk_adjusted_premium, 9_900_000);
    }

    #[test]
    fn combined_adjustment_is_clamped() {
        let tables = RateTableSnapshot::canonical();
        let mut inputs = scenario_a();
        inputs.controls = ["MFA", "EDR", "OFFLINE_BACKUPS", "PATCH_MGMT", "IR_PLAN", "SECURITY_TRAINING"]
            .map(String::from)
            .into();
        let result = calculate(&inputs, &tables).unwrap();
        assert_eq!(result.applied_controls.len(), 6);
        assert_eq!(result.combined_adjustment, -0.25);
        assert_eq!(result.risk_adjusted_premium, 9_000_000);
    }

    #[test]
    fn debits_are_clamped_at_ceiling() {
        let tables = RateTableSnapshot::canonical();
        let mut inputs = scenario_a();
        inputs.controls = ["EOL_SOFTWARE", "OPEN_RDP"].map(String::from).into();
        let result = calculate(&inputs, &tables).unwrap();
        assert_eq!(result.combined_adjustment, 0.25);
        assert_eq!(result.risk_adjusted_premium, 15_000_000);
    }

    #[test]
    fn override_replaces_itemized_combination() {
        let tables = RateTableSnapshot::canonical();
        let mut inputs = scenario_a();
        inputs.control_adjustment_override = Some(0.10);
        let result = calculate(&inputs, &tables).unwrap();
        assert_eq!(result.adjustment_source, AdjustmentSource::Override);
        assert!(result.applied_controls.is_empty());
        assert_eq!(result.combined_adjustment, 0.10);
        assert_eq!(result.risk_adjusted_premium, 13_200_000);
        assert_eq!(result.technical_premium, 12_000_000);
    }

    #[test]
    fn override_is_clamped_too() {
        let tables = RateTableSnapshot::canonical();
        let mut inputs = scenario_a();
        inputs.control_adjustment_override = Some(-0.9);
        assert_eq!(calculate(&inputs, &tables).unwrap().combined_adjustment, -0.25);
    }

    #[test]
    fn non_finite_override_is_invalid() {
        let tables = RateTableSnapshot::canonical();
        let mut inputs = scenario_a();
        inputs.control_adjustment_override = Some(f64::NAN);
        assert!(matches!(calculate(&inputs, &tables), Err(RatingError::InvalidInput { .. })));
    }

    // ── Batch ─────────────────────────────────────────────────────────────────

    #[test]
    fn batch_preserves_order_and_matches_single_calls() {
        let tables = RateTableSnapshot::canonical();
        let inputs: Vec<RatingInputs> = (1..=40)
            .map(|i| {
                let mut r = scenario_a();
                r.annual_revenue = i * 5 * MILLION;
                if i % 7 == 0 {
                    r.industry_code = "unmapped".to_string();
                }
                r
            })
            .collect();
        let batch = calculate_batch(&inputs, &tables);
        assert_eq!(batch.len(), inputs.len());
        for (input, out) in inputs.iter().zip(&batch) {
            assert_eq!(out, &calculate(input, &tables));
        }
    }

    #[test]
    fn inputs_deserialize_with_defaults() {
        let json = r#"{"industry_code":"541512","annual_revenue":5000000000,
            "requested_limit":200000000,"requested_retention":2500000}"#;
        let inputs: RatingInputs = serde_json::from_str(json).unwrap();
        assert!(inputs.controls.is_empty());
        assert!(inputs.hazard_class_override.is_none());
    }

    // ── Properties ────────────────────────────────────────────────────────────

    fn arb_inputs() -> impl Strategy<Value = RatingInputs> {
        (
            prop::sample::select(vec!["541512", "541611", "522110", "621111", "236220"]),
            0i64..2_000 * MILLION,
            1i64..50 * MILLION,
            0i64..200 * MILLION,
            prop::collection::btree_set(
                prop::sample::select(vec!["MFA", "EDR", "OPEN_RDP", "IR_PLAN", "UNKNOWN"]),
                0..4,
            ),
        )
            .prop_map(|(industry, revenue, limit, retention, controls)| RatingInputs {
                industry_code: industry.to_string(),
                annual_revenue: revenue,
                requested_limit: limit,
                requested_retention: retention,
                hazard_class_override: None,
                controls: controls.into_iter().map(String::from).collect(),
                control_adjustment_override: None,
            })
    }

    proptest! {
        #[test]
        fn calculation_is_deterministic(inputs in arb_inputs()) {
            let tables = RateTableSnapshot::canonical();
            prop_assert_eq!(calculate(&inputs, &tables), calculate(&inputs, &tables));
        }

        #[test]
        fn larger_limit_never_lowers_limit_factor(
            inputs in arb_inputs(),
            extra in 0i64..100 * MILLION,
        ) {
            let tables = RateTableSnapshot::canonical();
            let mut bigger = inputs.clone();
            bigger.requested_limit += extra;
            let a = calculate(&inputs, &tables).unwrap();
            let b = calculate(&bigger, &tables).unwrap();
            prop_assert!(b.limit_factor >= a.limit_factor);
            prop_assert!(b.technical_premium >= a.technical_premium);
        }

        #[test]
        fn larger_retention_never_raises_retention_factor(
            inputs in arb_inputs(),
            extra in 0i64..500 * MILLION,
        ) {
            let tables = RateTableSnapshot::canonical();
            let mut bigger = inputs.clone();
            bigger.requested_retention += extra;
            let a = calculate(&inputs, &tables).unwrap();
            let b = calculate(&bigger, &tables).unwrap();
            prop_assert!(b.retention_factor <= a.retention_factor);
            prop_assert!(b.technical_premium <= a.technical_premium);
        }

        #[test]
        fn adjustment_stays_within_clamp(inputs in arb_inputs(), over in prop::option::of(-2.0f64..2.0)) {
            let tables = RateTableSnapshot::canonical();
            let mut inputs = inputs;
            inputs.control_adjustment_override = over;
            let result = calculate(&inputs, &tables).unwrap();
            prop_assert!((-0.25..=0.25).contains(&result.combined_adjustment));
        }
    }
}
