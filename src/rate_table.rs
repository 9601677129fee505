use std::collections::BTreeMap;

use crate::config::{CurvePoint, RateTableConfig};
use crate::error::ConfigError;
use crate::store::Versioned;
use crate::types::HazardClass;

#[derive(Debug, Clone, PartialEq)]
pub struct RevenueBand {
    pub name: String,
    /// Inclusive upper bound in cents; `None` for the open top band.
    pub upper_bound: Option<i64>,
}

/// What a curve does to the right of its last point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extrapolation {
    Clamp,
    /// Continue along the slope of the final segment.
    Extend,
}

/// Piecewise-linear factor curve. Left of the first point the curve is flat.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorCurve {
    points: Vec<CurvePoint>,
    above: Extrapolation,
}

impl FactorCurve {
    pub fn evaluate(&self, x: f64) -> f64 {
        let first = self.points[0];
        if x <= first.x || x.is_nan() {
            return first.factor;
        }
        for pair in self.points.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if x == hi.x {
                return hi.factor;
            }
            if x < hi.x {
                let t = (x - lo.x) / (hi.x - lo.x);
                let (min, max) = (lo.factor.min(hi.factor), lo.factor.max(hi.factor));
                // Clamp to the segment so rounding never breaks monotonicity.
                return (lo.factor + t * (hi.factor - lo.factor)).clamp(min, max);
            }
        }
        let last = self.points[self.points.len() - 1];
        match self.above {
            Extrapolation::Clamp => last.factor,
            Extrapolation::Extend if self.points.len() >= 2 => {
                let prev = self.points[self.points.len() - 2];
                let slope = (last.factor - prev.factor) / (last.x - prev.x);
                last.factor + slope * (x - last.x)
            }
            Extrapolation::Extend => last.factor,
        }
    }

    fn validate(
        table: &'static str,
        points: &[CurvePoint],
        above: Extrapolation,
        direction: Direction,
    ) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::Invalid { table, reason };
        if points.is_empty() {
            return Err(invalid("curve has no points".to_string()));
        }
        for p in points {
            if !p.x.is_finite() || !p.factor.is_finite() || p.factor <= 0.0 {
                return Err(invalid(format!("point ({}, {}) is not a finite positive factor", p.x, p.factor)));
            }
        }
        for pair in points.windows(2) {
            if pair[1].x <= pair[0].x {
                return Err(invalid(format!("x values must strictly increase at {}", pair[1].x)));
            }
            let ok = match direction {
                Direction::NonDecreasing => pair[1].factor >= pair[0].factor,
                Direction::NonIncreasing => pair[1].factor <= pair[0].factor,
            };
            if !ok {
                return Err(invalid(format!("factor at x={} breaks {direction:?} order", pair[1].x)));
            }
        }
        Ok(FactorCurve { points: points.to_vec(), above })
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    NonDecreasing,
    NonIncreasing,
}

/// A validated, immutable version of every lookup table the calculator reads.
#[derive(Debug, Clone, PartialEq)]
pub struct RateTableSnapshot {
    version: String,
    hazard_map: BTreeMap<String, HazardClass>,
    revenue_bands: Vec<RevenueBand>,
    base_rates: BTreeMap<(HazardClass, String), f64>,
    revenue_unit: i64,
    revenue_exponent: f64,
    base_limit: i64,
    limit_curve: FactorCurve,
    retention_curve: FactorCurve,
    control_modifiers: BTreeMap<String, f64>,
    adjustment_floor: f64,
    adjustment_ceiling: f64,
    minimum_premium: u64,
}

impl Versioned for RateTableSnapshot {
    fn version(&self) -> &str {
        &self.version
    }
}

impl RateTableSnapshot {
    pub fn try_from_config(config: RateTableConfig) -> Result<Self, ConfigError> {
        if config.version.trim().is_empty() {
            return Err(ConfigError::Invalid { table: "rate tables", reason: "empty version id".to_string() });
        }

        let mut hazard_map = BTreeMap::new();
        for (industry, class) in config.hazard_map {
            let hazard = HazardClass::new(class).ok_or_else(|| ConfigError::Invalid {
                table: "hazard map",
                reason: format!("industry {industry:?} maps to hazard class {class} outside 1-5"),
            })?;
            hazard_map.insert(industry, hazard);
        }

        let revenue_bands = validate_bands(&config.revenue_bands)?;

        let mut base_rates = BTreeMap::new();
        for cell in config.base_rates {
            let invalid = |reason: String| ConfigError::Invalid { table: "base rates", reason };
            let hazard = HazardClass::new(cell.hazard_class)
                .ok_or_else(|| invalid(format!("hazard class {} outside 1-5", cell.hazard_class)))?;
            if !revenue_bands.iter().any(|b| b.name == cell.revenue_band) {
                return Err(invalid(format!("unknown revenue band {:?}", cell.revenue_band)));
            }
            if !cell.rate.is_finite() || cell.rate < 0.0 {
                return Err(invalid(format!("rate {} is not a finite non-negative number", cell.rate)));
            }
            if base_rates.insert((hazard, cell.revenue_band.clone()), cell.rate).is_some() {
                return Err(invalid(format!("duplicate cell ({hazard}, {:?})", cell.revenue_band)));
            }
        }

        if config.revenue_unit <= 0 || config.base_limit <= 0 {
            return Err(ConfigError::Invalid {
                table: "rate tables",
                reason: "revenue_unit and base_limit must be positive".to_string(),
            });
        }
        if !config.revenue_exponent.is_finite() || config.revenue_exponent <= 0.0 {
            return Err(ConfigError::Invalid {
                table: "rate tables",
                reason: format!("revenue_exponent {} must be positive", config.revenue_exponent),
            });
        }

        let limit_curve = FactorCurve::validate(
            "limit curve",
            &config.limit_curve,
            Extrapolation::Extend,
            Direction::NonDecreasing,
        )?;
        let retention_curve = FactorCurve::validate(
            "retention curve",
            &config.retention_curve,
            Extrapolation::Clamp,
            Direction::NonIncreasing,
        )?;

        if let Some((code, _)) = config.control_modifiers.iter().find(|(_, m)| !m.is_finite()) {
            return Err(ConfigError::Invalid {
                table: "control modifiers",
                reason: format!("modifier for {code:?} is not finite"),
            });
        }
        let (floor, ceiling) = (config.adjustment_floor, config.adjustment_ceiling);
        if !(floor.is_finite() && ceiling.is_finite()) || floor > ceiling || floor <= -1.0 {
            return Err(ConfigError::Invalid {
                table: "control modifiers",
                reason: format!("adjustment clamp [{floor}, {ceiling}] must satisfy -1 < floor <= ceiling"),
            });
        }

        Ok(RateTableSnapshot {
            version: config.version,
            hazard_map,
            revenue_bands,
            base_rates,
            revenue_unit: config.revenue_unit,
            revenue_exponent: config.revenue_exponent,
            base_limit: config.base_limit,
            limit_curve,
            retention_curve,
            control_modifiers: config.control_modifiers,
            adjustment_floor: floor,
            adjustment_ceiling: ceiling,
            minimum_premium: config.minimum_premium,
        })
    }

    pub fn canonical() -> Self {
        Self::try_from_config(RateTableConfig::canonical()).expect("canonical rate tables are valid")
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn hazard_for(&self, industry_code: &str) -> Option<HazardClass> {
        self.hazard_map.get(industry_code).copied()
    }

    /// Band containing a non-negative revenue figure. The top band is always
    /// open, so every non-negative revenue has a band.
    pub fn revenue_band(&self, annual_revenue: i64) -> &RevenueBand {
        self.revenue_bands
            .iter()
            .find(|b| b.upper_bound.is_none_or(|upper| annual_revenue <= upper))
            .unwrap_or(&self.revenue_bands[self.revenue_bands.len() - 1])
    }

    pub fn base_rate(&self, hazard: HazardClass, band: &str) -> Option<f64> {
        self.base_rates.get(&(hazard, band.to_string())).copied()
    }

    pub fn revenue_scalar(&self, annual_revenue: i64) -> f64 {
        (annual_revenue as f64 / self.revenue_unit as f64).powf(self.revenue_exponent)
    }

    pub fn limit_factor(&self, requested_limit: i64) -> f64 {
        self.limit_curve.evaluate(requested_limit as f64 / self.base_limit as f64)
    }

    pub fn retention_factor(&self, requested_retention: i64) -> f64 {
        self.retention_curve.evaluate(requested_retention as f64)
    }

    pub fn control_modifier(&self, code: &str) -> Option<f64> {
        self.control_modifiers.get(code).copied()
    }

    pub fn clamp_adjustment(&self, adjustment: f64) -> f64 {
        adjustment.clamp(self.adjustment_floor, self.adjustment_ceiling)
    }

    pub fn minimum_premium(&self) -> u64 {
        self.minimum_premium
    }
}

fn validate_bands(bands: &[crate::config::RevenueBandConfig]) -> Result<Vec<RevenueBand>, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid { table: "revenue bands", reason };
    if bands.is_empty() {
        return Err(invalid("no bands configured".to_string()));
    }
    let mut out: Vec<RevenueBand> = Vec::with_capacity(bands.len());
    for (i, band) in bands.iter().enumerate() {
        let is_last = i + 1 == bands.len();
        if out.iter().any(|b| b.name == band.name) {
            return Err(invalid(format!("duplicate band name {:?}", band.name)));
        }
        match (band.upper_bound, is_last) {
            (None, false) => return Err(invalid(format!("band {:?} is unbounded but not last", band.name))),
            (Some(_), true) => return Err(invalid("the last band must be unbounded".to_string())),
            _ => {}
        }
        if let (Some(upper), Some(prev)) = (band.upper_bound, out.last().and_then(|b| b.upper_bound))
            && upper <= prev
        {
            return Err(invalid(format!("band {:?} overlaps the band before it", band.name)));
        }
        if band.upper_bound.is_some_and(|upper| upper < 0) {
            return Err(invalid(format!("band {:?} has a negative bound", band.name)));
        }
        out.push(RevenueBand { name: band.name.clone(), upper_bound: band.upper_bound });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RevenueBandConfig;

    const MILLION: i64 = 100_000_000;

    #[test]
    fn canonical_tables_validate() {
        let tables = RateTableConfig::canonical();
        assert!(RateTableSnapshot::try_from_config(tables).is_ok());
    }

    #[test]
    fn band_upper_bound_is_inclusive() {
        let t = RateTableSnapshot::canonical();
        assert_eq!(t.revenue_band(0).name, "low");
        assert_eq!(t.revenue_band(10 * MILLION).name, "low");
        assert_eq!(t.revenue_band(10 * MILLION + 1).name, "mid");
        assert_eq!(t.revenue_band(50 * MILLION).name, "mid");
        assert_eq!(t.revenue_band(1_000 * MILLION).name, "very_high");
    }

    #[test]
    fn limit_curve_hits_points_and_interpolates() {
        let t = RateTableSnapshot::canonical();
        assert!((t.limit_factor(MILLION) - 1.0).abs() < 1e-12);
        assert!((t.limit_factor(2 * MILLION) - 1.6).abs() < 1e-12);
        assert!((t.limit_factor(MILLION * 3 / 2) - 1.3).abs() < 1e-12);
    }

    #[test]
    fn limit_curve_extends_above_last_point() {
        let t = RateTableSnapshot::canonical();
        let at_ten = t.limit_factor(10 * MILLION);
        let at_twenty = t.limit_factor(20 * MILLION);
        assert!(at_twenty > at_ten, "limit factor must keep rising past the table: {at_twenty}");
    }

    #[test]
    fn limit_curve_is_flat_below_first_point() {
        let t = RateTableSnapshot::canonical();
        assert_eq!(t.limit_factor(1), t.limit_factor(MILLION / 4));
    }

    #[test]
    fn retention_curve_clamps_at_both_ends() {
        let t = RateTableSnapshot::canonical();
        assert!((t.retention_factor(0) - 1.35).abs() < 1e-12);
        assert!((t.retention_factor(2_500_000) - 1.0).abs() < 1e-12);
        assert_eq!(t.retention_factor(100 * MILLION), t.retention_factor(500 * MILLION));
    }

    #[test]
    fn rejects_decreasing_limit_curve() {
        let mut config = RateTableConfig::canonical();
        config.limit_curve[3].factor = 0.5;
        let err = RateTableSnapshot::try_from_config(config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { table: "limit curve", .. }), "got {err:?}");
    }

    #[test]
    fn rejects_increasing_retention_curve() {
        let mut config = RateTableConfig::canonical();
        config.retention_curve[4].factor = 2.0;
        let err = RateTableSnapshot::try_from_config(config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { table: "retention curve", .. }), "got {err:?}");
    }

    #[test]
    fn rejects_overlapping_bands() {
        let mut config = RateTableConfig::canonical();
        config.revenue_bands = vec![
            RevenueBandConfig { name: "a".to_string(), upper_bound: Some(50 * MILLION) },
            RevenueBandConfig { name: "b".to_string(), upper_bound: Some(10 * MILLION) },
            RevenueBandConfig { name: "c".to_string(), upper_bound: None },
        ];
        config.base_rates.clear();
        let err = RateTableSnapshot::try_from_config(config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { table: "revenue bands", .. }), "got {err:?}");
    }

    #[test]
    fn rejects_bounded_top_band() {
        let mut config = RateTableConfig::canonical();
        config.revenue_bands.last_mut().unwrap().upper_bound = Some(i64::MAX);
        assert!(RateTableSnapshot::try_from_config(config).is_err());
    }

    #[test]
    fn rejects_out_of_range_hazard_class() {
        let mut config = RateTableConfig::canonical();
        config.hazard_map.insert("999999".to_string(), 7);
        let err = RateTableSnapshot::try_from_config(config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { table: "hazard map", .. }), "got {err:?}");
    }

    #[test]
    fn rejects_inverted_clamp() {
        let mut config = RateTableConfig::canonical();
        config.adjustment_floor = 0.3;
        assert!(RateTableSnapshot::try_from_config(config).is_err());
    }

    #[test]
    fn rejects_duplicate_base_rate_cell() {
        let mut config = RateTableConfig::canonical();
        let dup = config.base_rates[0].clone();
        config.base_rates.push(dup);
        let err = RateTableSnapshot::try_from_config(config).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { table: "base rates", .. }), "got {err:?}");
    }

    #[test]
    fn missing_cells_are_allowed_at_load() {
        let mut config = RateTableConfig::canonical();
        config.base_rates.retain(|c| !(c.hazard_class == 5 && c.revenue_band == "very_high"));
        let t = RateTableSnapshot::try_from_config(config).unwrap();
        assert!(t.base_rate(HazardClass(5), "very_high").is_none());
        assert!(t.base_rate(HazardClass(5), "high").is_some());
    }
}
