#![deny(warnings)]

//! Redevelopment models for housing-capacity projections.
//!
//! This crate provides:
//! - The macroeconomic scenario table for the 2026–2045 horizon
//! - The annual redevelopment hazard (a logit over parcel and economic terms)
//!   and its twenty-year compounding
//! - The unit yield of a parcel built out to its envelope
//! - Probability-weighted expected units, per parcel and in batch

use capacity_core::{
    Parcel, PlanningDistrict, Scenario, ScenarioUnits, ZoneClass, FIRST_YEAR, HORIZON_YEARS,
    LAST_YEAR,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors produced by the redevelopment model.
#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    /// Only the years of the scenario table can be evaluated.
    #[error("year {0} is outside the projection horizon [2026, 2045]")]
    YearOutOfRange(i32),
}

/// Economic state for one simulated year.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MacroEntry {
    pub year: i32,
    /// Real construction cost index.
    pub construction_cost: f64,
    /// Real land-price index under slow growth.
    pub price_low: f64,
    /// Real land-price index under fast growth.
    pub price_high: f64,
}

impl MacroEntry {
    pub fn price(&self, scenario: Scenario) -> f64 {
        match scenario {
            Scenario::Low => self.price_low,
            Scenario::High => self.price_high,
        }
    }
}

const fn entry(year: i32, price_low: f64, price_high: f64) -> MacroEntry {
    MacroEntry {
        year,
        construction_cost: 112.723,
        price_low,
        price_high,
    }
}

/// Scenario table. The trajectories coincide through 2027 and diverge from
/// 2028 on, with the high path strictly above the low path.
pub const MACRO_SCENARIOS: [MacroEntry; HORIZON_YEARS] = [
    entry(2026, 78.091, 78.091),
    entry(2027, 77.203, 77.203),
    entry(2028, 78.537, 86.719),
    entry(2029, 79.895, 96.236),
    entry(2030, 81.275, 105.752),
    entry(2031, 82.680, 115.268),
    entry(2032, 84.108, 124.784),
    entry(2033, 85.562, 128.587),
    entry(2034, 87.041, 132.506),
    entry(2035, 88.545, 136.544),
    entry(2036, 90.075, 140.706),
    entry(2037, 91.631, 144.994),
    entry(2038, 93.215, 149.413),
    entry(2039, 94.826, 153.966),
    entry(2040, 96.464, 158.659),
    entry(2041, 98.131, 163.494),
    entry(2042, 99.827, 168.477),
    entry(2043, 101.552, 173.611),
    entry(2044, 103.307, 178.902),
    entry(2045, 105.092, 184.355),
];

/// Look up the economic state of `year`.
pub fn macro_for_year(year: i32) -> Result<&'static MacroEntry, ModelError> {
    if !(FIRST_YEAR..=LAST_YEAR).contains(&year) {
        return Err(ModelError::YearOutOfRange(year));
    }
    Ok(&MACRO_SCENARIOS[(year - FIRST_YEAR) as usize])
}

/// Coefficients of the annual redevelopment logit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProbWeights {
    pub intercept: f64,
    pub height_ft: f64,
    pub area_1000: f64,
    pub envelope: f64,
    pub bldg_sqft_1000: f64,
    pub residential: f64,
    pub historic: f64,
    pub construction_cost: f64,
    pub land_price: f64,
    pub sdb_eligible: f64,
    /// Indexed in `ZoneClass::ALL` order.
    pub zoning: [f64; ZoneClass::COUNT],
    /// Indexed in `PlanningDistrict::ALL` order.
    pub districts: [f64; PlanningDistrict::COUNT],
}

impl ProbWeights {
    pub fn zone(&self, class: ZoneClass) -> f64 {
        self.zoning[class as usize]
    }

    pub fn district(&self, district: PlanningDistrict) -> f64 {
        self.districts[district as usize]
    }
}

/// Calibrated redevelopment coefficients.
pub const PROB_WEIGHTS: ProbWeights = ProbWeights {
    intercept: -1.6226,
    height_ft: 0.0017,
    area_1000: 0.0049,
    envelope: 0.0002,
    bldg_sqft_1000: -0.0023,
    residential: -0.8231,
    historic: -1.0378,
    construction_cost: -0.0992,
    land_price: 0.0143,
    sdb_eligible: 0.6303,
    zoning: [
        4.2634, // OfficeComm
        4.2450, // DRMulti_RTO
        5.0508, // FBDMulti_RTO
        3.4115, // PDRInd
        1.2491, // Public
        4.5361, // Redev
        0.2674, // RH2
        1.3187, // RH3_RM1
    ],
    districts: [
        -1.4824, // South Bayshore
        -1.7011, // Bernal Heights
        -1.7307, // South Central
        -1.1523, // Central
        -2.5369, // Buena Vista
        -1.4171, // Northeast
        -0.6831, // Western Addition
        -0.0756, // South of Market
        -1.6187, // Inner Sunset
        -2.8019, // Richmond
        -1.8670, // Ingleside
        -2.6147, // Outer Sunset
        -1.2492, // Marina
        -1.0938, // Mission
    ],
};

/// Coefficients of the unit-yield regression.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UnitWeights {
    pub intercept: f64,
    pub envelope: f64,
    pub sdb_envelope: f64,
    pub dr_envelope: f64,
}

/// Calibrated unit-yield coefficients.
pub const UNITS_WEIGHTS: UnitWeights = UnitWeights {
    intercept: 0.0,
    envelope: 0.4252,
    sdb_envelope: 0.4385,
    dr_envelope: -0.1601,
};

/// Logistic transform, stable for large |z|.
pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

// Keeps probabilities inside (0, 1) once f64 saturates.
fn open_unit(p: f64) -> f64 {
    p.clamp(f64::MIN_POSITIVE, 1.0 - f64::EPSILON)
}

/// Year-invariant part of the logit: the weighted parcel attributes.
pub fn parcel_score(p: &Parcel) -> f64 {
    let w = &PROB_WEIGHTS;
    let mut z = w.height_ft * p.height_ft
        + w.area_1000 * p.area_1000
        + w.envelope * p.envelope
        + w.bldg_sqft_1000 * p.bldg_sqft_1000
        + w.residential * p.residential
        + w.historic * p.historic
        + w.sdb_eligible * p.sdb_eligible;
    for class in ZoneClass::ALL {
        z += w.zone(class) * p.zoning.get(class);
    }
    for district in PlanningDistrict::ALL {
        z += w.district(district) * p.districts.get(district);
    }
    z
}

/// Intercept plus the feasibility spread of `entry` under `scenario`.
pub fn economic_score(entry: &MacroEntry, scenario: Scenario) -> f64 {
    let w = &PROB_WEIGHTS;
    w.intercept + w.construction_cost * entry.construction_cost + w.land_price * entry.price(scenario)
}

/// Probability that `p` redevelops in `year` alone.
pub fn annual_probability(p: &Parcel, year: i32, scenario: Scenario) -> Result<f64, ModelError> {
    let entry = macro_for_year(year)?;
    Ok(open_unit(sigmoid(economic_score(entry, scenario) + parcel_score(p))))
}

// ln(1 + e^z), exact for very negative z and overflow-free for large z.
fn softplus(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

// Survival is accumulated in log space: ln(1 - sigmoid(z)) = -softplus(z).
// A product of (1 - p) terms rounds to 1.0 once p drops below ~1e-16.
fn horizon_probability(parcel_z: f64, scenario: Scenario) -> f64 {
    let log_survival: f64 = MACRO_SCENARIOS
        .iter()
        .map(|entry| -softplus(economic_score(entry, scenario) + parcel_z))
        .sum();
    open_unit(-log_survival.exp_m1())
}

/// Probability that `p` redevelops at some point in 2026–2045: the
/// complement of surviving every annual hazard.
pub fn twenty_year_probability(p: &Parcel, scenario: Scenario) -> f64 {
    horizon_probability(parcel_score(p), scenario)
}

/// Dwelling units produced if `p` is built out to its envelope.
pub fn units_if_redeveloped(p: &Parcel) -> f64 {
    if p.envelope <= 0.0 {
        return 0.0;
    }
    let w = &UNITS_WEIGHTS;
    let units = w.intercept
        + w.envelope * p.envelope
        + w.sdb_envelope * p.sdb_envelope
        + w.dr_envelope * p.dr_envelope;
    units.max(0.0)
}

/// Probability-weighted unit contribution of `p` under `scenario`.
pub fn expected_units(p: &Parcel, scenario: Scenario) -> f64 {
    twenty_year_probability(p, scenario) * units_if_redeveloped(p)
}

/// Expected units under both scenarios, sharing the parcel score.
///
/// Each component equals `expected_units(p, scenario)` exactly.
pub fn expected_units_both(p: &Parcel) -> ScenarioUnits {
    let z = parcel_score(p);
    let units = units_if_redeveloped(p);
    ScenarioUnits {
        low: horizon_probability(z, Scenario::Low) * units,
        high: horizon_probability(z, Scenario::High) * units,
    }
}

/// Citywide expected units: the plain sum of per-parcel expected units.
pub fn total_expected_units(parcels: &[Parcel], scenario: Scenario) -> f64 {
    parcels
        .iter()
        .fold(0.0, |acc, p| acc + expected_units(p, scenario))
}

/// Overwrite each parcel's baseline totals with the model's expected units
/// at its current height. Used when a model record arrives without them.
pub fn fill_baseline(parcels: &mut [Parcel]) {
    for p in parcels.iter_mut() {
        p.baseline = expected_units_both(p);
    }
    debug!(parcels = parcels.len(), "filled baseline expected units");
}

#[cfg(test)]
mod tests {
    use super::*;
    use capacity_core::{envelope_for, BlockLot};
    use proptest::prelude::*;

    fn parcel(height: f64, area: f64) -> Parcel {
        Parcel {
            block_lot: BlockLot::from("0001001"),
            height_ft: height,
            area_1000: area,
            envelope: envelope_for(area, height),
            ..Parcel::default()
        }
    }

    fn arb_parcel() -> impl Strategy<Value = Parcel> {
        (
            (0.0f64..400.0, 0.0f64..50.0, 0.0f64..100.0),
            (any::<bool>(), any::<bool>(), any::<bool>()),
            (0usize..=ZoneClass::COUNT, 0usize..=PlanningDistrict::COUNT),
        )
            .prop_map(|((height, area, bldg), (res, hist, dr), (zone, dist))| {
                let mut p = parcel(0.0, area).with_height(height);
                p.bldg_sqft_1000 = bldg;
                p.residential = if res { 1.0 } else { 0.0 };
                p.historic = if hist { 1.0 } else { 0.0 };
                p.dr_envelope = if dr { p.envelope } else { 0.0 };
                if let Some(class) = ZoneClass::ALL.get(zone) {
                    p.zoning.set(*class, 1.0);
                }
                if let Some(d) = PlanningDistrict::ALL.get(dist) {
                    p.districts.set(*d, 1.0);
                }
                p
            })
    }

    #[test]
    fn scenario_table_shape() {
        assert_eq!(MACRO_SCENARIOS.len(), 20);
        for (i, e) in MACRO_SCENARIOS.iter().enumerate() {
            assert_eq!(e.year, FIRST_YEAR + i as i32);
            if e.year <= 2027 {
                assert_eq!(e.price_low, e.price_high);
            } else {
                assert!(e.price_high > e.price_low, "year {}", e.year);
            }
        }
    }

    #[test]
    fn lookup_outside_horizon_fails() {
        assert_eq!(macro_for_year(2025), Err(ModelError::YearOutOfRange(2025)));
        assert_eq!(macro_for_year(2046), Err(ModelError::YearOutOfRange(2046)));
        assert_eq!(macro_for_year(2030).unwrap().price_high, 105.752);
        let p = parcel(65.0, 5.0);
        assert!(annual_probability(&p, 2050, Scenario::Low).is_err());
    }

    #[test]
    fn sigmoid_is_stable() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(-800.0) >= 0.0);
        assert!(sigmoid(800.0) <= 1.0);
        assert!((sigmoid(2.0) + sigmoid(-2.0) - 1.0).abs() < 1e-15);
    }

    #[test]
    fn zero_envelope_yields_nothing() {
        let p = parcel(0.0, 10.0);
        assert_eq!(units_if_redeveloped(&p), 0.0);
        assert_eq!(expected_units(&p, Scenario::High), 0.0);
        let mut neg = parcel(65.0, 5.0);
        neg.envelope = -3.0;
        neg.sdb_envelope = 10.0;
        assert_eq!(units_if_redeveloped(&neg), 0.0);
    }

    #[test]
    fn units_follow_regression() {
        let p = parcel(40.0, 5.0);
        assert!((units_if_redeveloped(&p) - 0.4252 * 20.0).abs() < 1e-12);
    }

    #[test]
    fn saturated_parcels_stay_inside_unit_interval() {
        let mut p = parcel(1.0e6, 1.0e6);
        p.zoning.set(ZoneClass::FbdMultiRto, 1.0);
        let prob = twenty_year_probability(&p, Scenario::High);
        assert!(prob > 0.0 && prob < 1.0);
        let mut q = parcel(0.0, 0.0);
        q.bldg_sqft_1000 = 1.0e7;
        let prob = twenty_year_probability(&q, Scenario::Low);
        assert!(prob > 0.0 && prob < 1.0);
    }

    #[test]
    fn both_scenarios_match_single_evaluations() {
        let mut p = parcel(85.0, 7.5).with_height(85.0);
        p.zoning.set(ZoneClass::DrMultiRto, 1.0);
        let both = expected_units_both(&p);
        assert_eq!(both.low, expected_units(&p, Scenario::Low));
        assert_eq!(both.high, expected_units(&p, Scenario::High));
    }

    #[test]
    fn heavily_built_lots_keep_historic_penalty() {
        let mut plain = parcel(40.0, 5.0);
        plain.bldg_sqft_1000 = 16_000.0;
        let mut historic = plain.clone();
        historic.historic = 1.0;
        let a = twenty_year_probability(&plain, Scenario::Low);
        let b = twenty_year_probability(&historic, Scenario::Low);
        assert!(a > f64::MIN_POSITIVE);
        assert!(b < a, "historic {b:e} vs plain {a:e}");
        // Tiny hazards compound to about twenty times the mean annual one.
        let annual: f64 = (FIRST_YEAR..=LAST_YEAR)
            .map(|y| annual_probability(&plain, y, Scenario::Low).unwrap())
            .sum();
        assert!((a - annual).abs() <= 1e-9 * annual);
    }

    #[test]
    fn moderate_hazards_match_survival_product() {
        let mut p = parcel(85.0, 20.0).with_height(85.0);
        p.zoning.set(ZoneClass::FbdMultiRto, 1.0);
        let survival: f64 = (FIRST_YEAR..=LAST_YEAR)
            .map(|y| 1.0 - annual_probability(&p, y, Scenario::High).unwrap())
            .product();
        let prob = twenty_year_probability(&p, Scenario::High);
        assert!((prob - (1.0 - survival)).abs() < 1e-12);
    }

    #[test]
    fn empty_total_is_zero() {
        assert_eq!(total_expected_units(&[], Scenario::Low), 0.0);
    }

    #[test]
    fn fill_baseline_writes_expected_units() {
        let mut parcels = vec![parcel(65.0, 5.0).with_height(65.0), parcel(40.0, 2.0)];
        fill_baseline(&mut parcels);
        for p in &parcels {
            assert_eq!(p.baseline.low, expected_units(p, Scenario::Low));
            assert_eq!(p.baseline.high, expected_units(p, Scenario::High));
        }
    }

    proptest! {
        #[test]
        fn horizon_probability_in_open_interval(p in arb_parcel()) {
            for s in Scenario::ALL {
                let prob = twenty_year_probability(&p, s);
                prop_assert!(prob > 0.0 && prob < 1.0);
                prop_assert!(expected_units(&p, s) >= 0.0);
            }
        }

        #[test]
        fn early_years_ignore_scenario(p in arb_parcel()) {
            for year in [2026, 2027] {
                prop_assert_eq!(
                    annual_probability(&p, year, Scenario::Low).unwrap(),
                    annual_probability(&p, year, Scenario::High).unwrap()
                );
            }
        }

        #[test]
        fn high_growth_dominates_after_divergence(p in arb_parcel(), year in 2028i32..=2045) {
            let low = annual_probability(&p, year, Scenario::Low).unwrap();
            let high = annual_probability(&p, year, Scenario::High).unwrap();
            prop_assert!(high > low);
            prop_assert!(twenty_year_probability(&p, Scenario::High) >= twenty_year_probability(&p, Scenario::Low));
            prop_assert!(expected_units(&p, Scenario::High) >= expected_units(&p, Scenario::Low));
        }

        #[test]
        fn historic_designation_lowers_probability(p in arb_parcel()) {
            let mut plain = p.clone();
            plain.historic = 0.0;
            let mut historic = p;
            historic.historic = 1.0;
            for s in Scenario::ALL {
                prop_assert!(twenty_year_probability(&historic, s) < twenty_year_probability(&plain, s));
            }
        }

        #[test]
        fn orderings_hold_for_very_unlikely_parcels(
            p in arb_parcel(),
            bldg in 0.0f64..250_000.0,
            dist in 0usize..PlanningDistrict::COUNT
        ) {
            let mut plain = p;
            plain.bldg_sqft_1000 = bldg;
            plain.residential = 1.0;
            plain.districts.set(PlanningDistrict::ALL[dist], 1.0);
            plain.historic = 0.0;
            let mut historic = plain.clone();
            historic.historic = 1.0;
            for s in Scenario::ALL {
                let a = twenty_year_probability(&plain, s);
                let b = twenty_year_probability(&historic, s);
                prop_assert!(b > 0.0 && a < 1.0);
                prop_assert!(b < a, "historic {} vs plain {}", b, a);
            }
            prop_assert!(
                twenty_year_probability(&plain, Scenario::High)
                    > twenty_year_probability(&plain, Scenario::Low)
            );
        }

        #[test]
        fn density_bonus_raises_and_restriction_lowers_units(
            area in 0.1f64..50.0, height in 1.0f64..400.0
        ) {
            let base = parcel(height, area);
            let mut bonus = base.clone();
            bonus.sdb_eligible = 1.0;
            bonus.sdb_envelope = bonus.envelope;
            let mut restricted = base.clone();
            restricted.dr_envelope = restricted.envelope;
            let u = units_if_redeveloped(&base);
            prop_assert!(u > 0.0);
            prop_assert!(units_if_redeveloped(&bonus) > u);
            prop_assert!(units_if_redeveloped(&restricted) < u);
            prop_assert!(units_if_redeveloped(&restricted) > 0.0);
        }

        #[test]
        fn units_increase_with_envelope(area in 0.1f64..50.0, h in 1.0f64..300.0, dh in 1.0f64..100.0) {
            let lo = parcel(h, area);
            let hi = parcel(h + dh, area);
            prop_assert!(units_if_redeveloped(&hi) > units_if_redeveloped(&lo));
        }

        #[test]
        fn batch_total_matches_manual_sum(parcels in prop::collection::vec(arb_parcel(), 1..40)) {
            for s in Scenario::ALL {
                let manual: f64 = parcels.iter().map(|p| expected_units(p, s)).sum();
                let total = total_expected_units(&parcels, s);
                prop_assert!((total - manual).abs() <= 1e-9 * manual.max(1.0));
            }
        }
    }
}
