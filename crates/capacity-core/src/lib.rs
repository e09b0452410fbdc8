#![deny(warnings)]

//! Core domain models and invariants for housing-capacity projections.
//!
//! This crate defines the serializable parcel records shared by the model,
//! the rule engine and the recalculation runtime, together with the
//! fail-soft numeric coercion and validation helpers that guard them.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Envelope (thousands of sq ft) a parcel must exceed to qualify for the
/// state density bonus.
pub const SDB_ENVELOPE_THRESHOLD: f64 = 9.0;
/// Height limit in feet above which the density bonus no longer applies.
pub const SDB_HEIGHT_CAP: f64 = 130.0;

/// First simulated year of the projection horizon.
pub const FIRST_YEAR: i32 = 2026;
/// Last simulated year of the projection horizon (inclusive).
pub const LAST_YEAR: i32 = 2045;
/// Number of annual steps compounded into the horizon probability.
pub const HORIZON_YEARS: usize = (LAST_YEAR - FIRST_YEAR + 1) as usize;

/// Assessor block/lot identifier, e.g. "3512008".
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockLot(pub String);

impl BlockLot {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for BlockLot {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BlockLot {
    fn from(s: &str) -> Self {
        BlockLot(s.to_string())
    }
}

impl fmt::Display for BlockLot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Macroeconomic growth trajectory for land prices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    /// Slow land-price growth.
    Low,
    /// Fast land-price growth.
    High,
}

impl Scenario {
    /// Both scenarios, low first.
    pub const ALL: [Scenario; 2] = [Scenario::Low, Scenario::High];

    pub fn as_str(self) -> &'static str {
        match self {
            Scenario::Low => "low",
            Scenario::High => "high",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scenario {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Scenario::Low),
            "high" => Ok(Scenario::High),
            other => Err(ValidationError::UnknownScenario(other.to_string())),
        }
    }
}

/// Zone-type classes used as indicator variables by the redevelopment model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneClass {
    OfficeComm,
    DrMultiRto,
    FbdMultiRto,
    PdrInd,
    Public,
    Redev,
    Rh2,
    Rh3Rm1,
}

const RH2_CODES: &[&str] = &["RH-2"];
const RH3_RM1_CODES: &[&str] = &["RH-3", "RM-1"];
const OFFICE_COMM_CODES: &[&str] = &[
    "C-2", "C-3-G", "C-3-O", "C-3-O(SD)", "C-3-R", "C-3-S", "C-M", "CMUO", "MUO", "WMUO",
];
const DR_MULTI_CODES: &[&str] = &[
    "NC-1", "NC-2", "NC-3", "NC-S", "RC-3", "RC-4", "RM-2", "RM-3", "RM-4", "RSD", "SLR", "SSO",
    "NCD", "NCD-24TH-MISSION", "NCD-24TH-NOE-VALLEY", "NCD-BROADWAY", "NCD-CASTRO",
    "NCD-COLE VALLEY", "NCD-CORTLAND AVENUE", "NCD-EXCELSIOR OUTER MISSION", "NCD-FILLMORE",
    "NCD-GEARY BOULEVARD", "NCD-HAIGHT", "NCD-HAYES", "NCD-INNER BALBOA STREET",
    "NCD-INNER CLEMENT", "NCD-INNER SUNSET", "NCD-INNER TARAVAL STREET", "NCD-IRVING",
    "NCD-JAPANTOWN", "NCD-JUDAH", "NCD-LAKESIDE VILLAGE", "NCD-LOWER HAIGHT STREET",
    "NCD-LOWER POLK STREET", "NCD-MISSION BERNAL", "NCD-NORIEGA", "NCD-NORTH BEACH",
    "NCD-OUTER BALBOA STREET", "NCD-OUTER CLEMENT", "NCD-PACIFIC", "NCD-POLK", "NCD-SACRAMENTO",
    "NCD-SAN BRUNO AVENUE", "NCD-TARAVAL", "NCD-UNION", "NCD-UPPER FILLMORE", "NCD-UPPER MARKET",
    "NCD-VALENCIA", "NCD-WEST PORTAL", "NCD-BAYVIEW",
];
const FBD_MULTI_CODES: &[&str] = &[
    "NCT", "NCT-1", "NCT-2", "NCT-3", "NCT-DIVISADERO", "NCT-FOLSOM", "NCT-GLEN PARK", "NCT-HAYES",
    "NCT-MISSION", "NCT-OCEAN", "NCT-SOMA", "NCT-UPPER MARKET", "RTO", "RTO-1", "RTO-C", "RTO-M",
    "DTR", "MUR", "MUG", "RCD", "RED", "RED-MX", "RH DTR", "SB-DTR", "SPD", "TB DTR", "UMU",
    "WMUG", "PM-MU1", "PM-MU2", "PM-R", "P70-MU", "MR-MU",
];
const PDR_IND_CODES: &[&str] = &[
    "M-1", "M-2", "PDR-1", "PDR-1-B", "PDR-1-D", "PDR-1-G", "PDR-2", "SALI", "SLI",
];
const PUBLIC_CODES: &[&str] = &["P", "PM-CF", "PM-OS", "MB-O", "MB-OS"];
const REDEV_CODES: &[&str] = &["HP-RA", "MB-RA", "MISS BAY N RED", "MISS BAY S RED", "MISS BAY S PLN"];

impl ZoneClass {
    pub const COUNT: usize = 8;
    pub const ALL: [ZoneClass; Self::COUNT] = [
        ZoneClass::OfficeComm,
        ZoneClass::DrMultiRto,
        ZoneClass::FbdMultiRto,
        ZoneClass::PdrInd,
        ZoneClass::Public,
        ZoneClass::Redev,
        ZoneClass::Rh2,
        ZoneClass::Rh3Rm1,
    ];

    /// Column name of the indicator in model record files.
    pub fn column(self) -> &'static str {
        match self {
            ZoneClass::OfficeComm => "zp_OfficeComm",
            ZoneClass::DrMultiRto => "zp_DRMulti_RTO",
            ZoneClass::FbdMultiRto => "zp_FBDMulti_RTO",
            ZoneClass::PdrInd => "zp_PDRInd",
            ZoneClass::Public => "zp_Public",
            ZoneClass::Redev => "zp_Redev",
            ZoneClass::Rh2 => "zp_RH2",
            ZoneClass::Rh3Rm1 => "zp_RH3_RM1",
        }
    }

    fn codes(self) -> &'static [&'static str] {
        match self {
            ZoneClass::OfficeComm => OFFICE_COMM_CODES,
            ZoneClass::DrMultiRto => DR_MULTI_CODES,
            ZoneClass::FbdMultiRto => FBD_MULTI_CODES,
            ZoneClass::PdrInd => PDR_IND_CODES,
            ZoneClass::Public => PUBLIC_CODES,
            ZoneClass::Redev => REDEV_CODES,
            ZoneClass::Rh2 => RH2_CODES,
            ZoneClass::Rh3Rm1 => RH3_RM1_CODES,
        }
    }

    /// Classify a planning code such as "NCT-3" or "RH-2; RH-3".
    ///
    /// Only the first `;`-separated code counts. Codes outside the known
    /// tables (e.g. "RH-1") belong to no class.
    pub fn from_planning_code(code: &str) -> Option<ZoneClass> {
        let first = code.split(';').next().unwrap_or_default().trim();
        if first.is_empty() {
            return None;
        }
        Self::ALL
            .into_iter()
            .find(|class| class.codes().contains(&first))
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Planning districts carried as indicator variables by the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanningDistrict {
    SouthBayshore,
    BernalHeights,
    SouthCentral,
    Central,
    BuenaVista,
    Northeast,
    WesternAddition,
    SouthOfMarket,
    InnerSunset,
    Richmond,
    Ingleside,
    OuterSunset,
    Marina,
    Mission,
}

impl PlanningDistrict {
    pub const COUNT: usize = 14;
    pub const ALL: [PlanningDistrict; Self::COUNT] = [
        PlanningDistrict::SouthBayshore,
        PlanningDistrict::BernalHeights,
        PlanningDistrict::SouthCentral,
        PlanningDistrict::Central,
        PlanningDistrict::BuenaVista,
        PlanningDistrict::Northeast,
        PlanningDistrict::WesternAddition,
        PlanningDistrict::SouthOfMarket,
        PlanningDistrict::InnerSunset,
        PlanningDistrict::Richmond,
        PlanningDistrict::Ingleside,
        PlanningDistrict::OuterSunset,
        PlanningDistrict::Marina,
        PlanningDistrict::Mission,
    ];

    pub fn column(self) -> &'static str {
        match self {
            PlanningDistrict::SouthBayshore => "DIST_SBayshore",
            PlanningDistrict::BernalHeights => "DIST_BernalHts",
            PlanningDistrict::SouthCentral => "DIST_Scentral",
            PlanningDistrict::Central => "DIST_Central",
            PlanningDistrict::BuenaVista => "DIST_BuenaVista",
            PlanningDistrict::Northeast => "DIST_Northeast",
            PlanningDistrict::WesternAddition => "DIST_WestAddition",
            PlanningDistrict::SouthOfMarket => "DIST_SOMA",
            PlanningDistrict::InnerSunset => "DIST_InnerSunset",
            PlanningDistrict::Richmond => "DIST_Richmond",
            PlanningDistrict::Ingleside => "DIST_Ingleside",
            PlanningDistrict::OuterSunset => "DIST_OuterSunset",
            PlanningDistrict::Marina => "DIST_Marina",
            PlanningDistrict::Mission => "DIST_Mission",
        }
    }

    /// Human-readable district name as published by the planning department.
    pub fn name(self) -> &'static str {
        match self {
            PlanningDistrict::SouthBayshore => "South Bayshore",
            PlanningDistrict::BernalHeights => "Bernal Heights",
            PlanningDistrict::SouthCentral => "South Central",
            PlanningDistrict::Central => "Central",
            PlanningDistrict::BuenaVista => "Buena Vista",
            PlanningDistrict::Northeast => "Northeast",
            PlanningDistrict::WesternAddition => "Western Addition",
            PlanningDistrict::SouthOfMarket => "South of Market",
            PlanningDistrict::InnerSunset => "Inner Sunset",
            PlanningDistrict::Richmond => "Richmond",
            PlanningDistrict::Ingleside => "Ingleside",
            PlanningDistrict::OuterSunset => "Outer Sunset",
            PlanningDistrict::Marina => "Marina",
            PlanningDistrict::Mission => "Mission",
        }
    }

    pub fn from_name(name: &str) -> Option<PlanningDistrict> {
        let name = name.trim();
        Self::ALL.into_iter().find(|d| d.name() == name)
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Zone-class indicator values for one parcel (usually 0 or 1).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneFlags([f64; ZoneClass::COUNT]);

impl ZoneFlags {
    pub fn get(&self, class: ZoneClass) -> f64 {
        self.0[class.index()]
    }

    pub fn set(&mut self, class: ZoneClass, value: f64) {
        self.0[class.index()] = value;
    }

    /// Flags with exactly the class of `code` set, if it has one.
    pub fn from_planning_code(code: &str) -> Self {
        let mut flags = ZoneFlags::default();
        if let Some(class) = ZoneClass::from_planning_code(code) {
            flags.set(class, 1.0);
        }
        flags
    }
}

/// Planning-district indicator values for one parcel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DistrictFlags([f64; PlanningDistrict::COUNT]);

impl DistrictFlags {
    pub fn get(&self, district: PlanningDistrict) -> f64 {
        self.0[district.index()]
    }

    pub fn set(&mut self, district: PlanningDistrict, value: f64) {
        self.0[district.index()] = value;
    }

    pub fn from_district_name(name: &str) -> Self {
        let mut flags = DistrictFlags::default();
        if let Some(d) = PlanningDistrict::from_name(name) {
            flags.set(d, 1.0);
        }
        flags
    }
}

/// Probability-weighted unit totals, one per scenario.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioUnits {
    pub low: f64,
    pub high: f64,
}

impl ScenarioUnits {
    pub fn get(&self, scenario: Scenario) -> f64 {
        match scenario {
            Scenario::Low => self.low,
            Scenario::High => self.high,
        }
    }

    pub fn set(&mut self, scenario: Scenario, value: f64) {
        match scenario {
            Scenario::Low => self.low = value,
            Scenario::High => self.high = value,
        }
    }
}

impl std::ops::AddAssign for ScenarioUnits {
    fn add_assign(&mut self, rhs: Self) {
        self.low += rhs.low;
        self.high += rhs.high;
    }
}

/// One tax lot under the baseline zoning scenario, as seen by the model.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Parcel {
    pub block_lot: BlockLot,
    /// Height limit in feet.
    pub height_ft: f64,
    /// Lot area in thousands of square feet.
    pub area_1000: f64,
    /// Buildable envelope, `area_1000 * height_ft / 10`.
    pub envelope: f64,
    /// Existing building area in thousands of square feet.
    pub bldg_sqft_1000: f64,
    pub residential: f64,
    pub historic: f64,
    /// Density-bonus eligibility (0 or 1).
    pub sdb_eligible: f64,
    pub zoning: ZoneFlags,
    pub districts: DistrictFlags,
    /// `sdb_eligible * envelope`.
    pub sdb_envelope: f64,
    /// Envelope-weighted density-restricted zoning.
    pub dr_envelope: f64,
    /// Precomputed expected units under the baseline zoning.
    pub baseline: ScenarioUnits,
}

/// Buildable envelope in the model's units.
pub fn envelope_for(area_1000: f64, height_ft: f64) -> f64 {
    area_1000 * height_ft / 10.0
}

/// Density-bonus eligibility: envelope strictly above the threshold and
/// height at or below the cap.
pub fn sdb_qualification(envelope: f64, height_ft: f64) -> bool {
    envelope > SDB_ENVELOPE_THRESHOLD && height_ft <= SDB_HEIGHT_CAP
}

impl Parcel {
    /// Copy of this parcel rezoned to `height_ft`, with the envelope and
    /// density-bonus fields re-derived. The density-restriction field is
    /// carried over unchanged.
    pub fn with_height(&self, height_ft: f64) -> Parcel {
        let envelope = envelope_for(self.area_1000, height_ft);
        let sdb_eligible = if sdb_qualification(envelope, height_ft) {
            1.0
        } else {
            0.0
        };
        Parcel {
            height_ft,
            envelope,
            sdb_eligible,
            sdb_envelope: sdb_eligible * envelope,
            ..self.clone()
        }
    }

    pub fn is_historic(&self) -> bool {
        self.historic != 0.0
    }
}

/// Descriptive overlay record used only for rule matching.
///
/// Fields are kept as the raw text delivered by the overlay source; numeric
/// interpretation happens at match time so malformed values fail closed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParcelAttributes {
    pub neighborhood: Option<String>,
    /// Pipe-delimited zoning codes, e.g. "RH-1|RH-2".
    pub zoning_code: Option<String>,
    /// Baseline height limit in feet.
    pub height_ft: Option<String>,
    /// Distance to the nearest transit stop in feet.
    pub distance_to_transit: Option<String>,
}

impl ParcelAttributes {
    /// Individual zoning codes; empty when none are recorded.
    pub fn zoning_codes(&self) -> impl Iterator<Item = &str> {
        self.zoning_code
            .as_deref()
            .filter(|s| !s.is_empty())
            .into_iter()
            .flat_map(|s| s.split('|'))
    }

    pub fn baseline_height(&self) -> Option<f64> {
        self.height_ft.as_deref().and_then(parse_number)
    }

    pub fn transit_distance(&self) -> Option<f64> {
        self.distance_to_transit.as_deref().and_then(parse_number)
    }
}

/// Parcel inventory handed over by the data-loading collaborators.
#[derive(Clone, Debug, Default)]
pub struct Inventory {
    pub parcels: Vec<Parcel>,
    pub attributes: HashMap<BlockLot, ParcelAttributes>,
}

impl Inventory {
    pub fn new(parcels: Vec<Parcel>, attributes: HashMap<BlockLot, ParcelAttributes>) -> Self {
        Self {
            parcels,
            attributes,
        }
    }

    pub fn len(&self) -> usize {
        self.parcels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parcels.is_empty()
    }

    pub fn attributes_for(&self, block_lot: &str) -> Option<&ParcelAttributes> {
        self.attributes.get(block_lot)
    }

    /// Position of every parcel keyed by identifier. A repeated identifier
    /// maps to its last record.
    pub fn index_by_block_lot(&self) -> HashMap<BlockLot, usize> {
        self.parcels
            .iter()
            .enumerate()
            .map(|(i, p)| (p.block_lot.clone(), i))
            .collect()
    }
}

/// Strict numeric parse: trims, strips thousands separators, rejects
/// anything that is not a finite number.
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Fail-soft numeric coercion: malformed or missing values become 0.
pub fn coerce_numeric(raw: &str) -> f64 {
    parse_number(raw).unwrap_or(0.0)
}

/// Validation errors for domain invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Numeric field must be finite.
    #[error("non-finite value in field {field} of parcel {block_lot}")]
    NonFinite {
        block_lot: String,
        field: &'static str,
    },
    /// Parcel identifier must be present.
    #[error("parcel without identifier")]
    MissingIdentifier,
    /// Each identifier may appear only once per inventory.
    #[error("duplicate parcel identifier: {0}")]
    DuplicateParcel(String),
    /// Scenario names are "low" or "high".
    #[error("unknown scenario: {0}")]
    UnknownScenario(String),
}

/// Validate a single model record: an identifier and finite numbers.
pub fn validate_parcel(p: &Parcel) -> Result<(), ValidationError> {
    if p.block_lot.0.trim().is_empty() {
        return Err(ValidationError::MissingIdentifier);
    }
    let non_finite = |field: &'static str| ValidationError::NonFinite {
        block_lot: p.block_lot.0.clone(),
        field,
    };
    let scalars = [
        ("height_ft", p.height_ft),
        ("area_1000", p.area_1000),
        ("envelope", p.envelope),
        ("bldg_sqft_1000", p.bldg_sqft_1000),
        ("residential", p.residential),
        ("historic", p.historic),
        ("sdb_eligible", p.sdb_eligible),
        ("sdb_envelope", p.sdb_envelope),
        ("dr_envelope", p.dr_envelope),
        ("baseline.low", p.baseline.low),
        ("baseline.high", p.baseline.high),
    ];
    for (field, value) in scalars {
        if !value.is_finite() {
            return Err(non_finite(field));
        }
    }
    if ZoneClass::ALL.iter().any(|c| !p.zoning.get(*c).is_finite()) {
        return Err(non_finite("zoning"));
    }
    if PlanningDistrict::ALL
        .iter()
        .any(|d| !p.districts.get(*d).is_finite())
    {
        return Err(non_finite("districts"));
    }
    Ok(())
}

/// Validate every parcel and the uniqueness of identifiers.
pub fn validate_inventory(inv: &Inventory) -> Result<(), ValidationError> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(inv.parcels.len());
    for p in &inv.parcels {
        validate_parcel(p)?;
        if !seen.insert(p.block_lot.as_str()) {
            return Err(ValidationError::DuplicateParcel(p.block_lot.0.clone()));
        }
    }
    Ok(())
}
