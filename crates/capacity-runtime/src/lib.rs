#![deny(warnings)]

//! Recalculation runtime: applies the session's rule set to the full parcel
//! inventory and aggregates citywide expected units.
//!
//! Parcels whose effective height does not exceed their baseline reuse the
//! precomputed baseline totals. Overridden parcels go through the model,
//! memoized per (parcel, height, scenario) for the lifetime of the loaded
//! inventory.

use capacity_core::{
    validate_inventory, BlockLot, Inventory, Parcel, ParcelAttributes, Scenario, ScenarioUnits,
    ValidationError,
};
use capacity_model::{expected_units_both, twenty_year_probability, units_if_redeveloped};
use capacity_rules::{effective_height, Rule, RuleError, RuleId, RuleSet, RuleSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// Citywide totals rounded to whole dwelling units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTotals {
    pub low: u64,
    pub high: u64,
}

impl PlanTotals {
    pub fn from_units(units: ScenarioUnits) -> Self {
        Self {
            low: round_units(units.low),
            high: round_units(units.high),
        }
    }

    pub fn get(&self, scenario: Scenario) -> u64 {
        match scenario {
            Scenario::Low => self.low,
            Scenario::High => self.high,
        }
    }
}

fn round_units(x: f64) -> u64 {
    x.max(0.0).round() as u64
}

// -0.0 and 0.0 share a slot.
fn height_key(height: f64) -> u64 {
    if height == 0.0 {
        0
    } else {
        height.to_bits()
    }
}

/// Counters describing memo cache effectiveness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Append-only memo of expected units keyed by (parcel, height, scenario).
#[derive(Clone, Debug, Default)]
pub struct UnitsCache {
    entries: HashMap<BlockLot, HashMap<(u64, Scenario), f64>>,
    hits: u64,
    misses: u64,
    len: usize,
}

impl UnitsCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup(&mut self, block_lot: &str, key: (u64, Scenario)) -> Option<f64> {
        let found = self
            .entries
            .get(block_lot)
            .and_then(|m| m.get(&key))
            .copied();
        match found {
            Some(_) => self.hits += 1,
            None => self.misses += 1,
        }
        found
    }

    fn store(&mut self, block_lot: &BlockLot, key: (u64, Scenario), value: f64) {
        let slot = self.entries.entry(block_lot.clone()).or_default();
        if slot.insert(key, value).is_none() {
            self.len += 1;
        }
    }

    /// Expected units of `parcel` rezoned to `height` under both scenarios.
    pub fn expected_units(&mut self, parcel: &Parcel, height: f64) -> ScenarioUnits {
        let h = height_key(height);
        let id = parcel.block_lot.as_str();
        let low = self.lookup(id, (h, Scenario::Low));
        let high = self.lookup(id, (h, Scenario::High));
        if let (Some(low), Some(high)) = (low, high) {
            return ScenarioUnits { low, high };
        }
        let units = expected_units_both(&parcel.with_height(height));
        for scenario in Scenario::ALL {
            self.store(&parcel.block_lot, (h, scenario), units.get(scenario));
        }
        units
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.len,
        }
    }
}

/// Parcel-level view for inspectors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParcelDetail {
    pub block_lot: BlockLot,
    pub baseline_height: f64,
    /// Highest height proposed by matching rules, if any.
    pub proposed_height: Option<f64>,
    /// Height the projection uses for this parcel.
    pub effective_height: f64,
    /// Whether the rule override replaced the baseline totals.
    pub overridden: bool,
    pub envelope: f64,
    pub sdb_eligible: bool,
    pub units_if_redeveloped: f64,
    pub probability_low: f64,
    pub probability_high: f64,
    pub expected_units: ScenarioUnits,
}

/// A planning session: one loaded inventory, its rule set and memo cache.
#[derive(Clone, Debug)]
pub struct Planner {
    inventory: Inventory,
    index: HashMap<BlockLot, usize>,
    rules: RuleSet,
    cache: UnitsCache,
    baseline: ScenarioUnits,
    current: Option<ScenarioUnits>,
}

fn baseline_units(inventory: &Inventory) -> ScenarioUnits {
    let mut total = ScenarioUnits::default();
    for p in &inventory.parcels {
        total += p.baseline;
    }
    total
}

impl Planner {
    pub fn new(inventory: Inventory) -> Result<Self, ValidationError> {
        Self::with_rules(inventory, RuleSet::new())
    }

    pub fn with_rules(inventory: Inventory, rules: RuleSet) -> Result<Self, ValidationError> {
        validate_inventory(&inventory)?;
        let baseline = baseline_units(&inventory);
        info!(
            parcels = inventory.len(),
            attributes = inventory.attributes.len(),
            rules = rules.len(),
            "planner ready"
        );
        Ok(Self {
            index: inventory.index_by_block_lot(),
            inventory,
            rules,
            cache: UnitsCache::new(),
            baseline,
            current: None,
        })
    }

    /// Swap in a new inventory. The memo cache and current totals are
    /// dropped; the rule set is kept.
    pub fn reload(&mut self, inventory: Inventory) -> Result<(), ValidationError> {
        validate_inventory(&inventory)?;
        self.baseline = baseline_units(&inventory);
        self.index = inventory.index_by_block_lot();
        self.inventory = inventory;
        self.cache.clear();
        self.current = None;
        info!(parcels = self.inventory.len(), "inventory reloaded");
        Ok(())
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn add_rule(&mut self, spec: RuleSpec) -> Result<RuleId, RuleError> {
        let id = self.rules.add(spec)?;
        self.recalculate();
        Ok(id)
    }

    pub fn update_rule(&mut self, id: RuleId, spec: RuleSpec) -> Result<(), RuleError> {
        self.rules.update(id, spec)?;
        self.recalculate();
        Ok(())
    }

    pub fn remove_rule(&mut self, id: RuleId) -> Result<Rule, RuleError> {
        let rule = self.rules.remove(id)?;
        self.recalculate();
        Ok(rule)
    }

    /// Full pass over the inventory under the current rule set.
    pub fn recalculate(&mut self) -> PlanTotals {
        let no_attrs = ParcelAttributes::default();
        let rules = self.rules.rules();
        let mut total = ScenarioUnits::default();
        let mut overridden = 0usize;
        for parcel in &self.inventory.parcels {
            let attrs = self
                .inventory
                .attributes_for(parcel.block_lot.as_str())
                .unwrap_or(&no_attrs);
            match effective_height(rules, attrs) {
                Some(h) if h > parcel.height_ft => {
                    total += self.cache.expected_units(parcel, h);
                    overridden += 1;
                }
                _ => total += parcel.baseline,
            }
        }
        let totals = PlanTotals::from_units(total);
        let stats = self.cache.stats();
        debug!(
            hits = stats.hits,
            misses = stats.misses,
            entries = stats.entries,
            "units cache"
        );
        info!(
            parcels = self.inventory.len(),
            overridden,
            low = totals.low,
            high = totals.high,
            "recalculated plan totals"
        );
        self.current = Some(total);
        totals
    }

    /// Rounded totals of the last pass; `None` before the first one.
    pub fn plan_totals(&self) -> Option<PlanTotals> {
        self.current.map(PlanTotals::from_units)
    }

    /// Unrounded totals of the last pass.
    pub fn plan_units(&self) -> Option<ScenarioUnits> {
        self.current
    }

    /// Rounded sum of the precomputed baseline totals.
    pub fn baseline_totals(&self) -> PlanTotals {
        PlanTotals::from_units(self.baseline)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Derived fields of one parcel under the current rule set.
    pub fn inspect(&self, block_lot: &str) -> Option<ParcelDetail> {
        let parcel = &self.inventory.parcels[*self.index.get(block_lot)?];
        let no_attrs = ParcelAttributes::default();
        let attrs = self
            .inventory
            .attributes_for(block_lot)
            .unwrap_or(&no_attrs);
        let proposed = self.rules.effective_height(attrs);
        let override_height = proposed.filter(|h| *h > parcel.height_ft);
        let (modeled, expected) = match override_height {
            Some(h) => {
                let modified = parcel.with_height(h);
                let expected = expected_units_both(&modified);
                (modified, expected)
            }
            None => (parcel.clone(), parcel.baseline),
        };
        Some(ParcelDetail {
            block_lot: parcel.block_lot.clone(),
            baseline_height: parcel.height_ft,
            proposed_height: proposed,
            effective_height: modeled.height_ft,
            overridden: override_height.is_some(),
            envelope: modeled.envelope,
            sdb_eligible: modeled.sdb_eligible != 0.0,
            units_if_redeveloped: units_if_redeveloped(&modeled),
            probability_low: twenty_year_probability(&modeled, Scenario::Low),
            probability_high: twenty_year_probability(&modeled, Scenario::High),
            expected_units: expected,
        })
    }
}
