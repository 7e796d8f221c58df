use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tsify_next::Tsify;
use wasm_bindgen::prelude::*;

use crate::config::SearchConfig;
use crate::error::AllocationError;
use crate::instance::{Instance, InstanceSpec};
use crate::search::{SearchOutcome, find_aceei_with_eftb};
use crate::types::{Budgets, TieBreak};

// ============================================================================
// Request / report documents
// ============================================================================

/// Everything one allocation run needs, in named form.
#[derive(Debug, Clone, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi, from_wasm_abi)]
pub struct AllocationRequest {
    pub instance: InstanceSpec,
    pub initial_budgets: BTreeMap<String, f64>,
    #[serde(default)]
    pub config: SearchConfig,
}

/// Result of a run keyed by agent and item names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[tsify(into_wasm_abi)]
pub struct AllocationReport {
    pub allocation: BTreeMap<String, Vec<String>>,
    pub prices: BTreeMap<String, f64>,
    pub excess_demand: BTreeMap<String, f64>,
    pub objective: f64,
    pub new_budgets: BTreeMap<String, f64>,
    /// False when the search ran out of budget before clearing the market
    pub exact: bool,
    pub iterations: u32,
    pub evaluations: u32,
}

impl AllocationReport {
    pub fn from_outcome(instance: &Instance, outcome: &SearchOutcome) -> Self {
        let by_item = |values: &[f64]| -> BTreeMap<String, f64> {
            instance
                .items()
                .map(|item| (instance.item(item).name.clone(), values[item.index()]))
                .collect()
        };
        Self {
            allocation: outcome.allocation.to_named(instance),
            prices: by_item(outcome.prices.as_slice()),
            excess_demand: by_item(&outcome.excess_demand),
            objective: outcome.objective,
            new_budgets: instance
                .agents()
                .map(|a| (instance.agent(a).name.clone(), outcome.new_budgets.get(a)))
                .collect(),
            exact: outcome.is_exact(),
            iterations: outcome.iterations,
            evaluations: outcome.evaluations,
        }
    }

    /// Build the instance and budgets, run the search, name the results.
    pub fn from_request(request: &AllocationRequest) -> Result<Self, AllocationError> {
        let instance = Instance::from_spec(&request.instance)?;
        let budgets = Budgets::from_names(&instance, &request.initial_budgets)?;
        let outcome = find_aceei_with_eftb(&instance, &budgets, &request.config)?;
        Ok(Self::from_outcome(&instance, &outcome))
    }
}

fn js_error(err: impl std::fmt::Display) -> JsError {
    JsError::new(&err.to_string())
}

// ============================================================================
// WASM API
// ============================================================================

/// One-shot allocation.
#[wasm_bindgen]
pub fn find_aceei_allocation(request: AllocationRequest) -> Result<AllocationReport, JsError> {
    console_error_panic_hook::set_once();
    AllocationReport::from_request(&request).map_err(js_error)
}

/// A validated instance kept across runs, so callers can retune and rerun.
#[wasm_bindgen]
pub struct AllocationSession {
    instance: Instance,
    budgets: Budgets,
    config: SearchConfig,
    last: Option<AllocationReport>,
}

#[wasm_bindgen]
impl AllocationSession {
    #[wasm_bindgen(constructor)]
    pub fn new(request: AllocationRequest) -> Result<AllocationSession, JsError> {
        // Better panic messages in browser console
        console_error_panic_hook::set_once();

        let instance = Instance::from_spec(&request.instance).map_err(js_error)?;
        let budgets = Budgets::from_names(&instance, &request.initial_budgets).map_err(js_error)?;
        request.config.validate().map_err(js_error)?;
        Ok(Self {
            instance,
            budgets,
            config: request.config,
            last: None,
        })
    }

    #[wasm_bindgen]
    pub fn set_config(&mut self, config: SearchConfig) -> Result<(), JsError> {
        config.validate().map_err(js_error)?;
        self.config = config;
        Ok(())
    }

    #[wasm_bindgen]
    pub fn set_tie_break(&mut self, tie_break: TieBreak) {
        self.config.tie_break = tie_break;
    }

    /// Run the price search with the current config
    #[wasm_bindgen]
    pub fn run(&mut self) -> Result<AllocationReport, JsError> {
        let outcome = find_aceei_with_eftb(&self.instance, &self.budgets, &self.config).map_err(js_error)?;
        let report = AllocationReport::from_outcome(&self.instance, &outcome);
        self.last = Some(report.clone());
        Ok(report)
    }

    /// The most recent report, or `undefined` before the first run
    #[wasm_bindgen]
    pub fn last_report(&self) -> Result<JsValue, JsError> {
        match &self.last {
            Some(report) => serde_wasm_bindgen::to_value(report).map_err(js_error),
            None => Ok(JsValue::UNDEFINED),
        }
    }

    #[wasm_bindgen]
    pub fn instance(&self) -> InstanceSpec {
        self.instance.to_spec()
    }
}
