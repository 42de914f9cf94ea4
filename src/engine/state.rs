//! Per-user experiment state machine.

use serde_json::Value;

use crate::model::Event;
use crate::plan::{ExperimentPlan, Matches};

/// Where a user stands in the experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotExposed,
    /// Exposed, waiting for the activation event.
    Exposed,
    /// Metric values are being captured.
    Active,
    /// Saw more than one variation; excluded.
    MultiVariant,
}

/// Accumulated state for one user.
#[derive(Debug)]
pub struct UserState<'a> {
    plan: &'a ExperimentPlan,
    pub phase: Phase,
    pub variation: Option<Value>,
    pub dimension: Option<String>,
    /// Reference instant for windows: exposure, or activation when gated.
    pub start: Option<i64>,
    /// One value list per metric step.
    pub values: Vec<Vec<f64>>,
    backlog: Option<Vec<&'a Event>>,
}

impl<'a> UserState<'a> {
    pub fn new(plan: &'a ExperimentPlan) -> Self {
        Self {
            plan,
            phase: Phase::NotExposed,
            variation: None,
            dimension: None,
            start: None,
            values: vec![Vec::new(); plan.metrics.len()],
            backlog: plan.has_early_start().then(Vec::new),
        }
    }

    /// Feed one event. Events must arrive in time order.
    pub fn observe(&mut self, event: &'a Event) {
        if self.plan.exposure.matches(event) {
            self.on_exposure(event);
            return;
        }

        match self.phase {
            Phase::NotExposed => self.enqueue(event),
            Phase::MultiVariant => {}
            Phase::Exposed => {
                let activates = self
                    .plan
                    .activation
                    .as_ref()
                    .is_some_and(|a| a.predicate.matches(event));
                if activates {
                    self.activate(event.time);
                    self.capture(event);
                } else {
                    self.enqueue(event);
                }
            }
            Phase::Active => self.capture(event),
        }
    }

    fn on_exposure(&mut self, event: &'a Event) {
        let variation = self.variation_of(event);
        match self.phase {
            Phase::NotExposed => {
                self.variation = variation;
                self.dimension = self.plan.dimension.as_ref().and_then(|d| d.eval(event));
                if self.plan.activation.is_some() {
                    self.phase = Phase::Exposed;
                } else {
                    self.activate(event.time);
                }
            }
            Phase::Exposed | Phase::Active if variation != self.variation => {
                self.phase = Phase::MultiVariant;
                self.backlog = None;
            }
            _ => {}
        }
    }

    fn variation_of(&self, event: &Event) -> Option<Value> {
        event.lookup(&self.plan.variation_path).cloned()
    }

    fn enqueue(&mut self, event: &'a Event) {
        if let Some(backlog) = self.backlog.as_mut() {
            backlog.push(event);
        }
    }

    /// Start capturing and replay queued events into early-start metrics.
    fn activate(&mut self, time: i64) {
        self.phase = Phase::Active;
        self.start = Some(time);
        let Some(backlog) = self.backlog.take() else {
            return;
        };
        for event in backlog {
            for (i, metric) in self.plan.metrics.iter().enumerate() {
                if metric.is_early_start()
                    && metric.predicate.matches(event)
                    && metric.in_window(event.time, time)
                {
                    self.values[i].push(metric.value.eval(event).unwrap_or(0.0));
                }
            }
        }
    }

    fn capture(&mut self, event: &Event) {
        let Some(start) = self.start else {
            return;
        };
        for (i, metric) in self.plan.metrics.iter().enumerate() {
            if metric.predicate.matches(event) && metric.in_window(event.time, start) {
                self.values[i].push(metric.value.eval(event).unwrap_or(0.0));
            }
        }
    }

    /// Whether this user contributes to the results.
    pub fn is_included(&self) -> bool {
        self.phase == Phase::Active && !matches!(self.variation, None | Some(Value::Null))
    }

    /// Aggregated value per metric step.
    pub fn aggregate(&self) -> Vec<f64> {
        self.plan
            .metrics
            .iter()
            .zip(&self.values)
            .map(|(metric, values)| metric.aggregate(values))
            .collect()
    }
}
