//! Reference proposers: random and grid search.
//!
//! These are deliberately simple strategies; they exist so a sweep is
//! runnable out of the box and as reference implementations of the
//! [`Proposer`] seam.  A real Bayesian backend plugs in the same way.

use rand::Rng;
use sn_types::{Candidate, CandidateId, Observation, ParamSet, ParamValue, Proposer};
use tracing::debug;

use crate::space::{DimensionKind, SearchSpace};

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveDirection {
    #[default]
    Maximize,
    Minimize,
}

/// The best scoring observation seen so far.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct BestObservation {
    pub candidate_id: CandidateId,
    pub params: ParamSet,
    pub score: f64,
}

/// Shared bookkeeping for the reference proposers: observation counting and
/// direction-aware best tracking.
#[derive(Debug, Clone, Default)]
struct Tally {
    direction: ObjectiveDirection,
    observed: usize,
    failed: usize,
    best: Option<BestObservation>,
}

impl Tally {
    fn record(&mut self, candidate: &Candidate, observation: &Observation) {
        self.observed += 1;
        let Some(score) = observation.primary_score() else {
            self.failed += 1;
            return;
        };
        let improves = match &self.best {
            None => true,
            Some(best) => match self.direction {
                ObjectiveDirection::Maximize => score > best.score,
                ObjectiveDirection::Minimize => score < best.score,
            },
        };
        if improves {
            debug!(candidate = candidate.id, score, "new best observation");
            self.best = Some(BestObservation {
                candidate_id: candidate.id,
                params: candidate.params.clone(),
                score,
            });
        }
    }
}

fn sample(space: &SearchSpace) -> ParamSet {
    let mut rng = rand::rng();
    let mut params = ParamSet::new();

    for dim in &space.dimensions {
        let value = match &dim.kind {
            DimensionKind::Float { low, high } => {
                ParamValue::Float(rng.random_range(*low..=*high))
            }
            DimensionKind::Int { low, high } => ParamValue::Int(rng.random_range(*low..=*high)),
            DimensionKind::LogUniform { low, high } => {
                let log_val: f64 = rng.random_range(low.ln()..=high.ln());
                ParamValue::Float(log_val.exp())
            }
            DimensionKind::Choice { values } => {
                let idx = rng.random_range(0..values.len());
                ParamValue::Json(values[idx].clone())
            }
        };
        params.insert(dim.name.clone(), value);
    }

    params
}

// ---- Random search ----

/// Independent uniform sampling across the search space, stopping after a
/// fixed number of observations (failures count toward the budget, so a
/// misbehaving objective cannot run the sweep forever).
#[derive(Debug, Clone)]
pub struct RandomProposer {
    space: SearchSpace,
    max_observations: usize,
    tally: Tally,
}

impl RandomProposer {
    pub fn new(space: SearchSpace, max_observations: usize) -> Self {
        Self {
            space,
            max_observations,
            tally: Tally::default(),
        }
    }

    pub fn with_direction(mut self, direction: ObjectiveDirection) -> Self {
        self.tally.direction = direction;
        self
    }

    pub fn best(&self) -> Option<&BestObservation> {
        self.tally.best.as_ref()
    }

    pub fn observed(&self) -> usize {
        self.tally.observed
    }
}

impl Proposer for RandomProposer {
    fn propose(&mut self, batch: usize) -> Vec<ParamSet> {
        if self.space.is_empty() {
            return Vec::new();
        }
        (0..batch).map(|_| sample(&self.space)).collect()
    }

    fn observe(&mut self, candidate: &Candidate, observation: &Observation) {
        self.tally.record(candidate, observation);
    }

    fn should_stop(&self) -> bool {
        self.tally.observed >= self.max_observations
    }
}

// ---- Grid search ----

/// Exhaustive cartesian sweep over discrete dimensions; continuous
/// dimensions are discretized into `float_steps` evenly spaced points.
#[derive(Debug, Clone)]
pub struct GridProposer {
    combos: Vec<ParamSet>,
    cursor: usize,
    tally: Tally,
}

impl GridProposer {
    pub fn new(space: SearchSpace, float_steps: usize) -> Self {
        let combos = Self::build_grid(&space, float_steps);
        Self {
            combos,
            cursor: 0,
            tally: Tally::default(),
        }
    }

    pub fn with_direction(mut self, direction: ObjectiveDirection) -> Self {
        self.tally.direction = direction;
        self
    }

    pub fn best(&self) -> Option<&BestObservation> {
        self.tally.best.as_ref()
    }

    pub fn remaining(&self) -> usize {
        self.combos.len() - self.cursor
    }

    /// Discrete values along one dimension.
    fn axis_values(kind: &DimensionKind, float_steps: usize) -> Vec<ParamValue> {
        match kind {
            DimensionKind::Float { low, high } => Self::spaced(*low, *high, float_steps)
                .map(ParamValue::Float)
                .collect(),
            DimensionKind::Int { low, high } => (*low..=*high).map(ParamValue::Int).collect(),
            DimensionKind::LogUniform { low, high } => {
                Self::spaced(low.ln(), high.ln(), float_steps)
                    .map(|v| ParamValue::Float(v.exp()))
                    .collect()
            }
            DimensionKind::Choice { values } => {
                values.iter().cloned().map(ParamValue::Json).collect()
            }
        }
    }

    /// `steps` evenly spaced points over [low, high], endpoints included.
    fn spaced(low: f64, high: f64, steps: usize) -> impl Iterator<Item = f64> {
        let steps = steps.max(2);
        (0..steps).map(move |i| low + (high - low) * i as f64 / (steps - 1) as f64)
    }

    fn build_grid(space: &SearchSpace, float_steps: usize) -> Vec<ParamSet> {
        let axes: Vec<(&str, Vec<ParamValue>)> = space
            .dimensions
            .iter()
            .map(|dim| (dim.name.as_str(), Self::axis_values(&dim.kind, float_steps)))
            .collect();

        // Walk the grid like an odometer, last dimension fastest.  An
        // empty axis makes the whole grid empty.
        let total: usize = axes.iter().map(|(_, values)| values.len()).product();
        let mut odometer = vec![0usize; axes.len()];
        let mut combos = Vec::with_capacity(total);
        for _ in 0..total {
            combos.push(
                axes.iter()
                    .zip(&odometer)
                    .map(|((name, values), &i)| (name.to_string(), values[i].clone()))
                    .collect(),
            );
            for (digit, (_, values)) in odometer.iter_mut().zip(&axes).rev() {
                *digit += 1;
                if *digit < values.len() {
                    break;
                }
                *digit = 0;
            }
        }
        combos
    }
}

impl Proposer for GridProposer {
    fn propose(&mut self, batch: usize) -> Vec<ParamSet> {
        let end = (self.cursor + batch).min(self.combos.len());
        let out = self.combos[self.cursor..end].to_vec();
        self.cursor = end;
        out
    }

    fn observe(&mut self, candidate: &Candidate, observation: &Observation) {
        self.tally.record(candidate, observation);
    }

    fn should_stop(&self) -> bool {
        // Done once every grid point has been proposed and answered.
        self.cursor == self.combos.len() && self.tally.observed >= self.combos.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sn_types::Observation;

    fn sample_space() -> SearchSpace {
        SearchSpace::new()
            .add_int("layers", 1, 4)
            .add_float("dropout", 0.0, 0.5)
    }

    fn candidate(id: CandidateId, params: ParamSet) -> Candidate {
        Candidate::new(id, params)
    }

    #[test]
    fn random_respects_bounds() {
        let mut proposer = RandomProposer::new(sample_space(), 100);
        let space = sample_space();
        for params in proposer.propose(50) {
            assert!(space.contains(&params), "out of bounds: {params:?}");
        }
    }

    #[test]
    fn random_stops_after_budget() {
        let mut proposer = RandomProposer::new(sample_space(), 3);
        assert!(!proposer.should_stop());

        for id in 0..3 {
            let params = proposer.propose(1).remove(0);
            let c = candidate(id, params);
            proposer.observe(&c, &Observation::scalar(id, id as f64));
        }
        assert!(proposer.should_stop());
        assert_eq!(proposer.observed(), 3);
    }

    #[test]
    fn failures_count_toward_budget_but_not_best() {
        let mut proposer = RandomProposer::new(sample_space(), 2);
        let params = proposer.propose(1).remove(0);
        let c = candidate(0, params);

        proposer.observe(&c, &Observation::failed(0, "oom"));
        assert!(proposer.best().is_none());

        let params = proposer.propose(1).remove(0);
        let c = candidate(1, params);
        proposer.observe(&c, &Observation::scalar(1, 0.5));

        assert!(proposer.should_stop());
        assert_eq!(proposer.best().unwrap().score, 0.5);
    }

    #[test]
    fn best_tracking_minimize() {
        let mut proposer =
            RandomProposer::new(sample_space(), 10).with_direction(ObjectiveDirection::Minimize);

        for (id, score) in [(0, 0.9), (1, 0.2), (2, 0.5)] {
            let params = proposer.propose(1).remove(0);
            let c = candidate(id, params);
            proposer.observe(&c, &Observation::scalar(id, score));
        }
        let best = proposer.best().unwrap();
        assert_eq!(best.candidate_id, 1);
        assert_eq!(best.score, 0.2);
    }

    #[test]
    fn grid_covers_every_combination_once() {
        let space = SearchSpace::new().add_int("a", 1, 3).add_int("b", 0, 1);
        let mut proposer = GridProposer::new(space, 2);
        assert_eq!(proposer.remaining(), 6);

        let first = proposer.propose(4);
        assert_eq!(first.len(), 4);
        let second = proposer.propose(10);
        assert_eq!(second.len(), 2);
        assert!(proposer.propose(1).is_empty());
    }

    #[test]
    fn grid_stops_only_after_all_observed() {
        let space = SearchSpace::new().add_int("x", 1, 2);
        let mut proposer = GridProposer::new(space, 2);

        let params = proposer.propose(2);
        assert_eq!(params.len(), 2);
        assert!(!proposer.should_stop(), "still awaiting observations");

        for (id, p) in params.into_iter().enumerate() {
            let c = candidate(id as CandidateId, p);
            proposer.observe(&c, &Observation::scalar(id as CandidateId, 1.0));
        }
        assert!(proposer.should_stop());
    }

    #[test]
    fn grid_with_an_empty_choice_axis_is_empty() {
        let space = SearchSpace::new().add_int("a", 1, 2).add_choice("opt", vec![]);
        let mut proposer = GridProposer::new(space, 2);
        assert_eq!(proposer.remaining(), 0);
        assert!(proposer.propose(4).is_empty());
        assert!(proposer.should_stop());
    }

    #[test]
    fn grid_discretizes_continuous_dimensions() {
        let space = SearchSpace::new().add_float("p", 0.0, 1.0);
        let mut proposer = GridProposer::new(space, 5);
        let combos = proposer.propose(100);
        assert_eq!(combos.len(), 5);
        assert_eq!(combos[0]["p"], ParamValue::Float(0.0));
        assert_eq!(combos[4]["p"], ParamValue::Float(1.0));
    }
}
