//! Calibration Driver (C8): turns a Workspace plus one or more parameter
//! models into an optimization problem and evolves a population against it.
//!
//! The third-party numerical optimizer this wraps (Sobol/eFAST/Morris
//! sampling, genetic-algorithm population stepping) is treated as an
//! opaque collaborator per the scope notes; this module owns only the
//! glue — packing/unpacking vectors, driving `Workspace::run`, and
//! reporting progress — and ships a small built-in population optimizer
//! (differential evolution) in place of that external dependency.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::{WorkspaceError, WorkspaceResult};
use crate::params::ParameterModel;
use crate::workspace::Workspace;

pub struct Problem {
    models: Vec<ModelHandle>,
    workspace: Arc<Workspace>,
}

struct ModelHandle {
    save_path: std::path::PathBuf,
    model: Box<dyn ParameterModel + Send + Sync>,
}

pub struct Champion {
    pub vector: Vec<f64>,
    pub fitness: f64,
}

impl Problem {
    pub fn new(workspace: Arc<Workspace>) -> Self {
        Self {
            models: Vec::new(),
            workspace,
        }
    }

    pub fn add_model(&mut self, model: Box<dyn ParameterModel + Send + Sync>, save_path: impl Into<std::path::PathBuf>) {
        self.models.push(ModelHandle {
            save_path: save_path.into(),
            model,
        });
    }

    pub fn bounds(&self) -> Vec<(f64, f64)> {
        self.models.iter().flat_map(|m| m.model.constraints()).collect()
    }

    pub fn current(&self) -> Vec<f64> {
        self.models.iter().flat_map(|m| m.model.current()).collect()
    }

    pub fn var_names(&self) -> Vec<String> {
        self.models.iter().flat_map(|m| m.model.var_names()).collect()
    }

    /// Splits `vector` into each model's slice, edits and saves each model,
    /// then evaluates the workspace objective.
    pub async fn fitness(&mut self, vector: &[f64]) -> WorkspaceResult<f64> {
        let mut offset = 0;
        for handle in &mut self.models {
            let dims = handle.model.var_names().len();
            let slice = &vector[offset..offset + dims];
            handle.model.edit(slice)?;
            handle.model.save(&handle.save_path)?;
            offset += dims;
        }
        let report = self.workspace.run(None, None).await?;
        report.objective.ok_or_else(|| WorkspaceError::InvalidValue {
            key: "objective".into(),
            expected: "Workspace::set_objective to have been called before calibration",
            value: "none".into(),
        })
    }

    pub fn validate(&self) -> WorkspaceResult<()> {
        if self.models.iter().all(|m| m.model.var_names().is_empty()) {
            return Err(WorkspaceError::InvalidValue {
                key: "calibration.models".into(),
                expected: "at least one parameter model with an active dimension",
                value: "none".into(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Fitness for Problem {
    async fn fitness(&mut self, vector: &[f64]) -> WorkspaceResult<f64> {
        Problem::fitness(self, vector).await
    }

    fn bounds(&self) -> Vec<(f64, f64)> {
        Problem::bounds(self)
    }

    fn current(&self) -> Vec<f64> {
        Problem::current(self)
    }
}

/// What the optimizer needs from a scoring target: bounds to sample within,
/// a starting point, and an async evaluation. `Problem` is the only
/// implementation this crate ships, but keeping the optimizer generic over
/// the trait rather than `Problem` directly lets it be driven (and tested)
/// without a live `Workspace`.
#[async_trait::async_trait]
pub trait Fitness {
    async fn fitness(&mut self, vector: &[f64]) -> WorkspaceResult<f64>;
    fn bounds(&self) -> Vec<(f64, f64)>;
    fn current(&self) -> Vec<f64>;
}

/// A single differential-evolution pass: one population, evaluated and
/// advanced by `generations` steps.
pub struct Optimizer {
    pub population_size: usize,
    pub mutation: f64,
    pub crossover: f64,
}

impl Optimizer {
    pub fn new(population_size: usize) -> Self {
        Self {
            population_size: population_size.max(4),
            mutation: 0.8,
            crossover: 0.9,
        }
    }

    pub async fn optimize(
        &self,
        problem: &mut dyn Fitness,
        generations: usize,
        mut progress: impl FnMut(usize, f64, Duration),
    ) -> WorkspaceResult<Champion> {
        let bounds = problem.bounds();
        let baseline = problem.current();
        let dims = bounds.len();
        let mut rng = rand::thread_rng();
        let mut population: Vec<Vec<f64>> = (0..self.population_size)
            .map(|i| {
                if i == 0 {
                    baseline.clone()
                } else {
                    bounds.iter().map(|(lo, hi)| rng.gen_range(*lo..=*hi)).collect()
                }
            })
            .collect();

        let baseline_fitness = problem.fitness(&baseline).await?;
        let mut scores: Vec<f64> = Vec::with_capacity(population.len());
        for candidate in population.clone() {
            scores.push(problem.fitness(&candidate).await?);
        }

        let mut gen_durations: Vec<Duration> = Vec::new();
        for gen in 0..generations {
            let started = Instant::now();
            for i in 0..population.len() {
                let mut idxs: Vec<usize> = (0..population.len()).filter(|&j| j != i).collect();
                if idxs.len() < 3 {
                    continue;
                }
                idxs.shuffle_with(&mut rng);
                let (a, b, c) = (idxs[0], idxs[1], idxs[2]);

                let mut trial = population[i].clone();
                for d in 0..dims {
                    if rng.gen::<f64>() < self.crossover {
                        let donor = population[a][d] + self.mutation * (population[b][d] - population[c][d]);
                        trial[d] = donor.clamp(bounds[d].0, bounds[d].1);
                    }
                }

                let trial_fitness = problem.fitness(&trial).await?;
                if trial_fitness < scores[i] {
                    population[i] = trial;
                    scores[i] = trial_fitness;
                }
            }

            let elapsed = started.elapsed();
            gen_durations.push(elapsed);
            let rolling_mean = gen_durations.iter().sum::<Duration>() / gen_durations.len() as u32;
            let best = scores.iter().cloned().fold(f64::INFINITY, f64::min);
            progress(gen, best, rolling_mean);
        }

        let best_idx = scores
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap_or(0);

        let champion_fitness = scores[best_idx].min(baseline_fitness);
        let champion_vector = if scores[best_idx] <= baseline_fitness {
            population[best_idx].clone()
        } else {
            baseline
        };

        Ok(Champion {
            vector: champion_vector,
            fitness: champion_fitness,
        })
    }
}

trait ShuffleExt {
    fn shuffle_with(&mut self, rng: &mut impl Rng);
}

impl ShuffleExt for Vec<usize> {
    fn shuffle_with(&mut self, rng: &mut impl Rng) {
        use rand::seq::SliceRandom;
        self.shuffle(rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Quadratic {
        value: f64,
    }

    #[async_trait::async_trait]
    impl Fitness for Quadratic {
        async fn fitness(&mut self, vector: &[f64]) -> WorkspaceResult<f64> {
            self.value = vector[0];
            Ok((vector[0] - 2.0).powi(2))
        }

        fn bounds(&self) -> Vec<(f64, f64)> {
            vec![(-10.0, 10.0)]
        }

        fn current(&self) -> Vec<f64> {
            vec![self.value]
        }
    }

    #[tokio::test]
    async fn optimizer_converges_toward_minimum_of_a_quadratic() {
        let mut problem = Quadratic { value: 8.0 };
        let optimizer = Optimizer::new(12);
        let champion = optimizer
            .optimize(&mut problem, 30, |_, _, _| {})
            .await
            .unwrap();
        assert!((champion.vector[0] - 2.0).abs() < 1.0);
    }
}
