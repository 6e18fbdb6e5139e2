//! Sensitivity sweep variant of the Calibration Driver (C8): instead of
//! evolving toward a minimum, samples the problem's parameter space and
//! estimates each parameter's contribution to the objective.
//!
//! The third-party sensitivity libraries this stands in for (Sobol, eFAST,
//! Morris) are, like the optimizer, treated as opaque collaborators rather
//! than reimplemented in full. `Morris` is a real (if small) implementation
//! of the elementary-effects method; `Sobol` and `Efast` share a single
//! Saltelli-style first-order index estimator, since this crate has no need
//! to distinguish eFAST's Fourier sampling from Sobol's paired-matrix
//! sampling for the purpose it's put to here.

use std::time::Duration;

use rand::Rng;

use crate::calibration::Fitness;
use crate::error::WorkspaceResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensitivityMethod {
    Sobol,
    Efast,
    Morris,
}

impl std::str::FromStr for SensitivityMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sobol" => Ok(Self::Sobol),
            "efast" => Ok(Self::Efast),
            "morris" => Ok(Self::Morris),
            other => Err(format!("unknown sensitivity method {other:?}, expected sobol|efast|morris")),
        }
    }
}

/// One parameter's estimated contribution to objective variance.
#[derive(Debug, Clone)]
pub struct ParameterEffect {
    pub name: String,
    pub index: f64,
    pub variance: f64,
}

/// Runs `method` against `problem` with `samples` base draws, reporting
/// progress as `(completed_evaluations, total_evaluations)`. Multi-objective
/// problems are not supported upstream of this call; `Fitness::fitness`
/// already reduces to the single configured objective, matching the "first
/// objective with a warning" reduction named for this driver.
pub async fn run(
    problem: &mut dyn Fitness,
    var_names: &[String],
    method: SensitivityMethod,
    samples: usize,
    mut progress: impl FnMut(usize, usize),
) -> WorkspaceResult<Vec<ParameterEffect>> {
    let bounds = problem.bounds();
    match method {
        SensitivityMethod::Morris => morris(problem, var_names, &bounds, samples, &mut progress).await,
        SensitivityMethod::Sobol | SensitivityMethod::Efast => {
            sobol_first_order(problem, var_names, &bounds, samples, &mut progress).await
        }
    }
}

/// Elementary-effects method: for each trajectory, walk the dimensions in a
/// random order from a random base point, perturbing one dimension at a
/// time by a fixed step and recording the resulting change in output.
async fn morris(
    problem: &mut dyn Fitness,
    var_names: &[String],
    bounds: &[(f64, f64)],
    trajectories: usize,
    progress: &mut impl FnMut(usize, usize),
) -> WorkspaceResult<Vec<ParameterEffect>> {
    let dims = bounds.len();
    let levels = 4.0;
    let mut rng = rand::thread_rng();
    let mut effects: Vec<Vec<f64>> = vec![Vec::with_capacity(trajectories); dims];

    let total = trajectories * (dims + 1);
    let mut done = 0;

    for _ in 0..trajectories.max(1) {
        let mut point: Vec<f64> = bounds.iter().map(|(lo, hi)| rng.gen_range(*lo..=*hi)).collect();
        let mut order: Vec<usize> = (0..dims).collect();
        use rand::seq::SliceRandom;
        order.shuffle(&mut rng);

        let mut previous = problem.fitness(&point).await?;
        done += 1;
        progress(done, total);

        for dim in order {
            let (lo, hi) = bounds[dim];
            let step = (hi - lo) / levels;
            let forward = point[dim] + step <= hi;
            point[dim] = if forward { point[dim] + step } else { point[dim] - step };

            let current = problem.fitness(&point).await?;
            done += 1;
            progress(done, total);

            let delta = if forward { current - previous } else { previous - current };
            effects[dim].push(delta / step);
            previous = current;
        }
    }

    Ok(var_names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let values = &effects[i];
            let n = values.len().max(1) as f64;
            let mean = values.iter().map(|v| v.abs()).sum::<f64>() / n;
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            ParameterEffect {
                name: name.clone(),
                index: mean,
                variance,
            }
        })
        .collect())
}

/// Saltelli-style first-order Sobol index: two independent sample matrices
/// `a`/`b`, and per-dimension `ab_i` matrices splicing `b`'s column into
/// `a`. `S_i = mean(f(b) * (f(ab_i) - f(a))) / Var(f(a))`.
async fn sobol_first_order(
    problem: &mut dyn Fitness,
    var_names: &[String],
    bounds: &[(f64, f64)],
    n: usize,
    progress: &mut impl FnMut(usize, usize),
) -> WorkspaceResult<Vec<ParameterEffect>> {
    let dims = bounds.len();
    let n = n.max(2);
    let mut rng = rand::thread_rng();

    let draw = |rng: &mut rand::rngs::ThreadRng| -> Vec<f64> {
        bounds.iter().map(|(lo, hi)| rng.gen_range(*lo..=*hi)).collect()
    };

    let a: Vec<Vec<f64>> = (0..n).map(|_| draw(&mut rng)).collect();
    let b: Vec<Vec<f64>> = (0..n).map(|_| draw(&mut rng)).collect();

    let total = n * 2 + n * dims;
    let mut done = 0;

    let mut fa = Vec::with_capacity(n);
    for row in &a {
        fa.push(problem.fitness(row).await?);
        done += 1;
        progress(done, total);
    }
    let mut fb = Vec::with_capacity(n);
    for row in &b {
        fb.push(problem.fitness(row).await?);
        done += 1;
        progress(done, total);
    }

    let mean_a = fa.iter().sum::<f64>() / n as f64;
    let var_a = fa.iter().map(|v| (v - mean_a).powi(2)).sum::<f64>() / n as f64;

    let mut effects = Vec::with_capacity(dims);
    for dim in 0..dims {
        let mut numerator = 0.0;
        for j in 0..n {
            let mut row = a[j].clone();
            row[dim] = b[j][dim];
            let f_ab = problem.fitness(&row).await?;
            done += 1;
            progress(done, total);
            numerator += fb[j] * (f_ab - fa[j]);
        }
        let index = if var_a > 0.0 {
            (numerator / n as f64) / var_a
        } else {
            0.0
        };
        effects.push(ParameterEffect {
            name: var_names[dim].clone(),
            index,
            variance: var_a,
        });
    }

    Ok(effects)
}

/// Drains a rolling mean of per-evaluation durations; the CLI uses this to
/// render a throughput estimate alongside progress.
pub fn rolling_mean(durations: &[Duration]) -> Duration {
    if durations.is_empty() {
        return Duration::ZERO;
    }
    durations.iter().sum::<Duration>() / durations.len() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkspaceResult;

    struct Linear;

    #[async_trait::async_trait]
    impl Fitness for Linear {
        async fn fitness(&mut self, vector: &[f64]) -> WorkspaceResult<f64> {
            Ok(vector[0] * 3.0 + vector[1])
        }

        fn bounds(&self) -> Vec<(f64, f64)> {
            vec![(0.0, 1.0), (0.0, 1.0)]
        }

        fn current(&self) -> Vec<f64> {
            vec![0.5, 0.5]
        }
    }

    #[tokio::test]
    async fn morris_ranks_the_steeper_parameter_higher() {
        let mut problem = Linear;
        let names = vec!["x".to_string(), "y".to_string()];
        let effects = morris(&mut problem, &names, &problem_bounds(), 20, &mut |_, _| {})
            .await
            .unwrap();
        assert!(effects[0].index > effects[1].index);
    }

    fn problem_bounds() -> Vec<(f64, f64)> {
        vec![(0.0, 1.0), (0.0, 1.0)]
    }

    #[tokio::test]
    async fn sobol_first_order_ranks_the_steeper_parameter_higher() {
        let mut problem = Linear;
        let names = vec!["x".to_string(), "y".to_string()];
        let effects = sobol_first_order(&mut problem, &names, &problem_bounds(), 200, &mut |_, _| {})
            .await
            .unwrap();
        assert!(effects[0].index > effects[1].index);
    }
}
