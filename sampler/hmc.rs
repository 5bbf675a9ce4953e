//! Single-chain Hamiltonian Monte Carlo with an identity mass matrix.
//!
//! Leapfrog integration, Metropolis correction, and dual-averaging step-size adaptation
//! during warmup. The step size is frozen at its averaged value once warmup ends. By default
//! warmup is as long as the retained run, so asking for `n_iters` draws costs `2 * n_iters`
//! iterations.

use super::{LogDensity, SamplerError};
use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

/// Configuration for HMC sampling.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HmcConfig {
    /// Number of draws to keep (after warmup)
    pub n_iters: usize,
    /// Number of warmup iterations to discard; `None` means `n_iters`
    pub n_warmup: Option<usize>,
    /// Initial leapfrog step size
    pub step_size: f64,
    /// Leapfrog steps per iteration
    pub n_leapfrog: usize,
    /// Target acceptance probability for step-size adaptation
    pub target_accept: f64,
    /// Post-warmup step sizes are drawn uniformly from `step_size * (1 ± step_jitter)`
    pub step_jitter: f64,
    /// Standard deviation of the Gaussian prior on the coefficients
    pub prior_scale: f64,
    pub seed: u64,
}

impl Default for HmcConfig {
    fn default() -> Self {
        Self {
            n_iters: 1000,
            n_warmup: None,
            step_size: 0.05,
            n_leapfrog: 20,
            target_accept: 0.8,
            step_jitter: 0.1,
            prior_scale: 10.0,
            seed: 42,
        }
    }
}

impl HmcConfig {
    pub fn warmup(&self) -> usize {
        self.n_warmup.unwrap_or(self.n_iters)
    }

    fn validate(&self) -> Result<(), SamplerError> {
        if self.n_iters == 0 {
            return Err(SamplerError::InvalidConfig(
                "n_iters must be at least 1".to_string(),
            ));
        }
        if !(self.step_size.is_finite() && self.step_size > 0.0) {
            return Err(SamplerError::InvalidConfig(format!(
                "step size must be positive and finite, got {}",
                self.step_size
            )));
        }
        if self.n_leapfrog == 0 {
            return Err(SamplerError::InvalidConfig(
                "n_leapfrog must be at least 1".to_string(),
            ));
        }
        if !(self.target_accept > 0.0 && self.target_accept < 1.0) {
            return Err(SamplerError::InvalidConfig(format!(
                "target acceptance must lie in (0, 1), got {}",
                self.target_accept
            )));
        }
        if !(0.0..1.0).contains(&self.step_jitter) {
            return Err(SamplerError::InvalidConfig(format!(
                "step jitter must lie in [0, 1), got {}",
                self.step_jitter
            )));
        }
        Ok(())
    }
}

/// Result of one HMC run.
#[derive(Clone, Debug)]
pub struct HmcChain {
    /// Retained draws [n_iters, dim]
    pub draws: Array2<f64>,
    /// Fraction of post-warmup proposals accepted
    pub accept_rate: f64,
    /// Step size used after warmup
    pub step_size: f64,
}

/// Dual-averaging state (Hoffman & Gelman, 2014).
struct StepSizeAdapter {
    mu: f64,
    log_eps_bar: f64,
    h_bar: f64,
    target_accept: f64,
}

impl StepSizeAdapter {
    const GAMMA: f64 = 0.05;
    const T0: f64 = 10.0;
    const KAPPA: f64 = 0.75;

    fn new(initial_step: f64, target_accept: f64) -> Self {
        Self {
            mu: (10.0 * initial_step).ln(),
            log_eps_bar: 0.0,
            h_bar: 0.0,
            target_accept,
        }
    }

    /// Returns the step size for the next iteration.
    fn adapt(&mut self, iteration: usize, accept_prob: f64) -> f64 {
        let m = (iteration + 1) as f64;
        let w = 1.0 / (m + Self::T0);
        self.h_bar = (1.0 - w) * self.h_bar + w * (self.target_accept - accept_prob);
        let log_eps = self.mu - (m.sqrt() / Self::GAMMA) * self.h_bar;
        let m_pow = m.powf(-Self::KAPPA);
        self.log_eps_bar = m_pow * log_eps + (1.0 - m_pow) * self.log_eps_bar;
        log_eps.exp()
    }

    fn final_step_size(&self) -> f64 {
        self.log_eps_bar.exp()
    }
}

/// Runs one HMC chain from `init`.
///
/// # Arguments
/// * `target` - Log-density with gradients
/// * `init` - Starting point [dim]
/// * `config` - Sampler settings; the RNG is seeded from `config.seed`
pub fn run_hmc<T: LogDensity>(
    target: &T,
    init: ArrayView1<f64>,
    config: &HmcConfig,
) -> Result<HmcChain, SamplerError> {
    config.validate()?;
    let dim = target.dim();
    if init.len() != dim {
        return Err(SamplerError::DimensionMismatch {
            found: init.len(),
            expected: dim,
        });
    }

    let mut position = init.to_owned();
    let (mut logp, mut grad) = target.log_prob_and_grad(position.view());
    if !logp.is_finite() {
        return Err(SamplerError::NonFiniteLogDensity);
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let n_warmup = config.warmup();
    let total_iters = n_warmup + config.n_iters;

    let mut adapter = StepSizeAdapter::new(config.step_size, config.target_accept);
    let mut step_size = config.step_size;
    let mut draws = Array2::<f64>::zeros((config.n_iters, dim));
    let mut accepted = 0usize;

    log::info!(
        "Starting HMC: {} warmup + {} sampling iterations, dimension {}",
        n_warmup,
        config.n_iters,
        dim
    );

    for iter in 0..total_iters {
        let momentum: Array1<f64> = (0..dim).map(|_| StandardNormal.sample(&mut rng)).collect();
        let epsilon = if iter < n_warmup || config.step_jitter == 0.0 {
            step_size
        } else {
            step_size * rng.gen_range(1.0 - config.step_jitter..=1.0 + config.step_jitter)
        };
        let (proposal, proposal_logp, proposal_grad, final_momentum) = leapfrog(
            target,
            position.view(),
            &grad,
            momentum.clone(),
            epsilon,
            config.n_leapfrog,
        );

        let h_current = -logp + 0.5 * momentum.dot(&momentum);
        let h_proposal = -proposal_logp + 0.5 * final_momentum.dot(&final_momentum);
        let log_accept = h_current - h_proposal;
        let accept_prob = if log_accept.is_finite() {
            log_accept.min(0.0).exp()
        } else {
            0.0
        };

        let u: f64 = rng.r#gen();
        if log_accept.is_finite() && u.ln() < log_accept {
            position = proposal;
            logp = proposal_logp;
            grad = proposal_grad;
            if iter >= n_warmup {
                accepted += 1;
            }
        }

        if iter < n_warmup {
            step_size = adapter.adapt(iter, accept_prob);
            if iter + 1 == n_warmup {
                step_size = adapter.final_step_size();
                log::debug!("Warmup finished; step size fixed at {:.4e}", step_size);
            }
        } else {
            draws.row_mut(iter - n_warmup).assign(&position);
        }
    }

    let accept_rate = accepted as f64 / config.n_iters as f64;
    log::info!(
        "HMC complete: acceptance rate {:.3}, step size {:.4e}",
        accept_rate,
        step_size
    );

    Ok(HmcChain {
        draws,
        accept_rate,
        step_size,
    })
}

/// Integrates Hamilton's equations for `n_steps` leapfrog steps.
///
/// Returns the end position with its log-density, gradient, and momentum.
fn leapfrog<T: LogDensity>(
    target: &T,
    start: ArrayView1<f64>,
    start_grad: &Array1<f64>,
    mut momentum: Array1<f64>,
    step_size: f64,
    n_steps: usize,
) -> (Array1<f64>, f64, Array1<f64>, Array1<f64>) {
    let mut position = start.to_owned();
    let mut grad = start_grad.clone();
    let mut logp = f64::NAN;

    momentum.scaled_add(0.5 * step_size, &grad);
    for step in 0..n_steps {
        position.scaled_add(step_size, &momentum);
        let (next_logp, next_grad) = target.log_prob_and_grad(position.view());
        logp = next_logp;
        grad = next_grad;
        if !logp.is_finite() {
            break;
        }
        if step + 1 < n_steps {
            momentum.scaled_add(step_size, &grad);
        }
    }
    momentum.scaled_add(0.5 * step_size, &grad);

    (position, logp, grad, momentum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::GradLogProb;
    use ndarray::{Axis, array};

    /// Independent standard normal in `dim` dimensions.
    struct StandardNormalTarget {
        dim: usize,
    }

    impl GradLogProb for StandardNormalTarget {
        fn dim(&self) -> usize {
            self.dim
        }

        fn grad_log_prob(&self, point: ArrayView1<f64>) -> Array1<f64> {
            point.mapv(|v| -v)
        }
    }

    impl LogDensity for StandardNormalTarget {
        fn log_prob_and_grad(&self, point: ArrayView1<f64>) -> (f64, Array1<f64>) {
            (-0.5 * point.dot(&point), self.grad_log_prob(point))
        }
    }

    fn short_config() -> HmcConfig {
        HmcConfig {
            n_iters: 300,
            n_leapfrog: 10,
            step_size: 0.2,
            ..HmcConfig::default()
        }
    }

    #[test]
    fn test_draws_have_requested_shape() {
        let target = StandardNormalTarget { dim: 3 };
        let chain = run_hmc(&target, array![0.0, 0.0, 0.0].view(), &short_config()).unwrap();
        assert_eq!(chain.draws.dim(), (300, 3));
        assert!(chain.accept_rate > 0.0 && chain.accept_rate <= 1.0);
        assert!(chain.step_size > 0.0);
    }

    #[test]
    fn test_same_seed_reproduces_chain() {
        let target = StandardNormalTarget { dim: 2 };
        let first = run_hmc(&target, array![0.5, -0.5].view(), &short_config()).unwrap();
        let second = run_hmc(&target, array![0.5, -0.5].view(), &short_config()).unwrap();
        assert_eq!(first.draws, second.draws);

        let other_seed = HmcConfig {
            seed: 7,
            ..short_config()
        };
        let third = run_hmc(&target, array![0.5, -0.5].view(), &other_seed).unwrap();
        assert_ne!(first.draws, third.draws);
    }

    #[test]
    fn test_standard_normal_moments() {
        let target = StandardNormalTarget { dim: 2 };
        let config = HmcConfig {
            n_iters: 2000,
            n_leapfrog: 3,
            step_size: 0.5,
            ..short_config()
        };
        let chain = run_hmc(&target, array![1.0, -1.0].view(), &config).unwrap();

        let mean = chain.draws.mean_axis(Axis(0)).unwrap();
        let var = chain.draws.var_axis(Axis(0), 1.0);
        for k in 0..2 {
            assert!(mean[k].abs() < 0.2, "mean[{k}] = {}", mean[k]);
            assert!(var[k] > 0.6 && var[k] < 1.4, "var[{k}] = {}", var[k]);
        }
    }

    #[test]
    fn test_invalid_configuration_rejected() {
        let target = StandardNormalTarget { dim: 1 };
        let bad_step = HmcConfig {
            step_size: -1.0,
            ..short_config()
        };
        assert!(matches!(
            run_hmc(&target, array![0.0].view(), &bad_step),
            Err(SamplerError::InvalidConfig(_))
        ));

        let bad_accept = HmcConfig {
            target_accept: 1.0,
            ..short_config()
        };
        assert!(matches!(
            run_hmc(&target, array![0.0].view(), &bad_accept),
            Err(SamplerError::InvalidConfig(_))
        ));

        assert!(matches!(
            run_hmc(&target, array![0.0, 1.0].view(), &short_config()),
            Err(SamplerError::DimensionMismatch {
                found: 2,
                expected: 1
            })
        ));
    }

    #[test]
    fn test_warmup_defaults_to_n_iters() {
        let config = HmcConfig {
            n_iters: 123,
            ..HmcConfig::default()
        };
        assert_eq!(config.warmup(), 123);
        let explicit = HmcConfig {
            n_warmup: Some(10),
            ..config
        };
        assert_eq!(explicit.warmup(), 10);
    }
}
