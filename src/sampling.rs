//! Injectable sampling functions and the distributions behind them.
//!
//! Domain processes only ever see a [`Sampler`]: an opaque zero-argument
//! function returning a duration. Where the numbers come from is decided by
//! whoever builds the simulation. [`Distribution`] is the config-facing
//! description used by [`crate::simulation`] to build samplers from a
//! seeded generator it owns.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand_distr::{Distribution as _, Exp, Normal, Uniform};
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, ConfigResult};
use crate::types::SimTime;

/// A shared handle to a zero-argument sampling function.
#[derive(Clone)]
pub struct Sampler {
    draw: Rc<dyn Fn() -> SimTime>,
}

impl Sampler {
    /// Wraps an arbitrary sampling function.
    pub fn new(draw: impl Fn() -> SimTime + 'static) -> Self {
        Self {
            draw: Rc::new(draw),
        }
    }

    /// Always returns `value`.
    pub fn constant(value: SimTime) -> Self {
        Self::new(move || value)
    }

    /// Returns `values` in order, starting over after the last one.
    ///
    /// An empty sequence samples as zero.
    pub fn sequence(values: Vec<SimTime>) -> Self {
        let next = Cell::new(0usize);
        Self::new(move || {
            if values.is_empty() {
                return 0.0;
            }
            let index = next.get();
            next.set((index + 1) % values.len());
            values[index]
        })
    }

    /// Returns `values` in order, then repeats the last one forever.
    pub fn script(values: Vec<SimTime>) -> Self {
        let next = Cell::new(0usize);
        Self::new(move || {
            let index = next.get();
            if index + 1 < values.len() {
                next.set(index + 1);
            }
            values.get(index).copied().unwrap_or(0.0)
        })
    }

    /// Draws one value.
    pub fn sample(&self) -> SimTime {
        (self.draw)()
    }
}

impl fmt::Debug for Sampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sampler").finish_non_exhaustive()
    }
}

/// A duration distribution as written in a config file.
///
/// ```yaml
/// inter_packet_time:
///   type: exponential
///   mean: 2.0
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Distribution {
    /// Always `value`
    Fixed { value: SimTime },
    /// Uniform on `[min, max)`
    Uniform { min: SimTime, max: SimTime },
    /// Exponential with the given mean
    Exponential { mean: SimTime },
    /// Gaussian, clamped at zero
    Normal { mean: SimTime, std_dev: SimTime },
}

/// Standard deviations below zero past which a clamped `Normal` is treated
/// as always zero.
const ZERO_CLAMP_SIGMAS: f64 = 6.0;

impl Distribution {
    /// Checks that the parameters describe a non-negative duration.
    pub fn validate(&self, field: &str) -> ConfigResult<()> {
        let invalid = |reason: &str| -> ConfigResult<()> {
            Err(ConfigError::Validation(format!(
                "{}: {} ({:?})",
                field, reason, self
            )))
        };

        match *self {
            Distribution::Fixed { value } if !(value >= 0.0 && value.is_finite()) => {
                invalid("fixed value must be finite and non-negative")
            }
            Distribution::Uniform { min, max }
                if !(min >= 0.0 && max > min && max.is_finite()) =>
            {
                invalid("uniform bounds must be finite and satisfy 0 <= min < max")
            }
            Distribution::Exponential { mean } if !(mean > 0.0 && mean.is_finite()) => {
                invalid("exponential mean must be positive")
            }
            Distribution::Normal { mean, std_dev }
                if !(mean.is_finite() && std_dev >= 0.0 && std_dev.is_finite()) =>
            {
                invalid("normal needs a finite mean and non-negative std_dev")
            }
            _ => Ok(()),
        }
    }

    /// Returns true for a distribution that yields zero on every draw.
    ///
    /// A `Normal` counts when its mean sits at least six standard
    /// deviations below zero, since the clamp then maps practically every
    /// draw to zero.
    pub fn is_zero(&self) -> bool {
        match *self {
            Distribution::Fixed { value } => value == 0.0,
            Distribution::Uniform { max, .. } => max <= 0.0,
            Distribution::Exponential { .. } => false,
            Distribution::Normal { mean, std_dev } => mean + ZERO_CLAMP_SIGMAS * std_dev <= 0.0,
        }
    }

    /// The mean of the distribution, ignoring the clamp of `Normal`.
    pub fn mean(&self) -> SimTime {
        match *self {
            Distribution::Fixed { value } => value,
            Distribution::Uniform { min, max } => (min + max) / 2.0,
            Distribution::Exponential { mean } => mean,
            Distribution::Normal { mean, .. } => mean,
        }
    }

    /// Builds a sampler that draws from `rng`.
    ///
    /// Samplers built from the same generator interleave their draws in
    /// call order, which keeps a run reproducible for a fixed seed.
    pub fn sampler(&self, rng: Rc<RefCell<StdRng>>) -> ConfigResult<Sampler> {
        let bad = |e: &dyn fmt::Display| ConfigError::Validation(format!("{:?}: {}", self, e));

        Ok(match *self {
            Distribution::Fixed { value } => Sampler::constant(value),
            Distribution::Uniform { min, max } => {
                if !(max > min && min.is_finite() && max.is_finite()) {
                    return Err(bad(&"uniform range must be finite and non-empty"));
                }
                let uniform = Uniform::new(min, max);
                Sampler::new(move || uniform.sample(&mut *rng.borrow_mut()))
            }
            Distribution::Exponential { mean } => {
                let exp = Exp::new(1.0 / mean).map_err(|e| bad(&e))?;
                Sampler::new(move || exp.sample(&mut *rng.borrow_mut()))
            }
            Distribution::Normal { mean, std_dev } => {
                let normal = Normal::new(mean, std_dev).map_err(|e| bad(&e))?;
                Sampler::new(move || normal.sample(&mut *rng.borrow_mut()).max(0.0))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng(seed: u64) -> Rc<RefCell<StdRng>> {
        Rc::new(RefCell::new(StdRng::seed_from_u64(seed)))
    }

    #[test]
    fn test_constant_and_sequence() {
        assert_eq!(Sampler::constant(2.5).sample(), 2.5);

        let seq = Sampler::sequence(vec![1.0, 2.0]);
        let drawn: Vec<SimTime> = (0..5).map(|_| seq.sample()).collect();
        assert_eq!(drawn, vec![1.0, 2.0, 1.0, 2.0, 1.0]);

        assert_eq!(Sampler::sequence(Vec::new()).sample(), 0.0);
    }

    #[test]
    fn test_script_repeats_last() {
        let script = Sampler::script(vec![1.0, 15.0, 3.0]);
        let drawn: Vec<SimTime> = (0..5).map(|_| script.sample()).collect();
        assert_eq!(drawn, vec![1.0, 15.0, 3.0, 3.0, 3.0]);
    }

    #[test]
    fn test_clones_share_state() {
        let a = Sampler::sequence(vec![1.0, 2.0, 3.0]);
        let b = a.clone();
        assert_eq!(a.sample(), 1.0);
        assert_eq!(b.sample(), 2.0);
    }

    #[test]
    fn test_seeded_samplers_reproducible() {
        let dist = Distribution::Exponential { mean: 3.0 };
        let a = dist.sampler(rng(7)).unwrap();
        let b = dist.sampler(rng(7)).unwrap();

        for _ in 0..20 {
            let x = a.sample();
            assert!(x >= 0.0);
            assert_eq!(x, b.sample());
        }
    }

    #[test]
    fn test_uniform_within_bounds() {
        let sampler = Distribution::Uniform { min: 1.0, max: 2.0 }
            .sampler(rng(1))
            .unwrap();
        for _ in 0..100 {
            let x = sampler.sample();
            assert!((1.0..2.0).contains(&x));
        }
    }

    #[test]
    fn test_normal_is_clamped() {
        let sampler = Distribution::Normal { mean: -5.0, std_dev: 0.1 }
            .sampler(rng(3))
            .unwrap();
        for _ in 0..20 {
            assert_eq!(sampler.sample(), 0.0);
        }
    }

    #[test]
    fn test_validation() {
        assert!(Distribution::Fixed { value: 0.0 }.validate("x").is_ok());
        assert!(Distribution::Fixed { value: -1.0 }.validate("x").is_err());
        assert!(Distribution::Uniform { min: 2.0, max: 2.0 }.validate("x").is_err());
        assert!(Distribution::Exponential { mean: 0.0 }.validate("x").is_err());
        assert!(Distribution::Normal { mean: 1.0, std_dev: -1.0 }.validate("x").is_err());
        assert!(Distribution::Fixed { value: 0.0 }.is_zero());
        assert!(!Distribution::Exponential { mean: 1.0 }.is_zero());
    }

    #[test]
    fn test_infinite_bounds_rejected() {
        let wide = Distribution::Uniform { min: 0.0, max: f64::INFINITY };
        assert!(wide.validate("x").is_err());
        assert!(wide.sampler(rng(1)).is_err());

        let reversed = Distribution::Uniform { min: f64::INFINITY, max: f64::INFINITY };
        assert!(reversed.validate("x").is_err());
        assert!(reversed.sampler(rng(1)).is_err());

        assert!(Distribution::Fixed { value: f64::INFINITY }.validate("x").is_err());
        assert!(Distribution::Fixed { value: f64::NAN }.validate("x").is_err());
    }

    #[test]
    fn test_clamped_normal_counts_as_zero() {
        assert!(Distribution::Normal { mean: -1.0, std_dev: 0.1 }.is_zero());
        assert!(Distribution::Normal { mean: 0.0, std_dev: 0.0 }.is_zero());
        assert!(!Distribution::Normal { mean: -1.0, std_dev: 1.0 }.is_zero());
        assert!(!Distribution::Normal { mean: 0.0, std_dev: 0.5 }.is_zero());
        assert!(!Distribution::Uniform { min: 0.0, max: 0.1 }.is_zero());
    }

    #[test]
    fn test_yaml_shape() {
        let dist: Distribution = serde_yaml::from_str("type: uniform\nmin: 1.0\nmax: 3.0\n").unwrap();
        assert_eq!(dist, Distribution::Uniform { min: 1.0, max: 3.0 });
        assert_eq!(dist.mean(), 2.0);
    }
}
