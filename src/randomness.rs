//! Deterministic randomness streams.
//!
//! A stream never keeps state between calls. Every draw reseeds a fresh
//! generator from a blake3 digest of
//! `(stream key, additional key, clock time, draw number, simulant)`, so a
//! simulant's draws depend only on those inputs and never on how many other
//! draws happened elsewhere in the process. Two calls with the same inputs
//! return the same numbers; use [`RandomnessStream::with_additional_key`] for
//! several independent decisions within one tick.

use std::collections::BTreeMap;

use blake3::Hasher;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Bernoulli, Distribution as Sample, Exp, LogNormal, Normal, Uniform, WeightedIndex};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, PopulationError, SimResult};
use crate::population::SimulantId;
use crate::time::Clock;

/// A parametric distribution for [`RandomnessStream::draw`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Distribution {
    Uniform { low: f64, high: f64 },
    Normal { mean: f64, std_dev: f64 },
    LogNormal { mu: f64, sigma: f64 },
    Exponential { rate: f64 },
    /// Draws 1.0 with probability `p`, else 0.0.
    Bernoulli { p: f64 },
}

enum Sampler {
    Uniform(Uniform<f64>),
    Normal(Normal<f64>),
    LogNormal(LogNormal<f64>),
    Exponential(Exp<f64>),
    Bernoulli(Bernoulli),
}

impl Sampler {
    fn sample(&self, rng: &mut StdRng) -> f64 {
        match self {
            Self::Uniform(d) => d.sample(rng),
            Self::Normal(d) => d.sample(rng),
            Self::LogNormal(d) => d.sample(rng),
            Self::Exponential(d) => d.sample(rng),
            Self::Bernoulli(d) => {
                if d.sample(rng) {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

impl Distribution {
    /// Builds a distribution from a kind name and named parameters, as found
    /// in configuration files.
    ///
    /// # Errors
    ///
    /// `UnknownDistribution` for an unknown kind, `InvalidDistribution` for
    /// missing or invalid parameters.
    pub fn from_params(kind: &str, params: &BTreeMap<String, f64>) -> Result<Self, ConfigurationError> {
        let get = |name: &str| {
            params
                .get(name)
                .copied()
                .ok_or_else(|| ConfigurationError::InvalidDistribution {
                    kind: kind.to_string(),
                    reason: format!("missing parameter '{name}'"),
                })
        };
        let distribution = match kind {
            "uniform" => Self::Uniform {
                low: get("low")?,
                high: get("high")?,
            },
            "normal" => Self::Normal {
                mean: get("mean")?,
                std_dev: get("std_dev")?,
            },
            "lognormal" | "log_normal" => Self::LogNormal {
                mu: get("mu")?,
                sigma: get("sigma")?,
            },
            "exponential" => Self::Exponential { rate: get("rate")? },
            "bernoulli" => Self::Bernoulli { p: get("p")? },
            other => {
                return Err(ConfigurationError::UnknownDistribution {
                    kind: other.to_string(),
                })
            }
        };
        distribution.sampler()?;
        Ok(distribution)
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Uniform { .. } => "uniform",
            Self::Normal { .. } => "normal",
            Self::LogNormal { .. } => "lognormal",
            Self::Exponential { .. } => "exponential",
            Self::Bernoulli { .. } => "bernoulli",
        }
    }

    fn sampler(&self) -> Result<Sampler, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidDistribution {
            kind: self.kind().to_string(),
            reason,
        };
        Ok(match *self {
            Self::Uniform { low, high } => {
                if !(low.is_finite() && high.is_finite() && low < high && (high - low).is_finite()) {
                    return Err(invalid(format!(
                        "need finite low < high with a finite width, got [{low}, {high})"
                    )));
                }
                Sampler::Uniform(Uniform::new(low, high))
            }
            Self::Normal { mean, std_dev } => {
                Sampler::Normal(Normal::new(mean, std_dev).map_err(|e| invalid(e.to_string()))?)
            }
            Self::LogNormal { mu, sigma } => {
                Sampler::LogNormal(LogNormal::new(mu, sigma).map_err(|e| invalid(e.to_string()))?)
            }
            Self::Exponential { rate } => {
                Sampler::Exponential(Exp::new(rate).map_err(|e| invalid(e.to_string()))?)
            }
            Self::Bernoulli { p } => {
                Sampler::Bernoulli(Bernoulli::new(p).map_err(|e| invalid(e.to_string()))?)
            }
        })
    }
}

/// A named, reproducible source of random numbers.
#[derive(Debug, Clone)]
pub struct RandomnessStream {
    key: String,
    additional_key: Option<String>,
    clock: Clock,
    draw_number: u64,
}

impl RandomnessStream {
    #[must_use]
    pub fn new(key: impl Into<String>, clock: Clock, draw_number: u64) -> Self {
        Self {
            key: key.into(),
            additional_key: None,
            clock,
            draw_number,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// An independent sub-stream of this stream.
    #[must_use]
    pub fn with_additional_key(&self, additional_key: impl Into<String>) -> Self {
        Self {
            additional_key: Some(additional_key.into()),
            ..self.clone()
        }
    }

    fn seed(&self, time_millis: i64, simulant: SimulantId) -> [u8; 32] {
        // Strings are length-prefixed and the optional key is tagged, so no
        // two distinct field tuples share a byte stream.
        let mut h = Hasher::new();
        h.update(&(self.key.len() as u64).to_le_bytes());
        h.update(self.key.as_bytes());
        match &self.additional_key {
            Some(extra) => {
                h.update(&[1]);
                h.update(&(extra.len() as u64).to_le_bytes());
                h.update(extra.as_bytes());
            }
            None => {
                h.update(&[0]);
            }
        }
        h.update(&time_millis.to_le_bytes());
        h.update(&self.draw_number.to_le_bytes());
        h.update(&(simulant.as_usize() as u64).to_le_bytes());
        h.finalize().into()
    }

    fn rngs<'a>(&'a self, index: &'a [SimulantId]) -> impl Iterator<Item = StdRng> + 'a {
        let time = self.clock.now().timestamp_millis();
        index
            .iter()
            .map(move |&id| StdRng::from_seed(self.seed(time, id)))
    }

    /// One uniform `[0, 1)` draw per simulant.
    #[must_use]
    pub fn get_draw(&self, index: &[SimulantId]) -> Vec<f64> {
        self.rngs(index).map(|mut rng| rng.gen::<f64>()).collect()
    }

    /// One draw per simulant from `distribution`.
    ///
    /// # Errors
    ///
    /// `InvalidDistribution` for invalid parameters.
    pub fn draw(&self, index: &[SimulantId], distribution: &Distribution) -> SimResult<Vec<f64>> {
        let sampler = distribution.sampler()?;
        Ok(self.rngs(index).map(|mut rng| sampler.sample(&mut rng)).collect())
    }

    /// Picks one of `options` per simulant, uniformly or by `weights`.
    ///
    /// # Errors
    ///
    /// `InvalidDistribution` for no options, a weight count that differs
    /// from the option count, or weights that are negative or all zero.
    pub fn choice<T: Clone>(
        &self,
        index: &[SimulantId],
        options: &[T],
        weights: Option<&[f64]>,
    ) -> SimResult<Vec<T>> {
        let invalid = |reason: String| ConfigurationError::InvalidDistribution {
            kind: "choice".to_string(),
            reason,
        };
        if options.is_empty() {
            return Err(invalid("no options to choose from".to_string()).into());
        }
        let picks: Vec<usize> = match weights {
            None => self
                .rngs(index)
                .map(|mut rng| rng.gen_range(0..options.len()))
                .collect(),
            Some(w) => {
                if w.len() != options.len() {
                    return Err(invalid(format!(
                        "{} weights for {} options",
                        w.len(),
                        options.len()
                    ))
                    .into());
                }
                let weighted = WeightedIndex::new(w).map_err(|e| invalid(e.to_string()))?;
                self.rngs(index)
                    .map(|mut rng| weighted.sample(&mut rng))
                    .collect()
            }
        };
        Ok(picks.into_iter().map(|i| options[i].clone()).collect())
    }

    /// Keeps the simulants whose draw falls below their probability.
    ///
    /// # Errors
    ///
    /// `LengthMismatch` if `probabilities` is not aligned with `index`.
    pub fn filter_for_probability(
        &self,
        index: &[SimulantId],
        probabilities: &[f64],
    ) -> SimResult<Vec<SimulantId>> {
        if probabilities.len() != index.len() {
            return Err(PopulationError::LengthMismatch {
                column: "probability".to_string(),
                expected: index.len(),
                actual: probabilities.len(),
            }
            .into());
        }
        let draws = self.get_draw(index);
        Ok(index
            .iter()
            .zip(draws.iter().zip(probabilities))
            .filter(|(_, (draw, p))| *draw < *p)
            .map(|(id, _)| *id)
            .collect())
    }

    /// Like [`RandomnessStream::filter_for_probability`] for per-step rates,
    /// converted with `1 - exp(-rate)`.
    ///
    /// # Errors
    ///
    /// `LengthMismatch` if `rates` is not aligned with `index`.
    pub fn filter_for_rate(&self, index: &[SimulantId], rates: &[f64]) -> SimResult<Vec<SimulantId>> {
        let probabilities: Vec<f64> = rates.iter().map(|r| 1.0 - (-r).exp()).collect();
        self.filter_for_probability(index, &probabilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::midyear;
    use chrono::Duration;

    fn ids(n: usize) -> Vec<SimulantId> {
        (0..n).map(SimulantId::new).collect()
    }

    fn clock() -> Clock {
        Clock::new(midyear(2000).unwrap(), Duration::days(30))
    }

    #[test]
    fn test_same_inputs_same_draws_regardless_of_history() {
        let c = clock();
        let a = RandomnessStream::new("mortality", c.clone(), 3);
        let b = RandomnessStream::new("mortality", c.clone(), 3);
        let other = RandomnessStream::new("fertility", c, 3);

        let first = a.get_draw(&ids(50));
        let _ = other.get_draw(&ids(500));
        let _ = a.get_draw(&ids(7));
        assert_eq!(first, b.get_draw(&ids(50)));
        assert!(first.iter().all(|x| (0.0..1.0).contains(x)));
    }

    #[test]
    fn test_keys_time_and_draw_number_change_draws() {
        let c = clock();
        let base = RandomnessStream::new("s", c.clone(), 0).get_draw(&ids(20));
        assert_ne!(base, RandomnessStream::new("t", c.clone(), 0).get_draw(&ids(20)));
        assert_ne!(base, RandomnessStream::new("s", c.clone(), 1).get_draw(&ids(20)));
        assert_ne!(
            base,
            RandomnessStream::new("s", c.clone(), 0)
                .with_additional_key("second")
                .get_draw(&ids(20))
        );
        c.advance().unwrap();
        assert_ne!(base, RandomnessStream::new("s", c, 0).get_draw(&ids(20)));
    }

    #[test]
    fn test_seed_fields_do_not_run_together() {
        let c = clock();
        let plain = RandomnessStream::new("s", c.clone(), 0);
        assert_ne!(
            plain.get_draw(&ids(20)),
            plain.with_additional_key("").get_draw(&ids(20))
        );
        assert_ne!(
            RandomnessStream::new("a", c.clone(), 0)
                .with_additional_key("\0")
                .get_draw(&ids(20)),
            RandomnessStream::new("a\0", c, 0).get_draw(&ids(20))
        );
    }

    #[test]
    fn test_draw_per_simulant_is_independent_of_index_membership() {
        let s = RandomnessStream::new("s", clock(), 0);
        let all = s.get_draw(&ids(10));
        let some = s.get_draw(&[SimulantId::new(7), SimulantId::new(2)]);
        assert_eq!(some, vec![all[7], all[2]]);
    }

    #[test]
    fn test_distributions() {
        let s = RandomnessStream::new("s", clock(), 0);
        let u = s
            .draw(&ids(200), &Distribution::Uniform { low: 5.0, high: 6.0 })
            .unwrap();
        assert!(u.iter().all(|x| (5.0..6.0).contains(x)));
        let b = s.draw(&ids(200), &Distribution::Bernoulli { p: 1.0 }).unwrap();
        assert!(b.iter().all(|x| *x == 1.0));
        assert!(s
            .draw(&ids(1), &Distribution::Normal { mean: 0.0, std_dev: -1.0 })
            .is_err());
    }

    #[test]
    fn test_uniform_with_unbounded_width_is_rejected() {
        let wide = Distribution::Uniform {
            low: -f64::MAX,
            high: f64::MAX,
        };
        let s = RandomnessStream::new("s", clock(), 0);
        assert!(s.draw(&ids(3), &wide).is_err());
        let params = BTreeMap::from([("low".to_string(), -f64::MAX), ("high".to_string(), f64::MAX)]);
        let err = Distribution::from_params("uniform", &params).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidDistribution { .. }));
    }

    #[test]
    fn test_from_params() {
        let params = BTreeMap::from([("rate".to_string(), 2.0)]);
        assert_eq!(
            Distribution::from_params("exponential", &params).unwrap(),
            Distribution::Exponential { rate: 2.0 }
        );
        let err = Distribution::from_params("cauchy", &params).unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownDistribution { .. }));
        let err = Distribution::from_params("normal", &params).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidDistribution { .. }));
    }

    #[test]
    fn test_choice() {
        let s = RandomnessStream::new("sex", clock(), 0);
        let picks = s
            .choice(&ids(100), &["Male", "Female"], Some(&[0.0, 1.0][..]))
            .unwrap();
        assert!(picks.iter().all(|p| *p == "Female"));
        let uniform = s.choice(&ids(100), &["a", "b"], None).unwrap();
        assert!(uniform.contains(&"a") && uniform.contains(&"b"));
        assert!(s.choice(&ids(1), &["a"], Some(&[1.0, 2.0][..])).is_err());
        assert!(s.choice::<&str>(&ids(1), &[], None).is_err());
    }

    #[test]
    fn test_filters() {
        let s = RandomnessStream::new("f", clock(), 0);
        let index = ids(10);
        assert_eq!(s.filter_for_probability(&index, &[1.0; 10]).unwrap(), index);
        assert!(s.filter_for_probability(&index, &[0.0; 10]).unwrap().is_empty());
        assert!(s.filter_for_rate(&index, &[0.0; 10]).unwrap().is_empty());
        assert!(s.filter_for_rate(&index, &[1.0; 3]).is_err());
    }
}
