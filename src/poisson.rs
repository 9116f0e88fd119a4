// Poisson truncation for uniformisation

use std::f64::consts::PI;

use crate::error::{CheckError, Result};
use crate::matrix::CheckableNumber;

/// Below this rate the weights are accumulated directly from `e^-lambda`
const DIRECT_LIMIT: f64 = 400.0;
/// The finest accuracy the tail bounds of the FINDER corollaries can deliver
const MIN_ACCURACY: f64 = 1e-10;
/// Headroom left between the mode weight and the overflow threshold
const MODE_SCALE: f64 = 1e10;

/// The truncation points and (unnormalised) weights of a Fox-Glynn computation. `weights[i]`
/// belongs to `left + i` jumps.
#[derive(Clone, Debug)]
pub struct FoxGlynnBound<ValueType>
where
	ValueType: CheckableNumber,
{
	pub left: usize,
	pub right: usize,
	pub total_weight: ValueType,
	pub weights: Vec<ValueType>,
}

impl<ValueType> FoxGlynnBound<ValueType>
where
	ValueType: CheckableNumber,
{
	/// Computes the Poisson weights for rate `lambda` such that the probability mass outside of
	/// `left..=right` is at most `accuracy`, as described in https://doi.org/10.1145/42404.42409.
	///
	/// For `lambda < 400` the weights are summed up directly starting from `e^-lambda` until the
	/// mass is large enough, which fails if `e^-lambda` is below `underflow`. For larger rates the
	/// truncation points come from Corollaries 1 and 2 of the paper and the weights are scaled so
	/// that none of them gets near `overflow`.
	pub fn fox_glynn(
		lambda: ValueType,
		underflow: ValueType,
		overflow: ValueType,
		accuracy: ValueType,
	) -> Result<Self> {
		if !lambda.is_finite() || lambda <= ValueType::zero() {
			return Err(CheckError::PoissonOverflow(format!(
				"rate {lambda} must be positive and finite"
			)));
		}
		if !accuracy.is_finite() || accuracy <= ValueType::zero() {
			return Err(CheckError::PoissonOverflow(format!(
				"accuracy {accuracy} must be positive and finite"
			)));
		}
		// An infinite overflow threshold is clamped to the largest value later on
		if underflow.is_nan() || overflow.is_nan() || underflow < ValueType::zero() {
			return Err(CheckError::PoissonOverflow(format!(
				"invalid thresholds {underflow} and {overflow}"
			)));
		}
		let bound = if lambda.as_f64() < DIRECT_LIMIT {
			Self::accumulate(lambda, underflow, accuracy)?
		} else {
			Self::finder(lambda, overflow, accuracy)?
		};
		if bound.right < bound.left || bound.weights.len() != bound.right - bound.left + 1 {
			return Err(CheckError::PoissonOverflow(format!(
				"truncation points {}..{} are inconsistent",
				bound.left, bound.right
			)));
		}
		Ok(bound)
	}

	/// Sums `e^-lambda * lambda^i / i!` from `i = 0` until everything but `accuracy / 2` is
	/// covered
	fn accumulate(lambda: ValueType, underflow: ValueType, accuracy: ValueType) -> Result<Self> {
		let first = (-lambda).exp();
		if first <= ValueType::zero() || first < underflow {
			return Err(CheckError::PoissonOverflow(format!(
				"e^-{lambda} underflows"
			)));
		}
		let desired = ValueType::one() - accuracy / ValueType::constant(2.0);
		let mut weights = vec![first];
		let mut total_weight = first;
		let mut weight = first;
		let mut right = 0;
		while total_weight < desired {
			let next = weight * lambda / ValueType::constant((right + 1) as f64);
			// Past the mode the weights only shrink, nothing more can be gained
			let past_mode = ValueType::constant(right as f64) > lambda;
			if (next <= ValueType::zero() || next < underflow) && past_mode {
				break;
			}
			right += 1;
			weight = next;
			weights.push(weight);
			total_weight += weight;
		}
		Ok(Self {
			left: 0,
			right,
			total_weight,
			weights,
		})
	}

	/// The `FINDER` routine of the paper for `lambda >= 400`
	fn finder(lambda: ValueType, overflow: ValueType, accuracy: ValueType) -> Result<Self> {
		let lambda_f64 = lambda.as_f64();
		let epsilon = accuracy.as_f64();
		if epsilon < MIN_ACCURACY {
			return Err(CheckError::PoissonOverflow(format!(
				"accuracy {epsilon} is below the Fox-Glynn minimum of {MIN_ACCURACY}"
			)));
		}
		let mode = lambda_f64.floor() as usize;
		let root2pi = (2.0 * PI).sqrt();
		let half_eps = epsilon / 2.0;

		// Corollary 1: right tail
		let a = (1.0 + lambda_f64.recip()) * (0.0625f64).exp() * 2f64.sqrt();
		let mut k = 3.0f64;
		loop {
			let d = 1.0 / (1.0 - (-(2.0 / 9.0) * (k * (2.0 * lambda_f64).sqrt() + 1.5)).exp());
			if a * d * (-k * k / 2.0).exp() / (k * root2pi) < half_eps {
				break;
			}
			k += 1.0;
		}
		let right = (lambda_f64.floor() + k * (2.0 * lambda_f64).sqrt() + 1.5).ceil() as usize;

		// Corollary 2: left tail
		let b = (1.0 + lambda_f64.recip()) * (1.0 / (8.0 * lambda_f64)).exp();
		let mut k = 3.0f64;
		while b * (-k * k / 2.0).exp() / (k * root2pi) >= half_eps {
			k += 1.0;
		}
		let left = (lambda_f64.floor() - k * lambda_f64.sqrt() - 1.5).floor().max(0.0) as usize;

		let overflow = overflow.min(ValueType::max_value());
		let mut weights = vec![ValueType::zero(); right - left + 1];
		weights[mode - left] = overflow / ValueType::constant(MODE_SCALE * (right - left) as f64);
		for j in (left + 1..=mode).rev() {
			weights[j - 1 - left] = ValueType::constant(j as f64) / lambda * weights[j - left];
		}
		for j in mode..right {
			let ratio = lambda / ValueType::constant((j + 1) as f64);
			weights[j + 1 - left] = ratio * weights[j - left];
		}

		// Add the smaller end first to keep rounding errors down
		let mut total_weight = ValueType::zero();
		let (mut s, mut t) = (0, right - left);
		while s < t {
			if weights[s] <= weights[t] {
				total_weight += weights[s];
				s += 1;
			} else {
				total_weight += weights[t];
				t -= 1;
			}
		}
		total_weight += weights[s];

		Ok(Self {
			left,
			right,
			total_weight,
			weights,
		})
	}

	/// Divides every weight by the total weight, so that the weights sum up to one
	pub fn normalize(&mut self) {
		let total = self.total_weight;
		for weight in self.weights.iter_mut() {
			*weight /= total;
		}
		self.total_weight = ValueType::one();
	}

	/// The weight of `i` jumps (zero outside the truncation points)
	pub fn weight(&self, i: usize) -> ValueType {
		if i < self.left || i > self.right {
			ValueType::zero()
		} else {
			self.weights[i - self.left]
		}
	}
}

#[cfg(test)]
mod poisson_tests {
	use super::*;

	fn poisson_pmf(lambda: f64, i: usize) -> f64 {
		let log_factorial: f64 = (1..=i).map(|j| (j as f64).ln()).sum();
		let log = -lambda + (i as f64) * lambda.ln() - log_factorial;
		log.exp()
	}

	#[test]
	fn small_rate_is_direct() {
		let mut fg = FoxGlynnBound::<f64>::fox_glynn(2.0, 1e-300, 1e300, 1e-6).unwrap();
		assert_eq!(fg.left, 0);
		assert!(fg.total_weight >= 1.0 - 0.5e-6);
		assert!((fg.weight(0) - (-2.0f64).exp()).abs() < 1e-15);
		assert!((fg.weight(3) - poisson_pmf(2.0, 3)).abs() < 1e-12);
		fg.normalize();
		let sum: f64 = fg.weights.iter().sum();
		assert!((sum - 1.0).abs() < 1e-12);
		assert_eq!(fg.weight(fg.right + 1), 0.0);
	}

	#[test]
	fn large_rate_uses_corollaries() {
		let lambda = 500.0;
		let mut fg = FoxGlynnBound::<f64>::fox_glynn(lambda, 1e-300, 1e300, 1e-6).unwrap();
		assert!(fg.left > 0);
		assert!(fg.left < 500 && fg.right > 500);
		assert_eq!(fg.weights.len(), fg.right - fg.left + 1);
		fg.normalize();
		let sum: f64 = fg.weights.iter().sum();
		assert!((sum - 1.0).abs() < 1e-9);
		assert!((fg.weight(500) - poisson_pmf(lambda, 500)).abs() < 1e-6);
		assert!((fg.weight(480) - poisson_pmf(lambda, 480)).abs() < 1e-6);
	}

	#[test]
	fn bad_parameters() {
		assert!(matches!(
			FoxGlynnBound::<f64>::fox_glynn(0.0, 1e-300, 1e300, 1e-6),
			Err(CheckError::PoissonOverflow(_))
		));
		assert!(FoxGlynnBound::<f64>::fox_glynn(f64::INFINITY, 1e-300, 1e300, 1e-6).is_err());
		assert!(matches!(
			FoxGlynnBound::<f64>::fox_glynn(1000.0, 1e-300, 1e300, 1e-12),
			Err(CheckError::PoissonOverflow(_))
		));
		// e^-300 is below the underflow threshold
		assert!(FoxGlynnBound::<f64>::fox_glynn(300.0, 1e-100, 1e300, 1e-6).is_err());
	}

	#[test]
	fn unusable_accuracy_is_rejected() {
		for accuracy in [f64::NAN, f64::INFINITY, 0.0, -1e-6] {
			for lambda in [10.0, 500.0] {
				assert!(matches!(
					FoxGlynnBound::<f64>::fox_glynn(lambda, 1e-300, 1e300, accuracy),
					Err(CheckError::PoissonOverflow(_))
				));
			}
		}
		assert!(FoxGlynnBound::<f64>::fox_glynn(500.0, f64::NAN, 1e300, 1e-6).is_err());
		assert!(FoxGlynnBound::<f64>::fox_glynn(500.0, 1e-300, f64::NAN, 1e-6).is_err());
		assert!(FoxGlynnBound::<f64>::fox_glynn(500.0, 1e-300, f64::INFINITY, 1e-6).is_ok());
	}
}
