//! Error types for model construction and model checking

use thiserror::Error;

use crate::model::ModelType;

/// Errors raised while building models or computing probabilities. None of these are retried:
/// the computations are deterministic, so a failed call returns no probability vector.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CheckError {
	/// Negative bound, or a zero bound with a strict comparator
	#[error("Invalid upper bound {comparator}{bound} in bounded until formula")]
	InvalidBound { comparator: &'static str, bound: String },

	/// A CTMDP whose exit rates differ from the maximal exit rate
	#[error("CTMDP not locally uniform: rate {rate} at {state}:{choice} vs {max_rate}")]
	NotLocallyUniform {
		state: usize,
		choice: usize,
		rate: f64,
		max_rate: f64,
	},

	/// The Poisson truncation could not bound the tail
	#[error("Overflow in Fox-Glynn computation (time bound too big?): {0}")]
	PoissonOverflow(String),

	/// A player tag other than 1 or 2
	#[error("Player {0} is undefined!")]
	InvalidPlayer(i32),

	/// A requested label does not exist
	#[error("Unknown label \"{0}\"")]
	UnknownLabel(String),

	/// A distribution that is empty, negative, or does not sum to one
	#[error("Invalid distribution for state {state}, choice {choice}: {reason}")]
	InvalidDistribution {
		state: usize,
		choice: usize,
		reason: String,
	},

	/// An exit rate that is not strictly positive and finite
	#[error("Invalid exit rate {rate} for state {state}")]
	InvalidRate { state: usize, rate: f64 },

	/// A state index outside of the model
	#[error("State {state} out of range (model has {num_states} states)")]
	StateOutOfRange { state: usize, num_states: usize },

	/// A vector or set whose size does not match the model
	#[error("{what} has length {actual}, expected {expected}")]
	DimensionMismatch {
		what: &'static str,
		expected: usize,
		actual: usize,
	},

	/// A step bound on a continuous-time model, or a time bound on a discrete-time one
	#[error("{kind} bounds are not supported for {model_type}s")]
	UnsupportedBound {
		kind: &'static str,
		model_type: ModelType,
	},

	/// Iterative solution stopped at the iteration limit
	#[error("Iterative method did not converge within {iters} iterations (max change {max_diff})")]
	NotConverged { iters: usize, max_diff: f64 },
}

impl CheckError {
	pub(crate) fn invalid_bound(bound: impl ToString, strict: bool) -> Self {
		Self::InvalidBound {
			comparator: if strict { "<" } else { "<=" },
			bound: bound.to_string(),
		}
	}
}

/// Result type for construction and checking
pub type Result<T> = std::result::Result<T, CheckError>;

#[cfg(test)]
mod error_tests {
	use super::*;

	#[test]
	fn bound_message() {
		let err = CheckError::invalid_bound(0, true);
		assert_eq!(
			err.to_string(),
			"Invalid upper bound <0 in bounded until formula"
		);
		let err = CheckError::invalid_bound(-1.5, false);
		assert_eq!(
			err.to_string(),
			"Invalid upper bound <=-1.5 in bounded until formula"
		);
	}

	#[test]
	fn player_message() {
		assert_eq!(CheckError::InvalidPlayer(3).to_string(), "Player 3 is undefined!");
	}

	#[test]
	fn unsupported_bound_message() {
		let err = CheckError::UnsupportedBound {
			kind: "Time",
			model_type: ModelType::Mdp,
		};
		assert_eq!(err.to_string(), "Time bounds are not supported for MDPs");
	}
}
