use std::fmt;

use crate::error::{CheckError, Result};
use crate::minmax::MinMax;

/// An upper bound on the number of steps, `<= bound` or `< bound`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepBound {
	pub bound: i64,
	pub strict: bool,
}

impl StepBound {
	/// `<= bound`
	pub fn at_most(bound: i64) -> Self {
		Self {
			bound,
			strict: false,
		}
	}

	/// `< bound`
	pub fn below(bound: i64) -> Self {
		Self {
			bound,
			strict: true,
		}
	}

	/// Rejects negative bounds and `< 0`
	pub fn validate(&self) -> Result<()> {
		if self.bound < 0 || (self.bound == 0 && self.strict) {
			Err(CheckError::invalid_bound(self.bound, self.strict))
		} else {
			Ok(())
		}
	}

	/// The number of steps to iterate. A strict bound `< k` allows `k - 1` steps.
	pub fn steps(&self) -> Result<usize> {
		self.validate()?;
		let steps = if self.strict { self.bound - 1 } else { self.bound };
		usize::try_from(steps).map_err(|_| CheckError::invalid_bound(self.bound, self.strict))
	}
}

impl fmt::Display for StepBound {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let comparator = if self.strict { "<" } else { "<=" };
		write!(f, "{comparator}{}", self.bound)
	}
}

/// An upper bound on the elapsed time, `<= bound` or `< bound`. In continuous time both
/// comparators give the same probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeBound {
	pub bound: f64,
	pub strict: bool,
}

impl TimeBound {
	pub fn at_most(bound: f64) -> Self {
		Self {
			bound,
			strict: false,
		}
	}

	pub fn below(bound: f64) -> Self {
		Self {
			bound,
			strict: true,
		}
	}

	/// Rejects negative or non-finite bounds and `< 0`
	pub fn validate(&self) -> Result<()> {
		if !self.bound.is_finite() || self.bound < 0.0 || (self.bound == 0.0 && self.strict) {
			Err(CheckError::invalid_bound(self.bound, self.strict))
		} else {
			Ok(())
		}
	}
}

impl fmt::Display for TimeBound {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let comparator = if self.strict { "<" } else { "<=" };
		write!(f, "{comparator}{}", self.bound)
	}
}

/// The bound of a bounded until
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Interval {
	/// For MDPs and games
	Steps(StepBound),
	/// For CTMDPs
	Time(TimeBound),
}

impl fmt::Display for Interval {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Steps(bound) => write!(f, "{bound}"),
			Self::Time(bound) => write!(f, "{bound}"),
		}
	}
}

/// `P{min,max}=? [ remain U<=bound target ]`, with the state sets given by label names. A
/// missing `remain` label means `true`.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedUntil {
	pub remain: Option<String>,
	pub target: String,
	pub bound: Interval,
	pub minmax: MinMax,
}

impl BoundedUntil {
	pub fn until(remain: &str, target: &str, bound: Interval, minmax: MinMax) -> Self {
		Self {
			remain: Some(remain.to_string()),
			target: target.to_string(),
			bound,
			minmax,
		}
	}

	/// `true U<=bound target`
	pub fn eventually(target: &str, bound: Interval, minmax: MinMax) -> Self {
		Self {
			remain: None,
			target: target.to_string(),
			bound,
			minmax,
		}
	}
}

impl fmt::Display for BoundedUntil {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let remain = match &self.remain {
			Some(label) => format!("\"{label}\""),
			None => "true".to_string(),
		};
		write!(
			f,
			"P{}=? [ {remain} U{} \"{}\" ]",
			self.minmax, self.bound, self.target
		)
	}
}
