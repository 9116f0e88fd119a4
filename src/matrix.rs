use std::ops::{AddAssign, DivAssign, MulAssign, SubAssign};

use sprs::CsMat;
use vector_map::VecMap;

use crate::error::{CheckError, Result};
use crate::labels::StateSet;

/// How far the mass of a distribution may be from one before it is rejected.
pub const DISTRIBUTION_TOLERANCE: f64 = 1e-6;

/// A trait representing what we need for a probability or rate. Only floating point types are
/// supported, since the iterative methods rely on IEEE semantics (`exp`, `ceil`, infinities).
pub trait CheckableNumber:
	num::Float
	+ num::FromPrimitive
	+ Default
	+ std::iter::Sum
	+ AddAssign
	+ SubAssign
	+ MulAssign
	+ DivAssign
	+ std::fmt::Display
	+ std::fmt::Debug
	+ Send
	+ Sync
{
	/// Converts an `f64` constant into this type. For the float types we implement this for,
	/// the conversion cannot fail, but if it somehow did we get a NaN which poisons the result
	/// rather than a panic.
	fn constant(value: f64) -> Self {
		<Self as num::FromPrimitive>::from_f64(value).unwrap_or_else(Self::nan)
	}

	/// Converts this value back into an `f64` (for diagnostics and error messages).
	fn as_f64(self) -> f64 {
		self.to_f64().unwrap_or(f64::NAN)
	}
}

impl CheckableNumber for f64 {}
impl CheckableNumber for f32 {}

/// A sparse probability distribution over successor states. Most states in the models we check
/// have only a handful of successors, so a `VecMap` beats the overhead of a hash map.
#[derive(Clone, Debug)]
pub struct Distribution<ValueType>
where
	ValueType: CheckableNumber,
{
	masses: VecMap<usize, ValueType>,
}

impl<ValueType> Default for Distribution<ValueType>
where
	ValueType: CheckableNumber,
{
	fn default() -> Self {
		Self::new()
	}
}

impl<ValueType> Distribution<ValueType>
where
	ValueType: CheckableNumber,
{
	/// Creates an empty distribution
	pub fn new() -> Self {
		Self {
			masses: VecMap::new(),
		}
	}

	/// Creates an empty distribution with room for `capacity` successors
	pub fn with_capacity(capacity: usize) -> Self {
		Self {
			masses: VecMap::with_capacity(capacity),
		}
	}

	/// A point distribution on `state`
	pub fn dirac(state: usize) -> Self {
		let mut dist = Self::with_capacity(1);
		dist.set(state, ValueType::one());
		dist
	}

	/// Builds a distribution from `(successor, probability)` pairs. Repeated successors are
	/// accumulated.
	pub fn from_pairs<I>(pairs: I) -> Self
	where
		I: IntoIterator<Item = (usize, ValueType)>,
	{
		let mut dist = Self::new();
		for (succ, prob) in pairs {
			dist.add(succ, prob);
		}
		dist
	}

	/// Adds `prob` to the mass of `succ`
	pub fn add(&mut self, succ: usize, prob: ValueType) {
		let current = self.get(succ);
		self.masses.insert(succ, current + prob);
	}

	/// Sets the mass of `succ`, replacing any existing mass
	pub fn set(&mut self, succ: usize, prob: ValueType) {
		self.masses.insert(succ, prob);
	}

	/// The mass of `succ` (zero if it is not in the support)
	pub fn get(&self, succ: usize) -> ValueType {
		self.masses.get(&succ).copied().unwrap_or_else(ValueType::zero)
	}

	/// Number of stored successors
	pub fn len(&self) -> usize {
		self.masses.len()
	}

	pub fn is_empty(&self) -> bool {
		self.masses.len() == 0
	}

	/// Total mass
	pub fn sum(&self) -> ValueType {
		self.masses.iter().map(|(_succ, prob)| *prob).sum()
	}

	/// Iterates over `(successor, probability)` pairs in insertion order
	pub fn iter(&self) -> impl Iterator<Item = (usize, ValueType)> + '_ {
		self.masses.iter().map(|(succ, prob)| (*succ, *prob))
	}

	/// Successors carrying positive mass
	pub fn support(&self) -> impl Iterator<Item = usize> + '_ {
		self.iter()
			.filter(|(_succ, prob)| *prob > ValueType::zero())
			.map(|(succ, _prob)| succ)
	}

	/// True if some successor in `set` carries positive mass
	pub fn contains_one_of(&self, set: &StateSet) -> bool {
		self.support().any(|succ| set.contains(succ))
	}

	/// True if every successor with positive mass is in `set`
	pub fn is_subset_of(&self, set: &StateSet) -> bool {
		self.support().all(|succ| set.contains(succ))
	}

	/// Checks that the distribution is usable in a model with `num_states` states. The state and
	/// choice indices are only used for the error message.
	pub fn validate(&self, state: usize, choice: usize, num_states: usize) -> Result<()> {
		let invalid = |reason: String| CheckError::InvalidDistribution {
			state,
			choice,
			reason,
		};
		if self.is_empty() {
			return Err(invalid("empty distribution".to_string()));
		}
		for (succ, prob) in self.iter() {
			if succ >= num_states {
				return Err(CheckError::StateOutOfRange {
					state: succ,
					num_states,
				});
			}
			if !prob.is_finite() || prob < ValueType::zero() {
				return Err(invalid(format!("mass {prob} for successor {succ}")));
			}
		}
		let sum = self.sum();
		if (sum - ValueType::one()).abs() > ValueType::constant(DISTRIBUTION_TOLERANCE) {
			return Err(invalid(format!("masses sum to {sum}")));
		}
		Ok(())
	}

	/// The positive entries, sorted by successor, which is the order a compressed row needs.
	fn sorted_entries(&self) -> Vec<(usize, ValueType)> {
		let mut entries: Vec<(usize, ValueType)> = self
			.iter()
			.filter(|(_succ, prob)| *prob > ValueType::zero())
			.collect();
		entries.sort_unstable_by_key(|(succ, _prob)| *succ);
		entries
	}
}

/// Builds the compressed choice matrix of a nondeterministic model. Every choice of every state
/// becomes one row of a CSR matrix whose columns are successor states; `row_starts[s]` is the
/// first row belonging to state `s` and `row_starts[num_states]` is the total number of rows.
pub struct ChoiceMatrixBuilder<ValueType>
where
	ValueType: CheckableNumber,
{
	/// Offsets into `indices`/`data` for every row
	indptr: Vec<usize>,
	/// Column (successor) indices
	indices: Vec<usize>,
	/// Probabilities
	data: Vec<ValueType>,
	/// First row of each state
	row_starts: Vec<usize>,
	/// The number of columns (states)
	num_states: usize,
}

impl<ValueType> ChoiceMatrixBuilder<ValueType>
where
	ValueType: CheckableNumber,
{
	/// Creates a builder for a model with `num_states` states and (roughly) `nnz_hint` nonzero
	/// entries.
	pub fn with_capacity(num_states: usize, nnz_hint: usize) -> Self {
		let mut row_starts = Vec::with_capacity(num_states + 1);
		row_starts.push(0);
		Self {
			indptr: vec![0],
			indices: Vec::with_capacity(nnz_hint),
			data: Vec::with_capacity(nnz_hint),
			row_starts,
			num_states,
		}
	}

	/// The number of rows (choices) pushed so far
	pub fn num_rows(&self) -> usize {
		self.indptr.len() - 1
	}

	/// Appends one choice row to the state currently being built
	pub fn push_choice(&mut self, dist: &Distribution<ValueType>) {
		for (succ, prob) in dist.sorted_entries() {
			self.indices.push(succ);
			self.data.push(prob);
		}
		self.indptr.push(self.indices.len());
	}

	/// Closes the state currently being built. Must be called once per state, in order.
	pub fn finish_state(&mut self) {
		let rows = self.num_rows();
		self.row_starts.push(rows);
	}

	/// Creates the sparse matrix from the data
	pub fn build(self) -> (Vec<usize>, CsMat<ValueType>) {
		let rows = self.num_rows();
		let matrix = CsMat::new(
			(rows, self.num_states),
			self.indptr,
			self.indices,
			self.data,
		);
		(self.row_starts, matrix)
	}
}

#[cfg(test)]
mod matrix_tests {
	use super::*;
	use crate::labels;

	#[test]
	fn accumulate_test() {
		let mut dist = Distribution::<f64>::new();
		dist.add(1, 0.25);
		dist.add(2, 0.5);
		dist.add(1, 0.25);
		assert_eq!(dist.len(), 2);
		assert_eq!(dist.get(1), 0.5);
		assert_eq!(dist.get(7), 0.0);
		assert!((dist.sum() - 1.0).abs() < 1e-12);
	}

	#[test]
	fn overwrite_test() {
		let mut dist = Distribution::<f64>::new();
		dist.set(3, 0.1);
		dist.set(3, 1.0);
		assert_eq!(dist.len(), 1);
		assert_eq!(dist.get(3), 1.0);
	}

	#[test]
	fn validate_test() {
		let good = Distribution::from_pairs([(0, 0.3), (1, 0.7)]);
		assert!(good.validate(0, 0, 2).is_ok());

		let short = Distribution::from_pairs([(0, 0.3), (1, 0.6)]);
		assert!(matches!(
			short.validate(0, 0, 2),
			Err(CheckError::InvalidDistribution { .. })
		));

		let negative = Distribution::from_pairs([(0, 1.5), (1, -0.5)]);
		assert!(negative.validate(0, 0, 2).is_err());

		let outside = Distribution::<f64>::dirac(5);
		assert!(matches!(
			outside.validate(0, 0, 2),
			Err(CheckError::StateOutOfRange { state: 5, .. })
		));

		assert!(Distribution::<f64>::new().validate(0, 0, 2).is_err());
	}

	#[test]
	fn set_queries_test() {
		let dist = Distribution::from_pairs([(1, 0.5), (2, 0.5), (3, 0.0)]);
		let u = labels::from_indices(4, [1]);
		let v = labels::from_indices(4, [1, 2]);
		let w = labels::from_indices(4, [3]);
		assert!(dist.contains_one_of(&u));
		assert!(!dist.is_subset_of(&u));
		assert!(dist.is_subset_of(&v));
		// Zero mass does not count as a successor
		assert!(!dist.contains_one_of(&w));
	}

	#[test]
	fn out_of_order_rows_test() {
		let mut builder = ChoiceMatrixBuilder::<f64>::with_capacity(3, 4);
		builder.push_choice(&Distribution::from_pairs([(2, 0.5), (0, 0.5)]));
		builder.push_choice(&Distribution::dirac(1));
		builder.finish_state();
		builder.finish_state();
		builder.push_choice(&Distribution::dirac(2));
		builder.finish_state();
		let (row_starts, matrix) = builder.build();
		assert_eq!(row_starts, vec![0, 2, 2, 3]);
		assert_eq!(matrix.rows(), 3);
		assert_eq!(matrix.cols(), 3);
		let first: Vec<(usize, f64)> = matrix
			.outer_view(0)
			.unwrap()
			.iter()
			.map(|(col, val)| (col, *val))
			.collect();
		assert_eq!(first, vec![(0, 0.5), (2, 0.5)]);
	}
}
