use std::ops::Range;

use sprs::{CsMat, CsVecView};

use crate::ctmdp::Ctmdp;
use crate::error::{CheckError, Result};
use crate::matrix::{CheckableNumber, ChoiceMatrixBuilder, Distribution};
use crate::stpg::{Player, Stpg};

/// The kinds of model the checker handles. All of them are nondeterministic; a DTMC is just an
/// MDP with one choice per state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
	/// A Markov decision process
	Mdp,
	/// A stochastic two-player game
	Stpg,
	/// A continuous-time Markov decision process
	Ctmdp,
}

impl std::fmt::Display for ModelType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			Self::Mdp => "MDP",
			Self::Stpg => "STPG",
			Self::Ctmdp => "CTMDP",
		};
		write!(f, "{name}")
	}
}

/// The capabilities the numeric engine needs from a model. Game and continuous-time models
/// provide these by wrapping an `Mdp`, never by overriding it.
pub trait NondetModel<ValueType>
where
	ValueType: CheckableNumber,
{
	fn model_type(&self) -> ModelType;
	fn num_states(&self) -> usize;
	fn num_choices(&self, state: usize) -> usize;
	/// The distribution of choice `choice` at `state`, as a sparse row over successor states.
	fn choice(&self, state: usize, choice: usize) -> CsVecView<'_, ValueType>;
	/// The player controlling `state`. Single player models belong entirely to player 1.
	fn owner(&self, _state: usize) -> Player {
		Player::One
	}
	/// The (first) initial state
	fn initial_state(&self) -> usize;

	/// Total number of nonzero transitions over all choices
	fn num_transitions(&self) -> usize {
		(0..self.num_states())
			.map(|s| {
				(0..self.num_choices(s))
					.map(|c| self.choice(s, c).nnz())
					.sum::<usize>()
			})
			.sum()
	}

	/// The largest number of choices at any state
	fn max_choices(&self) -> usize {
		(0..self.num_states())
			.map(|s| self.num_choices(s))
			.max()
			.unwrap_or(0)
	}
}

/// An explicit MDP, stored in sparse format. Each choice is one row of `transitions`; the
/// choices of state `s` are rows `row_starts[s]..row_starts[s + 1]`. Once built the model is
/// never modified.
#[derive(Clone, Debug)]
pub struct Mdp<ValueType>
where
	ValueType: CheckableNumber,
{
	num_states: usize,
	row_starts: Vec<usize>,
	transitions: CsMat<ValueType>,
	/// Optional action label of each choice row
	actions: Vec<Option<String>>,
	initial_states: Vec<usize>,
}

impl<ValueType> Mdp<ValueType>
where
	ValueType: CheckableNumber,
{
	/// The rows of the choice matrix belonging to `state`
	fn rows(&self, state: usize) -> Range<usize> {
		self.row_starts[state]..self.row_starts[state + 1]
	}

	/// The row index of a state-choice pair
	pub(crate) fn row(&self, state: usize, choice: usize) -> usize {
		let rows = self.rows(state);
		assert!(
			choice < rows.len(),
			"choice {choice} out of range for state {state}"
		);
		rows.start + choice
	}

	/// The total number of choices over all states
	pub fn num_rows(&self) -> usize {
		self.transitions.rows()
	}

	/// The action label of a choice, if it has one
	pub fn action(&self, state: usize, choice: usize) -> Option<&str> {
		self.actions[self.row(state, choice)].as_deref()
	}

	/// All initial states
	pub fn initial_states(&self) -> &[usize] {
		&self.initial_states
	}

	/// Copies the distribution of a choice out of the sparse matrix
	pub fn distribution(&self, state: usize, choice: usize) -> Distribution<ValueType> {
		let row = self.choice(state, choice);
		Distribution::from_pairs(row.iter().map(|(succ, prob)| (succ, *prob)))
	}

	/// Builds a new model with the same states, actions and initial states, where every choice
	/// distribution is replaced by `transform(state, choice, distribution)`.
	pub(crate) fn map_distributions<F>(&self, mut transform: F) -> Result<Self>
	where
		F: FnMut(usize, usize, Distribution<ValueType>) -> Distribution<ValueType>,
	{
		let mut builder = MdpBuilder::with_capacity(self.num_states);
		builder.add_states(self.num_states);
		for state in 0..self.num_states {
			for choice in 0..self.num_choices(state) {
				let dist = transform(state, choice, self.distribution(state, choice));
				let action = self.action(state, choice).map(str::to_string);
				builder.add_labelled_choice(state, dist, action)?;
			}
		}
		for init in &self.initial_states {
			builder.add_initial_state(*init)?;
		}
		builder.build()
	}
}

impl<ValueType> NondetModel<ValueType> for Mdp<ValueType>
where
	ValueType: CheckableNumber,
{
	fn model_type(&self) -> ModelType {
		ModelType::Mdp
	}

	fn num_states(&self) -> usize {
		self.num_states
	}

	fn num_choices(&self, state: usize) -> usize {
		self.rows(state).len()
	}

	fn choice(&self, state: usize, choice: usize) -> CsVecView<'_, ValueType> {
		let row = self.row(state, choice);
		// `row` is always below the row count, so the view exists
		self.transitions
			.outer_view(row)
			.expect("choice row inside the transition matrix")
	}

	fn initial_state(&self) -> usize {
		self.initial_states.first().copied().unwrap_or(0)
	}

	fn num_transitions(&self) -> usize {
		self.transitions.nnz()
	}
}

impl<ValueType> std::fmt::Display for Mdp<ValueType>
where
	ValueType: CheckableNumber,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"MDP with {} states, {} choices, {} transitions",
			self.num_states,
			self.num_rows(),
			self.transitions.nnz()
		)
	}
}

/// Incremental construction of an `Mdp`. Distributions are collected per state and validated
/// only when `build` is called.
pub struct MdpBuilder<ValueType>
where
	ValueType: CheckableNumber,
{
	choices: Vec<Vec<(Distribution<ValueType>, Option<String>)>>,
	initial_states: Vec<usize>,
}

impl<ValueType> Default for MdpBuilder<ValueType>
where
	ValueType: CheckableNumber,
{
	fn default() -> Self {
		Self::new()
	}
}

impl<ValueType> MdpBuilder<ValueType>
where
	ValueType: CheckableNumber,
{
	pub fn new() -> Self {
		Self::with_capacity(0)
	}

	/// Creates a builder with room for `capacity` states
	pub fn with_capacity(capacity: usize) -> Self {
		Self {
			choices: Vec::with_capacity(capacity),
			initial_states: Vec::new(),
		}
	}

	pub fn num_states(&self) -> usize {
		self.choices.len()
	}

	/// Number of choices added so far to `state`
	pub fn num_choices(&self, state: usize) -> usize {
		self.choices.get(state).map_or(0, Vec::len)
	}

	/// Appends one state and returns its index
	pub fn add_state(&mut self) -> usize {
		self.choices.push(Vec::new());
		self.choices.len() - 1
	}

	/// Appends `count` states and returns their indices
	pub fn add_states(&mut self, count: usize) -> Range<usize> {
		let start = self.choices.len();
		self.choices.resize_with(start + count, Vec::new);
		start..start + count
	}

	/// Marks `state` as initial. The first initial state is the one per-step results are
	/// recorded for.
	pub fn add_initial_state(&mut self, state: usize) -> Result<()> {
		self.check_state(state)?;
		if !self.initial_states.contains(&state) {
			self.initial_states.push(state);
		}
		Ok(())
	}

	/// Adds a choice to `state` and returns its index among the state's choices
	pub fn add_choice(&mut self, state: usize, dist: Distribution<ValueType>) -> Result<usize> {
		self.add_labelled_choice(state, dist, None)
	}

	/// Adds a choice with an action label to `state`
	pub fn add_labelled_choice(
		&mut self,
		state: usize,
		dist: Distribution<ValueType>,
		action: Option<String>,
	) -> Result<usize> {
		self.check_state(state)?;
		let state_choices = &mut self.choices[state];
		state_choices.push((dist, action));
		Ok(state_choices.len() - 1)
	}

	fn check_state(&self, state: usize) -> Result<()> {
		if state >= self.choices.len() {
			Err(CheckError::StateOutOfRange {
				state,
				num_states: self.choices.len(),
			})
		} else {
			Ok(())
		}
	}

	/// Validates every distribution and compresses the model
	pub fn build(self) -> Result<Mdp<ValueType>> {
		let num_states = self.choices.len();
		let nnz_hint = self
			.choices
			.iter()
			.flat_map(|state_choices| state_choices.iter().map(|(dist, _)| dist.len()))
			.sum();
		let mut matrix_builder = ChoiceMatrixBuilder::with_capacity(num_states, nnz_hint);
		let mut actions = Vec::new();
		for (state, state_choices) in self.choices.into_iter().enumerate() {
			for (choice, (dist, action)) in state_choices.into_iter().enumerate() {
				dist.validate(state, choice, num_states)?;
				matrix_builder.push_choice(&dist);
				actions.push(action);
			}
			matrix_builder.finish_state();
		}
		let (row_starts, transitions) = matrix_builder.build();
		let initial_states = if self.initial_states.is_empty() && num_states > 0 {
			vec![0]
		} else {
			self.initial_states
		};
		Ok(Mdp {
			num_states,
			row_starts,
			transitions,
			actions,
			initial_states,
		})
	}
}

/// A model of any supported type, e.g., as handed over by a model construction front end.
#[derive(Clone, Debug)]
pub enum ExplicitModel<ValueType>
where
	ValueType: CheckableNumber,
{
	Mdp(Mdp<ValueType>),
	Stpg(Stpg<ValueType>),
	Ctmdp(Ctmdp<ValueType>),
}

impl<ValueType> ExplicitModel<ValueType>
where
	ValueType: CheckableNumber,
{
	pub fn model_type(&self) -> ModelType {
		match self {
			Self::Mdp(_) => ModelType::Mdp,
			Self::Stpg(_) => ModelType::Stpg,
			Self::Ctmdp(_) => ModelType::Ctmdp,
		}
	}

	pub fn num_states(&self) -> usize {
		match self {
			Self::Mdp(mdp) => mdp.num_states(),
			Self::Stpg(stpg) => stpg.num_states(),
			Self::Ctmdp(ctmdp) => ctmdp.num_states(),
		}
	}
}

#[cfg(test)]
mod model_tests {
	use super::*;

	fn two_state() -> Mdp<f64> {
		let mut builder = MdpBuilder::new();
		let states = builder.add_states(2);
		assert_eq!(states, 0..2);
		builder
			.add_labelled_choice(0, Distribution::dirac(1), Some("go".to_string()))
			.unwrap();
		builder
			.add_choice(0, Distribution::from_pairs([(0, 0.5), (1, 0.5)]))
			.unwrap();
		builder.add_choice(1, Distribution::dirac(1)).unwrap();
		builder.build().unwrap()
	}

	#[test]
	fn construction_test() {
		let mdp = two_state();
		assert_eq!(mdp.num_states(), 2);
		assert_eq!(mdp.num_choices(0), 2);
		assert_eq!(mdp.num_choices(1), 1);
		assert_eq!(mdp.num_rows(), 3);
		assert_eq!(mdp.num_transitions(), 4);
		assert_eq!(mdp.max_choices(), 2);
		assert_eq!(mdp.action(0, 0), Some("go"));
		assert_eq!(mdp.action(0, 1), None);
		assert_eq!(mdp.initial_state(), 0);
		assert_eq!(mdp.distribution(0, 1).get(1), 0.5);
		assert_eq!(mdp.model_type(), ModelType::Mdp);
		assert_eq!(
			mdp.to_string(),
			"MDP with 2 states, 3 choices, 4 transitions"
		);
	}

	#[test]
	fn unknown_state_test() {
		let mut builder = MdpBuilder::<f64>::new();
		builder.add_state();
		assert!(matches!(
			builder.add_choice(3, Distribution::dirac(0)),
			Err(CheckError::StateOutOfRange { state: 3, num_states: 1 })
		));
		assert!(builder.add_initial_state(1).is_err());
	}

	#[test]
	fn invalid_distribution_rejected_at_build() {
		let mut builder = MdpBuilder::<f64>::new();
		builder.add_states(2);
		builder
			.add_choice(0, Distribution::from_pairs([(0, 0.4), (1, 0.4)]))
			.unwrap();
		assert!(matches!(
			builder.build(),
			Err(CheckError::InvalidDistribution { state: 0, choice: 0, .. })
		));
	}

	#[test]
	fn map_distributions_keeps_structure() {
		let mdp = two_state();
		let mapped = mdp
			.map_distributions(|state, _choice, _dist| Distribution::dirac(state))
			.unwrap();
		assert_eq!(mapped.num_choices(0), 2);
		assert_eq!(mapped.action(0, 0), Some("go"));
		assert_eq!(mapped.distribution(0, 0).get(0), 1.0);
	}
}
