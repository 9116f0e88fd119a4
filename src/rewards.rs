use sprs::{CsMat, CsVec};
use vector_map::VecMap;

use crate::error::{CheckError, Result};
use crate::matrix::CheckableNumber;

/// An explicit representation of a rewards structure for a nondeterministic model. The reward
/// for one step taken from state `s` with choice `c` is `state_rewards[s] + choice_rewards[s, c]`.
#[derive(Clone, Debug)]
pub struct ExplicitRewards<ValueType>
where
	ValueType: CheckableNumber,
{
	/// The name of this rewards structure
	name: String,
	/// The reward for taking any step out of a state. The index in the vector corresponds to the
	/// state index as assigned during model building.
	pub state_rewards: CsVec<ValueType>,
	/// The reward for resolving the nondeterminism of a state in a particular way. The row index
	/// is the state, the column index is the choice index local to that state.
	pub choice_rewards: CsMat<ValueType>,
}

impl<ValueType> ExplicitRewards<ValueType>
where
	ValueType: CheckableNumber,
{
	/// Create explicit rewards from a pre-built state reward vector and choice rewards matrix.
	pub fn from_raw(
		name: String,
		state_rewards: CsVec<ValueType>,
		choice_rewards: CsMat<ValueType>,
	) -> Self {
		Self {
			name,
			state_rewards,
			choice_rewards,
		}
	}

	/// Returns the name of this rewards structure
	pub fn name(&self) -> &str {
		&self.name
	}

	/// The reward for being in `state` (zero if none is set)
	pub fn state_reward(&self, state: usize) -> ValueType {
		self.state_rewards
			.get(state)
			.copied()
			.unwrap_or_else(ValueType::zero)
	}

	/// The reward attached to a state-choice pair (zero if none is set)
	pub fn choice_reward(&self, state: usize, choice: usize) -> ValueType {
		if state >= self.choice_rewards.rows() || choice >= self.choice_rewards.cols() {
			return ValueType::zero();
		}
		self.choice_rewards
			.get(state, choice)
			.copied()
			.unwrap_or_else(ValueType::zero)
	}

	/// The full one-step reward of a state-choice pair
	pub fn step_reward(&self, state: usize, choice: usize) -> ValueType {
		self.state_reward(state) + self.choice_reward(state, choice)
	}
}

/// Collects rewards state by state before compressing them into an `ExplicitRewards`.
pub struct RewardsBuilder<ValueType>
where
	ValueType: CheckableNumber,
{
	name: String,
	num_states: usize,
	state_rewards: VecMap<usize, ValueType>,
	/// Choice rewards per state, keyed by local choice index
	choice_rewards: Vec<VecMap<usize, ValueType>>,
}

impl<ValueType> RewardsBuilder<ValueType>
where
	ValueType: CheckableNumber,
{
	/// Creates a new rewards builder for a model with `num_states` states
	pub fn new(name: &str, num_states: usize) -> Self {
		Self {
			name: name.to_string(),
			num_states,
			state_rewards: VecMap::new(),
			choice_rewards: (0..num_states).map(|_| VecMap::new()).collect(),
		}
	}

	fn check_state(&self, state: usize) -> Result<()> {
		if state < self.num_states {
			Ok(())
		} else {
			Err(CheckError::StateOutOfRange {
				state,
				num_states: self.num_states,
			})
		}
	}

	/// Sets (replaces) the reward of `state`
	pub fn set_state_reward(&mut self, state: usize, reward: ValueType) -> Result<()> {
		self.check_state(state)?;
		self.state_rewards.insert(state, reward);
		Ok(())
	}

	/// Sets (replaces) the reward of a state-choice pair
	pub fn set_choice_reward(
		&mut self,
		state: usize,
		choice: usize,
		reward: ValueType,
	) -> Result<()> {
		self.check_state(state)?;
		self.choice_rewards[state].insert(choice, reward);
		Ok(())
	}

	pub fn build(self) -> ExplicitRewards<ValueType> {
		let mut state_entries: Vec<(usize, ValueType)> = self
			.state_rewards
			.iter()
			.map(|(state, reward)| (*state, *reward))
			.collect();
		state_entries.sort_unstable_by_key(|(state, _)| *state);
		let (state_idxes, state_values): (Vec<usize>, Vec<ValueType>) =
			state_entries.into_iter().unzip();

		let cols = self
			.choice_rewards
			.iter()
			.flat_map(|row| row.iter().map(|(choice, _)| *choice + 1))
			.max()
			.unwrap_or(0);
		let mut indptr = Vec::with_capacity(self.num_states + 1);
		let mut indices = Vec::new();
		let mut data = Vec::new();
		indptr.push(0);
		for row in &self.choice_rewards {
			let mut entries: Vec<(usize, ValueType)> =
				row.iter().map(|(choice, reward)| (*choice, *reward)).collect();
			entries.sort_unstable_by_key(|(choice, _)| *choice);
			for (choice, reward) in entries {
				indices.push(choice);
				data.push(reward);
			}
			indptr.push(indices.len());
		}

		ExplicitRewards::from_raw(
			self.name,
			CsVec::new(self.num_states, state_idxes, state_values),
			CsMat::new((self.num_states, cols), indptr, indices, data),
		)
	}
}
