//! Stochastic two-player games: an MDP whose states are each controlled by one of two players.

use std::ops::Range;

use sprs::CsVecView;

use crate::error::{CheckError, Result};
use crate::matrix::{CheckableNumber, Distribution};
use crate::model::{Mdp, MdpBuilder, ModelType, NondetModel};

/// The owner of a game state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Player {
	One,
	Two,
}

impl Player {
	/// The numeric tag used by model files and front ends
	pub fn tag(self) -> i32 {
		match self {
			Self::One => 1,
			Self::Two => 2,
		}
	}
}

impl TryFrom<i32> for Player {
	type Error = CheckError;

	fn try_from(tag: i32) -> Result<Self> {
		match tag {
			1 => Ok(Self::One),
			2 => Ok(Self::Two),
			_ => Err(CheckError::InvalidPlayer(tag)),
		}
	}
}

impl std::fmt::Display for Player {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "P-{}", self.tag())
	}
}

/// An explicit stochastic two-player game.
#[derive(Clone, Debug)]
pub struct Stpg<ValueType>
where
	ValueType: CheckableNumber,
{
	mdp: Mdp<ValueType>,
	players: Vec<Player>,
}

impl<ValueType> Stpg<ValueType>
where
	ValueType: CheckableNumber,
{
	/// Turns an MDP into a game in which player 1 owns every state
	pub fn from_mdp(mdp: Mdp<ValueType>) -> Self {
		let players = vec![Player::One; mdp.num_states()];
		Self { mdp, players }
	}

	/// The underlying transition structure
	pub fn mdp(&self) -> &Mdp<ValueType> {
		&self.mdp
	}

	/// Relabels the owner of `state`. An invalid tag leaves the previous owner in place.
	pub fn set_player(&mut self, state: usize, tag: i32) -> Result<()> {
		let player = Player::try_from(tag)?;
		let num_states = self.players.len();
		let slot = self
			.players
			.get_mut(state)
			.ok_or(CheckError::StateOutOfRange { state, num_states })?;
		*slot = player;
		Ok(())
	}

	/// The owner of every state, indexed by state
	pub fn players(&self) -> &[Player] {
		&self.players
	}
}

impl<ValueType> NondetModel<ValueType> for Stpg<ValueType>
where
	ValueType: CheckableNumber,
{
	fn model_type(&self) -> ModelType {
		ModelType::Stpg
	}

	fn num_states(&self) -> usize {
		self.mdp.num_states()
	}

	fn num_choices(&self, state: usize) -> usize {
		self.mdp.num_choices(state)
	}

	fn choice(&self, state: usize, choice: usize) -> CsVecView<'_, ValueType> {
		self.mdp.choice(state, choice)
	}

	fn owner(&self, state: usize) -> Player {
		self.players[state]
	}

	fn initial_state(&self) -> usize {
		self.mdp.initial_state()
	}

	fn num_transitions(&self) -> usize {
		self.mdp.num_transitions()
	}
}

impl<ValueType> std::fmt::Display for Stpg<ValueType>
where
	ValueType: CheckableNumber,
{
	/// Lists every state with its owner and choices, e.g. `0(P-1): [go:{1: 1}]`
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let states = (0..self.num_states()).map(|s| {
			let choices = (0..self.num_choices(s)).map(|c| {
				let succs = itertools::join(
					self.choice(s, c)
						.iter()
						.map(|(succ, prob)| format!("{succ}: {prob}")),
					", ",
				);
				match self.mdp.action(s, c) {
					Some(action) => format!("{action}:{{{succs}}}"),
					None => format!("{{{succs}}}"),
				}
			});
			format!("{s}({}): [{}]", self.players[s], itertools::join(choices, ","))
		});
		write!(f, "[ {} ]", itertools::join(states, ", "))
	}
}

/// Incremental construction of an `Stpg`. States added without an explicit owner belong to
/// player 1.
pub struct StpgBuilder<ValueType>
where
	ValueType: CheckableNumber,
{
	mdp: MdpBuilder<ValueType>,
	players: Vec<Player>,
}

impl<ValueType> Default for StpgBuilder<ValueType>
where
	ValueType: CheckableNumber,
{
	fn default() -> Self {
		Self::new()
	}
}

impl<ValueType> StpgBuilder<ValueType>
where
	ValueType: CheckableNumber,
{
	pub fn new() -> Self {
		Self {
			mdp: MdpBuilder::new(),
			players: Vec::new(),
		}
	}

	pub fn num_states(&self) -> usize {
		self.players.len()
	}

	/// Adds one state, owned by player 1
	pub fn add_state(&mut self) -> usize {
		self.players.push(Player::One);
		self.mdp.add_state()
	}

	/// Adds `count` states, all owned by player 1
	pub fn add_states(&mut self, count: usize) -> Range<usize> {
		self.players
			.resize(self.players.len() + count, Player::One);
		self.mdp.add_states(count)
	}

	/// Adds a state owned by the player with the given tag
	pub fn add_state_for(&mut self, tag: i32) -> Result<usize> {
		let player = Player::try_from(tag)?;
		self.players.push(player);
		Ok(self.mdp.add_state())
	}

	/// Adds one state per tag. Every tag is checked before any state is added.
	pub fn add_states_for(&mut self, tags: &[i32]) -> Result<Range<usize>> {
		let players = tags
			.iter()
			.map(|tag| Player::try_from(*tag))
			.collect::<Result<Vec<_>>>()?;
		self.players.extend(players);
		Ok(self.mdp.add_states(tags.len()))
	}

	/// Relabels the owner of an already added state. An invalid tag leaves the previous owner in
	/// place.
	pub fn set_player(&mut self, state: usize, tag: i32) -> Result<()> {
		let player = Player::try_from(tag)?;
		let num_states = self.players.len();
		let slot = self
			.players
			.get_mut(state)
			.ok_or(CheckError::StateOutOfRange { state, num_states })?;
		*slot = player;
		Ok(())
	}

	/// The current owner of `state`
	pub fn player(&self, state: usize) -> Option<Player> {
		self.players.get(state).copied()
	}

	pub fn add_choice(&mut self, state: usize, dist: Distribution<ValueType>) -> Result<usize> {
		self.mdp.add_choice(state, dist)
	}

	pub fn add_labelled_choice(
		&mut self,
		state: usize,
		dist: Distribution<ValueType>,
		action: Option<String>,
	) -> Result<usize> {
		self.mdp.add_labelled_choice(state, dist, action)
	}

	pub fn add_initial_state(&mut self, state: usize) -> Result<()> {
		self.mdp.add_initial_state(state)
	}

	pub fn build(self) -> Result<Stpg<ValueType>> {
		Ok(Stpg {
			mdp: self.mdp.build()?,
			players: self.players,
		})
	}
}

#[cfg(test)]
mod stpg_tests {
	use super::*;

	#[test]
	fn player_tags() {
		assert_eq!(Player::try_from(1), Ok(Player::One));
		assert_eq!(Player::try_from(2), Ok(Player::Two));
		assert_eq!(Player::try_from(0), Err(CheckError::InvalidPlayer(0)));
		assert_eq!(Player::try_from(3), Err(CheckError::InvalidPlayer(3)));
		assert_eq!(Player::Two.tag(), 2);
	}

	#[test]
	fn bulk_states_default_to_player_one() {
		let mut builder = StpgBuilder::<f64>::new();
		builder.add_states(3);
		let p2 = builder.add_state_for(2).unwrap();
		assert_eq!(p2, 3);
		for s in 0..3 {
			assert_eq!(builder.player(s), Some(Player::One));
		}
		assert_eq!(builder.player(3), Some(Player::Two));
	}

	#[test]
	fn invalid_player_keeps_label() {
		let mut builder = StpgBuilder::<f64>::new();
		builder.add_state_for(2).unwrap();
		assert_eq!(builder.set_player(0, 7), Err(CheckError::InvalidPlayer(7)));
		assert_eq!(builder.player(0), Some(Player::Two));

		builder.add_choice(0, Distribution::dirac(0)).unwrap();
		let mut game = builder.build().unwrap();
		assert_eq!(game.set_player(0, -1), Err(CheckError::InvalidPlayer(-1)));
		assert_eq!(game.owner(0), Player::Two);
		game.set_player(0, 1).unwrap();
		assert_eq!(game.owner(0), Player::One);
		assert!(matches!(
			game.set_player(4, 1),
			Err(CheckError::StateOutOfRange { state: 4, .. })
		));
	}

	#[test]
	fn add_states_for_is_all_or_nothing() {
		let mut builder = StpgBuilder::<f64>::new();
		assert_eq!(
			builder.add_states_for(&[1, 2, 5]),
			Err(CheckError::InvalidPlayer(5))
		);
		assert_eq!(builder.num_states(), 0);
		assert_eq!(builder.add_states_for(&[1, 2]).unwrap(), 0..2);
		assert_eq!(builder.player(1), Some(Player::Two));
	}

	#[test]
	fn display_lists_owners() {
		let mut builder = StpgBuilder::<f64>::new();
		builder.add_state();
		builder.add_state_for(2).unwrap();
		builder
			.add_labelled_choice(0, Distribution::dirac(1), Some("a".to_string()))
			.unwrap();
		builder.add_choice(1, Distribution::dirac(1)).unwrap();
		let game = builder.build().unwrap();
		assert_eq!(game.to_string(), "[ 0(P-1): [a:{1: 1}], 1(P-2): [{1: 1}] ]");
	}
}
