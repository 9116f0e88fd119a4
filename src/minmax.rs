//! The min/max matrix-vector engine. Every routine is a free function over `NondetModel`, so
//! MDPs, games and CTMDPs share one implementation; for games the direction applied at a state
//! depends on its owner.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::labels::StateSet;
use crate::matrix::CheckableNumber;
use crate::model::NondetModel;
use crate::rewards::ExplicitRewards;
use crate::settings::TermCrit;
use crate::stpg::Player;

/// Absolute distance within which a choice counts as attaining an optimal value
pub const TIE_TOLERANCE: f64 = 1e-12;

/// Whether a player minimises or maximises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
	Min,
	Max,
}

impl Direction {
	pub fn is_min(self) -> bool {
		self == Self::Min
	}

	/// True if `candidate` is strictly better than `best`. Strictness is what makes the first
	/// optimal choice win ties.
	fn improves<ValueType: PartialOrd>(self, candidate: ValueType, best: ValueType) -> bool {
		match self {
			Self::Min => candidate < best,
			Self::Max => candidate > best,
		}
	}
}

impl std::fmt::Display for Direction {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Min => write!(f, "min"),
			Self::Max => write!(f, "max"),
		}
	}
}

/// The optimisation direction of each player. For models without a second player only
/// `player1` matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinMax {
	pub player1: Direction,
	pub player2: Direction,
}

impl MinMax {
	/// Both players minimise
	pub fn min() -> Self {
		Self::game(Direction::Min, Direction::Min)
	}

	/// Both players maximise
	pub fn max() -> Self {
		Self::game(Direction::Max, Direction::Max)
	}

	pub fn game(player1: Direction, player2: Direction) -> Self {
		Self { player1, player2 }
	}

	/// From `min1`/`min2` flags (`true` meaning minimise)
	pub fn from_flags(min1: bool, min2: bool) -> Self {
		let direction = |min| if min { Direction::Min } else { Direction::Max };
		Self::game(direction(min1), direction(min2))
	}

	/// The direction applied at a state owned by `player`
	pub fn direction_for(&self, player: Player) -> Direction {
		match player {
			Player::One => self.player1,
			Player::Two => self.player2,
		}
	}

	/// The universal-quantifier flags for the qualitative precomputation: a minimising player
	/// must be beaten on every choice, a maximising one on some choice.
	pub fn forall_flags(&self) -> (bool, bool) {
		(self.player1.is_min(), self.player2.is_min())
	}
}

impl std::fmt::Display for MinMax {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		if self.player1 == self.player2 {
			write!(f, "{}", self.player1)
		} else {
			write!(f, "{}{}", self.player1, self.player2)
		}
	}
}

/// True if `state` is operated on, given an optional subset and whether to take its complement
#[inline]
pub(crate) fn in_subset(subset: Option<&StateSet>, complement: bool, state: usize) -> bool {
	match subset {
		None => true,
		Some(set) => set.contains(state) != complement,
	}
}

/// `Σ_succ P(state, choice, succ) · vect[succ]`, plus the step reward if `rewards` is given
pub fn choice_value<ValueType, M>(
	model: &M,
	state: usize,
	choice: usize,
	vect: &[ValueType],
	rewards: Option<&ExplicitRewards<ValueType>>,
) -> ValueType
where
	ValueType: CheckableNumber,
	M: NondetModel<ValueType> + ?Sized,
{
	let expected: ValueType = model
		.choice(state, choice)
		.iter()
		.map(|(succ, prob)| *prob * vect[succ])
		.sum();
	match rewards {
		Some(rewards) => expected + rewards.step_reward(state, choice),
		None => expected,
	}
}

/// The best value over all choices at `state`, and the first choice attaining it. A state
/// without choices has value zero and no choice.
pub fn optimal_value<ValueType, M>(
	model: &M,
	state: usize,
	vect: &[ValueType],
	direction: Direction,
	rewards: Option<&ExplicitRewards<ValueType>>,
) -> (ValueType, Option<usize>)
where
	ValueType: CheckableNumber,
	M: NondetModel<ValueType> + ?Sized,
{
	best_choice(model.num_choices(state), direction, |choice| {
		choice_value(model, state, choice, vect, rewards)
	})
}

fn best_choice<ValueType, F>(
	num_choices: usize,
	direction: Direction,
	value_of: F,
) -> (ValueType, Option<usize>)
where
	ValueType: CheckableNumber,
	F: Fn(usize) -> ValueType,
{
	let mut best: Option<(ValueType, usize)> = None;
	for choice in 0..num_choices {
		let value = value_of(choice);
		best = match best {
			Some((best_value, _)) if !direction.improves(value, best_value) => best,
			_ => Some((value, choice)),
		};
	}
	match best {
		Some((value, choice)) => (value, Some(choice)),
		None => (ValueType::zero(), None),
	}
}

/// The value of a choice with its self-loop solved for, i.e. the reward plus the mass sent to
/// other states, divided by `1 - P(state, choice, state)`. A choice that only loops gets the
/// reward alone.
fn self_loop_choice_value<ValueType, M>(
	model: &M,
	state: usize,
	choice: usize,
	vect: &[ValueType],
	rewards: Option<&ExplicitRewards<ValueType>>,
) -> ValueType
where
	ValueType: CheckableNumber,
	M: NondetModel<ValueType> + ?Sized,
{
	let mut sum = rewards.map_or(ValueType::zero(), |rewards| rewards.step_reward(state, choice));
	let mut diag = ValueType::one();
	for (succ, prob) in model.choice(state, choice).iter() {
		if succ == state {
			diag -= *prob;
		} else {
			sum += *prob * vect[succ];
		}
	}
	if diag > ValueType::zero() {
		sum / diag
	} else {
		sum
	}
}

/// Every choice at `state` whose value is within `TIE_TOLERANCE` of `value`, in choice order
pub fn optimal_choices<ValueType, M>(
	model: &M,
	state: usize,
	vect: &[ValueType],
	rewards: Option<&ExplicitRewards<ValueType>>,
	value: ValueType,
) -> Vec<usize>
where
	ValueType: CheckableNumber,
	M: NondetModel<ValueType> + ?Sized,
{
	let tolerance = ValueType::constant(TIE_TOLERANCE);
	(0..model.num_choices(state))
		.filter(|choice| {
			(choice_value(model, state, *choice, vect, rewards) - value).abs() <= tolerance
		})
		.collect()
}

/// One Jacobi step: `result[s] = opt_c Σ P(s, c, ·) · vect` for the selected states. Other
/// entries of `result` are left alone. If `adv` is given, it receives the chosen choice of every
/// selected state.
pub fn mv_mult_min_max<ValueType, M>(
	model: &M,
	vect: &[ValueType],
	minmax: MinMax,
	result: &mut [ValueType],
	subset: Option<&StateSet>,
	complement: bool,
	adv: Option<&mut [Option<usize>]>,
) where
	ValueType: CheckableNumber,
	M: NondetModel<ValueType> + ?Sized,
{
	mv_mult_rew_min_max(model, vect, None, minmax, result, subset, complement, adv)
}

/// `mv_mult_min_max` with an optional reward added to every step
#[allow(clippy::too_many_arguments)]
pub fn mv_mult_rew_min_max<ValueType, M>(
	model: &M,
	vect: &[ValueType],
	rewards: Option<&ExplicitRewards<ValueType>>,
	minmax: MinMax,
	result: &mut [ValueType],
	subset: Option<&StateSet>,
	complement: bool,
	mut adv: Option<&mut [Option<usize>]>,
) where
	ValueType: CheckableNumber,
	M: NondetModel<ValueType> + ?Sized,
{
	for state in (0..model.num_states()).filter(|s| in_subset(subset, complement, *s)) {
		let direction = minmax.direction_for(model.owner(state));
		let (value, choice) = optimal_value(model, state, vect, direction, rewards);
		result[state] = value;
		if let Some(adv) = adv.as_deref_mut() {
			adv[state] = choice;
		}
	}
}

/// The Jacobi step computed on the rayon thread pool. Within a step every state only reads
/// `vect`, so the result is identical to `mv_mult_rew_min_max`.
#[allow(clippy::too_many_arguments)]
pub fn par_mv_mult_min_max<ValueType, M>(
	model: &M,
	vect: &[ValueType],
	rewards: Option<&ExplicitRewards<ValueType>>,
	minmax: MinMax,
	result: &mut [ValueType],
	subset: Option<&StateSet>,
	complement: bool,
	adv: Option<&mut [Option<usize>]>,
) where
	ValueType: CheckableNumber,
	M: NondetModel<ValueType> + Sync + ?Sized,
{
	let update = |state: usize| {
		if in_subset(subset, complement, state) {
			let direction = minmax.direction_for(model.owner(state));
			Some(optimal_value(model, state, vect, direction, rewards))
		} else {
			None
		}
	};
	match adv {
		Some(adv) => result
			.par_iter_mut()
			.zip(adv.par_iter_mut())
			.enumerate()
			.for_each(|(state, (out, adv_out))| {
				if let Some((value, choice)) = update(state) {
					*out = value;
					*adv_out = choice;
				}
			}),
		None => result.par_iter_mut().enumerate().for_each(|(state, out)| {
			if let Some((value, _)) = update(state) {
				*out = value;
			}
		}),
	}
}

/// How much a value moved from `old` to `new`. The relative change divides by the new value,
/// falling back to the absolute change when the new value is zero.
pub fn change<ValueType>(old: ValueType, new: ValueType, term_crit: TermCrit) -> ValueType
where
	ValueType: CheckableNumber,
{
	let diff = (new - old).abs();
	match term_crit {
		TermCrit::Absolute => diff,
		TermCrit::Relative if new == ValueType::zero() => diff,
		TermCrit::Relative => diff / new.abs(),
	}
}

/// The largest change between two solution vectors over the selected states
pub fn max_change<ValueType>(
	old: &[ValueType],
	new: &[ValueType],
	subset: Option<&StateSet>,
	complement: bool,
	term_crit: TermCrit,
) -> ValueType
where
	ValueType: CheckableNumber,
{
	old.iter()
		.zip(new)
		.enumerate()
		.filter(|(state, _)| in_subset(subset, complement, *state))
		.map(|(_, (old, new))| change(*old, *new, term_crit))
		.fold(ValueType::zero(), |max, diff| max.max(diff))
}

/// One Gauss-Seidel pass: states are updated in place in index order, so later states see the
/// new values of earlier ones. Each choice solves for its own self-loop, so a state that mostly
/// loops settles in one pass. Returns the largest change made.
pub fn mv_mult_gs_min_max<ValueType, M>(
	model: &M,
	vect: &mut [ValueType],
	minmax: MinMax,
	subset: Option<&StateSet>,
	complement: bool,
	term_crit: TermCrit,
) -> ValueType
where
	ValueType: CheckableNumber,
	M: NondetModel<ValueType> + ?Sized,
{
	mv_mult_gs_rew_min_max(model, vect, None, minmax, subset, complement, term_crit)
}

/// `mv_mult_gs_min_max` with an optional reward added to every step
pub fn mv_mult_gs_rew_min_max<ValueType, M>(
	model: &M,
	vect: &mut [ValueType],
	rewards: Option<&ExplicitRewards<ValueType>>,
	minmax: MinMax,
	subset: Option<&StateSet>,
	complement: bool,
	term_crit: TermCrit,
) -> ValueType
where
	ValueType: CheckableNumber,
	M: NondetModel<ValueType> + ?Sized,
{
	let mut max_diff = ValueType::zero();
	for state in (0..model.num_states()).filter(|s| in_subset(subset, complement, *s)) {
		let direction = minmax.direction_for(model.owner(state));
		let (value, _) = best_choice(model.num_choices(state), direction, |choice| {
			self_loop_choice_value(model, state, choice, vect, rewards)
		});
		max_diff = max_diff.max(change(vect[state], value, term_crit));
		vect[state] = value;
	}
	max_diff
}

#[cfg(test)]
mod minmax_tests {
	use super::*;
	use crate::labels;
	use crate::matrix::Distribution;
	use crate::model::{Mdp, MdpBuilder};
	use crate::rewards::RewardsBuilder;
	use crate::stpg::StpgBuilder;

	/// State 0 may move to the absorbing target 1 or loop on itself
	fn escape_or_loop() -> Mdp<f64> {
		let mut builder = MdpBuilder::new();
		builder.add_states(2);
		builder.add_choice(0, Distribution::dirac(1)).unwrap();
		builder.add_choice(0, Distribution::dirac(0)).unwrap();
		builder.add_choice(1, Distribution::dirac(1)).unwrap();
		builder.build().unwrap()
	}

	#[test]
	fn min_max_single_step() {
		let mdp = escape_or_loop();
		let vect = vec![0.0, 1.0];
		let target = labels::from_indices(2, [1]);
		let mut result = vect.clone();
		let mut adv = vec![None; 2];
		let max = MinMax::max();
		mv_mult_min_max(&mdp, &vect, max, &mut result, Some(&target), true, Some(&mut adv));
		assert_eq!(result, vec![1.0, 1.0]);
		assert_eq!(adv, vec![Some(0), None]);

		let mut result = vect.clone();
		let min = MinMax::min();
		mv_mult_min_max(&mdp, &vect, min, &mut result, Some(&target), true, Some(&mut adv));
		assert_eq!(result, vec![0.0, 1.0]);
		assert_eq!(adv[0], Some(1));
	}

	#[test]
	fn first_choice_wins_ties() {
		let mut builder = MdpBuilder::new();
		builder.add_states(3);
		builder.add_choice(0, Distribution::dirac(1)).unwrap();
		builder.add_choice(0, Distribution::dirac(2)).unwrap();
		builder.add_choice(1, Distribution::dirac(1)).unwrap();
		builder.add_choice(2, Distribution::dirac(2)).unwrap();
		let mdp: Mdp<f64> = builder.build().unwrap();
		let vect = vec![0.0, 0.5, 0.5];
		assert_eq!(optimal_value(&mdp, 0, &vect, Direction::Max, None), (0.5, Some(0)));
		assert_eq!(optimal_value(&mdp, 0, &vect, Direction::Min, None), (0.5, Some(0)));
		assert_eq!(optimal_choices(&mdp, 0, &vect, None, 0.5), vec![0, 1]);
	}

	#[test]
	fn no_choices_is_zero() {
		let mut builder = MdpBuilder::<f64>::new();
		builder.add_state();
		let mdp = builder.build().unwrap();
		assert_eq!(optimal_value(&mdp, 0, &[1.0], Direction::Max, None), (0.0, None));
	}

	#[test]
	fn players_pick_their_own_direction() {
		// State 0 (player 1) chooses between states 1 and 2, both owned by player 2, which each
		// choose between the winning state 3 and the losing state 4.
		let mut builder = StpgBuilder::new();
		builder.add_state_for(1).unwrap();
		builder.add_states_for(&[2, 2]).unwrap();
		builder.add_states(2);
		builder.add_choice(0, Distribution::dirac(1)).unwrap();
		builder.add_choice(0, Distribution::dirac(2)).unwrap();
		builder.add_choice(1, Distribution::dirac(3)).unwrap();
		builder.add_choice(1, Distribution::dirac(4)).unwrap();
		builder
			.add_choice(2, Distribution::from_pairs([(3, 0.5), (4, 0.5)]))
			.unwrap();
		builder.add_choice(3, Distribution::dirac(3)).unwrap();
		builder.add_choice(4, Distribution::dirac(4)).unwrap();
		let game = builder.build().unwrap();

		let vect = vec![0.0, 0.0, 0.0, 1.0, 0.0];
		let mut step = vect.clone();
		let unknown = labels::from_indices(5, [1, 2]);
		let minmax = MinMax::game(Direction::Max, Direction::Min);
		mv_mult_min_max(&game, &vect, minmax, &mut step, Some(&unknown), false, None);
		assert_eq!(step[1], 0.0);
		assert_eq!(step[2], 0.5);
		let (value, choice) = optimal_value(&game, 0, &step, Direction::Max, None);
		assert_eq!((value, choice), (0.5, Some(1)));
	}

	#[test]
	fn rewards_are_added() {
		let mdp = escape_or_loop();
		let mut builder = RewardsBuilder::new("steps", 2);
		builder.set_state_reward(0, 1.0).unwrap();
		builder.set_choice_reward(0, 1, 0.5).unwrap();
		let rewards = builder.build();
		let vect = vec![2.0, 0.0];
		let mut result = vec![0.0; 2];
		let rewards = Some(&rewards);
		mv_mult_rew_min_max(&mdp, &vect, rewards, MinMax::max(), &mut result, None, false, None);
		// choice 0: 0 + 1; choice 1: 2 + 1 + 0.5
		assert_eq!(result[0], 3.5);
		assert_eq!(result[1], 0.0);
		mv_mult_rew_min_max(&mdp, &vect, rewards, MinMax::min(), &mut result, None, false, None);
		assert_eq!(result[0], 1.0);
	}

	#[test]
	fn parallel_matches_sequential() {
		let mut builder = MdpBuilder::new();
		let n = 64;
		builder.add_states(n);
		for s in 0..n {
			builder
				.add_choice(s, Distribution::from_pairs([((s + 1) % n, 0.5), ((s * 7) % n, 0.5)]))
				.unwrap();
			builder.add_choice(s, Distribution::dirac((s + 3) % n)).unwrap();
		}
		let mdp: Mdp<f64> = builder.build().unwrap();
		let vect: Vec<f64> = (0..n).map(|s| (s as f64) / (n as f64)).collect();
		let subset = labels::from_indices(n, (0..n).filter(|s| s % 3 != 0));
		for minmax in [MinMax::min(), MinMax::max()] {
			let mut seq = vec![-1.0; n];
			let mut par = vec![-1.0; n];
			let mut seq_adv = vec![None; n];
			let mut par_adv = vec![None; n];
			let subset = Some(&subset);
			mv_mult_min_max(&mdp, &vect, minmax, &mut seq, subset, false, Some(&mut seq_adv));
			let par_adv_out = Some(par_adv.as_mut_slice());
			par_mv_mult_min_max(&mdp, &vect, None, minmax, &mut par, subset, false, par_adv_out);
			assert_eq!(seq, par);
			assert_eq!(seq_adv, par_adv);
			assert_eq!(seq[0], -1.0);
		}
	}

	#[test]
	fn gauss_seidel_sees_updated_values() {
		// 2 -> 1 -> 0, with 0 the target
		let mut builder = MdpBuilder::new();
		builder.add_states(3);
		builder.add_choice(0, Distribution::dirac(0)).unwrap();
		builder.add_choice(1, Distribution::dirac(0)).unwrap();
		builder.add_choice(2, Distribution::dirac(1)).unwrap();
		let mdp: Mdp<f64> = builder.build().unwrap();
		let target = labels::from_indices(3, [0]);

		let jacobi_in = vec![1.0, 0.0, 0.0];
		let mut jacobi_out = jacobi_in.clone();
		let max = MinMax::max();
		mv_mult_min_max(&mdp, &jacobi_in, max, &mut jacobi_out, Some(&target), true, None);
		assert_eq!(jacobi_out, vec![1.0, 1.0, 0.0]);

		let mut gs = vec![1.0, 0.0, 0.0];
		let diff = mv_mult_gs_min_max(&mdp, &mut gs, max, Some(&target), true, TermCrit::Absolute);
		assert_eq!(gs, vec![1.0, 1.0, 1.0]);
		assert_eq!(diff, 1.0);
		let diff = mv_mult_gs_min_max(&mdp, &mut gs, max, Some(&target), true, TermCrit::Relative);
		assert_eq!(diff, 0.0);
	}

	#[test]
	fn gauss_seidel_solves_self_loops() {
		// 0 -> {0: 0.5, 1: 0.5} or a pure loop, with 1 the target
		let mut builder = MdpBuilder::new();
		builder.add_states(2);
		builder
			.add_choice(0, Distribution::from_pairs([(0, 0.5), (1, 0.5)]))
			.unwrap();
		builder.add_choice(0, Distribution::dirac(0)).unwrap();
		builder.add_choice(1, Distribution::dirac(1)).unwrap();
		let mdp: Mdp<f64> = builder.build().unwrap();
		let target = labels::from_indices(2, [1]);

		let crit = TermCrit::Absolute;
		let mut gs = vec![0.0, 1.0];
		let diff = mv_mult_gs_min_max(&mdp, &mut gs, MinMax::max(), Some(&target), true, crit);
		assert_eq!(gs, vec![1.0, 1.0]);
		assert_eq!(diff, 1.0);

		// The pure loop never reaches the target
		let mut gs = vec![0.0, 1.0];
		mv_mult_gs_min_max(&mdp, &mut gs, MinMax::min(), Some(&target), true, crit);
		assert_eq!(gs, vec![0.0, 1.0]);
	}

	#[test]
	fn gauss_seidel_adds_rewards() {
		// 0 -> {0: 0.5, 1: 0.5} or a pure loop, 2 -> 0, with 1 the target
		let mut builder = MdpBuilder::new();
		builder.add_states(3);
		builder
			.add_choice(0, Distribution::from_pairs([(0, 0.5), (1, 0.5)]))
			.unwrap();
		builder.add_choice(0, Distribution::dirac(0)).unwrap();
		builder.add_choice(1, Distribution::dirac(1)).unwrap();
		builder.add_choice(2, Distribution::dirac(0)).unwrap();
		let mdp: Mdp<f64> = builder.build().unwrap();
		let target = labels::from_indices(3, [1]);
		let mut rewards = RewardsBuilder::new("steps", 3);
		rewards.set_state_reward(0, 1.0).unwrap();
		rewards.set_choice_reward(2, 0, 0.5).unwrap();
		let rewards = rewards.build();

		// Expected steps through the coin: 1 / 0.5. State 2 sees the new value of 0.
		let mut gs = vec![0.0; 3];
		let diff = mv_mult_gs_rew_min_max(
			&mdp,
			&mut gs,
			Some(&rewards),
			MinMax::max(),
			Some(&target),
			true,
			TermCrit::Absolute,
		);
		assert_eq!(gs, vec![2.0, 0.0, 2.5]);
		assert_eq!(diff, 2.5);

		let mut gs = vec![0.0; 3];
		mv_mult_gs_rew_min_max(
			&mdp,
			&mut gs,
			Some(&rewards),
			MinMax::min(),
			Some(&target),
			true,
			TermCrit::Absolute,
		);
		assert_eq!(gs, vec![1.0, 0.0, 1.5]);
	}

	#[test]
	fn change_measures() {
		assert_eq!(change(0.5, 1.0, TermCrit::Absolute), 0.5);
		assert_eq!(change(0.5, 1.0, TermCrit::Relative), 0.5);
		assert_eq!(change(0.5, 0.25, TermCrit::Relative), 1.0);
		assert_eq!(change(0.5, 0.0, TermCrit::Relative), 0.5);
		let subset = labels::from_indices(3, [1]);
		assert_eq!(
			max_change(
				&[0.0, 0.0, 0.0],
				&[1.0, 0.25, 1.0],
				Some(&subset),
				false,
				TermCrit::Absolute
			),
			0.25
		);
		assert_eq!(
			max_change(&[0.0, 0.0, 0.0], &[1.0, 0.25, 1.0], None, false, TermCrit::Absolute),
			1.0
		);
	}

	#[test]
	fn flags_and_display() {
		assert_eq!(MinMax::from_flags(true, false), MinMax::game(Direction::Min, Direction::Max));
		assert_eq!(MinMax::from_flags(true, false).forall_flags(), (true, false));
		assert_eq!(MinMax::min().direction_for(Player::Two), Direction::Min);
		assert_eq!(MinMax::max().to_string(), "max");
		assert_eq!(MinMax::game(Direction::Max, Direction::Min).to_string(), "maxmin");
	}
}
