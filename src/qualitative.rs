//! Graph-based precomputation of the states with probability exactly 0 or exactly 1. None of
//! this looks at probabilities beyond whether they are positive.

use sprs::CsVecView;

use crate::labels::{self, StateSet};
use crate::matrix::CheckableNumber;
use crate::minmax::MinMax;
use crate::model::NondetModel;
use crate::stpg::Player;

/// At least one successor of the choice lies in `set`
fn hits<ValueType: CheckableNumber>(row: &CsVecView<'_, ValueType>, set: &StateSet) -> bool {
	row.iter().any(|(succ, prob)| *prob > ValueType::zero() && set.contains(succ))
}

/// Every successor of the choice lies in `set`
fn stays_in<ValueType: CheckableNumber>(row: &CsVecView<'_, ValueType>, set: &StateSet) -> bool {
	row.iter().all(|(succ, prob)| *prob <= ValueType::zero() || set.contains(succ))
}

/// Combines `predicate` over the choices of every state in `subset`, universally where the
/// owner's flag is set and existentially otherwise, and writes the outcome to `result`.
fn quantify<ValueType, M, F>(
	model: &M,
	subset: &StateSet,
	forall1: bool,
	forall2: bool,
	result: &mut StateSet,
	predicate: F,
) where
	ValueType: CheckableNumber,
	M: NondetModel<ValueType> + ?Sized,
	F: Fn(&CsVecView<'_, ValueType>) -> bool,
{
	for state in subset.iter().filter(|s| *s < model.num_states()) {
		let forall = match model.owner(state) {
			Player::One => forall1,
			Player::Two => forall2,
		};
		let mut choices = (0..model.num_choices(state)).map(|c| model.choice(state, c));
		let holds = if forall {
			choices.all(|row| predicate(&row))
		} else {
			choices.any(|row| predicate(&row))
		};
		if holds {
			result.insert(state);
		} else {
			result.remove(state);
		}
	}
}

/// One step of the probability-0 analysis: a state of `subset` is put in `result` if all
/// (`forall`) or some of its choices can move into `u`. Only states in `subset` are written.
pub fn prob0_step<ValueType, M>(
	model: &M,
	subset: &StateSet,
	u: &StateSet,
	forall1: bool,
	forall2: bool,
	result: &mut StateSet,
) where
	ValueType: CheckableNumber,
	M: NondetModel<ValueType> + ?Sized,
{
	quantify(model, subset, forall1, forall2, result, |row| hits(row, u));
}

/// One step of the probability-1 analysis: like `prob0_step`, but a choice only counts if it
/// stays inside `u` and can move into `v`.
pub fn prob1_step<ValueType, M>(
	model: &M,
	subset: &StateSet,
	u: &StateSet,
	v: &StateSet,
	forall1: bool,
	forall2: bool,
	result: &mut StateSet,
) where
	ValueType: CheckableNumber,
	M: NondetModel<ValueType> + ?Sized,
{
	quantify(model, subset, forall1, forall2, result, |row| {
		stays_in(row, u) && hits(row, v)
	});
}

/// The states that still need solving: `remain \ target`, without states that have no choices
fn until_subset<ValueType, M>(model: &M, remain: Option<&StateSet>, target: &StateSet) -> StateSet
where
	ValueType: CheckableNumber,
	M: NondetModel<ValueType> + ?Sized,
{
	let n = model.num_states();
	let candidates = match remain {
		Some(remain) => labels::difference(remain, target, n),
		None => labels::complement(target, n),
	};
	labels::from_indices(n, candidates.iter().filter(|s| model.num_choices(*s) > 0))
}

fn copy(set: &StateSet, num_states: usize) -> StateSet {
	labels::from_indices(num_states, set.iter().filter(|s| *s < num_states))
}

/// The states from which the optimal probability of reaching `target` while staying in `remain`
/// is exactly 0. A minimising player has to be able to avoid the target on every choice, so its
/// quantifier is universal.
pub fn prob0<ValueType, M>(
	model: &M,
	remain: Option<&StateSet>,
	target: &StateSet,
	minmax: MinMax,
) -> StateSet
where
	ValueType: CheckableNumber,
	M: NondetModel<ValueType> + ?Sized,
{
	let n = model.num_states();
	let subset = until_subset(model, remain, target);
	let (forall1, forall2) = minmax.forall_flags();
	// Least fixpoint of the states reaching the target with positive probability
	let mut u = copy(target, n);
	loop {
		let mut next = copy(target, n);
		prob0_step(model, &subset, &u, forall1, forall2, &mut next);
		if labels::same_states(&u, &next) {
			break;
		}
		u = next;
	}
	labels::complement(&u, n)
}

/// The states from which the optimal probability of reaching `target` while staying in `remain`
/// is exactly 1
pub fn prob1<ValueType, M>(
	model: &M,
	remain: Option<&StateSet>,
	target: &StateSet,
	minmax: MinMax,
) -> StateSet
where
	ValueType: CheckableNumber,
	M: NondetModel<ValueType> + ?Sized,
{
	let n = model.num_states();
	let subset = until_subset(model, remain, target);
	let (forall1, forall2) = minmax.forall_flags();
	// Greatest fixpoint over u of the least fixpoint over v
	let mut u = labels::full(n);
	loop {
		let mut v = copy(target, n);
		loop {
			let mut next = copy(target, n);
			prob1_step(model, &subset, &u, &v, forall1, forall2, &mut next);
			if labels::same_states(&v, &next) {
				break;
			}
			v = next;
		}
		if labels::same_states(&u, &v) {
			break;
		}
		u = v;
	}
	u
}
