//! Continuous-time MDPs: every choice carries an exit rate next to its (normalised) jump
//! distribution.

use std::ops::Range;

use sprs::CsVecView;

use crate::error::{CheckError, Result};
use crate::matrix::{CheckableNumber, Distribution};
use crate::model::{Mdp, MdpBuilder, ModelType, NondetModel};

/// Relative tolerance when comparing exit rates against the maximal rate
pub const UNIFORMITY_TOLERANCE: f64 = 1e-12;

/// An explicit CTMDP. The jump distributions live in an `Mdp`; `exit_rates` is indexed by the
/// same choice rows.
#[derive(Clone, Debug)]
pub struct Ctmdp<ValueType>
where
	ValueType: CheckableNumber,
{
	mdp: Mdp<ValueType>,
	exit_rates: Vec<ValueType>,
}

impl<ValueType> Ctmdp<ValueType>
where
	ValueType: CheckableNumber,
{
	/// The embedded jump structure
	pub fn mdp(&self) -> &Mdp<ValueType> {
		&self.mdp
	}

	/// The exit rate of a state-choice pair
	pub fn exit_rate(&self, state: usize, choice: usize) -> ValueType {
		self.exit_rates[self.mdp.row(state, choice)]
	}

	/// The maximal exit rate over all state-choice pairs (zero for a model without choices)
	pub fn max_exit_rate(&self) -> ValueType {
		self.exit_rates
			.iter()
			.copied()
			.fold(ValueType::zero(), |max, rate| max.max(rate))
	}

	/// True if every state-choice pair has the maximal exit rate
	pub fn is_locally_uniform(&self) -> bool {
		self.check_locally_uniform().is_ok()
	}

	/// Fails with `NotLocallyUniform`, naming the first offending choice, if some exit rate
	/// differs from the maximal one
	pub fn check_locally_uniform(&self) -> Result<()> {
		let max_rate = self.max_exit_rate();
		let tolerance = max_rate * ValueType::constant(UNIFORMITY_TOLERANCE);
		for state in 0..self.num_states() {
			for choice in 0..self.num_choices(state) {
				let rate = self.exit_rate(state, choice);
				if (rate - max_rate).abs() > tolerance {
					return Err(CheckError::NotLocallyUniform {
						state,
						choice,
						rate: rate.as_f64(),
						max_rate: max_rate.as_f64(),
					});
				}
			}
		}
		Ok(())
	}

	/// Builds the MDP describing the model's behaviour over a time step of length `tau`: a choice
	/// with exit rate `E` stays put with probability `exp(-E * tau)` and otherwise jumps
	/// according to its distribution.
	pub fn build_discretised_mdp(&self, tau: ValueType) -> Result<Mdp<ValueType>> {
		self.mdp.map_distributions(|state, choice, dist| {
			let stay = (-self.exit_rate(state, choice) * tau).exp();
			let mut discretised = Distribution::with_capacity(dist.len() + 1);
			for (succ, prob) in dist.iter() {
				discretised.add(succ, (ValueType::one() - stay) * prob);
			}
			discretised.add(state, stay);
			discretised
		})
	}

	/// Builds the uniformised DTMC/MDP for rate `q >= max_exit_rate()`: a choice with exit rate
	/// `E` jumps with probability `E / q` and otherwise stays put.
	pub fn build_uniformised_mdp(&self, q: ValueType) -> Result<Mdp<ValueType>> {
		self.mdp.map_distributions(|state, choice, dist| {
			let jump = self.exit_rate(state, choice) / q;
			let mut uniformised = Distribution::with_capacity(dist.len() + 1);
			for (succ, prob) in dist.iter() {
				uniformised.add(succ, jump * prob);
			}
			if jump < ValueType::one() {
				uniformised.add(state, ValueType::one() - jump);
			}
			uniformised
		})
	}
}

impl<ValueType> NondetModel<ValueType> for Ctmdp<ValueType>
where
	ValueType: CheckableNumber,
{
	fn model_type(&self) -> ModelType {
		ModelType::Ctmdp
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

	fn initial_state(&self) -> usize {
		self.mdp.initial_state()
	}

	fn num_transitions(&self) -> usize {
		self.mdp.num_transitions()
	}
}

/// Incremental construction of a `Ctmdp`
pub struct CtmdpBuilder<ValueType>
where
	ValueType: CheckableNumber,
{
	mdp: MdpBuilder<ValueType>,
	/// Exit rates, per state, in choice order
	rates: Vec<Vec<ValueType>>,
}

impl<ValueType> Default for CtmdpBuilder<ValueType>
where
	ValueType: CheckableNumber,
{
	fn default() -> Self {
		Self::new()
	}
}

impl<ValueType> CtmdpBuilder<ValueType>
where
	ValueType: CheckableNumber,
{
	pub fn new() -> Self {
		Self {
			mdp: MdpBuilder::new(),
			rates: Vec::new(),
		}
	}

	pub fn add_state(&mut self) -> usize {
		self.rates.push(Vec::new());
		self.mdp.add_state()
	}

	pub fn add_states(&mut self, count: usize) -> Range<usize> {
		self.rates.resize_with(self.rates.len() + count, Vec::new);
		self.mdp.add_states(count)
	}

	pub fn add_initial_state(&mut self, state: usize) -> Result<()> {
		self.mdp.add_initial_state(state)
	}

	/// Adds a choice that leaves `state` with `rate` and then jumps according to `dist`
	pub fn add_choice(
		&mut self,
		state: usize,
		dist: Distribution<ValueType>,
		rate: ValueType,
	) -> Result<usize> {
		if !rate.is_finite() || rate <= ValueType::zero() {
			return Err(CheckError::InvalidRate {
				state,
				rate: rate.as_f64(),
			});
		}
		let choice = self.mdp.add_choice(state, dist)?;
		self.rates[state].push(rate);
		Ok(choice)
	}

	/// Adds a choice given as a map of rates to successors. The exit rate is the total rate and
	/// the jump distribution is the rates normalised by it.
	pub fn add_rate_choice(
		&mut self,
		state: usize,
		rates: Distribution<ValueType>,
	) -> Result<usize> {
		let exit_rate = rates.sum();
		let dist =
			Distribution::from_pairs(rates.iter().map(|(succ, rate)| (succ, rate / exit_rate)));
		self.add_choice(state, dist, exit_rate)
	}

	pub fn build(self) -> Result<Ctmdp<ValueType>> {
		let mdp = self.mdp.build()?;
		let exit_rates = self.rates.into_iter().flatten().collect();
		Ok(Ctmdp { mdp, exit_rates })
	}
}

#[cfg(test)]
mod ctmdp_tests {
	use super::*;

	fn two_rates(first: f64, second: f64) -> Ctmdp<f64> {
		let mut builder = CtmdpBuilder::new();
		builder.add_states(2);
		builder.add_choice(0, Distribution::dirac(1), first).unwrap();
		builder.add_choice(0, Distribution::dirac(0), second).unwrap();
		builder.add_choice(1, Distribution::dirac(1), second.max(first)).unwrap();
		builder.build().unwrap()
	}

	#[test]
	fn local_uniformity() {
		let mixed = two_rates(2.0, 5.0);
		assert_eq!(mixed.max_exit_rate(), 5.0);
		assert!(!mixed.is_locally_uniform());
		assert!(matches!(
			mixed.check_locally_uniform(),
			Err(CheckError::NotLocallyUniform { state: 0, choice: 0, .. })
		));

		let uniform = two_rates(5.0, 5.0);
		assert!(uniform.is_locally_uniform());
		assert_eq!(uniform.exit_rate(0, 1), 5.0);
	}

	#[test]
	fn rates_must_be_positive() {
		let mut builder = CtmdpBuilder::<f64>::new();
		builder.add_state();
		assert!(matches!(
			builder.add_choice(0, Distribution::dirac(0), 0.0),
			Err(CheckError::InvalidRate { state: 0, .. })
		));
		assert!(builder.add_choice(0, Distribution::dirac(0), f64::NAN).is_err());
	}

	#[test]
	fn rate_choice_normalises() {
		let mut builder = CtmdpBuilder::<f64>::new();
		builder.add_states(3);
		builder
			.add_rate_choice(0, Distribution::from_pairs([(1, 1.0), (2, 3.0)]))
			.unwrap();
		builder.add_choice(1, Distribution::dirac(1), 4.0).unwrap();
		builder.add_choice(2, Distribution::dirac(2), 4.0).unwrap();
		let ctmdp = builder.build().unwrap();
		assert_eq!(ctmdp.exit_rate(0, 0), 4.0);
		assert_eq!(ctmdp.mdp().distribution(0, 0).get(2), 0.75);
		assert!(ctmdp.is_locally_uniform());
	}

	#[test]
	fn discretisation_keeps_mass() {
		let ctmdp = two_rates(5.0, 5.0);
		let tau = 0.01;
		let mdp = ctmdp.build_discretised_mdp(tau).unwrap();
		let stay = (-5.0f64 * tau).exp();
		let first = mdp.distribution(0, 0);
		assert!((first.get(0) - stay).abs() < 1e-12);
		assert!((first.get(1) - (1.0 - stay)).abs() < 1e-12);
		// The self loop choice collapses into a single entry
		assert!((mdp.distribution(0, 1).get(0) - 1.0).abs() < 1e-12);
		assert_eq!(mdp.num_choices(0), 2);
	}

	#[test]
	fn uniformisation_adds_self_loops() {
		let mut builder = CtmdpBuilder::<f64>::new();
		builder.add_states(2);
		builder.add_choice(0, Distribution::dirac(1), 1.0).unwrap();
		builder.add_choice(1, Distribution::dirac(0), 4.0).unwrap();
		let ctmdp = builder.build().unwrap();
		let mdp = ctmdp.build_uniformised_mdp(4.0).unwrap();
		assert_eq!(mdp.distribution(0, 0).get(1), 0.25);
		assert_eq!(mdp.distribution(0, 0).get(0), 0.75);
		assert_eq!(mdp.distribution(1, 0).get(0), 1.0);
	}
}
