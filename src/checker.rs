//! The probabilistic checker: bounded (and unbounded) reachability over MDPs, games and CTMDPs.

use std::time::{Duration, Instant};

use crate::ctmdp::Ctmdp;
use crate::diagnostics::{DiagnosticsSink, LogSink};
use crate::error::{CheckError, Result};
use crate::labels::{self, Labels, StateSet};
use crate::matrix::CheckableNumber;
use crate::minmax::{self, MinMax};
use crate::model::{ExplicitModel, ModelType, NondetModel};
use crate::poisson::FoxGlynnBound;
use crate::property::{BoundedUntil, Interval, StepBound, TimeBound};
use crate::qualitative;
use crate::settings::{CheckerSettings, CtmdpMethod, SolveMethod};

/// Sends a formatted message at the given level to the checker's sink
macro_rules! report {
	($checker:expr, $level:ident, $($arg:tt)*) => {
		$checker
			.sink
			.message(log::Level::$level, format_args!($($arg)*))
	};
}

/// The outcome of one checker call
#[derive(Clone, Debug)]
pub struct ModelCheckerResult<ValueType>
where
	ValueType: CheckableNumber,
{
	/// The probability of every state
	pub soln: Vec<ValueType>,
	/// The solution of the previous iteration, if any iteration was performed
	pub last_soln: Option<Vec<ValueType>>,
	pub num_iters: usize,
	pub time_taken: Duration,
	/// The choice taken in every state (last round for bounded properties), if requested
	pub strategy: Option<Vec<Option<usize>>>,
}

impl<ValueType> ModelCheckerResult<ValueType>
where
	ValueType: CheckableNumber,
{
	/// The probability of `state`
	pub fn value(&self, state: usize) -> ValueType {
		self.soln[state]
	}
}

/// Copies `set` into a set sized for `num_states`, failing if it names a state outside the model
fn restrict(set: &StateSet, num_states: usize) -> Result<StateSet> {
	match set.iter().find(|s| *s >= num_states) {
		Some(state) => Err(CheckError::StateOutOfRange { state, num_states }),
		None => Ok(labels::from_indices(num_states, set.iter())),
	}
}

/// Non-target states in `remain` that are not known to be decided
fn unknown_states(
	num_states: usize,
	remain: Option<&StateSet>,
	decided: &StateSet,
	no: Option<&StateSet>,
) -> StateSet {
	let settled = match no {
		Some(no) => labels::union(decided, no, num_states),
		None => labels::from_indices(num_states, decided.iter()),
	};
	match remain {
		Some(remain) => labels::difference(remain, &settled, num_states),
		None => labels::complement(&settled, num_states),
	}
}

/// Computes reachability probabilities with the engine in `minmax`. All entry points validate
/// their inputs and never modify the model.
pub struct ProbChecker {
	settings: CheckerSettings,
	sink: Box<dyn DiagnosticsSink>,
}

impl Default for ProbChecker {
	fn default() -> Self {
		Self::new(CheckerSettings::default())
	}
}

impl ProbChecker {
	/// A checker reporting through the `log` crate
	pub fn new(settings: CheckerSettings) -> Self {
		Self {
			settings,
			sink: Box::new(LogSink::default()),
		}
	}

	/// Replaces the diagnostics sink
	pub fn with_sink<S>(mut self, sink: S) -> Self
	where
		S: DiagnosticsSink + 'static,
	{
		self.sink = Box::new(sink);
		self
	}

	pub fn settings(&self) -> &CheckerSettings {
		&self.settings
	}

	pub fn settings_mut(&mut self) -> &mut CheckerSettings {
		&mut self.settings
	}

	/// The answer to a zero bound: 1 on the target, 0 elsewhere, no iterations
	fn indicator_result<ValueType>(
		&self,
		target: &StateSet,
		num_states: usize,
	) -> Result<ModelCheckerResult<ValueType>>
	where
		ValueType: CheckableNumber,
	{
		let target = restrict(target, num_states)?;
		Ok(ModelCheckerResult {
			soln: labels::indicator(&target, num_states),
			last_soln: None,
			num_iters: 0,
			time_taken: Duration::ZERO,
			strategy: self
				.settings
				.export_strategy
				.then(|| vec![None; num_states]),
		})
	}

	/// One Jacobi round over `unknown`, on the thread pool if so configured
	fn jacobi_step<ValueType, M>(
		&self,
		model: &M,
		vect: &[ValueType],
		minmax: MinMax,
		result: &mut [ValueType],
		unknown: &StateSet,
		adv: Option<&mut [Option<usize>]>,
	) where
		ValueType: CheckableNumber,
		M: NondetModel<ValueType> + Sync + ?Sized,
	{
		if self.settings.parallel {
			minmax::par_mv_mult_min_max(
				model,
				vect,
				None,
				minmax,
				result,
				Some(unknown),
				false,
				adv,
			);
		} else {
			minmax::mv_mult_min_max(model, vect, minmax, result, Some(unknown), false, adv);
		}
	}

	/// `remain U<=bound target` for an MDP or a game
	pub fn bounded_until<ValueType, M>(
		&self,
		model: &M,
		remain: Option<&StateSet>,
		target: &StateSet,
		bound: StepBound,
		minmax: MinMax,
	) -> Result<ModelCheckerResult<ValueType>>
	where
		ValueType: CheckableNumber,
		M: NondetModel<ValueType> + Sync + ?Sized,
	{
		let steps = bound.steps()?;
		if steps == 0 {
			return self.indicator_result(target, model.num_states());
		}
		self.compute_bounded_until_probs(model, remain, target, steps, minmax)
	}

	/// `remain U<=k target` without a starting vector
	pub fn compute_bounded_until_probs<ValueType, M>(
		&self,
		model: &M,
		remain: Option<&StateSet>,
		target: &StateSet,
		k: usize,
		minmax: MinMax,
	) -> Result<ModelCheckerResult<ValueType>>
	where
		ValueType: CheckableNumber,
		M: NondetModel<ValueType> + Sync + ?Sized,
	{
		self.compute_bounded_reach_probs(model, remain, target, k, minmax, None, None)
	}

	/// Runs exactly `k` Jacobi rounds. Target states are fixed at 1, states outside `remain` at 0,
	/// and the rest start from `init` (or 0). If `results` is given it receives the value of the
	/// initial state before the first and after every round.
	#[allow(clippy::too_many_arguments)]
	pub fn compute_bounded_reach_probs<ValueType, M>(
		&self,
		model: &M,
		remain: Option<&StateSet>,
		target: &StateSet,
		k: usize,
		minmax: MinMax,
		init: Option<&[ValueType]>,
		mut results: Option<&mut Vec<ValueType>>,
	) -> Result<ModelCheckerResult<ValueType>>
	where
		ValueType: CheckableNumber,
		M: NondetModel<ValueType> + Sync + ?Sized,
	{
		let start = Instant::now();
		let n = model.num_states();
		let target = restrict(target, n)?;
		let remain = remain.map(|set| restrict(set, n)).transpose()?;
		if let Some(init) = init {
			if init.len() != n {
				return Err(CheckError::DimensionMismatch {
					what: "initial solution vector",
					expected: n,
					actual: init.len(),
				});
			}
		}
		report!(self, Info, "Starting bounded probabilistic reachability ({minmax})...");

		// A starting vector may hold anything, so the zero states are only known without one
		let no = if self.settings.precomputation && init.is_none() {
			let no = qualitative::prob0(model, remain.as_ref(), &target, minmax);
			report!(self, Info, "target={}, no={}", target.len(), no.len());
			Some(no)
		} else {
			None
		};
		let unknown = unknown_states(n, remain.as_ref(), &target, no.as_ref());

		let mut soln: Vec<ValueType> = (0..n)
			.map(|s| {
				if target.contains(s) {
					ValueType::one()
				} else if unknown.contains(s) {
					init.map_or(ValueType::zero(), |init| init[s])
				} else {
					ValueType::zero()
				}
			})
			.collect();
		let mut soln2 = soln.clone();
		let mut adv = self.settings.export_strategy.then(|| vec![None; n]);
		let init_state = model.initial_state();
		if let Some(results) = results.as_mut() {
			results.clear();
			results.extend(soln.get(init_state).copied());
		}

		for iter in 0..k {
			self.jacobi_step(model, &soln, minmax, &mut soln2, &unknown, adv.as_deref_mut());
			std::mem::swap(&mut soln, &mut soln2);
			if let Some(results) = results.as_mut() {
				results.extend(soln.get(init_state).copied());
			}
			if self.sink.verbose() {
				report!(self, Debug, "Iteration {}: {:?}", iter + 1, soln.get(init_state));
			}
		}

		let time_taken = start.elapsed();
		report!(
			self,
			Info,
			"Bounded probabilistic reachability ({minmax}) took {k} iterations and {:.3} seconds.",
			time_taken.as_secs_f64()
		);
		Ok(ModelCheckerResult {
			soln,
			last_soln: Some(soln2),
			num_iters: k,
			time_taken,
			strategy: adv,
		})
	}

	/// `remain U<=t target` for a CTMDP
	pub fn ctmdp_bounded_until<ValueType>(
		&self,
		ctmdp: &Ctmdp<ValueType>,
		remain: Option<&StateSet>,
		target: &StateSet,
		bound: TimeBound,
		minmax: MinMax,
	) -> Result<ModelCheckerResult<ValueType>>
	where
		ValueType: CheckableNumber,
	{
		bound.validate()?;
		if bound.bound == 0.0 {
			return self.indicator_result(target, ctmdp.num_states());
		}
		self.ctmdp_bounded_reach_probs(ctmdp, remain, target, bound.bound, minmax)
	}

	/// Time-bounded reachability with the method chosen in the settings. Both methods need a
	/// locally uniform CTMDP.
	pub fn ctmdp_bounded_reach_probs<ValueType>(
		&self,
		ctmdp: &Ctmdp<ValueType>,
		remain: Option<&StateSet>,
		target: &StateSet,
		t: f64,
		minmax: MinMax,
	) -> Result<ModelCheckerResult<ValueType>>
	where
		ValueType: CheckableNumber,
	{
		ctmdp.check_locally_uniform()?;
		match self.settings.ctmdp_method {
			CtmdpMethod::Discretisation => {
				self.discretised_bounded_reach_probs(ctmdp, remain, target, t, minmax)
			}
			CtmdpMethod::Uniformisation => {
				self.uniformised_bounded_reach_probs(ctmdp, remain, target, t, minmax)
			}
		}
	}

	/// Splits `[0, t]` into `k = ceil(q²t²/2ε)` steps of length `tau = t/k` and runs the
	/// discrete loop on the MDP of one such step
	fn discretised_bounded_reach_probs<ValueType>(
		&self,
		ctmdp: &Ctmdp<ValueType>,
		remain: Option<&StateSet>,
		target: &StateSet,
		t: f64,
		minmax: MinMax,
	) -> Result<ModelCheckerResult<ValueType>>
	where
		ValueType: CheckableNumber,
	{
		let q = ctmdp.max_exit_rate().as_f64();
		let epsilon = self.settings.discretisation_epsilon;
		let steps = (q * q * t * t / (2.0 * epsilon)).ceil();
		if !steps.is_finite() || steps < 0.0 || steps > usize::MAX as f64 {
			return Err(CheckError::invalid_bound(t, false));
		}
		let k = steps as usize;
		if k == 0 {
			// Nothing can move
			return self.compute_bounded_until_probs(ctmdp.mdp(), remain, target, 0, minmax);
		}
		let tau = t / k as f64;
		report!(
			self,
			Info,
			"Discretising CTMDP with maximal rate {q} into {k} steps of length {tau}"
		);
		let mdp = ctmdp.build_discretised_mdp(ValueType::constant(tau))?;
		self.compute_bounded_until_probs(&mdp, remain, target, k, minmax)
	}

	/// Sums the Jacobi iterates of the CTMDP, weighted by the Fox-Glynn Poisson weights for
	/// `q·t`. In a locally uniform CTMDP every choice jumps with rate `q`, so the stored jump
	/// distributions already are the uniformised ones. The optimisation is done per step, which
	/// makes this an approximation; discretisation is the primary method.
	fn uniformised_bounded_reach_probs<ValueType>(
		&self,
		ctmdp: &Ctmdp<ValueType>,
		remain: Option<&StateSet>,
		target: &StateSet,
		t: f64,
		minmax: MinMax,
	) -> Result<ModelCheckerResult<ValueType>>
	where
		ValueType: CheckableNumber,
	{
		let start = Instant::now();
		let n = ctmdp.num_states();
		let target = restrict(target, n)?;
		let remain = remain.map(|set| restrict(set, n)).transpose()?;
		let q = ctmdp.max_exit_rate();
		if q == ValueType::zero() {
			return self.indicator_result(&target, n);
		}

		let qt = q * ValueType::constant(t);
		let mut fox_glynn = FoxGlynnBound::fox_glynn(
			qt,
			ValueType::constant(self.settings.fox_glynn_underflow),
			ValueType::constant(self.settings.fox_glynn_overflow),
			ValueType::constant(self.settings.fox_glynn_accuracy()),
		)?;
		fox_glynn.normalize();
		report!(
			self,
			Info,
			"Fox-Glynn (qt = {qt}): left = {}, right = {}",
			fox_glynn.left,
			fox_glynn.right
		);

		let no = self
			.settings
			.precomputation
			.then(|| qualitative::prob0(ctmdp, remain.as_ref(), &target, minmax));
		let unknown = unknown_states(n, remain.as_ref(), &target, no.as_ref());

		let mut soln: Vec<ValueType> = labels::indicator(&target, n);
		let mut soln2 = soln.clone();
		let mut sum = vec![ValueType::zero(); n];
		let mut adv = self.settings.export_strategy.then(|| vec![None; n]);
		let accumulate = |sum: &mut [ValueType], vect: &[ValueType], weight: ValueType| {
			for (total, value) in sum.iter_mut().zip(vect) {
				*total += weight * *value;
			}
		};
		if fox_glynn.left == 0 {
			accumulate(&mut sum, &soln, fox_glynn.weight(0));
		}
		for iter in 1..=fox_glynn.right {
			self.jacobi_step(ctmdp, &soln, minmax, &mut soln2, &unknown, adv.as_deref_mut());
			std::mem::swap(&mut soln, &mut soln2);
			if iter >= fox_glynn.left {
				accumulate(&mut sum, &soln, fox_glynn.weight(iter));
			}
		}

		let time_taken = start.elapsed();
		report!(
			self,
			Info,
			"Uniformised bounded reachability ({minmax}) took {} iterations and {:.3} seconds.",
			fox_glynn.right,
			time_taken.as_secs_f64()
		);
		Ok(ModelCheckerResult {
			soln: sum,
			last_soln: Some(soln),
			num_iters: fox_glynn.right,
			time_taken,
			strategy: adv,
		})
	}

	/// Unbounded `F target`
	pub fn compute_reach_probs<ValueType, M>(
		&self,
		model: &M,
		target: &StateSet,
		minmax: MinMax,
	) -> Result<ModelCheckerResult<ValueType>>
	where
		ValueType: CheckableNumber,
		M: NondetModel<ValueType> + Sync + ?Sized,
	{
		self.compute_until_probs(model, None, target, minmax)
	}

	/// Unbounded `remain U target`, iterated until the largest change drops below
	/// `term_crit_param`
	pub fn compute_until_probs<ValueType, M>(
		&self,
		model: &M,
		remain: Option<&StateSet>,
		target: &StateSet,
		minmax: MinMax,
	) -> Result<ModelCheckerResult<ValueType>>
	where
		ValueType: CheckableNumber,
		M: NondetModel<ValueType> + Sync + ?Sized,
	{
		let start = Instant::now();
		let n = model.num_states();
		let target = restrict(target, n)?;
		let remain = remain.map(|set| restrict(set, n)).transpose()?;
		report!(self, Info, "Starting probabilistic reachability ({minmax})...");

		let (no, yes) = if self.settings.precomputation {
			(
				Some(qualitative::prob0(model, remain.as_ref(), &target, minmax)),
				qualitative::prob1(model, remain.as_ref(), &target, minmax),
			)
		} else {
			(None, target)
		};
		let unknown = unknown_states(n, remain.as_ref(), &yes, no.as_ref());
		report!(
			self,
			Info,
			"yes={}, no={}, maybe={}",
			yes.len(),
			no.as_ref().map_or(0, |no| no.len()),
			unknown.len()
		);

		let term_crit = self.settings.term_crit;
		let threshold = ValueType::constant(self.settings.term_crit_param);
		let mut soln: Vec<ValueType> = labels::indicator(&yes, n);
		let mut last_soln = None;
		let mut iters = 0;
		let mut max_diff = ValueType::infinity();
		match self.settings.solve_method {
			SolveMethod::ValueIteration => {
				let mut soln2 = soln.clone();
				while iters < self.settings.max_iters && !(max_diff < threshold) {
					self.jacobi_step(model, &soln, minmax, &mut soln2, &unknown, None);
					max_diff = minmax::max_change(&soln, &soln2, Some(&unknown), false, term_crit);
					std::mem::swap(&mut soln, &mut soln2);
					iters += 1;
				}
				last_soln = Some(soln2);
			}
			SolveMethod::GaussSeidel => {
				while iters < self.settings.max_iters && !(max_diff < threshold) {
					max_diff = minmax::mv_mult_gs_min_max(
						model,
						&mut soln,
						minmax,
						Some(&unknown),
						false,
						term_crit,
					);
					iters += 1;
				}
			}
		}
		if !(max_diff < threshold) {
			return Err(CheckError::NotConverged {
				iters,
				max_diff: max_diff.as_f64(),
			});
		}

		let strategy = self.settings.export_strategy.then(|| {
			(0..n)
				.map(|s| {
					if unknown.contains(s) {
						let direction = minmax.direction_for(model.owner(s));
						minmax::optimal_value(model, s, &soln, direction, None).1
					} else {
						None
					}
				})
				.collect()
		});

		let time_taken = start.elapsed();
		report!(
			self,
			Info,
			"Probabilistic reachability ({minmax}) took {iters} iterations and {:.3} seconds.",
			time_taken.as_secs_f64()
		);
		Ok(ModelCheckerResult {
			soln,
			last_soln,
			num_iters: iters,
			time_taken,
			strategy,
		})
	}

	/// Resolves the labels of `query` and checks it on `model`
	pub fn check<ValueType>(
		&self,
		model: &ExplicitModel<ValueType>,
		labels: &Labels,
		query: &BoundedUntil,
	) -> Result<ModelCheckerResult<ValueType>>
	where
		ValueType: CheckableNumber,
	{
		if labels.num_states() != model.num_states() {
			return Err(CheckError::DimensionMismatch {
				what: "labelling",
				expected: model.num_states(),
				actual: labels.num_states(),
			});
		}
		let target = labels.states_for(&query.target)?;
		let remain = query
			.remain
			.as_deref()
			.map(|label| labels.states_for(label))
			.transpose()?;
		report!(self, Info, "Model checking: {query}");

		match (model, query.bound) {
			(ExplicitModel::Mdp(mdp), Interval::Steps(bound)) => {
				self.bounded_until(mdp, remain, target, bound, query.minmax)
			}
			(ExplicitModel::Stpg(stpg), Interval::Steps(bound)) => {
				self.bounded_until(stpg, remain, target, bound, query.minmax)
			}
			(ExplicitModel::Ctmdp(ctmdp), Interval::Time(bound)) => {
				self.ctmdp_bounded_until(ctmdp, remain, target, bound, query.minmax)
			}
			(ExplicitModel::Ctmdp(_), Interval::Steps(_)) => Err(CheckError::UnsupportedBound {
				kind: "Step",
				model_type: ModelType::Ctmdp,
			}),
			(model, Interval::Time(_)) => Err(CheckError::UnsupportedBound {
				kind: "Time",
				model_type: model.model_type(),
			}),
		}
	}
}
