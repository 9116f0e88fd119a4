//! Options consumed by the checker. Front ends fill these from their flags or from a serialised
//! settings file.

use serde::{Deserialize, Serialize};

/// The iterative method used for unbounded reachability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveMethod {
	/// Jacobi-style value iteration with two buffers
	ValueIteration,
	/// In-place updates in state order
	GaussSeidel,
}

/// How the change between two iterations is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermCrit {
	Absolute,
	Relative,
}

/// How time-bounded CTMDP reachability is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CtmdpMethod {
	/// Discretise into `k` small steps and run the step-bounded loop
	Discretisation,
	/// Fox-Glynn weighted sum of uniformised steps
	Uniformisation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerSettings {
	/// Run the qualitative prob0/prob1 analysis before iterating
	pub precomputation: bool,
	pub solve_method: SolveMethod,
	pub term_crit: TermCrit,
	/// Iteration stops once the largest change is below this
	pub term_crit_param: f64,
	pub max_iters: usize,
	/// Compute Jacobi rounds on the rayon thread pool
	pub parallel: bool,
	pub ctmdp_method: CtmdpMethod,
	/// The error bound `ε` of the discretisation, which sets the step count
	pub discretisation_epsilon: f64,
	pub fox_glynn_underflow: f64,
	pub fox_glynn_overflow: f64,
	/// Overrides the Fox-Glynn accuracy, which is `term_crit_param / 8` by default
	pub fox_glynn_accuracy: Option<f64>,
	/// Keep the choice made in every state of the last round
	pub export_strategy: bool,
}

impl Default for CheckerSettings {
	fn default() -> Self {
		Self {
			precomputation: true,
			solve_method: SolveMethod::ValueIteration,
			term_crit: TermCrit::Absolute,
			term_crit_param: 1e-6,
			max_iters: 10000,
			parallel: false,
			ctmdp_method: CtmdpMethod::Discretisation,
			discretisation_epsilon: 1e-3,
			fox_glynn_underflow: 1e-300,
			fox_glynn_overflow: 1e300,
			fox_glynn_accuracy: None,
			export_strategy: false,
		}
	}
}

impl CheckerSettings {
	/// The accuracy handed to Fox-Glynn
	pub fn fox_glynn_accuracy(&self) -> f64 {
		self.fox_glynn_accuracy
			.unwrap_or(self.term_crit_param / 8.0)
	}

	pub fn with_precomputation(mut self, precomputation: bool) -> Self {
		self.precomputation = precomputation;
		self
	}

	pub fn with_solve_method(mut self, solve_method: SolveMethod) -> Self {
		self.solve_method = solve_method;
		self
	}

	pub fn with_term_crit(mut self, term_crit: TermCrit, term_crit_param: f64) -> Self {
		self.term_crit = term_crit;
		self.term_crit_param = term_crit_param;
		self
	}

	pub fn with_max_iters(mut self, max_iters: usize) -> Self {
		self.max_iters = max_iters;
		self
	}

	pub fn with_parallel(mut self, parallel: bool) -> Self {
		self.parallel = parallel;
		self
	}

	pub fn with_ctmdp_method(mut self, ctmdp_method: CtmdpMethod) -> Self {
		self.ctmdp_method = ctmdp_method;
		self
	}

	pub fn with_discretisation_epsilon(mut self, epsilon: f64) -> Self {
		self.discretisation_epsilon = epsilon;
		self
	}

	pub fn with_fox_glynn_accuracy(mut self, accuracy: f64) -> Self {
		self.fox_glynn_accuracy = Some(accuracy);
		self
	}

	pub fn with_export_strategy(mut self, export_strategy: bool) -> Self {
		self.export_strategy = export_strategy;
		self
	}
}

#[cfg(test)]
mod settings_tests {
	use super::*;

	#[test]
	fn defaults() {
		let settings = CheckerSettings::default();
		assert!(settings.precomputation);
		assert_eq!(settings.ctmdp_method, CtmdpMethod::Discretisation);
		assert_eq!(settings.fox_glynn_accuracy(), 1e-6 / 8.0);
		let settings = settings.with_fox_glynn_accuracy(1e-4);
		assert_eq!(settings.fox_glynn_accuracy(), 1e-4);
	}

	#[test]
	fn missing_fields_take_defaults() {
		let json = r#"{"parallel": true, "ctmdp_method": "Uniformisation"}"#;
		let settings: CheckerSettings = serde_json::from_str(json).unwrap();
		assert!(settings.parallel);
		assert_eq!(settings.ctmdp_method, CtmdpMethod::Uniformisation);
		assert_eq!(settings.max_iters, 10000);
		assert_eq!(settings.term_crit, TermCrit::Absolute);
	}

	#[test]
	fn json_round_trip() {
		let settings = CheckerSettings::default()
			.with_solve_method(SolveMethod::GaussSeidel)
			.with_term_crit(TermCrit::Relative, 1e-8)
			.with_export_strategy(true);
		let json = serde_json::to_string(&settings).unwrap();
		let back: CheckerSettings = serde_json::from_str(&json).unwrap();
		assert_eq!(back, settings);
	}
}
