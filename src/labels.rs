use bitvector::BitVector;

use crate::error::{CheckError, Result};

/// A set of state indices, e.g., the target or remain states of an until formula.
pub type StateSet = BitVector;

/// An empty set with room for `num_states` states
pub fn empty(num_states: usize) -> StateSet {
	BitVector::new(num_states)
}

/// The set of all `num_states` states
pub fn full(num_states: usize) -> StateSet {
	from_indices(num_states, 0..num_states)
}

/// Creates a set from the given state indices
pub fn from_indices<I>(num_states: usize, states: I) -> StateSet
where
	I: IntoIterator<Item = usize>,
{
	let mut set = BitVector::new(num_states);
	for state in states {
		set.insert(state);
	}
	set
}

/// The states in `0..num_states` that are not in `set`
pub fn complement(set: &StateSet, num_states: usize) -> StateSet {
	from_indices(num_states, (0..num_states).filter(|s| !set.contains(*s)))
}

/// `a ∪ b`, cut down to `0..num_states`
pub fn union(a: &StateSet, b: &StateSet, num_states: usize) -> StateSet {
	from_indices(num_states, a.iter().chain(b.iter()).filter(|s| *s < num_states))
}

/// `a \ b`, cut down to `0..num_states`
pub fn difference(a: &StateSet, b: &StateSet, num_states: usize) -> StateSet {
	from_indices(num_states, a.iter().filter(|s| *s < num_states && !b.contains(*s)))
}

/// True if both sets contain exactly the same states
pub fn same_states(a: &StateSet, b: &StateSet) -> bool {
	a.iter().eq(b.iter())
}

/// `1.0` for every state in `set`, `0.0` otherwise
pub fn indicator<ValueType>(set: &StateSet, num_states: usize) -> Vec<ValueType>
where
	ValueType: num::Float,
{
	(0..num_states)
		.map(|s| if set.contains(s) { ValueType::one() } else { ValueType::zero() })
		.collect()
}

/// Named sets of states. Labels are stored as strings in a vector, with the index in the vector
/// being the label's index. The number stored with each name is the number of states carrying
/// the label.
pub struct Labels {
	num_states: usize,
	label_names: Vec<(String, usize)>,
	state_sets: Vec<StateSet>,
}

impl Labels {
	/// Creates an empty labelling for a model with `num_states` states
	pub fn new(num_states: usize) -> Self {
		Self {
			num_states,
			label_names: Vec::new(),
			state_sets: Vec::new(),
		}
	}

	/// Creates a labelling with an `"init"` label on the given initial states
	pub fn with_initial<I>(num_states: usize, initial_states: I) -> Self
	where
		I: IntoIterator<Item = usize>,
	{
		let mut labelling = Self::new(num_states);
		let init = labelling.add_label("init");
		for state in initial_states {
			labelling.add_label_to_state(init, state);
		}
		labelling
	}

	/// The number of states this labelling covers
	pub fn num_states(&self) -> usize {
		self.num_states
	}

	/// Returns the number of labels in the labelling
	pub fn label_count(&self) -> usize {
		self.label_names.len()
	}

	/// Gets the index for a label given its name. If the name does not exist, returns `None`.
	pub fn label_to_index(&self, label_name: &str) -> Option<usize> {
		self.label_names
			.iter()
			.position(|(name, _count)| name == label_name)
	}

	/// Gets the name of a label given its index. If the index is out of range, returns `None`.
	pub fn index_to_label(&self, label_index: usize) -> Option<&str> {
		self.label_names
			.get(label_index)
			.map(|(name, _count)| name.as_str())
	}

	/// Adds a new label and returns its index. Adding a name that already exists returns the
	/// existing index.
	pub fn add_label(&mut self, label_name: &str) -> usize {
		if let Some(index) = self.label_to_index(label_name) {
			return index;
		}
		self.label_names.push((label_name.to_string(), 0));
		self.state_sets.push(empty(self.num_states));
		self.label_names.len() - 1
	}

	/// Adds a label to a state given the state's index.
	pub fn add_label_to_state(&mut self, label_index: usize, state_index: usize) {
		assert!(label_index < self.label_count());
		assert!(state_index < self.num_states);
		if self.state_sets[label_index].insert(state_index) {
			self.label_names[label_index].1 += 1;
		}
	}

	/// Adds a whole set of states under `label_name`, replacing anything stored for it before.
	pub fn insert_set(&mut self, label_name: &str, states: StateSet) -> Result<usize> {
		if let Some(outside) = states.iter().find(|s| *s >= self.num_states) {
			return Err(CheckError::StateOutOfRange {
				state: outside,
				num_states: self.num_states,
			});
		}
		let index = self.add_label(label_name);
		self.label_names[index].1 = states.len();
		self.state_sets[index] = states;
		Ok(index)
	}

	/// The states carrying `label_name`
	pub fn states_for(&self, label_name: &str) -> Result<&StateSet> {
		self.label_to_index(label_name)
			.map(|index| &self.state_sets[index])
			.ok_or_else(|| CheckError::UnknownLabel(label_name.to_string()))
	}
}

impl std::fmt::Display for Labels {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let label_count = self.label_count();
		let label_list = itertools::join(
			self.label_names
				.iter()
				.map(|(label_name, count)| format!("\"{label_name}\": {count} states")),
			"\n - ",
		);
		write!(f, "State labelling with {label_count} labels:\n - {label_list}")
	}
}
