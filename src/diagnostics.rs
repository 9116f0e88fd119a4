//! Where the checker reports progress. The numeric code never logs directly; it talks to a
//! `DiagnosticsSink` owned by the checker, so a caller can route, silence or capture messages.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use log::Level;

pub trait DiagnosticsSink {
	fn message(&self, level: Level, args: fmt::Arguments<'_>);

	/// Whether per-iteration detail is wanted
	fn verbose(&self) -> bool {
		false
	}
}

/// Forwards everything to the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink {
	pub verbose: bool,
}

impl DiagnosticsSink for LogSink {
	fn message(&self, level: Level, args: fmt::Arguments<'_>) {
		log::log!(target: "cardio_games", level, "{}", args);
	}

	fn verbose(&self) -> bool {
		self.verbose
	}
}

/// Drops every message
#[derive(Debug, Clone, Copy, Default)]
pub struct Silent;

impl DiagnosticsSink for Silent {
	fn message(&self, _level: Level, _args: fmt::Arguments<'_>) {}
}

/// Keeps messages in memory. Clones share the same buffer, so a test can hand one clone to the
/// checker and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
	messages: Rc<RefCell<Vec<(Level, String)>>>,
	verbose: bool,
}

impl MemorySink {
	pub fn new(verbose: bool) -> Self {
		Self {
			messages: Rc::default(),
			verbose,
		}
	}

	pub fn messages(&self) -> Vec<(Level, String)> {
		self.messages.borrow().clone()
	}

	/// True if any message contains `text`
	pub fn contains(&self, text: &str) -> bool {
		self.messages
			.borrow()
			.iter()
			.any(|(_, message)| message.contains(text))
	}
}

impl DiagnosticsSink for MemorySink {
	fn message(&self, level: Level, args: fmt::Arguments<'_>) {
		self.messages.borrow_mut().push((level, args.to_string()));
	}

	fn verbose(&self) -> bool {
		self.verbose
	}
}
