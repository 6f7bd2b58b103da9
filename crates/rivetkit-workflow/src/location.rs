use std::fmt;

/// One segment of a [`Location`]: either a call site reached in plain source order, or an
/// iteration of a loop body (§3 "Workflow history entry": "`location` is an ordered sequence of
/// segments (each either a registered-name index, or `{loop:index, iteration:n}`)").
///
/// Segments are keyed by the caller-supplied `name` rather than a separately-registered integer
/// index, see DESIGN.md for why: it keeps divergence messages readable without weakening the
/// determinism guarantee, since uniqueness-per-scope is already enforced on `name` itself. A
/// loop's own entry lives at its `Name` segment; `Iteration` segments nest under it, one per
/// iteration of the body, so a loop never has to repeat its own name at every level.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
	Name(String),
	Iteration(u32),
}

impl fmt::Display for Segment {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Segment::Name(name) => write!(f, "{name}"),
			Segment::Iteration(iteration) => write!(f, "[{iteration}]"),
		}
	}
}

/// A deterministic path to a call site inside a workflow execution. Two runs of the same
/// workflow source produce identical locations for identical call sites (§3 invariants).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Location(Vec<Segment>);

impl Location {
	pub fn root() -> Self {
		Location(Vec::new())
	}

	pub fn extend_name(&self, name: impl Into<String>) -> Self {
		let mut segments = self.0.clone();
		segments.push(Segment::Name(name.into()));
		Location(segments)
	}

	pub fn extend_iteration(&self, iteration: u32) -> Self {
		let mut segments = self.0.clone();
		segments.push(Segment::Iteration(iteration));
		Location(segments)
	}

	pub fn segments(&self) -> &[Segment] {
		&self.0
	}

	pub fn is_prefix_of(&self, other: &Location) -> bool {
		other.0.len() > self.0.len() && other.0[..self.0.len()] == self.0[..]
	}

	/// Direct child name immediately under this location, if `other` extends it by exactly one
	/// segment. Used by divergence detection to enumerate a scope's direct children.
	pub fn child_key_under(&self, other: &Location) -> Option<String> {
		if self.0.len() + 1 != other.0.len() || !self.is_prefix_of(other) {
			return None;
		}
		other.0.last().map(|segment| segment.to_string())
	}
}

impl fmt::Display for Location {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.0.is_empty() {
			return write!(f, "<root>");
		}
		for (i, segment) in self.0.iter().enumerate() {
			if i > 0 {
				write!(f, "/")?;
			}
			write!(f, "{segment}")?;
		}
		Ok(())
	}
}

/// `locationToKey` (§3): the stable storage key a [`Location`] maps to. At most one history
/// entry may live under a given key.
pub fn location_to_key(location: &Location) -> String {
	location.to_string()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn same_source_order_produces_identical_locations() {
		let root = Location::root();
		let a = root.extend_name("step_a");
		let b = root.extend_name("step_a");
		assert_eq!(location_to_key(&a), location_to_key(&b));
	}

	#[test]
	fn loop_iterations_produce_distinct_locations() {
		let root = Location::root().extend_name("poll");
		let iter0 = root.extend_iteration(0);
		let iter1 = root.extend_iteration(1);
		assert_ne!(location_to_key(&iter0), location_to_key(&iter1));
	}

	#[test]
	fn nested_location_displays_path() {
		let loc = Location::root()
			.extend_name("poll")
			.extend_iteration(2)
			.extend_name("step_a");
		assert_eq!(loc.to_string(), "poll/[2]/step_a");
	}
}
