use std::collections::HashMap;

use rivetkit_protocol::Payload;

pub struct Listener {
	pub callback: Box<dyn Fn(&Payload) + Send + Sync>,
	pub once: bool,
}

/// Mapping from event name to an ordered set of listeners (§3 "Subscription table"). Invariant:
/// a server-side subscription is active iff the local set for that name is non-empty, emptying
/// a set removes the name entirely rather than leaving a dangling empty entry, and does not by
/// itself send an unsubscribe (the server's view tracks explicit add/remove only).
#[derive(Default)]
pub struct SubscriptionTable {
	listeners: HashMap<String, Vec<Listener>>,
}

impl SubscriptionTable {
	pub fn add(&mut self, event_name: String, listener: Listener) -> bool {
		let set = self.listeners.entry(event_name).or_default();
		let was_empty = set.is_empty();
		set.push(listener);
		was_empty
	}

	/// Invokes every listener registered for `event_name`, removing `once` listeners afterward.
	/// Returns `true` if the set became empty as a result (the caller uses this to know the
	/// subscription no longer needs to be tracked, though per the invariant it does not re-send
	/// an unsubscribe on its own).
	pub fn dispatch(&mut self, event_name: &str, payload: &Payload) -> bool {
		let Some(set) = self.listeners.get_mut(event_name) else {
			return false;
		};
		for listener in set.iter() {
			(listener.callback)(payload);
		}
		set.retain(|listener| !listener.once);
		let emptied = set.is_empty();
		if emptied {
			self.listeners.remove(event_name);
		}
		emptied
	}

	pub fn active_event_names(&self) -> Vec<String> {
		self.listeners.keys().cloned().collect()
	}

	/// Drops every listener registered for `event_name`, local-side only. Returns whether the
	/// name was active beforehand (the caller uses this to decide whether the server still
	/// needs to be told, per the invariant that the local set is the source of truth).
	pub fn remove_all(&mut self, event_name: &str) -> bool {
		self.listeners.remove(event_name).is_some()
	}

	pub fn is_active(&self, event_name: &str) -> bool {
		self.listeners
			.get(event_name)
			.map(|set| !set.is_empty())
			.unwrap_or(false)
	}
}
