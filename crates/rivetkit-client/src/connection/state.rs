/// Connection lifecycle state (§3 "Connection state", §4.7 "States").
///
/// `Idle` is initial and terminal; the only cycle is
/// `Connected -> Disconnected -> Connecting -> Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	Idle,
	Connecting,
	Connected,
	Disconnected,
}

impl ConnectionState {
	pub fn is_terminal(&self) -> bool {
		matches!(self, ConnectionState::Idle)
	}
}
