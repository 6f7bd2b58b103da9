mod backoff;
mod close;
mod inflight;
mod state;
mod subscriptions;

pub use inflight::{InFlightEntry, InFlightTable};
pub use state::ConnectionState;
pub use subscriptions::{Listener, SubscriptionTable};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rivetkit_config::Client as ClientConfig;
use rivetkit_driver::{ActorId, ActorQuery, DuplexByteStream, ManagerDriver, StreamEvent};
use rivetkit_protocol::{ClientMessage, Encoding, ErrorShape, Payload, ServerMessage};
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex, Notify};

use crate::errors::ClientError;
use crate::metrics;
use backoff::ReconnectBackoff;

/// WebSocket path the connection upgrades to, mirroring `PATH_CONNECT` in the wire interfaces
/// (§6.2 "Connect endpoint").
pub const PATH_CONNECT: &str = "/connect";

struct ConnState {
	lifecycle: ConnectionState,
	actor_id: Option<ActorId>,
	connection_id: Option<String>,
	inflight: InFlightTable,
	subscriptions: SubscriptionTable,
	outbound: VecDeque<ClientMessage>,
	disposed: bool,
	error_handlers: Vec<Box<dyn Fn(&ClientError) + Send + Sync>>,
}

impl Default for ConnState {
	fn default() -> Self {
		ConnState {
			lifecycle: ConnectionState::Idle,
			actor_id: None,
			connection_id: None,
			inflight: InFlightTable::default(),
			subscriptions: SubscriptionTable::default(),
			outbound: VecDeque::new(),
			disposed: false,
			error_handlers: Vec::new(),
		}
	}
}

/// A persistent, auto-reconnecting, multiplexed actor session (C7, "the hardest subsystem").
///
/// Construction does not open the socket; call [`ActorConnection::connect`] to start the retry
/// loop. Holding an `Arc<ActorConnection>` and cloning it is the expected usage, the background
/// task driving the socket holds its own clone.
pub struct ActorConnection<D: ManagerDriver> {
	driver: Arc<D>,
	query: std::sync::Mutex<ActorQuery>,
	encoding: Encoding,
	conn_params: Option<serde_json::Value>,
	config: ClientConfig,
	state: AsyncMutex<ConnState>,
	state_tx: watch::Sender<ConnectionState>,
	dispose_tx: watch::Sender<bool>,
	outbound_notify: Notify,
	connect_started: AtomicBool,
}

impl<D: ManagerDriver + 'static> ActorConnection<D> {
	pub fn new(
		driver: Arc<D>,
		query: ActorQuery,
		encoding: Encoding,
		conn_params: Option<serde_json::Value>,
		config: ClientConfig,
	) -> Arc<Self> {
		let (state_tx, _) = watch::channel(ConnectionState::Idle);
		let (dispose_tx, _) = watch::channel(false);
		Arc::new(ActorConnection {
			driver,
			query: std::sync::Mutex::new(query),
			encoding,
			conn_params,
			config,
			state: AsyncMutex::new(ConnState::default()),
			state_tx,
			dispose_tx,
			outbound_notify: Notify::new(),
			connect_started: AtomicBool::new(false),
		})
	}

	pub fn state(&self) -> ConnectionState {
		*self.state_tx.borrow()
	}

	pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
		self.state_tx.subscribe()
	}

	pub fn is_disposed(&self) -> bool {
		*self.dispose_tx.borrow()
	}

	/// Starts the connect-and-retry loop as a background task. Calling this more than once on
	/// the same connection is a no-op.
	pub fn connect(self: &Arc<Self>) {
		if self.connect_started.swap(true, Ordering::SeqCst) {
			return;
		}
		let this = self.clone();
		tokio::spawn(async move { this.run_retry_loop().await });
	}

	/// Enqueues an `onError` handler invoked for every connection-level error (§4.7 "Receive
	/// pipeline", `Error{actionId:null}`).
	pub async fn on_error(&self, handler: Box<dyn Fn(&ClientError) + Send + Sync>) {
		self.state.lock().await.error_handlers.push(handler);
	}

	#[tracing::instrument(skip_all, fields(name = %name.as_ref()))]
	pub async fn action(&self, name: impl AsRef<str>, args: Payload) -> Result<Payload, ClientError> {
		let name = name.as_ref().to_string();
		let metrics_name = name.clone();
		let (tx, rx) = oneshot::channel();
		let id = {
			let mut state = self.state.lock().await;
			if state.disposed {
				return Err(ClientError::ConnectionDisposed);
			}
			let id = state.inflight.next_id();
			state.inflight.insert(
				id,
				InFlightEntry {
					name: name.clone(),
					resolver: tx,
				},
			);
			state.outbound.push_back(ClientMessage::ActionRequest {
				id,
				name,
				args,
			});
			id
		};
		self.outbound_notify.notify_one();

		let timer = metrics::ACTION_DURATION
			.with_label_values(&["connection", &metrics_name])
			.start_timer();
		let result = match rx.await {
			Ok(Ok(output)) => Ok(output),
			Ok(Err(err)) => Err(err),
			Err(_) => Err(ClientError::ConnectionDisposed),
		};
		timer.observe_duration();
		metrics::ACTION_TOTAL
			.with_label_values(&["connection", &metrics_name, if result.is_ok() { "ok" } else { "error" }])
			.inc();

		result.map_err(|err| {
			tracing::debug!(id, ?err, "action rejected");
			err
		})
	}

	pub async fn subscribe(
		&self,
		event_name: impl Into<String>,
		once: bool,
		callback: Box<dyn Fn(&Payload) + Send + Sync>,
	) {
		let event_name = event_name.into();
		let mut state = self.state.lock().await;
		let was_empty = state.subscriptions.add(event_name.clone(), Listener { callback, once });
		// Subscription sends are ephemeral: only emitted while connected. If we're not
		// connected, the subscription table alone is the source of truth and the request is
		// re-derived on reconnect.
		if was_empty && state.lifecycle == ConnectionState::Connected {
			state
				.outbound
				.push_back(ClientMessage::SubscriptionRequest {
					event_name,
					subscribe: true,
				});
			drop(state);
			self.outbound_notify.notify_one();
		}
	}

	pub async fn unsubscribe(&self, event_name: &str) {
		let mut state = self.state.lock().await;
		if !state.subscriptions.remove_all(event_name) {
			return;
		}
		if state.lifecycle == ConnectionState::Connected {
			state
				.outbound
				.push_back(ClientMessage::SubscriptionRequest {
					event_name: event_name.to_string(),
					subscribe: false,
				});
			drop(state);
			self.outbound_notify.notify_one();
		}
	}

	pub async fn dispose(&self) {
		let mut state = self.state.lock().await;
		if state.disposed {
			return;
		}
		state.disposed = true;
		state.inflight.fail_all(|| ClientError::ConnectionDisposed);
		drop(state);
		let _ = self.dispose_tx.send(true);
		let _ = self.state_tx.send(ConnectionState::Idle);
	}

	async fn set_state(&self, next: ConnectionState) {
		let previous = {
			let mut state = self.state.lock().await;
			let previous = state.lifecycle;
			state.lifecycle = next;
			previous
		};
		let _ = self.state_tx.send(next);

		let actor_name = self.query.lock().unwrap().name().to_string();
		let gauge = metrics::CONNECTION_ACTIVE.with_label_values(&[&actor_name]);
		if previous != ConnectionState::Connected && next == ConnectionState::Connected {
			gauge.inc();
		} else if previous == ConnectionState::Connected && next != ConnectionState::Connected {
			gauge.dec();
		}
	}

	async fn wait_until_disposed(&self) {
		let mut rx = self.dispose_tx.subscribe();
		if *rx.borrow() {
			return;
		}
		let _ = rx.changed().await;
	}

	/// One full connect attempt: resolve, open the socket, await `Init`, then run the
	/// send/receive loop until the socket closes or the connection is disposed. Returns whether
	/// `connected` was ever reached, which the retry loop uses to decide whether to reset its
	/// backoff (§4.7 "restart the retry loop" vs "let the current retry attempt continue").
	async fn connect_and_wait(&self) -> Result<bool, ClientError> {
		let query_snapshot = self.query.lock().unwrap().clone();
		let actor_id = rivetkit_driver::resolve(&query_snapshot, self.driver.as_ref()).await?;
		{
			let mut query = self.query.lock().unwrap();
			if !query.is_create() {
				query.rewrite_to_resolved(actor_id.clone());
			}
		}

		let mut stream = self
			.driver
			.open_websocket(PATH_CONNECT, &actor_id, self.encoding, self.conn_params.clone())
			.await?;

		let init_event = tokio::select! {
			event = stream.recv() => event?,
			_ = self.wait_until_disposed() => {
				let _ = stream.close(1000, "Disposed").await;
				return Ok(false);
			}
		};

		let bytes = match init_event {
			StreamEvent::Frame(bytes) => bytes,
			StreamEvent::Closed { code, reason } => {
				self.handle_close(code, &reason).await;
				return Ok(false);
			}
		};

		let msg = self
			.encoding
			.deserialize_server(&bytes)
			.map_err(|err| ClientError::Internal(err.to_string()))?;
		let ServerMessage::Init {
			actor_id: server_actor_id,
			connection_id,
		} = msg
		else {
			return Err(ClientError::Internal("expected Init as the first frame".into()));
		};

		{
			let mut state = self.state.lock().await;
			state.actor_id = Some(ActorId::from(server_actor_id));
			state.connection_id = Some(connection_id);
		}

		// Microtask-deferred `connected` promotion: yield once so callers that installed
		// listeners in the same synchronous frame observe `connecting` first.
		tokio::task::yield_now().await;
		if self.is_disposed() {
			let _ = stream.close(1000, "Disposed").await;
			return Ok(false);
		}

		self.promote_to_connected(&mut stream).await?;

		let keepalive_interval = Duration::from_millis(self.config.keepalive_interval_ms());
		let mut keepalive = tokio::time::interval(keepalive_interval);
		keepalive.tick().await; // first tick fires immediately; consume it

		loop {
			tokio::select! {
				event = stream.recv() => {
					match event? {
						StreamEvent::Frame(bytes) => self.handle_frame(bytes).await?,
						StreamEvent::Closed { code, reason } => {
							self.handle_close(code, &reason).await;
							break;
						}
					}
				}
				_ = self.outbound_notify.notified() => {
					self.drain_outbound(&mut stream).await?;
				}
				_ = keepalive.tick() => {
					tracing::trace!("connection keepalive tick");
				}
				_ = self.wait_until_disposed() => {
					let _ = stream.close(1000, "Disposed").await;
					let mut state = self.state.lock().await;
					state.inflight.fail_all(|| ClientError::ConnectionDisposed);
					return Ok(true);
				}
			}
		}

		self.set_state(ConnectionState::Disconnected).await;
		Ok(true)
	}

	async fn promote_to_connected(&self, stream: &mut Box<dyn DuplexByteStream>) -> Result<(), ClientError> {
		let active_names = {
			let mut state = self.state.lock().await;
			state.lifecycle = ConnectionState::Connected;
			state.subscriptions.active_event_names()
		};
		let _ = self.state_tx.send(ConnectionState::Connected);

		// Ephemeral subscription resends go out before any action queued while disconnected
		// (S2: "exactly one SubscriptionRequest ... is sent before any queued action").
		for event_name in active_names {
			let msg = ClientMessage::SubscriptionRequest {
				event_name,
				subscribe: true,
			};
			self.send_frame_now(stream, &msg).await?;
		}

		self.drain_outbound(stream).await
	}

	async fn send_frame_now(
		&self,
		stream: &mut Box<dyn DuplexByteStream>,
		msg: &ClientMessage,
	) -> Result<(), ClientError> {
		let bytes = self
			.encoding
			.serialize_client(msg)
			.map_err(|err| ClientError::Internal(err.to_string()))?;
		stream.send(bytes).await.map_err(ClientError::from)
	}

	async fn drain_outbound(&self, stream: &mut Box<dyn DuplexByteStream>) -> Result<(), ClientError> {
		loop {
			let msg = {
				let mut state = self.state.lock().await;
				if state.lifecycle != ConnectionState::Connected {
					return Ok(());
				}
				state.outbound.pop_front()
			};
			let Some(msg) = msg else { return Ok(()) };

			if let Err(err) = self.send_frame_now(stream, &msg).await {
				let mut state = self.state.lock().await;
				state.outbound.push_front(msg);
				tracing::warn!(?err, "failed to send queued message, will retry on reconnect");
				return Err(err);
			}
		}
	}

	async fn handle_frame(&self, bytes: Vec<u8>) -> Result<(), ClientError> {
		let msg = self
			.encoding
			.deserialize_server(&bytes)
			.map_err(|err| ClientError::Internal(err.to_string()))?;

		match msg {
			ServerMessage::Init { .. } => {
				tracing::debug!("ignoring unexpected second Init frame");
			}
			ServerMessage::ActionResponse { id, output } => {
				let mut state = self.state.lock().await;
				if let Some(entry) = state.inflight.remove(id) {
					let _ = entry.resolver.send(Ok(output));
				} else {
					tracing::warn!(id, "response for unknown in-flight action");
				}
			}
			ServerMessage::Event { name, args } => {
				let mut state = self.state.lock().await;
				state.subscriptions.dispatch(&name, &args);
			}
			ServerMessage::Error {
				action_id: Some(id),
				group,
				code,
				message,
				metadata,
				..
			} => {
				let shape = shape_from_parts(group, code, message, metadata)?;
				let err = self.to_client_error(shape).await;
				let mut state = self.state.lock().await;
				if let Some(entry) = state.inflight.remove(id) {
					let _ = entry.resolver.send(Err(err));
				}
			}
			ServerMessage::Error {
				action_id: None,
				group,
				code,
				message,
				metadata,
				..
			} => {
				let shape = shape_from_parts(group, code, message, metadata)?;
				self.dispatch_connection_error(shape).await;
			}
		}
		Ok(())
	}

	async fn handle_close(&self, code: u16, reason: &str) {
		if code == 1000 && reason == "Disposed" {
			return;
		}
		let shape = close::parse_close_reason(code, reason);
		self.dispatch_connection_error(shape).await;
	}

	async fn dispatch_connection_error(&self, shape: ErrorShape) {
		let err = self.to_client_error(shape).await;
		let mut state = self.state.lock().await;
		state.lifecycle = ConnectionState::Disconnected;
		let _ = self.state_tx.send(ConnectionState::Disconnected);
		state.inflight.fail_all(|| ClientError::ConnectionDisposed);
		for handler in state.error_handlers.iter() {
			handler(&err);
		}
	}

	/// Scheduling-error enrichment (§7, S3): fetches the actor's terminal error record when the
	/// observed error is one of the closed scheduling-class `(group, code)` pairs.
	async fn to_client_error(&self, shape: ErrorShape) -> ClientError {
		if !shape.is_scheduling_error() {
			return ClientError::from_shape(shape);
		}
		let actor_id = self.state.lock().await.actor_id.clone();
		let Some(actor_id) = actor_id else {
			return ClientError::from_shape(shape);
		};
		let name = self.query.lock().unwrap().name().to_string();
		match self.driver.get_for_id(&name, &actor_id).await {
			Ok(record) => ClientError::Scheduling {
				actor_id,
				error: record.error,
			},
			Err(_) => ClientError::Scheduling {
				actor_id,
				error: None,
			},
		}
	}

	async fn run_retry_loop(self: Arc<Self>) {
		let mut backoff = ReconnectBackoff::new(
			self.config.reconnect_backoff_base_ms(),
			self.config.reconnect_backoff_max_ms(),
		);

		loop {
			if self.is_disposed() {
				break;
			}
			self.set_state(ConnectionState::Connecting).await;

			match self.connect_and_wait().await {
				Ok(reached_connected) => {
					if reached_connected {
						backoff.reset();
						metrics::RECONNECT_TOTAL.with_label_values(&["connected"]).inc();
					}
				}
				Err(err) => {
					tracing::warn!(?err, "connect attempt failed");
					metrics::RECONNECT_TOTAL.with_label_values(&["failed"]).inc();
				}
			}

			if self.is_disposed() {
				break;
			}

			let delay = backoff.next_delay();
			tokio::select! {
				_ = tokio::time::sleep(delay) => {}
				_ = self.wait_until_disposed() => break,
			}
		}

		self.set_state(ConnectionState::Idle).await;
	}
}

fn shape_from_parts(
	group: String,
	code: String,
	message: String,
	metadata: Option<Payload>,
) -> Result<ErrorShape, ClientError> {
	let metadata = metadata
		.map(|m| m.decode())
		.transpose()
		.map_err(|err| ClientError::Internal(err.to_string()))?;
	Ok(ErrorShape {
		group,
		code,
		message,
		metadata,
	})
}
