use rivetkit_protocol::{
	encoding::{
		deserialize_binary_client, deserialize_binary_server, deserialize_text_client,
		deserialize_text_server, serialize_binary_client, serialize_binary_server,
		serialize_text_client, serialize_text_server,
	},
	ClientMessage, Payload, ServerMessage,
};

/// §8 "Round-trip and idempotence": decode(encode(m)) == m for both wires, and the two wires
/// agree on the decoded value even though their on-the-wire bytes differ completely.
#[test]
fn text_and_binary_wires_agree_on_decoded_value() {
	let msg = ClientMessage::ActionRequest {
		id: 1,
		name: "increment".into(),
		args: Payload::from_value(serde_json::json!({"by": 3})),
	};

	let via_text = deserialize_text_client(&serialize_text_client(&msg).unwrap()).unwrap();
	let via_binary = deserialize_binary_client(&serialize_binary_client(&msg).unwrap()).unwrap();

	match (via_text, via_binary) {
		(
			ClientMessage::ActionRequest {
				id: id_a,
				name: name_a,
				args: args_a,
			},
			ClientMessage::ActionRequest {
				id: id_b,
				name: name_b,
				args: args_b,
			},
		) => {
			assert_eq!(id_a, id_b);
			assert_eq!(name_a, name_b);
			assert_eq!(args_a, args_b);
		}
		_ => panic!("variant mismatch across wires"),
	}
}

#[test]
fn server_error_round_trips_with_metadata() {
	let msg = ServerMessage::Error {
		group: "actor".into(),
		code: "destroyed".into(),
		message: "actor was destroyed".into(),
		metadata: Some(Payload::from_value(serde_json::json!({"reason": "manual"}))),
		action_id: Some(9),
	};

	let text_encoded = serialize_text_server(&msg).unwrap();
	let text_decoded = deserialize_text_server(&text_encoded).unwrap();
	assert_eq!(
		serialize_text_server(&text_decoded).unwrap(),
		text_encoded,
		"re-serializing a decoded message must be byte-identical (idempotence)"
	);

	let binary_encoded = serialize_binary_server(&msg).unwrap();
	let binary_decoded = deserialize_binary_server(&binary_encoded).unwrap();
	assert_eq!(serialize_binary_server(&binary_decoded).unwrap(), binary_encoded);

	assert!(text_decoded.as_error_shape().unwrap().is_scheduling_error());
}

#[test]
fn subscription_request_is_ephemeral_and_round_trips() {
	let msg = ClientMessage::SubscriptionRequest {
		event_name: "player_joined".into(),
		subscribe: false,
	};
	assert!(msg.is_ephemeral());

	let encoded = serialize_binary_client(&msg).unwrap();
	let decoded = deserialize_binary_client(&encoded).unwrap();
	assert!(decoded.is_ephemeral());
}

#[test]
fn connection_level_error_has_no_action_id() {
	let msg = ServerMessage::Error {
		group: "connection".into(),
		code: "unauthorized".into(),
		message: "token rejected".into(),
		metadata: None,
		action_id: None,
	};
	assert!(msg.is_connection_error());

	let decoded = deserialize_text_server(&serialize_text_server(&msg).unwrap()).unwrap();
	assert!(decoded.is_connection_error());
}
