use rivetkit_config::RivetKitConfig;

#[test]
fn partial_config_fills_in_defaults() {
	let cfg: RivetKitConfig = serde_json::from_str(r#"{"gateway": {"port": 9000}}"#).unwrap();
	assert_eq!(cfg.gateway.port(), 9000);
	assert_eq!(cfg.client.reconnect_backoff_base_ms(), 250);
	assert_eq!(cfg.workflow.history_keep(), 2);
}

#[test]
fn unknown_field_is_rejected() {
	let result: Result<RivetKitConfig, _> =
		serde_json::from_str(r#"{"gateway": {"port": 9000, "bogus": true}}"#);
	assert!(result.is_err());
}

#[test]
fn empty_config_is_all_defaults() {
	let cfg: RivetKitConfig = serde_json::from_str("{}").unwrap();
	assert_eq!(cfg.gateway.base_path(), "");
	assert_eq!(cfg.workflow.max_retries(), 3);
}
