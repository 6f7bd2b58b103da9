use rivetkit_protocol::ErrorShape;

/// A structured close reason is `group:code`, anything else is treated as an unstructured
/// reason (§6.3). A `1000`/`"Disposed"` close is the normal client-initiated one and is handled
/// separately before this ever runs.
pub fn parse_close_reason(code: u16, reason: &str) -> ErrorShape {
	if let Some((group, code_str)) = reason.split_once(':') {
		if !group.is_empty() && !code_str.is_empty() {
			return ErrorShape::new(group, code_str, format!("connection closed: {reason}"));
		}
	}
	ErrorShape::new(
		"connection",
		"closed",
		format!("connection closed (code {code}): {reason}"),
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn structured_reason_parses_group_and_code() {
		let shape = parse_close_reason(4000, "actor:destroyed");
		assert_eq!(shape.group, "actor");
		assert_eq!(shape.code, "destroyed");
	}

	#[test]
	fn unstructured_reason_becomes_generic_close_error() {
		let shape = parse_close_reason(1006, "abnormal closure");
		assert_eq!(shape.group, "connection");
		assert_eq!(shape.code, "closed");
	}
}
