//! Path-based actor addressing (§4.4, §8 "Boundary behaviors").
//!
//! Grammar: `/gateway/{actorId}[@{token}]/{...remainder}`. Empty path segments and malformed
//! percent-encoding both fail closed, the gateway falls through to the next addressing mode
//! rather than answering with a 400, per "the gateway never double-decodes ... it does not 400".

const GATEWAY_PREFIX: &str = "/gateway/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedActorPath {
	pub actor_id: String,
	pub token: Option<String>,
	/// The remainder of the path (including any query string), always starting with `/`.
	pub remaining_path: String,
}

/// Strictly decodes `%XX` escapes, rejecting a `%` that isn't followed by two hex digits. Unlike
/// `percent_encoding::percent_decode`, which passes malformed escapes through unchanged, this
/// treats them as a hard parse failure so callers fail closed instead of matching on a
/// partially-decoded id.
fn strict_percent_decode(input: &str) -> Option<String> {
	let bytes = input.as_bytes();
	let mut out = Vec::with_capacity(bytes.len());
	let mut i = 0;
	while i < bytes.len() {
		if bytes[i] == b'%' {
			if i + 2 >= bytes.len() {
				return None;
			}
			let hi = hex_val(bytes[i + 1])?;
			let lo = hex_val(bytes[i + 2])?;
			out.push((hi << 4) | lo);
			i += 3;
		} else {
			out.push(bytes[i]);
			i += 1;
		}
	}
	String::from_utf8(out).ok()
}

fn hex_val(b: u8) -> Option<u8> {
	match b {
		b'0'..=b'9' => Some(b - b'0'),
		b'a'..=b'f' => Some(b - b'a' + 10),
		b'A'..=b'F' => Some(b - b'A' + 10),
		_ => None,
	}
}

/// Parses a raw request path (as received, including any query string) against the path-based
/// addressing grammar. Returns `None` rather than an error: a non-match always means "try the
/// next addressing mode", never "reject the request".
pub fn parse_actor_path(path: &str) -> Option<ParsedActorPath> {
	let rest = path.strip_prefix(GATEWAY_PREFIX)?;
	if rest.is_empty() {
		return None;
	}

	let slash_idx = rest.find('/')?;
	let segment = &rest[..slash_idx];
	if segment.is_empty() {
		return None;
	}
	let remaining = &rest[slash_idx..];

	// An empty path segment right after the actor segment (`//...`) is malformed, not a root
	// path, reject rather than silently collapsing it.
	if remaining.as_bytes().get(1) == Some(&b'/') {
		return None;
	}

	let (actor_raw, token_raw) = match segment.split_once('@') {
		Some((a, t)) => (a, Some(t)),
		None => (segment, None),
	};
	if actor_raw.is_empty() || token_raw == Some("") {
		return None;
	}

	let actor_id = strict_percent_decode(actor_raw)?;
	let token = token_raw.map(strict_percent_decode).transpose()?;

	Some(ParsedActorPath {
		actor_id,
		token,
		remaining_path: remaining.to_string(),
	})
}
