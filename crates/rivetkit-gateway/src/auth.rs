use async_trait::async_trait;

use crate::router::ResolvedRoute;

/// Authentication/authorization hook point. The gateway exposes this but implements no policy
/// itself (§1 Non-goals: "the gateway exposes hooks but does not implement policy").
///
/// [`NoopAuthHook`] accepts everything; production callers supply their own implementation.
#[async_trait]
pub trait AuthHook: Send + Sync {
	async fn authorize(&self, route: &ResolvedRoute) -> Result<(), String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuthHook;

#[async_trait]
impl AuthHook for NoopAuthHook {
	async fn authorize(&self, _route: &ResolvedRoute) -> Result<(), String> {
		Ok(())
	}
}
