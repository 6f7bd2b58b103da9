//! Typed configuration shared by the gateway, client, and workflow engine.
//!
//! Every section follows the same shape: a struct of `Option<T>` fields with
//! `#[serde(deny_unknown_fields)]`, plus accessor methods that fill in the default. This keeps a
//! deploy's config file minimal (only the overridden fields need to appear) while every call site
//! in the workspace reads through the accessor rather than the raw `Option`.

pub mod client;
pub mod defaults;
pub mod env;
pub mod gateway;
pub mod workflow;

pub use client::Client;
pub use env::{EndpointConfig, EnvConfigError};
pub use gateway::Gateway;
pub use workflow::Workflow;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Root configuration object. A deploy typically loads this from a config file and only ever
/// reads it through the sub-struct accessor methods.
#[derive(Debug, Serialize, Deserialize, Clone, Default, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RivetKitConfig {
	#[serde(default)]
	pub gateway: Gateway,
	#[serde(default)]
	pub client: Client,
	#[serde(default)]
	pub workflow: Workflow,
}
