use rivetkit_protocol::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum InspectorError {
	#[error("state inspection is not enabled for this actor")]
	StateNotEnabled,
	#[error("action {0:?} is not registered on this actor")]
	UnknownAction(String),
	#[error("the database view is not enabled for this actor")]
	DatabaseNotEnabled,
	#[error("unknown table {0:?}")]
	UnknownTable(String),
	#[error("the workflow history view is not enabled for this actor")]
	WorkflowViewNotEnabled,
	#[error(transparent)]
	Workflow(#[from] rivetkit_workflow::WorkflowError),
	#[error("inspected actor rejected the request: {0}")]
	Actor(String),
}

impl ApiError for InspectorError {
	fn group(&self) -> &'static str {
		"inspector"
	}

	fn code(&self) -> &'static str {
		match self {
			InspectorError::StateNotEnabled => "state_not_enabled",
			InspectorError::UnknownAction(_) => "unknown_action",
			InspectorError::DatabaseNotEnabled => "database_not_enabled",
			InspectorError::UnknownTable(_) => "unknown_table",
			InspectorError::WorkflowViewNotEnabled => "workflow_view_not_enabled",
			InspectorError::Workflow(_) => "workflow_error",
			InspectorError::Actor(_) => "actor_error",
		}
	}
}
