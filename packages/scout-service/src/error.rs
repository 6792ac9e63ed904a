pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Workspace {workspace} is not registered.")]
	WorkspaceNotRegistered { workspace: String },
	#[error("Workspace {workspace} has not finished its first index run.")]
	WorkspaceNotIndexed { workspace: String },
	#[error("Too many queries in flight; retry after {retry_after_ms} ms.")]
	Busy { retry_after_ms: u64 },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Retrieval error: {message}")]
	Retrieval { message: String },
	#[error("Index provider error: {message}")]
	Index { message: String },
	#[error("Output write failed: {message}")]
	OutputWrite { message: String },
}
impl Error {
	/// The collaborator's message without the variant prefix.
	pub fn message(&self) -> String {
		match self {
			Self::InvalidRequest { message }
			| Self::NotFound { message }
			| Self::Retrieval { message }
			| Self::Index { message }
			| Self::OutputWrite { message } => message.clone(),
			other => other.to_string(),
		}
	}
}
impl From<scout_providers::Error> for Error {
	fn from(err: scout_providers::Error) -> Self {
		Self::Retrieval { message: err.to_string() }
	}
}
