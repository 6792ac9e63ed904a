pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Cannot read Scout config at {path:?}: {source}")]
	ReadConfig { path: std::path::PathBuf, source: std::io::Error },
	#[error("Cannot parse Scout config at {path:?}: {source}")]
	ParseConfig { path: std::path::PathBuf, source: Box<toml::de::Error> },
	#[error("Invalid config: {message}")]
	Validation { message: String },
}
