mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Admission, Confidence, Config, Executor, IndexProviderConfig, LoopDetection, McpContext,
	Providers, RetrievalProviderConfig, Review, Security, SecurityAuthKey, Service, Session,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;
	let mut cfg: Config = toml::from_str(&raw).map_err(|err| Error::ParseConfig {
		path: path.to_path_buf(),
		source: Box::new(err),
	})?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	for (label, value) in [
		("service.http_bind", &cfg.service.http_bind),
		("service.mcp_bind", &cfg.service.mcp_bind),
		("providers.retrieval.api_base", &cfg.providers.retrieval.api_base),
		("providers.index.api_base", &cfg.providers.index.api_base),
	] {
		if value.trim().is_empty() {
			return Err(Error::Validation { message: format!("{label} must be non-empty.") });
		}
	}

	for (label, timeout_ms) in [
		("providers.retrieval.timeout_ms", cfg.providers.retrieval.timeout_ms),
		("providers.index.timeout_ms", cfg.providers.index.timeout_ms),
	] {
		if timeout_ms == 0 {
			return Err(Error::Validation {
				message: format!("{label} must be greater than zero."),
			});
		}
	}

	if cfg.session.max_history == 0 {
		return Err(Error::Validation {
			message: "session.max_history must be greater than zero.".to_string(),
		});
	}
	if cfg.session.max_plans == 0 {
		return Err(Error::Validation {
			message: "session.max_plans must be greater than zero.".to_string(),
		});
	}

	validate_loop_detection(cfg)?;
	validate_confidence(cfg)?;

	if cfg.review.loop_occurrence_threshold == 0 {
		return Err(Error::Validation {
			message: "review.loop_occurrence_threshold must be greater than zero.".to_string(),
		});
	}
	if cfg.executor.query_timeout_ms <= cfg.executor.safety_margin_ms {
		return Err(Error::Validation {
			message: "executor.query_timeout_ms must be greater than executor.safety_margin_ms."
				.to_string(),
		});
	}
	if cfg.admission.max_in_flight == 0 {
		return Err(Error::Validation {
			message: "admission.max_in_flight must be greater than zero.".to_string(),
		});
	}

	match cfg.security.auth_mode.as_str() {
		"off" => {},
		"static_keys" => {
			if cfg.security.auth_keys.is_empty() {
				return Err(Error::Validation {
					message: "security.auth_keys must be non-empty when security.auth_mode=static_keys."
						.to_string(),
				});
			}

			for key in &cfg.security.auth_keys {
				if key.token.trim().is_empty() || key.agent_id.trim().is_empty() {
					return Err(Error::Validation {
						message: format!(
							"security.auth_keys entry {} must have a non-empty token and agent_id.",
							key.token_id
						),
					});
				}
			}
		},
		_ => {
			return Err(Error::Validation {
				message: "security.auth_mode must be one of off or static_keys.".to_string(),
			});
		},
	}

	if let Some(mcp) = cfg.mcp.as_ref()
		&& mcp.agent_id.trim().is_empty()
	{
		return Err(Error::Validation { message: "mcp.agent_id must be non-empty.".to_string() });
	}

	Ok(())
}

fn validate_loop_detection(cfg: &Config) -> Result<()> {
	let loops = &cfg.loop_detection;

	if loops.window_secs == 0 {
		return Err(Error::Validation {
			message: "loop_detection.window_secs must be greater than zero.".to_string(),
		});
	}

	for (label, threshold) in [
		("loop_detection.exact_threshold", loops.exact_threshold),
		("loop_detection.semantic_threshold", loops.semantic_threshold),
		("loop_detection.futile_threshold", loops.futile_threshold),
	] {
		if threshold == 0 {
			return Err(Error::Validation {
				message: format!("{label} must be greater than zero."),
			});
		}
	}

	if !loops.similarity_threshold.is_finite()
		|| loops.similarity_threshold <= 0.0
		|| loops.similarity_threshold > 1.0
	{
		return Err(Error::Validation {
			message: "loop_detection.similarity_threshold must be in the range (0.0, 1.0]."
				.to_string(),
		});
	}

	Ok(())
}

fn validate_confidence(cfg: &Config) -> Result<()> {
	let confidence = &cfg.confidence;

	for (label, value) in [
		("confidence.definitive", confidence.definitive),
		("confidence.high", confidence.high),
		("confidence.medium", confidence.medium),
		("confidence.low", confidence.low),
		("confidence.coarse_low_max", confidence.coarse_low_max),
		("confidence.coarse_strong_min", confidence.coarse_strong_min),
	] {
		if !value.is_finite() {
			return Err(Error::Validation { message: format!("{label} must be a finite number.") });
		}
		if !(0.0..=1.0).contains(&value) {
			return Err(Error::Validation {
				message: format!("{label} must be in the range 0.0-1.0."),
			});
		}
	}

	if confidence.coarse_low_max > confidence.coarse_strong_min {
		return Err(Error::Validation {
			message: "confidence.coarse_low_max must not exceed confidence.coarse_strong_min."
				.to_string(),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.service.default_workspace.as_deref().map(|ws| ws.trim().is_empty()).unwrap_or(false) {
		cfg.service.default_workspace = None;
	}
	if cfg
		.providers
		.retrieval
		.api_key
		.as_deref()
		.map(|key| key.trim().is_empty())
		.unwrap_or(false)
	{
		cfg.providers.retrieval.api_key = None;
	}
	if cfg.providers.index.api_key.as_deref().map(|key| key.trim().is_empty()).unwrap_or(false) {
		cfg.providers.index.api_key = None;
	}
	if let Some(mcp) = cfg.mcp.as_mut()
		&& mcp.default_workspace.as_deref().map(|ws| ws.trim().is_empty()).unwrap_or(false)
	{
		mcp.default_workspace = None;
	}

	cfg.security.auth_mode = cfg.security.auth_mode.trim().to_string();
}
