pub mod server;

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use color_eyre::{Result, eyre};
use tracing_subscriber::EnvFilter;

use scout_config::{McpContext, Security};

#[derive(Debug, Parser)]
#[command(
	version = scout_cli::VERSION,
	rename_all = "kebab",
	styles = scout_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum McpAuthState {
	Off,
	StaticKeys { bearer_token: String },
}

pub async fn run(args: Args) -> Result<()> {
	let config = scout_config::load(&args.config)?;
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();

	let mcp =
		config.mcp.as_ref().ok_or_else(|| eyre::eyre!("mcp section is required for scout-mcp."))?;
	let auth_state = build_auth_state(&config.security, &config.service.mcp_bind, mcp)?;

	server::serve_mcp(&config.service.mcp_bind, &config.service.http_bind, auth_state, mcp).await
}

fn build_auth_state(security: &Security, mcp_bind: &str, mcp: &McpContext) -> Result<McpAuthState> {
	match security.auth_mode.trim() {
		"off" => {
			enforce_loopback_for_off_mode(mcp_bind)?;

			Ok(McpAuthState::Off)
		},
		"static_keys" => select_static_key(security, mcp),
		other => Err(eyre::eyre!(
			"security.auth_mode must be one of off or static_keys for scout-mcp, got {other}."
		)),
	}
}

fn enforce_loopback_for_off_mode(mcp_bind: &str) -> Result<()> {
	let bind_addr: SocketAddr = mcp_bind.parse().map_err(|err| {
		eyre::eyre!(
			"service.mcp_bind must be a valid socket address when security.auth_mode=off: {err}"
		)
	})?;

	if !bind_addr.ip().is_loopback() {
		return Err(eyre::eyre!(
			"service.mcp_bind must be a loopback address when security.auth_mode=off."
		));
	}

	Ok(())
}

/// The adapter authenticates to the API as `mcp.agent_id`, so exactly one key may carry that id.
fn select_static_key(security: &Security, mcp: &McpContext) -> Result<McpAuthState> {
	let mut matches = security.auth_keys.iter().filter(|key| key.agent_id == mcp.agent_id);
	let first = matches.next();
	let has_multiple = matches.next().is_some();

	match (first, has_multiple) {
		(Some(key), false) => Ok(McpAuthState::StaticKeys { bearer_token: key.token.clone() }),
		(None, _) => Err(eyre::eyre!(
			"security.auth_mode=static_keys requires exactly one entry in security.auth_keys with agent_id {}. Found zero.",
			mcp.agent_id
		)),
		(Some(_), true) => Err(eyre::eyre!(
			"security.auth_mode=static_keys requires exactly one entry in security.auth_keys with agent_id {}. Found multiple.",
			mcp.agent_id
		)),
	}
}
