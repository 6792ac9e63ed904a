use clap::Parser;

use scout_mcp::Args;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = Args::parse();

	scout_mcp::run(args).await
}
