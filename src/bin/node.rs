//! Carillon ring node executable.

use carillon::{
    logged_err, logger_init, parsed_config, pf_error, pf_info, CarillonError,
    ChordConfig, ChordNode, ME,
};
use clap::Parser;

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Host address to bind the node listener on.
    #[arg(long, default_value_t = String::from("127.0.0.1"))]
    host: String,

    /// TCP port of the node listener.
    #[arg(short, long, default_value_t = 8000)]
    port: u16,

    /// TOML string overriding configuration parameters
    /// (e.g. "stabilize_interval_ms = 500").
    #[arg(short, long)]
    config: Option<String>,
}

impl CliArgs {
    /// Sanitize command line arguments.
    fn sanitize(&self) -> Result<(), CarillonError> {
        if self.port <= 1024 {
            return logged_err!("port {} is invalid", self.port);
        }
        if self.host.is_empty() {
            return logged_err!("host cannot be empty");
        }
        Ok(())
    }
}

// Node executable main entrance.
#[tokio::main]
async fn main() -> Result<(), CarillonError> {
    logger_init();

    // read in and parse command line arguments
    let args = CliArgs::parse();
    args.sanitize()?;
    let _ = ME.set(format!("{}:{}", args.host, args.port));

    let config = parsed_config!(args.config.as_deref() => ChordConfig;
                                size_successor_list, stabilize_interval_ms,
                                fix_fingers_interval_ms,
                                ping_successors_interval_ms,
                                finger_update_mode, rpc_short_timeout_ms,
                                rpc_long_timeout_ms, lookup_timeout_ms,
                                max_route_retries, max_store_retries,
                                backoff_min_ms, backoff_max_ms)?;

    let node =
        ChordNode::new_and_setup(args.host.clone(), args.port, config).await?;
    pf_info!("carillon node {} awaiting ring membership", node.info());

    // serves until a leave command arrives over the wire
    node.run().await
}
