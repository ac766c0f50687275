//! Cluster harness: launches a handful of node processes on consecutive
//! ports, bootstraps the ring on the first, joins the rest through it, and
//! optionally feeds a dataset once the ring has settled.

use std::path::PathBuf;
use std::process::{Child, Command};

use carillon::net::client;
use carillon::{
    dataset, logged_err, logger_init, pf_error, pf_info, CarillonError,
};
use clap::Parser;
use tokio::time::{sleep, Duration};

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Number of node processes to launch.
    #[arg(short, long, default_value_t = 2)]
    num_nodes: usize,

    /// Host every node binds on.
    #[arg(long, default_value_t = String::from("127.0.0.1"))]
    host: String,

    /// First listener port; node i listens on base_port + i.
    #[arg(short, long, default_value_t = 8000)]
    base_port: u16,

    /// TOML configuration string passed through to every node.
    #[arg(short, long)]
    config: Option<String>,

    /// JSON-lines dataset to feed into the ring once it has formed.
    #[arg(short, long)]
    dataset: Option<PathBuf>,
}

impl CliArgs {
    /// Sanitize command line arguments.
    fn sanitize(&self) -> Result<(), CarillonError> {
        if self.num_nodes == 0 {
            return logged_err!("num_nodes must be at least 1");
        }
        if self.base_port <= 1024 {
            return logged_err!("base_port {} is invalid", self.base_port);
        }
        if u16::try_from(self.num_nodes)
            .ok()
            .and_then(|n| self.base_port.checked_add(n))
            .is_none()
        {
            return logged_err!(
                "port range {}+{} overflows",
                self.base_port,
                self.num_nodes
            );
        }
        Ok(())
    }
}

/// Spawns one node process from the sibling `carillon-node` binary.
fn spawn_node(
    host: &str,
    port: u16,
    config: Option<&str>,
) -> Result<Child, CarillonError> {
    let exe = std::env::current_exe()?;
    let dir = exe
        .parent()
        .ok_or_else(|| CarillonError::msg("executable has no parent dir"))?;
    let mut command = Command::new(dir.join("carillon-node"));
    command
        .arg("--host")
        .arg(host)
        .arg("--port")
        .arg(port.to_string());
    if let Some(config) = config {
        command.arg("--config").arg(config);
    }
    Ok(command.spawn()?)
}

// Harness executable main entrance.
#[tokio::main]
async fn main() -> Result<(), CarillonError> {
    logger_init();
    let args = CliArgs::parse();
    args.sanitize()?;
    let dur = Duration::from_secs(5);

    // launch node processes on consecutive ports
    let mut children = Vec::with_capacity(args.num_nodes);
    for i in 0..args.num_nodes {
        let port = args.base_port + i as u16;
        children.push(spawn_node(&args.host, port, args.config.as_deref())?);
        pf_info!("launched node process on {}:{}", args.host, port);
    }
    sleep(Duration::from_secs(1)).await;

    // bootstrap the ring on the first node, join the rest through it
    client::send_command(&args.host, args.base_port, "initialize_network", dur)
        .await?;
    for i in 1..args.num_nodes {
        let port = args.base_port + i as u16;
        client::send_command(
            &args.host,
            port,
            &format!("join {} {}", args.host, args.base_port),
            dur,
        )
        .await?;
    }
    pf_info!("ring of {} node(s) forming, letting it stabilize", args.num_nodes);
    sleep(Duration::from_secs(3)).await;

    // feed the dataset through the first node, which routes each store
    if let Some(path) = &args.dataset {
        let records = dataset::load_records(path)?;
        let stored =
            dataset::feed(&args.host, args.base_port, records, dur).await?;
        pf_info!("fed {} value(s) into the ring", stored);
    }

    pf_info!("cluster is up; drive it with carillon-console");
    for mut child in children {
        if let Err(e) = child.wait() {
            pf_error!("node process exited uncleanly: {}", e);
        }
    }
    Ok(())
}
