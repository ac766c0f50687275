//! Interactive admin console: parses `<host> <port> <command...>` lines
//! and relays them to ring nodes over the wire protocol. Talks to the ring
//! exclusively through the generic verb set plus store/lookup.

use std::io::{self, BufRead, Write};

use carillon::net::client;
use carillon::{logger_init, CarillonError, NodeInfo};
use clap::Parser;
use tokio::time::Duration;

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Timeout for relayed calls in millisecs.
    #[arg(short, long, default_value_t = 5000)]
    timeout_ms: u64,
}

/// Relays one parsed console command, rendering the node's answer.
async fn relay(
    host: &str,
    port: u16,
    tokens: &[&str],
    dur: Duration,
) -> Result<String, CarillonError> {
    match tokens[0] {
        "find_successor" | "find_predecessor" | "closest_preceeding_finger"
        | "get_your_successor" | "get_your_predecessor" => {
            let info: NodeInfo = client::send_command_with_response(
                host,
                port,
                &tokens.join(" "),
                dur,
            )
            .await?;
            Ok(format!("{}", info))
        }

        "store" if tokens.len() >= 4 => {
            let chord_key: u128 = tokens[1].parse()?;
            client::send_store(
                host,
                port,
                "store",
                chord_key,
                tokens[2],
                &tokens[3..].join(" "),
                dur,
            )
            .await?;
            Ok("done".into())
        }

        "lookup" if tokens.len() >= 3 => {
            let chord_key: u128 = tokens[1].parse()?;
            let values =
                client::send_lookup(host, port, chord_key, tokens[2], dur)
                    .await?;
            Ok(format!("{:?}", values))
        }

        // leave acks and then severs the connection itself
        "leave" => {
            client::send_command_async(host, port, "leave", dur).await?;
            Ok("done".into())
        }

        // everything else is an ack-only verb as far as the console cares
        _ => {
            client::send_command(host, port, &tokens.join(" "), dur).await?;
            Ok("done".into())
        }
    }
}

// Console executable main entrance.
#[tokio::main]
async fn main() -> Result<(), CarillonError> {
    logger_init();
    let args = CliArgs::parse();
    let dur = Duration::from_millis(args.timeout_ms);

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("# ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line?;
        if line.trim() == "exit" {
            break;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 3 {
            println!("invalid command, expected: <host> <port> <command...>");
            continue;
        }
        let host = tokens[0];
        let port: u16 = match tokens[1].parse() {
            Ok(port) => port,
            Err(_) => {
                println!("invalid port '{}'", tokens[1]);
                continue;
            }
        };

        match relay(host, port, &tokens[2..], dur).await {
            Ok(shown) => println!("{}", shown),
            Err(e) => println!("error: {}", e),
        }
    }
    Ok(())
}
