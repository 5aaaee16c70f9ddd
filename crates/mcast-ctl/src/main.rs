//! mcast-ctl: command-line interface for mcast nodes.

use anyhow::{Context, Result};

mod cmd;

const DEFAULT_PORT: u16 = 9101;

fn print_usage() {
    println!("Usage: mcast-ctl [--port <port>] <command>");
    println!();
    println!("Status commands (HTTP API of the local daemon):");
    println!("  status                                Show role, neighbours and counters");
    println!("  relays                                List active relays and their consumers");
    println!("  servers                               List content servers (rendezvous only)");
    println!("  shutdown                              Stop the daemon");
    println!();
    println!("Client commands (control channel of any node):");
    println!("  discover <node> <content>             Flood a DISCOVER, print FOUND/MISS and the request id");
    println!("  stream <node> <content> <id>          Ask for a stream, print the consumer address");
    println!("  teardown <node> <content> <id> <addr> Release the consumer at <addr>");
    println!("  play <node> <content>                 Discover, stream and play with ffplay");
    println!();
    println!("Options:");
    println!("  --port <port>   API port (default: {})", DEFAULT_PORT);
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --port option
    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | []                              => cmd::status::cmd_status(port).await,
        ["relays"]                                   => cmd::status::cmd_relays(port).await,
        ["servers"]                                  => cmd::status::cmd_servers(port).await,
        ["shutdown"]                                 => cmd::status::cmd_shutdown(port).await,
        ["discover", node, content]                  => cmd::stream::cmd_discover(node, content).await,
        ["stream", node, content, id]                => cmd::stream::cmd_stream(node, content, id).await,
        ["teardown", node, content, id, consumer]    => cmd::stream::cmd_teardown(node, content, id, consumer).await,
        ["play", node, content]                      => cmd::stream::cmd_play(node, content).await,
        ["help"] | ["--help"] | ["-h"]               => { print_usage(); Ok(()) }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
