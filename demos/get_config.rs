//! Fetches the running configuration from a device over SSH.
//!
//! Usage: get_config <host> <username> <password> [port]

use std::env;
use std::process;

use anyhow::Context;

use netconf::connect::{SshConnectOptions, connect_ssh};
use netconf::manager::Manager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        eprintln!("usage: {} <host> <username> <password> [port]", args[0]);
        process::exit(2);
    }

    let mut options = SshConnectOptions::new(&args[1], &args[2], &args[3]);
    if let Some(port) = args.get(4) {
        options.port = port.parse().context("port must be a number")?;
    }

    let session = connect_ssh(&options)
        .await
        .with_context(|| format!("connecting to {}:{}", options.host, options.port))?;
    println!(
        "session {} established ({:?} framing)",
        session.session_id(),
        session.mode()
    );
    for cap in session.server_capabilities() {
        println!("  capability: {cap}");
    }

    let manager = Manager::new(session);
    let reply = manager
        .get_config("running", None, None)
        .await
        .context("fetching the running configuration")?;
    match reply.data {
        Some(data) => println!("{data}"),
        None => println!("empty <rpc-reply>: {}", reply.raw),
    }

    manager.close_session().await?;
    Ok(())
}
