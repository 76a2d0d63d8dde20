//! oscquery-ctl: query OSCQuery servers and browse the local network.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use oscquery::client::fetch_attribute;
use oscquery::{fetch_host_info, fetch_tree, OscNode};
use oscquery_services::{Discovery, MdnsSdTransport};

const DEFAULT_BROWSE_SECS: u64 = 10;

// ── Subcommand handlers ───────────────────────────────────────────────────────

async fn cmd_host_info(ip: IpAddr, port: u16) -> Result<()> {
    let info = fetch_host_info(ip, port).await?;

    println!("═══════════════════════════════════════");
    println!("  {}", info.name);
    println!("═══════════════════════════════════════");
    println!("  OSC        : {}:{} ({})", info.osc_ip, info.osc_port, info.osc_transport);
    let extensions: Vec<&str> = info
        .extensions
        .iter()
        .filter(|(_, on)| **on)
        .map(|(name, _)| name.as_str())
        .collect();
    println!("  Extensions : {}", extensions.join(", "));
    Ok(())
}

async fn cmd_tree(ip: IpAddr, port: u16, path: Option<&str>) -> Result<()> {
    let tree = fetch_tree(ip, port, path).await?;
    print_node(tree.root(), 0);
    println!();
    println!("{} nodes", tree.len());
    Ok(())
}

fn print_node(node: &Arc<OscNode>, depth: usize) {
    let indent = "  ".repeat(depth);
    let label = if depth == 0 { node.full_path() } else { node.name() };

    let mut line = format!("{indent}{label}");
    if let Some(ty) = node.osc_type() {
        line.push_str(&format!("  [{ty}] access={}", node.access().bits()));
    }
    if let Some(value) = node.value() {
        if let Ok(json) = serde_json::to_string(&value) {
            line.push_str(&format!(" = {json}"));
        }
    }
    if let Some(description) = node.description() {
        line.push_str(&format!("  # {description}"));
    }
    println!("{line}");

    for child in node.children() {
        print_node(&child, depth + 1);
    }
}

async fn cmd_get(ip: IpAddr, port: u16, path: &str, attribute: Option<&str>) -> Result<()> {
    let value = fetch_attribute(ip, port, path, attribute).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn cmd_browse(secs: u64) -> Result<()> {
    let transport = Arc::new(MdnsSdTransport::new().context("failed to start mDNS")?);
    let discovery = Arc::new(Discovery::new(
        transport.clone(),
        Duration::from_secs(60),
        Duration::from_secs(60),
    ));

    let (shutdown, _) = tokio::sync::broadcast::channel(1);
    let tasks = discovery.start(&shutdown);
    let listener = tokio::spawn(transport.listener_loop(discovery.clone(), shutdown.subscribe()));

    let mut added = discovery.subscribe_any();
    let mut removed = discovery.subscribe_removed();

    println!("Browsing for {secs}s…");
    let deadline = tokio::time::sleep(Duration::from_secs(secs));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            Some(peer) = added.recv() => println!("  + {peer}"),
            Some(peer) = removed.recv() => println!("  - {peer}"),
        }
    }

    let _ = shutdown.send(());
    for task in tasks {
        let _ = task.await;
    }
    listener.await.context("mDNS listener panicked")??;

    println!("{} peers known", discovery.discovered().len());
    Ok(())
}

fn print_usage() {
    println!("Usage: oscquery-ctl <command>");
    println!();
    println!("Commands:");
    println!("  host-info <ip> <port>              Show a server's HOST_INFO");
    println!("  tree <ip> <port> [path]            Print a server's namespace");
    println!("  get <ip> <port> <path> [ATTR]      Fetch a node or one attribute");
    println!("  browse [--secs N]                  Watch for OSC/OSCQuery services");
    println!();
    println!("  browse runs for {DEFAULT_BROWSE_SECS}s unless --secs is given.");
}

fn parse_target(ip: &str, port: &str) -> Result<(IpAddr, u16)> {
    let ip = ip.parse().with_context(|| format!("bad IP address {ip:?}"))?;
    let port = port.parse().with_context(|| format!("bad port {port:?}"))?;
    Ok((ip, port))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --secs option
    let mut secs = DEFAULT_BROWSE_SECS;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--secs" {
            i += 1;
            secs = args
                .get(i)
                .context("--secs requires a value")?
                .parse()
                .context("--secs must be a number")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["host-info", ip, port] => {
            let (ip, port) = parse_target(ip, port)?;
            cmd_host_info(ip, port).await
        }
        ["tree", ip, port] => {
            let (ip, port) = parse_target(ip, port)?;
            cmd_tree(ip, port, None).await
        }
        ["tree", ip, port, path] => {
            let (ip, port) = parse_target(ip, port)?;
            cmd_tree(ip, port, Some(*path)).await
        }
        ["get", ip, port, path] => {
            let (ip, port) = parse_target(ip, port)?;
            cmd_get(ip, port, path, None).await
        }
        ["get", ip, port, path, attr] => {
            let (ip, port) = parse_target(ip, port)?;
            cmd_get(ip, port, path, Some(*attr)).await
        }
        ["browse"] => cmd_browse(secs).await,
        ["help"] | ["--help"] | ["-h"] | [] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
