//! foxdap - a Debug Adapter Protocol bridge for the Firefox Remote Debugging
//! Protocol.
//!
//! The adapter speaks DAP on stdio (embedded mode) or on a TCP listen socket
//! (server mode) and drives a running browser over its length-prefixed JSON
//! actor protocol.

use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use std::net::SocketAddr;
use tokio::task::LocalSet;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on for DAP clients; stdio mode when absent.
    #[clap(long)]
    listen: Option<String>,

    /// Exit after the first debug session ends (single-client mode).
    #[clap(long)]
    oneshot: bool,

    /// Optional log file for adapter diagnostics (keeps stdio clean).
    #[clap(long)]
    log_file: Option<std::path::PathBuf>,

    /// Trace DAP traffic into the log.
    #[clap(long)]
    trace_dap: bool,

    /// Trace browser protocol traffic into the log.
    #[clap(long)]
    trace_rdp: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build runtime")?;
    let local = LocalSet::new();

    runtime.block_on(local.run_until(run(args)))
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let mut builder = env_logger::Builder::from_default_env();
    if let Some(path) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    if args.trace_dap {
        builder.filter_module("dap", log::LevelFilter::Trace);
    }
    if args.trace_rdp {
        builder.filter_module("rdp", log::LevelFilter::Trace);
    }
    builder.init();
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let Some(listen) = &args.listen else {
        // Embedded mode: the editor owns our stdio.
        info!(target: "dap", "serving DAP on stdio");
        return foxdap::session::serve(tokio::io::stdin(), tokio::io::stdout()).await;
    };

    let addr: SocketAddr = listen.parse().context("invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(target: "dap", "foxdap listening on {addr}");

    // Server mode: accept clients sequentially. One client == one session.
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(v) => v,
            Err(err) => {
                warn!(target: "dap", "accept failed: {err:#}");
                continue;
            }
        };
        info!(target: "dap", "DAP client connected: {peer}");
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        if let Err(err) = foxdap::session::serve(read_half, write_half).await {
            warn!(target: "dap", "session ended with error: {err:#}");
        } else {
            info!(target: "dap", "session finished");
        }

        if args.oneshot {
            break;
        }
    }
    Ok(())
}
