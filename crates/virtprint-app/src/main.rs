// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// virtprint: a TCP virtual printer.
//
// Entry point. Loads settings, initialises logging, and runs one of the
// subcommands. `serve` (the default) runs until Ctrl+C or SIGTERM, then
// drains in-flight jobs before exiting.

mod cli;
mod logging;
mod settings;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{dispatcher, error, info};

use virtprint_core::config::VirtprintConfig;
use virtprint_core::error::Result;
use virtprint_document::{ProcessEngine, ResolvedEngines};
use virtprint_print::callback;
use virtprint_print::{CallbackInvoker, JobListener, JobPipeline, send_raw};

use cli::{CliArgs, Command, SendArgs, ServeArgs, ServeOverrides};

#[tokio::main]
async fn main() -> ExitCode {
    match run(CliArgs::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if dispatcher::has_been_set() {
                error!(error = %e, "virtprint failed");
            } else {
                eprintln!("virtprint: {e}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: CliArgs) -> Result<()> {
    let config_file = cli.config_file.as_deref();
    match cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()))
    {
        Command::Serve(args) => {
            let config = settings::load(config_file, &args.overrides)?;
            logging::init(&config.logging)?;
            serve(config).await
        }
        Command::Send(args) => {
            let config = settings::load(config_file, &ServeOverrides::default())?;
            logging::init(&config.logging)?;
            send(&config, args).await
        }
        Command::CheckConfig(args) => {
            let config = settings::load(config_file, &args.overrides)?;
            check_config(&config)
        }
    }
}

async fn serve(config: VirtprintConfig) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "virtprint starting");

    let config = Arc::new(config);
    let pipeline = Arc::new(JobPipeline::new(&config, Arc::new(ProcessEngine))?);
    let hook = callback::from_config(&config.callback)?;
    let (invoker, worker) = CallbackInvoker::spawn(hook, config.callback.timeout());

    let mut listener = JobListener::new(Arc::clone(&config), pipeline, invoker);
    listener.start().await?;

    info!("virtual printer ready, press Ctrl+C to stop");
    shutdown_signal().await?;
    info!("shutdown signal received, draining jobs");

    let stopped = listener.stop().await;
    drop(listener);
    worker.finish().await;

    info!("virtprint stopped");
    stopped
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        Ok(())
    }
}

async fn send(config: &VirtprintConfig, args: SendArgs) -> Result<()> {
    let bytes = tokio::fs::read(&args.file).await?;

    let mut target = config.listener.clone();
    if let Some(host) = args.host {
        target.host = host;
    }
    if let Some(port) = args.port {
        target.port = port;
    }
    let addr = target.bind_address();

    let sent = send_raw(&addr, &bytes, Duration::from_secs(args.timeout_secs)).await?;
    println!("sent {sent} bytes from {} to {addr}", args.file.display());
    Ok(())
}

fn check_config(config: &VirtprintConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);

    let engines = ResolvedEngines::resolve(&config.engine);
    for (name, configured, found) in [
        ("ghostscript", &config.engine.ghostscript, &engines.ghostscript),
        ("gxps", &config.engine.gxps, &engines.gxps),
    ] {
        match found {
            Some(path) => println!("{name}: {}", path.display()),
            None => println!(
                "{name}: not found ({}); jobs needing it fall back",
                configured.display()
            ),
        }
    }
    Ok(())
}
