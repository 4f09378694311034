// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

use virtprint_core::types::{ColorDepth, OutputFormat};

/// Command-line arguments for the `virtprint` binary.
#[derive(Debug, Parser)]
#[command(
    name = "virtprint",
    version,
    about = "TCP virtual printer: raw print jobs in, PDF or image files out"
)]
pub struct CliArgs {
    /// Optional path to a TOML configuration file.
    #[arg(
        long = "config-file",
        env = "VIRTPRINT_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the virtual printer until interrupted.
    Serve(ServeArgs),
    /// Send a file to a running virtual printer as one raw job.
    Send(SendArgs),
    /// Print the effective configuration and the engines found on PATH.
    CheckConfig(ServeArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "host", value_name = "HOST")]
    pub host: Option<String>,

    /// Override the listener port.
    #[arg(long = "port", value_name = "PORT")]
    pub port: Option<u16>,

    /// Override the output directory.
    #[arg(long = "output-dir", value_name = "PATH")]
    pub output_dir: Option<PathBuf>,

    /// Override the output format (PDF, PNG, JPEG, TIFF, PS, RAW).
    #[arg(long = "format", value_name = "FORMAT")]
    pub format: Option<OutputFormat>,

    /// Override the raster resolution.
    #[arg(long = "dpi", value_name = "DPI")]
    pub dpi: Option<u32>,

    /// Override the raster colour depth (24bit, 8bit, 1bit).
    #[arg(long = "color-depth", value_name = "DEPTH")]
    pub color_depth: Option<ColorDepth>,

    /// Override the idle timeout that ends a job.
    #[arg(long = "idle-timeout-ms", value_name = "MILLIS")]
    pub idle_timeout_ms: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct SendArgs {
    /// File to send as-is (PostScript, PDF, PCL, ...).
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Printer host; defaults to the configured listener host.
    #[arg(long = "host", value_name = "HOST")]
    pub host: Option<String>,

    /// Printer port; defaults to the configured listener port.
    #[arg(long = "port", value_name = "PORT")]
    pub port: Option<u16>,

    /// Connect and per-write timeout.
    #[arg(long = "timeout-secs", value_name = "SECONDS", default_value_t = 30)]
    pub timeout_secs: u64,
}
