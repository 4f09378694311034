// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Settings loader. Precedence, lowest first:
//
//   built-in defaults
//   ./virtprint.toml (optional)
//   --config-file / VIRTPRINT_CONFIG_FILE (required if given)
//   VIRTPRINT__SECTION__KEY environment variables
//   command-line overrides

use std::path::Path;

use config::{Config, Environment, File};

use virtprint_core::config::{LogFormat, VirtprintConfig};
use virtprint_core::error::{Result, VirtprintError};

use crate::cli::ServeOverrides;

const LOCAL_CONFIG_BASENAME: &str = "virtprint";
const ENV_PREFIX: &str = "VIRTPRINT";

/// Load, override, and validate the configuration.
pub fn load(config_file: Option<&Path>, overrides: &ServeOverrides) -> Result<VirtprintConfig> {
    load_from(config_file, environment(), overrides)
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

fn load_from(
    config_file: Option<&Path>,
    env: Environment,
    overrides: &ServeOverrides,
) -> Result<VirtprintConfig> {
    let mut builder =
        Config::builder().add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));
    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    let mut config: VirtprintConfig = builder
        .add_source(env)
        .build()
        .and_then(Config::try_deserialize)
        .map_err(|e| VirtprintError::Config(format!("failed to build configuration: {e}")))?;

    apply_overrides(&mut config, overrides);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut VirtprintConfig, overrides: &ServeOverrides) {
    if let Some(host) = overrides.host.as_ref() {
        config.listener.host = host.clone();
    }
    if let Some(port) = overrides.port {
        config.listener.port = port;
    }
    if let Some(idle) = overrides.idle_timeout_ms {
        config.listener.idle_timeout_ms = idle;
    }
    if let Some(dir) = overrides.output_dir.as_ref() {
        config.output.directory = dir.clone();
    }
    if let Some(format) = overrides.format {
        config.output.format = format;
    }
    if let Some(dpi) = overrides.dpi {
        config.output.dpi = dpi;
    }
    if let Some(depth) = overrides.color_depth {
        config.output.color_depth = depth;
    }
    if let Some(level) = overrides.log_level.as_ref() {
        config.logging.level = level.clone();
    }
    if let Some(json) = overrides.log_json {
        config.logging.format = if json {
            LogFormat::Json
        } else {
            LogFormat::Compact
        };
    }
}
