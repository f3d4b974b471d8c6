//! Command line argument parsing
//!
//! Subcommands:
//! - `serve`: Run the HTTP API
//! - `show-config`: Show configuration discovery information
//! - `init-config`: Write a default configuration file

use super::config::ServiceConfig;
use crate::runtime::RuntimeBackend;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug)]
pub enum ExecutionMode {
    Serve(ServeOptions),
    ShowConfig { config: Option<PathBuf> },
    InitConfig { path: Option<PathBuf>, force: bool },
}

/// Command line overrides for `serve`.
#[derive(Debug, Default)]
pub struct ServeOptions {
    pub config_override: Option<PathBuf>,
    pub listen: Option<String>,
    pub lxcpath: Option<PathBuf>,
    pub runtime: Option<RuntimeBackend>,
    pub verbose: bool,
}

impl ServeOptions {
    /// Apply the command line overrides on top of a loaded config.
    pub fn apply(&self, config: &mut ServiceConfig) {
        if let Some(listen) = &self.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(lxcpath) = &self.lxcpath {
            config.lxcpath = lxcpath.clone();
        }
        if let Some(runtime) = self.runtime {
            config.runtime = runtime;
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "lxcapi")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "HTTP API for managing LXC container lifecycles")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the HTTP API
    Serve {
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
        /// Listen address, e.g. 127.0.0.1:8090
        #[arg(short = 'l', long = "listen")]
        listen: Option<String>,
        /// LXC container path
        #[arg(long = "lxcpath")]
        lxcpath: Option<PathBuf>,
        /// Runtime backend (lxc, docker, memory)
        #[arg(long = "runtime")]
        runtime: Option<RuntimeBackend>,
        /// Enable debug logging
        #[arg(short = 'v', long = "verbose")]
        verbose: bool,
    },
    /// Show configuration discovery information
    ShowConfig {
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
    },
    /// Write a default configuration file (defaults to ~/.lxcapi/config.toml)
    InitConfig {
        /// Destination path
        path: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(short = 'f', long = "force")]
        force: bool,
    },
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Serve {
                config,
                listen,
                lxcpath,
                runtime,
                verbose,
            }) => Ok(ExecutionMode::Serve(ServeOptions {
                config_override: config.clone(),
                listen: listen.clone(),
                lxcpath: lxcpath.clone(),
                runtime: *runtime,
                verbose: *verbose,
            })),
            Some(Commands::ShowConfig { config }) => Ok(ExecutionMode::ShowConfig {
                config: config.clone(),
            }),
            Some(Commands::InitConfig { path, force }) => Ok(ExecutionMode::InitConfig {
                path: path.clone(),
                force: *force,
            }),
            None => Err(
                "No command specified. Use 'lxcapi --help' to see available commands.".to_string(),
            ),
        }
    }
}
