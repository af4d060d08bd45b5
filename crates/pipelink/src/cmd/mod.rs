use std::path::PathBuf;

use clap::{Args, Subcommand};
use pipelink_frame::Timeout;
use pipelink_peer::{PipeService, ProcessIdentity, ServiceConfig};

use crate::exit::{peer_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod request;
pub mod send;
pub mod serve;
pub mod version;

/// App name announced in handshakes by this binary.
pub const APP_NAME: &str = "pipelink";

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the demo handler on a local pipe until Ctrl-C.
    Serve(ServeArgs),
    /// Send one request and print the reply value.
    Request(CallArgs),
    /// Deliver one message and wait for the acknowledgement.
    Send(CallArgs),
    /// Show version information.
    Version(VersionArgs),
}

/// Options shared by every command.
#[derive(Args, Debug, Default, Clone)]
pub struct GlobalArgs {
    /// Service configuration file (JSON).
    #[arg(long, value_name = "FILE", global = true, env = "PIPELINK_CONFIG")]
    pub config: Option<PathBuf>,
    /// Directory holding the pipe sockets (Unix).
    #[arg(long, value_name = "DIR", global = true, env = "PIPELINK_SOCKET_DIR")]
    pub socket_dir: Option<PathBuf>,
}

pub fn run(command: Command, global: &GlobalArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, global),
        Command::Request(args) => request::run(args, global, format),
        Command::Send(args) => send::run(args, global),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Pipe name to listen on. Overrides the config file.
    pub name: Option<String>,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Pipe name of the remote service.
    pub name: String,
    /// Host of the remote service (`.` is this machine).
    #[arg(long, default_value = ".")]
    pub host: String,
    /// JSON request payload.
    #[arg(long)]
    pub json: String,
    /// Call budget (e.g. 5s, 500ms, infinite). Defaults to the configured
    /// send timeout.
    #[arg(long)]
    pub timeout: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Load the configuration file (or defaults) and apply command-line
/// overrides.
pub fn load_config(global: &GlobalArgs, pipe_name: Option<&str>) -> CliResult<ServiceConfig> {
    let mut config = match &global.config {
        Some(path) => ServiceConfig::from_json_file(path)
            .map_err(|err| peer_error("config rejected", err))?,
        None => ServiceConfig::default(),
    };
    if let Some(dir) = &global.socket_dir {
        config.socket_dir = Some(dir.clone());
    }
    if let Some(name) = pipe_name {
        config.pipe_name = name.to_string();
    }
    config
        .validate()
        .map_err(|err| peer_error("config rejected", err))?;
    Ok(config)
}

pub fn build_service(config: ServiceConfig) -> CliResult<PipeService> {
    let identity = ProcessIdentity::current(APP_NAME, env!("CARGO_PKG_VERSION"));
    PipeService::new(config, identity).map_err(|err| peer_error("service setup failed", err))
}

pub fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("pipelink-worker")
        .build()
        .map_err(|err| CliError::new(INTERNAL, format!("runtime setup failed: {err}")))
}

pub fn parse_timeout(input: &str) -> CliResult<Timeout> {
    input
        .parse()
        .map_err(|err| CliError::new(USAGE, format!("--timeout: {err}")))
}

pub fn parse_json(input: &str) -> CliResult<serde_json::Value> {
    serde_json::from_str(input)
        .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))
}
