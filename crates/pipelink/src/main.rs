mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::{Command, GlobalArgs};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "pipelink", version, about = "Request/reply messaging over local pipes")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, &cli.global, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn parses_request_subcommand() {
        let cli = Cli::try_parse_from([
            "pipelink",
            "request",
            "billing",
            "--host",
            "node-b",
            "--json",
            "{\"op\":\"echo\"}",
            "--timeout",
            "2s",
        ])
        .expect("request args should parse");

        match cli.command {
            Command::Request(args) => {
                assert_eq!(args.name, "billing");
                assert_eq!(args.host, "node-b");
                assert_eq!(args.timeout.as_deref(), Some("2s"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn host_defaults_to_local() {
        let cli = Cli::try_parse_from(["pipelink", "send", "svc", "--json", "1"])
            .expect("send args should parse");
        match cli.command {
            Command::Send(args) => assert_eq!(args.host, "."),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn request_requires_json() {
        let err = Cli::try_parse_from(["pipelink", "request", "svc"])
            .expect_err("missing --json should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn global_options_follow_subcommand() {
        let cli = Cli::try_parse_from([
            "pipelink",
            "serve",
            "demo",
            "--socket-dir",
            "/tmp/pl",
            "--log-level",
            "debug",
        ])
        .expect("serve args should parse");
        assert_eq!(cli.global.socket_dir, Some(PathBuf::from("/tmp/pl")));
        assert_eq!(cli.log_level, LogLevel::Debug);
        assert!(matches!(cli.command, Command::Serve(_)));
    }
}
