use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use residue_client::{message_format, ClientConfig, Level, LogRequest, ResidueClient};
use serde_json::Value;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("RESIDUE_GIT_SHA"),
    ")"
);

#[derive(Parser)]
#[command(name = "residue")]
#[command(about = "Send records to a Residue server and inspect the shared session")]
#[command(version = VERSION)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// Client configuration (JSON, or YAML by extension)
    #[arg(short, long, default_value = "client.conf.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send one record
    Log {
        /// Logger id
        #[arg(short, long, default_value = "default")]
        logger: String,

        /// trace, debug, fatal, error, warning, verbose or info
        #[arg(short = 'L', long, default_value = "info")]
        level: Level,

        /// Verbosity 1-9; implies the verbose level
        #[arg(short, long)]
        verbose: Option<u8>,

        /// Caller identifier attached to the record
        #[arg(long)]
        thread: Option<String>,

        /// Message, used as a printf-style format when arguments follow
        message: String,

        /// Format arguments; JSON literals are passed typed, anything else as text
        args: Vec<String>,
    },

    /// Print the shared session state as JSON
    Status,

    /// Delete the shared session and all access tokens
    Reset,
}

fn parse_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::load(&cli.config)?;
    let mut client = ResidueClient::from_config(&config)
        .with_context(|| format!("Failed to initialize client from {}", cli.config.display()))?;

    match cli.command {
        Command::Log {
            logger,
            level,
            verbose,
            thread,
            message,
            args,
        } => {
            let args: Vec<Value> = args.iter().map(String::as_str).map(parse_arg).collect();
            let message = message_format::compose(&Value::String(message), &args);
            let mut request = match verbose {
                Some(vlevel) => LogRequest::verbose(logger, vlevel, message),
                None => LogRequest::new(logger, level, message),
            };
            if let Some(thread) = thread {
                request = request.with_thread(thread);
            }
            client.try_log(&request).context("Record was not delivered")?;
        }
        Command::Status => {
            let status = client.status();
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Reset => {
            client.reset().context("Failed to reset session")?;
            println!("Session reset: {}", client.status().session_dir.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_arg_keeps_json_literals_typed() {
        assert_eq!(parse_arg("42"), json!(42));
        assert_eq!(parse_arg("true"), json!(true));
        assert_eq!(parse_arg("[1,2]"), json!([1, 2]));
        assert_eq!(parse_arg("alice"), json!("alice"));
    }

    #[test]
    fn test_cli_parses_log_command() {
        let cli = Cli::try_parse_from([
            "residue", "-c", "conf.yaml", "log", "-l", "billing", "-L", "warn", "charged %s",
            "alice",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("conf.yaml"));
        match cli.command {
            Command::Log {
                logger,
                level,
                message,
                args,
                ..
            } => {
                assert_eq!(logger, "billing");
                assert_eq!(level, Level::Warning);
                assert_eq!(message, "charged %s");
                assert_eq!(args, vec!["alice".to_string()]);
            }
            _ => panic!("expected log command"),
        }
    }
}
