//! Resolves one request and prints the result as JSON.
//!
//! ```text
//! ccdb [--config <file>] <path[:run[:variation[:time]]]>
//! ```
//!
//! The connection and other settings come from the config file and `CCDB_*`
//! environment variables; `RUST_LOG` overrides the configured log filter.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use ccdb::error::{CcdbError, Result};
use ccdb::request::Request;
use ccdb::resolve::Query;
use ccdb::session::Session;
use ccdb::settings::Settings;

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "ccdb")]
#[command(about = "Resolves a calibration constants request")]
struct Args {
    /// Settings file read before the `CCDB_*` environment variables
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Request as path[:run[:variation[:time]]]
    request: String,
}

fn run(settings: &Settings, request: &str) -> Result<String> {
    let session = Session::open(settings)?;
    let request: Request = request.parse()?;
    let resolved = session.resolve(&Query::from(request).with_columns())?;
    serde_json::to_string_pretty(&resolved.report()?).map_err(|e| CcdbError::Internal(e.to_string()))
}

fn main() -> ExitCode {
    let args = Args::parse();
    let settings = match Settings::load(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    match run(&settings, &args.request) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(code = e.code(), "{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Args;

    #[test]
    fn reads_config_and_request() {
        let args = Args::try_parse_from(["ccdb", "--config", "ccdb.toml", "/test/table:100"]).expect("args");
        assert_eq!(args.config.as_deref(), Some(std::path::Path::new("ccdb.toml")));
        assert_eq!(args.request, "/test/table:100");
        let args = Args::try_parse_from(["ccdb", "/test/table"]).expect("args");
        assert!(args.config.is_none());
    }

    #[test]
    fn rejects_missing_or_extra_requests() {
        assert!(Args::try_parse_from(["ccdb"]).is_err());
        assert!(Args::try_parse_from(["ccdb", "/a/t", "/b/t"]).is_err());
        assert!(Args::try_parse_from(["ccdb", "--config"]).is_err());
    }
}
