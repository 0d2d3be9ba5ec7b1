//! Maintenance tool for a metarepo database.
//!
//! ```text
//! metarepo [--config FILE] attributes
//! metarepo [--config FILE] define NAME TYPE [scalar]
//! metarepo [--config FILE] dispose TENANT
//! ```
use std::process::ExitCode;

use tracing::error;
use tracing_subscriber::EnvFilter;

use metarepo::config::Configuration;
use metarepo::datatype::Type;
use metarepo::{RepoError, Repository, Result};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let mut config_path = None;
    if args.first().map(String::as_str) == Some("--config") && args.len() > 1 {
        config_path = Some(args[1].clone());
        args.drain(..2);
    }
    match run(config_path, &args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

fn run(config_path: Option<String>, args: &[String]) -> Result<()> {
    let configuration = Configuration::load(config_path)?;
    let repo = Repository::new(configuration)?;
    let words: Vec<&str> = args.iter().map(String::as_str).collect();
    let outcome = match words.as_slice() {
        ["attributes"] => {
            for info in repo.attributes()? {
                let scalar = if info.forced_scalar { " (scalar)" } else { "" };
                println!("{:>6}  {:<40} {}{scalar}", info.id, info.name, info.kind);
            }
            Ok(())
        }
        ["define", name, kind, rest @ ..] => {
            let kind: Type = kind.parse()?;
            let forced_scalar = matches!(rest, ["scalar"]);
            let info = repo.define_attribute(name, kind, forced_scalar)?;
            println!("{} {}", info.id, info.name);
            Ok(())
        }
        ["dispose", tenant] => {
            let tenant: i32 = tenant
                .parse()
                .map_err(|_| RepoError::InvalidParameter(format!("'{tenant}' is not a tenant id")))?;
            let disposed = repo.dispose(tenant)?;
            println!("{disposed} units disposed");
            Ok(())
        }
        _ => Err(RepoError::InvalidParameter(
            "usage: metarepo [--config FILE] (attributes | define NAME TYPE [scalar] | dispose TENANT)".into(),
        )),
    };
    repo.shutdown();
    outcome
}
