mod cli;
mod display;
mod estimator;
mod iface;
mod sampler;
mod source;
mod tui;
mod watch;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, IfacesFormat};
use crate::iface::list_interfaces;

fn print_ifaces(verbose: bool, format: IfacesFormat) {
    let interfaces = list_interfaces();
    match format {
        IfacesFormat::Text => {
            if interfaces.is_empty() {
                eprintln!("<no interfaces>");
                std::process::exit(2);
            }
            for i in interfaces {
                if verbose {
                    println!(
                        "{}\t{}\trx {} bytes\ttx {} bytes",
                        i.name, i.mac, i.total_received, i.total_transmitted
                    );
                } else {
                    println!("{}", i.name);
                }
            }
        }
        IfacesFormat::Json => match serde_json::to_string_pretty(&interfaces) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        },
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .try_init()
        .ok();

    let cli = Cli::parse();
    let result: Result<i32> = match cli.command {
        Some(Commands::Ifaces { verbose, format }) => {
            print_ifaces(verbose, format);
            Ok(0)
        }
        Some(Commands::Watch(watch)) => watch::run_watch(watch),
        None => {
            Cli::command().print_help().ok();
            println!();
            Ok(0)
        }
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:?}");
            std::process::exit(exit_code_for_error(&err));
        }
    }
}

pub(crate) fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    // 2: invalid configuration, 1: other
    for cause in err.chain() {
        if cause.is::<crate::cli::ConfigError>() {
            return 2;
        }
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::ConfigError;

    #[test]
    fn exit_code_config_error() {
        let err = anyhow::Error::from(ConfigError::AlphaOutOfRange(1.5));
        assert_eq!(exit_code_for_error(&err), 2);
    }

    #[test]
    fn exit_code_wrapped_config_error() {
        let err = anyhow::Error::from(ConfigError::NoSources).context("starting watch");
        assert_eq!(exit_code_for_error(&err), 2);
    }

    #[test]
    fn exit_code_other() {
        let err = anyhow::anyhow!("other");
        assert_eq!(exit_code_for_error(&err), 1);
    }
}
