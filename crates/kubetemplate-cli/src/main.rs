//! Kubetemplate CLI - configuration files from Jinja2 templates over live Kubernetes data

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod error;
mod exit_codes;

use commands::GlobalOptions;
use kubetemplate_engine::ResourceKind;
use config::TemplatePair;
use error::{CliError, Result};

#[derive(Parser)]
#[command(name = "kubetemplate")]
#[command(author = "Kubetemplate Contributors")]
#[command(version)]
#[command(about = "Render configuration files from Jinja2 templates over live Kubernetes data", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: ~/.config/kubetemplate/config.yaml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Namespace used when a template omits one
    #[arg(short, long, global = true, env = "POD_NAMESPACE")]
    namespace: Option<String>,

    /// Interval between full re-listings of watched resources (e.g. 5m, 0 to disable)
    #[arg(long, global = true, value_parser = parse_duration)]
    resync: Option<Duration>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Learn a template and render it once
    Render {
        /// Template file
        template: PathBuf,

        /// Output file (if not set, outputs to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the cluster resources templates depend on
    Deps {
        /// Template files
        #[arg(required = true)]
        templates: Vec<PathBuf>,

        /// Only list dependencies of this kind (repeatable, e.g. configmap, secrets)
        #[arg(short, long = "kind", value_name = "KIND")]
        kind: Vec<ResourceKind>,

        /// Output as JSON instead of YAML
        #[arg(long)]
        json: bool,
    },

    /// Keep output files current, reloading on every change
    Watch {
        /// Template and output file as SOURCE:OUTPUT (repeatable)
        #[arg(short = 't', long = "template", value_name = "SOURCE:OUTPUT")]
        templates: Vec<TemplatePair>,

        /// Command (and arguments) run after an output changed
        #[arg(long = "reload-cmd", value_name = "ARGV", num_args = 1.., allow_hyphen_values = true)]
        reload_cmd: Option<Vec<String>>,
    },
}

fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    if s.trim() == "0" {
        return Ok(Duration::ZERO);
    }
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(debug)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let options = GlobalOptions {
        config: cli.config,
        namespace: cli.namespace,
        resync: cli.resync,
    };

    match cli.command {
        Commands::Render { template, output } => {
            commands::render::run(&options, &template, output.as_deref()).await
        }
        Commands::Deps {
            templates,
            kind,
            json,
        } => commands::deps::run(&options, &templates, &kind, json).await,
        Commands::Watch {
            templates,
            reload_cmd,
        } => commands::watch::run(&options, &templates, reload_cmd).await,
    }
}

fn report(err: CliError) -> ExitCode {
    let code = err.exit_code();
    eprintln!("{:?}", miette::Report::new(err));
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn main() -> ExitCode {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(exit_codes::USAGE_ERROR as u8)
            } else {
                ExitCode::from(exit_codes::SUCCESS as u8)
            };
        }
    };

    init_tracing(cli.debug);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => return report(CliError::internal(format!("failed to start runtime: {}", e))),
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_watch_arguments() {
        let cli = Cli::try_parse_from([
            "kubetemplate",
            "watch",
            "-t",
            "a.j2:a.conf",
            "-t",
            "b.j2:b.conf",
            "--reload-cmd",
            "asterisk",
            "-rx",
            "core reload",
        ])
        .unwrap();
        match cli.command {
            Commands::Watch {
                templates,
                reload_cmd,
            } => {
                assert_eq!(templates.len(), 2);
                assert_eq!(templates[1].output, PathBuf::from("b.conf"));
                assert_eq!(
                    reload_cmd.unwrap(),
                    vec!["asterisk", "-rx", "core reload"]
                );
            }
            _ => panic!("expected watch"),
        }
    }

    #[test]
    fn test_parse_globals() {
        let cli = Cli::try_parse_from([
            "kubetemplate",
            "deps",
            "a.j2",
            "--json",
            "-n",
            "voice",
            "--resync",
            "90s",
        ])
        .unwrap();
        assert_eq!(cli.namespace.as_deref(), Some("voice"));
        assert_eq!(cli.resync, Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_parse_deps_kinds() {
        let cli = Cli::try_parse_from([
            "kubetemplate",
            "deps",
            "a.j2",
            "--kind",
            "configmaps",
            "-k",
            "Secret",
        ])
        .unwrap();
        match cli.command {
            Commands::Deps { kind, .. } => {
                assert_eq!(kind, vec![ResourceKind::ConfigMap, ResourceKind::Secret]);
            }
            _ => panic!("expected deps"),
        }

        let err = Cli::try_parse_from(["kubetemplate", "deps", "a.j2", "--kind", "pod"]).err();
        assert!(err.is_some_and(|e| e.to_string().contains("pod")));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_bad_template_pair_is_usage_error() {
        let err = Cli::try_parse_from(["kubetemplate", "watch", "-t", "nope"]).err();
        assert!(err.is_some_and(|e| e.use_stderr()));
    }
}
