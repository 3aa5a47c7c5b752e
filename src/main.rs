use clap::{CommandFactory, Parser, Subcommand};

use flowmap::map;
use flowmap::map_opt::{self, MapOpt};

#[derive(Parser)]
#[command(name = "flowmap")]
#[command(about = "flowmap - staged multi-algorithm short-read mapper", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Map reads against a reference through staged algorithms
    ///
    /// The arguments follow the stage grammar:
    /// [global-opts] stage1 [stage-opts] <algorithm> [algo-opts]
    /// [<algorithm> [algo-opts] ...] [stage2 ...]
    Map {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "ARGS")]
        args: Vec<String>,
    },
}

fn init_logger(verbosity: i32) {
    // Map verbosity (1=error, 2=warning, 3=message, 4=debug, 5+=trace)
    // to Rust log levels
    let log_level = match verbosity {
        v if v <= 1 => log::LevelFilter::Error,
        2 => log::LevelFilter::Warn,
        3 => log::LevelFilter::Info,
        4 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Map { args } => {
            // resolve before logger setup so -v can configure it
            let resolved = match map_opt::parse_stage_args(&args) {
                Ok(resolved) => resolved,
                Err(e) => {
                    eprintln!("{e}");
                    eprintln!(
                        "Usage: flowmap map [global-opts] stage<N> [stage-opts] \
                         <algorithm> [algo-opts] ... [stage<M> ...]"
                    );
                    eprintln!("{}", MapOpt::command().render_help());
                    std::process::exit(1);
                }
            };

            init_logger(resolved.global.verbosity());

            match map::run_resolved(&resolved) {
                Ok(stats) => {
                    log::info!(
                        "Terminating successfully: {} reads, {} mapped",
                        stats.reads,
                        stats.mapped
                    );
                }
                Err(e) => {
                    log::error!("{e}");
                    std::process::exit(1);
                }
            }
        }
    }
}
