//! `staged-render` command line

use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use staged_render::{init_logging, run_simulation, LogFormat, RenderConfig, RenderScript};
use std::path::PathBuf;

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .value_parser(value_parser!(PathBuf))
        .help("Path to a TOML render configuration")
}

fn cli() -> Command {
    Command::new("staged-render")
        .version(staged_render::VERSION)
        .about("Staged streaming render simulator")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .help("Log filter, overrides RUST_LOG"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .global(true)
                .default_value("text")
                .value_parser(value_parser!(LogFormat))
                .help("Log line format: text or json"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run a scripted render through the stage pipeline")
                .arg(config_arg())
                .arg(
                    Arg::new("script")
                        .long("script")
                        .value_parser(value_parser!(PathBuf))
                        .help("JSON render script (defaults to the built-in demo)"),
                )
                .arg(
                    Arg::new("skip-runtime")
                        .long("skip-runtime")
                        .action(ArgAction::SetTrue)
                        .help("Advance from Static straight to Dynamic"),
                )
                .arg(
                    Arg::new("validate")
                        .long("validate")
                        .action(ArgAction::SetTrue)
                        .help("Validate runtime prefetch segments"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective configuration as TOML")
                .arg(config_arg()),
        )
}

fn load_config(args: &ArgMatches) -> anyhow::Result<RenderConfig> {
    match args.get_one::<PathBuf>("config") {
        Some(path) => RenderConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(RenderConfig::default()),
    }
}

fn load_script(path: Option<&PathBuf>) -> anyhow::Result<RenderScript> {
    let Some(path) = path else {
        return Ok(RenderScript::demo());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading render script {}", path.display()))?;
    RenderScript::from_json_str(&content)
        .with_context(|| format!("parsing render script {}", path.display()))
}

fn simulate(args: &ArgMatches) -> anyhow::Result<bool> {
    let mut config = load_config(args)?;
    if args.get_flag("skip-runtime") {
        config = config.with_skip_runtime_stage(true);
    }
    if args.get_flag("validate") {
        config = config.with_validate_runtime_prefetch(true);
    }
    let script = load_script(args.get_one::<PathBuf>("script"))?;

    let report = run_simulation(&config, script).context("simulation failed")?;
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.generate_text());
    }
    Ok(report.passed())
}

fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    let format = matches
        .get_one::<LogFormat>("log-format")
        .copied()
        .unwrap_or_default();
    init_logging(
        matches.get_one::<String>("log-level").map(String::as_str),
        format,
    );

    match matches.subcommand() {
        Some(("simulate", args)) => {
            let passed = simulate(args)?;
            std::process::exit(if passed { 0 } else { 1 });
        }
        Some(("config", args)) => {
            let config = load_config(args)?;
            print!("{}", config.to_toml()?);
        }
        _ => {}
    }
    Ok(())
}
