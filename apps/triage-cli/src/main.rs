use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

use triage_core::{load_config, Config};
use triage_kernel::Kernel;

mod commands;

#[derive(Parser)]
#[command(name = "triage", version, about = "Triage knowledge-base and inspection utilities")]
struct Cli {
    /// Config file (default: TRIAGE_CONFIG or configs/triage.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Override the state directory holding triage.sqlite
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import knowledge entries from a CSV file (key phrase, English answer, Hindi answer)
    SeedKb(SeedKbArgs),
    /// Print the classifier verdict for a message (JSON)
    Classify(ClassifyArgs),
    /// Print the knowledge entry that would answer a message (JSON)
    Match(MatchArgs),
    /// Print recent conversations with their messages (JSON)
    Conversations(ConversationsArgs),
    /// Print the configuration JSON schema
    ConfigSchema(PrettyArgs),
}

#[derive(Args)]
struct SeedKbArgs {
    /// CSV file to import
    file: PathBuf,
    /// Service to file entries under (default: configured default service)
    #[arg(long)]
    service: Option<String>,
}

#[derive(Args)]
struct ClassifyArgs {
    text: String,
    #[command(flatten)]
    out: PrettyArgs,
}

#[derive(Args)]
struct MatchArgs {
    /// Service whose knowledge set is searched (default: configured default service)
    #[arg(long)]
    service: Option<String>,
    text: String,
    #[command(flatten)]
    out: PrettyArgs,
}

#[derive(Args)]
struct ConversationsArgs {
    #[arg(long, default_value_t = 20)]
    limit: i64,
    #[command(flatten)]
    out: PrettyArgs,
}

#[derive(Args, Clone, Copy)]
struct PrettyArgs {
    /// Pretty-print JSON
    #[arg(long)]
    pretty: bool,
}

fn print_json(v: &serde_json::Value, pretty: bool) {
    if pretty {
        println!(
            "{}",
            serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
        );
    } else {
        println!("{}", v);
    }
}

fn effective_config(cli: &Cli) -> Result<Config> {
    let mut cfg = match &cli.config {
        Some(path) => load_config(path).with_context(|| format!("load {}", path.display()))?,
        None => triage_core::load_effective_config()?.0,
    };
    if cli.config.is_some() {
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
    }
    if let Some(dir) = &cli.state_dir {
        cfg.storage.state_dir = dir.display().to_string();
    }
    Ok(cfg)
}

fn open_kernel(cfg: &Config) -> Result<Kernel> {
    let dir = Path::new(&cfg.storage.state_dir);
    Kernel::open(dir).with_context(|| format!("open state dir {}", dir.display()))
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::ConfigSchema(args) = &cli.command {
        print_json(&triage_core::config::config_schema_json(), args.pretty);
        return Ok(());
    }
    let cfg = effective_config(&cli)?;
    match &cli.command {
        Commands::SeedKb(args) => {
            let kernel = open_kernel(&cfg)?;
            let service = args
                .service
                .clone()
                .unwrap_or_else(|| cfg.triage.default_service.clone());
            let report = commands::seed::seed_file(&kernel, &service, &args.file)?;
            println!(
                "imported {} entries into {} ({} rows skipped)",
                report.imported, service, report.skipped
            );
        }
        Commands::Classify(args) => {
            print_json(&commands::inspect::classify(&cfg, &args.text)?, args.out.pretty);
        }
        Commands::Match(args) => {
            let kernel = open_kernel(&cfg)?;
            let service = args
                .service
                .as_deref()
                .unwrap_or(&cfg.triage.default_service);
            let hit = commands::inspect::find_match(&cfg, &kernel, service, &args.text)?;
            print_json(&hit, args.out.pretty);
        }
        Commands::Conversations(args) => {
            let kernel = open_kernel(&cfg)?;
            print_json(
                &commands::inspect::conversations(&kernel, args.limit)?,
                args.out.pretty,
            );
        }
        Commands::ConfigSchema(_) => {}
    }
    Ok(())
}

fn main() {
    triage_otel::init_quiet();
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
