//! CLI entry point for `billfetch`.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use billfetch::config::{self, Config};
use billfetch::mailbox::ImapSession;
use billfetch::pipeline::{Pipeline, RunMode, RunSummary};
use billfetch::registry::Registry;

#[derive(Parser)]
#[command(
    name = "billfetch",
    version,
    about = "Fetch payment statements from a mailbox and unlock them",
    long_about = "Polls an IMAP mailbox for unread statement mail from Alipay, \
China Merchants Bank credit card and WeChat Pay, stages each statement in the \
output directory, then extracts it into the extract directory, trying the \
configured archive passwords from the last line of the password file upwards."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: ./config.toml, then the user config directory)
    #[arg(short, long, env = "BILLFETCH_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Keep staged files after a successful extraction
    #[arg(short, long)]
    keep: bool,

    /// Only fetch and parse mail; skip extraction
    #[arg(short, long, conflicts_with = "extract_only")]
    parse_only: bool,

    /// Only extract already staged files; do not connect to the mailbox
    #[arg(short, long)]
    extract_only: bool,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

impl Cli {
    fn mode(&self) -> RunMode {
        if self.extract_only {
            RunMode::ExtractOnly
        } else if self.parse_only {
            RunMode::ParseOnly
        } else {
            RunMode::Full
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Completions { shell }) => return cmd_completions(shell),
        Some(Commands::Manpage) => return cmd_manpage(),
        None => {}
    }

    let config_path = config::config_file_path(cli.config.as_deref());
    if !config_path.exists() {
        anyhow::bail!("Config file not found: {}", config_path.display());
    }
    let config = config::load_config(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    cmd_run(&cli, &config)
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_file = config::log_file_path(config);
    let log_dir = log_file.parent().map(Path::to_path_buf).unwrap_or_default();
    let log_name = log_file.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, log_name);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "billfetch", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

/// Run the selected phases and print a summary.
fn cmd_run(cli: &Cli, config: &Config) -> anyhow::Result<()> {
    let mode = cli.mode();
    if mode.needs_mailbox() {
        config.validate_imap()?;
    }

    let pipeline = Pipeline::from_config(config, Registry::builtin()?).keep(cli.keep);

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Processing mail [{bar:40.cyan/blue}] {pos}/{len}")
            .expect("valid template")
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    let imap = config.imap();
    let result = pipeline.run(
        mode,
        &config.senders(),
        || ImapSession::connect(&imap),
        &|current, total| {
            pb.set_length(total as u64);
            pb.set_position(current as u64);
        },
    );
    pb.finish_and_clear();
    let summary = result?;
    let elapsed = start.elapsed();

    if cli.json {
        print_summary_json(&summary, &pipeline, elapsed)?;
    } else {
        print_summary_table(&summary, &pipeline, elapsed);
    }

    Ok(())
}

/// Print the run summary as a human-readable table.
fn print_summary_table(summary: &RunSummary, pipeline: &Pipeline, elapsed: Duration) {
    use humansize::{format_size, BINARY};

    println!();
    if let Some(parse) = &summary.parse {
        println!("  {:<22} {}", "Unread messages", parse.messages);
        println!("  {:<22} {}", "Parsed", parse.parsed);
        println!("  {:<22} {}", "No provider", parse.unmatched);
        println!("  {:<22} {}", "Parse failures", parse.failed);
    }
    if let Some(extract) = &summary.extract {
        println!("  {:<22} {}", "Extracted", extract.extracted);
        println!("  {:<22} {}", "Extract failures", extract.failed);
        println!("  {:<22} {}", "Unrecognised files", extract.skipped);
        println!("  {:<22} {}", "Staged files removed", extract.deleted);
    }

    let (count, bytes) = dir_usage(pipeline.output_dir());
    println!(
        "  {:<22} {} file(s), {}",
        "Left in staging",
        count,
        format_size(bytes, BINARY)
    );
    println!("  {:<22} {}", "Output directory", pipeline.extract_dir().display());
    println!("  {:<22} {:.2?}", "Elapsed", elapsed);
    println!();
}

/// Print the run summary as JSON.
fn print_summary_json(summary: &RunSummary, pipeline: &Pipeline, elapsed: Duration) -> anyhow::Result<()> {
    let (count, bytes) = dir_usage(pipeline.output_dir());
    let output = serde_json::json!({
        "summary": summary,
        "staging": {
            "dir": pipeline.output_dir().to_string_lossy(),
            "files": count,
            "bytes": bytes,
        },
        "extract_dir": pipeline.extract_dir().to_string_lossy(),
        "elapsed_ms": elapsed.as_millis(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Number and total size of regular files directly in `dir`.
fn dir_usage(dir: &Path) -> (usize, u64) {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.metadata().ok())
                .filter(|m| m.is_file())
                .fold((0, 0), |(n, size), m| (n + 1, size + m.len()))
        })
        .unwrap_or((0, 0))
}
