//! CLI entry point for `csvfetch`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};

use csvfetch::config::{self, Config, Protocol};
use csvfetch::mailbox::{self, PollStats};
use csvfetch::parser::eml;
use csvfetch::processor::{MessageProcessor, Outcome, ProcessorConfig};

#[derive(Parser)]
#[command(
    name = "csvfetch",
    version,
    about = "Save CSV attachments from an IMAP or POP3 mailbox into a directory"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Use POP3 instead of IMAP
    #[arg(short = '3', long)]
    pop3: bool,

    /// Mail server host name
    #[arg(short, long)]
    server: Option<String>,

    /// Port (default 993 for IMAP, 995 for POP3)
    #[arg(long)]
    port: Option<u16>,

    /// IMAP folder to poll
    #[arg(long, value_name = "FOLDER")]
    folder: Option<String>,

    /// Login user
    #[arg(short, long)]
    user: Option<String>,

    /// Login password
    #[arg(short, long, env = "CSVFETCH_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Accepted sender address pattern (repeatable, matched from the start)
    #[arg(short = 'v', long = "valid", value_name = "REGEX", global = true)]
    valid: Vec<String>,

    /// Accepted subject pattern (repeatable, matched from the start)
    #[arg(short = 'm', long = "match", value_name = "REGEX", global = true)]
    subject: Vec<String>,

    /// Directory CSV attachments are saved into (must exist)
    #[arg(short = 'f', long = "file-path", alias = "file_path", value_name = "DIR", global = true)]
    file_path: Option<PathBuf>,

    /// Delete processed messages from the server
    #[arg(short, long)]
    delete: bool,

    /// Delete mail from unlisted senders without saving anything
    #[arg(short, long, global = true)]
    ignore: bool,

    /// Only print warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Insert the message date into saved file names
    #[arg(long, global = true)]
    date_stamp: bool,

    /// Configuration file (default: $CSVFETCH_CONFIG or the user config dir)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Print the run summary as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging (--verbose info, twice debug, three times trace)
    #[arg(long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the filter and extraction on local .eml files (nothing is deleted)
    Check {
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config(),
    };
    apply_cli(&cli, &mut config);

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        None => cmd_poll(&config, cli.json),
        Some(Commands::Check { files }) => cmd_check(&config, &files, cli.json),
        Some(Commands::Completions { shell }) => cmd_completions(shell),
        Some(Commands::Manpage) => cmd_manpage(),
    }
}

/// Command-line flags win over the configuration file.
fn apply_cli(cli: &Cli, config: &mut Config) {
    if cli.pop3 {
        config.mailbox.protocol = Protocol::Pop3;
    }
    if cli.server.is_some() {
        config.mailbox.server.clone_from(&cli.server);
    }
    if cli.port.is_some() {
        config.mailbox.port = cli.port;
    }
    if let Some(folder) = &cli.folder {
        config.mailbox.folder.clone_from(folder);
    }
    if cli.user.is_some() {
        config.mailbox.user.clone_from(&cli.user);
    }
    if cli.password.is_some() {
        config.mailbox.password.clone_from(&cli.password);
    }
    if !cli.valid.is_empty() {
        config.filter.valid_senders.clone_from(&cli.valid);
    }
    if !cli.subject.is_empty() {
        config.filter.subject_patterns.clone_from(&cli.subject);
    }
    if let Some(dir) = &cli.file_path {
        config.output.directory.clone_from(dir);
    }
    config.general.delete |= cli.delete;
    config.general.quiet |= cli.quiet;
    config.filter.ignore_unmatched_sender |= cli.ignore;
    config.output.date_stamp |= cli.date_stamp;
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let file_layer = config.general.log_file.as_deref().and_then(|path| {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let name = path.file_name()?;
        std::fs::create_dir_all(dir).ok()?;
        let file_appender = tracing_appender::rolling::never(dir, name);
        Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_appender),
        )
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
}

/// Poll the configured mailbox once.
fn cmd_poll(config: &Config, json: bool) -> anyhow::Result<()> {
    config.validate()?;
    let processor = MessageProcessor::new(ProcessorConfig::from_config(config));

    let mut session = mailbox::connect(config)?;
    let stats = mailbox::poll(session.as_mut(), &processor, config.general.delete)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else if !config.general.quiet {
        print_stats_table(&stats);
    }
    Ok(())
}

/// Run local `.eml` files through the processor.
fn cmd_check(config: &Config, files: &[PathBuf], json: bool) -> anyhow::Result<()> {
    config.validate_filter()?;
    config.validate_output()?;
    let processor = MessageProcessor::new(ProcessorConfig::from_config(config));

    let mut results: Vec<(&Path, anyhow::Result<Outcome>)> = Vec::with_capacity(files.len());
    for path in files {
        let outcome = eml::read_eml(path)
            .and_then(|raw| processor.process_message(&raw))
            .with_context(|| path.display().to_string());
        if let Err(e) = &outcome {
            tracing::error!("{e:#}");
        }
        results.push((path.as_path(), outcome));
    }

    if json {
        print_check_json(&results)?;
    } else {
        print_check_table(&results);
    }
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "csvfetch", &mut std::io::stdout());
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

fn print_stats_table(stats: &PollStats) {
    println!();
    println!("  {:<20} {}", "Messages", stats.seen);
    println!("  {:<20} {}", "Accepted", stats.accepted);
    println!("  {:<20} {}", "Deleted", stats.deleted);
    println!("  {:<20} {}", "Kept on server", stats.kept);
    if stats.failed > 0 {
        println!("  {:<20} {}", "Failed", stats.failed);
    }
    println!();
}

fn print_check_table(results: &[(&Path, anyhow::Result<Outcome>)]) {
    println!();
    println!("  {:<30} {:<13} {:<30} Saved", "File", "Disposition", "From");
    println!("  {}", "-".repeat(85));
    for (path, result) in results {
        let name: String = path.display().to_string().chars().take(29).collect();
        match result {
            Ok(outcome) => {
                let from: String = outcome.sender.address.chars().take(29).collect();
                println!(
                    "  {:<30} {:<13} {:<30} {}",
                    name,
                    format!("{:?}", outcome.disposition),
                    from,
                    outcome.saved.len()
                );
            }
            Err(_) => println!("  {:<30} {:<13}", name, "Error"),
        }
    }
    println!();
}

fn print_check_json(results: &[(&Path, anyhow::Result<Outcome>)]) -> anyhow::Result<()> {
    let items: Vec<serde_json::Value> = results
        .iter()
        .map(|(path, result)| match result {
            Ok(outcome) => serde_json::json!({
                "file": path.to_string_lossy(),
                "deletable": outcome.deletable(),
                "outcome": outcome,
            }),
            Err(e) => serde_json::json!({
                "file": path.to_string_lossy(),
                "deletable": false,
                "error": format!("{e:#}"),
            }),
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&items)?);
    Ok(())
}
