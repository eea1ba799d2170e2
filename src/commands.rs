use crate::config::{Entry, Store};
use crate::error::CliError;
use crate::github::{DispatchRequest, Dispatcher, GitHubApi, WorkflowApi, DEFAULT_REF};
use crate::logging;
use crate::settings::Settings;
use anyhow::{Context, Result};
use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const DEFAULT_TARGET_REPO: &str = "ooooo-create/ob";
const UPDATE_WORKFLOW: &str = "autotable-update.yml";

#[derive(Parser, Debug)]
#[command(
    name = "ob",
    author,
    version,
    about = "Track autoTable issues by alias and trigger their update workflow"
)]
#[command(
    long_about = "A command-line tool that keeps a local table of aliases pointing at \
    GitHub issues managed by autoTable, and triggers the autoTable update workflow \
    for them through the GitHub Actions API."
)]
pub struct Cli {
    /// Path of the alias store
    #[arg(
        long,
        global = true,
        env = "OB_CONFIG",
        value_name = "PATH",
        help = "Alias store file (default: ~/.ob_config)"
    )]
    config: Option<PathBuf>,

    #[arg(
        short,
        long,
        global = true,
        action = ArgAction::Count,
        help = "Show more log output (-v info, -vv debug)"
    )]
    verbose: u8,

    #[arg(short, long, global = true, help = "Only log errors")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Create the alias store
    #[command(about = "Create the alias store file if it does not exist")]
    Init,
    /// Manage issues tracked by autoTable
    #[command(about = "Manage issues tracked by autoTable", alias = "t")]
    Table {
        #[command(subcommand)]
        command: TableCommands,
    },
    /// Generate shell completions
    #[command(about = "Generate shell completion scripts")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
enum TableCommands {
    #[command(about = "Add a new issue under a unique alias")]
    Add {
        #[arg(help = "Unique alias for the issue")]
        alias: String,
        #[arg(help = "Repository in owner/repo form")]
        repo: String,
        #[arg(
            help = "Issue number",
            value_parser = clap::value_parser!(u64).range(1..)
        )]
        issue_number: u64,
    },
    #[command(about = "Remove an issue by alias", alias = "rm")]
    Remove {
        #[arg(help = "Alias to remove")]
        alias: String,
    },
    #[command(about = "Show all issues tracked by autoTable", alias = "ls")]
    Show,
    #[command(about = "Trigger the autoTable update workflow for an issue")]
    Update(UpdateArgs),
}

#[derive(Args, Debug, PartialEq)]
struct UpdateArgs {
    #[arg(help = "Repository in owner/repo form")]
    owner_repo: Option<String>,

    #[arg(help = "Issue number", value_parser = clap::value_parser!(u64).range(1..))]
    issue_number: Option<u64>,

    #[arg(short, long, help = "Use a stored alias instead of repo and issue number")]
    alias: Option<String>,

    #[arg(
        long,
        default_value = DEFAULT_TARGET_REPO,
        help = "Repository that hosts the update workflow"
    )]
    target_repo: String,

    #[arg(long, help = "GitHub token (default: $GITHUB_TOKEN, then $PAT)")]
    token: Option<String>,

    #[arg(long, default_value = UPDATE_WORKFLOW, help = "Workflow file name or id")]
    workflow: String,

    #[arg(long = "ref", default_value = DEFAULT_REF, help = "Branch, tag or SHA to run on")]
    git_ref: String,
}

impl Cli {
    pub fn run() -> Result<()> {
        // Loaded first so OB_CONFIG and the token variables can come from .env.
        dotenvy::dotenv().ok();
        let cli = Self::parse();
        logging::init(cli.verbose, cli.quiet);

        match cli.command {
            Commands::Completion { shell } => {
                let mut cmd = Self::command();
                let bin_name = cmd.get_name().to_string();
                generate(shell, &mut cmd, bin_name, &mut io::stdout());
            }
            Commands::Init => {
                let settings = Settings::from_env(cli.config)?;
                let path = &settings.config_path;
                if Store::init(path)? {
                    println!("✓ Config file created: {}", path.display());
                } else {
                    println!("✓ Config file already exists: {}", path.display());
                }
            }
            Commands::Table { command } => {
                let settings = Settings::from_env(cli.config)?;
                run_table(command, &settings)?;
            }
        }

        Ok(())
    }

    #[cfg(test)]
    pub fn parse_from(args: &[&str]) -> Self {
        Self::try_parse_from(args).unwrap()
    }
}

fn run_table(command: TableCommands, settings: &Settings) -> Result<()> {
    debug!(?settings, "resolved settings");

    match command {
        TableCommands::Add {
            alias,
            repo,
            issue_number,
        } => {
            let mut store = Store::open(&settings.config_path)?;
            store.add(&alias, &repo, issue_number)?;
            println!("✓ Added '{}'.", alias);
        }
        TableCommands::Remove { alias } => {
            let mut store = Store::open(&settings.config_path)?;
            store.remove(&alias)?;
            println!("✓ Removed '{}'.", alias);
        }
        TableCommands::Show => {
            let store = Store::open(&settings.config_path)?;
            debug!(
                readable = store.list().len(),
                total = store.entries().len(),
                "showing alias table"
            );
            let mut stdout = io::stdout().lock();
            write_table(&mut stdout, store.entries())?;
        }
        TableCommands::Update(args) => {
            let api = GitHubApi::new(&settings.api_url)?;
            let mut dispatcher = Dispatcher::new(api, settings.credentials.clone());
            if update(&args, &settings.config_path, &mut dispatcher)? {
                println!("✓ Update triggered.");
            }
        }
    }
    Ok(())
}

/// Alias wins over positional arguments; otherwise both positionals are required.
fn resolve_target(args: &UpdateArgs, config_path: &Path) -> Result<(String, u64)> {
    if let Some(alias) = &args.alias {
        let store = Store::open(config_path)?;
        let record = store.get(alias)?;
        return Ok((record.repo.clone(), record.issue_number));
    }

    match (&args.owner_repo, args.issue_number) {
        (Some(repo), Some(issue_number)) => Ok((repo.clone(), issue_number)),
        _ => Err(CliError::InsufficientArguments.into()),
    }
}

fn update<A: WorkflowApi, W: Write>(
    args: &UpdateArgs,
    config_path: &Path,
    dispatcher: &mut Dispatcher<A, W>,
) -> Result<bool> {
    let (owner_repo, issue_number) = match resolve_target(args, config_path) {
        Ok(target) => target,
        Err(e) => {
            if e.is::<CliError>() {
                eprintln!("\nUsage examples:");
                eprintln!("  ob table update PaddlePaddle/Paddle 63683");
                eprintln!("  ob table update --alias 'typos 1.38.1'");
            }
            return Err(e);
        }
    };

    println!("🚀 Triggering update for {}#{}...", owner_repo, issue_number);
    let request = DispatchRequest::new(args.target_repo.as_str(), args.workflow.as_str())
        .git_ref(args.git_ref.as_str())
        .input("owner_repo", owner_repo)
        .input("issue_number", issue_number.to_string())
        .credential(args.token.clone());

    dispatcher
        .dispatch(&request)
        .with_context(|| format!("Failed to dispatch workflow on {}", args.target_repo))
}

fn write_table(out: &mut impl Write, entries: &[Entry]) -> io::Result<()> {
    if entries.is_empty() {
        writeln!(out, "No entries found in the config file.")?;
        return Ok(());
    }

    let rows: Vec<[String; 3]> = entries.iter().map(table_row).collect();
    let headers = ("Alias", "Repo", "Issue");
    let alias_width = column_width(headers.0, rows.iter().map(|r| r[0].as_str()));
    let repo_width = column_width(headers.1, rows.iter().map(|r| r[1].as_str()));

    writeln!(
        out,
        "{} {} {}",
        pad(headers.0, alias_width),
        pad(headers.1, repo_width),
        headers.2
    )?;
    for (row, entry) in rows.iter().zip(entries) {
        write!(out, "{} {} {}", pad(&row[0], alias_width), pad(&row[1], repo_width), row[2])?;
        if let Entry::Invalid(section) = entry {
            write!(out, " (invalid: {})", section.reason)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

fn table_row(entry: &Entry) -> [String; 3] {
    match entry {
        Entry::Record(record) => [
            record.alias.clone(),
            record.repo.clone(),
            record.issue_number.to_string(),
        ],
        Entry::Invalid(section) => [
            section.alias.clone(),
            section.repo().unwrap_or("N/A").to_string(),
            section.issue_number().unwrap_or_else(|| "N/A".to_string()),
        ],
    }
}

fn column_width<'a>(header: &str, cells: impl Iterator<Item = &'a str>) -> usize {
    cells
        .map(|c| c.chars().count())
        .chain(std::iter::once(header.chars().count()))
        .max()
        .unwrap_or(0)
}

fn pad(cell: &str, width: usize) -> String {
    let fill = width.saturating_sub(cell.chars().count());
    format!("{}{}", cell, " ".repeat(fill))
}
