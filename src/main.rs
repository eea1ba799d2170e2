mod commands;
mod config;
mod error;
mod github;
mod logging;
mod settings;

fn main() -> anyhow::Result<()> {
    commands::Cli::run()
}
