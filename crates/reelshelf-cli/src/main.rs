use clap::{ArgAction, Parser, Subcommand};
use commands::{clear, config, visit, watch, watchlist, AppContext};
use std::path::PathBuf;

mod commands;
mod logging;
mod output;

#[derive(Parser)]
#[command(name = "reelshelf")]
#[command(about = "reelshelf - Client-local watchlist, onboarding gate and release poller for the catalog")]
#[command(version)]
struct Cli {
    /// Enable verbose output (use multiple times for more verbosity: -v, -vv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "human", value_enum)]
    output: output::OutputFormat,

    /// Use this config file instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the saved watchlist
    #[command(long_about = "List, add, remove and clear watchlist entries. Entries are unique per (id, type); adding an entry that is already saved changes nothing.")]
    Watchlist {
        #[command(subcommand)]
        cmd: WatchlistCommands,
    },
    /// Inspect or complete the first-visit onboarding state
    #[command(long_about = "Show whether this profile has been through onboarding, run the onboarding gate as a page would, or mark onboarding as completed.")]
    Visit {
        #[command(subcommand)]
        cmd: VisitCommands,
    },
    /// Poll for released content and follow watchlist changes until Ctrl-C
    #[command(long_about = "Run the release poller for a page in the foreground and keep the watchlist view in sync with writes from other processes sharing this profile. Admin pages do not poll.")]
    Watch {
        /// Route of the page being hosted (admin routes suspend polling)
        #[arg(long, default_value = "/")]
        page: String,

        /// Do not follow watchlist changes from other processes
        #[arg(long, action = ArgAction::SetTrue)]
        no_sync: bool,
    },
    /// Check the auto-release endpoint once
    Poll,
    /// Show or initialise configuration
    Config {
        #[command(subcommand)]
        cmd: Option<ConfigCommands>,
    },
    /// Clear stored client state
    #[command(long_about = "Clear the saved watchlist, the visited flag, or both. Clearing the visited flag sends the next page load through onboarding again.")]
    Clear {
        /// Clear the watchlist and the visited flag
        #[arg(long, action = ArgAction::SetTrue)]
        all: bool,

        /// Clear the watchlist
        #[arg(long, action = ArgAction::SetTrue)]
        watchlist: bool,

        /// Clear the visited flag
        #[arg(long, action = ArgAction::SetTrue)]
        visited: bool,
    },
}

#[derive(Subcommand)]
pub enum WatchlistCommands {
    /// List saved entries in the order they were added
    List,
    /// Save an entry
    Add {
        /// Content id
        #[arg(long)]
        id: String,

        /// Content type: movie or tv
        #[arg(long = "type", value_name = "TYPE")]
        kind: String,

        /// Display title
        #[arg(long)]
        title: String,

        /// Poster image path
        #[arg(long)]
        poster: Option<String>,
    },
    /// Remove an entry
    Remove {
        #[arg(long)]
        id: String,

        #[arg(long = "type", value_name = "TYPE")]
        kind: String,
    },
    /// Check whether an entry is saved
    Contains {
        #[arg(long)]
        id: String,

        #[arg(long = "type", value_name = "TYPE")]
        kind: String,
    },
    /// Remove every entry
    Clear {
        /// Do not ask for confirmation
        #[arg(long, action = ArgAction::SetTrue)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum VisitCommands {
    /// Show the visit state for this profile
    Status,
    /// Run the onboarding gate as a page load would
    Gate,
    /// Record that onboarding has been shown
    Mark,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long, action = ArgAction::SetTrue)]
        force: bool,
    },
    /// Print the config file location
    Path,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let output = output::Output::new(cli.output, cli.quiet);

    // Config commands must work even when the current file does not validate
    if let Commands::Config { cmd } = cli.command {
        logging::init_logging(cli.verbose, cli.quiet, &Default::default())
            .map_err(|e| color_eyre::eyre::eyre!("{}", e))?;
        return config::run_config(cmd.unwrap_or(ConfigCommands::Show), cli.config, &output);
    }

    let ctx = AppContext::load(cli.config)?;
    let mut logging_config = ctx.config.logging.clone();
    // Long-running watch logs to a file, like a daemon
    if matches!(cli.command, Commands::Watch { .. }) {
        let log_file = ctx.config.log_file(&ctx.paths);
        output.info(format!("Logs are being written to: {}", log_file.display()));
        logging_config.file = Some(log_file);
    }
    logging::init_logging(cli.verbose, cli.quiet, &logging_config)
        .map_err(|e| color_eyre::eyre::eyre!("{}", e))?;

    match cli.command {
        Commands::Watchlist { cmd } => watchlist::run_watchlist(cmd, &ctx, &output),
        Commands::Visit { cmd } => visit::run_visit(cmd, &ctx, &output),
        Commands::Watch { page, no_sync } => watch::run_watch(&page, no_sync, &ctx, &output).await,
        Commands::Poll => watch::run_poll(&ctx, &output).await,
        Commands::Clear { all, watchlist, visited } => clear::run_clear(all, watchlist, visited, &ctx, &output),
        Commands::Config { .. } => Ok(()),
    }
}
