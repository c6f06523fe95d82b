use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

mod bootstrap;
mod commands;
mod render;

#[derive(Parser)]
#[command(name = "marks")]
#[command(about = "MARKS - your bookmarks, kept in sync with the remote store", long_about = None)]
struct Cli {
    /// Directory holding config.toml and session.json
    #[arg(long, global = true, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Run against an in-memory remote with a signed-in demo user
    #[arg(long, global = true)]
    demo: bool,

    /// Increase log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the URL that starts the provider sign-in
    AuthUrl {
        /// Where the provider redirects after sign-in
        #[arg(long)]
        redirect_to: Option<String>,
    },
    /// Complete sign-in with the tokens returned by the redirect
    Login {
        #[arg(long)]
        access_token: String,
        #[arg(long)]
        refresh_token: Option<String>,
        /// Access token lifetime in seconds
        #[arg(long)]
        expires_in: Option<i64>,
    },
    /// Sign out and forget the stored session
    Logout,
    /// Exchange the refresh token for a new access token
    RefreshToken,
    /// Show your bookmarks
    List {
        /// Print the view as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a bookmark
    Add {
        title: String,
        /// Scheme may be omitted; https:// is assumed
        url: String,
    },
    /// Delete a bookmark by id
    Delete { id: String },
    /// Keep a live view open; reads commands from stdin
    Watch,
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let fallback = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_env("MARKS_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let app = bootstrap::bootstrap(cli.config_dir, cli.demo)?;

    match cli.command {
        Commands::AuthUrl { redirect_to } => commands::auth::auth_url(&app, redirect_to.as_deref())?,
        Commands::Login {
            access_token,
            refresh_token,
            expires_in,
        } => commands::auth::login(&app, access_token, refresh_token, expires_in).await?,
        Commands::Logout => commands::auth::logout(&app).await?,
        Commands::RefreshToken => commands::auth::refresh_token(&app).await?,
        Commands::List { json } => commands::bookmarks::list(&app, json).await?,
        Commands::Add { title, url } => commands::bookmarks::add(&app, &title, &url).await?,
        Commands::Delete { id } => commands::bookmarks::delete(&app, &id).await?,
        Commands::Watch => commands::watch::run(&app).await?,
    }

    app.controller.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["marks", "list", "--demo", "-vv"]).unwrap();
        assert!(cli.demo);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::List { json: false }));
    }

    #[test]
    fn test_login_requires_access_token() {
        assert!(Cli::try_parse_from(["marks", "login"]).is_err());
        let cli = Cli::try_parse_from(["marks", "login", "--access-token", "tok", "--expires-in", "60"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Login { expires_in: Some(60), .. }
        ));
    }
}
