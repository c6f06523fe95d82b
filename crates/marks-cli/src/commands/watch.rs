use crate::bootstrap::AppBootstrap;
use crate::render::{render_notice, render_view};
use anyhow::Result;
use marks_application::SyncEvent;
use marks_core::bookmark::BookmarkGateway;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

const HELP: &str = "\
commands:
  add <title> <url>     add a bookmark
  rm <id>               delete a bookmark
  refresh               reload from the remote store
  logout                sign out
  remote <title> <url>  (demo) insert as another client
  quit";

#[derive(Debug, PartialEq, Eq)]
enum WatchCommand {
    Add { title: String, url: String },
    Delete(String),
    Refresh,
    Logout,
    RemoteInsert { title: String, url: String },
    Help,
    Quit,
    Unknown(String),
}

/// `<title words...> <url>`: the last word is the url.
fn split_title_url(rest: &str) -> Option<(String, String)> {
    let (title, url) = rest.trim().rsplit_once(char::is_whitespace)?;
    Some((title.trim().to_string(), url.to_string()))
}

fn parse_command(line: &str) -> Option<WatchCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let command = match verb {
        "add" => match split_title_url(rest) {
            Some((title, url)) => WatchCommand::Add { title, url },
            None => WatchCommand::Unknown(line.to_string()),
        },
        "remote" => match split_title_url(rest) {
            Some((title, url)) => WatchCommand::RemoteInsert { title, url },
            None => WatchCommand::Unknown(line.to_string()),
        },
        "rm" | "delete" if !rest.trim().is_empty() => WatchCommand::Delete(rest.trim().to_string()),
        "refresh" => WatchCommand::Refresh,
        "logout" => WatchCommand::Logout,
        "help" | "?" => WatchCommand::Help,
        "quit" | "exit" | "q" => WatchCommand::Quit,
        _ => WatchCommand::Unknown(line.to_string()),
    };
    Some(command)
}

fn redraws(event: &SyncEvent) -> bool {
    matches!(
        event,
        SyncEvent::StateChanged(_)
            | SyncEvent::Reconciled { .. }
            | SyncEvent::Inserted(_)
            | SyncEvent::Deleted { .. }
    )
}

/// Runs the live view until `quit` or Ctrl-C.
pub async fn run(app: &AppBootstrap) -> Result<()> {
    let shutdown = CancellationToken::new();
    let mut events = app.controller.subscribe_events();
    let event_loop = app.controller.start(shutdown.clone());

    if let Err(e) = app.sessions.initialize().await {
        eprintln!("! {}", e);
    }
    eprintln!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = events.recv() => match received {
                Ok(event) => {
                    if let Some(notice) = render_notice(&event) {
                        eprintln!("{}", notice);
                    }
                    if redraws(&event) {
                        print!("{}", render_view(&app.controller.view().await));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("[Watch] Skipped {} events", skipped);
                    print!("{}", render_view(&app.controller.view().await));
                }
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => {
                    if !execute(app, &line).await {
                        break;
                    }
                }
                None => stdin_open = false,
            },
        }
    }

    shutdown.cancel();
    if let Err(e) = event_loop.await {
        tracing::warn!("[Watch] Event loop ended abnormally: {}", e);
    }
    Ok(())
}

/// Returns false when the user asked to quit.
async fn execute(app: &AppBootstrap, line: &str) -> bool {
    let Some(command) = parse_command(line) else {
        return true;
    };
    // Failures of add, rm and refresh arrive as notices on the event stream.
    match command {
        WatchCommand::Add { title, url } => {
            let _ = app.controller.add_bookmark(&title, &url).await;
        }
        WatchCommand::Delete(id) => {
            let _ = app.controller.delete_bookmark(&id).await;
        }
        WatchCommand::Refresh => {
            let _ = app.controller.refresh().await;
        }
        WatchCommand::Logout => {
            if let Err(e) = app.controller.sign_out().await {
                eprintln!("! sign-out: {}", e);
            }
        }
        WatchCommand::RemoteInsert { title, url } => match &app.demo_remote {
            Some(remote) => match app.sessions.current() {
                Some(session) => {
                    if let Err(e) = remote.insert(&session.owner_id, &title, &url).await {
                        eprintln!("! remote insert: {}", e);
                    }
                }
                None => eprintln!("! not signed in"),
            },
            None => eprintln!("! `remote` is only available with --demo"),
        },
        WatchCommand::Help => eprintln!("{}", HELP),
        WatchCommand::Quit => return false,
        WatchCommand::Unknown(input) => eprintln!("? unknown command: {} (try `help`)", input),
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_add_uses_last_word_as_url() {
        assert_eq!(
            parse_command("add The Rust Book doc.rust-lang.org/book"),
            Some(WatchCommand::Add {
                title: "The Rust Book".to_string(),
                url: "doc.rust-lang.org/book".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse_command("   "), None);
        assert_eq!(parse_command("rm b-1"), Some(WatchCommand::Delete("b-1".to_string())));
        assert_eq!(parse_command("refresh"), Some(WatchCommand::Refresh));
        assert_eq!(parse_command("q"), Some(WatchCommand::Quit));
    }

    #[test]
    fn test_parse_incomplete_commands_are_unknown() {
        assert!(matches!(parse_command("add onlyone"), Some(WatchCommand::Unknown(_))));
        assert!(matches!(parse_command("rm"), Some(WatchCommand::Unknown(_))));
        assert!(matches!(parse_command("frobnicate"), Some(WatchCommand::Unknown(_))));
    }

    #[test]
    fn test_redraw_events() {
        assert!(redraws(&SyncEvent::Deleted { id: "x".to_string() }));
        assert!(!redraws(&SyncEvent::ReconcileDiscarded {
            owner_id: "u".to_string(),
            reason: marks_application::DiscardReason::Superseded,
        }));
    }
}
