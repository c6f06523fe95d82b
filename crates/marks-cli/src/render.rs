//! Plain-text rendering of sync snapshots.

use marks_application::{SyncEvent, SyncState, SyncView};
use marks_core::bookmark::Bookmark;
use std::fmt::Write;

pub fn render_view(view: &SyncView) -> String {
    let mut out = String::new();
    match &view.state {
        SyncState::Authenticating => out.push_str("Loading...\n"),
        SyncState::Unauthenticated => {
            out.push_str("Not signed in. Run `marks auth-url` to start signing in.\n")
        }
        SyncState::Authenticated { owner_id } => {
            let _ = writeln!(out, "Bookmarks of {} ({})", owner_id, view.records.len());
            if view.records.is_empty() {
                out.push_str("  (none yet)\n");
            }
            for bookmark in &view.records {
                out.push_str(&render_bookmark(bookmark));
                out.push('\n');
            }
        }
    }
    out
}

pub fn render_bookmark(bookmark: &Bookmark) -> String {
    let host = bookmark.host().unwrap_or_else(|| "-".to_string());
    format!(
        "  {}  {}  [{}]  {}  ({})",
        bookmark.id,
        bookmark.title,
        host,
        bookmark.url,
        bookmark.created_at.format("%Y-%m-%d %H:%M")
    )
}

/// One-line notice for events worth telling the user about.
pub fn render_notice(event: &SyncEvent) -> Option<String> {
    match event {
        SyncEvent::ReconcileFailed { error, .. } => Some(format!("! refresh failed: {}", error)),
        SyncEvent::InsertFailed(error) => Some(format!("! add failed: {}", error)),
        SyncEvent::DeleteFailed { id, error } => Some(format!("! delete of {} failed: {}", id, error)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use marks_core::error::MarksError;

    fn bookmark() -> Bookmark {
        Bookmark {
            id: "b-1".to_string(),
            title: "Rust".to_string(),
            url: "https://www.rust-lang.org/learn".to_string(),
            owner_id: "u".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_render_signed_in_view() {
        let view = SyncView {
            state: SyncState::Authenticated {
                owner_id: "u".to_string(),
            },
            records: vec![bookmark()],
        };
        let rendered = render_view(&view);
        assert!(rendered.starts_with("Bookmarks of u (1)"));
        assert!(rendered.contains("[www.rust-lang.org]"));
        assert!(rendered.contains("2024-05-01 12:30"));
    }

    #[test]
    fn test_render_signed_out_and_loading() {
        let signed_out = SyncView {
            state: SyncState::Unauthenticated,
            records: Vec::new(),
        };
        assert!(render_view(&signed_out).contains("Not signed in"));

        let loading = SyncView {
            state: SyncState::Authenticating,
            records: Vec::new(),
        };
        assert_eq!(render_view(&loading), "Loading...\n");
    }

    #[test]
    fn test_notice_only_for_failures() {
        assert!(render_notice(&SyncEvent::Deleted { id: "x".to_string() }).is_none());
        let notice = render_notice(&SyncEvent::InsertFailed(MarksError::remote("insert", "boom")));
        assert!(notice.unwrap().contains("boom"));
    }
}
