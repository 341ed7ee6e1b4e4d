//! Text rendering of aggregated results for CLI output.

use crate::model::{AggregatedResultSet, ArchiveDescriptor, PostRecord};
use time::macros::format_description;
use time::OffsetDateTime;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

const COMMENT_PREVIEW_CHARS: usize = 280;

fn format_timestamp(ts: i64) -> Option<String> {
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]:[second] UTC");
    OffsetDateTime::from_unix_timestamp(ts)
        .ok()
        .and_then(|dt| dt.format(fmt).ok())
}

fn preview(comment: &str) -> String {
    let flat = comment.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > COMMENT_PREVIEW_CHARS {
        let cut: String = flat.chars().take(COMMENT_PREVIEW_CHARS).collect();
        format!("{cut}…")
    } else {
        flat
    }
}

/// Archive permalink for a post, when both the site and the board are known.
pub(crate) fn permalink(post: &PostRecord) -> Option<String> {
    let archive = ArchiveDescriptor::by_site_name(&post.source)?;
    let board = post.board.as_ref()?.short_name();
    if board.is_empty() || board == "_" {
        return None;
    }
    Some(format!("{}/{}/post/{}", archive.base_url, board, post.num))
}

fn post_lines(index: usize, post: &PostRecord, lines: &mut Vec<String>) {
    lines.push(format!("{index}. Post ID: {}", post.num));

    let board = match &post.board {
        Some(b) => match b.display_name() {
            Some(name) => format!("/{}/ {}", b.short_name(), name),
            None => format!("/{}/", b.short_name()),
        },
        None => "_".to_string(),
    };
    let thread = post
        .thread_num
        .map(|t| t.to_string())
        .unwrap_or_else(|| "N/A".into());
    let when = post
        .timestamp
        .and_then(format_timestamp)
        .unwrap_or_else(|| "N/A".into());
    lines.push(format!("   Board: {board} | Thread: {thread} | Timestamp: {when}"));

    if let Some(link) = permalink(post) {
        lines.push(format!("   View: {link}"));
    }
    match post.comment.as_deref().map(preview) {
        Some(c) if !c.is_empty() => lines.push(format!("   {c}")),
        _ => lines.push("   No Comment".to_string()),
    }
    if let Some(media) = post.media.as_ref().and_then(|m| m.media_orig.as_deref()) {
        lines.push(format!("   Media: {media}"));
    }
}

/// Build the count table followed by posts grouped per site encounter.
pub(crate) fn build_text_summary(set: &AggregatedResultSet) -> TextSummary {
    let mut lines = Vec::new();
    if set.is_empty() {
        lines.push("No results found.".to_string());
        return TextSummary { lines };
    }
    if set.posts.is_empty() {
        lines.push("No results found.".to_string());
    }

    let width = set
        .site_counts
        .iter()
        .map(|c| c.count.to_string().len())
        .max()
        .unwrap_or(0)
        .max("Search Count".len());
    lines.push(format!("{:<width$}  Site", "Search Count"));
    for c in &set.site_counts {
        lines.push(format!("{:<width$}  {}", c.count, c.site));
    }

    let mut index = 1;
    for group in set.groups() {
        lines.push(String::new());
        let header = if group.site.is_empty() {
            "(unknown source)"
        } else {
            group.site
        };
        lines.push(format!("== {header} =="));
        for post in group.posts {
            post_lines(index, post, &mut lines);
            index += 1;
        }
    }

    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{aggregate, RawResultPayload};
    use serde_json::json;

    fn summary(v: serde_json::Value) -> Vec<String> {
        build_text_summary(&aggregate(&RawResultPayload::from_value(v))).lines
    }

    #[test]
    fn empty_results() {
        assert_eq!(summary(json!([])), vec!["No results found."]);
    }

    #[test]
    fn table_then_groups() {
        let lines = summary(json!([
            "desuarchive",
            {"num": 7, "board": {"short_name": "a", "name": "Anime"}, "thread_num": 5,
             "timestamp": 0, "comment": "hello\n  world"},
            "moe",
            {"num": 8}
        ]));
        assert_eq!(lines[0], "Search Count  Site");
        assert_eq!(lines[1], "1             desuarchive");
        assert_eq!(lines[2], "1             moe");
        assert!(lines.contains(&"== desuarchive ==".to_string()));
        assert!(lines.contains(&"1. Post ID: 7".to_string()));
        assert!(lines.contains(
            &"   Board: /a/ Anime | Thread: 5 | Timestamp: 1970-01-01 00:00:00 UTC".to_string()
        ));
        assert!(lines.contains(&"   View: https://desuarchive.org/a/post/7".to_string()));
        assert!(lines.contains(&"   hello world".to_string()));
        assert!(lines.contains(&"2. Post ID: 8".to_string()));
        assert!(lines.contains(&"   No Comment".to_string()));
    }

    #[test]
    fn markers_without_posts_still_show_counts() {
        let lines = summary(json!(["a", "b"]));
        assert_eq!(lines[0], "No results found.");
        assert_eq!(lines[1], "Search Count  Site");
    }

    #[test]
    fn long_comments_are_truncated() {
        let long = "x".repeat(COMMENT_PREVIEW_CHARS + 10);
        let p = preview(&long);
        assert!(p.ends_with('…'));
        assert_eq!(p.chars().count(), COMMENT_PREVIEW_CHARS + 1);
    }
}
