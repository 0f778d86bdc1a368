//! Tab-separated lines to space-aligned columns.

use kfzf_core::{render_age, ResourceStats};
use tabled::builder::Builder;
use tabled::settings::object::Segment;
use tabled::settings::{Alignment, Modify, Padding, Style};

/// Align tab-separated cells into columns separated by one space. Short lines get empty
/// trailing cells and no line ends with padding.
pub fn format_completion<S: AsRef<str>>(lines: &[S]) -> String {
    let rows: Vec<Vec<&str>> = lines.iter().map(|l| l.as_ref().split('\t').collect()).collect();
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    if columns == 0 {
        return String::new();
    }

    let mut builder = Builder::default();
    for row in &rows {
        builder.push_record(row.iter().copied().chain(std::iter::repeat("").take(columns - row.len())));
    }
    let mut table = builder.build();
    table
        .with(Style::blank())
        .with(Modify::new(Segment::all()).with(Padding::new(0, 0, 0, 0)))
        .with(Modify::new(Segment::all()).with(Alignment::left()));

    let mut out = String::new();
    for line in table.to_string().lines() {
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

/// One line per resource type and namespace with the time since the last dump.
pub fn format_stats(stats: &[ResourceStats], now: i64) -> String {
    let mut lines = vec!["Resource\tNamespace\tNumber\tLast Dumped".to_string()];
    for s in stats {
        let dumped = s
            .last_dumped
            .as_deref()
            .and_then(|d| chrono::DateTime::parse_from_rfc3339(d).ok())
            .map(|d| render_age(d.timestamp(), now))
            .unwrap_or_else(|| "Never".to_string());
        for (ns, count) in &s.item_per_namespace {
            lines.push(format!("{}\t{}\t{}\t{}", s.resource_type, ns, count, dumped));
        }
    }
    format_completion(&lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligns_columns() {
        let out = format_completion(&["header1\thead2", "comp1\tc1", "c2\tc22"]);
        assert_eq!(out, "header1 head2\ncomp1   c1\nc2      c22\n");
    }

    #[test]
    fn short_lines_get_empty_cells() {
        let out = format_completion(&["a\tb\tc", "dd\te"]);
        assert_eq!(out, "a  b c\ndd e\n");
    }

    #[test]
    fn nothing_to_format() {
        assert_eq!(format_completion::<&str>(&[]), "");
    }

    #[test]
    fn stats_table() {
        let stats = vec![ResourceStats {
            resource_type: "pods".into(),
            item_per_namespace: [("default".to_string(), 3), ("kube-system".to_string(), 7)].into_iter().collect(),
            last_dumped: Some("2024-01-01T00:00:00+00:00".into()),
        }];
        let now = chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:42+00:00").unwrap().timestamp();
        let out = format_stats(&stats, now);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "Resource Namespace   Number Last Dumped");
        assert_eq!(lines[1], "pods     default     3      42s");
        assert_eq!(lines[2], "pods     kube-system 7      42s");
    }

    #[test]
    fn stats_without_dump_say_never() {
        let stats = vec![ResourceStats {
            resource_type: "nodes".into(),
            item_per_namespace: [("None".to_string(), 1)].into_iter().collect(),
            last_dumped: None,
        }];
        assert_eq!(format_stats(&stats, 0).lines().nth(1), Some("nodes    None      1      Never"));
    }
}
