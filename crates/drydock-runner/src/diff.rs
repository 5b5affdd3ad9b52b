//! Unified-diff parsing and rendering.
//!
//! Parses raw unified diff text into per-file insertion/deletion stats and
//! renders the `unified`, `stat`, and `name-only` output formats.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use drydock_types::DrydockError;

/// Output format for a diff query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiffFormat {
    Unified,
    Stat,
    NameOnly,
}

impl fmt::Display for DiffFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffFormat::Unified => write!(f, "unified"),
            DiffFormat::Stat => write!(f, "stat"),
            DiffFormat::NameOnly => write!(f, "name-only"),
        }
    }
}

impl FromStr for DiffFormat {
    type Err = DrydockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unified" => Ok(DiffFormat::Unified),
            "stat" => Ok(DiffFormat::Stat),
            "name-only" => Ok(DiffFormat::NameOnly),
            other => Err(DrydockError::ConfigError(format!(
                "unrecognized diff format '{other}' (expected unified, stat, or name-only)"
            ))),
        }
    }
}

/// Per-file change counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiffStat {
    pub path: String,
    pub insertions: usize,
    pub deletions: usize,
}

/// Aggregate change counts for one diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub files_changed: usize,
    pub insertions: usize,
    pub deletions: usize,
    pub files: Vec<FileDiffStat>,
}

/// Parse unified diff text into per-file stats.
///
/// Tolerant of noise: lines outside recognized file sections are ignored
/// rather than rejected.
pub fn parse_unified_diff(text: &str) -> DiffStats {
    let mut stats = DiffStats::default();
    let mut current: Option<FileDiffStat> = None;
    let mut pending_old: Option<String> = None;

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("--- ") {
            pending_old = Some(strip_diff_prefix(rest).to_string());
            continue;
        }
        if let Some(rest) = line.strip_prefix("+++ ") {
            // `+++ b/<path>` opens a file section; `+++ /dev/null` means
            // the file was deleted, so keep the `---` side's path instead.
            let new_path = strip_diff_prefix(rest).to_string();
            let path = if new_path == "/dev/null" {
                pending_old.take().unwrap_or(new_path)
            } else {
                pending_old = None;
                new_path
            };
            if let Some(done) = current.take() {
                push_file(&mut stats, done);
            }
            current = Some(FileDiffStat {
                path,
                insertions: 0,
                deletions: 0,
            });
            continue;
        }

        if let Some(file) = current.as_mut() {
            if line.starts_with('+') {
                file.insertions += 1;
            } else if line.starts_with('-') {
                file.deletions += 1;
            }
        }
    }
    if let Some(done) = current.take() {
        push_file(&mut stats, done);
    }
    stats
}

fn push_file(stats: &mut DiffStats, file: FileDiffStat) {
    stats.files_changed += 1;
    stats.insertions += file.insertions;
    stats.deletions += file.deletions;
    stats.files.push(file);
}

/// Drop the `a/` / `b/` prefix git puts on diff paths.
fn strip_diff_prefix(path: &str) -> &str {
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
        .trim_end()
}

/// Render a parsed diff in the requested format.
pub fn render(raw: &str, stats: &DiffStats, format: DiffFormat) -> String {
    match format {
        DiffFormat::Unified => raw.to_string(),
        DiffFormat::NameOnly => {
            let mut out: Vec<&str> = stats.files.iter().map(|f| f.path.as_str()).collect();
            out.sort_unstable();
            out.join("\n")
        }
        DiffFormat::Stat => {
            let mut out = String::new();
            for file in &stats.files {
                out.push_str(&format!(
                    "{} | +{} -{}\n",
                    file.path, file.insertions, file.deletions
                ));
            }
            out.push_str(&format!(
                "{} file(s) changed, {} insertion(s), {} deletion(s)",
                stats.files_changed, stats.insertions, stats.deletions
            ));
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIFF: &str = "\
diff --git a/src/lib.rs b/src/lib.rs
index 1111111..2222222 100644
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1,4 +1,5 @@
 fn main() {
-    println!(\"old\");
+    println!(\"new\");
+    println!(\"extra\");
 }
diff --git a/README.md b/README.md
--- a/README.md
+++ b/README.md
@@ -1 +1,2 @@
 # Title
+More docs
";

    #[test]
    fn parses_per_file_counts() {
        let stats = parse_unified_diff(DIFF);
        assert_eq!(stats.files_changed, 2);
        assert_eq!(stats.insertions, 3);
        assert_eq!(stats.deletions, 1);
        assert_eq!(stats.files[0].path, "src/lib.rs");
        assert_eq!(stats.files[0].insertions, 2);
        assert_eq!(stats.files[0].deletions, 1);
        assert_eq!(stats.files[1].path, "README.md");
    }

    #[test]
    fn deleted_file_keeps_its_old_path() {
        let diff = "\
--- a/gone.rs
+++ /dev/null
@@ -1,2 +0,0 @@
-fn gone() {}
-
";
        let stats = parse_unified_diff(diff);
        assert_eq!(stats.files_changed, 1);
        assert_eq!(stats.files[0].path, "gone.rs");
        assert_eq!(stats.files[0].deletions, 2);
        assert_eq!(stats.files[0].insertions, 0);
    }

    #[test]
    fn header_lines_are_not_counted_as_changes() {
        let stats = parse_unified_diff(DIFF);
        // `+++`/`---` lines never count toward insertions/deletions.
        assert_eq!(stats.insertions, 3);
        assert_eq!(stats.deletions, 1);
    }

    #[test]
    fn empty_diff_parses_to_zero() {
        let stats = parse_unified_diff("");
        assert_eq!(stats, DiffStats::default());
    }

    #[test]
    fn renders_name_only_sorted() {
        let stats = parse_unified_diff(DIFF);
        let rendered = render(DIFF, &stats, DiffFormat::NameOnly);
        assert_eq!(rendered, "README.md\nsrc/lib.rs");
    }

    #[test]
    fn renders_stat_summary() {
        let stats = parse_unified_diff(DIFF);
        let rendered = render(DIFF, &stats, DiffFormat::Stat);
        assert!(rendered.contains("src/lib.rs | +2 -1"));
        assert!(rendered.contains("2 file(s) changed, 3 insertion(s), 1 deletion(s)"));
    }

    #[test]
    fn unified_format_is_the_raw_text() {
        let stats = parse_unified_diff(DIFF);
        assert_eq!(render(DIFF, &stats, DiffFormat::Unified), DIFF);
    }

    #[test]
    fn format_parses_from_str() {
        assert_eq!("stat".parse::<DiffFormat>().unwrap(), DiffFormat::Stat);
        assert_eq!("name-only".parse::<DiffFormat>().unwrap(), DiffFormat::NameOnly);
        assert!("sideways".parse::<DiffFormat>().is_err());
    }
}
