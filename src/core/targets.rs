// src/core/targets.rs

use crate::core::errors::TargetListError;
use crate::core::models::Target;
use std::path::Path;
use tracing::{info, warn};

/// Parses a newline-delimited target list.
///
/// Blank lines and lines starting with `#` are skipped. Entries without a scheme
/// get `https://`, entries that still are not valid URLs are dropped with a warning.
pub fn parse_targets(contents: &str) -> Vec<Target> {
    contents
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let entry = line.trim();
            if entry.is_empty() || entry.starts_with('#') {
                return None;
            }
            match Target::parse(entry) {
                Ok(target) => Some(target),
                Err(e) => {
                    warn!(line = index + 1, entry, error = %e, "Skipping invalid target.");
                    None
                }
            }
        })
        .collect()
}

/// Reads and parses the target list file.
pub async fn load_targets(path: &Path) -> Result<Vec<Target>, TargetListError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| TargetListError::Read { path: path.to_path_buf(), source })?;
    let targets = parse_targets(&contents);
    info!(path = %path.display(), count = targets.len(), "Loaded targets.");
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let list = "# staging hosts\n\na.test\n   \nhttp://b.test/app\n#c.test\n";
        let targets = parse_targets(list);
        let urls: Vec<&str> = targets.iter().map(Target::as_str).collect();
        assert_eq!(urls, vec!["https://a.test", "http://b.test/app"]);
    }

    #[test]
    fn invalid_entries_are_dropped() {
        let targets = parse_targets("good.test\nbad host.test\n");
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].as_str(), "https://good.test");
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_targets(&dir.path().join("websites.txt")).await;
        assert!(matches!(result, Err(TargetListError::Read { .. })));
    }

    #[tokio::test]
    async fn file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("websites.txt");
        std::fs::write(&path, "a.test\r\nb.test\r\n").unwrap();
        let targets = load_targets(&path).await.unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1].as_str(), "https://b.test");
    }
}
