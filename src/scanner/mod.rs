//! Discovery of candidate files under configured scan roots.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::source::{Candidate, FsSource};

/// Case-insensitive filename suffix filter for the recognized container
/// extension. Used identically by the scanner and by manual selection
/// validation.
#[derive(Debug, Clone)]
pub struct ExtensionFilter {
    // Stored with the leading dot, lowercase.
    suffix: String,
}

impl ExtensionFilter {
    pub fn new(extension: &str) -> Self {
        let ext = extension.trim_start_matches('.').to_lowercase();
        Self {
            suffix: format!(".{ext}"),
        }
    }

    /// Whether `name` carries the recognized suffix. A name that is nothing
    /// but the suffix does not match.
    pub fn matches(&self, name: &str) -> bool {
        let (n, s) = (name.len(), self.suffix.len());
        n > s && name.is_char_boundary(n - s) && name[n - s..].eq_ignore_ascii_case(&self.suffix)
    }

    /// Strip the recognized suffix, yielding the output base name. Names
    /// without the suffix are returned unchanged.
    pub fn strip<'a>(&self, name: &'a str) -> &'a str {
        if self.matches(name) {
            &name[..name.len() - self.suffix.len()]
        } else {
            name
        }
    }
}

impl Default for ExtensionFilter {
    fn default() -> Self {
        Self::new("ncm")
    }
}

/// Recursive scanner over a fixed set of root directories.
///
/// `scan` yields a lazy, finite, one-shot sequence of candidates; it does
/// not deduplicate against the catalog — `FileCatalog::add` does that on
/// merge.
pub struct DirectoryScanner {
    roots: Vec<PathBuf>,
}

impl DirectoryScanner {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// Walk every root, yielding each regular file whose name matches the
    /// filter. Roots that do not exist are skipped, not an error.
    pub fn scan<'a>(
        &'a self,
        filter: &'a ExtensionFilter,
    ) -> impl Iterator<Item = Candidate> + 'a {
        self.roots
            .iter()
            .flat_map(move |root| -> Box<dyn Iterator<Item = Candidate> + 'a> {
                if !root.is_dir() {
                    debug!("Scan root unavailable, skipping: {}", root.display());
                    return Box::new(std::iter::empty());
                }
                debug!("Scanning directory: {}", root.display());

                let walk = WalkDir::new(root)
                    .follow_links(false)
                    .into_iter()
                    .filter_map(|entry| match entry {
                        Ok(entry) => Some(entry),
                        Err(e) => {
                            warn!("Error while scanning: {}", e);
                            None
                        }
                    })
                    .filter(|entry| entry.file_type().is_file())
                    .filter_map(move |entry| {
                        let name = entry.file_name().to_str()?;
                        if !filter.matches(name) {
                            return None;
                        }
                        Some(Candidate::new(
                            Arc::new(FsSource::new(entry.path())),
                            name,
                        ))
                    });
                Box::new(walk)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, rel: &str) {
        let path = dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_filter_matches_case_insensitive() {
        let filter = ExtensionFilter::default();
        assert!(filter.matches("song.ncm"));
        assert!(filter.matches("SONG.NCM"));
        assert!(filter.matches("song.Ncm"));
        assert!(!filter.matches("song.mp3"));
        assert!(!filter.matches("songncm"));
        assert!(!filter.matches(".ncm"));
    }

    #[test]
    fn test_filter_strip_removes_suffix() {
        let filter = ExtensionFilter::new("ncm");
        assert_eq!(filter.strip("song.ncm"), "song");
        assert_eq!(filter.strip("SONG.NCM"), "SONG");
        assert_eq!(filter.strip("song.mp3"), "song.mp3");
        // Multi-byte names with an ASCII suffix.
        assert_eq!(filter.strip("海阔天空.ncm"), "海阔天空");
    }

    #[test]
    fn test_filter_accepts_leading_dot_in_extension() {
        let filter = ExtensionFilter::new(".NCM");
        assert!(filter.matches("song.ncm"));
    }

    #[test]
    fn test_scan_finds_matching_files_recursively() {
        let root = TempDir::new().unwrap();
        touch(&root, "a.ncm");
        touch(&root, "nested/deeper/b.NCM");
        touch(&root, "nested/skip.mp3");
        touch(&root, "skip.txt");

        let scanner = DirectoryScanner::new(vec![root.path().to_path_buf()]);
        let filter = ExtensionFilter::default();
        let mut found: Vec<String> = scanner.scan(&filter).map(|c| c.display_name).collect();
        found.sort();

        assert_eq!(found, vec!["a.ncm", "b.NCM"]);
    }

    #[test]
    fn test_scan_skips_missing_roots() {
        let root = TempDir::new().unwrap();
        touch(&root, "a.ncm");

        let scanner = DirectoryScanner::new(vec![
            PathBuf::from("/definitely/not/here"),
            root.path().to_path_buf(),
        ]);
        let filter = ExtensionFilter::default();
        let found: Vec<_> = scanner.scan(&filter).collect();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].display_name, "a.ncm");
    }

    #[test]
    fn test_scan_is_rewalked_from_scratch() {
        let root = TempDir::new().unwrap();
        touch(&root, "a.ncm");

        let scanner = DirectoryScanner::new(vec![root.path().to_path_buf()]);
        let filter = ExtensionFilter::default();
        assert_eq!(scanner.scan(&filter).count(), 1);

        touch(&root, "b.ncm");
        assert_eq!(scanner.scan(&filter).count(), 2);
    }

    #[test]
    fn test_scan_does_not_yield_directories() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("folder.ncm")).unwrap();
        touch(&root, "folder.ncm/inner.ncm");

        let scanner = DirectoryScanner::new(vec![root.path().to_path_buf()]);
        let filter = ExtensionFilter::default();
        let found: Vec<String> = scanner.scan(&filter).map(|c| c.display_name).collect();

        assert_eq!(found, vec!["inner.ncm"]);
    }
}
