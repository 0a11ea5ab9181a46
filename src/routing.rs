//! Output category routing for extracted documents.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Semantic kind of a published file, inferred from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Groceries,
    Stores,
    Promotions,
    Others,
}

impl Category {
    /// Classify a file name. First matching substring wins, case-insensitive.
    pub fn classify(file_name: &str) -> Self {
        let name = file_name.to_lowercase();
        if name.contains("price") {
            Category::Groceries
        } else if name.contains("store") {
            Category::Stores
        } else if name.contains("promo") {
            Category::Promotions
        } else {
            Category::Others
        }
    }

    /// Directory name under the output root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Category::Groceries => "groceries",
            Category::Stores => "stores",
            Category::Promotions => "promotions",
            Category::Others => "others",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Resolves `{output_root}/{category}/{username}/` for downloaded files.
#[derive(Debug, Clone)]
pub struct CategoryRouter {
    output_root: PathBuf,
}

impl CategoryRouter {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Directory for a file without touching the filesystem.
    pub fn directory(&self, file_name: &str, username: &str) -> PathBuf {
        self.output_root
            .join(Category::classify(file_name).dir_name())
            .join(username)
    }

    /// Directory for a file, created if missing.
    pub fn resolve(&self, file_name: &str, username: &str) -> std::io::Result<PathBuf> {
        let dir = self.directory(file_name, username);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

/// Local document name for a remote archive name: archive suffix swapped for `.xml`.
pub fn document_name(remote_name: &str) -> String {
    let lower = remote_name.to_lowercase();
    let stem_len = [".gz", ".zip", ".xml"]
        .iter()
        .find(|ext| lower.ends_with(*ext))
        .map(|ext| remote_name.len() - ext.len())
        .unwrap_or(remote_name.len());
    format!("{}.xml", &remote_name[..stem_len])
}

/// True for names the portals use for compressed payloads.
pub fn is_archive_name(remote_name: &str) -> bool {
    let lower = remote_name.to_lowercase();
    lower.ends_with(".gz") || lower.ends_with(".zip")
}

/// True when a remote name is one plain path component that cannot leave
/// the directory it is joined onto.
pub fn is_safe_file_name(remote_name: &str) -> bool {
    let trimmed = remote_name.trim();
    !trimmed.is_empty()
        && trimmed != "."
        && !trimmed.contains("..")
        && !remote_name.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_resolve_categories() {
        let router = CategoryRouter::new("/data/out");
        assert!(router
            .directory("DailyPriceFull.gz", "alice")
            .ends_with("groceries/alice"));
        assert!(router
            .directory("StoreList7.gz", "alice")
            .ends_with("stores/alice"));
        assert!(router
            .directory("Promo2024.gz", "alice")
            .ends_with("promotions/alice"));
        assert!(router.directory("Misc.gz", "alice").ends_with("others/alice"));
    }

    #[test]
    fn test_case_insensitive_and_priority() {
        let router = CategoryRouter::new("/data/out");
        assert!(router.directory("PRICE_01.gz", "bob").ends_with("groceries/bob"));
        // "price" outranks "promo"
        assert_eq!(Category::classify("PromoPriceFull.gz"), Category::Groceries);
        assert_eq!(Category::classify("PromoStores.gz"), Category::Stores);
    }

    #[test]
    fn test_resolve_creates_directory_idempotently() {
        let dir = tempdir().unwrap();
        let router = CategoryRouter::new(dir.path());
        let first = router.resolve("Stores.gz", "carol").unwrap();
        let second = router.resolve("Stores.gz", "carol").unwrap();
        assert_eq!(first, second);
        assert!(first.is_dir());
        assert_eq!(first, dir.path().join("stores").join("carol"));
    }

    #[test]
    fn test_document_name() {
        assert_eq!(document_name("PriceFull-001.gz"), "PriceFull-001.xml");
        assert_eq!(document_name("Stores.ZIP"), "Stores.xml");
        assert_eq!(document_name("Promo.xml"), "Promo.xml");
        assert_eq!(document_name("Promo-2024"), "Promo-2024.xml");
    }

    #[test]
    fn test_is_archive_name() {
        assert!(is_archive_name("a.gz"));
        assert!(is_archive_name("a.ZIP"));
        assert!(!is_archive_name("a.xml"));
        assert!(!is_archive_name("index.html"));
    }

    #[test]
    fn test_is_safe_file_name() {
        assert!(is_safe_file_name("PriceFull7290027600007-001-202405011000.gz"));
        assert!(is_safe_file_name("Promo 2024.gz"));
        assert!(!is_safe_file_name("../../../escaped.gz"));
        assert!(!is_safe_file_name("sub/Price.gz"));
        assert!(!is_safe_file_name("..\\Price.gz"));
        assert!(!is_safe_file_name("/etc/Price.gz"));
        assert!(!is_safe_file_name("   "));
        assert!(!is_safe_file_name(""));
        assert!(!is_safe_file_name("Price\0.gz"));
    }
}
