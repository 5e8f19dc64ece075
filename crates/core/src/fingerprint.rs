//! Content fingerprints used as cache keys and upload dedup hashes.

use std::path::Path;
use tokio::io::AsyncReadExt;

use crate::format::Category;

/// Default number of source bytes hashed.
pub const DEFAULT_PREFIX_BYTES: usize = 1024 * 1024;

/// Hashes a bounded prefix of a file together with the conversion target.
///
/// Only the first `prefix_limit` bytes are read, so two files sharing that
/// prefix produce the same key.
#[derive(Debug, Clone, Copy)]
pub struct ContentFingerprinter {
    prefix_limit: usize,
}

impl Default for ContentFingerprinter {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX_BYTES)
    }
}

impl ContentFingerprinter {
    pub fn new(prefix_limit: usize) -> Self {
        Self {
            prefix_limit: prefix_limit.max(1),
        }
    }

    pub fn prefix_limit(&self) -> usize {
        self.prefix_limit
    }

    /// MD5 over `prefix ‖ target ‖ category`, hex encoded. Bytes past the
    /// limit are ignored.
    pub fn fingerprint(&self, prefix: &[u8], target_format: &str, category: Category) -> String {
        let prefix = &prefix[..prefix.len().min(self.prefix_limit)];
        let mut context = md5::Context::new();
        context.consume(prefix);
        context.consume(target_format.as_bytes());
        context.consume(category.as_str().as_bytes());
        format!("{:x}", context.compute())
    }

    /// Reads the file prefix and fingerprints it.
    pub async fn fingerprint_file(
        &self,
        path: &Path,
        target_format: &str,
        category: Category,
    ) -> std::io::Result<String> {
        let prefix = self.read_prefix(path).await?;
        Ok(self.fingerprint(&prefix, target_format, category))
    }

    /// MD5 of the file prefix alone.
    pub async fn prefix_hash(&self, path: &Path) -> std::io::Result<String> {
        let prefix = self.read_prefix(path).await?;
        Ok(format!("{:x}", md5::compute(&prefix)))
    }

    async fn read_prefix(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        let file = tokio::fs::File::open(path).await?;
        let mut prefix = Vec::new();
        file.take(self.prefix_limit as u64)
            .read_to_end(&mut prefix)
            .await?;
        Ok(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fingerprint_depends_on_target_and_category() {
        let fp = ContentFingerprinter::default();
        let a = fp.fingerprint(b"hello", "pdf", Category::Text);
        assert_eq!(a.len(), 32);
        assert_eq!(a, fp.fingerprint(b"hello", "pdf", Category::Text));
        assert_ne!(a, fp.fingerprint(b"hello", "html", Category::Text));
        assert_ne!(a, fp.fingerprint(b"hello", "pdf", Category::Document));
        assert_ne!(a, fp.fingerprint(b"hellp", "pdf", Category::Text));
    }

    #[test]
    fn test_matches_plain_md5_of_concatenation() {
        let fp = ContentFingerprinter::default();
        let expected = format!("{:x}", md5::compute(b"abcpdftext"));
        assert_eq!(fp.fingerprint(b"abc", "pdf", Category::Text), expected);
    }

    #[tokio::test]
    async fn test_only_prefix_is_hashed() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        tokio::fs::write(&a, b"0123456789-one").await.unwrap();
        tokio::fs::write(&b, b"0123456789-two").await.unwrap();

        let fp = ContentFingerprinter::new(10);
        assert_eq!(
            fp.fingerprint_file(&a, "zip", Category::Compressed).await.unwrap(),
            fp.fingerprint_file(&b, "zip", Category::Compressed).await.unwrap()
        );

        let fp = ContentFingerprinter::new(64);
        assert_ne!(
            fp.prefix_hash(&a).await.unwrap(),
            fp.prefix_hash(&b).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let fp = ContentFingerprinter::default();
        assert!(fp.prefix_hash(Path::new("/nonexistent/file")).await.is_err());
    }
}
