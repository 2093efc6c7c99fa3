use chrono::{DateTime, Local};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::config::ReportsConfig;
use crate::utils::error::{AppError, Result};

const SLUG_MAX_CHARS: usize = 30;
const MAX_NAME_COLLISIONS: u32 = 100;

/// How the report body was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportMethod {
    Generated,
    TemplatedFallback,
}

impl ReportMethod {
    pub fn label(self) -> &'static str {
        match self {
            ReportMethod::Generated => "Generative comparison analysis",
            ReportMethod::TemplatedFallback => "Templated statistical summary",
        }
    }
}

/// Writes comparison reports as individual text files.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
    extension: String,
}

impl ReportWriter {
    pub fn new(config: &ReportsConfig) -> Self {
        Self {
            dir: PathBuf::from(&config.dir),
            extension: config.extension.clone(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persists `body` under a fresh file name and returns its path. Never
    /// overwrites an existing report.
    pub async fn write(
        &self,
        query: &str,
        body: &str,
        product_count: usize,
        method: ReportMethod,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let generated_at = Local::now();
        let contents = render(query, body, product_count, method, &generated_at);
        let stem = format!("{}-{}", slug(query), generated_at.format("%Y%m%d_%H%M%S_%3f"));

        for n in 0..MAX_NAME_COLLISIONS {
            let path = self.dir.join(self.file_name(&stem, n));
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match opened {
                Ok(mut file) => {
                    file.write_all(contents.as_bytes()).await?;
                    file.flush().await?;
                    tracing::info!(path = %path.display(), "report saved");
                    return Ok(path);
                }
                Err(e) if e.kind() == IoErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::Internal(format!(
            "No free report file name for '{}' in {}",
            stem,
            self.dir.display()
        )))
    }

    fn file_name(&self, stem: &str, collision: u32) -> String {
        if collision == 0 {
            format!("{}-comparison.{}", stem, self.extension)
        } else {
            format!("{}-{}-comparison.{}", stem, collision, self.extension)
        }
    }
}

/// File-name-safe form of a query: alphanumerics, spaces, `-` and `_`
/// are kept, spaces become dashes, and the result is capped at 30 chars.
pub fn slug(query: &str) -> String {
    let kept: String = query
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let slug: String = kept
        .trim()
        .replace(' ', "-")
        .chars()
        .take(SLUG_MAX_CHARS)
        .collect();
    if slug.is_empty() {
        "query".to_string()
    } else {
        slug
    }
}

pub fn render(
    query: &str,
    body: &str,
    product_count: usize,
    method: ReportMethod,
    generated_at: &DateTime<Local>,
) -> String {
    format!(
        "# Price Comparison Report\n\n\
         **Query:** {}\n\
         **Generated:** {}\n\
         **Products Analyzed:** {}\n\
         **Analysis Method:** {}\n\n\
         ---\n\n\
         {}",
        query,
        generated_at.format("%Y-%m-%d %H:%M:%S"),
        product_count,
        method.label(),
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn writer(dir: &TempDir) -> ReportWriter {
        ReportWriter::new(&ReportsConfig {
            dir: dir.path().join("reports").to_string_lossy().to_string(),
            extension: "md".to_string(),
        })
    }

    #[rstest]
    #[case("Gaming Mouse", "Gaming-Mouse")]
    #[case("  iPhone 14 / Pro Max!  ", "iPhone-14--Pro-Max")]
    #[case("a very long product query that keeps going", "a-very-long-product-query-that")]
    #[case("../../etc/passwd", "etcpasswd")]
    #[case("???", "query")]
    fn test_slug(#[case] query: &str, #[case] expected: &str) {
        assert_eq!(slug(query), expected);
    }

    #[test]
    fn test_render_has_metadata_header() {
        let now = Local::now();
        let text = render("Gaming Mouse", "## Summary", 4, ReportMethod::TemplatedFallback, &now);
        assert!(text.contains("**Query:** Gaming Mouse"));
        assert!(text.contains("**Products Analyzed:** 4"));
        assert!(text.contains("**Analysis Method:** Templated statistical summary"));
        assert!(text.ends_with("---\n\n## Summary"));
    }

    #[tokio::test]
    async fn test_write_creates_file() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);

        let path = writer
            .write("Gaming Mouse", "body text", 3, ReportMethod::Generated)
            .await
            .unwrap();

        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("Gaming-Mouse-"));
        assert!(name.ends_with("-comparison.md"));
        assert_eq!(path.parent().unwrap(), writer.dir());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("**Query:** Gaming Mouse"));
        assert!(contents.ends_with("body text"));
    }

    #[tokio::test]
    async fn test_repeated_writes_never_overwrite() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);

        let mut paths = Vec::new();
        for i in 0..5 {
            let body = format!("report {i}");
            paths.push(
                writer
                    .write("Gaming Mouse", &body, 1, ReportMethod::Generated)
                    .await
                    .unwrap(),
            );
        }

        let unique: std::collections::HashSet<_> = paths.iter().collect();
        assert_eq!(unique.len(), 5);
        for (i, path) in paths.iter().enumerate() {
            assert!(std::fs::read_to_string(path).unwrap().ends_with(&format!("report {i}")));
        }
    }

    #[test]
    fn test_collision_suffix() {
        let dir = TempDir::new().unwrap();
        let writer = writer(&dir);
        assert_eq!(writer.file_name("q-1", 0), "q-1-comparison.md");
        assert_eq!(writer.file_name("q-1", 2), "q-1-2-comparison.md");
    }

    #[tokio::test]
    async fn test_unwritable_dir_is_error() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let writer = ReportWriter::new(&ReportsConfig {
            dir: blocker.join("reports").to_string_lossy().to_string(),
            extension: "md".to_string(),
        });

        assert!(writer.write("q", "b", 0, ReportMethod::Generated).await.is_err());
    }
}
