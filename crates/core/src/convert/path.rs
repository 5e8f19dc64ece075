//! Execution paths: how a route turns a source into its target.

use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::backend::{Backend, BackendChain, BackendJob, ExecContext};
use super::error::{BackendFailure, ConvertError};

/// Plan for one (input, target) route.
#[derive(Debug, Clone)]
pub enum ExecutionPath {
    /// One backend chain straight from source to target.
    Direct(BackendChain),
    /// Two chains through an intermediate format. The intermediate file
    /// lives in its own scratch directory and never outlives the call.
    Chained {
        intermediate: String,
        first: BackendChain,
        second: BackendChain,
    },
    /// Extract an archive into a scratch directory, then pack it again.
    Repack {
        extract: BackendChain,
        pack: BackendChain,
    },
}

impl ExecutionPath {
    /// Direct path over `backends`, in fallback order.
    pub fn direct(backends: Vec<Arc<dyn Backend>>) -> Self {
        Self::Direct(BackendChain::new(backends))
    }

    /// Two-step path through `intermediate`.
    pub fn chained(
        intermediate: impl Into<String>,
        first: BackendChain,
        second: BackendChain,
    ) -> Self {
        Self::Chained {
            intermediate: intermediate.into(),
            first,
            second,
        }
    }

    /// Human-readable plan, used in logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Direct(chain) => format!("direct[{}]", chain.names().join(", ")),
            Self::Chained {
                intermediate,
                first,
                second,
            } => format!(
                "chained[{}] via {} then [{}]",
                first.names().join(", "),
                intermediate,
                second.names().join(", ")
            ),
            Self::Repack { extract, pack } => format!(
                "repack extract[{}] pack[{}]",
                extract.names().join(", "),
                pack.names().join(", ")
            ),
        }
    }

    /// Runs the plan, leaving a verified file at `output`.
    pub async fn execute(
        &self,
        source: &Path,
        input_format: &str,
        target_format: &str,
        output: &Path,
        ctx: &ExecContext,
    ) -> Result<(), ConvertError> {
        match self {
            Self::Direct(chain) => {
                let job = BackendJob::file(source, output, input_format, target_format);
                run_chain(chain, &job, ctx, input_format, target_format).await
            }
            Self::Chained {
                intermediate,
                first,
                second,
            } => {
                let scratch = ctx.scratch_dir("chain-").await?;
                let intermediate_path = scratch
                    .path()
                    .join(format!("intermediate.{}", intermediate));

                let first_job =
                    BackendJob::file(source, &intermediate_path, input_format, intermediate);
                run_chain(first, &first_job, ctx, input_format, target_format).await?;
                debug!(
                    intermediate = %intermediate_path.display(),
                    "First step done, converting intermediate"
                );

                let second_job =
                    BackendJob::file(&intermediate_path, output, intermediate, target_format);
                run_chain(second, &second_job, ctx, input_format, target_format).await
                // `scratch` drops here and takes the intermediate with it.
            }
            Self::Repack { extract, pack } => {
                let scratch = ctx.scratch_dir("repack-").await?;
                let contents = scratch.path().join("contents");

                let extract_job = BackendJob::extract(source, &contents, input_format);
                run_chain(extract, &extract_job, ctx, input_format, target_format).await?;

                let pack_job = BackendJob::pack(&contents, output, target_format);
                run_chain(pack, &pack_job, ctx, input_format, target_format).await
            }
        }
    }
}

async fn run_chain(
    chain: &BackendChain,
    job: &BackendJob,
    ctx: &ExecContext,
    from: &str,
    to: &str,
) -> Result<(), ConvertError> {
    if chain.is_empty() {
        return Err(ConvertError::BackendUnavailable {
            backends: Vec::new(),
            reason: "no backend configured for this route".to_string(),
        });
    }

    match chain.run(job, ctx).await {
        Ok(winner) => {
            debug!(backend = %winner, "Backend succeeded");
            Ok(())
        }
        Err(attempts) => Err(chain_error(from, to, attempts)),
    }
}

/// Folds every failed attempt into one error. When nothing could run at
/// all the error says so instead of listing failures.
pub(crate) fn chain_error(from: &str, to: &str, attempts: Vec<BackendFailure>) -> ConvertError {
    if !attempts.is_empty() && attempts.iter().all(|a| a.unavailable) {
        ConvertError::BackendUnavailable {
            backends: attempts.iter().map(|a| a.backend.clone()).collect(),
            reason: attempts
                .iter()
                .map(|a| a.reason.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        }
    } else {
        ConvertError::ConversionFailed {
            from: from.to_string(),
            to: to.to_string(),
            attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::WorkerPool;
    use crate::testing::FakeBackend;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> ExecContext {
        ExecContext::new(WorkerPool::new(1), dir.path().join("scratch"))
    }

    fn scratch_is_empty(ctx: &ExecContext) -> bool {
        match std::fs::read_dir(&ctx.scratch_root) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => true,
        }
    }

    #[tokio::test]
    async fn test_direct_path() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let source = dir.path().join("a.txt");
        let output = dir.path().join("a.html");
        tokio::fs::write(&source, "hi").await.unwrap();

        let path = ExecutionPath::direct(vec![Arc::new(FakeBackend::succeeding("fake"))]);
        path.execute(&source, "txt", "html", &output, &ctx)
            .await
            .unwrap();

        assert!(output.exists());
        assert_eq!(path.describe(), "direct[fake]");
    }

    #[tokio::test]
    async fn test_chained_path_cleans_intermediate_on_success() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let source = dir.path().join("notes.md");
        let output = dir.path().join("notes.pdf");
        tokio::fs::write(&source, "# Title").await.unwrap();

        let first = Arc::new(FakeBackend::succeeding("to-html"));
        let second = Arc::new(FakeBackend::succeeding("to-pdf"));
        let path = ExecutionPath::chained(
            "html",
            BackendChain::single(first.clone()),
            BackendChain::single(second.clone()),
        );

        path.execute(&source, "md", "pdf", &output, &ctx)
            .await
            .unwrap();

        assert!(output.exists());
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
        assert_eq!(second.last_input_format().as_deref(), Some("html"));
        assert!(scratch_is_empty(&ctx));
    }

    #[tokio::test]
    async fn test_chained_path_cleans_intermediate_on_failure() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let source = dir.path().join("notes.md");
        let output = dir.path().join("notes.pdf");
        tokio::fs::write(&source, "# Title").await.unwrap();

        let path = ExecutionPath::chained(
            "html",
            BackendChain::single(Arc::new(FakeBackend::succeeding("to-html"))),
            BackendChain::single(Arc::new(FakeBackend::failing("to-pdf", "renderer crashed"))),
        );

        let err = path
            .execute(&source, "md", "pdf", &output, &ctx)
            .await
            .unwrap_err();

        match err {
            ConvertError::ConversionFailed { from, to, attempts } => {
                assert_eq!(from, "md");
                assert_eq!(to, "pdf");
                assert_eq!(attempts.len(), 1);
                assert_eq!(attempts[0].backend, "to-pdf");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!output.exists());
        assert!(scratch_is_empty(&ctx));
    }

    #[tokio::test]
    async fn test_all_unavailable_maps_to_backend_unavailable() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let source = dir.path().join("a.wav");
        tokio::fs::write(&source, "RIFF").await.unwrap();

        let path = ExecutionPath::direct(vec![
            Arc::new(FakeBackend::unavailable("ffmpeg-preset")),
            Arc::new(FakeBackend::unavailable("ffmpeg")),
        ]);

        let err = path
            .execute(&source, "wav", "mp3", &dir.path().join("a.mp3"), &ctx)
            .await
            .unwrap_err();

        match err {
            ConvertError::BackendUnavailable { backends, .. } => {
                assert_eq!(backends, vec!["ffmpeg-preset", "ffmpeg"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_chain_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let source = dir.path().join("a.txt");
        tokio::fs::write(&source, "x").await.unwrap();

        let path = ExecutionPath::Direct(BackendChain::default());
        let err = path
            .execute(&source, "txt", "html", &dir.path().join("a.html"), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::BackendUnavailable { .. }));
    }
}
