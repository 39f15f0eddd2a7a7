//! Document to PDF: transform, then render, inside a throwaway workspace.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::error::{PipelineError, PipelineResult};
use crate::params::Parameters;
use crate::render::{RenderBackend, RenderedDocument};
use crate::transform::{Stylesheet, TransformationPipeline};
use crate::workspace::ResourceScope;

const ARTIFACT_NAME: &str = "report.fo";

pub struct ReportService {
    pipeline: TransformationPipeline,
    backend: Arc<dyn RenderBackend>,
    scope: ResourceScope,
    stylesheet: Stylesheet,
}

impl ReportService {
    /// `stylesheet` turns source documents into the intermediate artifact
    pub fn new(
        pipeline: TransformationPipeline,
        backend: Arc<dyn RenderBackend>,
        scope: ResourceScope,
        stylesheet: Stylesheet,
    ) -> Self {
        Self {
            pipeline,
            backend,
            scope,
            stylesheet,
        }
    }

    /// Transform `document` and render the result.
    ///
    /// The render step only runs after a successful transform. The workspace
    /// holding the intermediate artifact is removed on every outcome.
    pub async fn generate_report(
        &self,
        document: &Path,
        parameters: &Parameters,
    ) -> PipelineResult<RenderedDocument> {
        let rendered = self
            .scope
            .with_workspace(|ws| async move {
                let artifact = self
                    .pipeline
                    .transform(document, &self.stylesheet, parameters, &ws.file(ARTIFACT_NAME))
                    .await?;
                let rendered = self.backend.render(&artifact, &ws).await?;
                Ok::<_, PipelineError>(rendered)
            })
            .await?;
        info!(document = %document.display(), bytes = rendered.bytes.len(), "report generated");
        Ok(rendered)
    }

    /// Render a caller-supplied intermediate artifact directly
    pub async fn render_artifact(&self, artifact: &[u8]) -> PipelineResult<RenderedDocument> {
        self.scope
            .with_workspace(|ws| async move {
                let path = ws.file(ARTIFACT_NAME);
                tokio::fs::write(&path, artifact)
                    .await
                    .map_err(|source| PipelineError::Io {
                        path: path.clone(),
                        source,
                    })?;
                Ok::<_, PipelineError>(self.backend.render(&path, &ws).await?)
            })
            .await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use crate::params::{ParamRule, ParamSpec};
    use crate::render::{MockRenderBackend, PDF_CONTENT_TYPE};
    use crate::transform::TransformSettings;
    use std::time::Duration;
    use tempfile::TempDir;

    const DT: &[ParamSpec] = &[ParamSpec::new("dt", ParamRule::DateTime)];

    struct Fixture {
        dir: TempDir,
        scratch: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                scratch: TempDir::new().unwrap(),
            }
        }

        fn service(&self, transform_body: &str, backend: MockRenderBackend) -> ReportService {
            let script = self.dir.path().join("saxon.sh");
            std::fs::write(&script, transform_body).unwrap();
            let pipeline = TransformationPipeline::new(TransformSettings {
                program: "sh".to_string(),
                base_args: vec![script.to_string_lossy().into_owned()],
                timeout: Duration::from_secs(10),
                max_output_bytes: 1024 * 1024,
            });
            ReportService::new(
                pipeline,
                Arc::new(backend),
                ResourceScope::new(self.scratch.path(), "report"),
                Stylesheet::new(self.dir.path().join("report.xsl"), DT),
            )
        }

        fn scratch_is_empty(&self) -> bool {
            std::fs::read_dir(self.scratch.path()).unwrap().next().is_none()
        }
    }

    const WRITE_FO: &str =
        r#"for a in "$@"; do case "$a" in -o:*) echo '<fo:root/>' > "${a#-o:}";; esac; done"#;

    #[tokio::test]
    async fn test_transform_then_render() {
        let fixture = Fixture::new();
        let mut backend = MockRenderBackend::new();
        backend
            .expect_render()
            .times(1)
            .withf(|artifact, ws| artifact.starts_with(ws.path()) && artifact.exists())
            .returning(|_, _| Ok(RenderedDocument::new(b"%PDF-1.7".to_vec(), PDF_CONTENT_TYPE)));

        let service = fixture.service(WRITE_FO, backend);
        let pdf = service
            .generate_report(
                Path::new("recommendation.xml"),
                &Parameters::new().with("dt", "2024-05-01"),
            )
            .await
            .unwrap();

        assert_eq!(pdf.bytes, b"%PDF-1.7");
        assert!(fixture.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_transform_failure_skips_render() {
        let fixture = Fixture::new();
        let mut backend = MockRenderBackend::new();
        backend.expect_render().never();

        let service = fixture.service("echo 'schema mismatch' >&2; exit 1", backend);
        let err = service
            .generate_report(Path::new("recommendation.xml"), &Parameters::new())
            .await
            .unwrap_err();

        match err {
            PipelineError::Transform { diagnostics, .. } => {
                assert_eq!(diagnostics, "schema mismatch")
            }
            other => panic!("Expected Transform, got {other:?}"),
        }
        assert!(fixture.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_invalid_parameter_skips_both_steps() {
        let fixture = Fixture::new();
        let mut backend = MockRenderBackend::new();
        backend.expect_render().never();

        let service = fixture.service(WRITE_FO, backend);
        let err = service
            .generate_report(
                Path::new("recommendation.xml"),
                &Parameters::new().with("dt", "$(reboot)"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidParameter { .. }));
        assert!(fixture.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_render_failure_propagates_and_cleans_up() {
        let fixture = Fixture::new();
        let mut backend = MockRenderBackend::new();
        backend.expect_render().times(1).returning(|_, _| {
            Err(RenderError::Status {
                url: "http://render.local/fop".to_string(),
                status: 500,
                body: "engine overloaded".to_string(),
            })
        });

        let service = fixture.service(WRITE_FO, backend);
        let err = service
            .generate_report(Path::new("recommendation.xml"), &Parameters::new())
            .await
            .unwrap_err();
        match err {
            PipelineError::Render(render) => {
                assert_eq!(render.status(), Some(500));
                assert!(render.to_string().contains("engine overloaded"));
            }
            other => panic!("Expected Render, got {other:?}"),
        }
        assert!(fixture.scratch_is_empty());
    }

    #[tokio::test]
    async fn test_render_artifact_writes_into_workspace() {
        let fixture = Fixture::new();
        let mut backend = MockRenderBackend::new();
        backend
            .expect_render()
            .times(1)
            .withf(|artifact, _| std::fs::read(artifact).unwrap() == b"<fo:root/>")
            .returning(|_, _| Ok(RenderedDocument::new(b"%PDF".to_vec(), PDF_CONTENT_TYPE)));

        let service = fixture.service(WRITE_FO, backend);
        let pdf = service.render_artifact(b"<fo:root/>").await.unwrap();
        assert_eq!(pdf.content_type, PDF_CONTENT_TYPE);
        assert!(fixture.scratch_is_empty());
    }
}
