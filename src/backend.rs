//! Application operations: price and feedback updates, HTML views, reports.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, info};

use crate::config::{Config, RenderBackendKind};
use crate::document::{ElementSpec, Mutation, xpath_literal};
use crate::error::{PipelineError, Result};
use crate::http_client::HttpClientConfig;
use crate::params::{ParamRule, ParamSpec, Parameters, download_filename};
use crate::process::{OutputFileError, read_output_file};
use crate::render::{LocalRenderer, RemoteRenderer, RenderBackend, RenderedDocument};
use crate::report::ReportService;
use crate::store::DocumentStore;
use crate::transform::{Stylesheet, TransformSettings, TransformationPipeline};
use crate::validator::{SchemaValidator, ValidationReport};
use crate::workspace::ResourceScope;

pub const XHTML_CONTENT_TYPE: &str = "application/xhtml+xml";
pub const HTML_CONTENT_TYPE: &str = "text/html";

const DATABASE_FILE: &str = "database.xml";
const RECOMMENDATION_FILE: &str = "recommendation.xml";
const FEEDBACK_FILE: &str = "feedback.xml";

const DATABASE_SCHEMA: &str = "database";
const FEEDBACK_SCHEMA: &str = "feedback";

const DASHBOARD_PARAMS: &[ParamSpec] = &[ParamSpec::new("dt", ParamRule::DateTime)];
const FEEDBACK_VIEW_PARAMS: &[ParamSpec] = &[
    ParamSpec::new("success", ParamRule::Flag),
    ParamSpec::new("error", ParamRule::Flag),
];
const REPORT_PARAMS: &[ParamSpec] = &[ParamSpec::new("dt", ParamRule::DateTime)];

/// A dated price for one plant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceUpdate {
    pub plant: String,
    pub price: String,
    pub date: String,
}

/// A feedback form as submitted; every field may be missing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedbackSubmission {
    pub username: Option<String>,
    pub rating: Option<String>,
    pub comment: Option<String>,
}

impl FeedbackSubmission {
    /// `<feedback>` entry stamped with `at`. Fields are trimmed; a blank user
    /// becomes `Anonymous` and a blank rating `5`.
    pub fn to_element(&self, at: DateTime<Utc>) -> ElementSpec {
        fn field(value: &Option<String>, default: &str) -> String {
            match value.as_deref().map(str::trim) {
                Some(v) if !v.is_empty() => v.to_string(),
                _ => default.to_string(),
            }
        }

        ElementSpec::new("feedback")
            .child(ElementSpec::new("user").text(field(&self.username, "Anonymous")))
            .child(ElementSpec::new("rating").text(field(&self.rating, "5")))
            .child(ElementSpec::new("comment").text(field(&self.comment, "")))
            .child(
                ElementSpec::new("date").text(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            )
    }
}

/// Everything the CLI drives, wired from one [`Config`]
pub struct Backend {
    store: DocumentStore,
    pipeline: TransformationPipeline,
    reports: ReportService,
    scope: ResourceScope,
    data_dir: PathBuf,
    max_view_bytes: usize,
    dashboard: Stylesheet,
    feedback_view: Stylesheet,
}

impl Backend {
    /// Build with the render backend the configuration selects
    pub fn from_config(config: &Config) -> Result<Self> {
        let renderer: Arc<dyn RenderBackend> = match config.render.backend {
            RenderBackendKind::Local => Arc::new(LocalRenderer::new(
                config.render.program.clone(),
                config.render.args.clone(),
                config.render.timeout(),
                config.transform.max_output_bytes(),
            )),
            RenderBackendKind::Remote => {
                let http = HttpClientConfig {
                    timeout_seconds: config.render.timeout_seconds,
                    max_body_bytes: config.transform.max_output_bytes(),
                    ..HttpClientConfig::default()
                };
                Arc::new(RemoteRenderer::new(config.render.remote_url.clone(), http)?)
            }
        };
        debug!(backend = ?config.render.backend, "render backend selected");
        Ok(Self::with_renderer(config, renderer))
    }

    /// Build with an explicit render backend
    pub fn with_renderer(config: &Config, renderer: Arc<dyn RenderBackend>) -> Self {
        let validator = Arc::new(SchemaValidator::new(config.store.schema_dir.clone()));
        let pipeline = TransformationPipeline::new(TransformSettings {
            program: config.transform.program.clone(),
            base_args: config.transform.base_args.clone(),
            timeout: config.transform.timeout(),
            max_output_bytes: config.transform.max_output_bytes(),
        });
        let scope = ResourceScope::new(
            config.workspace.scratch_dir.clone(),
            config.workspace.prefix.clone(),
        );
        let transform = &config.transform;
        let reports = ReportService::new(
            pipeline.clone(),
            renderer,
            scope.clone(),
            Stylesheet::new(transform.stylesheet(&transform.report_stylesheet), REPORT_PARAMS),
        );

        Self {
            store: DocumentStore::new(validator),
            pipeline,
            reports,
            scope,
            data_dir: config.store.data_dir.clone(),
            max_view_bytes: transform.max_output_bytes(),
            dashboard: Stylesheet::new(
                transform.stylesheet(&transform.dashboard_stylesheet),
                DASHBOARD_PARAMS,
            ),
            feedback_view: Stylesheet::new(
                transform.stylesheet(&transform.feedback_stylesheet),
                FEEDBACK_VIEW_PARAMS,
            ),
        }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    fn data_file(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    /// Append `<price date=..>` under the named plant's statistics
    pub async fn record_price(&self, update: &PriceUpdate) -> Result<()> {
        let selector = format!("//plant[name={}]/statistics", xpath_literal(&update.plant));
        let price = ElementSpec::new("price")
            .text(update.price.as_str())
            .attribute("date", update.date.as_str());
        self.store
            .update(
                &self.data_file(DATABASE_FILE),
                DATABASE_SCHEMA,
                &Mutation::append_child(selector, price),
            )
            .await?;
        info!(plant = %update.plant, date = %update.date, "price recorded");
        Ok(())
    }

    /// Append a feedback entry stamped with the current time
    pub async fn submit_feedback(&self, submission: &FeedbackSubmission) -> Result<()> {
        self.submit_feedback_at(submission, Utc::now()).await
    }

    pub async fn submit_feedback_at(
        &self,
        submission: &FeedbackSubmission,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.store
            .update(
                &self.data_file(FEEDBACK_FILE),
                FEEDBACK_SCHEMA,
                &Mutation::append_child("/feedbacks", submission.to_element(at)),
            )
            .await?;
        info!("feedback stored");
        Ok(())
    }

    /// Dashboard over the recommendation document. A blank `dt` is omitted.
    pub async fn dashboard(&self, dt: Option<&str>) -> Result<RenderedDocument> {
        let mut params = Parameters::new();
        if let Some(dt) = dt.map(str::trim).filter(|dt| !dt.is_empty()) {
            params.insert("dt", dt);
        }
        self.view(RECOMMENDATION_FILE, &self.dashboard, &params, XHTML_CONTENT_TYPE)
            .await
    }

    /// Feedback page; `success` and `error` must each be `true` or `false`
    pub async fn feedback_view(&self, success: &str, error: &str) -> Result<RenderedDocument> {
        let params = Parameters::new().with("success", success).with("error", error);
        self.view(FEEDBACK_FILE, &self.feedback_view, &params, HTML_CONTENT_TYPE)
            .await
    }

    async fn view(
        &self,
        source: &str,
        stylesheet: &Stylesheet,
        params: &Parameters,
        content_type: &'static str,
    ) -> Result<RenderedDocument> {
        let source = self.data_file(source);
        let bytes = self
            .scope
            .with_workspace(|ws| async move {
                let output = self
                    .pipeline
                    .transform(&source, stylesheet, params, &ws.file("view.html"))
                    .await?;
                read_output_file(&output, self.max_view_bytes)
                    .await
                    .map_err(|err| match err {
                        OutputFileError::TooLarge => PipelineError::OutputTooLarge {
                            path: output.clone(),
                            limit: self.max_view_bytes,
                        },
                        OutputFileError::Io(source) => PipelineError::Io {
                            path: output.clone(),
                            source,
                        },
                    })
            })
            .await?;
        Ok(RenderedDocument::new(bytes, content_type))
    }

    /// Recommendation report as PDF, named after `dt`
    pub async fn report(&self, dt: Option<&str>) -> Result<RenderedDocument> {
        let dt = dt.map(str::trim).filter(|dt| !dt.is_empty());
        let mut params = Parameters::new();
        if let Some(dt) = dt {
            params.insert("dt", dt);
        }
        let rendered = self
            .reports
            .generate_report(&self.data_file(RECOMMENDATION_FILE), &params)
            .await?;
        Ok(rendered.with_filename(download_filename(dt)))
    }

    /// Render a caller-supplied XSL-FO artifact
    pub async fn convert(&self, artifact: &[u8], token: Option<&str>) -> Result<RenderedDocument> {
        let rendered = self.reports.render_artifact(artifact).await?;
        Ok(rendered.with_filename(download_filename(token)))
    }

    /// Validate a document on disk against a named schema without changing it
    pub async fn check(&self, path: &Path, schema: &str) -> Result<ValidationReport> {
        let document = self.store.load(path).await?;
        Ok(self.store.validator().validate(&document, schema).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn texts(spec: &ElementSpec) -> Vec<(String, String)> {
        spec.children
            .iter()
            .map(|c| (c.name.clone(), c.text.clone().unwrap_or_default()))
            .collect()
    }

    #[test]
    fn test_feedback_defaults_and_trimming() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
        let submission = FeedbackSubmission {
            username: Some("   ".to_string()),
            rating: None,
            comment: Some("  <great>  ".to_string()),
        };

        let spec = submission.to_element(at);
        assert_eq!(spec.name, "feedback");
        assert_eq!(
            texts(&spec),
            vec![
                ("user".to_string(), "Anonymous".to_string()),
                ("rating".to_string(), "5".to_string()),
                ("comment".to_string(), "<great>".to_string()),
                ("date".to_string(), "2024-05-01T09:30:00.000Z".to_string()),
            ]
        );
    }

    #[test]
    fn test_feedback_keeps_supplied_values() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let submission = FeedbackSubmission {
            username: Some(" ada ".to_string()),
            rating: Some("3".to_string()),
            comment: None,
        };
        let fields = texts(&submission.to_element(at));
        assert_eq!(fields[0].1, "ada");
        assert_eq!(fields[1].1, "3");
        assert_eq!(fields[2].1, "");
    }

    #[tokio::test]
    async fn test_default_config_builds_remote_backend() {
        let config = Config::default();
        assert!(Backend::from_config(&config).is_ok());
    }
}
