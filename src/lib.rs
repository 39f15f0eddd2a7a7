//! # xmlpress Library
//!
//! Schema-validated XML document store with an XSLT transform pipeline and
//! pluggable PDF render backends. Every update is validated before it is
//! written, and every transform runs in a scratch workspace that is removed
//! afterwards.

pub mod backend;
pub mod cache;
pub mod cli;
pub mod config;
pub mod document;
pub mod error;
pub mod http_client;
pub mod libxml2;
pub mod params;
pub mod process;
pub mod render;
pub mod report;
pub mod store;
pub mod transform;
pub mod validator;
pub mod workspace;

pub use backend::{Backend, FeedbackSubmission, PriceUpdate};
pub use cache::ParsedSchemaCache;
pub use cli::{Cli, Command, RenderTarget};
pub use config::{Config, ConfigError, ConfigManager, RenderBackendKind};
pub use document::{Document, ElementSpec, Mutation, MutationOp, xpath_literal};
pub use error::{
    ErrorKind, LibXml2Error, PipelineError, RenderError, RenderErrorKind, SchemaError,
    ServiceError, StoreError,
};
pub use http_client::{AsyncHttpClient, HttpClientConfig};
pub use libxml2::{LibXml2Wrapper, ValidationResult, XmlSchemaPtr};
pub use params::{ParamRule, ParamSpec, Parameters, download_filename};
pub use render::{LocalRenderer, RemoteRenderer, RenderBackend, RenderedDocument};
pub use report::ReportService;
pub use store::DocumentStore;
pub use transform::{Stylesheet, TransformSettings, TransformationPipeline};
pub use validator::{SchemaValidator, ValidationReport};
pub use workspace::{ResourceScope, Workspace};
