use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Which render backend turns XSL-FO into PDF
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RenderTarget {
    /// Run the renderer program on this machine
    Local,
    /// POST the artifact to the render service
    Remote,
}

/// Validated XML document store with XSLT and PDF rendering
#[derive(Parser, Debug, Clone)]
#[command(name = "xmlpress")]
#[command(about = "Edit schema-validated XML documents and render them to HTML and PDF")]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short = 'q', long = "quiet", global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Directory holding database.xml, recommendation.xml and feedback.xml
    #[arg(long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Directory holding <name>.xsd schemas
    #[arg(long = "schema-dir", global = true)]
    pub schema_dir: Option<PathBuf>,

    /// Directory holding the view and report stylesheets
    #[arg(long = "stylesheet-dir", global = true)]
    pub stylesheet_dir: Option<PathBuf>,

    /// Root for scratch workspaces
    #[arg(long = "scratch-dir", global = true)]
    pub scratch_dir: Option<PathBuf>,

    /// Render backend
    #[arg(long = "backend", value_enum, global = true)]
    pub backend: Option<RenderTarget>,

    /// Render service endpoint
    #[arg(long = "render-url", global = true)]
    pub render_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Record a dated price for a plant
    Price {
        #[arg(long)]
        plant: String,
        #[arg(long)]
        price: String,
        #[arg(long)]
        date: String,
    },

    /// Append an entry to the feedback log
    Feedback {
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        rating: Option<String>,
        #[arg(long)]
        comment: Option<String>,
    },

    /// Render the dashboard view to stdout
    Dashboard {
        /// Date/time token (digits, 'T' and '-')
        #[arg(long)]
        dt: Option<String>,
    },

    /// Render the feedback view to stdout
    FeedbackView {
        #[arg(long, default_value = "false")]
        success: String,
        #[arg(long, default_value = "false")]
        error: String,
    },

    /// Render the recommendation report to PDF
    Report {
        #[arg(long)]
        dt: Option<String>,
        /// Output file (defaults to a name derived from --dt)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },

    /// Render an XSL-FO file to PDF
    Convert {
        input: PathBuf,
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
        /// Token used for the default output name
        #[arg(long)]
        token: Option<String>,
    },

    /// Validate a document against a named schema
    Check {
        document: PathBuf,
        #[arg(long)]
        schema: String,
    },
}

impl Cli {
    /// Default tracing filter for the chosen verbosity
    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            "error"
        } else if self.verbose {
            "info,xmlpress=debug"
        } else {
            "info"
        }
    }
}
