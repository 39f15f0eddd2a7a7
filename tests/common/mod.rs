#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use xmlpress::config::{Config, RenderBackendKind};
use xmlpress::render::PDF_CONTENT_TYPE;
use xmlpress::{RenderBackend, RenderError, RenderedDocument, Workspace};

pub const DATABASE_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="database">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="plant" maxOccurs="unbounded">
          <xs:complexType>
            <xs:sequence>
              <xs:element name="name" type="xs:string"/>
              <xs:element name="statistics">
                <xs:complexType>
                  <xs:sequence>
                    <xs:element name="price" minOccurs="0" maxOccurs="unbounded">
                      <xs:complexType>
                        <xs:simpleContent>
                          <xs:extension base="xs:decimal">
                            <xs:attribute name="date" type="xs:date" use="required"/>
                          </xs:extension>
                        </xs:simpleContent>
                      </xs:complexType>
                    </xs:element>
                  </xs:sequence>
                </xs:complexType>
              </xs:element>
            </xs:sequence>
          </xs:complexType>
        </xs:element>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
</xs:schema>
"#;

pub const DATABASE_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<database>
  <plant>
    <name>Alpha</name>
    <statistics>
      <price date="2024-04-01">100</price>
    </statistics>
  </plant>
  <plant>
    <name>O'Neil "Fern"</name>
    <statistics/>
  </plant>
</database>
"#;

pub const FEEDBACK_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
  <xs:element name="feedbacks">
    <xs:complexType>
      <xs:sequence>
        <xs:element name="feedback" minOccurs="0" maxOccurs="unbounded">
          <xs:complexType>
            <xs:sequence>
              <xs:element name="user" type="xs:string"/>
              <xs:element name="rating">
                <xs:simpleType>
                  <xs:restriction base="xs:integer">
                    <xs:minInclusive value="0"/>
                    <xs:maxInclusive value="10"/>
                  </xs:restriction>
                </xs:simpleType>
              </xs:element>
              <xs:element name="comment" type="xs:string"/>
              <xs:element name="date" type="xs:dateTime"/>
            </xs:sequence>
          </xs:complexType>
        </xs:element>
      </xs:sequence>
    </xs:complexType>
  </xs:element>
</xs:schema>
"#;

pub const FEEDBACK_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feedbacks>
  <feedback>
    <user>ada</user>
    <rating>4</rating>
    <comment>Lovely ferns</comment>
    <date>2024-04-30T08:00:00.000Z</date>
  </feedback>
</feedbacks>
"#;

pub const RECOMMENDATION_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<recommendations>
  <recommendation plant="Alpha">buy</recommendation>
</recommendations>
"#;

/// Fake XSLT processor: writes `<html>source|stylesheet| params</html>` to its
/// `-o:` target
pub const ECHO_TRANSFORM: &str = r#"out=""; src=""; xsl=""; params=""
for a in "$@"; do
  case "$a" in
    -o:*) out="${a#-o:}";;
    -s:*) src="${a#-s:}";;
    -xsl:*) xsl="${a#-xsl:}";;
    *) params="$params $a";;
  esac
done
echo "<html>$(basename "$src")|$(basename "$xsl")|$params</html>" > "$out"
"#;

pub const FAILING_TRANSFORM: &str = "echo 'schema mismatch' >&2\nexit 1\n";

pub const SLOW_TRANSFORM: &str = "sleep 30\n";

/// Fake FOP: prefixes the artifact with a PDF header
pub const ECHO_RENDERER: &str = r#"{ echo "%PDF-1.4"; cat "$1"; } > "$2""#;

/// A data, schema, stylesheet and scratch layout inside one temp dir
pub struct TestEnv {
    pub root: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let env = Self {
            root: TempDir::new().unwrap(),
        };
        for dir in [env.data_dir(), env.schema_dir(), env.scratch_dir()] {
            std::fs::create_dir_all(dir).unwrap();
        }
        std::fs::create_dir_all(env.stylesheet_dir().join("xslt/views")).unwrap();

        std::fs::write(env.schema_dir().join("database.xsd"), DATABASE_XSD).unwrap();
        std::fs::write(env.schema_dir().join("feedback.xsd"), FEEDBACK_XSD).unwrap();
        std::fs::write(env.data_file("database.xml"), DATABASE_XML).unwrap();
        std::fs::write(env.data_file("feedback.xml"), FEEDBACK_XML).unwrap();
        std::fs::write(env.data_file("recommendation.xml"), RECOMMENDATION_XML).unwrap();
        env.set_transform(ECHO_TRANSFORM);
        env
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.path().join("data")
    }

    pub fn schema_dir(&self) -> PathBuf {
        self.root.path().join("schema")
    }

    pub fn stylesheet_dir(&self) -> PathBuf {
        self.root.path().join("styles")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.root.path().join("scratch")
    }

    pub fn data_file(&self, name: &str) -> PathBuf {
        self.data_dir().join(name)
    }

    fn transform_script(&self) -> PathBuf {
        self.root.path().join("saxon.sh")
    }

    /// Replace the fake transform tool's body
    pub fn set_transform(&self, body: &str) {
        std::fs::write(self.transform_script(), body).unwrap();
    }

    /// Config running the fake tools through `sh`, with the local renderer
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.store.data_dir = self.data_dir();
        config.store.schema_dir = self.schema_dir();
        config.transform.program = "sh".to_string();
        config.transform.base_args = vec![self.transform_script().to_string_lossy().into_owned()];
        config.transform.stylesheet_dir = self.stylesheet_dir();
        config.transform.timeout_seconds = 10;
        config.render.backend = RenderBackendKind::Local;
        config.render.program = "sh".to_string();
        config.render.args = vec![
            "-c".to_string(),
            ECHO_RENDERER.to_string(),
            "fop".to_string(),
            "{input}".to_string(),
            "{output}".to_string(),
        ];
        config.render.timeout_seconds = 10;
        config.workspace.scratch_dir = self.scratch_dir();
        config
    }

    pub fn remote_config(&self, url: &str) -> Config {
        let mut config = self.config();
        config.render.backend = RenderBackendKind::Remote;
        config.render.remote_url = url.to_string();
        config
    }

    pub fn scratch_is_empty(&self) -> bool {
        std::fs::read_dir(self.scratch_dir())
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }

    pub fn read(&self, name: &str) -> Vec<u8> {
        std::fs::read(self.data_file(name)).unwrap()
    }
}

/// No `.tmp` siblings left behind by atomic writes
pub fn no_temp_files(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .all(|e| !e.file_name().to_string_lossy().ends_with(".tmp"))
}

/// Render backend that counts calls and returns a fixed outcome
pub struct CountingRenderer {
    calls: AtomicUsize,
    outcome: Result<Vec<u8>, RenderError>,
    seen_artifacts: Mutex<Vec<Vec<u8>>>,
}

impl CountingRenderer {
    pub fn succeeding(bytes: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            outcome: Ok(bytes.to_vec()),
            seen_artifacts: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(error: RenderError) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            outcome: Err(error),
            seen_artifacts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn artifacts(&self) -> Vec<Vec<u8>> {
        self.seen_artifacts.lock().unwrap().clone()
    }
}

#[async_trait]
impl RenderBackend for CountingRenderer {
    async fn render(
        &self,
        artifact: &Path,
        workspace: &Workspace,
    ) -> Result<RenderedDocument, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(artifact.starts_with(workspace.path()));
        let bytes = tokio::fs::read(artifact).await.unwrap();
        self.seen_artifacts.lock().unwrap().push(bytes);
        self.outcome
            .clone()
            .map(|bytes| RenderedDocument::new(bytes, PDF_CONTENT_TYPE))
    }
}

/// Minimal HTTP responder: answers every request with `status` and `body`
/// and records the request bodies it received
pub struct HttpResponder {
    pub url: String,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl HttpResponder {
    pub async fn start(status: u16, body: impl Into<Vec<u8>>) -> Self {
        let body: Vec<u8> = body.into();
        let body: Arc<[u8]> = Arc::from(body);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/fop.php", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let seen = Arc::clone(&seen);
                let body = Arc::clone(&body);
                tokio::spawn(async move {
                    let Some(request_body) = read_request(&mut stream).await else {
                        return;
                    };
                    seen.lock().unwrap().push(request_body);
                    let head = format!(
                        "HTTP/1.1 {status} Status\r\n\
                         Content-Type: application/octet-stream\r\n\
                         Content-Length: {}\r\n\
                         Connection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = stream.write_all(head.as_bytes()).await;
                    let _ = stream.write_all(&body).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self { url, requests }
    }

    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.requests.lock().unwrap().clone()
    }
}

/// Accepts connections and never answers
pub async fn silent_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/fop.php", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    url
}

async fn read_request(stream: &mut tokio::net::TcpStream) -> Option<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let headers = String::from_utf8_lossy(&buffer[..header_end]).to_lowercase();
    let length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buffer.len() < header_end + length {
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut chunk))
            .await
            .ok()?
            .ok()?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
    Some(buffer[header_end..].to_vec())
}
