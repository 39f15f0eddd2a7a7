//! Parsed documents and the structural edits that can be applied to them.

use std::path::{Path, PathBuf};

use crate::error::{LibXml2Error, StoreError, StoreResult};
use crate::libxml2::{XmlDocument, XmlNodeMut};

/// An element to be built under a selected node. Text and attribute values
/// are stored verbatim and escaped when the document is serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSpec {
    pub name: String,
    pub text: Option<String>,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<ElementSpec>,
}

impl ElementSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: None,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn child(mut self, child: ElementSpec) -> Self {
        self.children.push(child);
        self
    }

    fn build_under(&self, parent: &mut XmlNodeMut<'_>) -> Result<(), LibXml2Error> {
        let mut node = parent.append_child(&self.name, self.text.as_deref())?;
        for (name, value) in &self.attributes {
            node.set_attribute(name, value)?;
        }
        for child in &self.children {
            child.build_under(&mut node)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOp {
    AppendChild(ElementSpec),
    SetAttribute { name: String, value: String },
}

/// A selector plus the operation applied to the first node it matches.
///
/// Mutations hold no document state, so a failed update can be retried with
/// the same value against a fresh read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub selector: String,
    pub op: MutationOp,
}

impl Mutation {
    pub fn append_child(selector: impl Into<String>, element: ElementSpec) -> Self {
        Self {
            selector: selector.into(),
            op: MutationOp::AppendChild(element),
        }
    }

    pub fn set_attribute(
        selector: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            selector: selector.into(),
            op: MutationOp::SetAttribute {
                name: name.into(),
                value: value.into(),
            },
        }
    }
}

/// An XPath string literal denoting exactly `value`.
///
/// XPath 1.0 has no escape sequences, so a value holding both quote kinds is
/// spelled as a `concat(...)` of single-quoted pieces.
pub fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        return format!("'{value}'");
    }
    if !value.contains('"') {
        return format!("\"{value}\"");
    }
    let parts: Vec<String> = value.split('\'').map(|part| format!("'{part}'")).collect();
    format!("concat({})", parts.join(", \"'\", "))
}

/// A parsed XML tree identified by the file it was read from
#[derive(Debug)]
pub struct Document {
    path: PathBuf,
    tree: XmlDocument,
}

impl Document {
    /// Parse `data` as the content of `path`
    pub fn parse(path: impl Into<PathBuf>, data: &[u8]) -> StoreResult<Self> {
        let path = path.into();
        let tree = XmlDocument::parse(data, &path.to_string_lossy()).map_err(|err| match err {
            LibXml2Error::InvalidXml { details } => StoreError::Parse {
                path: path.clone(),
                details,
            },
            other => StoreError::Xml(other),
        })?;
        Ok(Self { path, tree })
    }

    /// Read and parse a document from disk
    pub async fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await.map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &data)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `mutation` to the first node its selector matches.
    ///
    /// Nothing is changed when the selector matches nothing.
    pub fn apply(&mut self, mutation: &Mutation) -> StoreResult<()> {
        let mut targets = self.tree.select_mut(&mutation.selector)?;
        let Some(target) = targets.first_mut() else {
            return Err(StoreError::NotFound {
                selector: mutation.selector.clone(),
            });
        };

        match &mutation.op {
            MutationOp::AppendChild(element) => element.build_under(target)?,
            MutationOp::SetAttribute { name, value } => target.set_attribute(name, value)?,
        }
        Ok(())
    }

    pub fn count(&self, selector: &str) -> StoreResult<usize> {
        Ok(self.tree.count(selector)?)
    }

    /// Text content of each node matching `selector`, in document order
    pub fn select_text(&self, selector: &str) -> StoreResult<Vec<String>> {
        Ok(self.tree.select_text(selector)?)
    }

    pub fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        Ok(self.tree.serialize()?)
    }

    pub(crate) fn tree(&self) -> &XmlDocument {
        &self.tree
    }
}
