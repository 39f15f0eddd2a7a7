//! LibXML2 FFI wrapper
//!
//! Direct bindings for the slice of libxml2 the store needs: XML Schema
//! compilation and validation, in-memory document parsing, XPath node
//! selection, node construction and serialization.
//!
//! ## Thread safety
//!
//! - Schema parsing is serialized behind a process-wide lock; libxml2's schema
//!   parser is not thread-safe.
//! - A compiled schema is read-only and may be shared across threads. Each
//!   validation creates its own validation context.
//! - A parsed document is owned by exactly one task at a time ([`XmlDocument`]
//!   is `Send` but not `Sync`).

use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, Once, PoisonError};

use libc::{c_char, c_int, c_long, c_void};

use crate::error::{LibXml2Error, LibXml2Result};

/// Global initialization flag for libxml2
static LIBXML2_INIT: Once = Once::new();

/// Serializes schema compilation
static SCHEMA_PARSE_LOCK: Mutex<()> = Mutex::new(());

// Parser options
const XML_PARSE_NOERROR: c_int = 1 << 5;
const XML_PARSE_NOWARNING: c_int = 1 << 6;
const XML_PARSE_NOBLANKS: c_int = 1 << 8;
const XML_PARSE_NONET: c_int = 1 << 11;

const XML_SAVE_FORMAT: c_int = 1;

/// Namespace nodes in an XPath result are copies owned by the result object
const XML_NAMESPACE_DECL: c_int = 18;

const XPATH_NODESET: c_int = 1;

// Opaque libxml2 structures
#[repr(C)]
pub struct XmlSchema {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaValidCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlDoc {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlNode {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlXPathContext {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlBuffer {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSaveCtxt {
    _private: [u8; 0],
}

/// Leading fields shared by `xmlNode` and `xmlNs`: one pointer, then the
/// node type.
#[repr(C)]
struct XmlNodeHeader {
    _first: *mut c_void,
    type_: c_int,
}

/// Leading fields of `xmlNodeSet`
#[repr(C)]
pub struct XmlNodeSet {
    pub node_nr: c_int,
    pub node_max: c_int,
    pub node_tab: *mut *mut XmlNode,
}

/// Leading fields of `xmlXPathObject`; only ever read through a pointer
/// returned by libxml2.
#[repr(C)]
pub struct XmlXPathObject {
    pub type_: c_int,
    pub nodesetval: *mut XmlNodeSet,
}

#[repr(C)]
pub struct xmlError {
    pub domain: c_int,
    pub code: c_int,
    pub message: *const c_char,
    pub level: c_int,
    pub file: *const c_char,
    pub line: c_int,
    pub str1: *const c_char,
    pub str2: *const c_char,
    pub str3: *const c_char,
    pub int1: c_int,
    pub int2: c_int,
    pub ctxt: *mut c_void,
    pub node: *mut c_void,
}

pub type XmlStructuredErrorFunc =
    Option<unsafe extern "C" fn(user_data: *mut c_void, error: *mut xmlError)>;

// External libxml2 FFI declarations
#[cfg_attr(target_os = "windows", link(name = "libxml2"))]
#[cfg_attr(not(target_os = "windows"), link(name = "xml2"))]
unsafe extern "C" {
    pub fn xmlInitParser();
    pub fn xmlInitGlobals();

    // Schema compilation
    pub fn xmlSchemaNewMemParserCtxt(
        buffer: *const c_char,
        size: c_int,
    ) -> *mut XmlSchemaParserCtxt;
    pub fn xmlSchemaSetParserStructuredErrors(
        ctxt: *mut XmlSchemaParserCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
    pub fn xmlSchemaParse(ctxt: *const XmlSchemaParserCtxt) -> *mut XmlSchema;
    pub fn xmlSchemaFreeParserCtxt(ctxt: *mut XmlSchemaParserCtxt);
    pub fn xmlSchemaFree(schema: *mut XmlSchema);

    // Schema validation
    pub fn xmlSchemaNewValidCtxt(schema: *const XmlSchema) -> *mut XmlSchemaValidCtxt;
    pub fn xmlSchemaFreeValidCtxt(ctxt: *mut XmlSchemaValidCtxt);
    pub fn xmlSchemaSetValidStructuredErrors(
        ctxt: *mut XmlSchemaValidCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
    pub fn xmlSchemaValidateDoc(ctxt: *mut XmlSchemaValidCtxt, doc: *mut XmlDoc) -> c_int;

    // Documents
    pub fn xmlReadMemory(
        buffer: *const c_char,
        size: c_int,
        url: *const c_char,
        encoding: *const c_char,
        options: c_int,
    ) -> *mut XmlDoc;
    pub fn xmlFreeDoc(doc: *mut XmlDoc);
    pub fn xmlGetLastError() -> *const xmlError;
    pub fn xmlResetLastError();

    // XPath
    pub fn xmlXPathNewContext(doc: *mut XmlDoc) -> *mut XmlXPathContext;
    pub fn xmlXPathFreeContext(ctxt: *mut XmlXPathContext);
    pub fn xmlXPathEvalExpression(
        expr: *const u8,
        ctxt: *mut XmlXPathContext,
    ) -> *mut XmlXPathObject;
    pub fn xmlXPathFreeObject(obj: *mut XmlXPathObject);

    // Tree construction
    pub fn xmlNewTextChild(
        parent: *mut XmlNode,
        ns: *mut c_void,
        name: *const u8,
        content: *const u8,
    ) -> *mut XmlNode;
    pub fn xmlSetProp(node: *mut XmlNode, name: *const u8, value: *const u8) -> *mut c_void;

    // Buffers and serialization
    pub fn xmlBufferCreate() -> *mut XmlBuffer;
    pub fn xmlBufferFree(buf: *mut XmlBuffer);
    pub fn xmlBufferContent(buf: *const XmlBuffer) -> *const u8;
    pub fn xmlBufferLength(buf: *const XmlBuffer) -> c_int;
    pub fn xmlNodeBufGetContent(buffer: *mut XmlBuffer, cur: *const XmlNode) -> c_int;
    pub fn xmlSaveToBuffer(
        buffer: *mut XmlBuffer,
        encoding: *const c_char,
        options: c_int,
    ) -> *mut XmlSaveCtxt;
    pub fn xmlSaveDoc(ctxt: *mut XmlSaveCtxt, doc: *mut XmlDoc) -> c_long;
    pub fn xmlSaveClose(ctxt: *mut XmlSaveCtxt) -> c_int;
}

/// Collects structured error messages into the `Vec<String>` behind `user_data`
unsafe extern "C" fn structured_error_callback(user_data: *mut c_void, error: *mut xmlError) {
    let errors = unsafe { &mut *(user_data as *mut Vec<String>) };

    if !error.is_null() {
        let msg_ptr = unsafe { (*error).message };
        if !msg_ptr.is_null() {
            let c_str = unsafe { CStr::from_ptr(msg_ptr) };
            let message = c_str.to_string_lossy();
            let message = message.trim();
            if !message.is_empty() {
                errors.push(message.to_string());
            }
        }
    }
}

fn last_error_message() -> Option<String> {
    unsafe {
        let err = xmlGetLastError();
        if err.is_null() || (*err).message.is_null() {
            return None;
        }
        let message = CStr::from_ptr((*err).message).to_string_lossy();
        let line = (*err).line;
        let message = message.trim();
        if line > 0 {
            Some(format!("line {line}: {message}"))
        } else {
            Some(message.to_string())
        }
    }
}

fn to_xml_string(value: &str) -> LibXml2Result<CString> {
    CString::new(value).map_err(|_| LibXml2Error::InvalidXml {
        details: "embedded NUL character".to_string(),
    })
}

fn buffer_len(len: usize) -> LibXml2Result<c_int> {
    c_int::try_from(len).map_err(|_| LibXml2Error::InvalidXml {
        details: format!("input of {len} bytes is too large"),
    })
}

/// Owned libxml2 buffer, freed on drop
struct OwnedBuffer(NonNull<XmlBuffer>);

impl OwnedBuffer {
    fn new() -> LibXml2Result<Self> {
        NonNull::new(unsafe { xmlBufferCreate() })
            .map(OwnedBuffer)
            .ok_or(LibXml2Error::MemoryAllocation)
    }

    fn as_ptr(&self) -> *mut XmlBuffer {
        self.0.as_ptr()
    }

    fn to_vec(&self) -> Vec<u8> {
        unsafe {
            let content = xmlBufferContent(self.as_ptr());
            let len = xmlBufferLength(self.as_ptr());
            if content.is_null() || len <= 0 {
                return Vec::new();
            }
            std::slice::from_raw_parts(content, len as usize).to_vec()
        }
    }
}

impl Drop for OwnedBuffer {
    fn drop(&mut self) {
        unsafe { xmlBufferFree(self.0.as_ptr()) }
    }
}

/// Thread-safe wrapper for a compiled libxml2 schema
#[derive(Debug)]
pub struct XmlSchemaPtr {
    inner: Arc<XmlSchemaInner>,
}

#[derive(Debug)]
struct XmlSchemaInner {
    ptr: *mut XmlSchema,
    _phantom: PhantomData<XmlSchema>,
}

// Safety: a compiled xmlSchema is only read after parsing
unsafe impl Send for XmlSchemaInner {}
unsafe impl Sync for XmlSchemaInner {}

impl XmlSchemaPtr {
    /// # Safety
    ///
    /// `ptr` must come from `xmlSchemaParse` and must not be freed elsewhere.
    pub(crate) unsafe fn from_raw(ptr: *mut XmlSchema) -> LibXml2Result<Self> {
        if ptr.is_null() {
            return Err(LibXml2Error::SchemaParseFailed { errors: Vec::new() });
        }

        Ok(XmlSchemaPtr {
            inner: Arc::new(XmlSchemaInner {
                ptr,
                _phantom: PhantomData,
            }),
        })
    }

    pub(crate) fn as_ptr(&self) -> *const XmlSchema {
        self.inner.ptr
    }

}

impl Clone for XmlSchemaPtr {
    fn clone(&self) -> Self {
        XmlSchemaPtr {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for XmlSchemaInner {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                xmlSchemaFree(self.ptr);
            }
            self.ptr = std::ptr::null_mut();
        }
    }
}

/// Validation result from libxml2
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Validation succeeded (return code 0)
    Valid,
    /// Validation failed with errors (return code > 0)
    Invalid { error_count: i32, errors: Vec<String> },
    /// Internal error occurred (return code < 0)
    InternalError { code: i32 },
}

impl ValidationResult {
    pub fn from_code(code: c_int, errors: Vec<String>) -> Self {
        match code {
            0 => ValidationResult::Valid,
            n if n > 0 => ValidationResult::Invalid {
                error_count: n,
                errors,
            },
            n => ValidationResult::InternalError { code: n },
        }
    }
}

/// A parsed XML tree owned by Rust. Freed with `xmlFreeDoc` on drop.
#[derive(Debug)]
pub struct XmlDocument {
    ptr: NonNull<XmlDoc>,
}

// Safety: the tree is only reachable through this owner, which moves between
// threads but is never shared.
unsafe impl Send for XmlDocument {}

/// A node inside an [`XmlDocument`] that is borrowed mutably
pub struct XmlNodeMut<'doc> {
    ptr: NonNull<XmlNode>,
    _doc: PhantomData<&'doc mut XmlDocument>,
}

impl XmlDocument {
    /// Parse a document from memory. `url` only labels error messages.
    pub fn parse(data: &[u8], url: &str) -> LibXml2Result<Self> {
        LibXml2Wrapper::init();
        let size = buffer_len(data.len())?;
        let c_url = to_xml_string(url)?;
        let options =
            XML_PARSE_NOERROR | XML_PARSE_NOWARNING | XML_PARSE_NOBLANKS | XML_PARSE_NONET;

        unsafe {
            xmlResetLastError();
            let doc = xmlReadMemory(
                data.as_ptr() as *const c_char,
                size,
                c_url.as_ptr(),
                std::ptr::null(),
                options,
            );
            match NonNull::new(doc) {
                Some(ptr) => Ok(XmlDocument { ptr }),
                None => Err(LibXml2Error::InvalidXml {
                    details: last_error_message()
                        .unwrap_or_else(|| "document could not be parsed".to_string()),
                }),
            }
        }
    }

    fn as_ptr(&self) -> *mut XmlDoc {
        self.ptr.as_ptr()
    }

    /// Evaluate `expression` and return the matched tree nodes in document
    /// order. Namespace nodes are skipped: they are freed with the XPath
    /// result and never belong to the tree.
    fn select_raw(&self, expression: &str) -> LibXml2Result<Vec<NonNull<XmlNode>>> {
        let c_expr = to_xml_string(expression)?;
        let invalid = || LibXml2Error::InvalidXPath {
            expression: expression.to_string(),
        };

        unsafe {
            let ctxt = xmlXPathNewContext(self.as_ptr());
            if ctxt.is_null() {
                return Err(LibXml2Error::MemoryAllocation);
            }
            let obj = xmlXPathEvalExpression(c_expr.as_ptr() as *const u8, ctxt);
            xmlXPathFreeContext(ctxt);

            if obj.is_null() {
                return Err(invalid());
            }
            if (*obj).type_ != XPATH_NODESET {
                xmlXPathFreeObject(obj);
                return Err(invalid());
            }

            let mut nodes = Vec::new();
            let set = (*obj).nodesetval;
            if !set.is_null() && !(*set).node_tab.is_null() {
                for i in 0..(*set).node_nr.max(0) as usize {
                    let Some(node) = NonNull::new(*(*set).node_tab.add(i)) else {
                        continue;
                    };
                    let header = node.as_ptr() as *const XmlNodeHeader;
                    if (*header).type_ != XML_NAMESPACE_DECL {
                        nodes.push(node);
                    }
                }
            }
            xmlXPathFreeObject(obj);
            Ok(nodes)
        }
    }

    /// Number of nodes matched by `expression`
    pub fn count(&self, expression: &str) -> LibXml2Result<usize> {
        Ok(self.select_raw(expression)?.len())
    }

    /// Text content of every node matched by `expression`
    pub fn select_text(&self, expression: &str) -> LibXml2Result<Vec<String>> {
        self.select_raw(expression)?
            .into_iter()
            .map(|node| {
                let buffer = OwnedBuffer::new()?;
                if unsafe { xmlNodeBufGetContent(buffer.as_ptr(), node.as_ptr()) } != 0 {
                    return Err(LibXml2Error::MemoryAllocation);
                }
                Ok(String::from_utf8_lossy(&buffer.to_vec()).into_owned())
            })
            .collect()
    }

    /// Nodes matched by `expression`, open for modification
    pub fn select_mut(&mut self, expression: &str) -> LibXml2Result<Vec<XmlNodeMut<'_>>> {
        Ok(self
            .select_raw(expression)?
            .into_iter()
            .map(|ptr| XmlNodeMut {
                ptr,
                _doc: PhantomData,
            })
            .collect())
    }

    /// Serialize the whole document, declaration included, as indented UTF-8
    pub fn serialize(&self) -> LibXml2Result<Vec<u8>> {
        let buffer = OwnedBuffer::new()?;
        unsafe {
            let ctxt = xmlSaveToBuffer(buffer.as_ptr(), c"UTF-8".as_ptr(), XML_SAVE_FORMAT);
            if ctxt.is_null() {
                return Err(LibXml2Error::MemoryAllocation);
            }
            let written = xmlSaveDoc(ctxt, self.as_ptr());
            let closed = xmlSaveClose(ctxt);
            if written < 0 || closed < 0 {
                return Err(LibXml2Error::Serialization {
                    details: last_error_message()
                        .unwrap_or_else(|| "document could not be written".to_string()),
                });
            }
        }
        Ok(buffer.to_vec())
    }
}

impl Drop for XmlDocument {
    fn drop(&mut self) {
        unsafe { xmlFreeDoc(self.ptr.as_ptr()) }
    }
}

impl<'doc> XmlNodeMut<'doc> {
    /// Append a child element, with optional text content escaped by libxml2
    pub fn append_child(
        &mut self,
        name: &str,
        text: Option<&str>,
    ) -> LibXml2Result<XmlNodeMut<'doc>> {
        let c_name = to_xml_string(name)?;
        let c_text = text.map(to_xml_string).transpose()?;
        let content = c_text
            .as_ref()
            .map_or(std::ptr::null(), |t| t.as_ptr() as *const u8);

        let child = unsafe {
            xmlNewTextChild(
                self.ptr.as_ptr(),
                std::ptr::null_mut(),
                c_name.as_ptr() as *const u8,
                content,
            )
        };
        NonNull::new(child)
            .map(|ptr| XmlNodeMut {
                ptr,
                _doc: PhantomData,
            })
            .ok_or(LibXml2Error::MemoryAllocation)
    }

    /// Set (or replace) an attribute
    pub fn set_attribute(&mut self, name: &str, value: &str) -> LibXml2Result<()> {
        let c_name = to_xml_string(name)?;
        let c_value = to_xml_string(value)?;
        let attr = unsafe {
            xmlSetProp(
                self.ptr.as_ptr(),
                c_name.as_ptr() as *const u8,
                c_value.as_ptr() as *const u8,
            )
        };
        if attr.is_null() {
            return Err(LibXml2Error::MemoryAllocation);
        }
        Ok(())
    }
}

/// Entry point for schema compilation and validation
pub struct LibXml2Wrapper {
    _phantom: PhantomData<()>,
}

impl LibXml2Wrapper {
    pub fn new() -> Self {
        Self::init();
        LibXml2Wrapper {
            _phantom: PhantomData,
        }
    }

    fn init() {
        LIBXML2_INIT.call_once(|| unsafe {
            xmlInitParser();
            xmlInitGlobals();
        });
    }

    /// Compile an XML schema from a memory buffer.
    ///
    /// Calls are serialized process-wide. Compiler diagnostics are returned in
    /// `SchemaParseFailed`.
    pub fn parse_schema_from_memory(&self, schema_data: &[u8]) -> LibXml2Result<XmlSchemaPtr> {
        let size = buffer_len(schema_data.len())?;
        let _guard = SCHEMA_PARSE_LOCK
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        unsafe {
            let parser_ctxt =
                xmlSchemaNewMemParserCtxt(schema_data.as_ptr() as *const c_char, size);
            if parser_ctxt.is_null() {
                // libxml2 refuses an empty buffer here
                return Err(LibXml2Error::SchemaParseFailed {
                    errors: vec!["empty schema document".to_string()],
                });
            }

            let mut errors: Vec<String> = Vec::new();
            xmlSchemaSetParserStructuredErrors(
                parser_ctxt,
                Some(structured_error_callback),
                &mut errors as *mut Vec<String> as *mut c_void,
            );

            let schema_ptr = xmlSchemaParse(parser_ctxt);
            xmlSchemaFreeParserCtxt(parser_ctxt);

            if schema_ptr.is_null() {
                return Err(LibXml2Error::SchemaParseFailed { errors });
            }
            XmlSchemaPtr::from_raw(schema_ptr)
        }
    }

    /// Validate a parsed document against a compiled schema.
    ///
    /// Each call owns its validation context, so one schema may validate
    /// different documents concurrently. The document is not modified.
    pub fn validate_document(
        &self,
        schema: &XmlSchemaPtr,
        document: &XmlDocument,
    ) -> LibXml2Result<ValidationResult> {
        unsafe {
            let valid_ctxt = xmlSchemaNewValidCtxt(schema.as_ptr());
            if valid_ctxt.is_null() {
                return Err(LibXml2Error::ValidationContextCreationFailed);
            }

            let mut errors: Vec<String> = Vec::new();
            xmlSchemaSetValidStructuredErrors(
                valid_ctxt,
                Some(structured_error_callback),
                &mut errors as *mut Vec<String> as *mut c_void,
            );

            let result_code = xmlSchemaValidateDoc(valid_ctxt, document.as_ptr());
            xmlSchemaFreeValidCtxt(valid_ctxt);

            match ValidationResult::from_code(result_code, errors) {
                ValidationResult::InternalError { code } => {
                    Err(LibXml2Error::ValidationFailed { code })
                }
                result => Ok(result),
            }
        }
    }
}

impl Default for LibXml2Wrapper {
    fn default() -> Self {
        Self::new()
    }
}
