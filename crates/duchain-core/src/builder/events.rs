//! Builder event streams
//!
//! A stream is a JSON array of [`BuildEvent`] objects tagged by `"event"`.
//! It may hold several documents, each enclosed in `begin_document` and
//! `end_document`:
//!
//! ```json
//! [
//!   {"event": "begin_document", "url": "a.cpp"},
//!   {"event": "declare", "name": "i", "kind": "instance", "type": "int",
//!    "range": {"start": {"line": 1, "column": 4}, "end": {"line": 1, "column": 5}}},
//!   {"event": "end_document"}
//! ]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{BuildError, Result};
use crate::context::ContextType;
use crate::declaration::{AccessPolicy, DeclarationKind};
use crate::environment::IdentifiedFile;
use crate::range::{SimpleCursor, SimpleRange};

/// One step of a builder's walk over a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BuildEvent {
    BeginDocument {
        url: String,
        #[serde(default)]
        identity: u32,
        #[serde(default)]
        range: SimpleRange,
    },
    /// Open a child of the current context. With `owned` the last
    /// declaration of the current context opens it.
    OpenContext {
        kind: ContextType,
        range: SimpleRange,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<String>,
        #[serde(default)]
        owned: bool,
    },
    CloseContext,
    Declare {
        name: String,
        range: SimpleRange,
        #[serde(default)]
        kind: DeclarationKind,
        /// Spelled type, resolved at the declaration's start.
        #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
        type_name: Option<String>,
        /// Default of a template parameter.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        access: Option<AccessPolicy>,
        #[serde(default)]
        definition: bool,
        #[serde(default)]
        forward: bool,
        #[serde(default)]
        type_alias: bool,
        /// Name of the declaration this definition defines.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        defines: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
    /// A use of `name`, resolved at the start of `range`.
    Use {
        name: String,
        range: SimpleRange,
    },
    /// Import the root context of another document.
    Import {
        document: String,
        #[serde(default = "SimpleCursor::invalid")]
        position: SimpleCursor,
    },
    /// Import the namespaces named `name` (`using namespace`).
    UsingNamespace {
        name: String,
        #[serde(default = "SimpleCursor::invalid")]
        position: SimpleCursor,
    },
    /// Macros the parse depended on; `null` values required the macro to be
    /// undefined.
    Environment {
        #[serde(default)]
        macros: BTreeMap<String, Option<String>>,
    },
    EndDocument,
}

impl BuildEvent {
    /// Event name as written in streams.
    pub fn name(&self) -> &'static str {
        match self {
            BuildEvent::BeginDocument { .. } => "begin_document",
            BuildEvent::OpenContext { .. } => "open_context",
            BuildEvent::CloseContext => "close_context",
            BuildEvent::Declare { .. } => "declare",
            BuildEvent::Use { .. } => "use",
            BuildEvent::Import { .. } => "import",
            BuildEvent::UsingNamespace { .. } => "using_namespace",
            BuildEvent::Environment { .. } => "environment",
            BuildEvent::EndDocument => "end_document",
        }
    }
}

/// The events of one document, without the enclosing begin/end pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentScript {
    pub url: String,
    pub identity: u32,
    pub range: SimpleRange,
    pub events: Vec<BuildEvent>,
}

impl DocumentScript {
    pub fn identified_file(&self) -> IdentifiedFile {
        IdentifiedFile::new(self.url.as_str(), self.identity)
    }

    /// URLs of the documents this one imports, in event order.
    pub fn imported_documents(&self) -> Vec<&str> {
        let mut documents: Vec<&str> = Vec::new();
        for event in &self.events {
            if let BuildEvent::Import { document, .. } = event {
                if !documents.contains(&document.as_str()) {
                    documents.push(document);
                }
            }
        }
        documents
    }

    pub fn uses_environment(&self) -> bool {
        self.events
            .iter()
            .any(|event| matches!(event, BuildEvent::Environment { .. }))
    }
}

/// Decode a JSON event stream.
pub fn parse_events(text: &str) -> Result<Vec<BuildEvent>> {
    Ok(serde_json::from_str(text)?)
}

/// Read and decode the event stream stored at `path`.
pub fn load_events(path: &Path) -> Result<Vec<BuildEvent>> {
    let text = std::fs::read_to_string(path).map_err(|source| BuildError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_events(&text)
}

/// Group a stream into documents. Nested or unterminated documents and
/// events outside a document are errors.
pub fn split_documents(events: Vec<BuildEvent>) -> Result<Vec<DocumentScript>> {
    let mut documents = Vec::new();
    let mut current: Option<DocumentScript> = None;

    for event in events {
        match event {
            BuildEvent::BeginDocument {
                url,
                identity,
                range,
            } => {
                if current.is_some() {
                    return Err(BuildError::OutsideDocument("begin_document"));
                }
                current = Some(DocumentScript {
                    url,
                    identity,
                    range,
                    events: Vec::new(),
                });
            }
            BuildEvent::EndDocument => match current.take() {
                Some(document) => documents.push(document),
                None => return Err(BuildError::OutsideDocument("end_document")),
            },
            event => match current.as_mut() {
                Some(document) => document.events.push(event),
                None => return Err(BuildError::OutsideDocument(event.name())),
            },
        }
    }

    if let Some(document) = current {
        return Err(BuildError::UnclosedContexts {
            url: document.url,
            open: 0,
        });
    }
    Ok(documents)
}
