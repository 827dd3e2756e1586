//! Engine error types with source-mapped template diagnostics

use std::sync::Arc;
use std::time::Duration;

use kubetemplate_kube::{KubeError, ResourceKind};
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::discovery::DiscoveryError;
use crate::filters::AVAILABLE_FILTERS;
use crate::provider::AVAILABLE_METHODS;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main engine error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Template error")]
    Template(#[from] TemplateError),

    /// A resource accessor failed while rendering
    #[error(transparent)]
    Lookup(#[from] LookupError),

    /// A namespace watch loop has died; the cache can no longer be trusted
    #[error("{0}")]
    WatchFailure(Arc<KubeError>),

    #[error("engine is closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// The accessor failure behind this error, if any
    pub fn lookup(&self) -> Option<&LookupError> {
        match self {
            EngineError::Lookup(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors raised by the template accessors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("namespace '{namespace}' is not monitored\nHint: learn the template before rendering it")]
    NamespaceNotMonitored { namespace: String },

    #[error("{kind} '{namespace}/{name}' not found")]
    ResourceNotFound {
        kind: ResourceKind,
        namespace: String,
        name: String,
    },

    #[error("key '{key}' of Secret '{namespace}/{name}' is not valid UTF-8\nHint: use secret_binary for binary values")]
    DecodeFailure {
        namespace: String,
        name: String,
        key: String,
    },

    #[error("unrecognized network kind '{0}' (expected hostname, privatev4, publicv4 or publicv6)")]
    UnrecognizedNetworkKind(String),

    #[error("no namespace given and no default namespace configured\nHint: pass --namespace or set POD_NAMESPACE")]
    NoDefaultNamespace,

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("cache of namespace '{namespace}' did not sync within {timeout:?}")]
    CacheNotSynced { namespace: String, timeout: Duration },
}

/// Error kind for categorizing template errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TemplateErrorKind {
    UndefinedVariable,
    UnknownFilter,
    UnknownFunction,
    UnknownMethod,
    SyntaxError,
    TypeError,
    InvalidOperation,
    Other,
}

impl TemplateErrorKind {
    /// Convert to a code string for diagnostics
    pub fn to_code_string(&self) -> &'static str {
        match self {
            Self::UndefinedVariable => "undefined_variable",
            Self::UnknownFilter => "unknown_filter",
            Self::UnknownFunction => "unknown_function",
            Self::UnknownMethod => "unknown_method",
            Self::SyntaxError => "syntax",
            Self::TypeError => "type",
            Self::InvalidOperation => "invalid_operation",
            Self::Other => "render",
        }
    }
}

/// Template-specific error with source information
#[derive(Error, Debug, Diagnostic, Clone)]
#[error("{message}")]
#[diagnostic(code(kubetemplate::template::render))]
pub struct TemplateError {
    pub message: String,

    pub kind: TemplateErrorKind,

    #[source_code]
    pub src: NamedSource<String>,

    #[label("error occurred here")]
    pub span: Option<SourceSpan>,

    #[help]
    pub suggestion: Option<String>,
}

impl TemplateError {
    /// Create a template error from a MiniJinja error
    pub fn from_minijinja(err: minijinja::Error, template_name: &str, template_source: &str) -> Self {
        let kind = categorize(&err);
        let message = match err.detail() {
            Some(detail) => format!("{}: {}", kind_label(kind), detail),
            None => err.to_string(),
        };
        let span = err
            .line()
            .and_then(|line| calculate_span(template_source, line));

        Self {
            message,
            kind,
            src: NamedSource::new(template_name, template_source.to_string()),
            span,
            suggestion: suggestion_for(kind),
        }
    }

    /// Create a simple error without source mapping
    pub fn simple(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: TemplateErrorKind::Other,
            src: NamedSource::new("<unknown>", String::new()),
            span: None,
            suggestion: None,
        }
    }

    pub fn kind(&self) -> TemplateErrorKind {
        self.kind
    }
}

fn categorize(err: &minijinja::Error) -> TemplateErrorKind {
    match err.kind() {
        minijinja::ErrorKind::UndefinedError => TemplateErrorKind::UndefinedVariable,
        minijinja::ErrorKind::UnknownFilter => TemplateErrorKind::UnknownFilter,
        minijinja::ErrorKind::UnknownFunction => TemplateErrorKind::UnknownFunction,
        minijinja::ErrorKind::UnknownMethod => TemplateErrorKind::UnknownMethod,
        minijinja::ErrorKind::SyntaxError => TemplateErrorKind::SyntaxError,
        minijinja::ErrorKind::InvalidOperation => TemplateErrorKind::InvalidOperation,
        minijinja::ErrorKind::NonPrimitive | minijinja::ErrorKind::NonKey => {
            TemplateErrorKind::TypeError
        }
        _ => TemplateErrorKind::Other,
    }
}

fn kind_label(kind: TemplateErrorKind) -> &'static str {
    match kind {
        TemplateErrorKind::UndefinedVariable => "undefined value",
        TemplateErrorKind::UnknownFilter => "unknown filter",
        TemplateErrorKind::UnknownFunction => "unknown function",
        TemplateErrorKind::UnknownMethod => "unknown method",
        TemplateErrorKind::SyntaxError => "syntax error",
        TemplateErrorKind::TypeError => "type error",
        TemplateErrorKind::InvalidOperation => "invalid operation",
        TemplateErrorKind::Other => "render error",
    }
}

fn suggestion_for(kind: TemplateErrorKind) -> Option<String> {
    match kind {
        TemplateErrorKind::UndefinedVariable => Some(
            "Rendering is strict: every value must be defined. Use `| default(\"...\")` for optional values."
                .to_string(),
        ),
        TemplateErrorKind::UnknownFilter => Some(format!(
            "Available filters include: {}",
            AVAILABLE_FILTERS.join(", ")
        )),
        TemplateErrorKind::UnknownMethod => Some(format!(
            "The `kube` object provides: {}",
            AVAILABLE_METHODS.join(", ")
        )),
        TemplateErrorKind::UnknownFunction => {
            Some("Use `kube.<accessor>(...)` for cluster data and `env(name)` for environment variables.".to_string())
        }
        _ => None,
    }
}

/// Calculate the source span for a given line number
fn calculate_span(source: &str, line_num: usize) -> Option<SourceSpan> {
    let mut offset = 0;

    for (idx, line) in source.lines().enumerate() {
        if idx + 1 == line_num {
            return Some(SourceSpan::new(offset.into(), line.len()));
        }
        offset += line.len() + 1;
    }

    None
}

/// Find the accessor failure a MiniJinja error was raised for
pub(crate) fn lookup_source(err: &minijinja::Error) -> Option<LookupError> {
    let mut source = std::error::Error::source(err);
    while let Some(e) = source {
        if let Some(lookup) = e.downcast_ref::<LookupError>() {
            return Some(lookup.clone());
        }
        source = e.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_span() {
        let source = "line one\nline two\nline three";
        let span = calculate_span(source, 2).unwrap();
        assert_eq!(span.offset(), 9);
        assert_eq!(span.len(), 8);
        assert!(calculate_span(source, 10).is_none());
    }

    #[test]
    fn test_from_minijinja_syntax_error() {
        let env = minijinja::Environment::new();
        let err = env.template_from_str("a\n{{ broken").unwrap_err();
        let te = TemplateError::from_minijinja(err, "app.conf", "a\n{{ broken");

        assert_eq!(te.kind(), TemplateErrorKind::SyntaxError);
        assert!(te.span.is_some());
        assert_eq!(te.kind().to_code_string(), "syntax");
    }

    #[test]
    fn test_unknown_filter_suggests_filters() {
        let env = minijinja::Environment::new();
        let err = env.render_str("{{ 'x' | nosuch }}", ()).unwrap_err();
        let te = TemplateError::from_minijinja(err, "t", "{{ 'x' | nosuch }}");

        assert_eq!(te.kind(), TemplateErrorKind::UnknownFilter);
        assert!(te.suggestion.unwrap().contains("b64encode"));
    }

    #[test]
    fn test_lookup_source_walks_chain() {
        let lookup = LookupError::NamespaceNotMonitored {
            namespace: "ns1".to_string(),
        };
        let err = minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, lookup.to_string())
            .with_source(lookup.clone());
        assert_eq!(lookup_source(&err), Some(lookup));

        let plain = minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, "nope");
        assert_eq!(lookup_source(&plain), None);
    }

    #[test]
    fn test_lookup_error_messages() {
        let err = LookupError::ResourceNotFound {
            kind: ResourceKind::ConfigMap,
            namespace: "ns1".to_string(),
            name: "app-cfg".to_string(),
        };
        assert_eq!(err.to_string(), "ConfigMap 'ns1/app-cfg' not found");

        let err = LookupError::UnrecognizedNetworkKind("mac".to_string());
        assert!(err.to_string().contains("'mac'"));
    }
}
