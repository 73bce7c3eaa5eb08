use std::fmt::Write as _;
use std::ops::Range;

use ariadne::{Config, Label, Report, ReportKind, Source};
use thiserror::Error;

/// Errors produced while instantiating, specializing, compiling or looking up
/// JIT executables.
///
/// Errors are `Clone` because a failed specialization settles a cache slot
/// that every later caller observes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JitError {
    /// The IR source is malformed or the entrypoint could not be resolved.
    #[error("{message}{}", render_suffix(.diagnostics))]
    Parse {
        message: String,
        diagnostics: String,
    },
    /// Compilation options can't be honored for the given entrypoint.
    #[error("{0}")]
    Config(String),
    #[error("expected {expected} arguments, got: {got}")]
    Arity { expected: usize, got: usize },
    #[error("argument #{index}: {message}")]
    TypeMismatch { index: usize, message: String },
    #[error("argument #{index}: {message}")]
    ShapeMismatch { index: usize, message: String },
    /// Signature rewrite or the specialization pipeline failed.
    #[error("failed to specialize executable: {message}{}", render_suffix(.diagnostics))]
    Specialization {
        message: String,
        diagnostics: String,
    },
    /// Pipeline, signature conversion, translation or loading failed.
    #[error("{message}{}", render_suffix(.diagnostics))]
    Compile {
        message: String,
        diagnostics: String,
    },
    #[error("default executable is not available")]
    DefaultUnavailable,
    /// A scheduler task body panicked before finishing.
    #[error("task {name} panicked")]
    TaskPanicked { name: String },
}

fn render_suffix(diagnostics: &str) -> String {
    if diagnostics.is_empty() {
        String::new()
    } else {
        format!(":\n{diagnostics}")
    }
}

impl JitError {
    pub fn parse(message: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            diagnostics: diagnostics.into(),
        }
    }

    pub fn specialization(message: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self::Specialization {
            message: message.into(),
            diagnostics: diagnostics.into(),
        }
    }

    pub fn compile(message: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self::Compile {
            message: message.into(),
            diagnostics: diagnostics.into(),
        }
    }

    /// Accumulated diagnostic text attached to the error, empty if none.
    pub fn diagnostics(&self) -> &str {
        match self {
            Self::Parse { diagnostics, .. }
            | Self::Specialization { diagnostics, .. }
            | Self::Compile { diagnostics, .. } => diagnostics,
            _ => "",
        }
    }
}

pub type JitResult<T> = Result<T, JitError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Remark,
}

impl DiagnosticSeverity {
    fn report_kind(self) -> ReportKind<'static> {
        match self {
            Self::Error => ReportKind::Error,
            Self::Warning => ReportKind::Warning,
            Self::Remark => ReportKind::Advice,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Remark => "remark",
        }
    }
}

/// A single message emitted by the IR toolkit, optionally pointing into the
/// IR source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    severity: DiagnosticSeverity,
    span: Option<Range<usize>>,
    message: String,
}

impl Diagnostic {
    pub fn new(severity: DiagnosticSeverity, message: impl Into<String>) -> Self {
        Self {
            severity,
            span: None,
            message: message.into(),
        }
    }

    pub fn with_span(mut self, span: Range<usize>) -> Self {
        self.span = Some(span);
        self
    }

    pub const fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    pub fn span(&self) -> Option<Range<usize>> {
        self.span.clone()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Diagnostics accumulated by one compilation context. Owned by the context
/// and flushed into error values on failure.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    source_id: String,
    source: String,
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new(source_id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            source: source.into(),
            entries: Vec::new(),
        }
    }

    pub fn emit(&mut self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.emit(Diagnostic::new(DiagnosticSeverity::Error, message));
    }

    pub fn error_at(&mut self, span: Range<usize>, message: impl Into<String>) {
        self.emit(Diagnostic::new(DiagnosticSeverity::Error, message).with_span(span));
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.emit(Diagnostic::new(DiagnosticSeverity::Warning, message));
    }

    pub fn remark(&mut self, message: impl Into<String>) {
        self.emit(Diagnostic::new(DiagnosticSeverity::Remark, message));
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.entries
            .iter()
            .any(|diagnostic| diagnostic.severity == DiagnosticSeverity::Error)
    }

    /// Renders all diagnostics as plain text. Diagnostics with a span are
    /// rendered as source snippets.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for diagnostic in &self.entries {
            match diagnostic.span() {
                Some(span) => out.push_str(&self.render_snippet(diagnostic, span)),
                None => {
                    let _ = writeln!(
                        out,
                        "{}: {}",
                        diagnostic.severity.as_str(),
                        diagnostic.message
                    );
                }
            }
        }
        out
    }

    fn render_snippet(&self, diagnostic: &Diagnostic, span: Range<usize>) -> String {
        let len = self.source.len();
        let span = span.start.min(len)..span.end.min(len).max(span.start.min(len));

        let report = Report::build(
            diagnostic.severity.report_kind(),
            self.source_id.clone(),
            span.start,
        )
        .with_config(Config::default().with_color(false))
        .with_message(diagnostic.message())
        .with_label(Label::new((self.source_id.clone(), span)))
        .finish();

        let mut buffer = Vec::new();
        if report
            .write(
                (self.source_id.clone(), Source::from(self.source.as_str())),
                &mut buffer,
            )
            .is_err()
        {
            return format!("{}: {}\n", diagnostic.severity.as_str(), diagnostic.message);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
