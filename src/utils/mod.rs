pub mod errors;
pub mod logger;

pub use errors::{Diagnostic, DiagnosticSeverity, Diagnostics, JitError, JitResult};
