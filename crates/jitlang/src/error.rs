//! Compile-time and runtime error taxonomies (`spec.md` §7, expanded in
//! `SPEC_FULL.md` §4.6).

use std::fmt;

use crate::ast::FileOffset;

/// The category of a [`CompileError`], matching the taxonomy in `spec.md` §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum CompileErrorKind {
    Lex,
    Parse,
    Annotation,
    Analysis,
    FragmentResolution,
    Cycle,
}

/// A failure raised by any phase from Initial through Imported.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub message: String,
    pub offset: Option<FileOffset>,
}

impl CompileError {
    #[must_use]
    pub fn new(kind: CompileErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            offset: None,
        }
    }

    #[must_use]
    pub fn at(kind: CompileErrorKind, message: impl Into<String>, offset: FileOffset) -> Self {
        Self {
            kind,
            message: message.into(),
            offset: Some(offset),
        }
    }

    /// Renders the file location and source line excerpt the way the phase
    /// driver is specified to report fatal load-time errors (`spec.md` §4.1).
    #[must_use]
    pub fn render(&self, module_name: &str, source: Option<&str>) -> String {
        let mut out = format!("{module_name}: {} error: {}", self.kind, self.message);
        if let (Some(offset), Some(source)) = (self.offset, source) {
            let (line_no, line, col) = locate(source, offset);
            out.push_str(&format!("\n  line {line_no}, column {col}:\n    {line}"));
        }
        out
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

impl std::error::Error for CompileError {}

fn locate(source: &str, offset: FileOffset) -> (usize, &str, usize) {
    let offset = offset.min(source.len());
    let mut line_no = 1;
    let mut line_start = 0;
    for (idx, ch) in source.char_indices() {
        if idx >= offset {
            break;
        }
        if ch == '\n' {
            line_no += 1;
            line_start = idx + 1;
        }
    }
    let line_end = source[line_start..].find('\n').map_or(source.len(), |i| line_start + i);
    (line_no, &source[line_start..line_end], offset - line_start + 1)
}

/// Reserved runtime exception classes the compiler and dispatcher can raise
/// directly (`spec.md` §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum RuntimeExceptionKind {
    AssertionError,
    IndexError,
    KeyError,
    OSError,
    PyJitCompilerError,
    TypeError,
    ValueError,
}

/// A reified runtime exception: `Instance(class_id, attrs)` specialized for
/// the reserved classes the pipeline itself can raise (`spec.md` §7).
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeException {
    pub kind: RuntimeExceptionKind,
    pub message: Option<String>,
    /// Set only for `PyJitCompilerError`.
    pub callsite_token: Option<u64>,
    pub filename: Option<String>,
    pub line: Option<usize>,
}

impl RuntimeException {
    #[must_use]
    pub fn simple(kind: RuntimeExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
            callsite_token: None,
            filename: None,
            line: None,
        }
    }

    #[must_use]
    pub fn jit_compiler_error(callsite_token: u64, filename: String, line: usize, message: impl Into<String>) -> Self {
        Self {
            kind: RuntimeExceptionKind::PyJitCompilerError,
            message: Some(message.into()),
            callsite_token: Some(callsite_token),
            filename: Some(filename),
            line: Some(line),
        }
    }
}

impl fmt::Display for RuntimeException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {msg}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_line_and_column() {
        let err = CompileError::at(CompileErrorKind::Analysis, "type changed", 6);
        let rendered = err.render("m", Some("x = 1\ny = 2\n"));
        assert!(rendered.contains("line 2"));
    }
}
