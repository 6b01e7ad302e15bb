/// Diagnostic rendering
///
/// FEATURES
/// ────────
/// • Source context: error line + caret (^^^^) underneath
/// • Row / column pinpointed from byte offsets into a pattern or config line
/// • Levenshtein spell-check for AERO_101 (unknown property → "did you mean X?")
/// • Every error routed through AeroDiagnostic → miette graphical renderer
/// • AERO_100-399 taxonomy (see ErrorCode enum)
///
/// Everything upstream of this module owns its own error enum close to
/// the code that raises it (`errors::ConfError`, `errors::CliError`,
/// `regex::compile::CompileError`); this module is the single place
/// those get turned into something a terminal can render.

use std::fmt;
use miette::{Diagnostic, SourceSpan, NamedSource};
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════
// Error Code Taxonomy (AERO_100-399)
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // AERO_100-199: configuration
    UnknownProperty  = 101,
    BadSetSyntax     = 102,
    NoHomeDir        = 103,
    ConfigIo         = 104,
    // AERO_200-299: CLI / IO
    InputNotFound    = 201,
    CliIo            = 202,
    // AERO_300-399: regex pattern syntax
    UnterminatedGroup    = 301,
    UnterminatedClass    = 302,
    UnmatchedParen       = 303,
    InvalidBackReference = 304,
    TrailingBackslash    = 305,
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 { self as u32 }

    pub fn prefix(self) -> String {
        format!("[AERO_{:03}]", self as u32)
    }

    pub fn summary(self) -> &'static str {
        match self {
            Self::UnknownProperty     => "Unknown configuration property",
            Self::BadSetSyntax        => "Malformed `conf set` argument",
            Self::NoHomeDir           => "No home directory to locate the config file",
            Self::ConfigIo            => "Config file I/O error",
            Self::InputNotFound       => "Input file not found",
            Self::CliIo               => "I/O error",
            Self::UnterminatedGroup   => "Unterminated group",
            Self::UnterminatedClass   => "Unterminated character class",
            Self::UnmatchedParen      => "Unmatched ')'",
            Self::InvalidBackReference => "Invalid backreference",
            Self::TrailingBackslash   => "Trailing backslash",
        }
    }

    pub fn hint(self) -> &'static str {
        match self {
            Self::UnknownProperty =>
                "Run `aero conf list` to see every known property.",
            Self::BadSetSyntax =>
                "Expected `property=value`, e.g. `aero conf set regex_jit=off`.",
            Self::NoHomeDir =>
                "Set $HOME, or pass an explicit config path.",
            Self::ConfigIo =>
                "Check permissions on ~/.aero/.",
            Self::InputNotFound =>
                "Check the path and try again.",
            Self::CliIo =>
                "Check the path and permissions.",
            Self::UnterminatedGroup =>
                "Every '(' needs a matching ')'.",
            Self::UnterminatedClass =>
                "Every '[' needs a matching ']'.",
            Self::UnmatchedParen =>
                "Remove the extra ')', or open a group before it.",
            Self::InvalidBackReference =>
                "Backreferences must refer to a group already opened earlier in the pattern.",
            Self::TrailingBackslash =>
                "A pattern cannot end on an unescaped '\\'.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.prefix(), self.summary())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Levenshtein distance — for AERO_101 "did you mean X?" suggestions
// ═══════════════════════════════════════════════════════════════════════════

/// Compute the Levenshtein edit distance between two strings.
/// Uses the classic DP approach with O(min(a,b)) space.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (m, n) = (a.len(), b.len());
    if m == 0 { return n; }
    if n == 0 { return m; }

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (curr[j - 1] + 1)
                .min(prev[j] + 1)
                .min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[n]
}

/// Find the closest match to `name` in `candidates`.
/// Returns `Some(candidate)` if the best distance ≤ `threshold`.
pub fn closest_match<'a>(name: &str, candidates: &[&'a str], threshold: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(name, c)))
        .filter(|(_, d)| *d <= threshold)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

// ═══════════════════════════════════════════════════════════════════════════
// Source location helpers
// ═══════════════════════════════════════════════════════════════════════════

/// Convert a byte offset into (1-based line, 1-based column).
pub fn byte_to_line_col(source: &str, byte_offset: usize) -> (usize, usize) {
    let safe_offset = byte_offset.min(source.len());
    let prefix = &source[..safe_offset];
    let line = prefix.chars().filter(|&c| c == '\n').count() + 1;
    let col = match prefix.rfind('\n') {
        Some(nl) => byte_offset - nl,
        None     => byte_offset + 1,
    };
    (line, col)
}

/// Extract the text of line `line_number` (1-based) from source.
pub fn get_line(source: &str, line_number: usize) -> Option<&str> {
    source.lines().nth(line_number.saturating_sub(1))
}

// ═══════════════════════════════════════════════════════════════════════════
// AeroDiagnostic — miette-backed error type
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error, Diagnostic)]
#[error("{} {message}", self.code.prefix())]
#[diagnostic(help("{hint}"))]
pub struct AeroDiagnostic {
    pub message: String,
    pub code:    ErrorCode,
    pub hint:    String,
    /// Suggestion from Levenshtein (AERO_101 only)
    pub suggestion: Option<String>,
    #[source_code]
    pub src:  NamedSource,
    #[label("here")]
    pub span: SourceSpan,
}

impl AeroDiagnostic {
    pub fn new(
        code:        ErrorCode,
        message:     impl Into<String>,
        source_name: impl Into<String>,
        source_text: impl Into<String>,
        byte_start:  usize,
        byte_len:    usize,
    ) -> Self {
        AeroDiagnostic {
            hint:       code.hint().into(),
            message:    message.into(),
            suggestion: None,
            code,
            src:        NamedSource::new(source_name.into(), source_text.into()),
            span:       (byte_start, byte_len.max(1)).into(),
        }
    }

    pub fn no_source(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message, "<unknown>", " ", 0, 0)
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        let s = suggestion.into();
        self.hint = format!("{}  →  Did you mean '{}'?", self.hint, s);
        self.suggestion = Some(s);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// render_rustc_style — manual rustc-style source context (fallback / supplement)
// ═══════════════════════════════════════════════════════════════════════════
//
// Produces output like:
//
//   error[AERO_304]: group \2 was never opened
//    --> pattern:1:5
//    |
//   1 | (a)\2
//    |     ^ help: backreferences must refer to a group already opened earlier
//

pub fn render_rustc_style(
    code:        ErrorCode,
    message:     &str,
    source_name: &str,
    source_text: &str,
    byte_start:  usize,
    byte_len:    usize,
    hint:        &str,
) -> String {
    use std::fmt::Write as FmtWrite;
    let mut out = String::new();

    let (line, col) = byte_to_line_col(source_text, byte_start);
    let span_len = byte_len.max(1);

    let _ = writeln!(out, "\x1b[1;31merror\x1b[0m\x1b[1m[{}]\x1b[0m: {}", code.prefix(), message);
    let _ = writeln!(out, " \x1b[1;34m-->\x1b[0m {}:{}:{}", source_name, line, col);
    let _ = writeln!(out, "  \x1b[1;34m|\x1b[0m");

    if let Some(err_line_text) = get_line(source_text, line) {
        let _ = writeln!(out, "\x1b[1;34m{:>3} |\x1b[0m {}", line, err_line_text);
        let prefix_spaces = " ".repeat(col.saturating_sub(1) + 4 + 2);
        let carets = "^".repeat(span_len);
        let _ = writeln!(out, "  \x1b[1;34m|\x1b[0m {}\x1b[1;31m{}\x1b[0m", prefix_spaces, carets);
    }

    let _ = writeln!(out, "  \x1b[1;34m|\x1b[0m");
    let _ = writeln!(out, "  \x1b[1;34m=\x1b[0m \x1b[1mhelp\x1b[0m: {}", hint);
    let _ = writeln!(out);

    out
}

// ═══════════════════════════════════════════════════════════════════════════
// DiagnosticEngine — single reporting interface
// ═══════════════════════════════════════════════════════════════════════════

pub struct DiagnosticEngine {
    source_name: String,
    source_text: String,
}

impl DiagnosticEngine {
    pub fn new(source_name: impl Into<String>, source_text: impl Into<String>) -> Self {
        DiagnosticEngine {
            source_name: source_name.into(),
            source_text: source_text.into(),
        }
    }

    pub fn source_name(&self) -> &str { &self.source_name }
    pub fn source_text(&self) -> &str { &self.source_text }

    /// Convert a regex `CompileError` into a fully-spanned AeroDiagnostic.
    /// The pattern text passed to `new` is what gets rendered as source.
    pub fn from_compile_error(&self, err: &crate::regex::compile::CompileError) -> AeroDiagnostic {
        use crate::regex::compile::CompileError;

        let (code, message, at) = match *err {
            CompileError::UnterminatedGroup(at) =>
                (ErrorCode::UnterminatedGroup, "group opened here is never closed".to_string(), at),
            CompileError::UnterminatedClass(at) =>
                (ErrorCode::UnterminatedClass, "character class opened here is never closed".to_string(), at),
            CompileError::UnmatchedParen(at) =>
                (ErrorCode::UnmatchedParen, "no matching '(' for this ')'".to_string(), at),
            CompileError::InvalidBackReference(n) =>
                (ErrorCode::InvalidBackReference, format!("group \\{n} was never opened"), self.source_text.len()),
            CompileError::TrailingBackslash =>
                (ErrorCode::TrailingBackslash, "pattern ends on a bare '\\'".to_string(), self.source_text.len().saturating_sub(1)),
        };

        AeroDiagnostic::new(code, message, &self.source_name, &self.source_text, at, 1)
    }

    /// Build an "unknown property, did you mean X?" diagnostic (AERO_101).
    pub fn unknown_property(&self, name: &str, known: &[&str]) -> AeroDiagnostic {
        let suggestion = closest_match(name, known, 2);
        let message = match suggestion {
            Some(s) => format!("'{name}' is not a known property — did you mean '{s}'?"),
            None    => format!("'{name}' is not a known property"),
        };

        let diag = AeroDiagnostic::no_source(ErrorCode::UnknownProperty, message);
        match suggestion {
            Some(s) => diag.with_suggestion(s),
            None    => diag,
        }
    }

    /// Emit to stderr using miette's fancy graphical renderer
    pub fn emit(&self, diag: &AeroDiagnostic) {
        use miette::GraphicalReportHandler;
        let mut out = String::new();
        let _ = GraphicalReportHandler::new().render_report(&mut out, diag);
        eprintln!("{}", out);
    }

    /// Emit a rustc-style diagnostic with source context + carets
    pub fn emit_rustc(
        &self,
        code:       ErrorCode,
        message:    &str,
        byte_start: usize,
        byte_len:   usize,
    ) {
        let hint = code.hint();
        let rendered = render_rustc_style(
            code, message,
            &self.source_name, &self.source_text,
            byte_start, byte_len, hint,
        );
        eprint!("{}", rendered);
    }

    /// Format a diagnostic to a String (useful in tests / snapshots)
    pub fn format_diagnostic(&self, diag: &AeroDiagnostic) -> String {
        use miette::GraphicalReportHandler;
        let mut out = String::new();
        let _ = GraphicalReportHandler::new().render_report(&mut out, diag);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_exact() {
        assert_eq!(levenshtein("hello", "hello"), 0);
    }

    #[test]
    fn test_levenshtein_one_edit() {
        assert_eq!(levenshtein("mesage", "message"), 1);
        assert_eq!(levenshtein("pint", "print"), 1);
    }

    #[test]
    fn test_closest_match_suggestion() {
        let candidates = ["max_transition", "regex_jit", "quick_check"];
        let result = closest_match("max_transiton", &candidates, 2);
        assert_eq!(result, Some("max_transition"));
    }

    #[test]
    fn test_closest_match_no_suggestion() {
        let candidates = ["max_transition", "regex_jit"];
        let result = closest_match("xyz", &candidates, 2);
        assert_eq!(result, None);
    }

    #[test]
    fn test_byte_to_line_col() {
        let src = "debug=off\nmax_transition=32\nregex_jit=on";
        let (line, col) = byte_to_line_col(src, 20);
        assert_eq!(line, 2);
        assert_eq!(col, 1);
    }

    #[test]
    fn test_error_code_prefix() {
        assert_eq!(ErrorCode::UnknownProperty.prefix(), "[AERO_101]");
        assert_eq!(ErrorCode::TrailingBackslash.prefix(), "[AERO_305]");
    }

    #[test]
    fn test_diagnostic_no_source() {
        let d = AeroDiagnostic::no_source(ErrorCode::NoHomeDir, "no $HOME set");
        assert!(d.message.contains("no $HOME set"));
        assert!(d.code == ErrorCode::NoHomeDir);
    }

    #[test]
    fn test_unknown_property_suggestion() {
        let engine = DiagnosticEngine::new("conf", "");
        let diag = engine.unknown_property("max_transiton", &["max_transition", "regex_jit"]);
        assert!(diag.message.contains("did you mean 'max_transition'"));
        assert_eq!(diag.code, ErrorCode::UnknownProperty);
    }

    #[test]
    fn test_from_compile_error_unterminated_group() {
        let engine = DiagnosticEngine::new("pattern", "(a(b)");
        let err = crate::regex::compile::CompileError::UnterminatedGroup(0);
        let diag = engine.from_compile_error(&err);
        assert_eq!(diag.code, ErrorCode::UnterminatedGroup);
    }

    #[test]
    fn test_rustc_render_no_panic() {
        let src = "max_transitoin=32\n";
        let rendered = render_rustc_style(
            ErrorCode::UnknownProperty,
            "unknown configuration property",
            "conf.txt", src,
            0, 14,
            ErrorCode::UnknownProperty.hint(),
        );
        assert!(rendered.contains("AERO_101"));
        assert!(rendered.contains("conf.txt:1:"));
    }
}
