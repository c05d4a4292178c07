use core::fmt;

// DIAGNOSTICS
// ================================================================================================

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Severity {
    Error,
    Warn,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Error => "error",
            Severity::Warn => "warn",
            Severity::Info => "info",
        })
    }
}

/// One analyzer finding. Renders as the classic single-line form so output
/// can be diffed across runs:
///
/// ```text
/// <file>:<line> <function>() <severity>: <message>
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub file: String,
    pub line: u32,
    pub function: String,
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} {}() {}: {}",
            self.file, self.line, self.function, self.severity, self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_format() {
        let d = Diagnostic {
            file: "drivers/foo.c".into(),
            line: 42,
            function: "frob".into(),
            severity: Severity::Error,
            message: "potential NULL dereference 'p'".into(),
        };
        assert_eq!(d.to_string(), "drivers/foo.c:42 frob() error: potential NULL dereference 'p'");
    }
}
