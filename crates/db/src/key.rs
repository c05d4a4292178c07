use core::fmt;

// KEY PATHS
// ================================================================================================

/// One step taken from the anchored parameter: a member reached through a
/// pointer (`->name`) or directly (`.name`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeySeg {
    Arrow(String),
    Dot(String),
}

/// A parsed summary-row key: `$` is the parameter (or return value) itself,
/// each leading `*` dereferences it, and segments chain member accesses, as
/// in `$->a.b->c`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPath {
    pub derefs: u32,
    pub segments: Vec<KeySeg>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyPathError {
    #[error("key '{0}' has no '$' anchor")]
    MissingAnchor(String),
    #[error("key '{0}' has an empty member name")]
    EmptyMember(String),
    #[error("trailing garbage in key '{0}'")]
    Trailing(String),
}

impl KeyPath {
    /// The whole parameter, `$`.
    pub fn whole() -> Self {
        KeyPath { derefs: 0, segments: Vec::new() }
    }

    pub fn is_whole(&self) -> bool {
        self.derefs == 0 && self.segments.is_empty()
    }

    pub fn parse(key: &str) -> Result<KeyPath, KeyPathError> {
        let mut rest = key;
        let mut derefs = 0;
        while let Some(r) = rest.strip_prefix('*') {
            derefs += 1;
            rest = r;
        }
        rest = rest
            .strip_prefix('$')
            .ok_or_else(|| KeyPathError::MissingAnchor(key.to_string()))?;

        let mut segments = Vec::new();
        while !rest.is_empty() {
            let (arrow, tail) = if let Some(t) = rest.strip_prefix("->") {
                (true, t)
            } else if let Some(t) = rest.strip_prefix('.') {
                (false, t)
            } else {
                return Err(KeyPathError::Trailing(key.to_string()));
            };
            let end = tail
                .find(|c: char| c == '.' || c == '-')
                .unwrap_or(tail.len());
            let name = &tail[..end];
            if name.is_empty() {
                return Err(KeyPathError::EmptyMember(key.to_string()));
            }
            segments.push(if arrow {
                KeySeg::Arrow(name.to_string())
            } else {
                KeySeg::Dot(name.to_string())
            });
            rest = &tail[end..];
        }
        Ok(KeyPath { derefs, segments })
    }

    /// Substitutes a variable name for the `$` anchor, producing the name the
    /// state tracker uses, e.g. `$->buf` applied to `skb` gives `skb->buf`.
    pub fn apply(&self, base: &str) -> String {
        let mut out = String::new();
        for _ in 0..self.derefs {
            out.push('*');
        }
        out.push_str(base);
        for seg in &self.segments {
            match seg {
                KeySeg::Arrow(name) => {
                    out.push_str("->");
                    out.push_str(name);
                },
                KeySeg::Dot(name) => {
                    out.push('.');
                    out.push_str(name);
                },
            }
        }
        out
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.apply("$"))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parse_whole_and_deref() {
        assert!(KeyPath::parse("$").unwrap().is_whole());
        let p = KeyPath::parse("*$").unwrap();
        assert_eq!(p.derefs, 1);
        assert_eq!(p.apply("p"), "*p");
    }

    #[test]
    fn parse_chained_members() {
        let p = KeyPath::parse("$->a.b->c").unwrap();
        assert_eq!(p.segments.len(), 3);
        assert_eq!(p.apply("dev"), "dev->a.b->c");
        assert_eq!(p.to_string(), "$->a.b->c");
    }

    #[test]
    fn reject_malformed() {
        assert!(KeyPath::parse("x").is_err());
        assert!(KeyPath::parse("$->").is_err());
        assert!(KeyPath::parse("$x").is_err());
    }
}
