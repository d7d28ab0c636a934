use glob::{MatchOptions, Pattern};

use crate::error::{Error, Result};

#[derive(Clone, Debug)]
enum Spec {
    Literal(String),
    Glob { pattern: Pattern, prefix: String },
}

/// a set of path filters: glob patterns, or literal paths
///
/// a spec matches a path when it matches the path itself or any directory
/// above it. an empty set matches everything.
#[derive(Clone, Debug, Default)]
pub struct Pathspec {
    specs: Vec<Spec>,
    ignore_case: bool,
}

impl Pathspec {
    pub fn new<S: AsRef<str>>(specs: &[S], literal: bool, ignore_case: bool) -> Result<Self> {
        let mut parsed = Vec::with_capacity(specs.len());
        for spec in specs {
            let spec = spec.as_ref().trim_start_matches("./").trim_end_matches('/');
            if spec.is_empty() || spec == "." {
                // "." or "" selects the whole tree
                return Ok(Self {
                    specs: Vec::new(),
                    ignore_case,
                });
            }

            let has_wildcard = spec.contains(['*', '?', '[']);
            if literal || !has_wildcard {
                parsed.push(Spec::Literal(spec.to_string()));
                continue;
            }

            let pattern = Pattern::new(spec)
                .map_err(|e| Error::InvalidPathspec(format!("{}: {}", spec, e)))?;
            let prefix = spec
                .find(['*', '?', '['])
                .map(|i| spec[..i].to_string())
                .unwrap_or_default();
            parsed.push(Spec::Glob { pattern, prefix });
        }
        Ok(Self {
            specs: parsed,
            ignore_case,
        })
    }

    /// true when no filtering happens
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// does any spec select `path`
    pub fn matches(&self, path: &str) -> bool {
        self.specs.is_empty() || self.specs.iter().any(|s| self.spec_matches(s, path))
    }

    /// could any spec select something at or below directory `dir`
    pub fn may_match_within(&self, dir: &str) -> bool {
        if self.matches(dir) {
            return true;
        }
        let dir_slash = format!("{}/", dir);
        self.specs.iter().any(|spec| match spec {
            Spec::Literal(lit) => self.starts_with(lit, &dir_slash),
            Spec::Glob { prefix, .. } => {
                self.starts_with(prefix, &dir_slash) || self.starts_with(&dir_slash, prefix)
            }
        })
    }

    fn spec_matches(&self, spec: &Spec, path: &str) -> bool {
        match spec {
            Spec::Literal(lit) => {
                self.eq(path, lit) || self.starts_with(path, &format!("{}/", lit))
            }
            Spec::Glob { pattern, .. } => {
                let options = MatchOptions {
                    case_sensitive: !self.ignore_case,
                    require_literal_separator: false,
                    require_literal_leading_dot: false,
                };
                // the path itself, then each directory above it
                pattern.matches_with(path, options)
                    || path
                        .match_indices('/')
                        .any(|(i, _)| pattern.matches_with(&path[..i], options))
            }
        }
    }

    fn eq(&self, a: &str, b: &str) -> bool {
        if self.ignore_case {
            a.eq_ignore_ascii_case(b)
        } else {
            a == b
        }
    }

    fn starts_with(&self, s: &str, prefix: &str) -> bool {
        s.len() >= prefix.len()
            && s.is_char_boundary(prefix.len())
            && self.eq(&s[..prefix.len()], prefix)
    }
}
