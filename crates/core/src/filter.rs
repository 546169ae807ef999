//! Ignore filters for paths that must never be listed, shipped or deleted.
//!
//! Patterns are regular expressions matched against each individual path
//! component, so `^\.` hides `.env` as well as everything below `.git/`.

use crate::error::{Error, Result};
use regex::Regex;

/// A compiled set of ignore patterns.
#[derive(Clone, Debug)]
pub struct IgnoreFilter {
    patterns: Vec<Regex>,
}

impl IgnoreFilter {
    /// Compile a filter from regex patterns.
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let p = p.as_ref();
                Regex::new(p).map_err(|e| Error::InvalidPattern {
                    pattern: p.to_string(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// The default site filter: dotfiles and server-side scripts.
    pub fn site_defaults() -> Result<Self> {
        Self::new(crate::DEFAULT_IGNORE_PATTERNS)
    }

    /// A filter that ignores nothing.
    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// Check a single path component (file or directory name).
    pub fn is_ignored_name(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(name))
    }

    /// Check a relative path: ignored if any of its components is ignored.
    ///
    /// Both `/` and `\` are treated as separators.
    pub fn is_ignored_path(&self, path: &str) -> bool {
        path.split(['/', '\\'])
            .filter(|c| !c.is_empty())
            .any(|c| self.is_ignored_name(c))
    }
}
