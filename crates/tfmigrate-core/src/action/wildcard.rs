//! Wildcard expansion for `xmv`.
//!
//! A source pattern such as `module["*"].null_resource.*` is compiled into an
//! anchored regex where every `*` becomes a greedy capture group. Each
//! address in the current state that matches produces one move whose
//! destination has `$1`, `$2`, ... replaced by the captures, numbered from
//! left to right.

use regex::Regex;

use super::ActionError;

/// The wildcard marker in source patterns.
pub const WILDCARD: char = '*';

/// A concrete `(source, destination)` move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovePair {
    /// Source address.
    pub source: String,
    /// Destination address.
    pub destination: String,
}

impl MovePair {
    /// Create a move pair.
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

/// Expands a wildcard move against a list of addresses.
#[derive(Debug, Clone)]
pub struct WildcardExpander {
    source: String,
    destination: String,
    pattern: Option<Regex>,
}

impl WildcardExpander {
    /// Compile the source pattern.
    ///
    /// A source without `*` compiles to nothing and always expands to the
    /// literal pair.
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
    ) -> Result<Self, ActionError> {
        let source = source.into();
        let pattern = if source.contains(WILDCARD) {
            Some(compile(&source)?)
        } else {
            None
        };

        Ok(Self {
            source,
            destination: destination.into(),
            pattern,
        })
    }

    /// Source pattern.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Destination pattern.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Number of wildcards in the source.
    pub fn wildcards(&self) -> usize {
        self.source.matches(WILDCARD).count()
    }

    /// Compute the moves for `addresses`, keeping their order.
    ///
    /// Addresses that do not match are skipped. No matches is not an error.
    pub fn expand<S: AsRef<str>>(&self, addresses: &[S]) -> Vec<MovePair> {
        let Some(pattern) = &self.pattern else {
            return vec![MovePair::new(&self.source, &self.destination)];
        };

        addresses
            .iter()
            .filter_map(|address| {
                let address = address.as_ref();
                let caps = pattern.captures(address)?;
                let mut destination = String::new();
                caps.expand(&self.destination, &mut destination);
                Some(MovePair::new(address, destination))
            })
            .collect()
    }
}

fn compile(source: &str) -> Result<Regex, ActionError> {
    let body = source
        .split(WILDCARD)
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("(.*)");

    Regex::new(&format!("^{}$", body)).map_err(ActionError::Pattern)
}
