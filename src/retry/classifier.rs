// ============================================================================
// Conflict Classification
// ============================================================================
//
// Decides whether a failed attempt hit a transient lock conflict that is worth
// retrying. Drivers that expose structured error information should be paired
// with `StructuredConflictClassifier` or `SqlStateClassifier`; the textual
// classifier only looks at the rendered message and can misfire on unrelated
// errors that happen to mention one of its phrases.
//
// ============================================================================

use lazy_static::lazy_static;
use regex::{RegexSet, RegexSetBuilder};
use std::collections::HashSet;
use std::fmt;

/// Phrases matched by [`TextualConflictClassifier::default`].
pub const DEFAULT_CONFLICT_PHRASES: [&str; 3] =
    ["deadlock", "lock wait timeout", "could not obtain lock"];

/// SQLSTATE codes matched by [`SqlStateClassifier::default`].
pub const DEFAULT_CONFLICT_SQLSTATES: [&str; 3] = ["40001", "40P01", "55P03"];

lazy_static! {
    static ref DEFAULT_PHRASE_SET: RegexSet = phrase_set(&DEFAULT_CONFLICT_PHRASES)
        .expect("default conflict phrases are valid literals");
}

fn phrase_set<S: AsRef<str>>(phrases: &[S]) -> Result<RegexSet, regex::Error> {
    RegexSetBuilder::new(phrases.iter().map(|p| regex::escape(p.as_ref())))
        .case_insensitive(true)
        .build()
}

/// Decides whether `err` is a transient conflict.
pub trait ConflictClassifier<E: ?Sized>: Send + Sync {
    fn is_retryable(&self, err: &E) -> bool;
}

impl<E, F> ConflictClassifier<E> for F
where
    E: ?Sized,
    F: Fn(&E) -> bool + Send + Sync,
{
    fn is_retryable(&self, err: &E) -> bool {
        self(err)
    }
}

// ----------------------------------------------------------------------------
// Structured
// ----------------------------------------------------------------------------

/// Implemented by driver errors that know whether they are a lock conflict.
pub trait TransientConflict {
    fn is_transient_conflict(&self) -> bool;
}

/// Implemented by driver errors that carry a SQLSTATE code.
pub trait SqlState {
    fn sql_state(&self) -> Option<&str>;
}

/// Trusts the error's own [`TransientConflict`] answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredConflictClassifier;

impl<E> ConflictClassifier<E> for StructuredConflictClassifier
where
    E: TransientConflict + ?Sized,
{
    fn is_retryable(&self, err: &E) -> bool {
        err.is_transient_conflict()
    }
}

/// Retries errors whose SQLSTATE is in a configured set.
#[derive(Debug, Clone)]
pub struct SqlStateClassifier {
    codes: HashSet<String>,
}

impl SqlStateClassifier {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            codes: codes
                .into_iter()
                .map(|code| code.into().to_ascii_uppercase())
                .collect(),
        }
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.codes.iter().map(String::as_str)
    }
}

impl Default for SqlStateClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_CONFLICT_SQLSTATES)
    }
}

impl<E> ConflictClassifier<E> for SqlStateClassifier
where
    E: SqlState + ?Sized,
{
    fn is_retryable(&self, err: &E) -> bool {
        err.sql_state()
            .is_some_and(|code| self.codes.contains(&code.to_ascii_uppercase()))
    }
}

// ----------------------------------------------------------------------------
// Textual
// ----------------------------------------------------------------------------

/// Case-insensitive substring match against the error's `Display` output.
#[derive(Clone)]
pub struct TextualConflictClassifier {
    phrases: RegexSet,
}

impl TextualConflictClassifier {
    /// Builds a classifier for custom phrases. Phrases are matched literally.
    pub fn new<S: AsRef<str>>(phrases: &[S]) -> Result<Self, regex::Error> {
        Ok(Self {
            phrases: phrase_set(phrases)?,
        })
    }

    pub fn matches(&self, message: &str) -> bool {
        self.phrases.is_match(message)
    }
}

impl Default for TextualConflictClassifier {
    fn default() -> Self {
        Self {
            phrases: DEFAULT_PHRASE_SET.clone(),
        }
    }
}

impl fmt::Debug for TextualConflictClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextualConflictClassifier")
            .field("phrases", &self.phrases.patterns())
            .finish()
    }
}

impl<E> ConflictClassifier<E> for TextualConflictClassifier
where
    E: fmt::Display + ?Sized,
{
    fn is_retryable(&self, err: &E) -> bool {
        self.matches(&err.to_string())
    }
}
