//! Reference token substitution
//!
//! A block's content may embed `[LABEL]` tokens naming another block's
//! `number`. Tokens whose block has completed are replaced with that
//! block's output; all other tokens stay in the text as written and are
//! reported back so the caller can record a warning.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::types::BlockStatus;

static TOKEN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[([^\[\]\s]+)\]").expect("reference token pattern is valid")
});

/// What the resolver knows about the block behind a label
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceState<'a> {
    /// The block completed with this output
    Available(&'a str),
    /// The block exists but has not completed
    Pending(BlockStatus),
}

/// Why a token was left in place
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// No block carries the label
    UnknownLabel,
    /// The labelled block has not completed in this run
    NotCompleted { status: BlockStatus },
}

impl std::fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownLabel => write!(f, "no block has this label"),
            Self::NotCompleted { status } => write!(f, "referenced block is {:?}", status),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedToken {
    /// Token as written, brackets included
    pub token: String,
    pub label: String,
    pub reason: UnresolvedReason,
}

impl UnresolvedToken {
    /// Warning text recorded on the block result
    pub fn warning(&self) -> String {
        format!("Unresolved reference {}: {}", self.token, self.reason)
    }
}

/// Content after substitution
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedContent {
    pub text: String,
    pub unresolved: Vec<UnresolvedToken>,
}

impl ResolvedContent {
    pub fn is_fully_resolved(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Labels referenced by `content`, in order of appearance, without duplicates
pub fn referenced_labels(content: &str) -> Vec<&str> {
    let mut labels: Vec<&str> = Vec::new();
    for caps in TOKEN_PATTERN.captures_iter(content) {
        if let Some(label) = caps.get(1) {
            if !labels.contains(&label.as_str()) {
                labels.push(label.as_str());
            }
        }
    }
    labels
}

/// Substitute every resolvable token in `content`.
///
/// `lookup` maps a label to the state of the block carrying it, or `None`
/// when no block has that label. Substituted output is not scanned again.
pub fn resolve_references<'a, F>(content: &str, mut lookup: F) -> ResolvedContent
where
    F: FnMut(&str) -> Option<ReferenceState<'a>>,
{
    let mut unresolved = Vec::new();
    let text = TOKEN_PATTERN.replace_all(content, |caps: &Captures<'_>| {
        let token = &caps[0];
        let label = &caps[1];
        let reason = match lookup(label) {
            Some(ReferenceState::Available(output)) => return output.to_string(),
            Some(ReferenceState::Pending(status)) => UnresolvedReason::NotCompleted { status },
            None => UnresolvedReason::UnknownLabel,
        };
        unresolved.push(UnresolvedToken {
            token: token.to_string(),
            label: label.to_string(),
            reason,
        });
        token.to_string()
    });

    ResolvedContent {
        text: text.into_owned(),
        unresolved,
    }
}
