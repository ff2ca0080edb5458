//! Conventional-commit classification.
//!
//! Parses a single commit subject of the form `type(scope)!: description`
//! into a [`ParsedCommit`]. The parser is a small hand-written tokenizer;
//! anything that does not match the grammar exactly is
//! [`ParsedCommit::Unparseable`], never guessed at.

use serde::Serialize;

use crate::version::BumpLevel;

/// A commit subject after classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ParsedCommit {
    /// Subject matched the conventional-commit grammar.
    Conventional(ConventionalCommit),
    /// Subject did not match; kept for display only.
    Unparseable {
        /// Commit hash.
        hash: String,
        /// The raw subject line.
        subject: String,
    },
}

/// A commit whose subject follows the conventional-commit grammar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConventionalCommit {
    /// Commit hash.
    pub hash: String,
    /// The type as written (`Feat`, `fix`, ...).
    pub type_name: String,
    /// Optional scope token.
    pub scope: Option<String>,
    /// Whether the subject carried the `!` breaking marker.
    pub breaking: bool,
    /// Everything after `: `.
    pub description: String,
    /// The raw subject line, including any leading emoji.
    pub subject: String,
}

impl ConventionalCommit {
    /// The type lowercased, as used for classification.
    pub fn commit_type(&self) -> String {
        self.type_name.to_ascii_lowercase()
    }

    /// Effective bump: the type table, overridden to major when breaking.
    pub fn bump(&self) -> BumpLevel {
        if self.breaking {
            return BumpLevel::Major;
        }
        bump_for_type(&self.commit_type())
    }
}

impl ParsedCommit {
    /// Commit hash of either variant.
    pub fn hash(&self) -> &str {
        match self {
            Self::Conventional(c) => &c.hash,
            Self::Unparseable { hash, .. } => hash,
        }
    }

    /// Raw subject line of either variant.
    pub fn subject(&self) -> &str {
        match self {
            Self::Conventional(c) => &c.subject,
            Self::Unparseable { subject, .. } => subject,
        }
    }

    /// Scope token, if the commit parsed and carries one.
    pub fn scope(&self) -> Option<&str> {
        match self {
            Self::Conventional(c) => c.scope.as_deref(),
            Self::Unparseable { .. } => None,
        }
    }

    /// Effective bump; unparseable commits never bump.
    pub fn bump(&self) -> BumpLevel {
        match self {
            Self::Conventional(c) => c.bump(),
            Self::Unparseable { .. } => BumpLevel::None,
        }
    }

    /// Text suitable for a changelog bullet.
    pub fn summary(&self) -> &str {
        match self {
            Self::Conventional(c) => &c.description,
            Self::Unparseable { subject, .. } => subject,
        }
    }
}

/// Fixed bump table for a lowercased commit type.
pub fn bump_for_type(commit_type: &str) -> BumpLevel {
    match commit_type {
        "feat" => BumpLevel::Minor,
        "fix" | "perf" | "refactor" => BumpLevel::Patch,
        _ => BumpLevel::None,
    }
}

/// Classify one commit subject.
pub fn classify(hash: &str, subject: &str) -> ParsedCommit {
    match parse_header(subject) {
        Some(header) => ParsedCommit::Conventional(ConventionalCommit {
            hash: hash.to_string(),
            type_name: header.type_name.to_string(),
            scope: header.scope.map(str::to_string),
            breaking: header.breaking,
            description: header.description.to_string(),
            subject: subject.to_string(),
        }),
        None => ParsedCommit::Unparseable {
            hash: hash.to_string(),
            subject: subject.to_string(),
        },
    }
}

struct Header<'a> {
    type_name: &'a str,
    scope: Option<&'a str>,
    breaking: bool,
    description: &'a str,
}

fn parse_header(subject: &str) -> Option<Header<'_>> {
    let rest = skip_markers(subject.lines().next()?);

    let type_len = rest
        .char_indices()
        .take_while(|&(i, c)| {
            if i == 0 {
                c.is_ascii_alphabetic()
            } else {
                c.is_ascii_alphanumeric() || c == '-' || c == '_'
            }
        })
        .count();
    if type_len == 0 {
        return None;
    }
    let (type_name, mut rest) = rest.split_at(type_len);

    let mut scope = None;
    if let Some(after_paren) = rest.strip_prefix('(') {
        let close = after_paren.find(')')?;
        let token = &after_paren[..close];
        if token.is_empty() || token.contains('(') || token.chars().any(char::is_whitespace) {
            return None;
        }
        scope = Some(token);
        rest = &after_paren[close + 1..];
    }

    let breaking = match rest.strip_prefix('!') {
        Some(after) => {
            rest = after;
            true
        }
        None => false,
    };

    let rest = rest.strip_prefix(':')?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let description = rest.trim();
    if description.is_empty() {
        return None;
    }

    Some(Header {
        type_name,
        scope,
        breaking,
        description,
    })
}

/// Skip leading emoji and `:shortcode:` markers.
fn skip_markers(mut s: &str) -> &str {
    loop {
        s = s.trim_start();
        if let Some(after) = s.strip_prefix(':')
            && let Some(end) = after.find(':')
            && end > 0
            && after[..end]
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-'))
        {
            s = &after[end + 1..];
            continue;
        }
        match s.chars().next() {
            Some(c) if !c.is_alphanumeric() && !c.is_whitespace() => {
                s = &s[c.len_utf8()..];
            }
            _ => return s,
        }
    }
}
