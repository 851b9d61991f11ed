//! Set-algebra queries over tag membership.
//!
//! A query is a flat token sequence folded left to right: `and` (default),
//! `or` and `minus` combine the accumulated file set with the next term.
//! There is no precedence and no bracketing; `a or b and c` means
//! `(a ∪ b) ∩ c`.

use std::collections::BTreeSet;
use crate::engine::fuzzy;
use crate::error::Result;
use crate::storage::Repository;

pub const DEFAULT_TOP_K: usize = 10;
const TOP_K_PREFIX: &str = "top_k=";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    And,
    Or,
    Minus,
}

impl Op {
    pub fn parse(word: &str) -> Option<Self> {
        match word.to_lowercase().as_str() {
            "and" => Some(Op::And),
            "or" => Some(Op::Or),
            "minus" => Some(Op::Minus),
            _ => None,
        }
    }

    fn apply(self, acc: BTreeSet<String>, rhs: BTreeSet<String>) -> BTreeSet<String> {
        match self {
            Op::And => acc.intersection(&rhs).cloned().collect(),
            Op::Or => acc.union(&rhs).cloned().collect(),
            Op::Minus => acc.difference(&rhs).cloned().collect(),
        }
    }
}

/// `tag` or `tag=value`; the value may contain `*` wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub tag: String,
    pub value: Option<String>,
}

impl Term {
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('=') {
            Some((tag, value)) => Term { tag: tag.to_string(), value: Some(value.to_string()) },
            None => Term { tag: raw.to_string(), value: None },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Term(Term),
    Op(Op),
}

/// Classifies raw words into operators and terms. Never fails: anything that is
/// not an operator is a term.
pub fn parse_tokens<S: AsRef<str>>(words: &[S]) -> Vec<Token> {
    words.iter()
        .map(|w| {
            let w = w.as_ref();
            Op::parse(w).map(Token::Op).unwrap_or_else(|| Token::Term(Term::parse(w)))
        })
        .collect()
}

/// A directory name read as a query: `Work and "Q3 report" top_k=5`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFolder {
    /// Unquoted words with modifier tokens removed.
    pub words: Vec<String>,
    pub top_k: usize,
}

impl QueryFolder {
    pub fn parse(name: &str) -> Self {
        let mut words = Vec::new();
        let mut top_k = DEFAULT_TOP_K;
        for word in split_quoted(name) {
            if let Some(k) = word.strip_prefix(TOP_K_PREFIX).and_then(|v| v.parse::<usize>().ok()) {
                top_k = k;
                continue;
            }
            words.push(word);
        }
        Self { words, top_k }
    }

    pub fn tokens(&self) -> Vec<Token> {
        parse_tokens(&self.words)
    }

    /// Free text for the semantic search folders.
    pub fn text(&self) -> String {
        self.words.join(" ")
    }
}

/// Whitespace splitter that keeps `"..."` and `'...'` together and drops the quotes.
pub fn split_quoted(input: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let mut word = String::new();
        if c == '"' || c == '\'' {
            chars.next();
            for ch in chars.by_ref() {
                if ch == c { break; }
                word.push(ch);
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if ch.is_whitespace() { break; }
                if ch != '"' && ch != '\'' {
                    word.push(ch);
                }
                chars.next();
            }
        }
        if !word.is_empty() {
            out.push(word);
        }
    }
    out
}

#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
    /// Return absolute paths instead of file names.
    pub show_path: bool,
    /// Resolve each tag token to the closest known tag.
    pub fuzzy: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self { show_path: false, fuzzy: true }
    }
}

/// Read-only evaluator bound to one repository snapshot.
pub struct QueryEvaluator<'r, 'c> {
    repo: &'r Repository<'c>,
    tag_names: Vec<String>,
}

impl<'r, 'c> QueryEvaluator<'r, 'c> {
    pub fn new(repo: &'r Repository<'c>) -> Result<Self> {
        let tag_names = repo.all_tag_names()?;
        Ok(Self { repo, tag_names })
    }

    /// The tag a user token refers to. `None` means nothing can match.
    pub fn resolve(&self, tag: &str, fuzzy: bool) -> Option<String> {
        if fuzzy {
            return fuzzy::best_match(tag, &self.tag_names).map(String::from);
        }
        let lower = tag.to_lowercase();
        self.tag_names.iter().find(|n| n.to_lowercase() == lower).cloned()
    }

    /// Files carrying the tag `term` resolves to (and matching its value pattern).
    pub fn files_for(&self, term: &Term, opts: QueryOptions) -> Result<BTreeSet<String>> {
        let Some(tag) = self.resolve(&term.tag, opts.fuzzy) else {
            return Ok(BTreeSet::new());
        };
        if opts.fuzzy && !tag.eq_ignore_ascii_case(&term.tag) {
            tracing::debug!("[Query] '{}' resolved to tag '{}'", term.tag, tag);
        }
        Ok(self.repo
            .files_by_tag(&tag, term.value.as_deref(), opts.show_path)?
            .into_iter()
            .collect())
    }

    pub fn evaluate(&self, tokens: &[Token], opts: QueryOptions) -> Result<BTreeSet<String>> {
        let mut acc: Option<BTreeSet<String>> = None;
        let mut pending = Op::And;
        for token in tokens {
            match token {
                Token::Op(op) => pending = *op,
                Token::Term(term) => {
                    let files = self.files_for(term, opts)?;
                    acc = Some(match acc {
                        None => files,
                        Some(prev) => pending.apply(prev, files),
                    });
                    pending = Op::And;
                }
            }
        }
        Ok(acc.unwrap_or_default())
    }
}

/// Parses and evaluates `words` in one go.
pub fn query<S: AsRef<str>>(repo: &Repository<'_>, words: &[S], opts: QueryOptions) -> Result<BTreeSet<String>> {
    QueryEvaluator::new(repo)?.evaluate(&parse_tokens(words), opts)
}
