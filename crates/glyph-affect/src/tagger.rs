//! Keyword/synonym-group tagger
//!
//! Each tag owns a group of synonym phrases. A single-word synonym matches
//! any token it prefixes ("overwhelm" hits "overwhelmed"). A multi-word
//! synonym matches verbatim, or fuzzily when its words appear in order with
//! at most `window` tokens between consecutive words ("hold this for me"
//! still hits "hold me" at window 3).

use crate::lexicon::{tokenize, Lexicon};
use glyph_core::{Error, Result, Tag};
use regex::Regex;

struct TagGroup {
    tag: Tag,
    patterns: Vec<Regex>,
    phrases: Vec<Vec<String>>,
}

pub struct Tagger {
    groups: Vec<TagGroup>,
    window: usize,
}

impl Tagger {
    pub fn new(lexicon: &Lexicon, window: usize) -> Result<Self> {
        let mut groups = Vec::with_capacity(lexicon.tags().len());
        for (tag, synonyms) in lexicon.tags() {
            let mut patterns = Vec::new();
            let mut phrases = Vec::new();
            for synonym in synonyms {
                let words = tokenize(synonym);
                if words.is_empty() {
                    continue;
                }
                let escaped: Vec<String> = words.iter().map(|w| regex::escape(w)).collect();
                let pattern = if words.len() == 1 {
                    format!(r"(?:^| ){}\S*", escaped[0])
                } else {
                    format!(r"(?:^| ){}(?:$| )", escaped.join(" "))
                };
                let re = Regex::new(&pattern).map_err(|e| {
                    Error::invalid_input(format!("bad synonym '{}' for tag {}: {}", synonym, tag, e))
                })?;
                patterns.push(re);
                if words.len() > 1 {
                    phrases.push(words);
                }
            }
            groups.push(TagGroup {
                tag: Tag::new(tag.as_str()),
                patterns,
                phrases,
            });
        }
        Ok(Self { groups, window: window.max(1) })
    }

    /// Tags present in the token stream, in lexicon (alphabetical) order.
    pub fn tag(&self, tokens: &[String]) -> Vec<Tag> {
        if tokens.is_empty() {
            return Vec::new();
        }
        let normalized = tokens.join(" ");
        self.groups
            .iter()
            .filter(|g| {
                g.patterns.iter().any(|re| re.is_match(&normalized))
                    || g.phrases.iter().any(|p| window_match(tokens, p, self.window))
            })
            .map(|g| g.tag.clone())
            .collect()
    }

    pub fn tag_count(&self) -> usize {
        self.groups.len()
    }
}

/// In-order match where each phrase word follows the previous within `window` tokens.
fn window_match(tokens: &[String], phrase: &[String], window: usize) -> bool {
    let Some(first) = phrase.first() else {
        return false;
    };
    'start: for (start, token) in tokens.iter().enumerate() {
        if token != first {
            continue;
        }
        let mut pos = start;
        for word in &phrase[1..] {
            let end = (pos + window + 1).min(tokens.len());
            match tokens[pos + 1..end].iter().position(|t| t == word) {
                Some(offset) => pos = pos + 1 + offset,
                None => continue 'start,
            }
        }
        return true;
    }
    false
}
