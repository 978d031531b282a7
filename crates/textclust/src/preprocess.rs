use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::distance::Tokenization;

/// Text normalization collaborator used before comparing messages.
pub trait TextPreprocessor: Send + Sync {
    /// Replace volatile values (numbers, addresses, ids) with placeholders.
    fn normalize(&self, text: &str) -> String;

    /// Whether `token` is decisive for similarity regardless of edit distance.
    fn is_magic_word(&self, token: &str) -> bool;

    fn tokenization(&self) -> Tokenization {
        Tokenization::Words
    }
}

/// Placeholder patterns, each anchored to a whole token.
struct TokenPatterns {
    email: Regex,
    ipv4: Regex,
    ipv6: Regex,
    hex: Regex,
    number: Regex,
}

fn patterns() -> &'static TokenPatterns {
    static PATTERNS: OnceLock<TokenPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| TokenPatterns {
        email: Regex::new(r"^[\w.+-]+@[\w-]+(\.[\w-]+)+$").expect("email pattern"),
        ipv4: Regex::new(r"^\d{1,3}(\.\d{1,3}){3}(:\d{1,5})?$").expect("ipv4 pattern"),
        ipv6: Regex::new(r"^[0-9a-fA-F]{0,4}(:[0-9a-fA-F]{0,4}){2,7}$").expect("ipv6 pattern"),
        hex: Regex::new(r"^0[xX][0-9a-fA-F]+$").expect("hex pattern"),
        number: Regex::new(r"^[-+]?\d+([.,:]\d+)*$").expect("number pattern"),
    })
}

/// Characters stripped from token edges before matching placeholders.
const EDGE_PUNCTUATION: &[char] = &['(', ')', '[', ']', '{', '}', '<', '>', ',', ';', '"', '\'', '.'];

/// Split a token into (leading punctuation, core, trailing punctuation).
fn split_edges(token: &str) -> (&str, &str, &str) {
    let start = token.len() - token.trim_start_matches(EDGE_PUNCTUATION).len();
    let rest = &token[start..];
    let core = rest.trim_end_matches(EDGE_PUNCTUATION);
    (&token[..start], core, &rest[core.len()..])
}

fn placeholder(core: &str) -> Option<&'static str> {
    let p = patterns();
    // IPv4 first: dotted quads would otherwise read as numbers.
    if p.ipv4.is_match(core) {
        Some("<IP>")
    } else if p.number.is_match(core) {
        Some("<NUM>")
    } else if p.hex.is_match(core) {
        Some("<HEX>")
    } else if p.email.is_match(core) {
        Some("<EMAIL>")
    } else if core.contains(':') && p.ipv6.is_match(core) {
        Some("<IP>")
    } else {
        None
    }
}

/// Regex-based normalizer with a configurable magic-word list.
///
/// Normalization is token-wise: only whole tokens are replaced, so
/// `sda1` stays as is while `42` becomes `<NUM>`. Whitespace is collapsed to
/// single spaces.
#[derive(Debug, Clone)]
pub struct DefaultPreprocessor {
    magic_words: HashSet<String>,
    tokenization: Tokenization,
}

impl DefaultPreprocessor {
    pub fn new<I, S>(magic_words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            magic_words: magic_words
                .into_iter()
                .map(|w| w.as_ref().to_lowercase())
                .collect(),
            tokenization: Tokenization::Words,
        }
    }

    pub fn from_config(config: &loglens_core::ClusteringConfig) -> Self {
        Self::new(&config.magic_words)
    }

    /// Same magic words, but texts are compared as one opaque token.
    pub fn whole_string(mut self) -> Self {
        self.tokenization = Tokenization::Whole;
        self
    }
}

impl Default for DefaultPreprocessor {
    fn default() -> Self {
        Self::new(loglens_core::config::DEFAULT_MAGIC_WORDS)
    }
}

impl TextPreprocessor for DefaultPreprocessor {
    fn normalize(&self, text: &str) -> String {
        if self.tokenization == Tokenization::Whole {
            return text.trim().to_string();
        }

        let mut out = String::with_capacity(text.len());
        for token in text.split_whitespace() {
            if !out.is_empty() {
                out.push(' ');
            }
            let (lead, core, trail) = split_edges(token);
            match placeholder(core) {
                Some(ph) => {
                    out.push_str(lead);
                    out.push_str(ph);
                    out.push_str(trail);
                }
                None => out.push_str(token),
            }
        }
        out
    }

    fn is_magic_word(&self, token: &str) -> bool {
        if self.magic_words.is_empty() {
            return false;
        }
        let (_, core, _) = split_edges(token);
        self.magic_words.contains(&core.to_lowercase())
    }

    fn tokenization(&self) -> Tokenization {
        self.tokenization
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_whole_token_values() {
        let p = DefaultPreprocessor::default();
        assert_eq!(
            p.normalize("session 4711 opened for 10.0.0.12:22 by bob@example.com"),
            "session <NUM> opened for <IP> by <EMAIL>"
        );
        assert_eq!(p.normalize("addr 0xdeadbeef (pid 88)"), "addr <HEX> (pid <NUM>)");
    }

    #[test]
    fn keeps_embedded_digits() {
        let p = DefaultPreprocessor::default();
        assert_eq!(p.normalize("disk failure on sda1"), "disk failure on sda1");
        assert_eq!(p.normalize("  took   3.5 s "), "took <NUM> s");
    }

    #[test]
    fn ipv6_and_times() {
        let p = DefaultPreprocessor::default();
        assert_eq!(p.normalize("from fe80::1ff:fe23:4567:890a"), "from <IP>");
        assert_eq!(p.normalize("at 12:30:01"), "at <NUM>");
    }

    #[test]
    fn magic_words_ignore_case_and_punctuation() {
        let p = DefaultPreprocessor::new(["start", "stop"]);
        assert!(p.is_magic_word("START"));
        assert!(p.is_magic_word("stop,"));
        assert!(!p.is_magic_word("stopping"));
    }

    #[test]
    fn whole_string_mode_does_not_rewrite() {
        let p = DefaultPreprocessor::default().whole_string();
        assert_eq!(p.tokenization(), Tokenization::Whole);
        assert_eq!(p.normalize(" /var/log/app 1 "), "/var/log/app 1");
    }
}
