use serde::{Deserialize, Serialize};

/// How a normalized text is split into comparison tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Tokenization {
    /// Whitespace-separated words.
    #[default]
    Words,
    /// The whole string is one token (path-like component names).
    Whole,
}

/// Split `text` into tokens according to `mode`.
pub fn tokenize(text: &str, mode: Tokenization) -> Vec<&str> {
    match mode {
        Tokenization::Words => text.split_whitespace().collect(),
        Tokenization::Whole => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                Vec::new()
            } else {
                vec![trimmed]
            }
        }
    }
}

/// Word-level Levenshtein distance with an early cutoff.
///
/// Unit cost per insertion, deletion and substitution. Returns the exact
/// distance when it is `<= threshold`; otherwise returns `threshold + 1` as
/// soon as the distance provably exceeds the threshold, without finishing the
/// dynamic program. Callers must only compare the result against `threshold`.
pub fn word_distance<T: PartialEq>(a: &[T], b: &[T], threshold: usize) -> usize {
    let exceeded = threshold.saturating_add(1);

    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };

    // Every alignment needs at least |len_a - len_b| insertions.
    if long.len() - short.len() > threshold {
        return exceeded;
    }
    if short.is_empty() {
        return long.len();
    }

    let mut prev: Vec<usize> = (0..=short.len()).collect();
    let mut curr = vec![0usize; short.len() + 1];

    for (i, long_tok) in long.iter().enumerate() {
        curr[0] = i + 1;
        let mut row_min = curr[0];

        for (j, short_tok) in short.iter().enumerate() {
            let substitution = prev[j] + usize::from(long_tok != short_tok);
            let deletion = prev[j + 1] + 1;
            let insertion = curr[j] + 1;
            let cell = substitution.min(deletion).min(insertion);
            curr[j + 1] = cell;
            row_min = row_min.min(cell);
        }

        // Costs never decrease along a path, so the row minimum bounds the result.
        if row_min > threshold {
            return exceeded;
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    let distance = prev[short.len()];
    if distance > threshold {
        exceeded
    } else {
        distance
    }
}
