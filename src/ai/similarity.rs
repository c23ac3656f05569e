//! Lexical similarity between two chat lines.
//!
//! Bag-of-words cosine, squashed through a sigmoid so near-paraphrases land
//! close to 1.0 and loosely related lines fall off quickly. CJK runs have no
//! word boundaries, so they are split into character bigrams.

use std::collections::HashMap;

const STOP_WORDS: [&str; 22] = [
    "的", "了", "在", "是", "和", "与", "或", "这", "那", "我", "你", "他", "她", "它", "the", "is",
    "and", "to", "of", "it", "you", "an",
];

/// Sigmoid centre and slope.
const MIDPOINT: f64 = 0.6;
const STEEPNESS: f64 = 8.0;

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fa5}').contains(&c)
}

fn flush_cjk(run: &mut Vec<char>, tokens: &mut Vec<String>) {
    if run.len() == 1 {
        tokens.push(run[0].to_string());
    } else {
        for pair in run.windows(2) {
            tokens.push(pair.iter().collect());
        }
    }
    run.clear();
}

/// Split text into comparable tokens: lowercase latin words, digit runs, CJK bigrams.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut cjk_run: Vec<char> = Vec::new();

    for c in text.chars() {
        if is_cjk(c) {
            if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
            cjk_run.push(c);
            continue;
        }
        if !cjk_run.is_empty() {
            flush_cjk(&mut cjk_run, &mut tokens);
        }
        if c.is_ascii_alphanumeric() {
            // letters and digits form separate tokens ("gpt4" -> "gpt", "4")
            if let Some(last) = word.chars().last() {
                if last.is_ascii_digit() != c.is_ascii_digit() {
                    tokens.push(std::mem::take(&mut word));
                }
            }
            word.push(c.to_ascii_lowercase());
        } else if !word.is_empty() {
            tokens.push(std::mem::take(&mut word));
        }
    }
    if !word.is_empty() {
        tokens.push(word);
    }
    if !cjk_run.is_empty() {
        flush_cjk(&mut cjk_run, &mut tokens);
    }

    tokens
        .into_iter()
        .filter(|t| t.chars().count() > 1 && !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

fn term_counts(tokens: Vec<String>) -> HashMap<String, f64> {
    let mut counts = HashMap::new();
    for t in tokens {
        *counts.entry(t).or_insert(0.0) += 1.0;
    }
    counts
}

/// Raw cosine over term counts, in [0, 1].
pub fn cosine(a: &str, b: &str) -> f64 {
    let va = term_counts(tokenize(a));
    let vb = term_counts(tokenize(b));
    if va.is_empty() || vb.is_empty() {
        return 0.0;
    }
    let dot: f64 = va
        .iter()
        .filter_map(|(term, ca)| vb.get(term).map(|cb| ca * cb))
        .sum();
    let norm_a = va.values().map(|c| c * c).sum::<f64>().sqrt();
    let norm_b = vb.values().map(|c| c * c).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

/// Sigmoid-mapped similarity. Lines with no usable tokens score 0.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.trim().is_empty() || b.trim().is_empty() {
        return 0.0;
    }
    let va = tokenize(a);
    let vb = tokenize(b);
    if va.is_empty() || vb.is_empty() {
        return 0.0;
    }
    let cos = cosine(a, b);
    1.0 / (1.0 + (-STEEPNESS * (cos - MIDPOINT)).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_mixed_script() {
        let tokens = tokenize("今天天气 is GREAT 2024");
        assert!(tokens.contains(&"今天".to_string()));
        assert!(tokens.contains(&"天气".to_string()));
        assert!(tokens.contains(&"great".to_string()));
        assert!(tokens.contains(&"2024".to_string()));
        assert!(!tokens.contains(&"is".to_string()), "stop words dropped");
    }

    #[test]
    fn identical_lines_are_near_one() {
        let s = similarity("let's play the new raid tonight", "let's play the new raid tonight");
        assert!(s > 0.95, "identical lines should be near 1.0, got {}", s);
    }

    #[test]
    fn unrelated_lines_are_low() {
        let s = similarity("who wants pizza tonight", "the compiler crashed again");
        assert!(s < 0.05, "unrelated lines should be near 0, got {}", s);
    }

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(similarity("", "hello there"), 0.0);
        assert_eq!(similarity("!!", "??"), 0.0);
    }

    #[test]
    fn similarity_is_symmetric() {
        let a = "raid night tonight at nine";
        let b = "tonight raid is at ten";
        assert!((similarity(a, b) - similarity(b, a)).abs() < 1e-12);
    }
}
