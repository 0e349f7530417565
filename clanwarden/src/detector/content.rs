// clanwarden/src/detector/content.rs
//
// Lexical content heuristics over a window of messages.
//
//   identical  — most frequent exact (trimmed) text; blank lines ignored
//   trivial    — one repeated character ("aaaa") or a short repeated unit
//                ("hahaha", "lol lol ") filling the whole message
//   similar    — unordered pairs whose edit distance is under a length-scaled
//                threshold, or (longer text) whose word-set Jaccard > 0.6.
//                Identical pairs are left to the identical check.
//
// All length measurements are in chars, not bytes.

use std::collections::{HashMap, HashSet};

use crate::events::MessageEvent;

const MIN_SIMILAR_LEN:   usize = 5;
const MIN_JACCARD_LEN:   usize = 10;
const MIN_WORD_LEN:      usize = 3;
const JACCARD_THRESHOLD: f64   = 0.6;
const MAX_TRIVIAL_UNIT:  usize = 5;

/// Highest count of a single non-blank text in `events`.
pub fn max_identical(events: &[&MessageEvent]) -> usize {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut best = 0;
    for e in events {
        let msg = e.text.trim();
        if msg.is_empty() {
            continue;
        }
        let c = counts.entry(msg).or_insert(0);
        *c += 1;
        best = best.max(*c);
    }
    best
}

pub fn count_trivial(events: &[&MessageEvent]) -> usize {
    events.iter().filter(|e| is_trivial(&e.text)).count()
}

/// True for a message made of one character repeated, or of a unit of up
/// to five characters repeated at least twice with nothing left over.
pub fn is_trivial(message: &str) -> bool {
    let chars: Vec<char> = message.trim().chars().collect();
    let n = chars.len();
    if n < 3 {
        return false;
    }
    if chars.iter().all(|&c| c == chars[0]) {
        return true;
    }
    (1..=MAX_TRIVIAL_UNIT.min(n / 2)).any(|unit| {
        n % unit == 0 && chars.chunks(unit).all(|chunk| chunk == &chars[..unit])
    })
}

/// Classic two-row Levenshtein distance over chars.
pub fn levenshtein(a: &str, b: &str) -> usize {
    if a == b {
        return 0;
    }
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

fn edit_threshold(min_len: usize) -> usize {
    match min_len {
        0..=8 => 2,
        9..=15 => 3,
        _ => 4usize.max((min_len as f64 * 0.3).ceil() as usize),
    }
}

fn word_set(msg: &str) -> HashSet<String> {
    msg.to_lowercase()
        .split_whitespace()
        .filter(|w| w.chars().count() >= MIN_WORD_LEN)
        .map(str::to_string)
        .collect()
}

/// Near-duplicate test. Symmetric in its arguments.
pub fn is_similar(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    let (len_a, len_b) = (a.chars().count(), b.chars().count());
    if len_a < MIN_SIMILAR_LEN || len_b < MIN_SIMILAR_LEN || is_trivial(a) || is_trivial(b) {
        return false;
    }

    let min_len = len_a.min(len_b);
    let threshold = edit_threshold(min_len);
    if levenshtein(a, b) <= threshold {
        let max_len_gap = (threshold + 2).max((min_len as f64 * 0.5).ceil() as usize);
        return len_a.abs_diff(len_b) <= max_len_gap;
    }

    if min_len < MIN_JACCARD_LEN {
        return false;
    }
    let (wa, wb) = (word_set(a), word_set(b));
    if wa.len() < 2 || wb.len() < 2 {
        return false;
    }
    let inter = wa.intersection(&wb).count();
    let union = wa.union(&wb).count();
    inter as f64 / union as f64 > JACCARD_THRESHOLD
}

/// Number of unordered similar pairs; textually identical pairs are skipped.
pub fn count_similar_pairs(events: &[&MessageEvent]) -> usize {
    let mut pairs = 0;
    for i in 0..events.len() {
        for j in (i + 1)..events.len() {
            let (a, b) = (events[i].text.trim(), events[j].text.trim());
            if a == b {
                continue;
            }
            if is_similar(a, b) {
                pairs += 1;
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn msgs(texts: &[&str]) -> Vec<MessageEvent> {
        texts
            .iter()
            .map(|t| MessageEvent { username: "u".into(), text: t.to_string(), timestamp: Utc::now() })
            .collect()
    }

    fn refs(v: &[MessageEvent]) -> Vec<&MessageEvent> {
        v.iter().collect()
    }

    #[test]
    fn trivial_patterns() {
        assert!(is_trivial("aaaa"));
        assert!(is_trivial("  !!!  "));
        assert!(is_trivial("hahaha"));
        assert!(is_trivial("abcabc"));
        assert!(is_trivial("ффф"));
        assert!(!is_trivial("aa"));
        assert!(!is_trivial("hahah"));
        assert!(!is_trivial("hello there"));
        assert!(!is_trivial("abcdefabcdef")); // unit longer than five
    }

    #[test]
    fn identical_ignores_blank_and_trims() {
        let v = msgs(&["hi", " hi ", "", "   ", "hi", "yo"]);
        assert_eq!(max_identical(&refs(&v)), 3);
        let blank = msgs(&["", " ", "\t"]);
        assert_eq!(max_identical(&refs(&blank)), 0);
        assert_eq!(count_trivial(&refs(&blank)), 0);
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
        assert_eq!(levenshtein("привет", "привед"), 1);
    }

    #[test]
    fn similar_by_edit_distance() {
        assert!(is_similar("buy cheap gold", "buy cheap gold!"));
        assert!(is_similar("hello world", "hello wrld"));
        assert!(!is_similar("hello world", "completely different"));
    }

    #[test]
    fn similar_by_word_overlap() {
        let a = "selling diamond swords cheap today only";
        let b = "today only selling diamond swords cheap";
        assert!(is_similar(a, b));
    }

    #[test]
    fn short_and_trivial_messages_never_similar() {
        assert!(!is_similar("hey", "hey!"));
        assert!(!is_similar("aaaaaaa", "aaaaaab"));
    }

    #[test]
    fn similarity_is_symmetric() {
        let texts = [
            "hello world",
            "hello wrld",
            "buy cheap gold now",
            "buy cheap gold",
            "selling diamond swords cheap today only",
            "today only selling diamond swords cheap",
            "completely different sentence",
            "hahaha",
            "abc",
            "привет всем ребята",
            "привет всем ребята!",
        ];
        for a in &texts {
            for b in &texts {
                assert_eq!(is_similar(a, b), is_similar(b, a), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn identical_pairs_excluded_from_similarity() {
        let v = msgs(&["hello world", "hello world", "hello world"]);
        assert_eq!(count_similar_pairs(&refs(&v)), 0);

        let v = msgs(&["hello world", "hello world!", "hello world?"]);
        assert_eq!(count_similar_pairs(&refs(&v)), 3);
    }
}
