//! Sequence-matcher similarity between transcripts.
//!
//! `ratio` is the Ratcliff/Obershelp measure: twice the number of matched
//! characters over the total length, where matches are found by repeatedly
//! taking the longest common block and recursing on both sides of it.

use std::collections::HashMap;

/// Shortest window tried, relative to the needle length.
const MIN_WINDOW_RATIO: f32 = 0.6;
/// Longest window tried, relative to the needle length.
const MAX_WINDOW_RATIO: f32 = 1.4;
const WINDOW_LEN_DIVISOR: usize = 5;
const WINDOW_STEP_DIVISOR: usize = 6;

/// Similarity of two strings in `[0, 1]`. Two empty strings are identical.
pub fn ratio(a: &str, b: &str) -> f32 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    ratio_chars(&a, &b)
}

/// Best `ratio` between `needle` and any window of `haystack` whose length is
/// close to the needle's, along with the matching window.
///
/// A haystack no longer than the largest window is compared as a whole.
pub fn max_substring_similarity(needle: &str, haystack: &str) -> (f32, String) {
    let needle = needle.trim();
    let haystack = haystack.trim();
    if needle.is_empty() || haystack.is_empty() {
        return (0.0, String::new());
    }

    let a: Vec<char> = needle.chars().collect();
    let b: Vec<char> = haystack.chars().collect();

    let target = a.len();
    let min_len = ((target as f32 * MIN_WINDOW_RATIO) as usize).max(1);
    let max_len = ((target as f32 * MAX_WINDOW_RATIO) as usize).max(min_len);

    if b.len() <= max_len {
        return (ratio_chars(&a, &b), haystack.to_string());
    }

    let mut best = 0.0f32;
    let mut best_window: &[char] = &[];
    let len_step = (target / WINDOW_LEN_DIVISOR).max(1);
    for window_len in (min_len..=max_len).step_by(len_step) {
        let step = (window_len / WINDOW_STEP_DIVISOR).max(1);
        for start in (0..=b.len() - window_len).step_by(step) {
            let window = &b[start..start + window_len];
            let score = ratio_chars(&a, window);
            if score > best {
                best = score;
                best_window = window;
            }
        }
    }
    (best, best_window.iter().collect())
}

fn ratio_chars(a: &[char], b: &[char]) -> f32 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(a, b) as f32 / total as f32
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let mut positions: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, &c) in b.iter().enumerate() {
        positions.entry(c).or_default().push(j);
    }

    let mut matched = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, k) = longest_match(a, &positions, alo..ahi, blo..bhi);
        if k == 0 {
            continue;
        }
        matched += k;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            pending.push((i + k, ahi, j + k, bhi));
        }
    }
    matched
}

/// Longest common block of `a[a_range]` and `b[b_range]` as `(i, j, len)`.
/// Ties go to the block starting earliest in `a`, then earliest in `b`.
fn longest_match(
    a: &[char],
    positions: &HashMap<char, Vec<usize>>,
    a_range: std::ops::Range<usize>,
    b_range: std::ops::Range<usize>,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_k) = (a_range.start, b_range.start, 0);
    // Run length of the match ending at (i - 1, j), keyed by j.
    let mut run_ending_at: HashMap<usize, usize> = HashMap::new();

    for i in a_range {
        let mut next = HashMap::new();
        if let Some(js) = positions.get(&a[i]) {
            for &j in js {
                if j < b_range.start {
                    continue;
                }
                if j >= b_range.end {
                    break;
                }
                let previous = j
                    .checked_sub(1)
                    .and_then(|p| run_ending_at.get(&p))
                    .copied()
                    .unwrap_or(0);
                let k = previous + 1;
                next.insert(j, k);
                if k > best_k {
                    best_i = i + 1 - k;
                    best_j = j + 1 - k;
                    best_k = k;
                }
            }
        }
        run_ending_at = next;
    }
    (best_i, best_j, best_k)
}
