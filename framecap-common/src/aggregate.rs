//! Collapses the captions of all sampled frames into one.
//!
//! If some caption is frequent enough it wins outright, otherwise the first few distinct
//! captions are glued together.

use std::collections::HashMap;

/// A caption needs to occur at least this many times to win
pub const MAJORITY_MIN_COUNT: usize = 2;
/// ...and at least in this fraction of the frames
pub const MAJORITY_DIVISOR: usize = 3;
/// How many distinct captions the fallback summary contains at most
pub const SUMMARY_MAX_CAPTIONS: usize = 5;
pub const SUMMARY_SEPARATOR: &str = " / ";

/// The most frequent caption and how many times it occurs. Ties are won by whichever
/// caption was seen first.
pub fn most_common<S: AsRef<str>>(captions: &[S]) -> Option<(&str, usize)> {
    let counts = count_in_order(captions);
    counts.into_iter().fold(None, |best, (caption, count)| match best {
        Some((_, best_count)) if best_count >= count => best,
        _ => Some((caption, count)),
    })
}

/// Minimum count for the most common caption to be the aggregate
pub fn majority_threshold(num_captions: usize) -> usize {
    std::cmp::max(MAJORITY_MIN_COUNT, num_captions / MAJORITY_DIVISOR)
}

/// See the module docs. Empty input gives an empty string.
pub fn aggregate<S: AsRef<str>>(captions: &[S]) -> String {
    let Some((most_common, freq)) = most_common(captions) else {
        return String::new();
    };

    if freq >= majority_threshold(captions.len()) {
        return most_common.to_string();
    }

    count_in_order(captions)
        .into_iter()
        .map(|(caption, _)| caption)
        .take(SUMMARY_MAX_CAPTIONS)
        .collect::<Vec<_>>()
        .join(SUMMARY_SEPARATOR)
}

/// Every distinct caption with its count, in order of first occurrence
fn count_in_order<S: AsRef<str>>(captions: &[S]) -> Vec<(&str, usize)> {
    let mut positions: HashMap<&str, usize> = HashMap::with_capacity(captions.len());
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for caption in captions {
        let caption = caption.as_ref();
        match positions.get(caption) {
            Some(&pos) => counts[pos].1 += 1,
            None => {
                positions.insert(caption, counts.len());
                counts.push((caption, 1));
            }
        }
    }
    counts
}
