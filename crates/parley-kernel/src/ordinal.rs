//! Item references in follow-up messages: "la 3", "las primeras 2",
//! "la última", "quita la segunda".

use std::collections::BTreeSet;

/// Word stems for the ordinals people actually type, beyond "primer…".
const ORDINAL_STEMS: &[(&str, usize)] = &[("segund", 2), ("tercer", 3), ("cuart", 4), ("quint", 5)];

/// Resolve `text` to 1-based item indices within `1..=len`.
///
/// - every integer in range is taken as an index;
/// - "primer…" selects the first N (N = first integer, default 1);
/// - "últim…" selects the last N;
/// - ordinal words ("segunda", "tercera", ...) select that item.
///
/// The result never leaves `1..=len`; a stray "la 7" on a list of five
/// selects nothing.
pub fn parse_item_references(text: &str, len: usize) -> BTreeSet<usize> {
    let mut items = BTreeSet::new();
    if len == 0 || text.trim().is_empty() {
        return items;
    }

    let numbers: Vec<usize> = text
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();

    items.extend(numbers.iter().copied().filter(|n| (1..=len).contains(n)));

    let lowered = text.to_lowercase();
    let count = numbers.first().copied().unwrap_or(1);

    if lowered.contains("primer") {
        items.extend(1..=count.min(len));
    }

    if lowered.contains("últim") || lowered.contains("ultim") {
        let start = len.saturating_sub(count).saturating_add(1).max(1);
        items.extend(start..=len);
    }

    for (stem, index) in ORDINAL_STEMS {
        if *index <= len && lowered.contains(stem) {
            items.insert(*index);
        }
    }

    items
}
