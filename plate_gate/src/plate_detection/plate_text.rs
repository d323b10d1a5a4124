//! Turning raw OCR hypotheses into a plate string comparable with the
//! allow-list.

use super::{OcrCandidate, PlateRead};

/// Strips everything that is not alphanumeric and uppercases the rest.
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        // Some uppercase mappings expand into several chars.
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Picks the highest-confidence candidate whose normalized text has at least
/// `min_len` characters. Ties keep the earliest candidate.
pub fn select_plate(candidates: &[OcrCandidate], min_len: usize) -> Option<PlateRead> {
    let mut best: Option<PlateRead> = None;

    for candidate in candidates {
        let text = normalize(&candidate.text);
        if text.chars().count() < min_len {
            continue;
        }
        let better = match &best {
            Some(current) => candidate.confidence > current.confidence,
            None => true,
        };
        if better {
            best = Some(PlateRead {
                text,
                confidence: candidate.confidence,
            });
        }
    }

    best
}
