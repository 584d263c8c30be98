//! Title-aware element chunker.
//!
//! Groups partitioned [`Element`]s into [`Chunk`]s aligned to document
//! sections. A title always opens a new chunk; otherwise elements accumulate
//! until adding the next one would exceed `max_characters`, or the chunk has
//! already passed the soft `new_after_n_chars` threshold. Small trailing
//! sections are then folded back into their predecessor.
//!
//! Elements are never reordered. Oversized text elements are split on
//! whitespace; tables and images are kept whole even when they exceed the
//! hard bound.

use crate::config::ChunkingConfig;
use crate::models::{Chunk, Element, ElementCategory};

const SEPARATOR: &str = "\n\n";

/// Chunk elements by section title.
///
/// Returns an empty vector for empty input. Every returned chunk's text is
/// at most `max_characters` chars, except a chunk holding a single table or
/// image element that alone exceeds it.
pub fn chunk_by_title(elements: &[Element], config: &ChunkingConfig) -> Vec<Chunk> {
    let max = config.max_characters.max(1);
    let soft = config.new_after_n_chars.min(max);

    let mut chunks = Vec::new();
    let mut current: Vec<Element> = Vec::new();
    let mut current_len = 0usize;

    for element in elements.iter().flat_map(|e| split_oversized(e, max)) {
        let len = element.text.chars().count();
        if !current.is_empty() {
            let projected = joined_len(current_len, len);
            if element.category == ElementCategory::Title
                || projected > max
                || current_len >= soft
            {
                chunks.push(make_chunk(std::mem::take(&mut current)));
                current_len = 0;
            }
        }
        current_len = joined_len(current_len, len);
        current.push(element);
    }
    if !current.is_empty() {
        chunks.push(make_chunk(current));
    }

    combine_small(chunks, config.combine_text_under_n_chars, max)
}

/// Merge chunks shorter than `threshold` into the previous chunk when the
/// combined text still fits within `max`.
fn combine_small(chunks: Vec<Chunk>, threshold: usize, max: usize) -> Vec<Chunk> {
    let mut out: Vec<Chunk> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let len = chunk.text.chars().count();
        if let Some(prev) = out.last_mut() {
            let prev_len = prev.text.chars().count();
            if len < threshold && joined_len(prev_len, len) <= max {
                prev.elements.extend(chunk.elements);
                *prev = make_chunk(std::mem::take(&mut prev.elements));
                continue;
            }
        }
        out.push(chunk);
    }
    out
}

fn joined_len(current: usize, next: usize) -> usize {
    if current == 0 || next == 0 {
        current + next
    } else {
        current + SEPARATOR.len() + next
    }
}

fn make_chunk(elements: Vec<Element>) -> Chunk {
    let text = elements
        .iter()
        .map(|e| e.text.as_str())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(SEPARATOR);
    let page = elements.first().map(|e| e.page).unwrap_or(1);
    Chunk {
        text,
        page,
        elements,
    }
}

/// Split a text element longer than `max` chars into whitespace-bounded
/// pieces. Tables and images pass through untouched.
fn split_oversized(element: &Element, max: usize) -> Vec<Element> {
    if element.category.is_visual() || element.text.chars().count() <= max {
        return vec![element.clone()];
    }

    let mut pieces = Vec::new();
    let mut buf = String::new();
    let mut buf_len = 0usize;

    for word in element.text.split_whitespace() {
        let word_len = word.chars().count();
        if word_len > max {
            if !buf.is_empty() {
                pieces.push(std::mem::take(&mut buf));
                buf_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            for part in chars.chunks(max) {
                pieces.push(part.iter().collect());
            }
            continue;
        }
        let projected = if buf.is_empty() {
            word_len
        } else {
            buf_len + 1 + word_len
        };
        if projected > max {
            pieces.push(std::mem::take(&mut buf));
            buf_len = 0;
        }
        if !buf.is_empty() {
            buf.push(' ');
            buf_len += 1;
        }
        buf.push_str(word);
        buf_len += word_len;
    }
    if !buf.is_empty() {
        pieces.push(buf);
    }

    pieces
        .into_iter()
        .map(|text| Element {
            text,
            ..element.clone()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max: usize, soft: usize, combine: usize) -> ChunkingConfig {
        ChunkingConfig {
            max_characters: max,
            new_after_n_chars: soft,
            combine_text_under_n_chars: combine,
        }
    }

    fn title(s: &str, page: u32) -> Element {
        Element::new(ElementCategory::Title, s, page)
    }

    fn text(s: &str, page: u32) -> Element {
        Element::new(ElementCategory::Text, s, page)
    }

    #[test]
    fn test_empty_input() {
        assert!(chunk_by_title(&[], &ChunkingConfig::default()).is_empty());
    }

    #[test]
    fn test_titles_start_new_chunks() {
        let elements = vec![
            title("Introduction", 1),
            text(&"a".repeat(40), 1),
            title("Methods", 2),
            text(&"b".repeat(40), 2),
        ];
        let chunks = chunk_by_title(&elements, &config(200, 150, 0));
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.starts_with("Introduction\n\n"));
        assert_eq!(chunks[1].page, 2);
        assert_eq!(chunks[1].elements.len(), 2);
    }

    #[test]
    fn test_hard_bound_respected() {
        let elements: Vec<Element> = (0..20).map(|i| text(&"word ".repeat(8), i / 5 + 1)).collect();
        let chunks = chunk_by_title(&elements, &config(100, 80, 0));
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.chars().count() <= 100, "chunk too long: {}", c.text.len());
        }
    }

    #[test]
    fn test_oversized_text_is_split() {
        let long = "lorem ipsum ".repeat(50);
        let chunks = chunk_by_title(&[text(&long, 3)], &config(100, 100, 0));
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 100));
        assert!(chunks.iter().all(|c| c.page == 3));
    }

    #[test]
    fn test_oversized_table_is_not_split() {
        let table = Element::table("x".repeat(300), "<table></table>", 1);
        let chunks = chunk_by_title(&[table], &config(100, 100, 0));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].elements[0].category, ElementCategory::Table);
    }

    #[test]
    fn test_small_section_combined_into_previous() {
        let elements = vec![
            title("Results", 1),
            text(&"r".repeat(60), 1),
            title("Note", 2),
            text("short", 2),
        ];
        let chunks = chunk_by_title(&elements, &config(200, 150, 30));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].page, 1);
        assert!(chunks[0].text.ends_with("Note\n\nshort"));
    }

    #[test]
    fn test_order_preserved() {
        let elements: Vec<Element> = (0..10).map(|i| text(&format!("para {}", i), 1)).collect();
        let chunks = chunk_by_title(&elements, &config(30, 20, 0));
        let flattened: Vec<String> = chunks
            .iter()
            .flat_map(|c| c.elements.iter().map(|e| e.text.clone()))
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("para {}", i)).collect();
        assert_eq!(flattened, expected);
    }
}
