//! Paragraph-boundary text segmenter.
//!
//! Splits extracted page text into [`DocumentSegment`]s of roughly
//! `max_chars` characters. Splitting happens on paragraph boundaries
//! (`\n\n`) where possible; an oversized paragraph is cut at the last
//! newline or space before the limit.
//!
//! Each segment carries its position in `metadata["segment"]`.

use crate::models::DocumentSegment;

/// Split `text` into ordered segments. Blank text yields no segments.
pub fn split_segments(text: &str, max_chars: usize) -> Vec<DocumentSegment> {
    let mut packer = Packer::new(max_chars.max(1));
    for paragraph in text.split("\n\n").map(str::trim) {
        if !paragraph.is_empty() {
            packer.add(paragraph);
        }
    }

    packer
        .finish()
        .into_iter()
        .enumerate()
        .map(|(i, text)| DocumentSegment::new(text).with_metadata("segment", i.to_string()))
        .collect()
}

/// Greedy paragraph packer.
struct Packer {
    limit: usize,
    open: String,
    done: Vec<String>,
}

impl Packer {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            open: String::new(),
            done: Vec::new(),
        }
    }

    fn add(&mut self, paragraph: &str) {
        let joined_len = match self.open.len() {
            0 => paragraph.len(),
            n => n + 2 + paragraph.len(),
        };
        if joined_len > self.limit {
            self.flush();
        }

        if paragraph.len() > self.limit {
            self.cut(paragraph);
            return;
        }
        if !self.open.is_empty() {
            self.open.push_str("\n\n");
        }
        self.open.push_str(paragraph);
    }

    /// Emit an oversized paragraph as pieces no longer than the limit,
    /// breaking after the last newline or space where there is one.
    fn cut(&mut self, paragraph: &str) {
        let mut rest = paragraph;
        while !rest.is_empty() {
            let hard = snap_to_char_boundary(rest, self.limit);
            let at = if hard == rest.len() {
                hard
            } else {
                let window = &rest[..hard];
                match window.rfind('\n').or_else(|| window.rfind(' ')) {
                    Some(pos) => pos + 1,
                    None => hard,
                }
            };
            let (piece, tail) = rest.split_at(at);
            let piece = piece.trim();
            if !piece.is_empty() {
                self.done.push(piece.to_string());
            }
            rest = tail;
        }
    }

    fn flush(&mut self) {
        if !self.open.is_empty() {
            self.done.push(std::mem::take(&mut self.open));
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.done
    }
}

/// Largest byte index `<= max` that lies on a char boundary of `s`, and at
/// least one full character so the caller always makes progress.
fn snap_to_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    match (1..=max).rev().find(|&i| s.is_char_boundary(i)) {
        Some(i) => i,
        None => s.chars().next().map(char::len_utf8).unwrap_or(s.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_segment() {
        let segments = split_segments("Hello, world!", 1000);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "Hello, world!");
        assert_eq!(segments[0].metadata.get("segment").map(String::as_str), Some("0"));
    }

    #[test]
    fn test_blank_text_has_no_segments() {
        assert!(split_segments("", 1000).is_empty());
        assert!(split_segments("  \n\n \n\n", 1000).is_empty());
    }

    #[test]
    fn test_paragraphs_grouped_under_limit() {
        let text = "Alpha.\n\nBeta.\n\nGamma paragraph.";
        let segments = split_segments(text, 1000);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "Alpha.\n\nBeta.\n\nGamma paragraph.");
    }

    #[test]
    fn test_order_and_indices_preserved() {
        let text: String = (0..50)
            .map(|i| format!("Paragraph number {}.\n\n", i))
            .collect();
        let segments = split_segments(&text, 40);
        assert!(segments.len() > 10);
        for (i, s) in segments.iter().enumerate() {
            assert_eq!(s.metadata["segment"], i.to_string());
        }
        assert!(segments[0].text.starts_with("Paragraph number 0."));
        assert!(segments.last().unwrap().text.ends_with("Paragraph number 49."));
    }

    #[test]
    fn test_oversized_paragraph_split_on_spaces() {
        let text = "word ".repeat(100);
        let segments = split_segments(&text, 32);
        assert!(segments.len() > 1);
        assert!(segments.iter().all(|s| s.text.len() <= 32));
        assert!(segments.iter().all(|s| !s.text.starts_with(' ')));
    }

    #[test]
    fn test_multibyte_text_does_not_panic() {
        let text = "é".repeat(50);
        let segments = split_segments(&text, 7);
        let joined: String = segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(joined, text);
    }
}
