//! Overlapping character windows over document text.
//!
//! Every window holds at most `max_size` characters. A window prefers to end
//! on the strongest boundary found in its second half: blank line, line
//! break, sentence end, whitespace; otherwise it is cut hard. The next window
//! of the same document starts `overlap` characters before the previous end,
//! so consecutive windows share exactly `overlap` characters.

use tracing::debug;

use crate::config::ChunkingSettings;
use crate::error::Result;
use crate::types::{Chunk, Document};

pub fn split(documents: &[Document], settings: &ChunkingSettings) -> Result<Vec<Chunk>> {
    settings.validate()?;
    let mut all_chunks = Vec::new();
    for document in documents {
        let chunks = split_document(document, settings);
        debug!(document = %document.id, chunks = chunks.len(), "split document");
        all_chunks.extend(chunks);
    }
    Ok(all_chunks)
}

fn split_document(document: &Document, settings: &ChunkingSettings) -> Vec<Chunk> {
    if document.raw_text.trim().is_empty() {
        return Vec::new();
    }
    let chars: Vec<char> = document.raw_text.chars().collect();
    let total = chars.len();
    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let hard_end = (start + settings.max_size).min(total);
        let end = if hard_end == total { total } else { find_break(&chars, start, hard_end, settings) };
        let text: String = chars[start..end].iter().collect();
        if !text.trim().is_empty() {
            chunks.push(Chunk {
                id: format!("{}:{}", document.id, chunks.len()),
                document_id: document.id.clone(),
                text,
                start_offset: start,
                end_offset: end,
            });
        }
        if end == total {
            break;
        }
        // find_break never returns a position at or before start + overlap
        start = end - settings.overlap;
    }
    chunks
}

#[derive(Clone, Copy)]
enum Boundary {
    Paragraph,
    Line,
    Sentence,
    Word,
}

impl Boundary {
    fn ends_at(self, chars: &[char], end: usize) -> bool {
        let last = chars[end - 1];
        match self {
            Boundary::Paragraph => end >= 2 && last == '\n' && chars[end - 2] == '\n',
            Boundary::Line => last == '\n',
            Boundary::Sentence => end >= 2 && last.is_whitespace() && matches!(chars[end - 2], '.' | '!' | '?'),
            Boundary::Word => last.is_whitespace(),
        }
    }
}

/// Latest end position in `[lower, hard_end]` sitting on the strongest
/// available boundary, or `hard_end` when none exists.
fn find_break(chars: &[char], start: usize, hard_end: usize, settings: &ChunkingSettings) -> usize {
    let lower = start + (settings.overlap + 1).max(settings.max_size / 2).max(1);
    if lower > hard_end {
        return hard_end;
    }
    for boundary in [Boundary::Paragraph, Boundary::Line, Boundary::Sentence, Boundary::Word] {
        if let Some(end) = (lower..=hard_end).rev().find(|&end| boundary.ends_at(chars, end)) {
            return end;
        }
    }
    hard_end
}
