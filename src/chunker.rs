//! Fixed-size character slicing for corpus documents.

/// Default character ceiling per chunk.
pub const DEFAULT_CHUNK_CHARS: usize = 1500;

/// Slice of a source document emitted for embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSlice {
    /// Position of the slice within its document.
    pub index: usize,
    /// Slice text.
    pub text: String,
    /// Character (not byte) offset where the slice starts.
    pub char_start: usize,
    /// Exclusive character offset where the slice ends.
    pub char_end: usize,
}

/// Splits `text` into consecutive slices of at most `max_chars` characters.
///
/// Offsets count Unicode scalar values, so a slice never cuts a code point in
/// half, but words and sentences are split wherever the boundary lands.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<TextSlice> {
    let max_chars = max_chars.max(1);
    let mut slices = Vec::new();
    let mut byte_start = 0usize;
    let mut char_start = 0usize;
    let mut chars_in_slice = 0usize;

    for (byte_idx, _) in text.char_indices() {
        if chars_in_slice == max_chars {
            flush_slice(&mut slices, &text[byte_start..byte_idx], char_start);
            byte_start = byte_idx;
            char_start += chars_in_slice;
            chars_in_slice = 0;
        }
        chars_in_slice += 1;
    }

    if chars_in_slice > 0 {
        flush_slice(&mut slices, &text[byte_start..], char_start);
    }
    slices
}

fn flush_slice(slices: &mut Vec<TextSlice>, text: &str, char_start: usize) {
    let len = text.chars().count();
    slices.push(TextSlice {
        index: slices.len(),
        text: text.to_string(),
        char_start,
        char_end: char_start + len,
    });
}
