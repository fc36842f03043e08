//! Fenced code block extraction from model output
//!
//! Only fences explicitly tagged with the Python language tag are picked up:
//!
//! ````text
//! ```python
//! print(1 + 1)
//! ```
//! ````
//!
//! Untagged fences and fences for other languages are ignored, and an
//! opening fence without a closing one yields nothing for that region.
//! No syntax checking happens here; the sandbox reports broken code.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Opening fence tagged `python`/`py`/`python3` on its own line, body, closing fence.
    static ref PYTHON_FENCE: Regex = Regex::new(r"(?s)```[ \t]*(?:python3?|py)[ \t]*\r?\n(.*?)```")
        .expect("code fence pattern is valid");
}

/// A code region found in a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Zero-based position among the blocks of the originating message
    pub index: usize,
    /// Code between the fences
    pub source: String,
}

/// Lazy iterator over the Python blocks of a text
///
/// Cloning yields an independent iterator starting from the clone point;
/// [`CodeBlocks::restart`] rewinds to the beginning of the text.
#[derive(Debug, Clone)]
pub struct CodeBlocks<'a> {
    text: &'a str,
    offset: usize,
    index: usize,
}

impl<'a> CodeBlocks<'a> {
    /// A fresh iterator over the same text
    pub fn restart(&self) -> CodeBlocks<'a> {
        extract_code_blocks(self.text)
    }
}

impl Iterator for CodeBlocks<'_> {
    type Item = CodeBlock;

    fn next(&mut self) -> Option<CodeBlock> {
        if self.offset > self.text.len() {
            return None;
        }
        let caps = PYTHON_FENCE.captures_at(self.text, self.offset)?;
        let whole = caps.get(0)?;
        let body = caps.get(1)?;

        self.offset = whole.end();
        let block = CodeBlock {
            index: self.index,
            source: body.as_str().to_string(),
        };
        self.index += 1;
        Some(block)
    }
}

impl std::iter::FusedIterator for CodeBlocks<'_> {}

/// Extract fenced Python blocks in order of appearance
pub fn extract_code_blocks(text: &str) -> CodeBlocks<'_> {
    CodeBlocks {
        text,
        offset: 0,
        index: 0,
    }
}
