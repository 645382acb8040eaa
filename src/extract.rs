//! Fenced-code-block extraction from free-form LLM output.
//!
//! The negotiator pulls its JSON verdicts and the code generator pulls the
//! generated handler source out of completions that usually wrap the payload
//! in Markdown fences. Extraction is line-based: a fence opens with three
//! backticks and an optional language tag, and closes with three backticks
//! on their own line. When several blocks match, the **last** one wins so
//! that a model correcting itself mid-reply is read by its final answer.
//!
//! A missing or unterminated fence yields `None`; callers treat that as an
//! LLM failure rather than guessing at the payload boundaries.

/// A single fenced block pulled out of Markdown text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Language tag on the opening fence, if any.
    pub language: Option<String>,
    /// Inner text, trimmed.
    pub content: String,
}

/// Collect every completed fenced block in `text`, in document order.
///
/// An unterminated trailing fence is discarded.
#[must_use]
pub fn code_blocks(text: &str) -> Vec<CodeBlock> {
    let mut blocks = Vec::new();
    let mut in_block = false;
    let mut current = String::new();
    let mut current_lang: Option<String> = None;

    for raw_line in text.lines() {
        let line = raw_line.trim_end_matches('\r');
        if line.trim_start().starts_with("```") {
            if in_block {
                blocks.push(CodeBlock {
                    language: current_lang.take(),
                    content: current.trim().to_owned(),
                });
                current.clear();
                in_block = false;
            } else {
                in_block = true;
                let lang = line.trim_start().trim_start_matches("```").trim();
                current_lang = if lang.is_empty() {
                    None
                } else {
                    Some(lang.to_owned())
                };
            }
            continue;
        }

        if in_block {
            current.push_str(line);
            current.push('\n');
        }
    }

    blocks
}

/// Last fenced block whose opening fence carries `lang` (case-insensitive).
#[must_use]
pub fn last_block_tagged(text: &str, lang: &str) -> Option<String> {
    code_blocks(text)
        .into_iter()
        .rev()
        .find(|block| {
            block
                .language
                .as_deref()
                .is_some_and(|tag| tag.eq_ignore_ascii_case(lang))
        })
        .map(|block| block.content)
}

/// Last fenced block with no language tag on its opening fence.
#[must_use]
pub fn last_block_bare(text: &str) -> Option<String> {
    code_blocks(text)
        .into_iter()
        .rev()
        .find(|block| block.language.is_none())
        .map(|block| block.content)
}

/// Extract source in `lang`, falling back to the last untagged block.
///
/// Mirrors the two-step lookup the prompts train the model for: prefer a
/// properly tagged fence, tolerate a bare one.
#[must_use]
pub fn extract_source(text: &str, lang: &str) -> Option<String> {
    last_block_tagged(text, lang).or_else(|| last_block_bare(text))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
