//! Prompt text for the invoice structuring stage.
//!
//! Callers can override the template via
//! [`crate::config::ExtractionConfig::prompt_template`]; the constant here is
//! used only when no override is provided.

/// Placeholder replaced by the OCR text when the prompt is built.
pub const RAW_TEXT_PLACEHOLDER: &str = "{raw_text}";

/// Approximate characters per token used for prompt truncation.
///
/// Hosted providers do not expose their tokenizer, so the token budget is
/// converted to a character budget with the usual English-text ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Default instruction prompt. `{raw_text}` is replaced by the OCR text.
pub const DEFAULT_PROMPT_TEMPLATE: &str = r#"Extract structured invoice details in JSON format with fields:
- Invoice Number, Invoice Date, Customer Name, Customer Address
- Purchased Items (Item Names, Quantity, Price)
- SGST, CGST, Tax Total, Full Total

Extracted Invoice Text:
{raw_text}

Return structured JSON output."#;

/// Fill `template` (or the default) with the extracted invoice text.
pub fn build_prompt(template: Option<&str>, raw_text: &str) -> String {
    template
        .unwrap_or(DEFAULT_PROMPT_TEMPLATE)
        .replace(RAW_TEXT_PLACEHOLDER, raw_text)
}

/// Cut `prompt` to roughly `max_tokens` tokens, dropping the tail.
///
/// Returns the (possibly shortened) prompt and whether anything was removed.
/// The cut always lands on a `char` boundary.
pub fn truncate_prompt(prompt: &str, max_tokens: usize) -> (String, bool) {
    let max_chars = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    match prompt.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (prompt[..byte_idx].to_string(), true),
        None => (prompt.to_string(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prompt_lists_all_fields() {
        for field in [
            "Invoice Number",
            "Invoice Date",
            "Customer Name",
            "Customer Address",
            "Purchased Items",
            "SGST",
            "CGST",
            "Tax Total",
            "Full Total",
        ] {
            assert!(DEFAULT_PROMPT_TEMPLATE.contains(field), "missing {field}");
        }
        assert!(DEFAULT_PROMPT_TEMPLATE.contains(RAW_TEXT_PLACEHOLDER));
    }

    #[test]
    fn build_prompt_embeds_text() {
        let p = build_prompt(None, "INV-1 100");
        assert!(p.contains("Extracted Invoice Text:\nINV-1 100\n"));
        assert!(!p.contains(RAW_TEXT_PLACEHOLDER));
    }

    #[test]
    fn build_prompt_uses_override() {
        let p = build_prompt(Some("Text: {raw_text}"), "abc");
        assert_eq!(p, "Text: abc");
    }

    #[test]
    fn short_prompt_is_untouched() {
        let (p, cut) = truncate_prompt("hello", 64);
        assert_eq!(p, "hello");
        assert!(!cut);
    }

    #[test]
    fn long_prompt_loses_tail() {
        let prompt = "a".repeat(300);
        let (p, cut) = truncate_prompt(&prompt, 64);
        assert!(cut);
        assert_eq!(p.len(), 64 * CHARS_PER_TOKEN);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let prompt = "€".repeat(10);
        let (p, cut) = truncate_prompt(&prompt, 1);
        assert!(cut);
        assert_eq!(p.chars().count(), CHARS_PER_TOKEN);
    }
}
