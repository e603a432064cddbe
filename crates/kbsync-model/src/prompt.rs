//! Prompts sent to text models.

/// Prompt asking for a summary of one repository file.
///
/// The content is cut at `max_chars` (on a char boundary) so very large files
/// do not blow the model's context.
pub fn summary_prompt(content: &str, max_chars: usize) -> String {
    let excerpt = truncate_chars(content, max_chars);
    format!(
        "Summarize the following file from a source repository in a short paragraph. \
         Describe what it contains and what it is for.\n\n{excerpt}\n"
    )
}

/// Prompt asking for an answer to an issue, grounded in retrieved context.
pub fn answer_prompt(question: &str, context: &[String]) -> String {
    let mut prompt = String::from(
        "You help maintainers answer issues about a source repository. \
         Use the repository context below when it is relevant.\n\n",
    );

    if context.is_empty() {
        prompt.push_str("Repository context: (none found)\n\n");
    } else {
        prompt.push_str("Repository context:\n");
        for (i, entry) in context.iter().enumerate() {
            prompt.push_str(&format!("[{}] {}\n", i + 1, entry));
        }
        prompt.push('\n');
    }

    prompt.push_str("Issue:\n");
    prompt.push_str(question);
    prompt.push_str("\n\nAnswer:");
    prompt
}

/// First `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 2), "he");
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_summary_prompt_truncates_excerpt() {
        let prompt = summary_prompt("abcdef", 3);
        assert!(prompt.contains("abc"));
        assert!(!prompt.contains("abcd"));
    }

    #[test]
    fn test_answer_prompt_numbers_context() {
        let prompt = answer_prompt("Why?", &["a.txt: greets".to_string()]);
        assert!(prompt.contains("[1] a.txt: greets"));
        assert!(prompt.ends_with("Answer:"));

        let empty = answer_prompt("Why?", &[]);
        assert!(empty.contains("(none found)"));
    }
}
