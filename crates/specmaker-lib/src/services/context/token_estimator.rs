// Token Estimator
// Approximate token counts without a model-specific tokenizer

use crate::models::ChatMessage;

/// Framing overhead per message (role marker and separators)
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Estimate tokens for arbitrary text
///
/// Takes the larger of one token per 4 bytes and 4 tokens per 3 words, so
/// both dense prose and code-like text err high. Monotonic under
/// concatenation.
pub fn estimate(text: &str) -> usize {
    let by_bytes = text.len().div_ceil(4);
    let by_words = (text.split_whitespace().count() * 4).div_ceil(3);
    by_bytes.max(by_words)
}

/// Estimate tokens for a message
pub fn estimate_message(message: &ChatMessage) -> usize {
    MESSAGE_OVERHEAD_TOKENS + estimate(&message.content)
}

/// Estimate tokens for a list of messages
pub fn estimate_messages(messages: &[ChatMessage]) -> usize {
    messages.iter().map(estimate_message).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text() {
        assert_eq!(estimate(""), 0);
        assert_eq!(estimate_message(&ChatMessage::user("")), MESSAGE_OVERHEAD_TOKENS);
    }

    #[test]
    fn test_bytes_dominate_long_words() {
        // 1 word, 40 bytes
        let text = "a".repeat(40);
        assert_eq!(estimate(&text), 10);
    }

    #[test]
    fn test_words_dominate_short_words() {
        // 6 words, 11 bytes
        assert_eq!(estimate("a b c d e f"), 8);
    }

    #[test]
    fn test_monotonic_under_concatenation() {
        let samples = [
            "",
            "Describe a todo app.",
            "fn main() { println!(\"hi\"); }",
            "ok",
            "The system MUST store tasks offline and sync when a connection is available.",
        ];

        for a in samples {
            for b in samples {
                let joined = format!("{}{}", a, b);
                assert!(estimate(&joined) >= estimate(a).max(estimate(b)), "{:?} + {:?}", a, b);
            }
        }
    }

    #[test]
    fn test_messages_sum() {
        let messages = vec![
            ChatMessage::system("You are helpful."),
            ChatMessage::user("Describe a todo app."),
        ];
        assert_eq!(
            estimate_messages(&messages),
            estimate_message(&messages[0]) + estimate_message(&messages[1])
        );
    }
}
