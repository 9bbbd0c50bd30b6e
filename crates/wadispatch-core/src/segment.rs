//! Message segmentation: one transport call per non-blank line.

/// One unit of message content, sent as a single transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageLine {
    pub text: String,
}

/// Split a message blob into its non-blank lines, preserving order.
///
/// Line text is kept as written (only the line terminator is removed).
/// An empty result is for the caller to reject.
pub fn segment(text: &str) -> Vec<MessageLine> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| MessageLine {
            text: line.to_string(),
        })
        .collect()
}
