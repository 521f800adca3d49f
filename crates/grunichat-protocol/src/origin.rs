//! Self-origin tagging.
//!
//! Outbound text fields are stamped with `"[<id>] "` so a peer can tell
//! which bridge produced them. When a command comes back stamped with the
//! sender's own id, the dispatcher strips the stamp before executing it,
//! which keeps two bridges relaying through each other from stacking
//! prefixes forever.

/// Returns `"[<id>] <text>"`.
pub fn tag(text: &str, id: &str) -> String {
    format!("[{id}] {text}")
}

/// Removes one leading `"[<id>] "` stamp, if present.
///
/// Text without the stamp (including text stamped with a *different* id)
/// comes back unchanged.
pub fn strip<'a>(text: &'a str, id: &str) -> &'a str {
    text.strip_prefix('[')
        .and_then(|rest| rest.strip_prefix(id))
        .and_then(|rest| rest.strip_prefix("] "))
        .unwrap_or(text)
}
