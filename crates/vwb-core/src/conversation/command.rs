/// Default cap on command length, in characters.
pub const COMMAND_MAX_LEN: usize = 64;

/// Normalize free text into a routing key: trimmed, lowercased, capped at
/// `max_len` characters, leading slashes removed.
pub fn normalize_command(raw: &str, max_len: usize) -> String {
    let lowered = raw.trim().to_lowercase();
    let capped: String = lowered.chars().take(max_len).collect();
    capped.trim_start_matches('/').to_string()
}
