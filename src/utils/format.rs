/// Keep the `0x` prefix and the first `keep` hex digits of `value`.
///
/// Secrets such as the account code must never reach a log in full.
pub fn truncate_hex(value: &str, keep: usize) -> String {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    if digits.len() <= keep {
        return value.to_string();
    }
    let prefix: String = digits.chars().take(keep).collect();
    format!("0x{}…", prefix)
}

/// Guardian weight progress, e.g. `1/2`.
pub fn format_weight(current: u64, threshold: u64) -> String {
    format!("{}/{}", current, threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_hex_values() {
        assert_eq!(truncate_hex("0xdeadbeefcafe", 4), "0xdead…");
        assert_eq!(truncate_hex("0xdead", 8), "0xdead");
        assert_eq!(truncate_hex("abcdef", 2), "0xab…");
    }

    #[test]
    fn formats_weight_progress() {
        assert_eq!(format_weight(1, 2), "1/2");
    }
}
