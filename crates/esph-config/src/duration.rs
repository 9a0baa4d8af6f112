//! Human-readable durations such as `16ms`, `60s`, `5min` or `1h`

/// Parse a duration string into milliseconds.
///
/// A bare integer is taken as milliseconds.
pub fn parse_duration_ms(text: &str) -> Result<u64, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("empty duration".to_string());
    }

    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    if digits.is_empty() {
        return Err(format!("'{}' does not start with a number", text));
    }

    let amount: u64 = digits
        .parse()
        .map_err(|e| format!("'{}' is not a valid number: {}", digits, e))?;

    let factor = match unit.trim() {
        "" | "ms" => 1,
        "s" => 1_000,
        "min" => 60_000,
        "h" => 3_600_000,
        other => return Err(format!("unknown duration unit '{}'", other)),
    };

    amount
        .checked_mul(factor)
        .ok_or_else(|| format!("'{}' is too large", text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units() {
        assert_eq!(parse_duration_ms("16ms"), Ok(16));
        assert_eq!(parse_duration_ms("60s"), Ok(60_000));
        assert_eq!(parse_duration_ms("5min"), Ok(300_000));
        assert_eq!(parse_duration_ms("1h"), Ok(3_600_000));
        assert_eq!(parse_duration_ms("250"), Ok(250));
        assert_eq!(parse_duration_ms(" 2 s "), Ok(2_000));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_duration_ms("").is_err());
        assert!(parse_duration_ms("s").is_err());
        assert!(parse_duration_ms("10 parsecs").is_err());
        assert!(parse_duration_ms("-5s").is_err());
        assert!(parse_duration_ms("99999999999999999999h").is_err());
    }
}
