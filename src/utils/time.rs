use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch.
pub fn current_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

const UNITS: [(&str, u64); 4] = [("day", 86_400), ("hour", 3_600), ("minute", 60), ("second", 1)];

/// Human readable form of a duration, using the two most significant
/// non-zero units: `107329` becomes "1 day and 5 hours".
pub fn describe_duration(seconds: u64) -> String {
    let mut parts = Vec::new();
    let mut rest = seconds;
    for (name, size) in UNITS {
        let count = rest / size;
        rest %= size;
        if count > 0 || !parts.is_empty() {
            parts.push((name, count));
        }
        if parts.len() == 2 {
            break;
        }
    }

    let plural = |(name, count): (&str, u64)| {
        if count == 1 {
            format!("{count} {name}")
        } else {
            format!("{count} {name}s")
        }
    };

    match parts.as_slice() {
        [first, second] if second.1 > 0 => {
            format!("{} and {}", plural(*first), plural(*second))
        }
        [first, ..] => plural(*first),
        [] => "0 seconds".to_string(),
    }
}
