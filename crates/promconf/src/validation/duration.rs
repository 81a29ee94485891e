//! Durations in the server's notation, e.g. `1h30m` or `500ms`.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static RE_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(\d+)y)?(?:(\d+)w)?(?:(\d+)d)?(?:(\d+)h)?(?:(\d+)m)?(?:(\d+)s)?(?:(\d+)ms)?$",
    )
    .unwrap()
});

const UNIT_MILLIS: [u64; 7] = [
    365 * 24 * 60 * 60 * 1000,
    7 * 24 * 60 * 60 * 1000,
    24 * 60 * 60 * 1000,
    60 * 60 * 1000,
    60 * 1000,
    1000,
    1,
];

/// Parses a duration; units must appear largest first, each at most once.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    if value == "0" {
        return Ok(Duration::ZERO);
    }
    if value.is_empty() {
        return Err("empty duration string".to_string());
    }

    let caps = RE_DURATION
        .captures(value)
        .ok_or_else(|| format!("not a valid duration string: {:?}", value))?;

    let mut millis: u64 = 0;
    for (i, unit) in UNIT_MILLIS.iter().enumerate() {
        if let Some(m) = caps.get(i + 1) {
            let n: u64 = m
                .as_str()
                .parse()
                .map_err(|_| format!("duration out of range: {:?}", value))?;
            millis = n
                .checked_mul(*unit)
                .and_then(|v| millis.checked_add(v))
                .ok_or_else(|| format!("duration out of range: {:?}", value))?;
        }
    }

    Ok(Duration::from_millis(millis))
}
