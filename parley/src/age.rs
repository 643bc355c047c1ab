//! Human-friendly ages: parsing `10d`-style durations for
//! `--delete-older-than` and rendering row ages for `--list`.

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;
const MONTH: i64 = 30 * DAY;
const YEAR: i64 = 365 * DAY;

/// Parse an age like `90s`, `1h30m`, `10d`, `2w`, `1mo` or `1y` into
/// seconds. Units may be chained largest-first.
pub fn parse_age(input: &str) -> Result<i64, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = 0i64;
    let mut digits = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }

        let value: i64 = digits
            .parse()
            .map_err(|_| format!("expected a number before '{c}' in '{input}'"))?;
        digits.clear();

        let unit = match c {
            's' => 1,
            'm' if chars.peek() == Some(&'o') => {
                chars.next();
                MONTH
            }
            'm' => MINUTE,
            'h' => HOUR,
            'd' => DAY,
            'w' => WEEK,
            'y' => YEAR,
            other => return Err(format!("unknown duration unit '{other}' in '{input}'")),
        };

        total += value * unit;
    }

    if !digits.is_empty() {
        return Err(format!("missing unit after '{digits}' in '{input}'"));
    }

    Ok(total)
}

/// Render an age in seconds as its largest round unit: `45s`, `3h`, `2d`.
pub fn format_age(secs: i64) -> String {
    let secs = secs.max(0);

    match secs {
        s if s >= YEAR => format!("{}y", s / YEAR),
        s if s >= MONTH => format!("{}mo", s / MONTH),
        s if s >= WEEK => format!("{}w", s / WEEK),
        s if s >= DAY => format!("{}d", s / DAY),
        s if s >= HOUR => format!("{}h", s / HOUR),
        s if s >= MINUTE => format!("{}m", s / MINUTE),
        s => format!("{s}s"),
    }
}
