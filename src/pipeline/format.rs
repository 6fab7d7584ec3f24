//! Answer Formatter - cosmetic post-processing of the summary text
//!
//! Pure string transformations; anything that fails to parse is left as it
//! was. The summary content itself is never changed, only its rendering.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

static ISO_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})(?:[T ]\d{2}:\d{2}(?::\d{2})?(?:\.\d+)?Z?)?\b")
        .unwrap()
});

static DOLLARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\s*([0-9][0-9,]*(?:\.[0-9]+)?)").unwrap());

static SPACE_BEFORE_PERCENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+%").unwrap());
static SPACE_BEFORE_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+,").unwrap());

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Polish the summary: humanized dates, abbreviated dollars, tidy spacing,
/// and a date-range phrase when the question had one and the answer lost it
pub fn polish_answer(question: &str, answer: &str) -> String {
    let mut out = humanize_dates(answer);
    out = abbreviate_dollars(&out);
    out = tidy_spacing(&out);
    prepend_range(question, &out)
}

/// `2024-11-11` and ISO timestamps become `November 11th 2024`
fn humanize_dates(text: &str) -> String {
    ISO_DATE
        .replace_all(text, |caps: &regex::Captures| {
            match parse_date(&caps[1], &caps[2], &caps[3]) {
                Some(words) => words,
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn parse_date(y: &str, m: &str, d: &str) -> Option<String> {
    let year: i32 = y.parse().ok()?;
    let month: u32 = m.parse().ok()?;
    let day: u32 = d.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)?;
    Some(format!(
        "{} {}{} {}",
        MONTHS[(month - 1) as usize],
        day,
        ordinal_suffix(day),
        year
    ))
}

fn ordinal_suffix(day: u32) -> &'static str {
    match day % 100 {
        11..=13 => "th",
        _ => match day % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        },
    }
}

/// `$2,400,000` becomes `$2.4M`
fn abbreviate_dollars(text: &str) -> String {
    DOLLARS
        .replace_all(text, |caps: &regex::Captures| {
            let digits = caps[1].replace(',', "");
            match digits.parse::<f64>() {
                Ok(v) if v >= 1_000.0 => format!("${}", abbreviate(v)),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn abbreviate(value: f64) -> String {
    let (scaled, unit) = if value >= 1e12 {
        (value / 1e12, "T")
    } else if value >= 1e9 {
        (value / 1e9, "B")
    } else if value >= 1e6 {
        (value / 1e6, "M")
    } else {
        (value / 1e3, "K")
    };
    let rendered = format!("{:.2}", scaled);
    let rendered = rendered.trim_end_matches('0').trim_end_matches('.');
    format!("{}{}", rendered, unit)
}

fn tidy_spacing(text: &str) -> String {
    let out = SPACE_BEFORE_PERCENT.replace_all(text, "%");
    SPACE_BEFORE_COMMA.replace_all(&out, ",").into_owned()
}

/// When the question named an ISO range and the answer carries no date at
/// all, lead with the range
fn prepend_range(question: &str, answer: &str) -> String {
    let dates: Vec<String> = ISO_DATE
        .captures_iter(question)
        .filter_map(|c| parse_date(&c[1], &c[2], &c[3]))
        .collect();
    if dates.len() < 2 {
        return answer.to_string();
    }
    let has_date = ISO_DATE.is_match(answer) || MONTHS.iter().any(|m| answer.contains(m));
    if has_date {
        return answer.to_string();
    }
    format!("From {} to {}, {}", dates[0], dates[1], answer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_date_humanized() {
        assert_eq!(
            humanize_dates("peak on 2024-11-11 overall"),
            "peak on November 11th 2024 overall"
        );
    }

    #[test]
    fn test_timestamp_humanized() {
        assert_eq!(
            humanize_dates("at 2024-03-01T05:30:00Z it peaked"),
            "at March 1st 2024 it peaked"
        );
    }

    #[test]
    fn test_invalid_date_left_alone() {
        assert_eq!(humanize_dates("code 2024-13-40 stays"), "code 2024-13-40 stays");
    }

    #[test]
    fn test_ordinals() {
        assert_eq!(ordinal_suffix(1), "st");
        assert_eq!(ordinal_suffix(2), "nd");
        assert_eq!(ordinal_suffix(3), "rd");
        assert_eq!(ordinal_suffix(4), "th");
        assert_eq!(ordinal_suffix(11), "th");
        assert_eq!(ordinal_suffix(12), "th");
        assert_eq!(ordinal_suffix(13), "th");
        assert_eq!(ordinal_suffix(21), "st");
    }

    #[test]
    fn test_dollar_abbreviation() {
        assert_eq!(abbreviate_dollars("volume was $2,400,000"), "volume was $2.4M");
        assert_eq!(abbreviate_dollars("$1,200,000,000 total"), "$1.2B total");
        assert_eq!(abbreviate_dollars("fee of $1500"), "fee of $1.5K");
        assert_eq!(abbreviate_dollars("price is $42.50"), "price is $42.50");
    }

    #[test]
    fn test_spacing_tidied() {
        assert_eq!(tidy_spacing("83.12 % , roughly"), "83.12%, roughly");
    }

    #[test]
    fn test_range_prepended_when_answer_has_no_date() {
        let out = polish_answer(
            "volume between 2024-01-01 and 2024-02-01",
            "Total volume was $3,000,000.",
        );
        assert_eq!(
            out,
            "From January 1st 2024 to February 1st 2024, Total volume was $3M."
        );
    }

    #[test]
    fn test_range_not_prepended_when_answer_dated() {
        let out = polish_answer(
            "volume between 2024-01-01 and 2024-02-01",
            "Peak was on 2024-01-15.",
        );
        assert_eq!(out, "Peak was on January 15th 2024.");
    }
}
