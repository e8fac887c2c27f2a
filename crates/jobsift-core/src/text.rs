//! Free-text helpers shared by collectors, extraction and the filter gate.

use chrono::NaiveDate;

use crate::SalaryRange;

const HOURS_PER_MONTH: f64 = 174.0;

pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Trimmed value, or `None` when nothing but whitespace remains.
pub fn text_or_none(value: impl AsRef<str>) -> Option<String> {
    let collapsed = collapse_whitespace(value.as_ref());
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Every decimal number appearing in `text`, in order. Thousands separators are ignored.
pub fn extract_numbers(text: &str) -> Vec<f64> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut seen_dot = false;
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch.is_ascii_digit() {
            current.push(ch);
            continue;
        }
        if ch == ',' && !current.is_empty() && chars.peek().is_some_and(|c| c.is_ascii_digit()) {
            continue;
        }
        if ch == '.' && !seen_dot && !current.is_empty() {
            current.push(ch);
            seen_dot = true;
            continue;
        }
        flush_number(&mut current, &mut out);
        seen_dot = false;
    }
    flush_number(&mut current, &mut out);
    out
}

fn flush_number(current: &mut String, out: &mut Vec<f64>) {
    if current.is_empty() {
        return;
    }
    if let Ok(v) = current.trim_end_matches('.').parse::<f64>() {
        out.push(v);
    }
    current.clear();
}

/// Parses salary text such as `15-25k`, `2-3万·13薪`, `3万+`, `$120,000 - $150,000 a year`
/// or `$45/hour` into a monthly range.
pub fn parse_salary_text(text: &str) -> Option<SalaryRange> {
    let lower = text.to_lowercase();
    if lower.contains("面议") || lower.contains("negotiable") {
        return None;
    }
    // "·13薪" style bonus-month suffixes do not change the monthly figure.
    let head = lower.split('·').next().unwrap_or_default();
    let numbers = extract_numbers(head);
    let first = *numbers.first()?;

    let multiplier = if head.contains('万') {
        10_000.0
    } else if head.contains('k') || head.contains('千') {
        1_000.0
    } else {
        1.0
    };
    let annual = head.contains("/年")
        || head.contains("年薪")
        || head.contains("year")
        || head.contains("annual")
        || head.contains("/yr");
    let hourly = head.contains("/hour") || head.contains("/hr") || head.contains("hourly") || head.contains("时薪");
    let scale = |v: f64| {
        let v = v * multiplier;
        if annual {
            v / 12.0
        } else if hourly {
            v * HOURS_PER_MONTH
        } else {
            v
        }
    };

    let range = match numbers.get(1) {
        Some(second) => SalaryRange::new(scale(first), scale(*second)),
        None if head.trim_end().ends_with('+') || head.contains("以上") => {
            SalaryRange::new(scale(first), scale(first) * 1.3)
        }
        None => SalaryRange::single(scale(first)),
    };
    Some(range)
}

/// Parses dates like `2026-03-01`, `2026/3/1`, `2026年3月1日` or `26.03.01`.
pub fn parse_loose_date(text: &str) -> Option<NaiveDate> {
    let groups: Vec<i64> = text
        .split(|c: char| !c.is_ascii_digit())
        .filter(|g| !g.is_empty())
        .take(3)
        .filter_map(|g| g.parse().ok())
        .collect();
    let [year, month, day] = groups[..] else {
        return None;
    };
    let year = if year < 100 { 2000 + year } else { year };
    NaiveDate::from_ymd_opt(
        i32::try_from(year).ok()?,
        u32::try_from(month).ok()?,
        u32::try_from(day).ok()?,
    )
}

/// Four-digit years (2000..=2099) mentioned in `text`, such as graduation classes.
pub fn extract_years(text: &str) -> Vec<i32> {
    text.split(|c: char| !c.is_ascii_digit())
        .filter(|g| g.len() == 4)
        .filter_map(|g| g.parse::<i32>().ok())
        .filter(|y| (2000..=2099).contains(y))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_skip_thousands_separators() {
        assert_eq!(extract_numbers("$120,000 - $150,000"), vec![120000.0, 150000.0]);
        assert_eq!(extract_numbers("3.5 to 4"), vec![3.5, 4.0]);
    }

    #[test]
    fn salary_text_variants() {
        assert_eq!(parse_salary_text("15-25K"), Some(SalaryRange::new(15000.0, 25000.0)));
        assert_eq!(
            parse_salary_text("2-3万·13薪"),
            Some(SalaryRange::new(20000.0, 30000.0))
        );
        let plus = parse_salary_text("3万+").unwrap();
        assert_eq!(plus.min, Some(30000.0));
        assert!((plus.max.unwrap() - 39000.0).abs() < 1e-6);
        let annual = parse_salary_text("$120,000 - $144,000 a year").unwrap();
        assert_eq!(annual, SalaryRange::new(10000.0, 12000.0));
        assert_eq!(parse_salary_text("薪资面议"), None);
        assert_eq!(parse_salary_text("competitive"), None);
    }

    #[test]
    fn loose_dates() {
        assert_eq!(parse_loose_date("2026年3月1日"), NaiveDate::from_ymd_opt(2026, 3, 1));
        assert_eq!(parse_loose_date("26/12/31"), NaiveDate::from_ymd_opt(2026, 12, 31));
        assert_eq!(parse_loose_date("2026-02-30"), None);
        assert_eq!(parse_loose_date("soon"), None);
    }

    #[test]
    fn years_in_graduation_text() {
        assert_eq!(extract_years("2025届/2026届毕业生"), vec![2025, 2026]);
        assert!(extract_years("3-5 years").is_empty());
    }
}
