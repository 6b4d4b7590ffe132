mod config_cmd;
mod customer;
mod invoice;
mod measurement;
mod order;
mod sync_cmd;
mod template;

pub use config_cmd::ConfigCommand;
pub use customer::CustomerCommand;
pub use invoice::InvoiceCommand;
pub use measurement::MeasurementCommand;
pub use order::OrderCommand;
pub use sync_cmd::{auto_sync, SyncCommand};
pub use template::TemplateCommand;

use std::io::{self, Write};

use clap::ValueEnum;
use uuid::Uuid;

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Parses a record id given on the command line.
pub(crate) fn parse_id(kind: &str, identifier: &str) -> Result<Uuid, String> {
    Uuid::parse_str(identifier).map_err(|_| format!("Invalid {} ID: {}", kind, identifier))
}

/// Asks a yes/no question on stdin. Anything but `y` means no.
pub(crate) fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

/// Truncates `value` to `width` characters for table output.
pub(crate) fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() > width {
        let cut: String = value.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        value.to_string()
    }
}

/// Parses `label=value` pairs such as `chest=40.5`.
pub(crate) fn parse_value_pair(pair: &str) -> Result<(String, f64), String> {
    let (label, value) = pair
        .split_once('=')
        .ok_or_else(|| format!("Expected LABEL=VALUE, got '{}'", pair))?;
    let label = label.trim();
    if label.is_empty() {
        return Err(format!("Missing label in '{}'", pair));
    }
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number in '{}'", pair))?;
    Ok((label.to_string(), value))
}

/// Parses a `YYYY-MM-DD` date into epoch milliseconds at UTC midnight.
pub(crate) fn parse_date(date: &str) -> Result<i64, String> {
    let parsed = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|_| format!("Invalid date '{}'. Use YYYY-MM-DD format.", date))?;
    parsed
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .ok_or_else(|| format!("Invalid date '{}'", date))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_pair() {
        assert_eq!(
            parse_value_pair("chest=40.5").unwrap(),
            ("chest".to_string(), 40.5)
        );
        assert_eq!(
            parse_value_pair(" waist = 32 ").unwrap(),
            ("waist".to_string(), 32.0)
        );
        assert!(parse_value_pair("chest").is_err());
        assert!(parse_value_pair("=4").is_err());
        assert!(parse_value_pair("chest=wide").is_err());
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("1970-01-02").unwrap(), 86_400_000);
        assert!(parse_date("02/01/1970").is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a very long customer name", 10), "a very ...");
    }

    #[test]
    fn test_parse_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id("order", &id.to_string()).unwrap(), id);
        assert!(parse_id("order", "nope")
            .unwrap_err()
            .contains("Invalid order ID"));
    }
}
