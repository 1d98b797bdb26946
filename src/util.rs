//! Small utility helpers used across modules.

use chrono::{NaiveDate, Utc};

/// Answer comparison key: whitespace-trimmed, case-folded.
/// "  Echo " and "echo" compare equal; nothing fancier than that.
pub fn normalize_answer(s: &str) -> String {
  s.trim().to_lowercase()
}

/// Current UTC calendar day. The day boundary is UTC midnight everywhere;
/// there is no per-user timezone handling.
pub fn utc_today() -> NaiveDate {
  Utc::now().date_naive()
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let cut: String = s.chars().take(max).collect();
  format!("{}… ({} bytes total)", cut, s.len())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn normalize_trims_and_folds_case() {
    assert_eq!(normalize_answer("  Echo "), "echo");
    assert_eq!(normalize_answer("PIANO"), "piano");
    assert_ne!(normalize_answer("two words"), normalize_answer("twowords"));
  }
}
