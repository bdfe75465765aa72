use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::Serialize;

/// Wire value meaning "every class".
pub const ALL_CLASSES: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub class: String,
    pub student_name: String,
    pub attendance_date: NaiveDate,
    pub redeemed: bool,
    pub redeem_date: Option<NaiveDate>,
}

impl AttendanceRecord {
    pub fn new(class: &str, student_name: &str, attendance_date: NaiveDate) -> Self {
        Self {
            class: class.trim().to_string(),
            student_name: student_name.trim().to_string(),
            attendance_date,
            redeemed: false,
            redeem_date: None,
        }
    }

    pub fn redeemed_on(mut self, redeem_date: NaiveDate) -> Self {
        self.redeemed = true;
        self.redeem_date = Some(redeem_date);
        self
    }

    pub fn key(&self) -> NaturalKey {
        NaturalKey {
            class: self.class.clone(),
            student_name: self.student_name.clone(),
            attendance_date: self.attendance_date,
        }
    }

    pub fn matches(&self, key: &NaturalKey) -> bool {
        self.class == key.class
            && self.student_name == key.student_name
            && self.attendance_date == key.attendance_date
    }
}

/// (class, studentName, attendanceDate): identifies one attendance row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NaturalKey {
    pub class: String,
    pub student_name: String,
    pub attendance_date: NaiveDate,
}

impl NaturalKey {
    pub fn new(class: &str, student_name: &str, attendance_date: NaiveDate) -> Self {
        Self {
            class: class.trim().to_string(),
            student_name: student_name.trim().to_string(),
            attendance_date,
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} / {} / {}",
            self.class, self.student_name, self.attendance_date
        )
    }
}

/// Canonical student shape. Roster rows, CSV rows and JSON payloads are all
/// normalised into this at the point they enter the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StudentRef {
    pub name: String,
    pub class: String,
}

impl StudentRef {
    pub fn new(name: &str, class: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            class: class.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAggregate {
    pub class: String,
    pub student_name: String,
    pub attendance_count: usize,
    pub attendance_dates: Vec<NaiveDate>,
    pub is_fully_redeemed: bool,
    pub redemption_status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStats {
    pub total_records: usize,
    pub achieved_students: usize,
    pub redeemed_count: usize,
    pub class: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionSummary {
    pub class: String,
    pub total_records: usize,
    pub redeemed_records: usize,
    pub outstanding_records: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingStudent {
    pub student_name: String,
    pub pending_dates: Vec<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassPending {
    pub class: String,
    pub students: Vec<PendingStudent>,
    pub pending_records: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    #[serde(flatten)]
    pub key: NaturalKey,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub applied_count: usize,
    pub failed: Vec<BatchFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMode {
    /// Reject the entry when its natural key is already present.
    Create,
    /// Overwrite the redemption fields of an existing entry.
    Upsert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub email: String,
    pub role: Role,
    pub classes: Vec<String>,
    pub default_class: String,
}

impl UserProfile {
    /// Profile handed to any signed-in email without a users row.
    pub fn unregistered(email: &str) -> Self {
        Self {
            email: normalize_email(email),
            role: Role::Teacher,
            classes: Vec::new(),
            default_class: String::new(),
        }
    }

    /// Builds a profile from the loosely typed columns of a users row.
    pub fn from_columns(email: &str, role: &str, classes: &str, default_class: &str) -> Self {
        Self {
            email: normalize_email(email),
            role: role.parse().unwrap_or(Role::Teacher),
            classes: parse_class_list(classes),
            default_class: default_class.trim().to_string(),
        }
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Splits a users-row class cell such as `"C1, C2 C3"`.
pub fn parse_class_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassFilter {
    All,
    Class(String),
}

impl ClassFilter {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw == ALL_CLASSES {
            ClassFilter::All
        } else {
            ClassFilter::Class(raw.to_string())
        }
    }

    pub fn matches(&self, class: &str) -> bool {
        match self {
            ClassFilter::All => true,
            ClassFilter::Class(name) => name == class,
        }
    }
}

impl fmt::Display for ClassFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassFilter::All => f.write_str(ALL_CLASSES),
            ClassFilter::Class(name) => f.write_str(name),
        }
    }
}

/// Accepts `YYYY-MM-DD`, and the `YYYY-MM-DDT...` form spreadsheets emit
/// for date cells.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let day = match raw.split_once('T') {
        Some((day, _)) => day,
        None => raw,
    };
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "y" | "是"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_filter_star_means_all() {
        assert_eq!(ClassFilter::parse("*"), ClassFilter::All);
        assert_eq!(ClassFilter::parse(" C1 "), ClassFilter::Class("C1".into()));
        assert!(ClassFilter::All.matches("anything"));
        assert!(!ClassFilter::Class("C1".into()).matches("C2"));
        assert_eq!(ClassFilter::All.to_string(), "*");
    }

    #[test]
    fn class_list_splits_on_commas_and_spaces() {
        assert_eq!(parse_class_list("C1, C2  C3,"), vec!["C1", "C2", "C3"]);
        assert!(parse_class_list("").is_empty());
    }

    #[test]
    fn profile_from_columns_defaults_to_teacher() {
        let profile = UserProfile::from_columns(" Someone@Parish.example ", "", "C4", "C4");
        assert_eq!(profile.email, "someone@parish.example");
        assert_eq!(profile.role, Role::Teacher);
        assert_eq!(profile.classes, vec!["C4"]);

        let admin = UserProfile::from_columns("a@parish.example", "ADMIN", "", "");
        assert_eq!(admin.role, Role::Admin);
    }

    #[test]
    fn dates_accept_spreadsheet_timestamps() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 7);
        assert_eq!(parse_date("2024-01-07"), expected);
        assert_eq!(parse_date("2024-01-07T00:00:00.000Z"), expected);
        assert_eq!(parse_date("07/01/2024"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn records_serialize_with_camel_case_fields() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 7).unwrap();
        let record = AttendanceRecord::new("C1", "Alice", date);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["studentName"], "Alice");
        assert_eq!(value["attendanceDate"], "2024-01-07");
        assert_eq!(value["redeemDate"], serde_json::Value::Null);
    }
}
