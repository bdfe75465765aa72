use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;

use crate::collation;
use crate::error::LedgerError;
use crate::models::{
    AttendanceRecord, ClassFilter, ClassPending, LedgerStats, NaturalKey, PendingStudent,
    RecordMode, RedemptionSummary, StudentAggregate,
};

/// Attendance rows indexed by natural key.
///
/// Rows are kept in arrival order. A snapshot read from a spreadsheet-like
/// store may hold the same key more than once, so the index maps a key to
/// every row carrying it; rows added through [`Ledger::record_attendance`]
/// never create such duplicates.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    records: Vec<AttendanceRecord>,
    index: HashMap<NaturalKey, Vec<usize>>,
}

impl Ledger {
    pub fn from_records(records: Vec<AttendanceRecord>) -> Self {
        let mut index: HashMap<NaturalKey, Vec<usize>> = HashMap::new();
        for (pos, record) in records.iter().enumerate() {
            index.entry(record.key()).or_default().push(pos);
        }
        Self { records, index }
    }

    pub fn records(&self) -> &[AttendanceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn record_attendance(
        &mut self,
        entry: AttendanceRecord,
        mode: RecordMode,
    ) -> Result<(), LedgerError> {
        let entry = validate_entry(entry)?;
        let key = entry.key();

        if let Some(rows) = self.index.get(&key) {
            if mode == RecordMode::Create {
                return Err(LedgerError::DuplicateEntry(key));
            }
            for &pos in rows {
                let existing = &mut self.records[pos];
                existing.redeemed = entry.redeemed;
                existing.redeem_date = entry.redeem_date;
            }
            return Ok(());
        }

        self.index.insert(key, vec![self.records.len()]);
        self.records.push(entry);
        Ok(())
    }

    /// Marks every row with `key` as redeemed on `redeem_date`. Applying the
    /// same update twice leaves the same state.
    pub fn update_redeem_status(
        &mut self,
        key: &NaturalKey,
        redeem_date: NaiveDate,
    ) -> Result<(), LedgerError> {
        let rows = self
            .index
            .get(key)
            .ok_or_else(|| LedgerError::NotFound(key.clone()))?;
        for &pos in rows {
            let record = &mut self.records[pos];
            record.redeemed = true;
            record.redeem_date = Some(redeem_date);
        }
        Ok(())
    }
}

/// Checks the fields a new row must carry and normalises the redemption
/// pair: a redeemed row needs a date, an unredeemed row never keeps one.
pub fn validate_entry(mut entry: AttendanceRecord) -> Result<AttendanceRecord, LedgerError> {
    entry.class = entry.class.trim().to_string();
    entry.student_name = entry.student_name.trim().to_string();

    if entry.class.is_empty() {
        return Err(LedgerError::validation("class is required"));
    }
    if entry.class == crate::models::ALL_CLASSES {
        return Err(LedgerError::validation(
            "attendance must be recorded against a single class",
        ));
    }
    if entry.student_name.is_empty() {
        return Err(LedgerError::validation("studentName is required"));
    }
    if entry.redeemed && entry.redeem_date.is_none() {
        return Err(LedgerError::validation(
            "redeemDate is required when redeemed is set",
        ));
    }
    if !entry.redeemed {
        entry.redeem_date = None;
    }
    Ok(entry)
}

fn filtered<'a>(
    records: &'a [AttendanceRecord],
    filter: &'a ClassFilter,
) -> impl Iterator<Item = &'a AttendanceRecord> + 'a {
    records.iter().filter(move |r| filter.matches(&r.class))
}

/// Groups rows by (class, studentName). Group sizes always add up to the
/// number of rows passed in.
pub fn group_by_student<'a>(
    records: impl IntoIterator<Item = &'a AttendanceRecord>,
) -> HashMap<(&'a str, &'a str), Vec<&'a AttendanceRecord>> {
    let mut groups: HashMap<(&str, &str), Vec<&AttendanceRecord>> = HashMap::new();
    for record in records {
        groups
            .entry((record.class.as_str(), record.student_name.as_str()))
            .or_default()
            .push(record);
    }
    groups
}

pub fn achieved_students(
    records: &[AttendanceRecord],
    filter: &ClassFilter,
    threshold: usize,
) -> Vec<StudentAggregate> {
    let mut achieved: Vec<StudentAggregate> = group_by_student(filtered(records, filter))
        .into_iter()
        .filter_map(|((class, name), rows)| {
            let dates: BTreeSet<NaiveDate> = rows.iter().map(|r| r.attendance_date).collect();
            if dates.len() < threshold {
                return None;
            }
            let redeemed = rows.iter().filter(|r| r.redeemed).count();
            Some(StudentAggregate {
                class: class.to_string(),
                student_name: name.to_string(),
                attendance_count: dates.len(),
                attendance_dates: dates.into_iter().collect(),
                is_fully_redeemed: redeemed == rows.len(),
                redemption_status: format!("{redeemed}/{} redeemed", rows.len()),
            })
        })
        .collect();

    collation::sort_by_class_and_name(&mut achieved, |s| {
        (s.class.as_str(), s.student_name.as_str())
    });
    achieved
}

pub fn compute_stats(
    records: &[AttendanceRecord],
    filter: &ClassFilter,
    threshold: usize,
) -> LedgerStats {
    let achieved = achieved_students(records, filter, threshold);
    LedgerStats {
        total_records: filtered(records, filter).count(),
        achieved_students: achieved.len(),
        redeemed_count: achieved.iter().filter(|s| s.is_fully_redeemed).count(),
        class: filter.to_string(),
    }
}

/// Rows still waiting for a reward, ordered by class, student, date.
pub fn unredeemed_records(records: &[AttendanceRecord]) -> Vec<AttendanceRecord> {
    let mut pending: Vec<AttendanceRecord> =
        records.iter().filter(|r| !r.redeemed).cloned().collect();
    sort_records(&mut pending);
    pending
}

/// Every row of one class, ordered by student then date.
pub fn class_details(records: &[AttendanceRecord], class: &str) -> Vec<AttendanceRecord> {
    let mut rows: Vec<AttendanceRecord> = records
        .iter()
        .filter(|r| r.class == class)
        .cloned()
        .collect();
    sort_records(&mut rows);
    rows
}

fn sort_records(records: &mut [AttendanceRecord]) {
    records.sort_by_key(|r| r.attendance_date);
    // stable: dates stay ascending inside each student
    collation::sort_by_class_and_name(records, |r| (r.class.as_str(), r.student_name.as_str()));
}

pub fn redemption_summary(records: &[AttendanceRecord], filter: &ClassFilter) -> RedemptionSummary {
    let (redeemed, outstanding) =
        filtered(records, filter).fold((0, 0), |(redeemed, outstanding), r| {
            if r.redeemed {
                (redeemed + 1, outstanding)
            } else {
                (redeemed, outstanding + 1)
            }
        });
    RedemptionSummary {
        class: filter.to_string(),
        total_records: redeemed + outstanding,
        redeemed_records: redeemed,
        outstanding_records: outstanding,
    }
}

/// Unredeemed rows grouped per class and student.
pub fn pending_by_class(records: &[AttendanceRecord], filter: &ClassFilter) -> Vec<ClassPending> {
    let pending: Vec<AttendanceRecord> = filtered(records, filter)
        .filter(|r| !r.redeemed)
        .cloned()
        .collect();

    let mut report: Vec<ClassPending> = Vec::new();
    for record in unredeemed_records(&pending) {
        if report.last().map(|c| c.class != record.class).unwrap_or(true) {
            report.push(ClassPending {
                class: record.class.clone(),
                students: Vec::new(),
                pending_records: 0,
            });
        }
        let Some(class) = report.last_mut() else {
            continue;
        };
        class.pending_records += 1;
        match class.students.last_mut() {
            Some(student) if student.student_name == record.student_name => {
                student.pending_dates.push(record.attendance_date);
            }
            _ => class.students.push(PendingStudent {
                student_name: record.student_name,
                pending_dates: vec![record.attendance_date],
            }),
        }
    }
    report
}
