use std::fmt::Write;

use chrono::NaiveDate;

use crate::ledger;
use crate::models::{AttendanceRecord, ClassFilter};

fn format_dates(dates: &[NaiveDate]) -> String {
    dates
        .iter()
        .map(NaiveDate::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn build_report(
    filter: &ClassFilter,
    threshold: usize,
    generated_on: NaiveDate,
    records: &[AttendanceRecord],
) -> String {
    let stats = ledger::compute_stats(records, filter, threshold);
    let summary = ledger::redemption_summary(records, filter);
    let achieved = ledger::achieved_students(records, filter, threshold);
    let pending = ledger::pending_by_class(records, filter);

    let mut output = String::new();
    let class_label = match filter {
        ClassFilter::All => "all classes".to_string(),
        ClassFilter::Class(name) => format!("class {name}"),
    };

    let _ = writeln!(output, "# Mass Attendance Report");
    let _ = writeln!(
        output,
        "Generated for {} on {} (reward after {} visits)",
        class_label, generated_on, threshold
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(output, "- Attendance records: {}", stats.total_records);
    let _ = writeln!(output, "- Students reaching the reward: {}", stats.achieved_students);
    let _ = writeln!(output, "- Rewards fully handed out: {}", stats.redeemed_count);
    let _ = writeln!(
        output,
        "- Records redeemed / outstanding: {} / {}",
        summary.redeemed_records, summary.outstanding_records
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students Reaching the Reward");

    if achieved.is_empty() {
        let _ = writeln!(output, "No student has reached the reward yet.");
    } else {
        for student in achieved.iter() {
            let _ = writeln!(
                output,
                "- [{}] {} ({}) {} visits, {}: {}",
                if student.is_fully_redeemed { "x" } else { " " },
                student.student_name,
                student.class,
                student.attendance_count,
                student.redemption_status,
                format_dates(&student.attendance_dates)
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Pending Redemptions");

    if pending.is_empty() {
        let _ = writeln!(output, "Nothing waiting to be redeemed.");
    } else {
        for class in pending.iter() {
            let _ = writeln!(output, "### {} ({} records)", class.class, class.pending_records);
            for student in class.students.iter() {
                let _ = writeln!(
                    output,
                    "- {}: {}",
                    student.student_name,
                    format_dates(&student.pending_dates)
                );
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::seed_records;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()
    }

    #[test]
    fn report_lists_achieved_and_pending() {
        let report = build_report(&ClassFilter::All, 3, today(), &seed_records());
        assert!(report.contains("Generated for all classes on 2024-02-01"));
        assert!(report.contains("- Attendance records: 9"));
        assert!(report.contains("- Students reaching the reward: 2"));
        assert!(report.contains(
            "- [ ] 陳小明 (C1) 3 visits, 1/3 redeemed: 2024-01-07, 2024-01-14, 2024-01-21"
        ));
        assert!(report.contains("- [x] 王大同 (C2) 3 visits, 3/3 redeemed"));
        assert!(report.contains("### C1 (4 records)"));
        assert!(report.contains("- 林美華: 2024-01-07, 2024-01-14"));
    }

    #[test]
    fn empty_report_says_so() {
        let report = build_report(&ClassFilter::parse("C9"), 3, today(), &seed_records());
        assert!(report.contains("Generated for class C9"));
        assert!(report.contains("- Attendance records: 0"));
        assert!(report.contains("No student has reached the reward yet."));
        assert!(report.contains("Nothing waiting to be redeemed."));
    }
}
