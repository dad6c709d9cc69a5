use std::io::Read;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::RiskError;
use crate::grading;
use crate::models::{AttendanceRecord, AttendanceStatus, ExamResult, GradedUpload};
use crate::risk::RiskWindows;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawExamResult {
    pub student_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub exam_id: Option<Uuid>,
    pub marks_obtained: Option<f64>,
    pub exam_created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAttendanceRecord {
    pub student_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawStudentInput {
    pub student_id: Option<Uuid>,
    #[serde(default)]
    pub results: Vec<RawExamResult>,
    #[serde(default)]
    pub attendance: Vec<RawAttendanceRecord>,
}

/// Offline scoring request: a reference time plus per-student records.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentRequest {
    pub now: Option<DateTime<Utc>>,
    pub attendance_window_days: Option<i64>,
    pub result_window_days: Option<i64>,
    pub students: Vec<RawStudentInput>,
}

/// A student's records after every field has been checked.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentInput {
    pub student_id: Uuid,
    pub results: Vec<ExamResult>,
    pub attendance: Vec<AttendanceRecord>,
}

fn require<T>(value: Option<T>, record: &str, field: &'static str) -> Result<T, RiskError> {
    value.ok_or_else(|| RiskError::MissingField {
        record: record.to_string(),
        field,
    })
}

impl RawExamResult {
    pub fn validate(self, record: &str) -> Result<ExamResult, RiskError> {
        let marks_obtained = require(self.marks_obtained, record, "marksObtained")?;
        if !marks_obtained.is_finite() {
            return Err(RiskError::InvalidMarks {
                record: record.to_string(),
                marks: marks_obtained,
            });
        }
        Ok(ExamResult {
            student_id: require(self.student_id, record, "studentId")?,
            subject_id: require(self.subject_id, record, "subjectId")?,
            exam_id: require(self.exam_id, record, "examId")?,
            marks_obtained,
            exam_created_at: require(self.exam_created_at, record, "examCreatedAt")?,
        })
    }
}

impl RawAttendanceRecord {
    pub fn validate(self, record: &str) -> Result<AttendanceRecord, RiskError> {
        let status = require(self.status, record, "status")?;
        let status = AttendanceStatus::parse(&status).ok_or_else(|| RiskError::InvalidStatus {
            record: record.to_string(),
            status: status.clone(),
        })?;
        Ok(AttendanceRecord {
            student_id: require(self.student_id, record, "studentId")?,
            date: require(self.date, record, "date")?,
            status,
        })
    }
}

impl RawStudentInput {
    /// Records may omit `studentId`; they inherit the enclosing student's id.
    pub fn validate(self, record: &str) -> Result<StudentInput, RiskError> {
        let student_id = require(self.student_id, record, "studentId")?;

        let results = self
            .results
            .into_iter()
            .enumerate()
            .map(|(index, mut raw)| {
                raw.student_id.get_or_insert(student_id);
                raw.validate(&format!("{record} exam result #{}", index + 1))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let attendance = self
            .attendance
            .into_iter()
            .enumerate()
            .map(|(index, mut raw)| {
                raw.student_id.get_or_insert(student_id);
                raw.validate(&format!("{record} attendance record #{}", index + 1))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(StudentInput {
            student_id,
            results,
            attendance,
        })
    }
}

impl AssessmentRequest {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Windows from the request, falling back to `defaults` for any left unset.
    pub fn windows(&self, defaults: RiskWindows) -> Result<RiskWindows, RiskError> {
        RiskWindows::new(
            self.attendance_window_days
                .unwrap_or(defaults.attendance_days()),
            self.result_window_days.unwrap_or(defaults.result_days()),
        )
    }

    pub fn into_students(self) -> Result<Vec<StudentInput>, RiskError> {
        self.students
            .into_iter()
            .enumerate()
            .map(|(index, raw)| raw.validate(&format!("student #{}", index + 1)))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadRow {
    admission_number: Option<String>,
    subject_code: Option<String>,
    marks: Option<String>,
}

/// Parses an exam result upload (`admissionNumber,subjectCode,marks`) and grades
/// every row. Any row with a blank field or unreadable marks fails the upload.
pub fn parse_results_csv<R: Read>(input: R) -> anyhow::Result<Vec<GradedUpload>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(input);
    let mut uploads = Vec::new();

    for (index, row) in reader.deserialize::<UploadRow>().enumerate() {
        // Header is line 1.
        let record = format!("upload row {}", index + 2);
        let row = row?;

        let admission_number = non_blank(row.admission_number, &record, "admissionNumber")?;
        let subject_code = non_blank(row.subject_code, &record, "subjectCode")?;
        let marks_text = non_blank(row.marks, &record, "marks")?;
        let marks_obtained: f64 = marks_text.parse().map_err(|_| RiskError::InvalidMarks {
            record: format!("{record} ({marks_text:?})"),
            marks: f64::NAN,
        })?;
        if !marks_obtained.is_finite() {
            return Err(RiskError::InvalidMarks {
                record,
                marks: marks_obtained,
            }
            .into());
        }

        uploads.push(GradedUpload {
            admission_number,
            subject_code,
            marks_obtained,
            grade: grading::grade_of(marks_obtained),
        });
    }

    Ok(uploads)
}

fn non_blank(value: Option<String>, record: &str, field: &'static str) -> Result<String, RiskError> {
    require(value.filter(|v| !v.is_empty()), record, field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn missing_marks_is_a_validation_error() {
        let raw = RawExamResult {
            student_id: Some(Uuid::new_v4()),
            subject_id: Some(Uuid::new_v4()),
            exam_id: Some(Uuid::new_v4()),
            marks_obtained: None,
            exam_created_at: Some(Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap()),
        };
        let err = raw.validate("exam result #1").unwrap_err();
        assert_eq!(
            err,
            RiskError::MissingField {
                record: "exam result #1".to_string(),
                field: "marksObtained",
            }
        );
    }

    #[test]
    fn request_records_inherit_student_id() {
        let json = r#"{
            "now": "2026-03-02T09:00:00Z",
            "attendanceWindowDays": 14,
            "students": [{
                "studentId": "3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2",
                "results": [{
                    "subjectId": "0c22f1f1-9184-4fd4-9b21-28c68a6a89dc",
                    "examId": "d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2",
                    "marksObtained": 52.5,
                    "examCreatedAt": "2026-02-10T08:00:00Z"
                }],
                "attendance": [{ "date": "2026-02-27", "status": "Absent" }]
            }]
        }"#;
        let request = AssessmentRequest::from_json(json).unwrap();
        let windows = request.windows(RiskWindows::default()).unwrap();
        assert_eq!(windows.attendance_days(), 14);
        assert_eq!(windows.result_days(), 90);

        let students = request.into_students().unwrap();
        assert_eq!(students.len(), 1);
        let student = &students[0];
        assert_eq!(student.results[0].student_id, student.student_id);
        assert_eq!(student.results[0].marks_obtained, 52.5);
        assert_eq!(student.attendance[0].status, AttendanceStatus::Absent);
    }

    #[test]
    fn nested_errors_identify_the_record() {
        let json = r#"{
            "students": [
                { "studentId": "3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2" },
                {
                    "studentId": "0c22f1f1-9184-4fd4-9b21-28c68a6a89dc",
                    "attendance": [
                        { "date": "2026-02-27", "status": "present" },
                        { "status": "absent" }
                    ]
                }
            ]
        }"#;
        let err = AssessmentRequest::from_json(json)
            .unwrap()
            .into_students()
            .unwrap_err();
        assert_eq!(err.record(), Some("student #2 attendance record #2"));
        assert!(err.to_string().contains("`date`"));
    }

    #[test]
    fn unknown_status_is_rejected() {
        let raw = RawAttendanceRecord {
            student_id: Some(Uuid::new_v4()),
            date: NaiveDate::from_ymd_opt(2026, 2, 27),
            status: Some("sick".to_string()),
        };
        let err = raw.validate("attendance record #1").unwrap_err();
        assert!(matches!(err, RiskError::InvalidStatus { ref status, .. } if status == "sick"));
    }

    #[test]
    fn csv_rows_are_graded() {
        let data = "admissionNumber,subjectCode,marks\nGS-001,MAT, 81\nGS-002,ENG,39.5\n";
        let uploads = parse_results_csv(data.as_bytes()).unwrap();
        assert_eq!(uploads.len(), 2);
        assert_eq!(uploads[0].admission_number, "GS-001");
        assert_eq!(uploads[0].grade.letter, "A");
        assert_eq!(uploads[1].marks_obtained, 39.5);
        assert_eq!(uploads[1].grade.letter, "D");
        assert_eq!(uploads[1].grade.points, 3);
    }

    #[test]
    fn csv_blank_marks_fail_the_upload() {
        let data = "admissionNumber,subjectCode,marks\nGS-001,MAT,81\nGS-002,ENG,\n";
        let err = parse_results_csv(data.as_bytes()).unwrap_err();
        let risk = err.downcast_ref::<RiskError>().unwrap();
        assert_eq!(risk.record(), Some("upload row 3"));
    }

    #[test]
    fn csv_unreadable_marks_fail_the_upload() {
        let data = "admissionNumber,subjectCode,marks\nGS-001,MAT,eighty\n";
        let err = parse_results_csv(data.as_bytes()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RiskError>(),
            Some(RiskError::InvalidMarks { .. })
        ));
    }
}
