use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamResult {
    pub student_id: Uuid,
    pub subject_id: Uuid,
    pub exam_id: Uuid,
    pub marks_obtained: f64,
    pub exam_created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            "late" => Some(AttendanceStatus::Late),
            "excused" => Some(AttendanceStatus::Excused),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub student_id: Uuid,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
}

/// A student's records trimmed to the scoring windows.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentSnapshot {
    pub student_id: Uuid,
    pub recent_results: Vec<ExamResult>,
    pub recent_attendance: Vec<AttendanceRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub student_id: Uuid,
    pub average_marks: f64,
    pub failed_subjects: u32,
    pub attendance_rate: f64,
    pub recent_absences: u32,
    pub risk_score: u32,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Grade {
    pub letter: &'static str,
    pub points: u8,
}

/// Roster details the storage layer returns alongside the records.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub student_id: Uuid,
    pub admission_number: String,
    pub full_name: String,
    pub class_name: String,
    pub stream: Option<String>,
}

/// A validated upload row with its grade attached, ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct GradedUpload {
    pub admission_number: String,
    pub subject_code: String,
    pub marks_obtained: f64,
    pub grade: Grade,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub duplicates: usize,
    pub unknown_students: usize,
    pub unknown_subjects: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubjectPerformance {
    pub subject_id: Uuid,
    pub subject_name: String,
    pub average_marks: f64,
    pub highest_marks: f64,
    pub lowest_marks: f64,
    pub result_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttendanceTrend {
    pub date: NaiveDate,
    pub present: usize,
    pub absent: usize,
    pub late: usize,
    pub excused: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExamInfo {
    pub exam_id: Uuid,
    pub name: String,
    pub term: String,
    pub academic_year: String,
    pub created_at: DateTime<Utc>,
}

/// One exam/subject cell of a student's performance history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentTrendPoint {
    pub exam_name: String,
    pub subject_name: String,
    pub average_marks: f64,
    pub highest_marks: f64,
    pub term: String,
    pub academic_year: String,
}
