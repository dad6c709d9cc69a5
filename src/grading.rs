use crate::models::Grade;

/// Lower bound, letter and points of each band, highest first.
const GRADE_SCALE: [(f64, &str, u8); 11] = [
    (80.0, "A", 12),
    (75.0, "A-", 11),
    (70.0, "B+", 10),
    (65.0, "B", 9),
    (60.0, "B-", 8),
    (55.0, "C+", 7),
    (50.0, "C", 6),
    (45.0, "C-", 5),
    (40.0, "D+", 4),
    (35.0, "D", 3),
    (30.0, "D-", 2),
];

const LOWEST: Grade = Grade {
    letter: "E",
    points: 1,
};

/// Maps marks onto the 12-point scale. Out-of-range marks are not rejected:
/// anything above 100 grades as A and anything below 30 (NaN included) as E.
pub fn grade_of(marks: f64) -> Grade {
    GRADE_SCALE
        .iter()
        .find(|(threshold, _, _)| marks >= *threshold)
        .map(|&(_, letter, points)| Grade { letter, points })
        .unwrap_or(LOWEST)
}
