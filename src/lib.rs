//! Academic risk scoring for Group Scholar schools.
//!
//! [`grading`] maps marks onto the 12-point scale and [`risk`] turns a
//! student's recent exam results and attendance into a Low/Medium/High
//! classification. Both are pure: callers supply the records and the
//! reference time. [`db`] and [`ingest`] feed them from Postgres, CSV uploads
//! and JSON requests; [`report`] renders the output.

pub mod config;
pub mod db;
pub mod error;
pub mod grading;
pub mod ingest;
pub mod models;
pub mod report;
pub mod risk;

pub use error::RiskError;
pub use grading::grade_of;
pub use risk::{assess_risk, rank_at_risk, RiskWindows};
