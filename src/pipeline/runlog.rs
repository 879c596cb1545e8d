use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::fetch::FetchReport;
use crate::pipeline::pathing::equi_dir;
use crate::pipeline::scanner::{ScanOutcome, ScanSummary};
use crate::pipeline::ScalePercent;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScanReport {
    pub tour_id: String,
    pub tour_dir: String,
    pub started_at: String,
    pub finished_at: String,
    pub width: Option<u32>,
    pub scale_percent: ScalePercent,
    pub fetch: Option<FetchReport>,
    pub summary: ScanSummary,
    pub outcomes: Vec<ScanOutcome>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScanSummaryMarkerPayload {
    pub report_path: String,
    pub tour_id: String,
    pub converted: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ScanSummaryMarkerPayload {
    pub fn from_report(report_path: &Path, report: &ScanReport) -> Self {
        Self {
            report_path: report_path.display().to_string(),
            tour_id: report.tour_id.clone(),
            converted: report.summary.converted,
            skipped: report.summary.skipped_exists + report.summary.skipped_missing_faces,
            failed: report.summary.failed,
        }
    }
}

#[derive(Debug, Error)]
pub enum RunLogError {
    #[error("failed to create run-log parent directory '{path}': {message}")]
    CreateParent { path: String, message: String },
    #[error("failed to serialize run log JSON: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to write run log '{path}': {message}")]
    WriteFile { path: String, message: String },
}

pub fn scan_report_path(tour_dir: &Path, stamp: &str) -> PathBuf {
    equi_dir(tour_dir).join(format!("convert_{stamp}.json"))
}

pub fn write_pretty_json_with_newline<T>(path: &Path, value: &T) -> Result<(), RunLogError>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|error| RunLogError::CreateParent {
            path: parent.display().to_string(),
            message: error.to_string(),
        })?;
    }

    let mut bytes = serde_json::to_vec_pretty(value).map_err(RunLogError::Serialize)?;
    bytes.push(b'\n');
    fs::write(path, bytes).map_err(|error| RunLogError::WriteFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    Ok(())
}

pub fn format_summary_marker(payload: &ScanSummaryMarkerPayload) -> Result<String, RunLogError> {
    let json = serde_json::to_string(payload).map_err(RunLogError::Serialize)?;
    Ok(format!("SKYBOX_SCAN_SUMMARY_JSON: {json}"))
}

pub fn utc_timestamp_now() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

pub fn run_log_stamp_now() -> String {
    Utc::now().format("%Y%m%d-%H%M%S-%3f").to_string()
}
