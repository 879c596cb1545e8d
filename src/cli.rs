use std::path::{Path, PathBuf};

use clap::Parser;
use thiserror::Error;
use tracing::{info, warn};

use crate::fetch::{default_tour_fetcher, FetchError, FetchReport};
use crate::pipeline::pathing::{path_for_output, tour_dir, validate_tour_id, TourIdError};
use crate::pipeline::runlog::{
    format_summary_marker, run_log_stamp_now, scan_report_path, utc_timestamp_now,
    write_pretty_json_with_newline, RunLogError, ScanReport, ScanSummaryMarkerPayload,
};
use crate::pipeline::runtime_stack::default_tour_conversion_scanner;
use crate::pipeline::scanner::{ScanError, ScanOutcome, ScanStatus, ScanSummary};
use crate::pipeline::settings_layer::{
    load_app_skybox_settings, merge_skybox_settings_overlays, resolve_skybox_settings,
    SettingsLayerError, SkyboxSettingsOverlay,
};
use crate::pipeline::ScalePercent;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "skybox-equi",
    about = "Download a tour's skybox faces and stitch them into equirectangular panoramas"
)]
pub struct Cli {
    #[arg(help = "Tour (model) identifier")]
    pub tour_id: String,
    #[arg(
        long,
        value_parser = clap::value_parser!(u32).range(2..),
        help = "Output width in pixels (defaults to 4x the front face width)"
    )]
    pub width: Option<u32>,
    #[arg(
        long,
        default_value_t = 100,
        value_parser = clap::value_parser!(u8).range(1..=100),
        help = "Scale the panorama to this percentage"
    )]
    pub scale: u8,
    #[arg(long, help = "Skip downloading and only convert faces already on disk")]
    pub convert_only: bool,
    #[arg(long, env = "SKYBOX_SETTINGS", help = "Settings file (.toml or .json)")]
    pub settings: Option<String>,
    #[arg(long, help = "Directory holding one sub-directory per tour")]
    pub tours_root: Option<String>,
    #[arg(long, help = "Directory for intermediate files")]
    pub temp_dir: Option<String>,
    #[arg(long, help = "Face file marker between base name and index (may be empty)")]
    pub face_marker: Option<String>,
    #[arg(short, long, help = "Enable debug logging")]
    pub verbose: bool,
}

impl Cli {
    pub fn settings_overrides(&self) -> SkyboxSettingsOverlay {
        SkyboxSettingsOverlay {
            tours_root: self.tours_root.clone(),
            temp_dir: self.temp_dir.clone(),
            face_marker: self.face_marker.clone(),
            ..SkyboxSettingsOverlay::default()
        }
    }

    pub fn scale_percent(&self) -> Result<ScalePercent, CliError> {
        ScalePercent::new(self.scale).ok_or(CliError::InvalidScale(self.scale))
    }
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    TourId(#[from] TourIdError),
    #[error("scale must be between 1 and 100, got {0}")]
    InvalidScale(u8),
    #[error(transparent)]
    Settings(#[from] SettingsLayerError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    RunLog(#[from] RunLogError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub report_path: PathBuf,
    pub summary: ScanSummary,
    pub fetch_failures: usize,
}

impl RunOutcome {
    pub fn succeeded(&self) -> bool {
        !self.summary.has_failures() && self.fetch_failures == 0
    }
}

pub fn run(cli: &Cli, app_root: &Path) -> Result<RunOutcome, CliError> {
    let tour_id = validate_tour_id(cli.tour_id.as_str())?;
    let scale = cli.scale_percent()?;
    let file_overlay = load_app_skybox_settings(app_root, cli.settings.as_deref())?;
    let merged = merge_skybox_settings_overlays(&file_overlay, &cli.settings_overrides());
    let settings = resolve_skybox_settings(app_root, &merged);
    let tour_dir = tour_dir(settings.tours_root.as_path(), tour_id);
    let started_at = utc_timestamp_now();

    let fetch = if cli.convert_only {
        None
    } else {
        let fetcher = default_tour_fetcher(settings.tours_root.clone(), &settings.fetch)?;
        let report = fetcher.fetch_tour(tour_id)?;
        log_fetch_report(&report);
        Some(report)
    };
    let fetch_failures = fetch.as_ref().map(FetchReport::failed_count).unwrap_or(0);

    let scanner = default_tour_conversion_scanner(&settings);
    let outcomes = scanner.scan_and_convert(tour_dir.as_path(), cli.width, scale)?;
    for outcome in &outcomes {
        println!("{}", describe_outcome(settings.tours_root.as_path(), outcome));
    }

    let summary = ScanSummary::from_outcomes(&outcomes);
    let report = ScanReport {
        tour_id: tour_id.to_string(),
        tour_dir: tour_dir.display().to_string(),
        started_at,
        finished_at: utc_timestamp_now(),
        width: cli.width,
        scale_percent: scale,
        fetch,
        summary,
        outcomes,
    };
    let report_path = scan_report_path(tour_dir.as_path(), run_log_stamp_now().as_str());
    write_pretty_json_with_newline(report_path.as_path(), &report)?;
    println!(
        "{}",
        format_summary_marker(&ScanSummaryMarkerPayload::from_report(
            report_path.as_path(),
            &report
        ))?
    );
    info!(
        converted = summary.converted,
        skipped = summary.skipped_exists + summary.skipped_missing_faces,
        failed = summary.failed,
        fetch_failures,
        "tour conversion finished"
    );

    Ok(RunOutcome {
        report_path,
        summary,
        fetch_failures,
    })
}

fn log_fetch_report(report: &FetchReport) {
    info!(
        tour_id = %report.tour_id,
        tier = report.tier.path_marker(),
        downloaded = report.downloaded_count(),
        failed = report.failed_count(),
        "fetch finished"
    );
    for asset in report.failures() {
        warn!(file = %asset.catalog_name, "file could not be downloaded");
    }
}

pub fn describe_outcome(tours_root: &Path, outcome: &ScanOutcome) -> String {
    match &outcome.status {
        ScanStatus::Converted { output, dimensions } => format!(
            "converted {} -> {} ({})",
            outcome.base_name,
            path_for_output(tours_root, output),
            dimensions.geometry()
        ),
        ScanStatus::SkippedExists { output } => format!(
            "skipped {}: {} already exists",
            outcome.base_name,
            path_for_output(tours_root, output)
        ),
        ScanStatus::SkippedMissingFaces { missing } => format!(
            "skipped {}: missing faces {:?}",
            outcome.base_name, missing
        ),
        ScanStatus::Failed { stage, message } => {
            format!("failed {} during {stage}: {message}", outcome.base_name)
        }
    }
}
