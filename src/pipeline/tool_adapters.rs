pub mod command_table;
pub mod panorama_tags;

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

#[cfg(test)]
use crate::pipeline::runtime::CommandOutput;
use crate::pipeline::runtime::{CommandSpec, PipelineCommandRunner, PipelineRuntimeError};
use crate::pipeline::{Dimensions, OrderedFaces};

pub use command_table::{
    Capability, ToolBinaryOverrides, ToolCommandTable, ToolInvocation, ToolPlatform,
};
pub use panorama_tags::{PanoramaTags, DEFAULT_MODEL_TAG};

pub const MONTAGE_TILE: &str = "6x1";
pub const MONTAGE_GEOMETRY: &str = "x+0+0";
pub const FORMAT_QUALITY: &str = "100";

/// One blocking operation per external capability the converter relies on.
pub trait SkyboxToolOps: Send + Sync + 'static {
    fn stitch(&self, faces: &OrderedFaces, output: &Path) -> Result<(), ToolAdapterError>;
    fn probe_width(&self, raster: &Path) -> Result<u32, ToolAdapterError>;
    fn project(
        &self,
        input: &Path,
        output: &Path,
        dimensions: Dimensions,
    ) -> Result<(), ToolAdapterError>;
    fn format(&self, input: &Path, output: &Path) -> Result<(), ToolAdapterError>;
    fn resize(
        &self,
        input: &Path,
        output: &Path,
        dimensions: Dimensions,
    ) -> Result<(), ToolAdapterError>;
    fn tag_panorama(&self, raster: &Path, tags: &PanoramaTags) -> Result<(), ToolAdapterError>;
}

pub type SharedSkyboxToolOps = Arc<dyn SkyboxToolOps>;

#[derive(Debug, Clone)]
pub struct CommandToolAdapters<R> {
    runner: R,
    table: ToolCommandTable,
}

impl<R> CommandToolAdapters<R>
where
    R: PipelineCommandRunner,
{
    pub fn new(table: ToolCommandTable, runner: R) -> Self {
        Self { runner, table }
    }

    pub fn build_stitch_command(&self, faces: &OrderedFaces, output: &Path) -> CommandSpec {
        let mut args: Vec<String> = faces
            .montage_sequence()
            .iter()
            .map(|path| path_arg(path))
            .collect();
        args.push(String::from("-tile"));
        args.push(String::from(MONTAGE_TILE));
        args.push(String::from("-geometry"));
        args.push(String::from(MONTAGE_GEOMETRY));
        args.push(path_arg(output));
        self.table.command(Capability::Stitch, args)
    }

    pub fn build_probe_command(&self, raster: &Path) -> CommandSpec {
        let args = vec![
            String::from("-v"),
            String::from("error"),
            String::from("-select_streams"),
            String::from("v:0"),
            String::from("-show_entries"),
            String::from("stream=width"),
            String::from("-of"),
            String::from("default=noprint_wrappers=1:nokey=1"),
            path_arg(raster),
        ];
        self.table.command(Capability::Probe, args)
    }

    pub fn build_project_command(
        &self,
        input: &Path,
        output: &Path,
        dimensions: Dimensions,
    ) -> CommandSpec {
        let args = vec![
            String::from("-hide_banner"),
            String::from("-loglevel"),
            String::from("error"),
            // Temp outputs are reserved on disk before the tool runs.
            String::from("-y"),
            String::from("-i"),
            path_arg(input),
            String::from("-vf"),
            format!(
                "v360=c6x1:equirect:w={}:h={}",
                dimensions.width, dimensions.height
            ),
            path_arg(output),
        ];
        self.table.command(Capability::Project, args)
    }

    pub fn build_format_command(&self, input: &Path, output: &Path) -> CommandSpec {
        let args = vec![
            path_arg(input),
            String::from("-quality"),
            String::from(FORMAT_QUALITY),
            path_arg(output),
        ];
        self.table.command(Capability::Format, args)
    }

    pub fn build_resize_command(
        &self,
        input: &Path,
        output: &Path,
        dimensions: Dimensions,
    ) -> CommandSpec {
        // `!` forces the exact size; plain WxH keeps the aspect ratio and can
        // come out a pixel short of what the panorama tags record.
        let args = vec![
            path_arg(input),
            String::from("-resize"),
            format!("{}!", dimensions.geometry()),
            path_arg(output),
        ];
        self.table.command(Capability::Resize, args)
    }

    pub fn build_tag_command(&self, raster: &Path, tags: &PanoramaTags) -> CommandSpec {
        let mut args = vec![String::from("-overwrite_original"), String::from("-q")];
        args.extend(tags.exiftool_assignments());
        args.push(path_arg(raster));
        self.table.command(Capability::Tag, args)
    }

    fn run_checked(&self, spec: CommandSpec) -> Result<String, ToolAdapterError> {
        let output = self
            .runner
            .run(&spec)
            .map_err(ToolAdapterError::CommandRunner)?;
        if !output.success() {
            return Err(ToolAdapterError::CommandFailed {
                program: spec.program,
                status_code: output.status_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(output.stdout)
    }
}

impl<R> SkyboxToolOps for CommandToolAdapters<R>
where
    R: PipelineCommandRunner,
{
    fn stitch(&self, faces: &OrderedFaces, output: &Path) -> Result<(), ToolAdapterError> {
        self.run_checked(self.build_stitch_command(faces, output))
            .map(drop)
    }

    fn probe_width(&self, raster: &Path) -> Result<u32, ToolAdapterError> {
        let spec = self.build_probe_command(raster);
        let program = spec.program.clone();
        let stdout = self.run_checked(spec)?;
        parse_probe_width(stdout.as_str())
            .ok_or(ToolAdapterError::InvalidProbeOutput { program, stdout })
    }

    fn project(
        &self,
        input: &Path,
        output: &Path,
        dimensions: Dimensions,
    ) -> Result<(), ToolAdapterError> {
        self.run_checked(self.build_project_command(input, output, dimensions))
            .map(drop)
    }

    fn format(&self, input: &Path, output: &Path) -> Result<(), ToolAdapterError> {
        self.run_checked(self.build_format_command(input, output))
            .map(drop)
    }

    fn resize(
        &self,
        input: &Path,
        output: &Path,
        dimensions: Dimensions,
    ) -> Result<(), ToolAdapterError> {
        self.run_checked(self.build_resize_command(input, output, dimensions))
            .map(drop)
    }

    fn tag_panorama(&self, raster: &Path, tags: &PanoramaTags) -> Result<(), ToolAdapterError> {
        self.run_checked(self.build_tag_command(raster, tags))
            .map(drop)
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn parse_probe_width(stdout: &str) -> Option<u32> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.parse::<u32>().ok())
        .filter(|width| *width > 0)
}

#[derive(Debug, Error)]
pub enum ToolAdapterError {
    #[error("tool adapter command runner error: {0}")]
    CommandRunner(#[source] PipelineRuntimeError),
    #[error("tool command failed ({program}) with exit code {status_code}: {stderr}")]
    CommandFailed {
        program: String,
        status_code: i32,
        stdout: String,
        stderr: String,
    },
    #[error("{program} reported an unusable width: {stdout:?}")]
    InvalidProbeOutput { program: String, stdout: String },
}

impl ToolAdapterError {
    /// Captured tool output, surfaced verbatim to the operator.
    pub fn diagnostic(&self) -> String {
        match self {
            Self::CommandFailed { stdout, stderr, .. } => {
                let stderr = stderr.trim();
                if stderr.is_empty() {
                    stdout.trim().to_string()
                } else {
                    stderr.to_string()
                }
            }
            Self::InvalidProbeOutput { stdout, .. } => stdout.trim().to_string(),
            Self::CommandRunner(err) => err.to_string(),
        }
    }
}
