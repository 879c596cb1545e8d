use std::sync::Arc;

use crate::pipeline::converter::SkyboxConverter;
use crate::pipeline::runtime::{PipelineCommandRunner, StdPipelineCommandRunner};
use crate::pipeline::scanner::{FaceNaming, TourConversionScanner};
use crate::pipeline::settings_layer::SkyboxSettings;
use crate::pipeline::temp_artifacts::TempArtifactManager;
use crate::pipeline::tool_adapters::{CommandToolAdapters, SharedSkyboxToolOps, ToolCommandTable};

pub fn tool_command_table(settings: &SkyboxSettings) -> ToolCommandTable {
    ToolCommandTable::for_platform(settings.platform).with_overrides(&settings.tools)
}

pub fn default_skybox_converter(settings: &SkyboxSettings) -> SkyboxConverter {
    let runner = StdPipelineCommandRunner::default().with_timeout(settings.tool_timeout);
    skybox_converter_with_runner(settings, runner)
}

pub fn skybox_converter_with_runner<R>(settings: &SkyboxSettings, runner: R) -> SkyboxConverter
where
    R: PipelineCommandRunner,
{
    let tools: SharedSkyboxToolOps = Arc::new(CommandToolAdapters::new(
        tool_command_table(settings),
        runner,
    ));
    skybox_converter_with_tools(settings, tools)
}

pub fn skybox_converter_with_tools(
    settings: &SkyboxSettings,
    tools: SharedSkyboxToolOps,
) -> SkyboxConverter {
    let temps = Arc::new(TempArtifactManager::new(settings.temp_dir.clone()));
    SkyboxConverter::new(tools, temps).with_model_tag(settings.model_tag.as_str())
}

pub fn default_tour_conversion_scanner(settings: &SkyboxSettings) -> TourConversionScanner {
    TourConversionScanner::new(
        default_skybox_converter(settings),
        FaceNaming::new(settings.face_marker.as_str()),
    )
}

pub fn tour_conversion_scanner_with_runner<R>(
    settings: &SkyboxSettings,
    runner: R,
) -> TourConversionScanner
where
    R: PipelineCommandRunner,
{
    TourConversionScanner::new(
        skybox_converter_with_runner(settings, runner),
        FaceNaming::new(settings.face_marker.as_str()),
    )
}
