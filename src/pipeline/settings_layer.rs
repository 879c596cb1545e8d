use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::pipeline::pathing::{resolve_under_root, DEFAULT_TOURS_ROOT};
use crate::pipeline::runtime::DEFAULT_TOOL_TIMEOUT;
use crate::pipeline::scanner::DEFAULT_FACE_MARKER;
use crate::pipeline::tool_adapters::{ToolBinaryOverrides, ToolPlatform, DEFAULT_MODEL_TAG};

pub const DEFAULT_FETCH_CONCURRENCY: usize = 4;
pub const DEFAULT_FETCH_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_FETCH_BACKOFF: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SkyboxSettingsOverlay {
    pub tours_root: Option<String>,
    pub temp_dir: Option<String>,
    pub tool_timeout_secs: Option<u64>,
    pub face_marker: Option<String>,
    pub model_tag: Option<String>,
    pub platform: Option<ToolPlatform>,
    pub tools: ToolBinaryOverrides,
    pub fetch_concurrency: Option<usize>,
    pub fetch_max_attempts: Option<u32>,
    pub fetch_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchSettings {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_FETCH_CONCURRENCY,
            max_attempts: DEFAULT_FETCH_MAX_ATTEMPTS,
            backoff: DEFAULT_FETCH_BACKOFF,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkyboxSettings {
    pub tours_root: PathBuf,
    pub temp_dir: PathBuf,
    pub tool_timeout: Duration,
    pub face_marker: String,
    pub model_tag: String,
    pub platform: ToolPlatform,
    pub tools: ToolBinaryOverrides,
    pub fetch: FetchSettings,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsLayerError {
    #[error("failed to read skybox settings '{path}': {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse skybox settings JSON '{path}': {message}")]
    ParseJson { path: String, message: String },
    #[error("failed to parse skybox settings TOML '{path}': {message}")]
    ParseToml { path: String, message: String },
    #[error("skybox settings root must be an object")]
    RootMustBeObject,
    #[error("skybox settings field '{field}' has invalid type")]
    InvalidFieldType { field: String },
}

pub fn load_app_skybox_settings(
    app_root: &Path,
    explicit_path: Option<&str>,
) -> Result<SkyboxSettingsOverlay, SettingsLayerError> {
    if let Some(path) = explicit_path
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| resolve_under_root(app_root, v))
    {
        return load_overlay_by_extension(path.as_path());
    }

    // Only the conventional locations are optional.
    let toml_path = app_root.join("config/skybox.settings.toml");
    if toml_path.exists() {
        return load_overlay_from_toml_path(toml_path.as_path());
    }
    let json_path = app_root.join("config/skybox.settings.json");
    if json_path.exists() {
        return load_overlay_from_json_path(json_path.as_path());
    }
    Ok(SkyboxSettingsOverlay::default())
}

pub fn merge_skybox_settings_overlays(
    file: &SkyboxSettingsOverlay,
    overrides: &SkyboxSettingsOverlay,
) -> SkyboxSettingsOverlay {
    SkyboxSettingsOverlay {
        tours_root: choose_string(overrides.tours_root.as_deref(), file.tours_root.as_deref()),
        temp_dir: choose_string(overrides.temp_dir.as_deref(), file.temp_dir.as_deref()),
        tool_timeout_secs: overrides.tool_timeout_secs.or(file.tool_timeout_secs),
        face_marker: choose_string(
            overrides.face_marker.as_deref(),
            file.face_marker.as_deref(),
        ),
        model_tag: choose_string(overrides.model_tag.as_deref(), file.model_tag.as_deref()),
        platform: overrides.platform.or(file.platform),
        tools: ToolBinaryOverrides {
            montage: choose_string(
                overrides.tools.montage.as_deref(),
                file.tools.montage.as_deref(),
            ),
            convert: choose_string(
                overrides.tools.convert.as_deref(),
                file.tools.convert.as_deref(),
            ),
            ffmpeg: choose_string(
                overrides.tools.ffmpeg.as_deref(),
                file.tools.ffmpeg.as_deref(),
            ),
            ffprobe: choose_string(
                overrides.tools.ffprobe.as_deref(),
                file.tools.ffprobe.as_deref(),
            ),
            exiftool: choose_string(
                overrides.tools.exiftool.as_deref(),
                file.tools.exiftool.as_deref(),
            ),
        },
        fetch_concurrency: overrides.fetch_concurrency.or(file.fetch_concurrency),
        fetch_max_attempts: overrides.fetch_max_attempts.or(file.fetch_max_attempts),
        fetch_backoff_ms: overrides.fetch_backoff_ms.or(file.fetch_backoff_ms),
    }
}

pub fn resolve_skybox_settings(app_root: &Path, overlay: &SkyboxSettingsOverlay) -> SkyboxSettings {
    SkyboxSettings {
        tours_root: resolve_under_root(
            app_root,
            overlay.tours_root.as_deref().unwrap_or(DEFAULT_TOURS_ROOT),
        ),
        temp_dir: overlay
            .temp_dir
            .as_deref()
            .map(|v| resolve_under_root(app_root, v))
            .unwrap_or_else(std::env::temp_dir),
        tool_timeout: overlay
            .tool_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOOL_TIMEOUT),
        face_marker: overlay
            .face_marker
            .clone()
            .unwrap_or_else(|| String::from(DEFAULT_FACE_MARKER)),
        model_tag: overlay
            .model_tag
            .clone()
            .unwrap_or_else(|| String::from(DEFAULT_MODEL_TAG)),
        platform: overlay.platform.unwrap_or_else(ToolPlatform::host),
        tools: overlay.tools.clone(),
        fetch: FetchSettings {
            concurrency: overlay
                .fetch_concurrency
                .unwrap_or(DEFAULT_FETCH_CONCURRENCY),
            max_attempts: overlay
                .fetch_max_attempts
                .unwrap_or(DEFAULT_FETCH_MAX_ATTEMPTS),
            backoff: overlay
                .fetch_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_FETCH_BACKOFF),
        },
    }
}

pub fn parse_skybox_settings_overlay_json(
    value: &Value,
) -> Result<SkyboxSettingsOverlay, SettingsLayerError> {
    let root = value
        .as_object()
        .ok_or(SettingsLayerError::RootMustBeObject)?;
    let skybox = root
        .get("skybox")
        .unwrap_or(value)
        .as_object()
        .ok_or(SettingsLayerError::RootMustBeObject)?;

    let mut out = SkyboxSettingsOverlay::default();
    if let Some(v) = skybox.get("tours_root") {
        out.tours_root = Some(parse_string(v, "tours_root")?);
    }
    if let Some(v) = skybox.get("temp_dir") {
        out.temp_dir = Some(parse_string(v, "temp_dir")?);
    }
    if let Some(v) = skybox.get("tool_timeout_secs") {
        out.tool_timeout_secs = Some(parse_positive_u64(v, "tool_timeout_secs")?);
    }
    if let Some(v) = skybox.get("face_marker") {
        // An empty marker is meaningful: faces named `<base><index>.jpg`.
        out.face_marker = Some(
            v.as_str()
                .map(str::trim)
                .map(str::to_string)
                .ok_or_else(|| invalid("face_marker"))?,
        );
    }
    if let Some(v) = skybox.get("model_tag") {
        out.model_tag = Some(parse_string(v, "model_tag")?);
    }
    if let Some(v) = skybox.get("platform") {
        out.platform = Some(parse_platform(v, "platform")?);
    }
    if let Some(tools) = skybox.get("tools") {
        let tools = parse_table(tools, "tools")?;
        out.tools = ToolBinaryOverrides {
            montage: parse_optional_string(tools, "montage", "tools.montage")?,
            convert: parse_optional_string(tools, "convert", "tools.convert")?,
            ffmpeg: parse_optional_string(tools, "ffmpeg", "tools.ffmpeg")?,
            ffprobe: parse_optional_string(tools, "ffprobe", "tools.ffprobe")?,
            exiftool: parse_optional_string(tools, "exiftool", "tools.exiftool")?,
        };
    }
    if let Some(fetch) = skybox.get("fetch") {
        let fetch = parse_table(fetch, "fetch")?;
        if let Some(v) = fetch.get("concurrency") {
            let parsed = parse_positive_u64(v, "fetch.concurrency")?;
            out.fetch_concurrency =
                Some(usize::try_from(parsed).map_err(|_| invalid("fetch.concurrency"))?);
        }
        if let Some(v) = fetch.get("max_attempts") {
            let parsed = parse_positive_u64(v, "fetch.max_attempts")?;
            out.fetch_max_attempts =
                Some(u32::try_from(parsed).map_err(|_| invalid("fetch.max_attempts"))?);
        }
        if let Some(v) = fetch.get("backoff_ms") {
            out.fetch_backoff_ms = Some(
                v.as_u64()
                    .ok_or_else(|| invalid("fetch.backoff_ms"))?,
            );
        }
    }
    Ok(out)
}

fn load_overlay_by_extension(path: &Path) -> Result<SkyboxSettingsOverlay, SettingsLayerError> {
    match path
        .extension()
        .and_then(|v| v.to_str())
        .map(|v| v.to_ascii_lowercase())
    {
        Some(ext) if ext == "toml" => load_overlay_from_toml_path(path),
        _ => load_overlay_from_json_path(path),
    }
}

fn load_overlay_from_json_path(path: &Path) -> Result<SkyboxSettingsOverlay, SettingsLayerError> {
    let raw = fs::read_to_string(path).map_err(|error| SettingsLayerError::ReadFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    let parsed = serde_json::from_str::<Value>(raw.as_str()).map_err(|error| {
        SettingsLayerError::ParseJson {
            path: path.display().to_string(),
            message: error.to_string(),
        }
    })?;
    parse_skybox_settings_overlay_json(&parsed)
}

fn load_overlay_from_toml_path(path: &Path) -> Result<SkyboxSettingsOverlay, SettingsLayerError> {
    let raw = fs::read_to_string(path).map_err(|error| SettingsLayerError::ReadFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    let parsed = toml::from_str::<toml::Value>(raw.as_str()).map_err(|error| {
        SettingsLayerError::ParseToml {
            path: path.display().to_string(),
            message: error.to_string(),
        }
    })?;
    let json_value = serde_json::to_value(parsed).map_err(|error| SettingsLayerError::ParseToml {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    parse_skybox_settings_overlay_json(&json_value)
}

fn choose_string(a: Option<&str>, b: Option<&str>) -> Option<String> {
    a.or(b).map(str::to_string)
}

fn invalid(field: &str) -> SettingsLayerError {
    SettingsLayerError::InvalidFieldType {
        field: field.to_string(),
    }
}

fn parse_table<'a>(value: &'a Value, field: &str) -> Result<&'a Map<String, Value>, SettingsLayerError> {
    value.as_object().ok_or_else(|| invalid(field))
}

fn parse_string(value: &Value, field: &str) -> Result<String, SettingsLayerError> {
    let parsed = value
        .as_str()
        .map(str::trim)
        .ok_or_else(|| invalid(field))?;
    if parsed.is_empty() {
        return Err(invalid(field));
    }
    Ok(parsed.to_string())
}

fn parse_optional_string(
    table: &Map<String, Value>,
    key: &str,
    field: &str,
) -> Result<Option<String>, SettingsLayerError> {
    table.get(key).map(|v| parse_string(v, field)).transpose()
}

fn parse_positive_u64(value: &Value, field: &str) -> Result<u64, SettingsLayerError> {
    value
        .as_u64()
        .filter(|v| *v > 0)
        .ok_or_else(|| invalid(field))
}

fn parse_platform(value: &Value, field: &str) -> Result<ToolPlatform, SettingsLayerError> {
    let parsed = parse_string(value, field)?;
    ToolPlatform::parse(parsed.as_str()).ok_or_else(|| invalid(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_root(tag: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        std::env::temp_dir().join(format!("skybox_settings_layer_{tag}_{stamp}"))
    }

    #[test]
    fn parses_nested_skybox_settings_overlay() {
        let overlay = parse_skybox_settings_overlay_json(&serde_json::json!({
            "skybox": {
                "tours_root": "data/tours",
                "temp_dir": "/var/tmp/skybox",
                "tool_timeout_secs": 120,
                "face_marker": "",
                "model_tag": "studio rig",
                "platform": "windows",
                "tools": { "montage": "/opt/im/montage", "ffmpeg": "ffmpeg7" },
                "fetch": { "concurrency": 8, "max_attempts": 5, "backoff_ms": 250 }
            }
        }))
        .expect("settings overlay should parse");

        assert_eq!(overlay.tours_root.as_deref(), Some("data/tours"));
        assert_eq!(overlay.temp_dir.as_deref(), Some("/var/tmp/skybox"));
        assert_eq!(overlay.tool_timeout_secs, Some(120));
        assert_eq!(overlay.face_marker.as_deref(), Some(""));
        assert_eq!(overlay.model_tag.as_deref(), Some("studio rig"));
        assert_eq!(overlay.platform, Some(ToolPlatform::Windows));
        assert_eq!(overlay.tools.montage.as_deref(), Some("/opt/im/montage"));
        assert_eq!(overlay.tools.ffmpeg.as_deref(), Some("ffmpeg7"));
        assert_eq!(overlay.tools.convert, None);
        assert_eq!(overlay.fetch_concurrency, Some(8));
        assert_eq!(overlay.fetch_max_attempts, Some(5));
        assert_eq!(overlay.fetch_backoff_ms, Some(250));
    }

    #[test]
    fn merges_with_override_precedence() {
        let file = SkyboxSettingsOverlay {
            tours_root: Some(String::from("from-file")),
            tool_timeout_secs: Some(30),
            tools: ToolBinaryOverrides {
                convert: Some(String::from("file-convert")),
                ..ToolBinaryOverrides::default()
            },
            ..SkyboxSettingsOverlay::default()
        };
        let overrides = SkyboxSettingsOverlay {
            tours_root: Some(String::from("from-cli")),
            ..SkyboxSettingsOverlay::default()
        };

        let merged = merge_skybox_settings_overlays(&file, &overrides);
        assert_eq!(merged.tours_root.as_deref(), Some("from-cli"));
        assert_eq!(merged.tool_timeout_secs, Some(30));
        assert_eq!(merged.tools.convert.as_deref(), Some("file-convert"));
    }

    #[test]
    fn resolves_defaults_when_nothing_is_configured() {
        let settings =
            resolve_skybox_settings(Path::new("/app"), &SkyboxSettingsOverlay::default());
        assert_eq!(settings.tours_root, PathBuf::from("/app/tours"));
        assert_eq!(settings.temp_dir, std::env::temp_dir());
        assert_eq!(settings.tool_timeout, Duration::from_secs(600));
        assert_eq!(settings.face_marker, "skybox");
        assert_eq!(settings.model_tag, "github fdd4s");
        assert_eq!(settings.platform, ToolPlatform::host());
        assert_eq!(settings.fetch, FetchSettings::default());
        assert_eq!(settings.fetch.concurrency, 4);
        assert_eq!(settings.fetch.max_attempts, 3);
    }

    #[test]
    fn loads_app_toml_and_falls_back_to_json() {
        let root = temp_root("toml");
        fs::create_dir_all(root.join("config")).expect("config dir");
        fs::write(
            root.join("config/skybox.settings.toml"),
            r#"[skybox]
tours_root = "captures"

[skybox.fetch]
concurrency = 2
"#,
        )
        .expect("toml write");
        let overlay = load_app_skybox_settings(root.as_path(), None).expect("toml load");
        assert_eq!(overlay.tours_root.as_deref(), Some("captures"));
        assert_eq!(overlay.fetch_concurrency, Some(2));

        fs::remove_file(root.join("config/skybox.settings.toml")).expect("remove toml");
        fs::write(
            root.join("config/skybox.settings.json"),
            r#"{"skybox":{"model_tag":"legacy"}}"#,
        )
        .expect("json write");
        let overlay = load_app_skybox_settings(root.as_path(), None).expect("json load");
        assert_eq!(overlay.model_tag.as_deref(), Some("legacy"));

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn explicit_path_is_resolved_from_app_root() {
        let root = temp_root("explicit");
        fs::create_dir_all(root.join("custom")).expect("custom dir");
        fs::write(
            root.join("custom/site.toml"),
            "tool_timeout_secs = 45\nplatform = \"unix\"\n",
        )
        .expect("toml write");

        let overlay = load_app_skybox_settings(root.as_path(), Some("custom/site.toml"))
            .expect("explicit load");
        assert_eq!(overlay.tool_timeout_secs, Some(45));
        assert_eq!(overlay.platform, Some(ToolPlatform::Unix));

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn missing_files_yield_an_empty_overlay() {
        let root = temp_root("missing");
        let overlay = load_app_skybox_settings(root.as_path(), None).expect("no files");
        assert_eq!(overlay, SkyboxSettingsOverlay::default());
    }

    #[test]
    fn explicit_path_that_does_not_exist_is_an_error() {
        let root = temp_root("explicit_missing");
        let err = load_app_skybox_settings(root.as_path(), Some("custom/typo.toml"))
            .expect_err("a named settings file must exist");
        match err {
            SettingsLayerError::ReadFile { path, .. } => {
                assert!(path.ends_with("typo.toml"), "unexpected path {path}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let err = load_app_skybox_settings(root.as_path(), Some("site.json"))
            .expect_err("json is checked too");
        assert!(matches!(err, SettingsLayerError::ReadFile { .. }));
    }

    #[test]
    fn rejects_invalid_field_values() {
        for (value, field) in [
            (serde_json::json!({"skybox": {"tours_root": "  "}}), "tours_root"),
            (
                serde_json::json!({"skybox": {"tool_timeout_secs": 0}}),
                "tool_timeout_secs",
            ),
            (serde_json::json!({"skybox": {"platform": "amiga"}}), "platform"),
            (
                serde_json::json!({"skybox": {"tools": {"ffmpeg": 3}}}),
                "tools.ffmpeg",
            ),
            (
                serde_json::json!({"skybox": {"fetch": {"concurrency": -1}}}),
                "fetch.concurrency",
            ),
        ] {
            let err = parse_skybox_settings_overlay_json(&value).expect_err("invalid value");
            assert_eq!(
                err,
                SettingsLayerError::InvalidFieldType {
                    field: field.to_string()
                }
            );
        }
    }

    #[test]
    fn rejects_non_object_root() {
        let err = parse_skybox_settings_overlay_json(&serde_json::json!(["nope"]))
            .expect_err("array root");
        assert_eq!(err, SettingsLayerError::RootMustBeObject);
    }
}
