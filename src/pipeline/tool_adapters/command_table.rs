use serde::Serialize;

use crate::pipeline::runtime::CommandSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPlatform {
    Unix,
    Windows,
}

impl ToolPlatform {
    pub fn host() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Unix
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "unix" | "linux" | "macos" => Some(Self::Unix),
            "windows" => Some(Self::Windows),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Stitch,
    Probe,
    Project,
    Format,
    Resize,
    Tag,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolBinaryOverrides {
    pub montage: Option<String>,
    pub convert: Option<String>,
    pub ffmpeg: Option<String>,
    pub ffprobe: Option<String>,
    pub exiftool: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub leading_args: Vec<String>,
}

impl ToolInvocation {
    fn bare(program: &str) -> Self {
        Self {
            program: program.to_string(),
            leading_args: Vec::new(),
        }
    }

    fn launched(launcher: &str, subcommand: &str) -> Self {
        Self {
            program: launcher.to_string(),
            leading_args: vec![subcommand.to_string()],
        }
    }
}

/// Binds each capability to the binary (and launcher prefix) that provides it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommandTable {
    stitch: ToolInvocation,
    probe: ToolInvocation,
    project: ToolInvocation,
    format: ToolInvocation,
    resize: ToolInvocation,
    tag: ToolInvocation,
}

impl ToolCommandTable {
    pub fn for_platform(platform: ToolPlatform) -> Self {
        let (stitch, convert) = match platform {
            ToolPlatform::Unix => (
                ToolInvocation::bare("montage"),
                ToolInvocation::bare("convert"),
            ),
            // ImageMagick 7 on Windows only ships the umbrella launcher.
            ToolPlatform::Windows => (
                ToolInvocation::launched("magick", "montage"),
                ToolInvocation::launched("magick", "convert"),
            ),
        };
        Self {
            stitch,
            probe: ToolInvocation::bare("ffprobe"),
            project: ToolInvocation::bare("ffmpeg"),
            format: convert.clone(),
            resize: convert,
            tag: ToolInvocation::bare("exiftool"),
        }
    }

    pub fn host() -> Self {
        Self::for_platform(ToolPlatform::host())
    }

    pub fn with_overrides(mut self, overrides: &ToolBinaryOverrides) -> Self {
        if let Some(program) = overrides.montage.as_ref() {
            self.stitch.program = program.clone();
        }
        if let Some(program) = overrides.convert.as_ref() {
            self.format.program = program.clone();
            self.resize.program = program.clone();
        }
        if let Some(program) = overrides.ffmpeg.as_ref() {
            self.project.program = program.clone();
        }
        if let Some(program) = overrides.ffprobe.as_ref() {
            self.probe.program = program.clone();
        }
        if let Some(program) = overrides.exiftool.as_ref() {
            self.tag.program = program.clone();
        }
        self
    }

    pub fn invocation(&self, capability: Capability) -> &ToolInvocation {
        match capability {
            Capability::Stitch => &self.stitch,
            Capability::Probe => &self.probe,
            Capability::Project => &self.project,
            Capability::Format => &self.format,
            Capability::Resize => &self.resize,
            Capability::Tag => &self.tag,
        }
    }

    pub fn command(&self, capability: Capability, args: Vec<String>) -> CommandSpec {
        let invocation = self.invocation(capability);
        let mut full_args = invocation.leading_args.clone();
        full_args.extend(args);
        CommandSpec::new(invocation.program.clone(), full_args)
    }
}

impl Default for ToolCommandTable {
    fn default() -> Self {
        Self::host()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_table_calls_tools_directly() {
        let table = ToolCommandTable::for_platform(ToolPlatform::Unix);
        let cmd = table.command(Capability::Stitch, vec![String::from("out.bmp")]);
        assert_eq!(cmd.program, "montage");
        assert_eq!(cmd.args, vec![String::from("out.bmp")]);
        assert_eq!(table.invocation(Capability::Format).program, "convert");
        assert_eq!(table.invocation(Capability::Project).program, "ffmpeg");
    }

    #[test]
    fn windows_table_routes_imagemagick_through_launcher() {
        let table = ToolCommandTable::for_platform(ToolPlatform::Windows);
        let stitch = table.command(Capability::Stitch, vec![String::from("out.bmp")]);
        assert_eq!(stitch.program, "magick");
        assert_eq!(
            stitch.args,
            vec![String::from("montage"), String::from("out.bmp")]
        );
        let resize = table.command(Capability::Resize, Vec::new());
        assert_eq!(resize.program, "magick");
        assert_eq!(resize.args, vec![String::from("convert")]);
        assert_eq!(table.invocation(Capability::Tag).program, "exiftool");
        assert!(table.invocation(Capability::Probe).leading_args.is_empty());
    }

    #[test]
    fn overrides_replace_program_but_keep_launcher_subcommand() {
        let table = ToolCommandTable::for_platform(ToolPlatform::Windows).with_overrides(
            &ToolBinaryOverrides {
                montage: Some(String::from("C:/im/magick.exe")),
                ffprobe: Some(String::from("/opt/ffmpeg/ffprobe")),
                ..ToolBinaryOverrides::default()
            },
        );
        let stitch = table.invocation(Capability::Stitch);
        assert_eq!(stitch.program, "C:/im/magick.exe");
        assert_eq!(stitch.leading_args, vec![String::from("montage")]);
        assert_eq!(
            table.invocation(Capability::Probe).program,
            "/opt/ffmpeg/ffprobe"
        );
        assert_eq!(table.invocation(Capability::Format).program, "magick");
    }

    #[test]
    fn platform_names_parse_case_insensitively() {
        assert_eq!(ToolPlatform::parse("Windows"), Some(ToolPlatform::Windows));
        assert_eq!(ToolPlatform::parse(" linux "), Some(ToolPlatform::Unix));
        assert_eq!(ToolPlatform::parse("beos"), None);
    }
}
