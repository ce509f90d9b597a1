use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, ValueEnum};

use crate::error::CoreError;

/// How the wrapped program is put under a pseudo-terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RecorderKind {
    /// In-process pseudo-terminal.
    Native,
    /// The host `script` utility, dialect picked from the host OS.
    Script,
    /// util-linux `script -c <command line>`.
    CommandString,
    /// BSD `script` with `SHELL` pointed at the program.
    ShellSubstitution,
}

/// Raw, environment-backed settings. Parsed against a synthetic argv so the
/// wrapper's own argv is never interpreted here.
#[derive(Debug, Parser)]
#[command(
    name = "contextmap",
    no_binary_name = true,
    disable_help_flag = true,
    disable_version_flag = true
)]
struct RawSettings {
    #[arg(long, env = "CONTEXTMAP_REAL_PROGRAM")]
    real_program: Option<PathBuf>,

    #[arg(long, env = "CONTEXTMAP_PROGRAM", default_value = "claude")]
    program: String,

    #[arg(long, env = "CONTEXTMAP_DIR", default_value = ".context")]
    context_dir: PathBuf,

    #[arg(long, env = "CONTEXTMAP_RECORDER", value_enum, default_value_t = RecorderKind::Native)]
    recorder: RecorderKind,

    #[arg(
        long,
        env = "CONTEXTMAP_RECORD_INPUT",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        default_value = "false"
    )]
    record_input: bool,

    #[arg(long, env = "CONTEXTMAP_SUMMARIZER", default_value = "contextmap-summarize")]
    summarizer: String,

    #[arg(long, env = "CONTEXTMAP_SUMMARY_TIMEOUT", default_value_t = 600)]
    summary_timeout: u64,

    #[arg(long, env = "CONTEXTMAP_SUMMARY_EXT", default_value = "md")]
    summary_ext: String,

    #[arg(long, env = "CONTEXTMAP_ANCHOR_LINES", default_value_t = 10)]
    anchor_lines: usize,

    #[arg(long, env = "CONTEXTMAP_RETAIN_DAYS")]
    retain_days: Option<u64>,

    #[arg(long, env = "CONTEXTMAP_LOG", default_value = "warn")]
    log: String,
}

/// Everything the pipeline needs from the environment, resolved once at
/// startup and passed down.
#[derive(Debug, Clone)]
pub struct Settings {
    pub context_dir: PathBuf,
    pub real_program: Option<PathBuf>,
    pub program_name: String,
    pub recorder: RecorderKind,
    pub record_input: bool,
    pub summarizer: Vec<String>,
    pub summary_timeout: Duration,
    pub summary_ext: String,
    pub anchor_lines: usize,
    pub retention: Option<Duration>,
    pub log_filter: String,
}

impl Settings {
    /// Read settings from `CONTEXTMAP_*` environment variables.
    pub fn from_env() -> Result<Self, CoreError> {
        Self::parse_from(std::iter::empty::<OsString>())
    }

    /// Parse settings from explicit `--flag value` pairs, falling back to the
    /// environment and then to defaults for anything not given.
    pub fn parse_from<I, T>(args: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let raw = RawSettings::try_parse_from(args)
            .map_err(|e| CoreError::Config(e.render().to_string()))?;
        let cwd = std::env::current_dir()?;
        Self::from_raw(raw, &cwd)
    }

    fn from_raw(raw: RawSettings, cwd: &Path) -> Result<Self, CoreError> {
        let summarizer = shlex::split(&raw.summarizer)
            .filter(|words| !words.is_empty())
            .ok_or_else(|| {
                CoreError::Config(format!(
                    "CONTEXTMAP_SUMMARIZER is not a valid command line: {:?}",
                    raw.summarizer
                ))
            })?;

        let summary_ext = raw.summary_ext.trim_start_matches('.').to_string();
        if summary_ext.is_empty() || !summary_ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CoreError::Config(format!(
                "CONTEXTMAP_SUMMARY_EXT must be alphanumeric, got {:?}",
                raw.summary_ext
            )));
        }

        if raw.anchor_lines == 0 {
            return Err(CoreError::Config(
                "CONTEXTMAP_ANCHOR_LINES must be at least 1".into(),
            ));
        }
        if raw.summary_timeout == 0 {
            return Err(CoreError::Config(
                "CONTEXTMAP_SUMMARY_TIMEOUT must be at least 1 second".into(),
            ));
        }

        let context_dir = if raw.context_dir.is_absolute() {
            raw.context_dir
        } else {
            cwd.join(raw.context_dir)
        };

        Ok(Self {
            context_dir,
            real_program: raw.real_program.filter(|p| !p.as_os_str().is_empty()),
            program_name: raw.program,
            recorder: raw.recorder,
            record_input: raw.record_input,
            summarizer,
            summary_timeout: Duration::from_secs(raw.summary_timeout),
            summary_ext,
            anchor_lines: raw.anchor_lines,
            retention: raw
                .retain_days
                .map(|days| Duration::from_secs(days.saturating_mul(86_400))),
            log_filter: raw.log,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Settings, CoreError> {
        let raw = RawSettings::try_parse_from(args)
            .map_err(|e| CoreError::Config(e.render().to_string()))?;
        Settings::from_raw(raw, Path::new("/work"))
    }

    #[test]
    fn test_explicit_values() {
        let s = parse(&[
            "--context-dir",
            "ctx",
            "--recorder",
            "command-string",
            "--summarizer",
            "python3 '/opt/context map/contextmap.py'",
            "--summary-ext",
            ".html",
            "--retain-days",
            "2",
            "--record-input",
            "yes",
        ])
        .unwrap();
        assert_eq!(s.context_dir, PathBuf::from("/work/ctx"));
        assert_eq!(s.recorder, RecorderKind::CommandString);
        assert_eq!(
            s.summarizer,
            vec!["python3".to_string(), "/opt/context map/contextmap.py".to_string()]
        );
        assert_eq!(s.summary_ext, "html");
        assert_eq!(s.retention, Some(Duration::from_secs(2 * 86_400)));
        assert!(s.record_input);
    }

    #[test]
    fn test_absolute_context_dir_kept() {
        let s = parse(&["--context-dir", "/var/ctx", "--summarizer", "x"]).unwrap();
        assert_eq!(s.context_dir, PathBuf::from("/var/ctx"));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(parse(&["--summarizer", "\"unterminated"]).is_err());
        assert!(parse(&["--summarizer", "x", "--summary-ext", "m/d"]).is_err());
        assert!(parse(&["--summarizer", "x", "--anchor-lines", "0"]).is_err());
        assert!(parse(&["--summarizer", "x", "--recorder", "tmux"]).is_err());
    }
}
