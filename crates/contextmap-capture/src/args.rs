use std::ffi::{OsStr, OsString};

/// Control parameters the wrapper itself understands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlFlags {
    pub model: Option<String>,
}

impl ControlFlags {
    /// Single read-only pass over `args`.
    ///
    /// Recognizes `-m <v>`, `--model <v>` and `--model=<v>`; the last one
    /// wins. A trailing flag with no value is ignored, everything else is
    /// ignored too, and scanning stops at a bare `--`.
    pub fn scan(args: &[OsString]) -> Self {
        let mut flags = Self::default();
        let mut iter = args.iter().map(OsString::as_os_str);
        while let Some(arg) = iter.next() {
            let text = arg.to_string_lossy();
            if text == "--" {
                break;
            }
            if text == "-m" || text == "--model" {
                if let Some(value) = iter.next() {
                    flags.model = non_empty(value);
                }
            } else if let Some(value) = text.strip_prefix("--model=") {
                flags.model = non_empty(OsStr::new(value));
            }
        }
        flags
    }
}

fn non_empty(value: &OsStr) -> Option<String> {
    let value = value.to_string_lossy();
    (!value.is_empty()).then(|| value.into_owned())
}

/// The wrapper's argv, kept byte-for-byte for the wrapped program, plus the
/// control flags found in it. Recognized flags are not stripped: the wrapped
/// program may need them too.
#[derive(Debug, Clone)]
pub struct ForwardedArgs {
    argv: Vec<OsString>,
    flags: ControlFlags,
}

impl ForwardedArgs {
    pub fn new(argv: Vec<OsString>) -> Self {
        let flags = ControlFlags::scan(&argv);
        Self { argv, flags }
    }

    /// Arguments of the current process, without argv[0].
    pub fn from_env() -> Self {
        Self::new(std::env::args_os().skip(1).collect())
    }

    pub fn argv(&self) -> &[OsString] {
        &self.argv
    }

    pub fn model(&self) -> Option<&str> {
        self.flags.model.as_deref()
    }
}
