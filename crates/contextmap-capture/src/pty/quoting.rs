use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};

use crate::error::CaptureError;

/// Build a POSIX shell command line that runs `program` with exactly `args`.
///
/// The result is prefixed with `exec` so the shell is replaced by the
/// program. Every word is quoted, so spaces, quotes, empty strings, globs,
/// newlines and non-UTF-8 bytes reach the program unchanged. NUL bytes
/// cannot be represented and are rejected.
pub fn command_line(program: &OsStr, args: &[OsString]) -> Result<OsString, CaptureError> {
    let words = std::iter::once(program.as_bytes()).chain(args.iter().map(|a| a.as_bytes()));
    let joined = shlex::bytes::try_join(words).map_err(|e| CaptureError::Quote(e.to_string()))?;

    let mut line = b"exec ".to_vec();
    line.extend_from_slice(&joined);
    Ok(OsString::from_vec(line))
}
