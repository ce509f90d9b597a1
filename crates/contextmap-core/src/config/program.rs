use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::error::CoreError;

/// Locate the real binary of the wrapped program.
///
/// An explicit `CONTEXTMAP_REAL_PROGRAM` wins. Otherwise the program name is
/// looked up on `PATH`, skipping any hit that is the wrapper itself (a shell
/// alias or symlink named after the program would otherwise recurse).
pub fn resolve_program(settings: &Settings) -> Result<PathBuf, CoreError> {
    let own_exe = std::env::current_exe()
        .ok()
        .and_then(|p| p.canonicalize().ok());

    if let Some(explicit) = &settings.real_program {
        return locate_explicit(explicit);
    }

    let candidates = which::which_all(&settings.program_name)
        .map_err(|_| CoreError::ProgramNotFound(settings.program_name.clone()))?;
    first_foreign(candidates, own_exe.as_deref())
        .ok_or_else(|| CoreError::ProgramNotFound(settings.program_name.clone()))
}

fn locate_explicit(path: &Path) -> Result<PathBuf, CoreError> {
    if path.components().count() > 1 || path.is_absolute() {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(CoreError::ProgramNotFound(path.display().to_string()));
    }
    which::which(path).map_err(|_| CoreError::ProgramNotFound(path.display().to_string()))
}

fn first_foreign(
    candidates: impl IntoIterator<Item = PathBuf>,
    own_exe: Option<&Path>,
) -> Option<PathBuf> {
    candidates.into_iter().find(|candidate| match own_exe {
        Some(own) => candidate.canonicalize().map_or(true, |c| c != own),
        None => true,
    })
}
