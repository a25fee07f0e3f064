use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use crate::error::AppError;

/// Write the given bytes to the given path by writing a sibling temp file and renaming it over
/// the target, so readers never observe a partially written file.
pub fn write_file_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().context("state file path has no parent directory")?;
    std::fs::create_dir_all(parent).map_err(|err| AppError::filesystem(parent, err))?;
    let tmp = path.with_extension("tmp");
    let mut file = std::fs::File::create(&tmp).map_err(|err| AppError::filesystem(&tmp, err))?;
    file.write_all(data).map_err(|err| AppError::filesystem(&tmp, err))?;
    file.sync_all().map_err(|err| AppError::filesystem(&tmp, err))?;
    std::fs::rename(&tmp, path).map_err(|err| AppError::filesystem(path, err))?;
    Ok(())
}

/// Render the given command and args as a single line for logs and test assertions.
pub fn command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program).chain(args.iter().map(String::as_str)).collect::<Vec<_>>().join(" ")
}
