//! Guards against overwriting raw inputs.
//!
//! The cleaner writes into the processed directory and the extractor writes
//! timestamped files into the raw directory. These checks keep either from
//! clobbering a file another stage reads.

use std::path::{Component, Path, PathBuf};

use crate::error::{PipelineError, Result};

/// Whether two paths name the same location.
///
/// Paths that both exist are compared after `canonicalize`, which resolves
/// `..` and symlinks. Otherwise `.` components are dropped and the rest is
/// compared as written.
fn same_location(a: &Path, b: &Path) -> bool {
    if let (Ok(a), Ok(b)) = (a.canonicalize(), b.canonicalize()) {
        return a == b;
    }
    without_cur_dir(a) == without_cur_dir(b)
}

fn without_cur_dir(path: &Path) -> PathBuf {
    path.components().filter(|c| !matches!(c, Component::CurDir)).collect()
}

/// The processed directory must not be the raw directory.
pub fn validate_processed_dir(raw_dir: &Path, processed_dir: &Path) -> Result<()> {
    if same_location(raw_dir, processed_dir) {
        return Err(PipelineError::Config(format!(
            "processed directory '{}' cannot be the same as raw directory",
            processed_dir.display()
        )));
    }
    Ok(())
}

/// Validates that an output file does not collide with any source file.
///
/// # Arguments
/// * `output` - The file about to be created or overwritten
/// * `source_paths` - Files the current stage reads
pub fn validate_output_path(output: &Path, source_paths: &[&Path]) -> Result<()> {
    for source in source_paths {
        if same_location(output, source) {
            return Err(PipelineError::Config(format!(
                "output '{}' cannot be the same as source '{}'",
                output.display(),
                source.display()
            )));
        }
    }

    // Raw Kaggle exports keep their export names; nothing may write over them.
    let output_name = output.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let protected = [crate::config::RAW_TRACKS_FILE, crate::config::RAW_ARTISTS_FILE];
    if protected.contains(&output_name) {
        return Err(PipelineError::Config(format!(
            "output '{}' would overwrite a raw input file",
            output.display()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_distinct_dirs_ok() {
        assert!(validate_processed_dir(Path::new("data/raw"), Path::new("data/processed")).is_ok());
    }

    #[test]
    fn test_same_dir_rejected() {
        let result = validate_processed_dir(Path::new("data/raw"), Path::new("data/raw"));
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("cannot be the same as raw directory"));
    }

    #[test]
    fn test_dot_prefixed_dir_rejected() {
        assert!(validate_processed_dir(Path::new("./data/raw"), Path::new("data/raw")).is_err());
        assert!(validate_processed_dir(Path::new("data/./raw/"), Path::new("data/raw")).is_err());
    }

    #[test]
    fn test_existing_dir_compared_canonically() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        std::fs::create_dir_all(&raw).unwrap();
        std::fs::create_dir_all(dir.path().join("other")).unwrap();

        let detour = dir.path().join("other").join("..").join("raw");
        assert!(validate_processed_dir(&raw, &detour).is_err());
        assert!(validate_processed_dir(&raw, &dir.path().join("other")).is_ok());
    }

    #[test]
    fn test_output_equals_source() {
        let path = PathBuf::from("/data/processed/tracks_limpo.csv");
        let result = validate_output_path(&path, &[&path]);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("cannot be the same as source"));
    }

    #[test]
    fn test_raw_name_blocked() {
        let output = PathBuf::from("/tmp/elsewhere/tracks.csv");
        let source = PathBuf::from("/data/raw/tracks.csv");
        assert!(validate_output_path(&output, &[&source]).is_err());
    }

    #[test]
    fn test_processed_name_ok() {
        let output = PathBuf::from("/data/processed/artists_limpo.csv");
        let source = PathBuf::from("/data/raw/artists.csv");
        assert!(validate_output_path(&output, &[&source]).is_ok());
    }
}
