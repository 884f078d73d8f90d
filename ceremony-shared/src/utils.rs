use crate::errors::CeremonyError;

use sha2::{Digest, Sha256};
use std::{ffi::OsStr, io, path::Path, process::Command};
use tracing::trace;

/// Returns the SHA-256 hex digest of a file's contents.
pub fn sha256_file<P: AsRef<Path>>(path: P) -> Result<String, CeremonyError> {
    let mut file = fs_err::File::open(path.as_ref())?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Creates the parent directory of `path` if it does not exist.
pub fn create_parent_directory<P: AsRef<Path>>(path: P) -> Result<(), CeremonyError> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            fs_err::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Removes a file, succeeding when it is already gone.
pub fn remove_file_if_exists<P: AsRef<Path>>(path: P) -> Result<(), CeremonyError> {
    match fs_err::remove_file(path.as_ref()) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error.into()),
    }
}

/// Copies a file, creating the destination's parent directory.
pub fn copy_file<P: AsRef<Path>, Q: AsRef<Path>>(from: P, to: Q) -> Result<u64, CeremonyError> {
    create_parent_directory(to.as_ref())?;
    Ok(fs_err::copy(from.as_ref(), to.as_ref())?)
}

/// Returns the final component of a path as UTF-8.
pub fn file_name<P: AsRef<Path>>(path: P) -> Result<String, CeremonyError> {
    path.as_ref()
        .file_name()
        .and_then(OsStr::to_str)
        .map(str::to_string)
        .ok_or_else(|| CeremonyError::UnrecognizedArtifactName(path.as_ref().display().to_string()))
}

/// Runs an external program to completion and returns its stdout.
///
/// A spawn failure or a non-zero exit is `ToolFailed` carrying stderr.
pub fn run_external_command<S: AsRef<OsStr>>(program: &Path, args: &[S]) -> Result<String, CeremonyError> {
    let name = program.display().to_string();
    trace!(
        "Running {} {}",
        name,
        args.iter()
            .map(|arg| arg.as_ref().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    );

    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|error| CeremonyError::ToolFailed(name.clone(), error.to_string()))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CeremonyError::ToolFailed(
            name,
            format!("{}\nstdout: {}\nstderr: {}", output.status, stdout.trim(), stderr.trim()),
        ));
    }
    Ok(stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_file() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("abc.txt");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_file_helpers() {
        let directory = tempfile::tempdir().unwrap();
        let source = directory.path().join("a.ph2");
        std::fs::write(&source, b"a").unwrap();

        let target = directory.path().join("nested/deeper/a.ph2");
        assert_eq!(copy_file(&source, &target).unwrap(), 1);
        assert_eq!(file_name(&target).unwrap(), "a.ph2");

        remove_file_if_exists(&target).unwrap();
        remove_file_if_exists(&target).unwrap();
        assert!(!target.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_external_command() {
        let stdout = run_external_command(Path::new("echo"), &["hello"]).unwrap();
        assert_eq!(stdout.trim(), "hello");

        match run_external_command(Path::new("false"), &[] as &[&str]) {
            Err(CeremonyError::ToolFailed(name, _)) => assert_eq!(name, "false"),
            other => panic!("expected ToolFailed, found {:?}", other),
        }
        assert!(run_external_command(Path::new("/nonexistent/setup"), &["p2c"]).is_err());
    }
}
