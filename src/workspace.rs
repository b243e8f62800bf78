//! Job workspace management
//!
//! Every execution attempt gets an exclusively-owned directory under a
//! shared temp root, holding the source file and the stdin input file.
//! The directory is removed when the workspace is dropped; a startup sweep
//! clears leftovers from a previous, possibly crashed, run.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::fs;
use tracing::warn;
use uuid::Uuid;

use crate::languages::LanguageConfig;

/// Filename the stdin content is written to inside the workspace
const INPUT_FILE: &str = "input.txt";

/// Isolated per-job directory holding source and input files
#[derive(Debug)]
pub struct JobWorkspace {
    dir: PathBuf,
    source_file: String,
    input_path: PathBuf,
}

impl JobWorkspace {
    /// Create a fresh workspace under `root` and materialize the submitted
    /// source code and stdin input into it.
    pub async fn create(
        root: &Path,
        config: &LanguageConfig,
        code: &str,
        stdin: &str,
    ) -> Result<Self> {
        fs::create_dir_all(root)
            .await
            .with_context(|| format!("Failed to create temp root {}", root.display()))?;

        let dir = root.join(Uuid::new_v4().to_string());
        fs::create_dir(&dir)
            .await
            .with_context(|| format!("Failed to create job directory {}", dir.display()))?;

        let source_file = derive_source_filename(config, code);
        let input_path = dir.join(INPUT_FILE);

        // From here on the workspace owns the directory, so any failed write
        // below still ends in cleanup.
        let workspace = Self {
            dir,
            source_file,
            input_path,
        };

        fs::write(workspace.source_path(), code)
            .await
            .context("Failed to write source file")?;
        fs::write(&workspace.input_path, stdin)
            .await
            .context("Failed to write input file")?;

        Ok(workspace)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Name of the materialized source file (e.g. "Main.java")
    pub fn source_file_name(&self) -> &str {
        &self.source_file
    }

    pub fn source_path(&self) -> PathBuf {
        self.dir.join(&self.source_file)
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Error cleaning up job directory {}: {}", self.dir.display(), e);
            }
        }
    }
}

/// Determine the filename the submitted code must be written to.
///
/// Class-based languages (Java) name the file after the public class declared
/// in the source; when no declaration is found the configured default is used
/// and compilation is allowed to fail downstream.
pub fn derive_source_filename(config: &LanguageConfig, code: &str) -> String {
    if !config.derive_class_name {
        return config.source_file.clone();
    }

    static PUBLIC_CLASS: OnceLock<Regex> = OnceLock::new();
    let re = PUBLIC_CLASS.get_or_init(|| {
        Regex::new(r"public\s+class\s+([A-Za-z_][A-Za-z0-9_]*)").expect("invalid class pattern")
    });

    match re.captures(code).and_then(|caps| caps.get(1)) {
        Some(name) => {
            let extension = Path::new(&config.source_file)
                .extension()
                .and_then(|ext| ext.to_str())
                .unwrap_or("java");
            format!("{}.{}", name.as_str(), extension)
        }
        None => config.source_file.clone(),
    }
}

/// Remove all leftover entries under the temp root.
///
/// Returns the number of entries removed. Individual failures are logged and
/// skipped so one undeletable entry does not block startup.
pub async fn sweep_stale(root: &Path) -> Result<usize> {
    if fs::metadata(root).await.is_err() {
        return Ok(0);
    }

    let mut removed = 0;
    let mut entries = fs::read_dir(root)
        .await
        .with_context(|| format!("Failed to read temp root {}", root.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_dir = entry
            .file_type()
            .await
            .map(|file_type| file_type.is_dir())
            .unwrap_or(false);

        let result = if is_dir {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };

        match result {
            Ok(()) => removed += 1,
            Err(e) => warn!("Could not clean up {}: {}", path.display(), e),
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain_config() -> LanguageConfig {
        LanguageConfig {
            source_file: "main.py".to_string(),
            compile_command: None,
            run_command: vec!["python3".into(), "main.py".into()],
            derive_class_name: false,
            benign_stderr_prefixes: Vec::new(),
        }
    }

    fn java_config() -> LanguageConfig {
        LanguageConfig {
            source_file: "Main.java".to_string(),
            compile_command: Some(vec!["javac".into(), "Main.java".into()]),
            run_command: vec!["java".into(), "Main".into()],
            derive_class_name: true,
            benign_stderr_prefixes: Vec::new(),
        }
    }

    #[test]
    fn test_fixed_filename_for_non_class_languages() {
        let name = derive_source_filename(&plain_config(), "print(input())");
        assert_eq!(name, "main.py");
    }

    #[test]
    fn test_java_filename_follows_public_class() {
        let code = "import java.util.*;\n\npublic class Solution {\n    public static void main(String[] args) {}\n}\n";
        assert_eq!(derive_source_filename(&java_config(), code), "Solution.java");
    }

    #[test]
    fn test_java_filename_falls_back_without_public_class() {
        let code = "class Helper {}\n";
        assert_eq!(derive_source_filename(&java_config(), code), "Main.java");
    }

    #[tokio::test]
    async fn test_create_materializes_source_and_input() {
        let root = tempfile::tempdir().unwrap();
        let workspace = JobWorkspace::create(root.path(), &plain_config(), "code", "stdin")
            .await
            .unwrap();

        assert_eq!(
            fs::read_to_string(workspace.source_path()).await.unwrap(),
            "code"
        );
        assert_eq!(
            fs::read_to_string(workspace.input_path()).await.unwrap(),
            "stdin"
        );
    }

    #[tokio::test]
    async fn test_drop_removes_job_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = {
            let workspace = JobWorkspace::create(root.path(), &plain_config(), "code", "")
                .await
                .unwrap();
            workspace.dir().to_path_buf()
        };

        assert!(!dir.exists());
        assert!(root.path().exists());
    }

    #[tokio::test]
    async fn test_sweep_removes_leftovers() {
        let root = tempfile::tempdir().unwrap();
        let orphan = root.path().join("dead-job");
        fs::create_dir(&orphan).await.unwrap();
        fs::write(orphan.join("main.c"), "int main() {}").await.unwrap();
        fs::write(root.path().join("stray.txt"), "x").await.unwrap();

        let removed = sweep_stale(root.path()).await.unwrap();

        assert_eq!(removed, 2);
        assert!(!orphan.exists());
    }

    #[tokio::test]
    async fn test_sweep_of_missing_root_is_a_noop() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("never-created");
        assert_eq!(sweep_stale(&missing).await.unwrap(), 0);
    }
}
