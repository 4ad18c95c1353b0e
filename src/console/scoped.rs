//! Scoped resources
//!
//! Acquire/release pairs whose release runs on every exit path, including
//! `?` propagation and panics. Used for the config lock, temporary files
//! and the online-edit round trip.

use super::Console;
use crate::error::{Error, Result};
use scopeguard::ScopeGuard;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

/// A value paired with its release action.
pub type Scoped<T> = ScopeGuard<T, Box<dyn FnOnce(T) + Send>>;

/// Wrap `value` so that `release` runs when the guard drops.
pub fn scoped<T, F>(value: T, release: F) -> Scoped<T>
where
    F: FnOnce(T) + Send + 'static,
{
    scopeguard::guard(value, Box::new(release) as Box<dyn FnOnce(T) + Send>)
}

/// Create `path` (and parents) if missing. Directories this call created
/// are removed on drop unless the guard is committed with
/// [`ScopeGuard::into_inner`].
pub fn created_dir(path: &Path) -> Result<Scoped<PathBuf>> {
    let mut first_missing = None;
    let mut ancestor = Some(path);
    while let Some(dir) = ancestor {
        if dir.exists() {
            break;
        }
        first_missing = Some(dir.to_path_buf());
        ancestor = dir.parent();
    }
    std::fs::create_dir_all(path)
        .map_err(|e| Error::io(format!("Failed to create directory {}", path.display()), e))?;

    Ok(scoped(path.to_path_buf(), move |_| {
        if let Some(dir) = first_missing {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                tracing::warn!("Failed to remove {}: {}", dir.display(), e);
            }
        }
    }))
}

/// Temporary file holding `content`; deleted when dropped.
pub fn temp_file(suffix: &str, content: &str) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("gcmd-edit-")
        .suffix(suffix)
        .tempfile()
        .map_err(|e| Error::io("Failed to create temporary file", e))?;
    file.write_all(content.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|e| Error::io("Failed to write temporary file", e))?;
    Ok(file)
}

/// Editor command: `$VISUAL`, then `$EDITOR`, then `vi`.
pub fn editor_command(env: &crate::config::Environment) -> String {
    env.get("VISUAL")
        .or_else(|| env.get("EDITOR"))
        .unwrap_or("vi")
        .to_string()
}

/// Runs the editor on a file. Injectable so that tests need no terminal.
pub trait Editor: Send + Sync {
    fn edit(&self, path: &Path) -> Result<()>;
}

/// Spawns an external editor and waits for it.
#[derive(Debug, Clone)]
pub struct ExternalEditor {
    command: String,
}

impl ExternalEditor {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Editor for ExternalEditor {
    fn edit(&self, path: &Path) -> Result<()> {
        let mut parts = self.command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| Error::Internal("empty editor command".to_string()))?;
        tracing::debug!("Launching editor: {} {}", self.command, path.display());
        let status = Command::new(program)
            .args(parts)
            .arg(path)
            .status()
            .map_err(|e| Error::io(format!("Failed to launch editor [{program}]"), e))?;
        if !status.success() {
            return Err(Error::OperationCancelled(format!(
                "Editor [{program}] exited with {status}."
            )));
        }
        Ok(())
    }
}

/// Let the user edit `original` in a scoped temporary file.
///
/// Returns the edited text. An unchanged file, or one emptied by the user,
/// aborts with [`Error::OperationCancelled`].
pub fn online_edit(console: &Console, editor: &dyn Editor, original: &str) -> Result<String> {
    if !console.is_interactive() {
        return Err(Error::UnattendedPrompt(
            "Editing a resource requires a terminal.".to_string(),
        ));
    }
    let file = temp_file(".yaml", original)?;
    editor.edit(file.path())?;
    let edited = std::fs::read_to_string(file.path())
        .map_err(|e| Error::io("Failed to read edited file", e))?;

    if edited.trim().is_empty() || edited == original {
        return Err(Error::OperationCancelled("Edit aborted by user.".to_string()));
    }
    Ok(edited)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_release_runs_on_error_path() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let result: Result<()> = (|| {
            let _guard = scoped((), move |_| flag.store(true, Ordering::SeqCst));
            Err(Error::Internal("boom".into()))
        })();
        assert!(result.is_err());
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_created_dir_rolls_back_unless_committed() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("a").join("b");
        {
            let guard = created_dir(&target).unwrap();
            assert!(guard.exists());
        }
        assert!(!root.path().join("a").exists());

        let guard = created_dir(&target).unwrap();
        let kept = ScopeGuard::into_inner(guard);
        assert!(kept.exists());
    }

    struct Rewrite(&'static str);

    impl Editor for Rewrite {
        fn edit(&self, path: &Path) -> Result<()> {
            std::fs::write(path, self.0).map_err(|e| Error::io("write", e))
        }
    }

    struct Untouched;

    impl Editor for Untouched {
        fn edit(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_online_edit() {
        let (console, _) = Console::captured("", true);
        let edited = online_edit(&console, &Rewrite("name: b\n"), "name: a\n").unwrap();
        assert_eq!(edited, "name: b\n");

        let err = online_edit(&console, &Untouched, "name: a\n").unwrap_err();
        assert!(matches!(err, Error::OperationCancelled(ref m) if m == "Edit aborted by user."));
    }

    #[test]
    fn test_editor_command_preference() {
        let env = crate::config::Environment::from_pairs([("EDITOR", "nano"), ("VISUAL", "code -w")]);
        assert_eq!(editor_command(&env), "code -w");
        assert_eq!(editor_command(&crate::config::Environment::default()), "vi");
    }
}
