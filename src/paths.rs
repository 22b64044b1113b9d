//! Path resolution for viaduct
//!
//! # Environment Variables
//!
//! - `VIADUCT_DUMP_DIR` - Directory manifest dumps are written to
//! - `VIADUCT_SCRATCH_DIR` - Per-run scratch directory, removed after a clean run
//!
//! # Defaults
//!
//! - dump_dir(): the system temp directory
//! - scratch_dir(): `~/.viaduct/tmp/{pid}`, or under the temp directory when
//!   no home directory is known

use std::path::PathBuf;

/// Environment variable for the dump directory override
pub const ENV_DUMP_DIR: &str = "VIADUCT_DUMP_DIR";

/// Environment variable for the scratch directory override
pub const ENV_SCRATCH_DIR: &str = "VIADUCT_SCRATCH_DIR";

/// Directory manifest dumps are written to
pub fn dump_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_DUMP_DIR) {
        let path = expand(&dir);
        log::debug!("Using dump dir from {}: {}", ENV_DUMP_DIR, path.display());
        return path;
    }
    std::env::temp_dir()
}

/// Scratch directory for this run
pub fn scratch_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_SCRATCH_DIR) {
        let path = expand(&dir);
        log::debug!(
            "Using scratch dir from {}: {}",
            ENV_SCRATCH_DIR,
            path.display()
        );
        return path;
    }

    let base = dirs::home_dir()
        .map(|home| home.join(".viaduct").join("tmp"))
        .unwrap_or_else(|| std::env::temp_dir().join("viaduct"));
    base.join(std::process::id().to_string())
}

/// Expand ~ and environment variables in a path string.
///
/// Unknown variables are left as written.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    /// Helper to run a test with temporary env var
    ///
    /// # Safety
    /// Uses unsafe env::set_var/remove_var; only call from tests that do not
    /// read the same variable concurrently.
    fn with_env_var<F, R>(key: &str, value: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let original = env::var(key).ok();
        // SAFETY: each test uses its own variable
        unsafe { env::set_var(key, value) };
        let result = f();
        match original {
            // SAFETY: as above
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
        result
    }

    #[test]
    fn test_dump_dir_env_override() {
        with_env_var(ENV_DUMP_DIR, "/custom/dumps", || {
            assert_eq!(dump_dir(), PathBuf::from("/custom/dumps"));
        });
    }

    #[test]
    fn test_scratch_dir_env_override_expands() {
        with_env_var("VIADUCT_TEST_SCRATCH_BASE", "/srv", || {
            with_env_var(ENV_SCRATCH_DIR, "$VIADUCT_TEST_SCRATCH_BASE/scratch", || {
                assert_eq!(scratch_dir(), PathBuf::from("/srv/scratch"));
            });
        });
    }

    #[test]
    fn test_expand_with_tilde() {
        let result = expand("~/test/path");
        let home = dirs::home_dir().unwrap();
        assert_eq!(result, home.join("test").join("path"));
    }

    #[test]
    fn test_expand_absolute() {
        assert_eq!(expand("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_unknown_env_var_unchanged() {
        let result = expand("/path/$NONEXISTENT_VAR_12345/file");
        assert_eq!(result, PathBuf::from("/path/$NONEXISTENT_VAR_12345/file"));
    }
}
