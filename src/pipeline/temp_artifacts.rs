use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, warn};

pub const TEMP_PREFIX: &str = "skyequi-tmp";
pub const TOKEN_DIGITS: usize = 10;
const MAX_NAME_ATTEMPTS: usize = 32;

pub trait TempTokenSource: Send + Sync + 'static {
    fn next_token(&self) -> String;
}

#[derive(Debug)]
pub struct RandomDigitTokens {
    rng: Mutex<StdRng>,
    digits: usize,
}

impl RandomDigitTokens {
    pub fn from_os_rng() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
            digits: TOKEN_DIGITS,
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            digits: TOKEN_DIGITS,
        }
    }
}

impl TempTokenSource for RandomDigitTokens {
    fn next_token(&self) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        (0..self.digits)
            .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
            .collect()
    }
}

/// Hands out collision-free temp paths under one root and deletes them again.
///
/// Every name is reserved on disk with create-new semantics, so two managers
/// (or two processes) sharing a directory can never hand out the same file.
pub struct TempArtifactManager {
    root: PathBuf,
    tokens: Arc<dyn TempTokenSource>,
    live: Mutex<HashSet<PathBuf>>,
}

impl TempArtifactManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tokens: Arc::new(RandomDigitTokens::from_os_rng()),
            live: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_token_source(mut self, tokens: Arc<dyn TempTokenSource>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn new_temp_path(&self, suffix: &str) -> Result<PathBuf, TempArtifactError> {
        fs::create_dir_all(self.root.as_path()).map_err(|source| TempArtifactError::Root {
            path: self.root.clone(),
            source,
        })?;

        for _ in 0..MAX_NAME_ATTEMPTS {
            let candidate = self.root.join(format!(
                "{TEMP_PREFIX}{}{suffix}",
                self.tokens.next_token()
            ));
            let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
            if live.contains(&candidate) {
                continue;
            }
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(candidate.as_path())
            {
                Ok(_) => {
                    live.insert(candidate.clone());
                    debug!(path = %candidate.display(), "reserved temp artifact");
                    return Ok(candidate);
                }
                Err(error) if error.kind() == ErrorKind::AlreadyExists => continue,
                Err(source) => {
                    return Err(TempArtifactError::Reserve {
                        path: candidate,
                        source,
                    })
                }
            }
        }

        Err(TempArtifactError::NamesExhausted {
            root: self.root.clone(),
            attempts: MAX_NAME_ATTEMPTS,
        })
    }

    /// Best effort: a file that cannot be removed only produces a warning.
    pub fn release(&self, path: &Path) {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "released temp artifact"),
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => warn!(
                path = %path.display(),
                error = %error,
                "could not delete temporary file"
            ),
        }
    }

    pub fn is_live(&self, path: &Path) -> bool {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path)
    }

    pub fn live_count(&self) -> usize {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn scope(&self) -> TempArtifactScope<'_> {
        TempArtifactScope {
            manager: self,
            created: Vec::new(),
        }
    }
}

/// Temp artifacts owned by a single job; all of them are released on drop.
pub struct TempArtifactScope<'a> {
    manager: &'a TempArtifactManager,
    created: Vec<PathBuf>,
}

impl TempArtifactScope<'_> {
    pub fn create(&mut self, suffix: &str) -> Result<PathBuf, TempArtifactError> {
        let path = self.manager.new_temp_path(suffix)?;
        self.created.push(path.clone());
        Ok(path)
    }

    pub fn created(&self) -> &[PathBuf] {
        self.created.as_slice()
    }

    pub fn release_all(&mut self) {
        for path in self.created.drain(..) {
            self.manager.release(path.as_path());
        }
    }
}

impl Drop for TempArtifactScope<'_> {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[derive(Debug, Error)]
pub enum TempArtifactError {
    #[error("failed to prepare temp directory {}: {source}", path.display())]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to reserve temp file {}: {source}", path.display())]
    Reserve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no free temp name under {} after {attempts} attempts", root.display())]
    NamesExhausted { root: PathBuf, attempts: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::{SystemTime, UNIX_EPOCH};

    struct ScriptedTokens(Mutex<VecDeque<String>>);

    impl ScriptedTokens {
        fn new(tokens: &[&str]) -> Arc<Self> {
            Arc::new(Self(Mutex::new(
                tokens.iter().map(|t| t.to_string()).collect(),
            )))
        }
    }

    impl TempTokenSource for ScriptedTokens {
        fn next_token(&self) -> String {
            self.0
                .lock()
                .expect("token mutex poisoned")
                .pop_front()
                .unwrap_or_else(|| String::from("9999999999"))
        }
    }

    fn temp_root(tag: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        std::env::temp_dir().join(format!("skybox_temp_artifacts_{tag}_{stamp}"))
    }

    #[test]
    fn names_use_prefix_ten_digits_and_suffix() {
        let root = temp_root("names");
        let manager = TempArtifactManager::new(root.as_path())
            .with_token_source(Arc::new(RandomDigitTokens::seeded(7)));
        let path = manager.new_temp_path(".bmp").expect("temp path");
        let name = path
            .file_name()
            .and_then(|v| v.to_str())
            .expect("utf-8 name");

        assert!(name.starts_with(TEMP_PREFIX));
        assert!(name.ends_with(".bmp"));
        let token = &name[TEMP_PREFIX.len()..name.len() - ".bmp".len()];
        assert_eq!(token.len(), TOKEN_DIGITS);
        assert!(token.chars().all(|c| c.is_ascii_digit()));
        assert!(path.is_file(), "name should be reserved on disk");
        assert!(manager.is_live(path.as_path()));

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn seeded_sources_are_deterministic() {
        let a = RandomDigitTokens::seeded(42);
        let b = RandomDigitTokens::seeded(42);
        assert_eq!(a.next_token(), b.next_token());
        assert_eq!(a.next_token(), b.next_token());
    }

    #[test]
    fn colliding_tokens_are_retried() {
        let root = temp_root("collide");
        let manager = TempArtifactManager::new(root.as_path())
            .with_token_source(ScriptedTokens::new(&["0000000001", "0000000001", "0000000002"]));

        let first = manager.new_temp_path(".jpg").expect("first");
        let second = manager.new_temp_path(".jpg").expect("second");
        assert_ne!(first, second);
        assert!(second.ends_with("skyequi-tmp0000000002.jpg"));

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn names_already_on_disk_are_skipped_across_managers() {
        let root = temp_root("shared");
        let a = TempArtifactManager::new(root.as_path())
            .with_token_source(ScriptedTokens::new(&["1111111111"]));
        let b = TempArtifactManager::new(root.as_path())
            .with_token_source(ScriptedTokens::new(&["1111111111", "2222222222"]));

        let from_a = a.new_temp_path(".bmp").expect("a");
        let from_b = b.new_temp_path(".bmp").expect("b");
        assert_ne!(from_a, from_b);

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn exhausted_names_error_out() {
        let root = temp_root("exhaust");
        let manager = TempArtifactManager::new(root.as_path())
            .with_token_source(ScriptedTokens::new(&[]));
        manager.new_temp_path(".bmp").expect("fallback token once");
        let err = manager
            .new_temp_path(".bmp")
            .expect_err("same token every time");
        assert!(matches!(err, TempArtifactError::NamesExhausted { .. }));

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn scope_releases_everything_on_drop() {
        let root = temp_root("scope");
        let manager = TempArtifactManager::new(root.as_path());
        let created = {
            let mut scope = manager.scope();
            scope.create(".bmp").expect("bmp");
            scope.create(".jpg").expect("jpg");
            scope.created().to_vec()
        };
        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|p| !p.exists()));
        assert_eq!(manager.live_count(), 0);

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn release_tolerates_files_that_are_already_gone() {
        let root = temp_root("gone");
        let manager = TempArtifactManager::new(root.as_path());
        let path = manager.new_temp_path(".jpg").expect("temp path");
        fs::remove_file(path.as_path()).expect("manual delete");
        manager.release(path.as_path());
        manager.release(path.as_path());
        assert!(!manager.is_live(path.as_path()));

        let _ = fs::remove_dir_all(root);
    }
}
