use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use siprems_ai::{ArtifactMetadata, ArtifactStore, ForecastError, ModelArtifact, FORMAT_VERSION};
use siprems_core::TargetId;

const CURRENT: &str = "CURRENT";
const GENERATION_PREFIX: &str = "gen-";
const MODEL_FILE: &str = "model.json";
const METADATA_FILE: &str = "metadata.json";
const READ_ATTEMPTS: usize = 5;

/// Filesystem artifact store.
///
/// Layout per target:
///
/// ```text
/// <root>/<target_id>/CURRENT            name of the live generation
/// <root>/<target_id>/<generation>/model.json
/// <root>/<target_id>/<generation>/metadata.json
/// ```
///
/// A save writes a fresh generation directory, then replaces `CURRENT` via
/// write-to-temp + rename. Readers resolve `CURRENT` first, so they see the
/// old generation or the new one in full. Saves through one store (and its
/// clones) are serialised. After publishing, every generation older than the
/// new one is removed along with stale pointer temp files, so generations
/// orphaned by an interrupted save do not accumulate. A reader racing that
/// removal re-resolves `CURRENT`.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FsArtifactStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ForecastError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| io_error("create root", &root, e))?;
        Ok(Self {
            root,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target_dir(&self, target_id: &TargetId) -> PathBuf {
        self.root.join(target_id.as_str())
    }

    fn current_generation(&self, target_id: &TargetId) -> Result<Option<String>, ForecastError> {
        let pointer = self.target_dir(target_id).join(CURRENT);
        match fs::read_to_string(&pointer) {
            Ok(s) => {
                let name = s.trim();
                if name.is_empty() {
                    return Err(ForecastError::artifact(format!(
                        "empty pointer at {}",
                        pointer.display()
                    )));
                }
                Ok(Some(name.to_string()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("read pointer", &pointer, e)),
        }
    }

    /// Resolve `CURRENT` and read one file of that generation, retrying when
    /// the generation disappears underneath us.
    fn read_current<T: DeserializeOwned>(
        &self,
        target_id: &TargetId,
        file: &str,
    ) -> Result<Option<(String, T)>, ForecastError> {
        let mut last_err = None;
        for attempt in 1..=READ_ATTEMPTS {
            let Some(generation) = self.current_generation(target_id)? else {
                return Ok(None);
            };
            let path = self.target_dir(target_id).join(&generation).join(file);
            match fs::read(&path) {
                Ok(bytes) => {
                    let value = serde_json::from_slice(&bytes).map_err(|e| {
                        ForecastError::artifact(format!("corrupt {}: {e}", path.display()))
                    })?;
                    return Ok(Some((generation, value)));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(target_id = %target_id, generation = %generation, attempt, "generation replaced during read; retrying");
                    last_err = Some(io_error("read", &path, e));
                }
                Err(e) => return Err(io_error("read", &path, e)),
            }
        }
        Err(last_err.unwrap_or_else(|| ForecastError::artifact("artifact read failed")))
    }

    /// Best-effort removal of generations older than `live` and of leftover
    /// pointer temp files.
    fn sweep(&self, target_id: &TargetId, live: &str) {
        let dir = self.target_dir(target_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(target_id = %target_id, path = %dir.display(), error = %e, "failed to list generations");
                return;
            }
        };
        for entry in entries.filter_map(Result::ok) {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            let removed = if name.starts_with(GENERATION_PREFIX) && name.as_str() < live && path.is_dir() {
                fs::remove_dir_all(&path)
            } else if name.starts_with(&format!("{CURRENT}.")) && name.ends_with(".tmp") {
                fs::remove_file(&path)
            } else {
                continue;
            };
            match removed {
                Ok(()) => debug!(target_id = %target_id, entry = %name, "removed stale artifact entry"),
                Err(e) => {
                    warn!(target_id = %target_id, path = %path.display(), error = %e, "failed to remove stale artifact entry")
                }
            }
        }
    }
}

impl ArtifactStore for FsArtifactStore {
    #[instrument(skip(self), fields(target_id = %target_id), err)]
    fn load(&self, target_id: &TargetId) -> Result<Option<ModelArtifact>, ForecastError> {
        // Both files must come from one generation.
        for _ in 0..READ_ATTEMPTS {
            let Some((generation, metadata)) =
                self.read_current::<ArtifactMetadata>(target_id, METADATA_FILE)?
            else {
                return Ok(None);
            };
            check_format(&metadata)?;
            let Some((model_generation, model)) = self.read_current(target_id, MODEL_FILE)? else {
                return Ok(None);
            };
            if model_generation == generation {
                return Ok(Some(ModelArtifact { model, metadata }));
            }
        }
        Err(ForecastError::artifact(format!(
            "artifact for {target_id} kept changing during read"
        )))
    }

    #[instrument(skip(self, artifact), fields(target_id = %artifact.target_id()), err)]
    fn save(&self, artifact: &ModelArtifact) -> Result<(), ForecastError> {
        let _serialised = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let target_id = artifact.target_id();
        let dir = self.target_dir(target_id);
        fs::create_dir_all(&dir).map_err(|e| io_error("create target dir", &dir, e))?;

        let generation = format!("{GENERATION_PREFIX}{}", Uuid::now_v7().simple());
        let gen_dir = dir.join(&generation);
        fs::create_dir(&gen_dir).map_err(|e| io_error("create generation", &gen_dir, e))?;

        let written = write_json(&gen_dir.join(MODEL_FILE), &artifact.model)
            .and_then(|_| write_json(&gen_dir.join(METADATA_FILE), &artifact.metadata));
        if let Err(e) = written {
            let _ = fs::remove_dir_all(&gen_dir);
            return Err(e);
        }

        let tmp = dir.join(format!("{CURRENT}.{generation}.tmp"));
        let swapped = write_synced(&tmp, generation.as_bytes())
            .and_then(|_| fs::rename(&tmp, dir.join(CURRENT)))
            .map_err(|e| io_error("swap pointer", &tmp, e));
        if let Err(e) = swapped {
            let _ = fs::remove_file(&tmp);
            let _ = fs::remove_dir_all(&gen_dir);
            return Err(e);
        }

        debug!(target_id = %target_id, generation = %generation, "artifact generation published");
        self.sweep(target_id, &generation);
        Ok(())
    }

    fn metadata(&self, target_id: &TargetId) -> Result<Option<ArtifactMetadata>, ForecastError> {
        let Some((_, metadata)) = self.read_current::<ArtifactMetadata>(target_id, METADATA_FILE)? else {
            return Ok(None);
        };
        check_format(&metadata)?;
        Ok(Some(metadata))
    }
}

fn check_format(metadata: &ArtifactMetadata) -> Result<(), ForecastError> {
    if metadata.format_version > FORMAT_VERSION {
        return Err(ForecastError::artifact(format!(
            "artifact format {} is newer than supported {FORMAT_VERSION}",
            metadata.format_version
        )));
    }
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ForecastError> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| ForecastError::artifact(format!("serialize {}: {e}", path.display())))?;
    write_synced(path, &bytes).map_err(|e| io_error("write", path, e))
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn io_error(op: &str, path: &Path, err: io::Error) -> ForecastError {
    ForecastError::artifact(format!("{op} {}: {err}", path.display()))
}
