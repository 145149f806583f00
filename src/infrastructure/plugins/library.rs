//! Shared libraries opened from a private copy
//!
//! The dynamic linker hands back its existing handle when the same path is
//! opened twice, so a rebuilt library would be masked by the old one. Every
//! open therefore copies the file to a unique path in the temp directory.
//! The copy is deleted once the library is closed.

use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::{debug, warn};
use uuid::Uuid;

use super::cache::ModuleToken;
use crate::application::errors::{HostError, HostResult};

#[derive(Debug)]
pub struct PluginLibrary {
    library: ManuallyDrop<Library>,
    shadow: PathBuf,
}

impl PluginLibrary {
    /// Copies `path` aside and opens the copy.
    pub fn open(name: &str, path: &Path, token: ModuleToken) -> HostResult<Self> {
        if !path.is_file() {
            return Err(HostError::PluginNotInstantiated(format!(
                "{}: library not found: {}",
                name,
                path.display()
            )));
        }
        let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let shadow = std::env::temp_dir().join(format!("plughost-{token}-{}-{file_name}", Uuid::new_v4().simple()));
        std::fs::copy(path, &shadow)
            .map_err(|e| HostError::PluginNotInstantiated(format!("{}: {}", name, e)))?;

        // SAFETY: loading runs the library's initializers; plugin libraries
        // are trusted code.
        match unsafe { Library::new(&shadow) } {
            Ok(library) => {
                debug!(plugin = %name, path = %shadow.display(), "Library opened");
                Ok(Self {
                    library: ManuallyDrop::new(library),
                    shadow,
                })
            }
            Err(e) => {
                remove_copy(&shadow);
                Err(HostError::PluginNotInstantiated(format!("{}: failed to load library: {}", name, e)))
            }
        }
    }

    pub fn shadow_path(&self) -> &Path {
        &self.shadow
    }
}

impl Deref for PluginLibrary {
    type Target = Library;

    fn deref(&self) -> &Library {
        &self.library
    }
}

impl Drop for PluginLibrary {
    fn drop(&mut self) {
        // SAFETY: `library` is not touched again after this point.
        unsafe { ManuallyDrop::drop(&mut self.library) };
        remove_copy(&self.shadow);
    }
}

fn remove_copy(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "Failed to remove library copy");
    }
}
