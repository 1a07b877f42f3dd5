//! Fixed filesystem layout produced by the pipeline.
//!
//! Output locations are framework-owned: the builder always overrides the
//! packaging tool's dist/work/spec paths with these directories, and the
//! credential store and tool directory live at fixed spots, so downstream
//! stages can locate artifacts regardless of what the caller passed.

use crate::error::Result;
use std::path::{Path, PathBuf};

/// Directory layout rooted at the build root (default `builds/`).
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    /// Creates a layout anchored at `root` without touching the filesystem.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Build root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where finished artifacts land (`--distpath`).
    pub fn dist_dir(&self) -> PathBuf {
        self.root.join("dist")
    }

    /// Packaging tool scratch space (`--workpath`).
    pub fn work_dir(&self) -> PathBuf {
        self.root.join("work")
    }

    /// Packaging tool spec output (`--specpath`).
    pub fn spec_dir(&self) -> PathBuf {
        self.root.join("spec")
    }

    /// Fixed credential store holding `<name>.pfx` / `<name>.cer` pairs.
    pub fn cert_store_dir(&self) -> PathBuf {
        self.root.join("certs")
    }

    /// Directory holding provisioned tools and their co-located libraries.
    ///
    /// Lives under the user cache dir when one exists so the binaries
    /// persist across runs and across build roots.
    pub fn tools_dir(&self) -> PathBuf {
        dirs::cache_dir()
            .map(|d| d.join("signforge").join("tools"))
            .unwrap_or_else(|| self.root.join("tools"))
    }

    /// Creates every framework-owned directory.
    pub async fn ensure(&self) -> Result<()> {
        for dir in [
            self.dist_dir(),
            self.work_dir(),
            self.spec_dir(),
            self.cert_store_dir(),
            self.tools_dir(),
        ] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::new("builds")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subdirectories_hang_off_the_root() {
        let layout = Layout::new("/tmp/sf-root");
        assert_eq!(layout.dist_dir(), Path::new("/tmp/sf-root/dist"));
        assert_eq!(layout.work_dir(), Path::new("/tmp/sf-root/work"));
        assert_eq!(layout.spec_dir(), Path::new("/tmp/sf-root/spec"));
        assert_eq!(layout.cert_store_dir(), Path::new("/tmp/sf-root/certs"));
    }
}
