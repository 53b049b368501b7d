use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::Path;

// Exclusive claim on one modem. The service and the one-shot `read`/`dial`
// commands share the same lock path, so only one of them drives the serial
// port at a time.
pub struct ModemLock {
    file: File,
}

impl ModemLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating lock directory failed: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("opening lock file failed: {}", path.display()))?;

        file.try_lock_exclusive().with_context(|| {
            format!("modem is already in use by another process (lock {})", path.display())
        })?;

        Ok(Self { file })
    }
}

impl Drop for ModemLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
