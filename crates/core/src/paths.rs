use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".pricesync"))
            .unwrap_or_else(|| PathBuf::from(".pricesync"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    /// Default directory for per-run audit logs (`<date>_<n>.json`).
    pub fn logs_dir(&self) -> PathBuf {
        self.base.join("logs")
    }

    /// Parent of the throwaway browser profiles, one per automation surface.
    pub fn browser_profiles_dir(&self) -> PathBuf {
        self.base.join("browser").join("profiles")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        std::fs::create_dir_all(self.logs_dir())?;
        std::fs::create_dir_all(self.browser_profiles_dir())?;
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_dirs_creates_layout() {
        let temp_dir = TempDir::new().unwrap();
        let paths = Paths::with_base(temp_dir.path().join("ps"));
        paths.ensure_dirs().unwrap();
        assert!(paths.logs_dir().is_dir());
        assert!(paths.browser_profiles_dir().is_dir());
        assert_eq!(paths.config_file(), temp_dir.path().join("ps").join("config.json"));
    }
}
