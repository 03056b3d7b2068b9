use std::{
    env,
    path::{Path, PathBuf},
};

use crate::{
    error::{BusError, BusResult},
    platform::{HostOs, HostPlatform},
};

pub const TRANSCODER_NAME: &str = "ffmpeg";

const LINUX_SYSTEM_DIRS: &[&str] = &["/usr/bin", "/usr/local/bin", "/usr/share"];

/// Finds the transcoder executable.
///
/// Bundled copies win over system ones: `runtimes/<arch>/bin`, `bin` and the
/// directory itself under the application base dir, then the working
/// directory, then the system directories (`PATH` outside Linux).
#[derive(Clone, Debug)]
pub struct BinaryLocator {
    platform: HostPlatform,
    base_dir: Option<PathBuf>,
    working_dir: Option<PathBuf>,
    system_dirs: Vec<PathBuf>,
}

impl BinaryLocator {
    /// A locator rooted at the running executable's directory and the
    /// current working directory.
    pub fn new(platform: HostPlatform) -> Self {
        let base_dir = env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        let working_dir = env::current_dir().ok();
        let system_dirs = match platform.os {
            HostOs::Linux => LINUX_SYSTEM_DIRS.iter().map(PathBuf::from).collect(),
            _ => env::var_os("PATH")
                .map(|path| env::split_paths(&path).collect())
                .unwrap_or_default(),
        };
        Self {
            platform,
            base_dir,
            working_dir,
            system_dirs,
        }
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_system_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.system_dirs = dirs;
        self
    }

    /// Directories searched, in order, without duplicates.
    pub fn search_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::new();
        if let Some(base) = &self.base_dir {
            if let Some(arch) = self.platform.runtime_dir() {
                dirs.push(base.join("runtimes").join(arch).join("bin"));
            }
            dirs.push(base.join("bin"));
            dirs.push(base.clone());
        }
        if let Some(cwd) = &self.working_dir {
            dirs.push(cwd.clone());
        }
        dirs.extend(self.system_dirs.iter().cloned());

        let mut unique: Vec<PathBuf> = Vec::with_capacity(dirs.len());
        for dir in dirs {
            if !unique.contains(&dir) {
                unique.push(dir);
            }
        }
        unique
    }

    pub fn locate(&self, stem: &str) -> BusResult<PathBuf> {
        let file_name = self.platform.executable_name(stem);
        for dir in self.search_dirs() {
            let candidate = dir.join(&file_name);
            if candidate.is_file() {
                log::debug!("found {} at {}", stem, candidate.display());
                return Ok(candidate);
            }
        }
        Err(BusError::BinaryNotFound(format!(
            "{} not found in any of the search directories",
            file_name
        )))
    }
}

/// `explicit` if given (it must exist), otherwise a search for the
/// transcoder.
pub fn locate_transcoder(platform: HostPlatform, explicit: Option<&Path>) -> BusResult<PathBuf> {
    match explicit {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(path) => Err(BusError::BinaryNotFound(path.display().to_string())),
        None => BinaryLocator::new(platform).locate(TRANSCODER_NAME),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::platform::HostArch;

    const LINUX: HostPlatform = HostPlatform::new(HostOs::Linux, HostArch::Arm64);

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("mjpeg-bus-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_search_order() {
        let locator = BinaryLocator::new(LINUX)
            .with_base_dir("/opt/app")
            .with_working_dir("/home/me")
            .with_system_dirs(vec![PathBuf::from("/usr/bin"), PathBuf::from("/opt/app")]);

        assert_eq!(
            locator.search_dirs(),
            vec![
                PathBuf::from("/opt/app/runtimes/linux-arm64/bin"),
                PathBuf::from("/opt/app/bin"),
                PathBuf::from("/opt/app"),
                PathBuf::from("/home/me"),
                PathBuf::from("/usr/bin"),
            ]
        );
    }

    #[test]
    fn test_linux_system_dirs() {
        let dirs = BinaryLocator::new(LINUX).system_dirs;
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("/usr/bin"),
                PathBuf::from("/usr/local/bin"),
                PathBuf::from("/usr/share"),
            ]
        );
    }

    #[test]
    fn test_bundled_binary_wins() {
        let base = scratch_dir("bundled");
        let bundled = base.join("runtimes/linux-arm64/bin");
        fs::create_dir_all(&bundled).unwrap();
        fs::write(bundled.join("ffmpeg"), b"").unwrap();
        fs::create_dir_all(base.join("bin")).unwrap();
        fs::write(base.join("bin/ffmpeg"), b"").unwrap();

        let found = BinaryLocator::new(LINUX)
            .with_base_dir(&base)
            .with_system_dirs(Vec::new())
            .locate(TRANSCODER_NAME)
            .unwrap();

        assert_eq!(found, bundled.join("ffmpeg"));
        fs::remove_dir_all(&base).unwrap();
    }

    #[test]
    fn test_missing_binary() {
        let base = scratch_dir("missing");
        let result = BinaryLocator::new(LINUX)
            .with_base_dir(&base)
            .with_working_dir(&base)
            .with_system_dirs(Vec::new())
            .locate("no-such-transcoder");

        assert!(matches!(result, Err(BusError::BinaryNotFound(_))));
        fs::remove_dir_all(&base).unwrap();
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let manifest = Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml"));
        assert_eq!(
            locate_transcoder(LINUX, Some(manifest)).unwrap(),
            manifest.to_path_buf()
        );
        assert!(matches!(
            locate_transcoder(LINUX, Some(Path::new("/no/such/ffmpeg"))),
            Err(BusError::BinaryNotFound(_))
        ));
    }
}
