use std::{env, fmt};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HostOs {
    Windows,
    Linux,
    MacOs,
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HostArch {
    X86,
    X64,
    Arm,
    Arm64,
    LoongArch64,
    Other,
}

/// What the host looks like, probed once at start-up and handed to
/// whatever needs to pick an input device or a bundled binary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HostPlatform {
    pub os: HostOs,
    pub arch: HostArch,
}

impl HostPlatform {
    pub const fn new(os: HostOs, arch: HostArch) -> Self {
        Self { os, arch }
    }

    /// The platform this binary was built for.
    pub fn detect() -> Self {
        let os = match env::consts::OS {
            "windows" => HostOs::Windows,
            "linux" => HostOs::Linux,
            "macos" => HostOs::MacOs,
            _ => HostOs::Other,
        };
        let arch = match env::consts::ARCH {
            "x86" => HostArch::X86,
            "x86_64" => HostArch::X64,
            "arm" => HostArch::Arm,
            "aarch64" => HostArch::Arm64,
            "loongarch64" => HostArch::LoongArch64,
            _ => HostArch::Other,
        };
        let platform = Self { os, arch };
        log::debug!("host platform: {}", platform);
        platform
    }

    pub fn is_windows(&self) -> bool {
        self.os == HostOs::Windows
    }

    /// Folder name under `runtimes/` holding bundled binaries for this
    /// host, if we ship any.
    pub fn runtime_dir(&self) -> Option<&'static str> {
        match (self.os, self.arch) {
            (HostOs::Windows, HostArch::X86) => Some("win-x86"),
            (HostOs::Windows, HostArch::X64) => Some("win-x64"),
            (HostOs::Windows, HostArch::Arm64) => Some("win-arm64"),
            (HostOs::Linux, HostArch::X64) => Some("linux-x64"),
            (HostOs::Linux, HostArch::Arm) => Some("linux-arm"),
            (HostOs::Linux, HostArch::Arm64) => Some("linux-arm64"),
            (HostOs::Linux, HostArch::LoongArch64) => Some("linux-loongarch64"),
            _ => None,
        }
    }

    /// File name of an executable on this host.
    pub fn executable_name(&self, stem: &str) -> String {
        if self.is_windows() {
            format!("{}.exe", stem)
        } else {
            stem.to_string()
        }
    }
}

impl fmt::Display for HostPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.os, self.arch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_dirs() {
        let cases = [
            (HostOs::Windows, HostArch::X86, Some("win-x86")),
            (HostOs::Windows, HostArch::X64, Some("win-x64")),
            (HostOs::Windows, HostArch::Arm64, Some("win-arm64")),
            (HostOs::Linux, HostArch::X64, Some("linux-x64")),
            (HostOs::Linux, HostArch::Arm, Some("linux-arm")),
            (HostOs::Linux, HostArch::Arm64, Some("linux-arm64")),
            (HostOs::Linux, HostArch::LoongArch64, Some("linux-loongarch64")),
            (HostOs::Windows, HostArch::Arm, None),
            (HostOs::MacOs, HostArch::Arm64, None),
        ];
        for (os, arch, expected) in cases {
            assert_eq!(HostPlatform::new(os, arch).runtime_dir(), expected, "{:?}/{:?}", os, arch);
        }
    }

    #[test]
    fn test_executable_name() {
        let win = HostPlatform::new(HostOs::Windows, HostArch::X64);
        let linux = HostPlatform::new(HostOs::Linux, HostArch::X64);
        assert_eq!(win.executable_name("ffmpeg"), "ffmpeg.exe");
        assert_eq!(linux.executable_name("ffmpeg"), "ffmpeg");
    }

    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    #[test]
    fn test_detect_matches_build_target() {
        assert_eq!(
            HostPlatform::detect(),
            HostPlatform::new(HostOs::Linux, HostArch::X64)
        );
    }
}
