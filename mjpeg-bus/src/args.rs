//! Command-line assembly for the transcoder.
//!
//! Every input kind validates its own required fields when it is built, so
//! a value of [`InputSource`] is always complete. [`TranscoderArgs::build`]
//! combines it with the output options and latency level and checks the
//! rules that span both.
//!
//! Arguments go straight to the child's argv without a shell, so nothing
//! here is quoted.

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::{
    error::{BusError, BusResult},
    latency::{LatencyLevel, LatencyProfile},
    platform::{HostOs, HostPlatform},
};

/// Capture size used for cameras unless told otherwise.
pub const DEFAULT_CAMERA_SIZE: (u32, u32) = (1280, 720);

fn check_framerate(framerate: f64) -> BusResult<f64> {
    if framerate.is_finite() && framerate > 0.0 {
        Ok(framerate)
    } else {
        Err(BusError::config(format!("invalid framerate: {}", framerate)))
    }
}

fn check_size(width: u32, height: u32) -> BusResult<(u32, u32)> {
    if width == 0 || height == 0 {
        return Err(BusError::config(format!("invalid size: {}x{}", width, height)));
    }
    Ok((width, height))
}

fn check_url(url: &str, schemes: &[&str]) -> BusResult<String> {
    let url = url.trim();
    let scheme = url.split_once("://").map(|(s, _)| s.to_ascii_lowercase());
    match scheme {
        Some(s) if schemes.contains(&s.as_str()) => Ok(url.to_string()),
        _ => Err(BusError::config(format!(
            "{:?} is not a {} url",
            url,
            schemes.join("/")
        ))),
    }
}

// ============================================================================
// Inputs
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct CameraInput {
    device: String,
    video_size: (u32, u32),
    framerate: Option<f64>,
}

impl CameraInput {
    /// `device` is the DirectShow device name on Windows and the device
    /// node (e.g. `/dev/video0`) on Linux.
    pub fn new(device: &str) -> BusResult<Self> {
        let device = device.trim();
        if device.is_empty() {
            return Err(BusError::config("camera device name is required"));
        }
        Ok(Self {
            device: device.to_string(),
            video_size: DEFAULT_CAMERA_SIZE,
            framerate: None,
        })
    }

    pub fn with_video_size(mut self, width: u32, height: u32) -> BusResult<Self> {
        self.video_size = check_size(width, height)?;
        Ok(self)
    }

    pub fn with_framerate(mut self, framerate: f64) -> BusResult<Self> {
        self.framerate = Some(check_framerate(framerate)?);
        Ok(self)
    }

    pub fn device(&self) -> &str {
        &self.device
    }
}

/// Screen region to capture. A zero width or height captures the whole
/// screen from the given offset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DesktopInput {
    rect: Option<CaptureRect>,
    framerate: Option<f64>,
}

impl DesktopInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rect(mut self, rect: CaptureRect) -> Self {
        self.rect = Some(rect);
        self
    }

    pub fn with_framerate(mut self, framerate: f64) -> BusResult<Self> {
        self.framerate = Some(check_framerate(framerate)?);
        Ok(self)
    }
}

/// One or more local files, played back to back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInput {
    paths: Vec<PathBuf>,
}

impl FileInput {
    pub fn new<I, P>(paths: I) -> BusResult<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut files = Vec::new();
        for path in paths {
            let path = path.as_ref();
            if !path.is_file() {
                return Err(BusError::config(format!("file {} not found", path.display())));
            }
            files.push(path.to_path_buf());
        }
        if files.is_empty() {
            return Err(BusError::config("at least one input file is required"));
        }
        Ok(Self { paths: files })
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RtspTransport {
    #[default]
    Tcp,
    Udp,
}

impl RtspTransport {
    fn as_str(self) -> &'static str {
        match self {
            RtspTransport::Tcp => "tcp",
            RtspTransport::Udp => "udp",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RtmpLiveType {
    #[default]
    Any,
    Live,
    Recorded,
}

impl RtmpLiveType {
    fn as_str(self) -> &'static str {
        match self {
            RtmpLiveType::Any => "any",
            RtmpLiveType::Live => "live",
            RtmpLiveType::Recorded => "recorded",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RtspInput {
    url: String,
    transport: Option<RtspTransport>,
    timeout_secs: u32,
    probe_size: Option<u32>,
}

impl RtspInput {
    pub fn new(url: &str) -> BusResult<Self> {
        Ok(Self {
            url: check_url(url, &["rtsp", "rtsps"])?,
            transport: None,
            timeout_secs: 0,
            probe_size: None,
        })
    }

    /// Sets the transport. It can only be chosen once; TCP if never set.
    pub fn with_transport(mut self, transport: RtspTransport) -> BusResult<Self> {
        if let Some(current) = self.transport {
            return Err(BusError::config(format!(
                "rtsp transport already set to {}",
                current.as_str()
            )));
        }
        self.transport = Some(transport);
        Ok(self)
    }

    /// Socket timeout in seconds; zero leaves the transcoder default.
    pub fn with_timeout(mut self, secs: u32) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_probe_size(mut self, bytes: u32) -> BusResult<Self> {
        if bytes == 0 {
            return Err(BusError::config("probe size must be positive"));
        }
        self.probe_size = Some(bytes);
        Ok(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpInput {
    url: String,
    timeout_secs: u32,
    probe_size: Option<u32>,
}

impl HttpInput {
    pub fn new(url: &str) -> BusResult<Self> {
        Ok(Self {
            url: check_url(url, &["http", "https"])?,
            timeout_secs: 0,
            probe_size: None,
        })
    }

    pub fn with_timeout(mut self, secs: u32) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_probe_size(mut self, bytes: u32) -> BusResult<Self> {
        if bytes == 0 {
            return Err(BusError::config("probe size must be positive"));
        }
        self.probe_size = Some(bytes);
        Ok(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RtmpInput {
    url: String,
    live: Option<RtmpLiveType>,
    probe_size: Option<u32>,
}

impl RtmpInput {
    pub fn new(url: &str) -> BusResult<Self> {
        Ok(Self {
            url: check_url(url, &["rtmp", "rtmps"])?,
            live: None,
            probe_size: None,
        })
    }

    pub fn with_live_type(mut self, live: RtmpLiveType) -> Self {
        self.live = Some(live);
        self
    }

    pub fn with_probe_size(mut self, bytes: u32) -> BusResult<Self> {
        if bytes == 0 {
            return Err(BusError::config("probe size must be positive"));
        }
        self.probe_size = Some(bytes);
        Ok(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamInput {
    Rtsp(RtspInput),
    Http(HttpInput),
    Rtmp(RtmpInput),
}

#[derive(Clone, Debug, PartialEq)]
pub enum InputSource {
    Camera(CameraInput),
    Desktop(DesktopInput),
    File(FileInput),
    Stream(StreamInput),
}

impl From<CameraInput> for InputSource {
    fn from(input: CameraInput) -> Self {
        InputSource::Camera(input)
    }
}

impl From<DesktopInput> for InputSource {
    fn from(input: DesktopInput) -> Self {
        InputSource::Desktop(input)
    }
}

impl From<FileInput> for InputSource {
    fn from(input: FileInput) -> Self {
        InputSource::File(input)
    }
}

impl From<RtspInput> for InputSource {
    fn from(input: RtspInput) -> Self {
        InputSource::Stream(StreamInput::Rtsp(input))
    }
}

impl From<HttpInput> for InputSource {
    fn from(input: HttpInput) -> Self {
        InputSource::Stream(StreamInput::Http(input))
    }
}

impl From<RtmpInput> for InputSource {
    fn from(input: RtmpInput) -> Self {
        InputSource::Stream(StreamInput::Rtmp(input))
    }
}

// ============================================================================
// Output
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputQuality {
    High,
    #[default]
    Medium,
    Low,
}

impl OutputQuality {
    fn pix_fmt(self) -> &'static str {
        match self {
            OutputQuality::High => "yuv444p",
            OutputQuality::Medium | OutputQuality::Low => "yuv420p",
        }
    }

    fn qscale(self) -> u8 {
        match self {
            OutputQuality::High => 2,
            OutputQuality::Medium => 10,
            OutputQuality::Low => 25,
        }
    }
}

impl FromStr for OutputQuality {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(OutputQuality::High),
            "medium" => Ok(OutputQuality::Medium),
            "low" => Ok(OutputQuality::Low),
            other => Err(BusError::config(format!("unknown output quality: {:?}", other))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FpsMode {
    /// Timestamps pass through untouched.
    Passthrough,
    Vfr,
    /// Frames are duplicated or dropped to hit the output framerate.
    Cfr,
    Auto,
    Drop,
}

impl FpsMode {
    fn as_str(self) -> &'static str {
        match self {
            FpsMode::Passthrough => "passthrough",
            FpsMode::Vfr => "vfr",
            FpsMode::Cfr => "cfr",
            FpsMode::Auto => "auto",
            FpsMode::Drop => "drop",
        }
    }
}

impl FromStr for FpsMode {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "passthrough" => Ok(FpsMode::Passthrough),
            "vfr" => Ok(FpsMode::Vfr),
            "cfr" => Ok(FpsMode::Cfr),
            "auto" => Ok(FpsMode::Auto),
            "drop" => Ok(FpsMode::Drop),
            other => Err(BusError::config(format!("unknown fps mode: {:?}", other))),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct OutputOptions {
    quality: OutputQuality,
    fps_mode: Option<FpsMode>,
    framerate: Option<f64>,
    size: Option<(u32, u32)>,
}

impl OutputOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quality(mut self, quality: OutputQuality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_fps_mode(mut self, mode: FpsMode) -> Self {
        self.fps_mode = Some(mode);
        self
    }

    pub fn with_framerate(mut self, framerate: f64) -> BusResult<Self> {
        self.framerate = Some(check_framerate(framerate)?);
        Ok(self)
    }

    pub fn with_size(mut self, width: u32, height: u32) -> BusResult<Self> {
        self.size = Some(check_size(width, height)?);
        Ok(self)
    }

    pub fn quality(&self) -> OutputQuality {
        self.quality
    }

    /// The effective fps mode: CFR when an output framerate is set and no
    /// mode was chosen, passthrough otherwise.
    pub fn resolved_fps_mode(&self) -> BusResult<FpsMode> {
        match (self.fps_mode, self.framerate) {
            (Some(FpsMode::Cfr), None) => Err(BusError::config(
                "constant frame rate needs an output framerate",
            )),
            (Some(mode @ (FpsMode::Vfr | FpsMode::Passthrough)), Some(_)) => {
                Err(BusError::config(format!(
                    "an output framerate cannot be combined with fps mode {}",
                    mode.as_str()
                )))
            }
            (Some(mode), _) => Ok(mode),
            (None, Some(_)) => Ok(FpsMode::Cfr),
            (None, None) => Ok(FpsMode::Passthrough),
        }
    }
}

// ============================================================================
// Assembly
// ============================================================================

/// A complete, validated transcoder argv (without the program name).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranscoderArgs {
    args: Vec<String>,
    latency: LatencyLevel,
}

#[derive(Default)]
struct ArgList(Vec<String>);

impl ArgList {
    fn push(&mut self, arg: impl Into<String>) -> &mut Self {
        self.0.push(arg.into());
        self
    }

    fn pair(&mut self, key: &str, value: impl fmt::Display) -> &mut Self {
        self.0.push(key.to_string());
        self.0.push(value.to_string());
        self
    }

    fn extend(&mut self, args: &[String]) -> &mut Self {
        self.0.extend_from_slice(args);
        self
    }
}

impl TranscoderArgs {
    pub fn build(
        platform: &HostPlatform,
        input: &InputSource,
        output: &OutputOptions,
        latency: LatencyLevel,
    ) -> BusResult<Self> {
        let fps_mode = output.resolved_fps_mode()?;
        let mut args = ArgList::default();
        args.push("-hide_banner");

        // filter graph and stream mapping go between inputs and outputs
        let mut filters = ArgList::default();

        match input {
            InputSource::Camera(camera) => {
                args.extend(LatencyProfile::new(latency).flags());
                let (format, device) = match platform.os {
                    HostOs::Windows => ("dshow", format!("video={}", camera.device)),
                    HostOs::Linux => ("v4l2", camera.device.clone()),
                    os => return Err(unsupported("camera capture", os)),
                };
                args.push("-an").pair("-f", format);
                let (w, h) = camera.video_size;
                args.pair("-video_size", format!("{}x{}", w, h));
                if let Some(fps) = camera.framerate {
                    args.pair("-r", fps);
                }
                args.pair("-i", device);
            }
            InputSource::Desktop(desktop) => {
                args.extend(LatencyProfile::new(latency).flags());
                let rect = desktop.rect.unwrap_or_default();
                let sized = rect.width > 0 && rect.height > 0;
                let target = match platform.os {
                    HostOs::Windows => {
                        args.push("-an").pair("-f", "gdigrab");
                        if desktop.rect.is_some() {
                            args.pair("-offset_x", rect.x).pair("-offset_y", rect.y);
                        }
                        "desktop".to_string()
                    }
                    HostOs::Linux => {
                        args.push("-an").pair("-f", "x11grab");
                        if desktop.rect.is_some() {
                            format!(":0.0+{},{}", rect.x, rect.y)
                        } else {
                            ":0.0".to_string()
                        }
                    }
                    os => return Err(unsupported("desktop capture", os)),
                };
                if sized {
                    args.pair("-video_size", format!("{}x{}", rect.width, rect.height));
                }
                if let Some(fps) = desktop.framerate {
                    args.pair("-r", fps);
                }
                args.pair("-i", target);
            }
            InputSource::File(file) => {
                let Some((w, h)) = output.size else {
                    return Err(BusError::config("file input needs an output size"));
                };
                args.push("-an");
                for path in &file.paths {
                    args.pair("-i", path.display());
                }
                if file.paths.len() > 1 {
                    let pix_fmt = output.quality.pix_fmt();
                    filters
                        .pair("-filter_complex", concat_graph(file.paths.len(), w, h, pix_fmt))
                        .pair("-map", "[v]");
                }
            }
            InputSource::Stream(stream) => {
                let (profile, probe_size) = match stream {
                    StreamInput::Rtsp(rtsp) => (LatencyProfile::rtsp(latency), rtsp.probe_size),
                    StreamInput::Http(http) => (LatencyProfile::new(latency), http.probe_size),
                    StreamInput::Rtmp(rtmp) => (LatencyProfile::new(latency), rtmp.probe_size),
                };
                let profile = match probe_size {
                    Some(bytes) => profile.with_probe_size(bytes)?,
                    None => profile,
                };
                args.extend(profile.flags()).push("-an");
                let url = match stream {
                    StreamInput::Rtsp(rtsp) => {
                        let transport = rtsp.transport.unwrap_or_default();
                        args.pair("-rtsp_transport", transport.as_str());
                        push_timeout(&mut args, rtsp.timeout_secs);
                        &rtsp.url
                    }
                    StreamInput::Http(http) => {
                        push_timeout(&mut args, http.timeout_secs);
                        &http.url
                    }
                    StreamInput::Rtmp(rtmp) => {
                        if let Some(live) = rtmp.live {
                            args.pair("-rtmp_live", live.as_str());
                        }
                        &rtmp.url
                    }
                };
                args.pair("-i", url);
                filters.pair("-map", "0:v?");
            }
        }

        args.extend(&filters.0);
        args.pair("-f", "image2pipe").pair("-c:v", "mjpeg");
        if let Some((w, h)) = output.size {
            args.pair("-s", format!("{}x{}", w, h));
        }
        if let Some(fps) = output.framerate {
            args.pair("-r", fps);
        }
        args.pair("-pix_fmt", output.quality.pix_fmt())
            .pair("-color_range", "pc")
            .pair("-q:v", output.quality.qscale())
            .pair("-fps_mode", fps_mode.as_str())
            .pair("-flush_packets", 1)
            .pair("-reset_timestamps", 1)
            .push("pipe:1");

        Ok(Self {
            args: args.0,
            latency,
        })
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn latency(&self) -> LatencyLevel {
        self.latency
    }

    pub fn into_vec(self) -> Vec<String> {
        self.args
    }
}

impl fmt::Display for TranscoderArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.args.join(" "))
    }
}

fn push_timeout(args: &mut ArgList, secs: u32) {
    if secs > 0 {
        args.pair("-timeout", u64::from(secs) * 1_000_000);
    }
}

fn unsupported(what: &str, os: HostOs) -> BusError {
    BusError::config(format!("{} is not supported on {:?}", what, os))
}

/// Scales every input to `width`x`height` and concatenates them into `[v]`.
fn concat_graph(inputs: usize, width: u32, height: u32, pix_fmt: &str) -> String {
    let mut parts: Vec<String> = (0..inputs)
        .map(|i| format!("[{i}:v]format={pix_fmt},scale={width}:{height},setsar=1[v{i}]"))
        .collect();
    let labels: String = (0..inputs).map(|i| format!("[v{i}]")).collect();
    parts.push(format!("{labels}concat=n={inputs}:v=1:a=0[v]"));
    parts.join(";")
}

#[cfg(test)]
#[path = "args_test.rs"]
mod args_test;
