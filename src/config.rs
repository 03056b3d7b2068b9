use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
    time::Duration,
};

use anyhow::Context;
use mjpeg_bus::{
    args::{
        CameraInput, CaptureRect, DesktopInput, FileInput, FpsMode, HttpInput, InputSource,
        OutputOptions, OutputQuality, RtmpInput, RtmpLiveType, RtspInput, RtspTransport,
    },
    scanner::{DEFAULT_MAX_FRAME_SIZE, ScannerConfig},
    sink::DEFAULT_SINK_CAPACITY,
    LatencyLevel,
};
use serde::{Deserialize, Serialize};

pub const CONFIG_ENV: &str = "LITE_RECORDER_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "recorder.json";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InputRequest {
    Camera {
        device: String,
        width: Option<u32>,
        height: Option<u32>,
        framerate: Option<f64>,
    },
    Desktop {
        rect: Option<RectRequest>,
        framerate: Option<f64>,
    },
    File {
        paths: Vec<PathBuf>,
    },
    Rtsp {
        url: String,
        transport: Option<String>,
        #[serde(default)]
        timeout_secs: u32,
        probe_size: Option<u32>,
    },
    Http {
        url: String,
        #[serde(default)]
        timeout_secs: u32,
        probe_size: Option<u32>,
    },
    Rtmp {
        url: String,
        live: Option<String>,
        probe_size: Option<u32>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RectRequest {
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    pub dir: PathBuf,
    /// Save every n-th delivered frame.
    pub every: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub input: InputRequest,
    pub quality: String,
    pub fps_mode: Option<String>,
    pub framerate: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub latency: String,
    pub sink_capacity: usize,
    pub max_frame_size: usize,
    pub shutdown_timeout_ms: u64,
    pub ffmpeg_path: Option<PathBuf>,
    pub snapshot: Option<SnapshotConfig>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            input: InputRequest::Desktop {
                rect: None,
                framerate: Some(30.0),
            },
            quality: "medium".to_string(),
            fps_mode: None,
            framerate: None,
            width: None,
            height: None,
            latency: "high".to_string(),
            sink_capacity: DEFAULT_SINK_CAPACITY,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            shutdown_timeout_ms: 5000,
            ffmpeg_path: None,
            snapshot: None,
        }
    }
}

impl RecorderConfig {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads `path`, falling back to the defaults when it does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            log::info!("{} not found, using default configuration", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn input_source(&self) -> anyhow::Result<InputSource> {
        let source = match &self.input {
            InputRequest::Camera {
                device,
                width,
                height,
                framerate,
            } => {
                let mut camera = CameraInput::new(device)?;
                if let (Some(w), Some(h)) = (width, height) {
                    camera = camera.with_video_size(*w, *h)?;
                }
                if let Some(fps) = framerate {
                    camera = camera.with_framerate(*fps)?;
                }
                camera.into()
            }
            InputRequest::Desktop { rect, framerate } => {
                let mut desktop = DesktopInput::new();
                if let Some(r) = rect {
                    desktop = desktop.with_rect(CaptureRect {
                        x: r.x,
                        y: r.y,
                        width: r.width,
                        height: r.height,
                    });
                }
                if let Some(fps) = framerate {
                    desktop = desktop.with_framerate(*fps)?;
                }
                desktop.into()
            }
            InputRequest::File { paths } => FileInput::new(paths)?.into(),
            InputRequest::Rtsp {
                url,
                transport,
                timeout_secs,
                probe_size,
            } => {
                let mut rtsp = RtspInput::new(url)?.with_timeout(*timeout_secs);
                if let Some(transport) = transport {
                    let transport = match transport.to_ascii_lowercase().as_str() {
                        "tcp" => RtspTransport::Tcp,
                        "udp" => RtspTransport::Udp,
                        other => anyhow::bail!("unknown rtsp transport: {}", other),
                    };
                    rtsp = rtsp.with_transport(transport)?;
                }
                if let Some(bytes) = probe_size {
                    rtsp = rtsp.with_probe_size(*bytes)?;
                }
                rtsp.into()
            }
            InputRequest::Http {
                url,
                timeout_secs,
                probe_size,
            } => {
                let mut http = HttpInput::new(url)?.with_timeout(*timeout_secs);
                if let Some(bytes) = probe_size {
                    http = http.with_probe_size(*bytes)?;
                }
                http.into()
            }
            InputRequest::Rtmp {
                url,
                live,
                probe_size,
            } => {
                let mut rtmp = RtmpInput::new(url)?;
                if let Some(live) = live {
                    let live = match live.to_ascii_lowercase().as_str() {
                        "any" => RtmpLiveType::Any,
                        "live" => RtmpLiveType::Live,
                        "recorded" => RtmpLiveType::Recorded,
                        other => anyhow::bail!("unknown rtmp live type: {}", other),
                    };
                    rtmp = rtmp.with_live_type(live);
                }
                if let Some(bytes) = probe_size {
                    rtmp = rtmp.with_probe_size(*bytes)?;
                }
                rtmp.into()
            }
        };
        Ok(source)
    }

    pub fn output_options(&self) -> anyhow::Result<OutputOptions> {
        let quality: OutputQuality = self.quality.parse()?;
        let mut output = OutputOptions::new().with_quality(quality);
        if let Some(mode) = &self.fps_mode {
            output = output.with_fps_mode(mode.parse::<FpsMode>()?);
        }
        if let Some(fps) = self.framerate {
            output = output.with_framerate(fps)?;
        }
        match (self.width, self.height) {
            (Some(w), Some(h)) => output = output.with_size(w, h)?,
            (None, None) => {}
            _ => anyhow::bail!("output width and height must be set together"),
        }
        // surface fps mode conflicts at load time
        output.resolved_fps_mode()?;
        Ok(output)
    }

    pub fn latency_level(&self) -> anyhow::Result<LatencyLevel> {
        Ok(self.latency.parse()?)
    }

    pub fn scanner_config(&self) -> anyhow::Result<ScannerConfig> {
        Ok(ScannerConfig::jpeg(self.max_frame_size)?)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Validates everything that can be checked before spawning.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.input_source()?;
        self.output_options()?;
        self.latency_level()?;
        self.scanner_config()?;
        if self.sink_capacity == 0 {
            anyhow::bail!("sink_capacity must be positive");
        }
        if let Some(snapshot) = &self.snapshot {
            if snapshot.every == 0 {
                anyhow::bail!("snapshot.every must be positive");
            }
        }
        Ok(())
    }
}

pub fn config() -> &'static RecorderConfig {
    static CONFIG: LazyLock<RecorderConfig> = LazyLock::new(|| {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        RecorderConfig::load(&path).unwrap_or_else(|e| {
            eprintln!("Error loading configuration: {:#}", e);
            std::process::exit(1);
        })
    });
    &CONFIG
}
