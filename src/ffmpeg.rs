// src/ffmpeg.rs

use log::{debug, error, info, warn};
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use vqm::{Frame, Plane, Result, VqmError};

const HDR_TO_SDR_FILTER: &str =
    "zscale=t=linear:npl=100,tonemap=tonemap=hable:desat=0,zscale=t=bt709:p=bt709:m=bt709:r=tv";
const DENOISE_FILTER: &str = "hqdn3d=4:3:6:4";
/// Planes are cropped down to a multiple of this so every block grid tiles exactly.
const ALIGNMENT: u32 = 8;

#[derive(Debug, Clone)]
pub struct VideoInfo {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub frame_count: u64,
    pub fps: f64,
    pub is_hdr: bool,
}

impl VideoInfo {
    /// Largest frame size both dimensions of which are multiples of 8.
    pub fn aligned_size(&self) -> (u32, u32) {
        (
            self.width / ALIGNMENT * ALIGNMENT,
            self.height / ALIGNMENT * ALIGNMENT,
        )
    }
}

/// Runs ffprobe to get video metadata.
pub fn get_video_info(video_path: &Path) -> Result<VideoInfo> {
    info!("Probing video file: {}", video_path.display());
    if !video_path.exists() {
        return Err(VqmError::Input(format!(
            "Input video file not found: {}",
            video_path.display()
        )));
    }
    let path_str = video_path
        .to_str()
        .ok_or_else(|| VqmError::Input("Invalid video path".to_string()))?;

    let output = Command::new("ffprobe")
        .args([
            "-v", "error",
            "-count_frames",
            "-select_streams", "v:0",
            "-show_entries", "stream=width,height,nb_frames,nb_read_frames,r_frame_rate,color_transfer",
            "-of", "json",
            path_str,
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("ffprobe failed for {}: {}", video_path.display(), stderr);
        return Err(VqmError::Command(format!(
            "ffprobe failed for {}: {}",
            video_path.display(),
            stderr
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    debug!("ffprobe output for {}: {}", video_path.display(), stdout);
    let info = parse_stream_info(&stdout, video_path)?;

    info!(
        "Detected Info for {}: {}x{} @ {} fps, {} frames, HDR={}",
        video_path.display(),
        info.width,
        info.height,
        info.fps,
        info.frame_count,
        info.is_hdr
    );
    Ok(info)
}

fn parse_stream_info(stdout: &str, video_path: &Path) -> Result<VideoInfo> {
    let json: serde_json::Value = serde_json::from_str(stdout)
        .map_err(|e| VqmError::Parse(format!("Failed to parse ffprobe JSON: {}", e)))?;
    let stream = json["streams"]
        .get(0)
        .ok_or_else(|| VqmError::Parse("No video stream found in ffprobe output".to_string()))?;

    let width = stream["width"]
        .as_u64()
        .ok_or_else(|| VqmError::Parse("Missing width".to_string()))? as u32;
    let height = stream["height"]
        .as_u64()
        .ok_or_else(|| VqmError::Parse("Missing height".to_string()))? as u32;

    // counted frames are exact; the container's nb_frames is only a fallback
    let frame_count_str = stream["nb_read_frames"]
        .as_str()
        .or_else(|| stream["nb_frames"].as_str())
        .ok_or_else(|| VqmError::Parse(format!("No frame count for {}", video_path.display())))?;
    let frame_count = frame_count_str
        .parse::<u64>()
        .map_err(|e| VqmError::Parse(format!("Invalid frame count '{}': {}", frame_count_str, e)))?;

    let fps_str = stream["r_frame_rate"]
        .as_str()
        .ok_or_else(|| VqmError::Parse("Missing r_frame_rate".to_string()))?;
    let fps = parse_frame_rate(fps_str)?;

    let color_transfer = stream["color_transfer"].as_str().unwrap_or("unknown");
    let is_hdr = color_transfer == "smpte2084" || color_transfer == "arib-std-b67";

    Ok(VideoInfo {
        path: video_path.to_path_buf(),
        width,
        height,
        frame_count,
        fps,
        is_hdr,
    })
}

/// Parses frame rate string (e.g., "24000/1001") into f64.
fn parse_frame_rate(fps_str: &str) -> Result<f64> {
    let parse = |s: &str, what: &str| {
        s.trim()
            .parse::<f64>()
            .map_err(|_| VqmError::Parse(format!("Invalid FPS {}: {}", what, s)))
    };
    match fps_str.split_once('/') {
        Some((num, den)) => {
            let num = parse(num, "numerator")?;
            let den = parse(den, "denominator")?;
            if den == 0.0 {
                Err(VqmError::Parse("FPS denominator cannot be zero".to_string()))
            } else {
                Ok(num / den)
            }
        }
        None => parse(fps_str, "value"),
    }
}

/// Filter chain that brings a stream to 8-bit SDR at an 8-aligned size.
pub fn build_decode_filter(info: &VideoInfo, target: (u32, u32), denoise: bool) -> String {
    let mut filters: Vec<String> = Vec::new();
    if info.is_hdr {
        filters.push(HDR_TO_SDR_FILTER.to_string());
    }
    if (info.width, info.height) != target {
        let (w, h) = target;
        info!(
            "Cropping {} from {}x{} to {}x{}",
            info.path.display(),
            info.width,
            info.height,
            w,
            h
        );
        filters.push(format!("crop={}:{}:0:0", w, h));
    }
    if denoise {
        filters.push(DENOISE_FILTER.to_string());
    }
    filters.push("format=yuv444p".to_string());
    filters.join(",")
}

/// Source of decoded frames, read a slice at a time.
pub trait FrameSource {
    /// Reads up to `count` frames; fewer only at the end of the stream.
    fn read_frames(&mut self, count: usize) -> Result<Vec<Frame>>;
}

/// Streams decoded frames out of an ffmpeg child process.
pub struct FrameReader {
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
    source: String,
    width: usize,
    height: usize,
    buffer: Vec<u8>,
    frames_read: u64,
}

impl FrameReader {
    pub fn open(info: &VideoInfo, target: (u32, u32), denoise: bool) -> Result<Self> {
        let filter = build_decode_filter(info, target, denoise);
        let threads = num_cpus::get().to_string();
        let args = [
            "-hide_banner".to_string(),
            "-loglevel".to_string(), "error".to_string(),
            "-threads".to_string(), threads,
            "-i".to_string(), info.path.to_string_lossy().to_string(),
            "-map".to_string(), "0:v:0".to_string(),
            "-vf".to_string(), filter,
            "-f".to_string(), "rawvideo".to_string(),
            "-".to_string(),
        ];
        info!("Decoding {}: ffmpeg {}", info.path.display(), args.join(" "));

        let mut command = Command::new("ffmpeg");
        command.args(&args);
        Self::spawn(
            command,
            info.path.display().to_string(),
            target.0 as usize,
            target.1 as usize,
        )
    }

    /// Starts `command` and reads `yuv444p` frames of `width`x`height` from its stdout.
    fn spawn(mut command: Command, source: String, width: usize, height: usize) -> Result<Self> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| VqmError::Command("ffmpeg stdout was not captured".to_string()))?;
        // a full stderr pipe would stall the decoder, so it is drained on its own thread
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut text = String::new();
                let _ = pipe.read_to_string(&mut text);
                text
            })
        });

        Ok(Self {
            child,
            stdout: BufReader::new(stdout),
            stderr,
            source,
            width,
            height,
            buffer: vec![0; 3 * width * height],
            frames_read: 0,
        })
    }

    /// Next frame, or `None` once the stream ends on a frame boundary.
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        let filled = read_full(&mut self.stdout, &mut self.buffer)?;
        if filled == 0 {
            return Ok(None);
        }
        if filled < self.buffer.len() {
            return Err(VqmError::Parse(format!(
                "Truncated frame {} of {}: got {} of {} bytes",
                self.frames_read,
                self.source,
                filled,
                self.buffer.len()
            )));
        }
        let n = self.width * self.height;
        let frame = Frame::new(
            Plane::from_bytes(self.width, self.height, &self.buffer[..n])?,
            Plane::from_bytes(self.width, self.height, &self.buffer[n..2 * n])?,
            Plane::from_bytes(self.width, self.height, &self.buffer[2 * n..])?,
        )?;
        self.frames_read += 1;
        Ok(Some(frame))
    }

    /// Decoder error if ffmpeg has already exited unsuccessfully.
    pub fn failure(&mut self) -> Option<VqmError> {
        match self.child.try_wait() {
            Ok(Some(status)) if !status.success() => Some(self.exit_error(status)),
            _ => None,
        }
    }

    /// Waits for ffmpeg and reports a non-zero exit together with its stderr.
    pub fn finish(mut self) -> Result<()> {
        let status = self.child.wait()?;
        if !status.success() {
            return Err(self.exit_error(status));
        }
        let stderr = self.collect_stderr();
        if !stderr.is_empty() {
            debug!("ffmpeg stderr for {}: {}", self.source, stderr);
        }
        debug!("Decoded {} frames from {}", self.frames_read, self.source);
        Ok(())
    }

    fn exit_error(&mut self, status: ExitStatus) -> VqmError {
        let stderr = self.collect_stderr();
        error!("ffmpeg decoder failed for {}: {}", self.source, stderr);
        VqmError::Command(format!(
            "ffmpeg decoder exited with {} for {}: {}",
            status, self.source, stderr
        ))
    }

    fn collect_stderr(&mut self) -> String {
        self.stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .map(|text| text.trim().to_string())
            .unwrap_or_default()
    }
}

impl FrameSource for FrameReader {
    fn read_frames(&mut self, count: usize) -> Result<Vec<Frame>> {
        let mut frames = Vec::with_capacity(count);
        while frames.len() < count {
            match self.read_frame()? {
                Some(frame) => frames.push(frame),
                None => break,
            }
        }
        Ok(frames)
    }
}

impl Drop for FrameReader {
    fn drop(&mut self) {
        // no-op if finish() already reaped the child
        if let Ok(None) = self.child.try_wait() {
            if let Err(e) = self.child.kill() {
                warn!("Failed to stop ffmpeg decoder: {}", e);
            }
            let _ = self.child.wait();
        }
    }
}

/// Fills `buf` as far as the reader allows and returns the byte count.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(VqmError::Io(e)),
        }
    }
    Ok(filled)
}
