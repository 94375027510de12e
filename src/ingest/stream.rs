//! GStreamer capture backend for RTSP cameras and local video files.
//!
//! Builds `uridecodebin ! videoconvert ! videoscale ! videorate ! appsink`, so any
//! container or codec GStreamer can decode arrives as RGB at the requested size and
//! rate. The appsink keeps a single buffer and drops stale ones; the ring buffer
//! downstream does the real buffering.

use anyhow::{anyhow, Context, Result};
use gstreamer::prelude::*;
use std::path::Path;

use super::{ActiveFormat, CaptureBackend, CaptureSettings};
use crate::frame::CapturedImage;

pub struct GstreamerBackend {
    uri: String,
    pipeline: Option<gstreamer::Pipeline>,
    appsink: Option<gstreamer_app::AppSink>,
    frame_timeout_ms: u64,
    last_error: Option<String>,
}

impl GstreamerBackend {
    pub fn new(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            pipeline: None,
            appsink: None,
            frame_timeout_ms: 500,
            last_error: None,
        }
    }

    fn playback_uri(&self) -> Result<String> {
        if self.uri.contains("://") {
            return Ok(self.uri.clone());
        }
        let path = Path::new(&self.uri)
            .canonicalize()
            .with_context(|| format!("video file {} not found", self.uri))?;
        Ok(format!("file://{}", path.display()))
    }

    fn poll_bus(&mut self) {
        let Some(pipeline) = &self.pipeline else {
            return;
        };
        let Some(bus) = pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    self.last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    self.last_error = Some("end of stream".to_string());
                }
                _ => {}
            }
        }
    }
}

impl CaptureBackend for GstreamerBackend {
    fn describe(&self) -> String {
        self.uri.clone()
    }

    fn open(&mut self, settings: &CaptureSettings) -> Result<ActiveFormat> {
        gstreamer::init().context("initialize gstreamer")?;

        let playback_uri = self.playback_uri()?;
        let framerate = if settings.fps > 0 {
            format!(",framerate={}/1", settings.fps)
        } else {
            String::new()
        };
        let description = format!(
            "uridecodebin uri=\"{}\" ! videoconvert ! videoscale ! videorate ! \
             video/x-raw,format=RGB,width={},height={}{} ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            playback_uri, settings.width, settings.height, framerate
        );
        let pipeline = gstreamer::parse::launch(&description)
            .context("build capture pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("capture pipeline is not a Pipeline"))?;
        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .with_context(|| format!("start playback of {}", self.uri))?;

        self.frame_timeout_ms = if settings.fps == 0 {
            500
        } else {
            ((1000 / settings.fps as u64) * 4).max(500)
        };
        self.pipeline = Some(pipeline);
        self.appsink = Some(appsink);
        self.last_error = None;

        log::info!("GstreamerBackend: connected to {}", self.uri);
        Ok(ActiveFormat {
            width: settings.width,
            height: settings.height,
            fps: settings.fps as f64,
        })
    }

    fn read_frame(&mut self) -> Result<CapturedImage> {
        self.poll_bus();
        if let Some(err) = &self.last_error {
            return Err(anyhow!("{}: {}", self.uri, err));
        }

        let appsink = self.appsink.as_ref().context("capture pipeline not open")?;
        let sample = appsink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(self.frame_timeout_ms))
            .ok_or_else(|| anyhow!("{}: stream stalled", self.uri))?;
        let (pixels, width, height) = sample_to_pixels(&sample)?;
        Ok(CapturedImage::new(pixels, width, height))
    }
}

impl Drop for GstreamerBackend {
    fn drop(&mut self) {
        if let Some(pipeline) = &self.pipeline {
            if let Err(err) = pipeline.set_state(gstreamer::State::Null) {
                log::warn!("GstreamerBackend: failed to stop {}: {}", self.uri, err);
            }
        }
    }
}

fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("sample missing buffer")?;
    let caps = sample.caps().context("sample missing caps")?;
    let info = gstreamer_video::VideoInfo::from_caps(caps).context("parse caps as video info")?;

    let width = info.width();
    let height = info.height();
    let row_bytes = (width as usize) * 3;
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map sample buffer")?;
    let data = map.as_slice();

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data.get(..len).context("sample buffer is too short")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(data.get(start..end).context("buffer row is out of bounds")?);
    }

    Ok((pixels, width, height))
}
