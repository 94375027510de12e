//! V4L2 capture backend for local camera devices (e.g. `/dev/video0`).
//!
//! Requests packed RGB at the configured resolution and frame rate. Drivers that
//! refuse RGB usually offer YUYV, which is converted in-process. Compressed
//! formats (MJPG, H.264) are rejected at open time.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{ActiveFormat, CaptureBackend, CaptureSettings};
use crate::frame::CapturedImage;

const STREAM_BUFFERS: u32 = 4;

pub struct V4l2Backend {
    device_path: String,
    state: Option<DeviceState>,
    pixel_format: PixelFormat,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Backend {
    pub fn new(device_path: &str) -> Self {
        Self {
            device_path: device_path.to_string(),
            state: None,
            pixel_format: PixelFormat::Rgb24,
            active_width: 0,
            active_height: 0,
        }
    }
}

impl CaptureBackend for V4l2Backend {
    fn describe(&self) -> String {
        self.device_path.clone()
    }

    fn open(&mut self, settings: &CaptureSettings) -> Result<ActiveFormat> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.device_path)
            .with_context(|| format!("open v4l2 device {}", self.device_path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = settings.width;
        format.height = settings.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Backend: failed to set format on {}: {}",
                    self.device_path,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 device {} only offers unsupported format {}",
                self.device_path,
                format.fourcc
            )
        })?;

        let mut fps = settings.fps as f64;
        if settings.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(settings.fps);
            match device.set_params(&params) {
                Ok(applied) => {
                    let interval = applied.interval;
                    if interval.numerator > 0 {
                        fps = interval.denominator as f64 / interval.numerator as f64;
                    }
                }
                Err(err) => log::warn!(
                    "V4l2Backend: failed to set fps on {}: {}",
                    self.device_path,
                    err
                ),
            }
        }

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        self.state = Some(state);
        self.pixel_format = pixel_format;
        self.active_width = format.width;
        self.active_height = format.height;

        log::info!(
            "V4l2Backend: connected to {} ({}x{} {})",
            self.device_path,
            format.width,
            format.height,
            format.fourcc
        );
        Ok(ActiveFormat {
            width: format.width,
            height: format.height,
            fps,
        })
    }

    fn read_frame(&mut self) -> Result<CapturedImage> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let (width, height, pixel_format) =
            (self.active_width, self.active_height, self.pixel_format);
        let pixels = state.with_mut(|fields| -> Result<Vec<u8>> {
            let (buf, meta) = fields.stream.next().context("capture v4l2 frame")?;
            let used = (meta.bytesused as usize).min(buf.len());
            let used = if used == 0 { buf.len() } else { used };
            normalize_to_rgb(&buf[..used], width, height, pixel_format)
        })?;
        Ok(CapturedImage::new(pixels, width, height))
    }
}
