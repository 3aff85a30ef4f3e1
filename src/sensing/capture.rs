use std::io::Cursor;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use log::{debug, info};

/// A decoded frame as delivered by the device: tightly packed RGB8 pixels.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

/// An opened camera. Dropping the device releases it.
pub trait CaptureDevice: Send {
    fn name(&self) -> &str;

    /// Native resolution as `(width, height)`.
    fn resolution(&self) -> (u32, u32);

    /// Returns `Ok(None)` until the device has decoded its first frame.
    fn latest_frame(&mut self) -> Result<Option<RawFrame>>;
}

/// Opens capture devices on request (camera enable).
pub trait CaptureSource: Send + Sync {
    fn open(&self) -> Result<Box<dyn CaptureDevice>>;
}

/// Exclusive slot holding the open device.
///
/// The sampler loop and any in-flight cycle share the slot, but only the owner
/// (the sampler controller) calls [`DeviceSlot::release`]. After release, cycles
/// still holding a clone see an empty slot and skip.
#[derive(Clone)]
pub struct DeviceSlot {
    inner: Arc<Mutex<Option<Box<dyn CaptureDevice>>>>,
}

impl DeviceSlot {
    pub fn new(device: Box<dyn CaptureDevice>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(device))),
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// Grabs the latest frame. `Ok(None)` when the device is not ready or already released.
    pub fn grab(&self) -> Result<Option<RawFrame>> {
        let mut guard = self.lock();
        match guard.as_mut() {
            Some(device) => device.latest_frame(),
            None => Ok(None),
        }
    }

    /// Drops the device. Returns false if it had already been released.
    pub fn release(&self) -> bool {
        let device = self.lock().take();
        match device {
            Some(device) => {
                info!("Releasing capture device {}", device.name());
                drop(device);
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Box<dyn CaptureDevice>>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Copies a raw device frame into an image buffer at its native resolution.
pub fn render_frame(frame: RawFrame) -> Result<RgbImage> {
    let (width, height) = (frame.width, frame.height);
    RgbImage::from_raw(width, height, frame.rgb)
        .ok_or_else(|| anyhow!("frame buffer does not match {width}x{height} RGB8"))
}

/// Encodes a rendered frame as JPEG. `quality` is 1–100.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
        encoder
            .encode_image(image)
            .context("failed to encode frame as JPEG")?;
    }
    Ok(buffer.into_inner())
}

/// Synthetic camera producing a moving gradient, for hosts without a real device.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    warmup_frames: u32,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            warmup_frames: 0,
        }
    }

    /// Number of grabs that report "no frame yet" before the pattern starts.
    pub fn with_warmup(mut self, frames: u32) -> Self {
        self.warmup_frames = frames;
        self
    }
}

impl CaptureSource for TestPatternSource {
    fn open(&self) -> Result<Box<dyn CaptureDevice>> {
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("test pattern resolution must be non-zero"));
        }
        Ok(Box::new(TestPatternDevice {
            width: self.width,
            height: self.height,
            warmup_remaining: self.warmup_frames,
            frame_index: 0,
        }))
    }
}

struct TestPatternDevice {
    width: u32,
    height: u32,
    warmup_remaining: u32,
    frame_index: u32,
}

impl CaptureDevice for TestPatternDevice {
    fn name(&self) -> &str {
        "test-pattern"
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn latest_frame(&mut self) -> Result<Option<RawFrame>> {
        if self.warmup_remaining > 0 {
            self.warmup_remaining -= 1;
            return Ok(None);
        }

        let shift = self.frame_index;
        self.frame_index = self.frame_index.wrapping_add(1);

        let image = RgbImage::from_fn(self.width, self.height, |x, y| {
            image::Rgb([
                ((x + shift) % 256) as u8,
                ((y + shift) % 256) as u8,
                ((x + y) % 256) as u8,
            ])
        });

        Ok(Some(RawFrame {
            width: self.width,
            height: self.height,
            rgb: image.into_raw(),
        }))
    }
}

impl Drop for TestPatternDevice {
    fn drop(&mut self) {
        debug!("test-pattern device closed after {} frames", self.frame_index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warmup_reports_no_frame_then_renders_native_size() {
        let source = TestPatternSource::new(32, 24).with_warmup(2);
        let slot = DeviceSlot::new(source.open().unwrap());

        assert!(slot.grab().unwrap().is_none());
        assert!(slot.grab().unwrap().is_none());

        let frame = slot.grab().unwrap().expect("frame after warmup");
        let image = render_frame(frame).unwrap();
        assert_eq!(image.dimensions(), (32, 24));
    }

    #[test]
    fn encoded_frame_is_jpeg() {
        let source = TestPatternSource::new(16, 16);
        let mut device = source.open().unwrap();
        let image = render_frame(device.latest_frame().unwrap().unwrap()).unwrap();
        let jpeg = encode_jpeg(&image, 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn mismatched_buffer_is_rejected() {
        let frame = RawFrame {
            width: 4,
            height: 4,
            rgb: vec![0; 10],
        };
        assert!(render_frame(frame).is_err());
    }

    #[test]
    fn released_slot_stops_yielding_frames() {
        let slot = DeviceSlot::new(TestPatternSource::new(8, 8).open().unwrap());
        let shared = slot.clone();
        assert!(slot.release());
        assert!(!slot.release());
        assert!(!shared.is_open());
        assert!(shared.grab().unwrap().is_none());
    }

    #[test]
    fn zero_resolution_cannot_open() {
        assert!(TestPatternSource::new(0, 10).open().is_err());
    }
}
