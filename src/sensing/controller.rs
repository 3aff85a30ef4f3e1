use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::capture::{CaptureDevice, DeviceSlot};
use super::loop_worker::{sampling_loop, CycleContext};

/// Owns the capture device and the sampler loop running against it.
///
/// At most one loop runs per device. The loop can be stopped (pause) without
/// releasing the device; releasing always stops the loop first.
pub struct SamplerController {
    device: Option<DeviceSlot>,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    generation: Option<u64>,
}

impl SamplerController {
    pub fn new() -> Self {
        Self {
            device: None,
            handle: None,
            cancel_token: None,
            generation: None,
        }
    }

    pub fn has_device(&self) -> bool {
        self.device.as_ref().is_some_and(DeviceSlot::is_open)
    }

    pub fn is_sampling(&self) -> bool {
        self.handle.is_some()
    }

    /// Session generation the running loop was started for.
    pub fn sampling_generation(&self) -> Option<u64> {
        self.generation.filter(|_| self.handle.is_some())
    }

    pub fn device_slot(&self) -> Option<DeviceSlot> {
        self.device.clone().filter(DeviceSlot::is_open)
    }

    pub fn attach_device(&mut self, device: Box<dyn CaptureDevice>) -> Result<()> {
        if self.has_device() {
            bail!("capture device already attached");
        }
        let (width, height) = device.resolution();
        info!("Capture device {} attached ({width}x{height})", device.name());
        self.device = Some(DeviceSlot::new(device));
        Ok(())
    }

    pub fn start_sampling(&mut self, context: CycleContext, every: Duration) -> Result<()> {
        if self.handle.is_some() {
            bail!("sampling already active");
        }
        if !self.has_device() {
            bail!("no capture device attached");
        }

        let generation = context.generation;
        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(sampling_loop(context, every, cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        self.generation = Some(generation);
        Ok(())
    }

    pub async fn stop_sampling(&mut self) -> Result<()> {
        self.generation = None;
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("sampling loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }

    /// Stops the loop and drops the device. Safe to call repeatedly.
    pub async fn release_device(&mut self) -> Result<()> {
        let stopped = self.stop_sampling().await;
        if let Some(slot) = self.device.take() {
            slot.release();
        }
        stopped
    }
}

impl Default for SamplerController {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SamplerController {
    fn drop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        if let Some(slot) = self.device.take() {
            slot.release();
        }
    }
}
