//! PTP role negotiation, scheduled action commands and synchronized
//! acquisition of depth/color frame pairs.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::CaptureConfig;
use crate::device::{CameraDevice, PtpRole, RawImage, TransportSystem};
use crate::error::{OverlayError, Result};

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Computes when a scheduled action command should fire.
///
/// # Arguments
///
/// * `latched_ns` - Current PTP time of the master camera.
/// * `config` - Provides the delay and whether to round to a whole second.
///
/// # Returns
///
/// * With rounding, the start of the second `delta + 1` seconds after the
///   latched one. Otherwise the latched time plus `delta` seconds.
pub fn scheduled_action_time(latched_ns: i64, config: &CaptureConfig) -> i64 {
    let delta = config.action_delta_time_s as i64;
    if config.round_up_action_time {
        (latched_ns / NANOS_PER_SECOND + delta + 1) * NANOS_PER_SECOND
    } else {
        latched_ns + delta * NANOS_PER_SECOND
    }
}

/// Requests a PTP role and polls the device until it reports it.
///
/// Fails with [`OverlayError::DeviceTimeout`] after `config.ptp_max_polls` polls.
pub fn negotiate_ptp_role<D: CameraDevice>(
    device: &mut D,
    role: PtpRole,
    config: &CaptureConfig,
) -> Result<()> {
    device.set_ptp_role(role)?;
    info!(model = %device.info().model_name, ?role, "Waiting for PTP role");

    for poll in 1..=config.ptp_max_polls {
        thread::sleep(config.ptp_poll_interval());
        let status = device.ptp_status()?;
        debug!(poll, ?status, "PTP status");
        if status.has_role(role) {
            return Ok(());
        }
    }

    Err(OverlayError::timeout(
        format!(
            "{} becoming PTP {role:?}",
            device.info().model_name
        ),
        config.ptp_timeout(),
    ))
}

/// Latches the master clock and schedules `Action0` on all devices.
///
/// # Returns
///
/// * The scheduled execution time in PTP nanoseconds.
pub fn fire_scheduled_action<S: TransportSystem>(
    system: &mut S,
    master: &mut S::Device,
    config: &CaptureConfig,
) -> Result<i64> {
    let latched_ns = master.latch_ptp_time()?;
    debug!(latched_ns, "Read PTP time from master");

    let execute_ns = scheduled_action_time(latched_ns, config);
    info!(execute_ns, "Scheduled action command");
    system.fire_action_command(execute_ns)?;
    Ok(execute_ns)
}

/// Fetches one image from each camera of a pair.
///
/// Each fetch takes the transfer lock on its own, so other transfers
/// sharing the lock can interleave between the depth and color fetch.
#[derive(Clone, Debug)]
pub struct FramePairGrabber {
    transfer_lock: Arc<Mutex<()>>,
    timeout: Duration,
}

impl FramePairGrabber {
    pub fn new(timeout: Duration) -> Self {
        Self::with_lock(Arc::new(Mutex::new(())), timeout)
    }

    /// Uses a transfer lock shared with other grabbers.
    pub fn with_lock(transfer_lock: Arc<Mutex<()>>, timeout: Duration) -> Self {
        Self {
            transfer_lock,
            timeout,
        }
    }

    fn fetch<D: CameraDevice>(&self, device: &mut D) -> Result<RawImage> {
        let _transfer = self
            .transfer_lock
            .lock()
            .map_err(|_| OverlayError::device("transfer lock poisoned"))?;
        device.get_image(self.timeout)
    }

    /// Gets the depth image, then the color image.
    ///
    /// A failure is returned as is, without retrying. If the color fetch
    /// fails the depth buffer is requeued first.
    pub fn grab<D: CameraDevice>(
        &self,
        depth: &mut D,
        color: &mut D,
    ) -> Result<(RawImage, RawImage)> {
        let depth_image = self.fetch(depth)?;
        match self.fetch(color) {
            Ok(color_image) => Ok((depth_image, color_image)),
            Err(err) => {
                if let Err(requeue_err) = depth.requeue(depth_image) {
                    warn!(%requeue_err, "Could not requeue depth buffer");
                }
                Err(err)
            }
        }
    }
}
