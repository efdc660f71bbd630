//! End-to-end update sequencing.

use std::thread;
use std::time::{Duration, Instant};

use hostflash_errors::{Result, UpdateError};
use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::config::EngineConfig;
use crate::device::{FirmwareDevice, Reenumeration};
use crate::image::FirmwareImage;
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::locker::Locker;
use crate::progress::ProgressSink;
use crate::transfer::{TransferContext, TransferReport};

/// Waits for a device to come back after re-enumeration.
pub trait ReplugWaiter {
    /// Block until `device_id` is expected to be present again, at most
    /// `delay`.
    ///
    /// # Errors
    ///
    /// `Cancelled` if `cancel` is set while waiting, `Timeout` if the device
    /// did not return.
    fn wait(&mut self, device_id: &str, delay: Duration, cancel: &CancellationToken) -> Result<()>;
}

/// Sleeps for the full delay, waking periodically to observe cancellation.
#[derive(Debug, Clone, Copy)]
pub struct SleepWaiter {
    slice: Duration,
}

impl SleepWaiter {
    /// A waiter checking for cancellation every `slice`.
    pub fn new(slice: Duration) -> Self {
        Self { slice }
    }
}

impl Default for SleepWaiter {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

impl ReplugWaiter for SleepWaiter {
    fn wait(&mut self, device_id: &str, delay: Duration, cancel: &CancellationToken) -> Result<()> {
        debug!(
            device = device_id,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "waiting for re-enumeration"
        );
        let Some(deadline) = Instant::now().checked_add(delay) else {
            return Err(UpdateError::invalid_config("re-enumeration delay out of range"));
        };
        loop {
            cancel.check("waiting for re-enumeration")?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep(self.slice.min(deadline.saturating_duration_since(now)));
        }
    }
}

/// Outcome of a full update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    /// Device identifier
    pub device_id: String,
    /// State reached before the final close
    pub final_state: LifecycleState,
    /// Transfer details
    pub transfer: TransferReport,
    /// Wall time of the update
    pub duration: Duration,
}

/// Runs probe → open → detach → write → attach → reload → activate → close
/// against one device, closing it on every exit path.
#[derive(Debug)]
pub struct UpdateRunner<W = SleepWaiter> {
    config: EngineConfig,
    waiter: W,
    cancel: CancellationToken,
    progress: ProgressSink,
}

impl UpdateRunner<SleepWaiter> {
    /// A runner with the given configuration and a sleeping replug waiter.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration does not validate.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            waiter: SleepWaiter::default(),
            cancel: CancellationToken::new(),
            progress: ProgressSink::none(),
        })
    }
}

impl<W: ReplugWaiter> UpdateRunner<W> {
    /// Replace the replug waiter.
    #[must_use]
    pub fn with_waiter<W2: ReplugWaiter>(self, waiter: W2) -> UpdateRunner<W2> {
        UpdateRunner {
            config: self.config,
            waiter,
            cancel: self.cancel,
            progress: self.progress,
        }
    }

    /// Use `cancel` for cancellation.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Publish transfer progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    /// Token that cancels updates run by this runner.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Configuration in effect.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Update `device` with `image`.
    ///
    /// # Errors
    ///
    /// The first failing step's error. The device is closed before
    /// returning whenever it was probed.
    pub fn run<D: FirmwareDevice + ?Sized>(&mut self, device: &mut D, image: &FirmwareImage) -> Result<UpdateReport> {
        let started = Instant::now();
        let ctx = TransferContext::new(self.config.transfer)
            .with_arbitration(self.config.arbitration)
            .with_cancel(self.cancel.clone())
            .with_progress(self.progress.clone());
        let default_delay = Duration::from_millis(self.config.lifecycle.default_remove_delay_ms);
        let cancel = self.cancel.clone();
        let waiter = &mut self.waiter;

        let mut lifecycle = Lifecycle::new(device);
        let device_id = lifecycle.descriptor().id.clone();
        info!(device = %device_id, bytes = image.len(), "starting update");

        cancel.check("before probe")?;
        lifecycle.probe()?;

        let (final_state, transfer) = Locker::new("device").run(
            &mut lifecycle,
            |lc| lc.open(),
            |lc| lc.close(),
            |lc| {
                cancel.check("before detach")?;
                let replug = lc.detach()?;
                settle(lc, &mut *waiter, replug, default_delay, &cancel)?;

                let transfer = lc.write_firmware(image, &ctx)?;

                cancel.check("before attach")?;
                let replug = lc.attach()?;
                settle(lc, &mut *waiter, replug, default_delay, &cancel)?;

                cancel.check("before activate")?;
                lc.reload()?;
                lc.activate()?;
                Ok((lc.state(), transfer))
            },
        )?;

        let report = UpdateReport {
            device_id,
            final_state,
            transfer,
            duration: started.elapsed(),
        };
        info!(
            device = %report.device_id,
            state = %report.final_state,
            duration_ms = u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
            "update complete"
        );
        Ok(report)
    }
}

fn settle<D: FirmwareDevice + ?Sized, W: ReplugWaiter>(
    lifecycle: &mut Lifecycle<'_, D>,
    waiter: &mut W,
    replug: Reenumeration,
    default_delay: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let fallback = lifecycle.descriptor().remove_delay.unwrap_or(default_delay);
    let Some(delay) = replug.delay_or(fallback) else {
        return Ok(());
    };
    waiter.wait(&lifecycle.descriptor().id, delay, cancel)?;
    lifecycle.rebind()
}
