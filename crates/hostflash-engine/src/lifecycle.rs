//! Device lifecycle state machine.
//!
//! ```text
//! Idle ─probe─▶ Idle(probed) ─open─▶ Opened ─detach─▶ Detached ─write─▶ Writing ─▶ Written
//!                                                                                   │
//!                         Closed ◀─close── (any) ◀── Activated ◀─activate── Attached ◀─attach
//! ```
//!
//! Any failing transition moves to `Error`, from which only `close` is
//! accepted. A call that is not valid in the current state fails with
//! `InvalidTransition` and leaves the state untouched. The machine never
//! retries a transition itself.

use std::fmt;

use hostflash_errors::{Result, UpdateError};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::device::{DeviceDescriptor, FirmwareDevice, Reenumeration};
use crate::image::FirmwareImage;
use crate::transfer::{TransferContext, TransferReport};

/// Lifecycle state of a device under update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Not opened
    #[default]
    Idle,
    /// Transport resources held
    Opened,
    /// Out of normal operation, ready for writing
    Detached,
    /// Transfer in progress
    Writing,
    /// Image transferred and verified
    Written,
    /// Back in normal operation
    Attached,
    /// New image activated
    Activated,
    /// Transport resources released
    Closed,
    /// A transition failed
    Error,
}

impl LifecycleState {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Opened => "opened",
            LifecycleState::Detached => "detached",
            LifecycleState::Writing => "writing",
            LifecycleState::Written => "written",
            LifecycleState::Attached => "attached",
            LifecycleState::Activated => "activated",
            LifecycleState::Closed => "closed",
            LifecycleState::Error => "error",
        }
    }

    /// Whether no further transition other than `close` is accepted.
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Closed | LifecycleState::Error)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives one device through its lifecycle, borrowing it for the duration
/// of the update.
pub struct Lifecycle<'d, D: FirmwareDevice + ?Sized> {
    device: &'d mut D,
    state: LifecycleState,
    probed: bool,
}

impl<D: FirmwareDevice + ?Sized> fmt::Debug for Lifecycle<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("device", &self.device.descriptor().id)
            .field("state", &self.state)
            .field("probed", &self.probed)
            .finish()
    }
}

impl<'d, D: FirmwareDevice + ?Sized> Lifecycle<'d, D> {
    /// Start tracking `device` in `Idle`.
    pub fn new(device: &'d mut D) -> Self {
        Self {
            device,
            state: LifecycleState::Idle,
            probed: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Identity of the device.
    pub fn descriptor(&self) -> &DeviceDescriptor {
        self.device.descriptor()
    }

    /// Whether `probe` has succeeded.
    pub fn is_probed(&self) -> bool {
        self.probed
    }

    /// Validate the device variant. Hardware state is not touched.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` outside `Idle`; the device's error otherwise,
    /// after which the state is `Error`.
    pub fn probe(&mut self) -> Result<()> {
        self.guard("probe", &[LifecycleState::Idle])?;
        match self.device.probe() {
            Ok(()) => {
                self.probed = true;
                info!(device = %self.descriptor().id, "probe matched {}", self.descriptor());
                Ok(())
            }
            Err(e) => Err(self.fail("probe", e)),
        }
    }

    /// Acquire transport resources. On failure the device's `close` runs and
    /// the state stays `Idle`.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless probed and `Idle`; the device's error
    /// otherwise.
    pub fn open(&mut self) -> Result<()> {
        self.guard("open", &[LifecycleState::Idle])?;
        if !self.probed {
            return Err(UpdateError::invalid_transition("open", "unprobed"));
        }
        match self.device.open() {
            Ok(()) => {
                self.enter(LifecycleState::Opened);
                Ok(())
            }
            Err(e) => {
                warn!(device = %self.descriptor().id, error = %e, "open failed");
                if let Err(close_err) = self.device.close() {
                    warn!(device = %self.descriptor().id, error = %close_err, "cleanup after failed open");
                }
                Err(e)
            }
        }
    }

    /// Take the device out of normal operation.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` outside `Opened`; the device's error otherwise.
    pub fn detach(&mut self) -> Result<Reenumeration> {
        self.guard("detach", &[LifecycleState::Opened])?;
        let reenumeration = self.device.detach().map_err(|e| self.fail("detach", e))?;
        self.enter(LifecycleState::Detached);
        Ok(reenumeration)
    }

    /// Close and reopen the transport after a re-enumeration, keeping the
    /// current state.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` outside `Detached` and `Attached`; the device's
    /// error otherwise.
    pub fn rebind(&mut self) -> Result<()> {
        self.guard("rebind", &[LifecycleState::Detached, LifecycleState::Attached])?;
        info!(device = %self.descriptor().id, state = %self.state, "reopening after re-enumeration");
        self.device.close().map_err(|e| self.fail("rebind", e))?;
        self.device.open().map_err(|e| self.fail("rebind", e))
    }

    /// Transfer and verify `image`.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` outside `Detached`; the transfer error otherwise.
    pub fn write_firmware(&mut self, image: &FirmwareImage, ctx: &TransferContext) -> Result<TransferReport> {
        self.guard("write firmware", &[LifecycleState::Detached])?;
        self.enter(LifecycleState::Writing);
        let report = self
            .device
            .write_firmware(image, ctx)
            .map_err(|e| self.fail("write firmware", e))?;
        self.enter(LifecycleState::Written);
        Ok(report)
    }

    /// Return the device to normal operation.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` outside `Written`; the device's error otherwise.
    pub fn attach(&mut self) -> Result<Reenumeration> {
        self.guard("attach", &[LifecycleState::Written])?;
        let reenumeration = self.device.attach().map_err(|e| self.fail("attach", e))?;
        self.enter(LifecycleState::Attached);
        Ok(reenumeration)
    }

    /// Reload device settings. The state is unchanged.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` before the image is written; the device's error
    /// otherwise.
    pub fn reload(&mut self) -> Result<()> {
        self.guard(
            "reload",
            &[LifecycleState::Written, LifecycleState::Attached, LifecycleState::Activated],
        )?;
        self.device.reload().map_err(|e| self.fail("reload", e))
    }

    /// Make the device boot the new image. Repeating it is allowed.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` before the image is written; the device's error
    /// otherwise.
    pub fn activate(&mut self) -> Result<()> {
        self.guard(
            "activate",
            &[LifecycleState::Written, LifecycleState::Attached, LifecycleState::Activated],
        )?;
        self.device.activate().map_err(|e| self.fail("activate", e))?;
        self.enter(LifecycleState::Activated);
        Ok(())
    }

    /// Release transport resources. Accepted in every state; closing twice
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// The device's error, after which the state is `Error`.
    pub fn close(&mut self) -> Result<()> {
        if self.state == LifecycleState::Closed {
            return Ok(());
        }
        self.device.close().map_err(|e| self.fail("close", e))?;
        self.enter(LifecycleState::Closed);
        Ok(())
    }

    fn guard(&self, operation: &'static str, allowed: &[LifecycleState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(UpdateError::invalid_transition(operation, self.state.as_str()))
        }
    }

    fn enter(&mut self, next: LifecycleState) {
        info!(
            device = %self.device.descriptor().id,
            from = %self.state,
            to = %next,
            "lifecycle transition"
        );
        self.state = next;
    }

    fn fail(&mut self, operation: &'static str, err: UpdateError) -> UpdateError {
        error!(
            device = %self.device.descriptor().id,
            from = %self.state,
            kind = ?err.kind(),
            "{operation} failed: {err}"
        );
        self.state = LifecycleState::Error;
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::TransportKind;
    use hostflash_errors::ErrorKind;

    struct Scripted {
        descriptor: DeviceDescriptor,
        calls: Vec<&'static str>,
        fail_on: Option<&'static str>,
    }

    impl Scripted {
        fn new() -> Self {
            Self {
                descriptor: DeviceDescriptor::new("dev0", "test", TransportKind::Usb { interface: 0 }, 1, 2),
                calls: Vec::new(),
                fail_on: None,
            }
        }

        fn failing(op: &'static str) -> Self {
            Self {
                fail_on: Some(op),
                ..Self::new()
            }
        }

        fn step(&mut self, op: &'static str) -> Result<()> {
            self.calls.push(op);
            if self.fail_on == Some(op) {
                return Err(UpdateError::transport(op, "injected"));
            }
            Ok(())
        }
    }

    impl FirmwareDevice for Scripted {
        fn descriptor(&self) -> &DeviceDescriptor {
            &self.descriptor
        }
        fn probe(&mut self) -> Result<()> {
            self.step("probe")
        }
        fn open(&mut self) -> Result<()> {
            self.step("open")
        }
        fn close(&mut self) -> Result<()> {
            self.step("close")
        }
        fn detach(&mut self) -> Result<Reenumeration> {
            self.step("detach")?;
            Ok(Reenumeration::Required { delay: None })
        }
        fn write_firmware(&mut self, _image: &FirmwareImage, _ctx: &TransferContext) -> Result<TransferReport> {
            self.step("write")?;
            Ok(TransferReport::default())
        }
        fn attach(&mut self) -> Result<Reenumeration> {
            self.step("attach")?;
            Ok(Reenumeration::NotRequired)
        }
        fn activate(&mut self) -> Result<()> {
            self.step("activate")
        }
    }

    fn ctx() -> TransferContext {
        TransferContext::default()
    }

    #[test]
    fn test_full_sequence() -> Result<()> {
        let mut dev = Scripted::new();
        let image = FirmwareImage::from(vec![1u8, 2, 3]);
        {
            let mut lc = Lifecycle::new(&mut dev);
            lc.probe()?;
            lc.open()?;
            assert!(lc.detach()?.is_required());
            lc.rebind()?;
            lc.write_firmware(&image, &ctx())?;
            assert_eq!(lc.state(), LifecycleState::Written);
            lc.attach()?;
            lc.reload()?;
            lc.activate()?;
            lc.activate()?;
            assert_eq!(lc.state(), LifecycleState::Activated);
            lc.close()?;
            lc.close()?;
            assert_eq!(lc.state(), LifecycleState::Closed);
        }
        assert_eq!(
            dev.calls,
            vec![
                "probe", "open", "detach", "close", "open", "write", "attach", "activate", "activate", "close"
            ]
        );
        Ok(())
    }

    #[test]
    fn test_open_requires_probe() {
        let mut dev = Scripted::new();
        let mut lc = Lifecycle::new(&mut dev);
        let err = lc.open().err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::InvalidTransition));
        assert_eq!(lc.state(), LifecycleState::Idle);
    }

    #[test]
    fn test_failed_open_stays_idle_and_cleans_up() {
        let mut dev = Scripted::failing("open");
        {
            let mut lc = Lifecycle::new(&mut dev);
            assert_eq!(lc.probe().ok(), Some(()));
            let err = lc.open().err();
            assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::TransportFailure));
            assert_eq!(lc.state(), LifecycleState::Idle);
        }
        assert_eq!(dev.calls, vec!["probe", "open", "close"]);
    }

    #[test]
    fn test_write_failure_moves_to_error_and_only_close_is_allowed() {
        let mut dev = Scripted::failing("write");
        let image = FirmwareImage::from(vec![0u8; 4]);
        let mut lc = Lifecycle::new(&mut dev);
        assert_eq!(lc.probe().ok(), Some(()));
        assert_eq!(lc.open().ok(), Some(()));
        assert!(lc.detach().is_ok_and(|r| r.is_required()));

        let err = lc.write_firmware(&image, &ctx()).err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::TransportFailure));
        assert_eq!(lc.state(), LifecycleState::Error);

        let err = lc.attach().err();
        assert_eq!(err.map(|e| e.to_string()), Some("Cannot attach while device is error".to_string()));
        assert_eq!(lc.close().ok(), Some(()));
        assert_eq!(lc.state(), LifecycleState::Closed);
    }

    #[test]
    fn test_write_requires_detach() {
        let mut dev = Scripted::new();
        let image = FirmwareImage::from(vec![0u8; 4]);
        let mut lc = Lifecycle::new(&mut dev);
        assert_eq!(lc.probe().ok(), Some(()));
        assert_eq!(lc.open().ok(), Some(()));
        let err = lc.write_firmware(&image, &ctx()).err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::InvalidTransition));
        assert_eq!(lc.state(), LifecycleState::Opened);
    }

    #[test]
    fn test_close_from_idle_is_safe() {
        let mut dev = Scripted::new();
        let mut lc = Lifecycle::new(&mut dev);
        assert_eq!(lc.close().ok(), Some(()));
        assert!(lc.state().is_terminal());
    }
}
