//! Register-level arbitration for shared device resources.
//!
//! There is no host-side mutex here: the device firmware arbitrates between
//! requesters, the host sets its request bit and polls the matching granted
//! bit. An [`AccessGate`] nests inside the arbitration bracket to turn
//! register-level access to the resource on and off.

use std::time::{Duration, Instant};

use hostflash_errors::{Result, UpdateError};
use tracing::{debug, warn};

use crate::locker::Locker;
use crate::mmio::MappedRegions;
use crate::registers::{BitField, RegisterLayout};

/// Default deadline for the granted bit to appear.
pub const DEFAULT_ARBITRATION_TIMEOUT: Duration = Duration::from_millis(200);

/// One requester slot of a software arbitration register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbitrationLock {
    register: RegisterLayout,
    request_set: BitField,
    request_clear: BitField,
    granted: BitField,
    timeout: Duration,
}

impl ArbitrationLock {
    /// A lock over `register` using the given request/grant bits.
    pub const fn new(
        register: RegisterLayout,
        request_set: BitField,
        request_clear: BitField,
        granted: BitField,
    ) -> Self {
        Self {
            register,
            request_set,
            request_clear,
            granted,
            timeout: DEFAULT_ARBITRATION_TIMEOUT,
        }
    }

    /// Override the grant deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The grant deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The arbitration register.
    pub fn register(&self) -> &RegisterLayout {
        &self.register
    }

    /// Request the lock and busy-poll for the grant.
    ///
    /// Polling does not sleep: the grant is a hardware-speed event and the
    /// deadline is short. On timeout the request is withdrawn before the
    /// error is returned so that no stale request is left pending.
    ///
    /// # Errors
    ///
    /// `Timeout` if the granted bit is not observed within the deadline, or
    /// any register access error.
    pub fn acquire(&self, regions: &mut MappedRegions) -> Result<()> {
        regions.write_reg(&self.register, self.request_set.bit())?;
        let started = Instant::now();
        let mut polls: u64 = 0;
        loop {
            let value = regions.read_reg(&self.register)?;
            polls = polls.saturating_add(1);
            if self.granted.is_set(value) {
                debug!(
                    lock = self.granted.name,
                    polls,
                    elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
                    "arbitration granted"
                );
                return Ok(());
            }
            if started.elapsed() > self.timeout {
                break;
            }
            std::hint::spin_loop();
        }

        if let Err(e) = regions.write_reg(&self.register, self.request_clear.bit()) {
            warn!(lock = self.granted.name, error = %e, "failed to withdraw arbitration request");
        }
        Err(UpdateError::timeout(
            format!("acquire arbitration {}", self.granted.name),
            self.timeout,
        ))
    }

    /// Clear the request bit.
    ///
    /// # Errors
    ///
    /// Any register access error.
    pub fn release(&self, regions: &mut MappedRegions) -> Result<()> {
        regions.write_reg(&self.register, self.request_clear.bit())?;
        debug!(lock = self.granted.name, "arbitration released");
        Ok(())
    }

    /// Run `body` while holding the lock.
    ///
    /// Release is attempted on every exit path; a release failure is logged
    /// and never masks the body's result.
    ///
    /// # Errors
    ///
    /// The acquire error, or the body's error.
    pub fn hold<R>(
        &self,
        regions: &mut MappedRegions,
        body: impl FnOnce(&mut MappedRegions) -> Result<R>,
    ) -> Result<R> {
        Locker::new("arbitration").best_effort().run(
            regions,
            |r| self.acquire(r),
            |r| self.release(r),
            body,
        )
    }

    /// Run `body` with the lock held and `gate` opened inside it.
    ///
    /// # Errors
    ///
    /// The first failure of acquire, gate enable, body or gate disable.
    pub fn hold_with_access<R>(
        &self,
        gate: &AccessGate,
        mode: AccessMode,
        regions: &mut MappedRegions,
        body: impl FnOnce(&mut MappedRegions) -> Result<R>,
    ) -> Result<R> {
        self.hold(regions, |r| gate.open(r, mode, body))
    }
}

/// Whether an opened gate permits writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Enable only
    ReadOnly,
    /// Enable plus write enable
    ReadWrite,
}

/// Enable/disable bits controlling register-level access to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessGate {
    register: RegisterLayout,
    enable: BitField,
    write_enable: BitField,
}

impl AccessGate {
    /// A gate over `register`.
    pub const fn new(register: RegisterLayout, enable: BitField, write_enable: BitField) -> Self {
        Self {
            register,
            enable,
            write_enable,
        }
    }

    /// Set the enable bit and set or clear write enable, preserving the
    /// other bits of the register.
    ///
    /// # Errors
    ///
    /// Any register access error.
    pub fn enable(&self, regions: &mut MappedRegions, mode: AccessMode) -> Result<()> {
        let writable = u32::from(mode == AccessMode::ReadWrite);
        regions.modify_reg(&self.register, |v| {
            self.write_enable.set(self.enable.set(v, 1), writable)
        })?;
        debug!(register = self.register.name, ?mode, "access enabled");
        Ok(())
    }

    /// Clear both enable bits.
    ///
    /// # Errors
    ///
    /// Any register access error.
    pub fn disable(&self, regions: &mut MappedRegions) -> Result<()> {
        regions.modify_reg(&self.register, |v| {
            self.write_enable.set(self.enable.set(v, 0), 0)
        })?;
        debug!(register = self.register.name, "access disabled");
        Ok(())
    }

    /// Run `body` with access enabled; access is disabled again on every
    /// exit path and a failure to disable is surfaced.
    ///
    /// # Errors
    ///
    /// The first failure of enable, body or disable.
    pub fn open<R>(
        &self,
        regions: &mut MappedRegions,
        mode: AccessMode,
        body: impl FnOnce(&mut MappedRegions) -> Result<R>,
    ) -> Result<R> {
        Locker::new("access").run(
            regions,
            |r| self.enable(r, mode),
            |r| self.disable(r),
            body,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hostflash_errors::ErrorKind;
    use parking_lot::Mutex;

    use super::*;
    use crate::mmio::{RegionIo, RegionProvider};

    const ARB: RegisterLayout = RegisterLayout::plain("ARB", 0, 0x20);
    const ACCESS: RegisterLayout = RegisterLayout::plain("ACCESS", 0, 0x24);
    const REQ_SET: BitField = BitField::flag("ReqSet1", 1);
    const REQ_CLR: BitField = BitField::flag("ReqClr1", 5);
    const WON: BitField = BitField::flag("ArbWon1", 9);
    const REQ: BitField = BitField::flag("Req1", 13);

    #[derive(Default)]
    struct Model {
        arb: u32,
        access: u32,
        grant: bool,
        writes: Vec<(usize, u32)>,
    }

    struct ModelRegion(Arc<Mutex<Model>>);

    impl RegionIo for ModelRegion {
        fn len(&self) -> usize {
            0x100
        }

        fn read_u32(&self, offset: usize) -> u32 {
            let m = self.0.lock();
            match offset {
                0x20 => m.arb,
                0x24 => m.access,
                _ => 0,
            }
        }

        fn write_u32(&mut self, offset: usize, value: u32) {
            let mut m = self.0.lock();
            m.writes.push((offset, value));
            match offset {
                0x20 => {
                    if REQ_SET.is_set(value) {
                        m.arb |= REQ.bit();
                        if m.grant {
                            m.arb |= WON.bit();
                        }
                    }
                    if REQ_CLR.is_set(value) {
                        m.arb &= !(REQ.bit() | WON.bit());
                    }
                }
                0x24 => m.access = value,
                _ => {}
            }
        }
    }

    struct Provider(Arc<Mutex<Model>>);

    impl RegionProvider for Provider {
        fn map_region(&mut self, _index: usize) -> Result<Box<dyn RegionIo>> {
            Ok(Box::new(ModelRegion(Arc::clone(&self.0))))
        }
    }

    fn setup(grant: bool) -> Result<(Arc<Mutex<Model>>, MappedRegions)> {
        let model = Arc::new(Mutex::new(Model {
            grant,
            ..Model::default()
        }));
        let regions = MappedRegions::open(&mut Provider(Arc::clone(&model)), &[0])?;
        Ok((model, regions))
    }

    fn lock() -> ArbitrationLock {
        ArbitrationLock::new(ARB, REQ_SET, REQ_CLR, WON)
    }

    #[test]
    fn test_acquire_release_leaves_request_clear() -> Result<()> {
        let (model, mut regions) = setup(true)?;
        lock().acquire(&mut regions)?;
        assert!(REQ.is_set(model.lock().arb));
        lock().release(&mut regions)?;
        assert!(!REQ.is_set(model.lock().arb));
        Ok(())
    }

    #[test]
    fn test_timeout_withdraws_request() -> Result<()> {
        let (model, mut regions) = setup(false)?;
        let started = Instant::now();
        let err = lock()
            .with_timeout(Duration::from_millis(20))
            .acquire(&mut regions)
            .err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::Timeout));
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert!(!REQ.is_set(model.lock().arb));
        Ok(())
    }

    #[test]
    fn test_default_deadline_is_bounded() -> Result<()> {
        let (model, mut regions) = setup(false)?;
        let started = Instant::now();
        let err = lock().acquire(&mut regions).err();
        let elapsed = started.elapsed();

        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::Timeout));
        assert!(elapsed >= DEFAULT_ARBITRATION_TIMEOUT);
        assert!(
            elapsed < DEFAULT_ARBITRATION_TIMEOUT + Duration::from_millis(100),
            "acquire overran its deadline: {elapsed:?}"
        );
        let m = model.lock();
        assert_eq!(m.writes.last(), Some(&(0x20, REQ_CLR.bit())));
        assert!(!REQ.is_set(m.arb));
        Ok(())
    }

    #[test]
    fn test_gate_preserves_unrelated_bits() -> Result<()> {
        let (model, mut regions) = setup(true)?;
        model.lock().access = 0x100;
        let gate = AccessGate::new(
            ACCESS,
            BitField::flag("Enable", 0),
            BitField::flag("WriteEnable", 1),
        );
        gate.open(&mut regions, AccessMode::ReadWrite, |r| {
            assert_eq!(r.read(0, 0x24)?, 0x103);
            Ok(())
        })?;
        assert_eq!(model.lock().access, 0x100);
        Ok(())
    }

    #[test]
    fn test_arbitration_precedes_access_enable() -> Result<()> {
        let (model, mut regions) = setup(true)?;
        let gate = AccessGate::new(
            ACCESS,
            BitField::flag("Enable", 0),
            BitField::flag("WriteEnable", 1),
        );
        lock().hold_with_access(&gate, AccessMode::ReadOnly, &mut regions, |_| Ok(()))?;
        let offsets: Vec<usize> = model.lock().writes.iter().map(|w| w.0).collect();
        assert_eq!(offsets, vec![0x20, 0x24, 0x24, 0x20]);
        Ok(())
    }

    #[test]
    fn test_body_failure_releases_both() -> Result<()> {
        let (model, mut regions) = setup(true)?;
        let gate = AccessGate::new(
            ACCESS,
            BitField::flag("Enable", 0),
            BitField::flag("WriteEnable", 1),
        );
        let result: Result<()> = lock().hold_with_access(
            &gate,
            AccessMode::ReadWrite,
            &mut regions,
            |_| Err(UpdateError::transport("nvm write", "injected")),
        );
        assert_eq!(result.err().map(|e| e.kind()), Some(ErrorKind::TransportFailure));
        let m = model.lock();
        assert_eq!(m.access & 0x3, 0);
        assert!(!REQ.is_set(m.arb));
        Ok(())
    }
}
