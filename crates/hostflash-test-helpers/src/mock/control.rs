//! Scripted USB control transport.
//!
//! A [`ScriptedUsb`] hands out transports that all forward to one
//! [`ReportDevice`] emulator, log every report, and fail on request.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use hostflash_engine::transport::{ControlTransport, UsbProvider};
use hostflash_errors::{Result, UpdateError};
use parking_lot::Mutex;

/// Device side of a feature-report exchange.
pub trait ReportDevice: Send {
    /// Handle a SET_REPORT.
    ///
    /// # Errors
    ///
    /// Whatever the emulated device should report.
    fn set_report(&mut self, data: &[u8]) -> Result<()>;

    /// Handle a GET_REPORT, filling `buf` and returning the length.
    ///
    /// # Errors
    ///
    /// Whatever the emulated device should report.
    fn get_report(&mut self, report_id: u8, buf: &mut [u8]) -> Result<usize>;
}

/// A logged control transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange {
    /// SET_REPORT with its payload
    Set(Vec<u8>),
    /// GET_REPORT with the report id and the bytes returned
    Get(u8, Vec<u8>),
}

impl Exchange {
    /// Payload of a SET_REPORT.
    pub fn sent(&self) -> Option<&[u8]> {
        match self {
            Exchange::Set(data) => Some(data),
            Exchange::Get(..) => None,
        }
    }
}

struct UsbState {
    device: Box<dyn ReportDevice>,
    log: Vec<Exchange>,
    calls: usize,
    fail_calls: BTreeSet<usize>,
    claims: Vec<u8>,
    fail_claims: usize,
    selected: Vec<(u16, u16)>,
}

/// Shared USB device stand-in.
#[derive(Clone)]
pub struct ScriptedUsb {
    state: Arc<Mutex<UsbState>>,
}

impl std::fmt::Debug for ScriptedUsb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ScriptedUsb")
            .field("exchanges", &state.log.len())
            .field("claims", &state.claims)
            .finish_non_exhaustive()
    }
}

impl ScriptedUsb {
    /// A USB device emulated by `device`.
    pub fn new(device: impl ReportDevice + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(UsbState {
                device: Box::new(device),
                log: Vec::new(),
                calls: 0,
                fail_calls: BTreeSet::new(),
                claims: Vec::new(),
                fail_claims: 0,
                selected: Vec::new(),
            })),
        }
    }

    /// Fail the `n`th control transfer (0-based, counting sets and gets).
    #[must_use]
    pub fn failing_call(self, n: usize) -> Self {
        self.state.lock().fail_calls.insert(n);
        self
    }

    /// Fail the next `n` claims.
    #[must_use]
    pub fn failing_claims(self, n: usize) -> Self {
        self.state.lock().fail_claims = n;
        self
    }

    /// Every exchange so far.
    pub fn log(&self) -> Vec<Exchange> {
        self.state.lock().log.clone()
    }

    /// Payloads of every SET_REPORT so far.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .log
            .iter()
            .filter_map(|e| e.sent().map(<[u8]>::to_vec))
            .collect()
    }

    /// Interfaces claimed so far, in order.
    pub fn claims(&self) -> Vec<u8> {
        self.state.lock().claims.clone()
    }

    /// Identities selected so far, in order.
    pub fn selected(&self) -> Vec<(u16, u16)> {
        self.state.lock().selected.clone()
    }

    /// Control transfers attempted so far.
    pub fn calls(&self) -> usize {
        self.state.lock().calls
    }

    /// Run `f` against the emulator.
    pub fn with_device<R>(&self, f: impl FnOnce(&mut dyn ReportDevice) -> R) -> R {
        f(self.state.lock().device.as_mut())
    }

    fn next_call_fails(state: &mut UsbState) -> bool {
        let n = state.calls;
        state.calls += 1;
        state.fail_calls.contains(&n)
    }
}

impl UsbProvider for ScriptedUsb {
    fn claim(&mut self, interface: u8) -> Result<Box<dyn ControlTransport>> {
        let mut state = self.state.lock();
        if state.fail_claims > 0 {
            state.fail_claims -= 1;
            return Err(UpdateError::transport(format!("claim interface {interface}"), "device busy"));
        }
        state.claims.push(interface);
        Ok(Box::new(self.clone()))
    }

    fn select(&mut self, vendor_id: u16, product_id: u16) -> Result<()> {
        self.state.lock().selected.push((vendor_id, product_id));
        Ok(())
    }
}

impl ControlTransport for ScriptedUsb {
    fn send_report(&mut self, data: &[u8], _timeout: Duration) -> Result<()> {
        let mut state = self.state.lock();
        if Self::next_call_fails(&mut state) {
            return Err(UpdateError::transport("send feature report", "injected failure"));
        }
        state.log.push(Exchange::Set(data.to_vec()));
        state.device.set_report(data)
    }

    fn receive_report(&mut self, report_id: u8, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let mut state = self.state.lock();
        if Self::next_call_fails(&mut state) {
            return Err(UpdateError::transport("get feature report", "injected failure"));
        }
        let n = state.device.get_report(report_id, buf)?;
        let returned = buf.get(..n).map(<[u8]>::to_vec).unwrap_or_default();
        state.log.push(Exchange::Get(report_id, returned));
        Ok(n)
    }
}

/// Accepts every report and answers every GET_REPORT with the same bytes.
#[derive(Debug, Clone, Default)]
pub struct EchoDevice {
    /// Response to every GET_REPORT
    pub response: Vec<u8>,
}

impl ReportDevice for EchoDevice {
    fn set_report(&mut self, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn get_report(&mut self, _report_id: u8, buf: &mut [u8]) -> Result<usize> {
        let n = self.response.len().min(buf.len());
        if let (Some(dst), Some(src)) = (buf.get_mut(..n), self.response.get(..n)) {
            dst.copy_from_slice(src);
        }
        Ok(n)
    }
}
