//! `hidapi` backend for [`ControlTransport`].

use std::time::Duration;

use hidapi::{HidApi, HidDevice};
use hostflash_errors::{Result, UpdateError};
use tracing::{debug, trace};

use super::{ControlTransport, UsbProvider};

/// Opens HID interfaces of one device by vendor and product id.
pub struct HidapiProvider {
    api: HidApi,
    vendor_id: u16,
    product_id: u16,
}

impl std::fmt::Debug for HidapiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HidapiProvider")
            .field("vendor_id", &format_args!("{:#06x}", self.vendor_id))
            .field("product_id", &format_args!("{:#06x}", self.product_id))
            .finish()
    }
}

impl HidapiProvider {
    /// Provider for the device `vendor_id:product_id`.
    ///
    /// # Errors
    ///
    /// `TransportFailure` if the HID library cannot be initialised.
    pub fn new(vendor_id: u16, product_id: u16) -> Result<Self> {
        let api = HidApi::new().map_err(|e| UpdateError::transport("initialise hidapi", e.to_string()))?;
        Ok(Self {
            api,
            vendor_id,
            product_id,
        })
    }

    /// Re-scan attached devices, e.g. after a re-enumeration.
    ///
    /// # Errors
    ///
    /// `TransportFailure` if enumeration fails.
    pub fn refresh(&mut self) -> Result<()> {
        self.api
            .refresh_devices()
            .map_err(|e| UpdateError::transport("enumerate HID devices", e.to_string()))
    }
}

impl UsbProvider for HidapiProvider {
    fn claim(&mut self, interface: u8) -> Result<Box<dyn ControlTransport>> {
        let wanted = i32::from(interface);
        let info = self
            .api
            .device_list()
            .find(|d| {
                d.vendor_id() == self.vendor_id
                    && d.product_id() == self.product_id
                    && d.interface_number() == wanted
            })
            .ok_or_else(|| {
                UpdateError::device_mismatch(format!(
                    "no HID device {:04x}:{:04x} with interface {interface}",
                    self.vendor_id, self.product_id
                ))
            })?;
        let device = info
            .open_device(&self.api)
            .map_err(|e| UpdateError::transport(format!("claim interface {interface}"), e.to_string()))?;
        debug!(
            "claimed {:04x}:{:04x} interface {interface}",
            self.vendor_id, self.product_id
        );
        Ok(Box::new(HidapiTransport { device }))
    }

    fn select(&mut self, vendor_id: u16, product_id: u16) -> Result<()> {
        self.refresh()?;
        self.vendor_id = vendor_id;
        self.product_id = product_id;
        debug!("selected {vendor_id:04x}:{product_id:04x}");
        Ok(())
    }
}

/// A claimed HID interface.
pub struct HidapiTransport {
    device: HidDevice,
}

impl HidapiTransport {
    /// Wrap an already opened device.
    pub fn new(device: HidDevice) -> Self {
        Self { device }
    }
}

// Feature-report transfers in hidapi carry no per-call timeout; the OS
// control-transfer timeout applies.
impl ControlTransport for HidapiTransport {
    fn send_report(&mut self, data: &[u8], _timeout: Duration) -> Result<()> {
        trace!(len = data.len(), "SET_REPORT {:02x?}", data.get(..data.len().min(8)));
        self.device.send_feature_report(data).map_err(|e| {
            UpdateError::transport(
                format!("send feature report {:#04x}", data.first().copied().unwrap_or(0)),
                e.to_string(),
            )
        })
    }

    fn receive_report(&mut self, report_id: u8, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let Some(first) = buf.first_mut() else {
            return Err(UpdateError::out_of_bounds("feature report buffer", 0, 1, 0));
        };
        *first = report_id;
        let n = self.device.get_feature_report(buf).map_err(|e| {
            UpdateError::transport(format!("get feature report {report_id:#04x}"), e.to_string())
        })?;
        trace!(len = n, "GET_REPORT {report_id:#04x}");
        Ok(n)
    }
}
