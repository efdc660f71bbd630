//! USB control-transfer transports.
//!
//! Devices driven over USB exchange HID class feature reports: SET_REPORT
//! to send a command or data block, GET_REPORT to read a status or data
//! block back. The first byte of every buffer is the report id.

#[cfg(feature = "hidapi")]
mod hid;

use std::time::Duration;

use hostflash_errors::Result;

#[cfg(feature = "hidapi")]
pub use hid::{HidapiProvider, HidapiTransport};

/// Default timeout for one control transfer.
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(2);

/// A claimed USB interface able to exchange feature reports.
pub trait ControlTransport: Send {
    /// Send a feature report. `data[0]` is the report id.
    ///
    /// # Errors
    ///
    /// `TransportFailure` if the transfer fails.
    fn send_report(&mut self, data: &[u8], timeout: Duration) -> Result<()>;

    /// Read feature report `report_id` into `buf`, returning the number of
    /// bytes received. `buf[0]` receives the report id.
    ///
    /// # Errors
    ///
    /// `TransportFailure` if the transfer fails.
    fn receive_report(&mut self, report_id: u8, buf: &mut [u8], timeout: Duration) -> Result<usize>;
}

impl<T: ControlTransport + ?Sized> ControlTransport for Box<T> {
    fn send_report(&mut self, data: &[u8], timeout: Duration) -> Result<()> {
        (**self).send_report(data, timeout)
    }

    fn receive_report(&mut self, report_id: u8, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        (**self).receive_report(report_id, buf, timeout)
    }
}

/// Source of claimed USB interfaces.
pub trait UsbProvider {
    /// Claim `interface` of the device and return a transport over it.
    ///
    /// # Errors
    ///
    /// `TransportFailure` if the device or interface cannot be opened,
    /// `DeviceMismatch` if no matching device is present.
    fn claim(&mut self, interface: u8) -> Result<Box<dyn ControlTransport>>;

    /// Direct later claims at `vendor_id:product_id`, as after a device
    /// re-enumerates under a boot-loader identity.
    ///
    /// # Errors
    ///
    /// `TransportFailure` if the device list cannot be refreshed.
    fn select(&mut self, vendor_id: u16, product_id: u16) -> Result<()> {
        let _ = (vendor_id, product_id);
        Ok(())
    }
}

impl<P: UsbProvider + ?Sized> UsbProvider for &mut P {
    fn claim(&mut self, interface: u8) -> Result<Box<dyn ControlTransport>> {
        (**self).claim(interface)
    }

    fn select(&mut self, vendor_id: u16, product_id: u16) -> Result<()> {
        (**self).select(vendor_id, product_id)
    }
}

impl<P: UsbProvider + ?Sized> UsbProvider for Box<P> {
    fn claim(&mut self, interface: u8) -> Result<Box<dyn ControlTransport>> {
        (**self).claim(interface)
    }

    fn select(&mut self, vendor_id: u16, product_id: u16) -> Result<()> {
        (**self).select(vendor_id, product_id)
    }
}
