//! Novatek USB keyboard and touchpad controllers.
//!
//! Both variants exchange HID feature reports on a vendor interface. The
//! keyboard controller is reprogrammed from a separate boot-loader identity
//! and verified by reading the flash back; the touchpad controller is
//! programmed in place and verified through status handshakes.

mod commands;
mod keyboard;
mod touchpad;

use std::time::Duration;

use hostflash_engine::device::{DeviceDescriptor, TransportKind};
use hostflash_engine::transport::{ControlTransport, DEFAULT_CONTROL_TIMEOUT, UsbProvider};
use hostflash_errors::{Result, UpdateError};
use tracing::debug;

use crate::ids::{NOVATEK_RUNTIME_INTERFACE, NOVATEK_VENDOR_ID};

pub use commands::{LONG_REPORT_LEN, NovatekCommands, SHORT_REPORT_LEN, StatusCode, TouchpadCodes};
pub use keyboard::{KeyboardMode, KeyboardTransport, NovatekKeyboard};
pub use touchpad::{NovatekTouchpad, TouchpadTransport};

/// Protocol string reported for Novatek devices.
pub const PROTOCOL: &str = "tw.com.novatek";

/// Time allowed for the controller to re-enumerate after a mode switch.
pub const REMOVE_DELAY: Duration = Duration::from_secs(10);

/// Descriptor for a Novatek keyboard in application mode, with the
/// re-enumeration wait its mode switches need.
pub fn keyboard_descriptor(id: impl Into<String>, product_id: u16) -> DeviceDescriptor {
    DeviceDescriptor::new(
        id,
        PROTOCOL,
        TransportKind::Usb {
            interface: NOVATEK_RUNTIME_INTERFACE,
        },
        NOVATEK_VENDOR_ID,
        product_id,
    )
    .with_remove_delay(REMOVE_DELAY)
}

/// Descriptor for the touchpad behind a Novatek keyboard. The touchpad is
/// programmed in place, so no re-enumeration wait is set.
pub fn touchpad_descriptor(id: impl Into<String>, product_id: u16) -> DeviceDescriptor {
    DeviceDescriptor::new(
        id,
        PROTOCOL,
        TransportKind::Usb {
            interface: NOVATEK_RUNTIME_INTERFACE,
        },
        NOVATEK_VENDOR_ID,
        product_id,
    )
}

/// A claimed vendor interface, or none.
struct UsbLink<U> {
    provider: U,
    transport: Option<Box<dyn ControlTransport>>,
    timeout: Duration,
}

impl<U: UsbProvider> UsbLink<U> {
    fn new(provider: U) -> Self {
        Self {
            provider,
            transport: None,
            timeout: DEFAULT_CONTROL_TIMEOUT,
        }
    }

    fn claim(&mut self, interface: u8) -> Result<()> {
        self.transport = Some(self.provider.claim(interface)?);
        debug!(interface, "interface claimed");
        Ok(())
    }

    fn release(&mut self) {
        if self.transport.take().is_some() {
            debug!("interface released");
        }
    }

    fn transport(&mut self) -> Result<&mut dyn ControlTransport> {
        match self.transport.as_deref_mut() {
            Some(t) => Ok(t),
            None => Err(UpdateError::transport("feature report", "interface not claimed")),
        }
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        let timeout = self.timeout;
        self.transport()?.send_report(data, timeout)
    }
}
