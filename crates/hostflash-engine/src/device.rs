//! Device descriptors and the per-device operation contract.

use std::fmt;
use std::time::Duration;

use hostflash_errors::Result;
use serde::{Deserialize, Serialize};

use crate::image::FirmwareImage;
use crate::transfer::{TransferContext, TransferReport};

/// How the host reaches a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Memory-mapped PCI windows, by resource index
    Mmio {
        /// Region indexes to map on open
        regions: Vec<usize>,
    },
    /// A claimed USB interface
    Usb {
        /// Interface number
        interface: u8,
    },
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Mmio { regions } => write!(f, "mmio {regions:?}"),
            TransportKind::Usb { interface } => write!(f, "usb interface {interface}"),
        }
    }
}

/// Identity and policy of one physical device, supplied by the layer that
/// selected the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Stable identifier, e.g. a PCI address or USB path
    pub id: String,
    /// Protocol or version string
    pub protocol: String,
    /// Transport used to reach the device
    pub transport: TransportKind,
    /// USB or PCI vendor id
    pub vendor_id: u16,
    /// USB or PCI product id
    pub product_id: u16,
    /// How long a re-enumeration takes after detach or attach, if the device
    /// re-enumerates at all
    #[serde(default)]
    pub remove_delay: Option<Duration>,
}

impl DeviceDescriptor {
    /// A descriptor without a remove delay.
    pub fn new(
        id: impl Into<String>,
        protocol: impl Into<String>,
        transport: TransportKind,
        vendor_id: u16,
        product_id: u16,
    ) -> Self {
        Self {
            id: id.into(),
            protocol: protocol.into(),
            transport,
            vendor_id,
            product_id,
            remove_delay: None,
        }
    }

    /// Set the re-enumeration wait.
    #[must_use]
    pub fn with_remove_delay(mut self, delay: Duration) -> Self {
        self.remove_delay = Some(delay);
        self
    }

    /// Whether the ids match `vendor_id:product_id`.
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:04x}:{:04x}, {}, {})",
            self.id, self.vendor_id, self.product_id, self.protocol, self.transport
        )
    }
}

/// Whether the caller must wait for the device to re-enumerate before the
/// next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reenumeration {
    /// The device stays where it is
    #[default]
    NotRequired,
    /// The device disappears and comes back; wait before reopening
    Required {
        /// Suggested wait, `None` to use the configured default
        delay: Option<Duration>,
    },
}

impl Reenumeration {
    /// Whether a wait is required.
    pub fn is_required(&self) -> bool {
        matches!(self, Reenumeration::Required { .. })
    }

    /// The wait, falling back to `default` when the device names none.
    /// `None` when no re-enumeration is required.
    pub fn delay_or(&self, default: Duration) -> Option<Duration> {
        match self {
            Reenumeration::NotRequired => None,
            Reenumeration::Required { delay } => Some(delay.unwrap_or(default)),
        }
    }
}

/// One device variant's implementation of the lifecycle operations.
///
/// Implementations perform the device work only; state tracking and
/// transition checks live in [`Lifecycle`](crate::lifecycle::Lifecycle).
pub trait FirmwareDevice {
    /// Identity of the device under update.
    fn descriptor(&self) -> &DeviceDescriptor;

    /// Check that the device is the expected variant without touching
    /// hardware state.
    ///
    /// # Errors
    ///
    /// `DeviceMismatch` if it is not.
    fn probe(&mut self) -> Result<()>;

    /// Acquire transport resources.
    ///
    /// # Errors
    ///
    /// `TransportFailure` or `UnsupportedOperation` if the transport cannot
    /// be opened.
    fn open(&mut self) -> Result<()>;

    /// Release transport resources. Must be idempotent and safe after a
    /// failed `open`.
    ///
    /// # Errors
    ///
    /// `TransportFailure` if a resource could not be released.
    fn close(&mut self) -> Result<()>;

    /// Leave normal operation.
    ///
    /// # Errors
    ///
    /// `TransportFailure` if the device cannot be signalled.
    fn detach(&mut self) -> Result<Reenumeration> {
        Ok(Reenumeration::NotRequired)
    }

    /// Transfer and verify `image`.
    ///
    /// # Errors
    ///
    /// Any error of the chunk transfer or arbitration protocols.
    fn write_firmware(&mut self, image: &FirmwareImage, ctx: &TransferContext) -> Result<TransferReport>;

    /// Return to normal operation.
    ///
    /// # Errors
    ///
    /// `TransportFailure` if the device cannot be signalled.
    fn attach(&mut self) -> Result<Reenumeration> {
        Ok(Reenumeration::NotRequired)
    }

    /// Reload settings from the new image.
    ///
    /// # Errors
    ///
    /// Device specific.
    fn reload(&mut self) -> Result<()> {
        Ok(())
    }

    /// Make the device boot the new image.
    ///
    /// # Errors
    ///
    /// Device specific.
    fn activate(&mut self) -> Result<()> {
        Ok(())
    }
}
