//! Device drivers for the hostflash update engine.
//!
//! Three device families, each implementing
//! [`FirmwareDevice`](hostflash_engine::device::FirmwareDevice):
//! - [`bcm57xx::Bcm57xxDevice`]: Broadcom BCM57xx NICs, programmed word by
//!   word through the NVM command engine in memory-mapped PCI BARs
//! - [`novatek::NovatekKeyboard`]: Novatek keyboard controllers, flashed
//!   from their boot loader over HID feature reports and read back
//! - [`novatek::NovatekTouchpad`]: the touchpad behind some of those
//!   keyboards, programmed in place with a status handshake per block
//!
//! # Example
//!
//! ```no_run
//! use hostflash_devices::prelude::*;
//! use hostflash_engine::prelude::*;
//!
//! let mut runner = UpdateRunner::new(EngineConfig::default())?;
//! let descriptor = keyboard_descriptor("usb:3-1", product_ids::KEYBOARD);
//! let mut keyboard = NovatekKeyboard::from_hidapi(descriptor)?;
//! let image = FirmwareImage::from(std::fs::read("keyboard.bin")?);
//! let report = runner.run(&mut keyboard, &image)?;
//! println!("{report:?}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod bcm57xx;
pub mod ids;
pub mod novatek;
pub mod prelude;

pub use bcm57xx::{Bcm57xxDevice, DriverBinder, NvmTransport, SysfsDriverBinder};
pub use ids::product_ids;
pub use novatek::{
    KeyboardMode, NovatekCommands, NovatekKeyboard, NovatekTouchpad, TouchpadCodes, keyboard_descriptor,
    touchpad_descriptor,
};
