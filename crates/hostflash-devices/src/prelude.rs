//! Convenience re-exports for driver users.

pub use crate::bcm57xx::{Bcm57xxDevice, DriverBinder, SysfsDriverBinder};
pub use crate::ids::{BROADCOM_VENDOR_ID, NOVATEK_VENDOR_ID, product_ids};
pub use crate::novatek::{
    KeyboardMode, NovatekCommands, NovatekKeyboard, NovatekTouchpad, TouchpadCodes, keyboard_descriptor,
    touchpad_descriptor,
};
