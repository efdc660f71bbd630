//! Vendor and product identifiers of the supported devices.

/// Broadcom PCI vendor id.
pub const BROADCOM_VENDOR_ID: u16 = 0x14e4;

/// Novatek keyboard controller vendor id in runtime mode.
pub const NOVATEK_VENDOR_ID: u16 = 0x258a;

/// Vendor id the Novatek keyboard enumerates with in boot-loader mode.
pub const NOVATEK_BOOT_VENDOR_ID: u16 = 0x0603;

/// Novatek product ids.
pub mod product_ids {
    /// Keyboard, runtime mode
    pub const KEYBOARD: u16 = 0x001e;
    /// Keyboard with integrated touchpad, runtime mode
    pub const KEYBOARD_TOUCHPAD: u16 = 0x001f;
    /// Keyboard with integrated touchpad, alternate SKU
    pub const KEYBOARD_TOUCHPAD_ALT: u16 = 0x000d;
    /// Keyboard boot loader (vendor [`NOVATEK_BOOT_VENDOR_ID`](super::NOVATEK_BOOT_VENDOR_ID))
    pub const BOOT_LOADER: u16 = 0x1020;
}

/// USB interface carrying the vendor feature reports in runtime mode.
pub const NOVATEK_RUNTIME_INTERFACE: u8 = 1;

/// USB interface carrying the vendor feature reports in boot-loader mode.
pub const NOVATEK_BOOT_INTERFACE: u8 = 0;

/// Runtime products that accept the keyboard update, in probe order.
pub const KEYBOARD_PRODUCTS: &[u16] = &[
    product_ids::KEYBOARD,
    product_ids::KEYBOARD_TOUCHPAD,
    product_ids::KEYBOARD_TOUCHPAD_ALT,
];

/// Runtime products carrying a touchpad, in probe order.
pub const TOUCHPAD_PRODUCTS: &[u16] = &[product_ids::KEYBOARD_TOUCHPAD, product_ids::KEYBOARD_TOUCHPAD_ALT];

/// Whether `vid:pid` is a Novatek keyboard in runtime mode.
pub fn is_novatek_keyboard(vendor_id: u16, product_id: u16) -> bool {
    vendor_id == NOVATEK_VENDOR_ID && KEYBOARD_PRODUCTS.contains(&product_id)
}

/// Whether `vid:pid` is a Novatek keyboard with a touchpad.
pub fn is_novatek_touchpad(vendor_id: u16, product_id: u16) -> bool {
    vendor_id == NOVATEK_VENDOR_ID && TOUCHPAD_PRODUCTS.contains(&product_id)
}

/// Whether `vid:pid` is the Novatek keyboard boot loader.
pub fn is_novatek_boot_loader(vendor_id: u16, product_id: u16) -> bool {
    vendor_id == NOVATEK_BOOT_VENDOR_ID && product_id == product_ids::BOOT_LOADER
}
