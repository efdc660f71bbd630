//! BCM57xx register map.
//!
//! Only the registers the NVM update and APE restart touch are listed. Bit
//! positions are those of the little-endian register words as the device
//! exposes them through the BARs.

use hostflash_engine::registers::{BitField, RegisterLayout, RegisterTable};

/// BAR holding the device registers, including the NVM engine.
pub const BAR_DEVICE: usize = 0;
/// BAR holding the APE (management processor) registers.
pub const BAR_APE: usize = 1;
/// Third window, mapped for completeness and otherwise unused.
pub const BAR_AUX: usize = 2;
/// Every BAR mapped on open.
pub const BARS: [usize; 3] = [BAR_DEVICE, BAR_APE, BAR_AUX];

/// NVM command register fields.
pub mod nvm_command {
    use super::BitField;

    pub const RESET: BitField = BitField::flag("Reset", 1);
    pub const DONE: BitField = BitField::flag("Done", 3);
    pub const DOIT: BitField = BitField::flag("Doit", 4);
    pub const WR: BitField = BitField::flag("Wr", 5);
    pub const ERASE: BitField = BitField::flag("Erase", 6);
    pub const FIRST: BitField = BitField::flag("First", 7);
    pub const LAST: BitField = BitField::flag("Last", 8);
    pub const WRITE_ENABLE_COMMAND: BitField = BitField::flag("WriteEnableCommand", 16);
    pub const WRITE_DISABLE_COMMAND: BitField = BitField::flag("WriteDisableCommand", 17);

    pub(super) const FIELDS: &[BitField] = &[
        RESET,
        DONE,
        DOIT,
        WR,
        ERASE,
        FIRST,
        LAST,
        WRITE_ENABLE_COMMAND,
        WRITE_DISABLE_COMMAND,
    ];
}

/// Software arbitration register fields. Requester slot 1 belongs to the
/// host driver.
pub mod arbitration {
    use super::BitField;

    pub const REQ_SET0: BitField = BitField::flag("ReqSet0", 0);
    pub const REQ_SET1: BitField = BitField::flag("ReqSet1", 1);
    pub const REQ_SET2: BitField = BitField::flag("ReqSet2", 2);
    pub const REQ_SET3: BitField = BitField::flag("ReqSet3", 3);
    pub const REQ_CLR0: BitField = BitField::flag("ReqClr0", 4);
    pub const REQ_CLR1: BitField = BitField::flag("ReqClr1", 5);
    pub const REQ_CLR2: BitField = BitField::flag("ReqClr2", 6);
    pub const REQ_CLR3: BitField = BitField::flag("ReqClr3", 7);
    pub const ARB_WON0: BitField = BitField::flag("ArbWon0", 8);
    pub const ARB_WON1: BitField = BitField::flag("ArbWon1", 9);
    pub const ARB_WON2: BitField = BitField::flag("ArbWon2", 10);
    pub const ARB_WON3: BitField = BitField::flag("ArbWon3", 11);
    pub const REQ0: BitField = BitField::flag("Req0", 12);
    pub const REQ1: BitField = BitField::flag("Req1", 13);
    pub const REQ2: BitField = BitField::flag("Req2", 14);
    pub const REQ3: BitField = BitField::flag("Req3", 15);

    pub(super) const FIELDS: &[BitField] = &[
        REQ_SET0, REQ_SET1, REQ_SET2, REQ_SET3, REQ_CLR0, REQ_CLR1, REQ_CLR2, REQ_CLR3, ARB_WON0, ARB_WON1,
        ARB_WON2, ARB_WON3, REQ0, REQ1, REQ2, REQ3,
    ];
}

/// NVM access register fields.
pub mod nvm_access {
    use super::BitField;

    pub const ENABLE: BitField = BitField::flag("Enable", 0);
    pub const WRITE_ENABLE: BitField = BitField::flag("WriteEnable", 1);

    pub(super) const FIELDS: &[BitField] = &[ENABLE, WRITE_ENABLE];
}

/// APE mode register fields.
pub mod ape_mode {
    use super::BitField;

    pub const RESET: BitField = BitField::flag("Reset", 0);
    pub const HALT: BitField = BitField::flag("Halt", 1);
    pub const FAST_BOOT: BitField = BitField::flag("FastBoot", 2);
    pub const HOST_DIAG: BitField = BitField::flag("HostDiag", 3);
    pub const EVENT1: BitField = BitField::flag("Event1", 5);
    pub const EVENT2: BitField = BitField::flag("Event2", 6);
    pub const GRC_INT: BitField = BitField::flag("GRCint", 7);
    pub const SWAP_ATB_DWORD: BitField = BitField::flag("SwapATBdword", 9);
    pub const SWAP_ARB_DWORD: BitField = BitField::flag("SwapARBdword", 11);
    pub const CHANNEL0_ENABLE: BitField = BitField::flag("Channel0Enable", 14);
    pub const CHANNEL2_ENABLE: BitField = BitField::flag("Channel2Enable", 15);
    pub const MEMORY_ECC: BitField = BitField::flag("MemoryECC", 18);
    pub const ICODE_PIP_RD_DISABLE: BitField = BitField::flag("ICodePIPRdDisable", 19);
    pub const CHANNEL1_ENABLE: BitField = BitField::flag("Channel1Enable", 30);
    pub const CHANNEL3_ENABLE: BitField = BitField::flag("Channel3Enable", 31);

    pub(super) const FIELDS: &[BitField] = &[
        RESET,
        HALT,
        FAST_BOOT,
        HOST_DIAG,
        EVENT1,
        EVENT2,
        GRC_INT,
        SWAP_ATB_DWORD,
        SWAP_ARB_DWORD,
        CHANNEL0_ENABLE,
        CHANNEL2_ENABLE,
        MEMORY_ECC,
        ICODE_PIP_RD_DISABLE,
        CHANNEL1_ENABLE,
        CHANNEL3_ENABLE,
    ];
}

pub const NVM_COMMAND: RegisterLayout = RegisterLayout {
    name: "NVM_COMMAND",
    region: BAR_DEVICE,
    offset: 0x7000,
    fields: nvm_command::FIELDS,
};
pub const NVM_WRITE: RegisterLayout = RegisterLayout::plain("NVM_WRITE", BAR_DEVICE, 0x7008);
pub const NVM_ADDR: RegisterLayout = RegisterLayout::plain("NVM_ADDR", BAR_DEVICE, 0x700c);
pub const NVM_READ: RegisterLayout = RegisterLayout::plain("NVM_READ", BAR_DEVICE, 0x7010);
pub const NVM_SOFTWARE_ARBITRATION: RegisterLayout = RegisterLayout {
    name: "NVM_SOFTWARE_ARBITRATION",
    region: BAR_DEVICE,
    offset: 0x7020,
    fields: arbitration::FIELDS,
};
pub const NVM_ACCESS: RegisterLayout = RegisterLayout {
    name: "NVM_ACCESS",
    region: BAR_DEVICE,
    offset: 0x7024,
    fields: nvm_access::FIELDS,
};
pub const VENDOR_DEVICE_ID: RegisterLayout = RegisterLayout::plain("VENDOR_DEVICE_ID", BAR_DEVICE, 0x6434);
pub const APE_MODE: RegisterLayout = RegisterLayout {
    name: "APE_MODE",
    region: BAR_APE,
    offset: 0x10000,
    fields: ape_mode::FIELDS,
};

/// The BCM57xx family table.
pub const BCM57XX: RegisterTable = RegisterTable {
    family: "bcm57xx",
    registers: &[
        VENDOR_DEVICE_ID,
        NVM_COMMAND,
        NVM_WRITE,
        NVM_ADDR,
        NVM_READ,
        NVM_SOFTWARE_ARBITRATION,
        NVM_ACCESS,
        APE_MODE,
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arbitration_slot_one_masks() {
        assert_eq!(arbitration::REQ_SET1.bit(), 0x0002);
        assert_eq!(arbitration::REQ_CLR1.bit(), 0x0020);
        assert_eq!(arbitration::ARB_WON1.bit(), 0x0200);
        assert_eq!(arbitration::REQ1.bit(), 0x2000);
    }

    #[test]
    fn test_nvm_command_bits() {
        assert_eq!(nvm_command::DONE.bit(), 0x8);
        assert_eq!(nvm_command::DOIT.bit() | nvm_command::WR.bit(), 0x30);
        assert_eq!(nvm_command::FIRST.bit() | nvm_command::LAST.bit(), 0x180);
        assert_eq!(nvm_command::WRITE_ENABLE_COMMAND.bit(), 0x1_0000);
        assert_eq!(nvm_command::WRITE_DISABLE_COMMAND.bit(), 0x2_0000);
    }

    #[test]
    fn test_ape_mode_high_bits() {
        assert_eq!(ape_mode::CHANNEL1_ENABLE.bit(), 0x4000_0000);
        assert_eq!(ape_mode::CHANNEL3_ENABLE.bit(), 0x8000_0000);
        assert_eq!(ape_mode::MEMORY_ECC.bit(), 0x4_0000);
    }

    #[test]
    fn test_table_lookup_by_offset() {
        assert_eq!(BCM57XX.at(BAR_DEVICE, 0x7024).map(|r| r.name), Some("NVM_ACCESS"));
        assert_eq!(BCM57XX.at(BAR_APE, 0x10000).map(|r| r.name), Some("APE_MODE"));
        assert!(BCM57XX.at(BAR_DEVICE, 0x10000).is_none());
    }

    #[test]
    fn test_decode_restart_word() {
        let word = ape_mode::RESET.bit();
        assert_eq!(APE_MODE.decode(word).to_string(), "APE_MODE=0x00000001 [Reset]");
        assert_eq!(
            NVM_COMMAND.decode(0x1b8).to_string(),
            "NVM_COMMAND=0x000001b8 [Done Doit Wr First Last]"
        );
    }
}
