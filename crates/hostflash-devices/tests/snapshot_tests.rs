//! Snapshot tests for wire traces and operator-facing text.
//!
//! The report and register sequences below are what the hardware sees; a
//! change to any of them is a protocol change and must be deliberate.

mod common;

use common::{KeyboardFlash, RecordingWaiter, bcm_descriptor, fast_engine_config};
use hostflash_devices::bcm57xx::registers::{BAR_DEVICE, BCM57XX};
use hostflash_devices::NvmTransport;
use hostflash_devices::prelude::*;
use hostflash_engine::mmio::MappedRegions;
use hostflash_engine::prelude::*;
use hostflash_test_helpers::mock::AccessKind;
use hostflash_test_helpers::prelude::*;
use insta::assert_snapshot;

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ")
}

mod wire_traces {
    use super::*;

    #[test]
    fn test_keyboard_report_sequence() -> TestResult {
        let usb = ScriptedUsb::new(KeyboardFlash::new());
        let mut kb = NovatekKeyboard::new(keyboard_descriptor("usb:3-1", product_ids::KEYBOARD), usb.clone())
            .with_commands(NovatekCommands {
                erase_delay_ms: 0,
                ..NovatekCommands::default()
            });
        UpdateRunner::new(fast_engine_config())?
            .with_waiter(RecordingWaiter::default())
            .run(&mut kb, &pattern_image(2048))?;

        let trace: Vec<String> = usb
            .sent()
            .iter()
            .map(|report| match report.as_slice() {
                short if short.len() == 6 => hex(short),
                [id, tag, data @ ..] => format!(
                    "{} +{} data[0]={:02x}",
                    hex(&[*id, *tag]),
                    data.len(),
                    data.first().copied().unwrap_or(0)
                ),
                other => hex(other),
            })
            .collect();
        assert_snapshot!(trace.join("\n"), @r"
        05 75 00 00 00 00
        05 45 45 45 45 45
        05 57 00 00 00 08
        06 77 +2048 data[0]=00
        05 57 00 00 00 08
        06 77 +2048 data[0]=01
        05 52 00 00 00 08
        05 55 55 55 55 55
        ");
        Ok(())
    }

    #[test]
    fn test_nvm_word_write_register_trace() -> TestResult {
        let engine = NvmEngineBehavior::new(
            NvmEngineLayout {
                region: BAR_DEVICE,
                command: 0x7000,
                address: 0x700c,
                read_data: 0x7010,
                write_data: 0x7008,
                doit: 1 << 4,
                write: 1 << 5,
                done: 1 << 3,
            },
            64,
        );
        let model = RegisterModel::new(&[(BAR_DEVICE, 0x8000)]).with_behavior(engine);
        let mut provider = model.clone();
        let mut regions = MappedRegions::open(&mut provider, &[BAR_DEVICE])?;

        let mut nvm = NvmTransport::new(&mut regions);
        nvm.begin_write(4)?;
        nvm.write_chunk(&Chunk::new(0, 0, &[0xde, 0xad, 0xbe, 0xef]))?;

        let trace: Vec<String> = model
            .log()
            .iter()
            .filter(|a| a.kind == AccessKind::Write)
            .map(|a| match BCM57XX.at(a.region, a.offset) {
                Some(layout) => layout.decode(a.value).to_string(),
                None => format!("BAR[{}]+{:#x}={:#010x}", a.region, a.offset, a.value),
            })
            .collect();
        assert_snapshot!(trace.join("\n"), @r"
        NVM_COMMAND=0x00000008 [Done]
        NVM_COMMAND=0x00010010 [Doit WriteEnableCommand]
        NVM_WRITE=0xdeadbeef
        NVM_ADDR=0x00000000
        NVM_COMMAND=0x00000008 [Done]
        NVM_COMMAND=0x000001b0 [Doit Wr First Last]
        NVM_COMMAND=0x00000008 [Done]
        NVM_COMMAND=0x00020010 [Doit WriteDisableCommand]
        ");
        Ok(())
    }

    #[test]
    fn test_touchpad_frame_envelope() {
        let frame = TouchpadCodes::default().frame(0x5c00, &[0x11, 0x22]);
        let head = frame.get(..10).map(hex).unwrap_or_default();
        let tail = frame.get(frame.len() - 8..).map(hex).unwrap_or_default();
        assert_snapshot!(format!("{} bytes\n{head}\n{tail}", frame.len()), @r"
        1040 bytes
        06 d0 cc cc 00 5c cc cc 11 22
        ee d2 cc cc cc cc cc cc
        ");
    }
}

mod status_names {
    use super::*;

    #[test]
    fn test_touchpad_status_table() {
        let codes = TouchpadCodes::default();
        let name = |code: u8| codes.describe(code).unwrap_or_else(|| "-".to_owned());
        let rows: Vec<String> = [
            codes.check_checksum,
            codes.enter_bootloader,
            codes.ic_erase,
            codes.program,
            codes.verify_1k_data,
            codes.verify_checksum,
            codes.program_pass,
            codes.end_program,
        ]
        .iter()
        .map(|s| {
            format!(
                "{:02x} {}, {:02x} {}, {:02x} {}",
                s.command,
                name(s.command),
                s.pass,
                name(s.pass),
                s.fail,
                name(s.fail)
            )
        })
        .collect();
        assert_snapshot!(rows.join("\n"), @r"
        f0 CHECKCHECKSUM, e0 CHECKCHECKSUM_PASS, d0 CHECKCHECKSUM_FAIL
        f1 ENTERBOOTLOADER, e1 ENTERBOOTLOADER_PASS, d1 ENTERBOOTLOADER_FAIL
        f2 ICERASE, e2 ICERASE_PASS, d2 ICERASE_FAIL
        f3 PROGRAM, e3 PROGRAM_PASS, d3 PROGRAM_FAIL
        f4 VERIFY1KDATA, e4 VERIFY1KDATA_PASS, d4 VERIFY1KDATA_FAIL
        f5 VERIFY_CHECKSUM, e5 VERIFY_CHECKSUM_PASS, d5 VERIFY_CHECKSUM_FAIL
        f6 PROGRAMPASS, 00 -, d6 PROGRAMPASS_FAIL
        f7 ENDPROGRAM, e7 ENDPROGRAM_PASS, d7 ENDPROGRAM_FAIL
        ");
    }
}

mod messages {
    use super::*;

    #[test]
    fn test_descriptors() {
        assert_snapshot!(
            keyboard_descriptor("usb:3-1", product_ids::KEYBOARD).to_string(),
            @"usb:3-1 (258a:001e, tw.com.novatek, usb interface 1)"
        );
        assert_snapshot!(
            bcm_descriptor().to_string(),
            @"0000:03:00.0 (14e4:1657, com.broadcom.bcm57xx, mmio [0, 1, 2])"
        );
    }

    #[test]
    fn test_probe_rejections() {
        let usb = ScriptedUsb::new(EchoDevice::default());
        let mut kb = NovatekKeyboard::new(keyboard_descriptor("usb:3-1", 0x5678), usb.clone());
        assert_snapshot!(
            must_fail(kb.probe()).to_string(),
            @"Device mismatch: 258a:5678 is not a Novatek keyboard"
        );

        let mut tp = NovatekTouchpad::new(touchpad_descriptor("usb:3-1", product_ids::KEYBOARD), usb);
        assert_snapshot!(
            must_fail(tp.probe()).to_string(),
            @"Device mismatch: 258a:001e has no Novatek touchpad"
        );

        let mut descriptor = bcm_descriptor();
        descriptor.vendor_id = 0x8086;
        let mut nic = Bcm57xxDevice::new(descriptor, RegisterModel::new(&[]), common::SharedBinder::default());
        assert_snapshot!(
            must_fail(nic.probe()).to_string(),
            @"Device mismatch: vendor 8086 is not Broadcom"
        );
    }

    #[test]
    fn test_undersized_touchpad_image() -> TestResult {
        let usb = ScriptedUsb::new(EchoDevice::default());
        let mut tp = NovatekTouchpad::new(touchpad_descriptor("usb:3-1", product_ids::KEYBOARD_TOUCHPAD), usb);
        tp.open()?;
        assert_snapshot!(
            must_fail(tp.write_firmware(&pattern_image(1024), &fast_context())).to_string(),
            @"Access of 24576 bytes at offset 0x0 exceeds touchpad image of 0x400 bytes"
        );
        Ok(())
    }
}
