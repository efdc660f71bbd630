//! Novatek command tables.
//!
//! The controller speaks in fixed-length feature reports: a 6-byte
//! command report and a long data report. Command codes and timings are
//! kept in serde tables so a deployment can override them without a
//! rebuild; the defaults are the values the shipping controllers use.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Length of a command report, report id included.
pub const SHORT_REPORT_LEN: usize = 6;

/// Length of a framed touchpad data report, report id included.
pub const LONG_REPORT_LEN: usize = 1040;

/// Keyboard controller commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NovatekCommands {
    /// Report id of command reports
    pub command_report: u8,
    /// Report id of data reports
    pub data_report: u8,
    /// Switch from runtime to boot-loader mode
    pub switch_to_boot: u8,
    /// Erase the application flash
    pub erase: u8,
    /// Reset into the application
    pub reset: u8,
    /// Announce a write of N bytes
    pub write_start: u8,
    /// Tag of a data block being written
    pub write_block: u8,
    /// Announce a read of N bytes
    pub read_start: u8,
    /// Tag of a data block being read
    pub read_block: u8,
    /// Data bytes per block
    pub block_size: usize,
    /// Size of the application flash
    pub image_capacity: usize,
    /// Start of the trailer region excluded from read-back comparison
    pub verify_limit: usize,
    /// Time the controller needs to erase, in milliseconds
    pub erase_delay_ms: u64,
}

impl Default for NovatekCommands {
    fn default() -> Self {
        Self {
            command_report: 0x05,
            data_report: 0x06,
            switch_to_boot: 0x75,
            erase: 0x45,
            reset: 0x55,
            write_start: 0x57,
            write_block: 0x77,
            read_start: 0x52,
            read_block: 0x72,
            block_size: 2048,
            image_capacity: 14 * 1024,
            verify_limit: 0x37FB,
            erase_delay_ms: 2000,
        }
    }
}

impl NovatekCommands {
    /// Erase wait.
    pub fn erase_delay(&self) -> Duration {
        Duration::from_millis(self.erase_delay_ms)
    }

    /// A command report with explicit argument bytes.
    pub fn command(&self, code: u8, args: [u8; 4]) -> [u8; SHORT_REPORT_LEN] {
        let [a, b, c, d] = args;
        [self.command_report, code, a, b, c, d]
    }

    /// A command report whose argument bytes repeat the code, as the erase
    /// and reset commands require.
    pub fn repeated(&self, code: u8) -> [u8; SHORT_REPORT_LEN] {
        self.command(code, [code; 4])
    }

    /// A command report carrying a 16-bit little-endian length in its last
    /// two bytes.
    pub fn with_length(&self, code: u8, len: u16) -> [u8; SHORT_REPORT_LEN] {
        let [lo, hi] = len.to_le_bytes();
        self.command(code, [0, 0, lo, hi])
    }
}

/// A touchpad status handshake: the command queried, the code that means
/// it passed, and the code that means it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCode {
    /// Status command
    pub command: u8,
    /// Pass code
    pub pass: u8,
    /// Fail code
    pub fail: u8,
}

impl StatusCode {
    const fn new(command: u8, pass: u8, fail: u8) -> Self {
        Self { command, pass, fail }
    }
}

/// Touchpad controller status codes and block framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TouchpadCodes {
    /// Report id of command and status reports
    pub command_report: u8,
    /// Report id of framed data blocks
    pub data_report: u8,
    /// Command prefix of a status query
    pub status_command: u8,
    /// Programming mode selector
    pub program_mode: u8,
    /// Checksum check
    pub check_checksum: StatusCode,
    /// Boot loader entry
    pub enter_bootloader: StatusCode,
    /// Flash erase, reported without being queried
    pub ic_erase: StatusCode,
    /// Programming
    pub program: StatusCode,
    /// Per-block data verification
    pub verify_1k_data: StatusCode,
    /// Whole-image checksum verification
    pub verify_checksum: StatusCode,
    /// Final programming confirmation. The controller acknowledges it
    /// with 0x00 rather than a dedicated pass code.
    pub program_pass: StatusCode,
    /// End of programming
    pub end_program: StatusCode,
    /// I2C bridge status codes: pass, fail, wait, timeout
    pub i2c: [u8; 4],
    /// Data bytes per framed block
    pub block_size: usize,
    /// Exact image length programmed; longer images are capped to it and
    /// shorter ones rejected
    pub image_len: usize,
    /// Frame tag following the report id
    pub frame_tag: u8,
    /// Trailer tag pair
    pub trailer_tag: [u8; 2],
    /// Filler byte in frame headers and trailers
    pub frame_fill: u8,
}

impl Default for TouchpadCodes {
    fn default() -> Self {
        Self {
            command_report: 0x05,
            data_report: 0x06,
            status_command: 0xA1,
            program_mode: 0x0b,
            check_checksum: StatusCode::new(0xF0, 0xE0, 0xD0),
            enter_bootloader: StatusCode::new(0xF1, 0xE1, 0xD1),
            ic_erase: StatusCode::new(0xF2, 0xE2, 0xD2),
            program: StatusCode::new(0xF3, 0xE3, 0xD3),
            verify_1k_data: StatusCode::new(0xF4, 0xE4, 0xD4),
            verify_checksum: StatusCode::new(0xF5, 0xE5, 0xD5),
            program_pass: StatusCode::new(0xF6, 0x00, 0xD6),
            end_program: StatusCode::new(0xF7, 0xE7, 0xD7),
            i2c: [0xFA, 0xFB, 0xFC, 0xFD],
            block_size: 1024,
            image_len: 24 * 1024,
            frame_tag: 0xD0,
            trailer_tag: [0xEE, 0xD2],
            frame_fill: 0xCC,
        }
    }
}

impl TouchpadCodes {
    fn all(&self) -> [(&'static str, StatusCode); 8] {
        [
            ("CHECKCHECKSUM", self.check_checksum),
            ("ENTERBOOTLOADER", self.enter_bootloader),
            ("ICERASE", self.ic_erase),
            ("PROGRAM", self.program),
            ("VERIFY1KDATA", self.verify_1k_data),
            ("VERIFY_CHECKSUM", self.verify_checksum),
            ("PROGRAMPASS", self.program_pass),
            ("ENDPROGRAM", self.end_program),
        ]
    }

    /// Name of a status code for logs.
    pub fn describe(&self, code: u8) -> Option<String> {
        for (name, status) in self.all() {
            if code == status.command {
                return Some(name.to_owned());
            }
            if code == status.fail {
                return Some(format!("{name}_FAIL"));
            }
            if code == status.pass && code != 0 {
                return Some(format!("{name}_PASS"));
            }
        }
        let [pass, fail, wait, timeout] = self.i2c;
        match code {
            c if c == pass => Some("I2C_PASS".to_owned()),
            c if c == fail => Some("I2C_FAIL".to_owned()),
            c if c == wait => Some("I2C_WAIT".to_owned()),
            c if c == timeout => Some("I2C_TIMEOUT".to_owned()),
            _ => None,
        }
    }

    /// Whether `code` is the fail code of any status command.
    pub fn is_failure(&self, code: u8) -> bool {
        let [_, i2c_fail, ..] = self.i2c;
        self.all().iter().any(|(_, s)| s.fail == code) || code == i2c_fail
    }

    /// The status query report for `command`.
    pub fn status_query(&self, command: u8) -> [u8; SHORT_REPORT_LEN] {
        [self.command_report, self.status_command, command, 0, 0, 0]
    }

    /// Frame one data block for `offset`, zero-padding a short block.
    pub fn frame(&self, offset: u16, data: &[u8]) -> Vec<u8> {
        let [lo, hi] = offset.to_le_bytes();
        let fill = self.frame_fill;
        let mut frame = Vec::with_capacity(16 + self.block_size);
        frame.extend_from_slice(&[self.data_report, self.frame_tag, fill, fill, lo, hi, fill, fill]);
        let body = data.len().min(self.block_size);
        frame.extend_from_slice(data.get(..body).unwrap_or(data));
        frame.resize(8 + self.block_size, 0);
        frame.extend_from_slice(&self.trailer_tag);
        frame.extend_from_slice(&[fill; 6]);
        frame
    }
}
