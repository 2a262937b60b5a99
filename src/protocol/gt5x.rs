//! GT-5x sensor packet codec
//!
//! The bridge sketch talks to the sensor with this protocol before it
//! forwards an image. Two packet shapes exist:
//!
//! ```text
//! command/response (12 bytes):
//!   0x55 0xAA | device id u16 | params u32 | command or ack u16 | checksum u16
//! data (variable):
//!   0x5A 0xA5 | device id u16 | data ...   | checksum u16
//! ```
//!
//! Multi-byte fields are little-endian. The checksum is the 16-bit wrapping
//! sum of every preceding byte in the packet. A response whose device id or
//! checksum does not match is skipped and the reader resynchronizes on the
//! next start code, until the response deadline passes.

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use thiserror::Error;

use super::channel::{read_one, ByteRead};
use crate::image::{GeometryError, RawPayload};

/// Start code of command and response packets
pub const COMMAND_START: [u8; 2] = [0x55, 0xAA];

/// Start code of data packets
pub const DATA_START: [u8; 2] = [0x5A, 0xA5];

pub const DEVICE_ID: u16 = 0x0001;

/// Length of a command or response packet
pub const PACKET_LEN: usize = 12;

/// Time allowed for a complete response
pub const RESPONSE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Length of the device info block returned by `Open`
pub const DEVICE_INFO_LEN: usize = 24;

const ACK: u16 = 0x30;
const NACK: u16 = 0x31;

/// Sensor command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Command {
    Open = 0x01,
    Close = 0x02,
    UsbInternalCheck = 0x03,
    ChangeBaudRate = 0x04,
    SetIapMode = 0x05,
    CmosLed = 0x12,
    GetEnrollCount = 0x20,
    CheckEnrolled = 0x21,
    StartEnroll = 0x22,
    Enroll1 = 0x23,
    Enroll2 = 0x24,
    Enroll3 = 0x25,
    IsPressFinger = 0x26,
    DeleteId = 0x40,
    DeleteAll = 0x41,
    Verify = 0x50,
    Identify = 0x51,
    VerifyTemplate = 0x52,
    IdentifyTemplate = 0x53,
    CaptureFinger = 0x60,
    MakeTemplate = 0x61,
    GetImage = 0x62,
    /// Capture and download the raw 160x120 plane
    GetRawImage = 0x63,
    GetTemplate = 0x70,
    SetTemplate = 0x71,
    GetDatabaseStart = 0x72,
    GetDatabaseEnd = 0x73,
    UpgradeFirmware = 0x80,
    UpgradeIsoCdImage = 0x81,
}

impl Command {
    pub fn code(self) -> u16 {
        self as u16
    }
}

/// Error codes carried in the params field of a NACK response
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nack {
    #[error("capture timeout")]
    Timeout,
    #[error("invalid baud rate")]
    InvalidBaudRate,
    #[error("invalid position")]
    InvalidPosition,
    #[error("id is not used")]
    IsNotUsed,
    #[error("id is already used")]
    IsAlreadyUsed,
    #[error("communication error")]
    CommError,
    #[error("1:1 verification failed")]
    VerifyFailed,
    #[error("1:N identification failed")]
    IdentifyFailed,
    #[error("database is full")]
    DatabaseFull,
    #[error("database is empty")]
    DatabaseEmpty,
    #[error("enrollment steps out of order")]
    TurnError,
    #[error("fingerprint is too bad")]
    BadFinger,
    #[error("enrollment failed")]
    EnrollFailed,
    #[error("command is not supported")]
    NotSupported,
    #[error("device error")]
    DeviceError,
    #[error("capture canceled")]
    CaptureCanceled,
    #[error("invalid parameter")]
    InvalidParam,
    #[error("finger is not pressed")]
    FingerNotPressed,
    #[error("unknown error code {0:#06x}")]
    Unknown(u32),
}

impl Nack {
    pub fn from_code(code: u32) -> Self {
        match code {
            0x1001 => Nack::Timeout,
            0x1002 => Nack::InvalidBaudRate,
            0x1003 => Nack::InvalidPosition,
            0x1004 => Nack::IsNotUsed,
            0x1005 => Nack::IsAlreadyUsed,
            0x1006 => Nack::CommError,
            0x1007 => Nack::VerifyFailed,
            0x1008 => Nack::IdentifyFailed,
            0x1009 => Nack::DatabaseFull,
            0x100A => Nack::DatabaseEmpty,
            0x100B => Nack::TurnError,
            0x100C => Nack::BadFinger,
            0x100D => Nack::EnrollFailed,
            0x100E => Nack::NotSupported,
            0x100F => Nack::DeviceError,
            0x1010 => Nack::CaptureCanceled,
            0x1011 => Nack::InvalidParam,
            0x1012 => Nack::FingerNotPressed,
            other => Nack::Unknown(other),
        }
    }
}

#[derive(Error, Debug)]
pub enum SensorError {
    #[error("no valid response within {0:?}")]
    Timeout(Duration),

    #[error("sensor rejected command: {0}")]
    Nack(#[from] Nack),

    #[error("unexpected response code {0:#06x}")]
    UnexpectedCode(u16),

    #[error("channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, SensorError>;

/// 16-bit wrapping byte sum
pub fn checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |sum, &b| sum.wrapping_add(u16::from(b)))
}

/// Build a command packet
pub fn command_packet(command: Command, params: u32) -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0..2].copy_from_slice(&COMMAND_START);
    LittleEndian::write_u16(&mut packet[2..4], DEVICE_ID);
    LittleEndian::write_u32(&mut packet[4..8], params);
    LittleEndian::write_u16(&mut packet[8..10], command.code());
    let sum = checksum(&packet[..10]);
    LittleEndian::write_u16(&mut packet[10..12], sum);
    packet
}

/// Build a data packet around `data`
pub fn data_packet(data: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(data.len() + 6);
    packet.extend_from_slice(&DATA_START);
    packet.extend_from_slice(&DEVICE_ID.to_le_bytes());
    packet.extend_from_slice(data);
    let sum = checksum(&packet);
    packet.extend_from_slice(&sum.to_le_bytes());
    packet
}

/// Firmware details reported when the sensor is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub firmware_version: u32,
    pub iso_max_size: u32,
    pub serial_number: [u8; 16],
}

impl DeviceInfo {
    pub fn parse(bytes: &[u8; DEVICE_INFO_LEN]) -> Self {
        let mut serial_number = [0u8; 16];
        serial_number.copy_from_slice(&bytes[8..24]);
        Self {
            firmware_version: LittleEndian::read_u32(&bytes[0..4]),
            iso_max_size: LittleEndian::read_u32(&bytes[4..8]),
            serial_number,
        }
    }

    pub fn serial_hex(&self) -> String {
        self.serial_number.iter().map(|b| format!("{:02X}", b)).collect()
    }
}

/// Command/response session over a sensor channel
pub struct SensorLink<'a, C: ?Sized> {
    channel: &'a mut C,
    timeout: Duration,
}

impl<'a, C: Read + ?Sized> SensorLink<'a, C> {
    pub fn new(channel: &'a mut C) -> Self {
        Self {
            channel,
            timeout: RESPONSE_TIMEOUT,
        }
    }

    /// Set how long a response may take to arrive
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read the next valid response; NACKs become `SensorError::Nack`
    pub fn read_response(&mut self) -> Result<u32> {
        let deadline = Instant::now() + self.timeout;
        let mut packet = [0u8; PACKET_LEN];
        packet[0..2].copy_from_slice(&COMMAND_START);

        loop {
            self.sync(COMMAND_START, deadline)?;

            self.fill(&mut packet[2..4], deadline)?;
            let device_id = LittleEndian::read_u16(&packet[2..4]);
            if device_id != DEVICE_ID {
                debug!("Skipping response for device {:#06x}", device_id);
                continue;
            }

            self.fill(&mut packet[4..], deadline)?;
            let expected = checksum(&packet[..10]);
            let actual = LittleEndian::read_u16(&packet[10..12]);
            if expected != actual {
                debug!("Response checksum {:#06x}, expected {:#06x}", actual, expected);
                continue;
            }

            let params = LittleEndian::read_u32(&packet[4..8]);
            return match LittleEndian::read_u16(&packet[8..10]) {
                ACK => Ok(params),
                NACK => {
                    let nack = Nack::from_code(params);
                    warn!("Sensor NACK: {}", nack);
                    Err(SensorError::Nack(nack))
                }
                other => Err(SensorError::UnexpectedCode(other)),
            };
        }
    }

    /// Read a data packet carrying exactly `len` bytes
    pub fn read_data(&mut self, len: usize) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.timeout;
        let mut id = [0u8; 2];
        let mut data = vec![0u8; len];
        let mut trailer = [0u8; 2];

        loop {
            self.sync(DATA_START, deadline)?;

            self.fill(&mut id, deadline)?;
            let device_id = LittleEndian::read_u16(&id);
            if device_id != DEVICE_ID {
                debug!("Skipping data for device {:#06x}", device_id);
                continue;
            }

            self.fill(&mut data, deadline)?;
            self.fill(&mut trailer, deadline)?;

            let expected = checksum(&DATA_START)
                .wrapping_add(checksum(&id))
                .wrapping_add(checksum(&data));
            let actual = LittleEndian::read_u16(&trailer);
            if expected != actual {
                debug!("Data checksum {:#06x}, expected {:#06x}", actual, expected);
                continue;
            }

            debug!("Read {} data bytes", len);
            return Ok(data);
        }
    }

    /// Consume bytes until the two-byte start code has been seen
    fn sync(&mut self, start: [u8; 2], deadline: Instant) -> Result<()> {
        let mut previous = None;
        loop {
            let byte = self.next_byte(deadline)?;
            if previous == Some(start[0]) && byte == start[1] {
                return Ok(());
            }
            previous = Some(byte);
        }
    }

    fn fill(&mut self, buf: &mut [u8], deadline: Instant) -> Result<()> {
        for slot in buf.iter_mut() {
            *slot = self.next_byte(deadline)?;
        }
        Ok(())
    }

    fn next_byte(&mut self, deadline: Instant) -> Result<u8> {
        loop {
            if Instant::now() >= deadline {
                return Err(SensorError::Timeout(self.timeout));
            }
            match read_one(&mut *self.channel)? {
                ByteRead::Byte(b) => return Ok(b),
                ByteRead::TimedOut => continue,
                ByteRead::Closed => return Err(SensorError::ChannelClosed),
            }
        }
    }
}

impl<'a, C: Read + Write + ?Sized> SensorLink<'a, C> {
    /// Send a command and wait for its acknowledgement; returns the
    /// response params
    pub fn send(&mut self, command: Command, params: u32) -> Result<u32> {
        debug!("Sensor command {:?} ({:#x})", command, params);
        self.channel.write_all(&command_packet(command, params))?;
        self.channel.flush()?;
        self.read_response()
    }

    /// Initialize the sensor and fetch its device info
    pub fn open(&mut self) -> Result<DeviceInfo> {
        self.send(Command::Open, 1)?;
        let data = self.read_data(DEVICE_INFO_LEN)?;
        let mut block = [0u8; DEVICE_INFO_LEN];
        block.copy_from_slice(&data);
        Ok(DeviceInfo::parse(&block))
    }

    pub fn close(&mut self) -> Result<()> {
        self.send(Command::Close, 0).map(drop)
    }

    pub fn set_led(&mut self, on: bool) -> Result<()> {
        self.send(Command::CmosLed, u32::from(on)).map(drop)
    }

    /// The sensor switches rates after acknowledging; reopen the port at
    /// the new rate before sending anything else
    pub fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        self.send(Command::ChangeBaudRate, baud_rate).map(drop)
    }

    pub fn enrolled_count(&mut self) -> Result<u32> {
        self.send(Command::GetEnrollCount, 0)
    }

    /// `Ok(true)` if `id` holds a template
    pub fn is_enrolled(&mut self, id: u16) -> Result<bool> {
        match self.send(Command::CheckEnrolled, u32::from(id)) {
            Ok(_) => Ok(true),
            Err(SensorError::Nack(Nack::IsNotUsed)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn start_enroll(&mut self, id: u16) -> Result<()> {
        self.send(Command::StartEnroll, u32::from(id)).map(drop)
    }

    /// Scan pass 1, 2 or 3 of an enrollment; any other pass is treated as 3
    pub fn enroll_scan(&mut self, pass: u8) -> Result<()> {
        let command = match pass {
            1 => Command::Enroll1,
            2 => Command::Enroll2,
            _ => Command::Enroll3,
        };
        self.send(command, 0).map(drop)
    }

    pub fn is_finger_pressed(&mut self) -> Result<bool> {
        // Zero params means pressed
        Ok(self.send(Command::IsPressFinger, 0)? == 0)
    }

    pub fn delete_id(&mut self, id: u16) -> Result<()> {
        self.send(Command::DeleteId, u32::from(id)).map(drop)
    }

    pub fn delete_all(&mut self) -> Result<()> {
        self.send(Command::DeleteAll, 0).map(drop)
    }

    /// 1:1 match of the captured finger against `id`
    pub fn verify(&mut self, id: u16) -> Result<()> {
        self.send(Command::Verify, u32::from(id)).map(drop)
    }

    /// 1:N search; returns the matching id
    pub fn identify(&mut self) -> Result<u32> {
        self.send(Command::Identify, 0)
    }

    pub fn capture_finger(&mut self, high_quality: bool) -> Result<()> {
        self.send(Command::CaptureFinger, u32::from(high_quality)).map(drop)
    }

    /// Capture and download the raw sensor plane
    pub fn raw_image(&mut self, width: usize, height: usize) -> Result<RawPayload> {
        self.send(Command::GetRawImage, 0)?;
        let len = width.checked_mul(height).ok_or(GeometryError::PayloadLength {
            width,
            height,
            expected: usize::MAX,
            actual: 0,
        })?;
        let samples = self.read_data(len)?;
        Ok(RawPayload::new(width, height, samples)?)
    }
}
