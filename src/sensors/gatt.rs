//! GATT measurement frame decoding.
//!
//! Heart Rate Measurement (0x2A37), CSC Measurement (0x2A5B) and Cycling Power
//! Measurement (0x2A63) notifications. Every frame starts with a flags byte that
//! selects which optional fields follow; multi-byte fields are little-endian.
//! All decoders are pure and reject frames shorter than their flags require.

use crate::sensors::types::SensorError;
use serde::Serialize;
use uuid::Uuid;

/// Heart Rate Service UUID (0x180D)
pub const HEART_RATE_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_180d_0000_1000_8000_0080_5f9b_34fb);

/// Heart Rate Measurement UUID (0x2A37)
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a37_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Speed and Cadence Service UUID (0x1816)
pub const CSC_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1816_0000_1000_8000_0080_5f9b_34fb);

/// CSC Measurement UUID (0x2A5B)
pub const CSC_MEASUREMENT_UUID: Uuid = Uuid::from_u128(0x0000_2a5b_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Power Service UUID (0x1818)
pub const CYCLING_POWER_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_1818_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Power Measurement UUID (0x2A63)
pub const CYCLING_POWER_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a63_0000_1000_8000_0080_5f9b_34fb);

/// Decoded Heart Rate Measurement notification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeartRateMeasurement {
    /// Heart rate in BPM
    pub heart_rate: u16,
    /// Skin contact detected (false unless the contact sensor is present)
    pub contact_detected: bool,
    /// Sensor reports contact status at all
    pub contact_sensor_present: bool,
    /// Energy expended in kJ (if present)
    pub energy_expended: Option<u16>,
    /// RR intervals in 1/1024 s units
    pub rr_intervals: Vec<u16>,
}

/// Raw crank sample from a CSC Measurement notification.
///
/// Both counters are cumulative and wrap at 65536. A zeroed sample means the
/// frame carried no crank data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CscMeasurement {
    /// Cumulative crank revolutions
    pub crank_revolutions: u16,
    /// Last crank event time in 1/1024 s ticks
    pub crank_event_time: u16,
}

impl CscMeasurement {
    /// Whether this sample carries crank data usable for rate computation.
    pub fn has_crank_data(&self) -> bool {
        self.crank_revolutions != 0 || self.crank_event_time != 0
    }
}

/// Decoded Cycling Power Measurement notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PowerMeasurement {
    /// Instantaneous power in watts
    pub instantaneous_power: i16,
}

// Heart rate flags
const HR_FORMAT_U16: u8 = 0x01;
const HR_CONTACT_DETECTED: u8 = 0x02;
const HR_CONTACT_SUPPORTED: u8 = 0x04;
const HR_ENERGY_EXPENDED: u8 = 0x08;
const HR_RR_INTERVALS: u8 = 0x10;

// CSC flags
const CSC_CRANK_DATA: u8 = 0x02;

/// Bounds-checked little-endian reader over a frame.
struct FrameReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> FrameReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn ensure(&self, n: usize) -> Result<(), SensorError> {
        if self.offset + n > self.data.len() {
            return Err(SensorError::FrameTooShort {
                expected: self.offset + n,
                actual: self.data.len(),
            });
        }
        Ok(())
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    fn u8(&mut self) -> Result<u8, SensorError> {
        self.ensure(1)?;
        let value = self.data[self.offset];
        self.offset += 1;
        Ok(value)
    }

    fn u16_le(&mut self) -> Result<u16, SensorError> {
        self.ensure(2)?;
        let value = u16::from_le_bytes([self.data[self.offset], self.data[self.offset + 1]]);
        self.offset += 2;
        Ok(value)
    }

    fn i16_le(&mut self) -> Result<i16, SensorError> {
        self.u16_le().map(|v| v as i16)
    }
}

/// Parse a Heart Rate Measurement notification.
///
/// The format is:
/// - Byte 0: flags
/// - Heart rate: u8, or u16 when flags bit 0 is set
/// - Energy expended: u16 when flags bit 3 is set
/// - RR intervals: u16 pairs until fewer than two bytes remain (flags bit 4)
pub fn decode_heart_rate(frame: &[u8]) -> Result<HeartRateMeasurement, SensorError> {
    let mut reader = FrameReader::new(frame);
    let flags = reader.u8()?;

    let heart_rate = if flags & HR_FORMAT_U16 != 0 {
        reader.u16_le()?
    } else {
        u16::from(reader.u8()?)
    };

    let contact_sensor_present = flags & HR_CONTACT_SUPPORTED != 0;
    let contact_detected = contact_sensor_present && flags & HR_CONTACT_DETECTED != 0;

    let energy_expended = if flags & HR_ENERGY_EXPENDED != 0 {
        Some(reader.u16_le()?)
    } else {
        None
    };

    let mut rr_intervals = Vec::new();
    if flags & HR_RR_INTERVALS != 0 {
        rr_intervals.reserve(reader.remaining() / 2);
        // A trailing odd byte is dropped
        while reader.remaining() >= 2 {
            rr_intervals.push(reader.u16_le()?);
        }
    }

    Ok(HeartRateMeasurement {
        heart_rate,
        contact_detected,
        contact_sensor_present,
        energy_expended,
        rr_intervals,
    })
}

/// Parse a CSC Measurement notification.
///
/// Only crank data is decoded: when flags bit 1 is set, crank revolutions and
/// crank event time are read at offsets 1 and 3. Without it the sample is zeroed.
pub fn decode_csc(frame: &[u8]) -> Result<CscMeasurement, SensorError> {
    let mut reader = FrameReader::new(frame);
    let flags = reader.u8()?;

    if flags & CSC_CRANK_DATA == 0 {
        return Ok(CscMeasurement::default());
    }

    Ok(CscMeasurement {
        crank_revolutions: reader.u16_le()?,
        crank_event_time: reader.u16_le()?,
    })
}

/// Parse a Cycling Power Measurement notification.
///
/// Reads the signed instantaneous power at offset 1. The flags are not
/// consulted and extended power fields are not decoded.
pub fn decode_power(frame: &[u8]) -> Result<PowerMeasurement, SensorError> {
    let mut reader = FrameReader::new(frame);
    let _flags = reader.u8()?;

    Ok(PowerMeasurement {
        instantaneous_power: reader.i16_le()?,
    })
}
