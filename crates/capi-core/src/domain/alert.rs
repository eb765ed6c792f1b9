//! System alert conditions delivered inside newer binary replies.
//!
//! The device groups conditions into three severities. Faults stop tracking
//! until cleared, alerts degrade it, events are informational. Each condition
//! is a (type, code) pair; the code tables differ per type.

use std::fmt;

/// Severity of a reported condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertType {
    Fault = 0x00,
    Alert = 0x01,
    Event = 0x02,
}

impl TryFrom<u8> for AlertType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Fault),
            0x01 => Ok(Self::Alert),
            0x02 => Ok(Self::Event),
            _ => Err(()),
        }
    }
}

/// One condition reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SystemAlert {
    /// Raw severity byte; decode with [`AlertType::try_from`].
    pub condition_type: u8,
    /// Code within the severity's table.
    pub condition_code: u16,
}

impl SystemAlert {
    pub fn new(condition_type: u8, condition_code: u16) -> Self {
        Self {
            condition_type,
            condition_code,
        }
    }

    pub fn alert_type(&self) -> Option<AlertType> {
        AlertType::try_from(self.condition_type).ok()
    }
}

fn fault_name(code: u16) -> &'static str {
    match code {
        0x0000 => "Ok",
        0x0001 => "FatalParameter",
        0x0002 => "SensorParameter",
        0x0003 => "MainVoltage",
        0x0004 => "SensorVoltage",
        0x0005 => "IlluminatorVoltage",
        0x0006 => "IlluminatorCurrent",
        0x0007 => "Sensor0Temp",
        0x0008 => "Sensor1Temp",
        0x0009 => "MainTemp",
        0x000A => "SensorMalfunction",
        _ => "UnknownFault",
    }
}

fn alert_name(code: u16) -> &'static str {
    match code {
        0x0000 => "Ok",
        0x0001 => "BatteryLow",
        0x0002 => "BumpDetected",
        0x0003 => "IncompatibleFirmware",
        0x0004 => "NonFatalParameter",
        0x0005 => "FlashMemoryFull",
        0x0007 => "StorageTempExceeded",
        0x0008 => "TempHigh",
        0x0009 => "TempLow",
        0x000A => "ScuDisconnected",
        0x000E => "PtpClockSynch",
        _ => "UnknownAlert",
    }
}

fn event_name(code: u16) -> &'static str {
    match code {
        0x0000 => "Ok",
        0x0001 => "ToolPluggedIn",
        0x0002 => "ToolUnplugged",
        0x0003 => "SiuPluggedIn",
        0x0004 => "SiuUnplugged",
        _ => "UnknownEvent",
    }
}

impl fmt::Display for SystemAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.alert_type() {
            Some(AlertType::Fault) => write!(f, "Fault: {}", fault_name(self.condition_code)),
            Some(AlertType::Alert) => write!(f, "Alert: {}", alert_name(self.condition_code)),
            Some(AlertType::Event) => write!(f, "Event: {}", event_name(self.condition_code)),
            None => write!(
                f,
                "UnknownCondition({:#04X}): {:#06X}",
                self.condition_type, self.condition_code
            ),
        }
    }
}
