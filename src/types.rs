use std::fmt;

use serde_json::{Map, Value};

/// Last-known device shadow (`state.reported`), as returned by the cloud or
/// optimistically patched after a local write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot(Value);

impl Snapshot {
    pub fn new(reported: Value) -> Self {
        Self(reported)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub(crate) fn as_value_mut(&mut self) -> &mut Value {
        &mut self.0
    }

    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    /// The salt-water chlorinator block (`equipment.swc_0`).
    pub fn chlorinator(&self) -> Option<&Value> {
        self.0.pointer("/equipment/swc_0")
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.chlorinator()?.get("sn")?.as_str()
    }

    pub fn firmware_version(&self) -> Option<&str> {
        self.0.pointer("/debug/Version Firmware")?.as_str()
    }

    pub fn orp_setpoint(&self) -> Option<i64> {
        self.chlorinator()?.get("orp_sp")?.as_i64()
    }

    /// pH setpoint, reported by the device as tenths.
    pub fn ph_setpoint(&self) -> Option<f64> {
        Some(self.chlorinator()?.get("ph_sp")?.as_i64()? as f64 / 10.0)
    }

    pub fn boost_active(&self) -> Option<bool> {
        Some(self.chlorinator()?.get("boost")?.as_i64()? == 1)
    }

    pub fn chlorinator_on(&self) -> Option<bool> {
        Some(self.chlorinator()?.get("exo_state")?.as_i64()? == 1)
    }

    pub fn low_output_mode(&self) -> Option<bool> {
        Some(self.chlorinator()?.get("swc_low")?.as_i64()? == 1)
    }

    pub fn error_code(&self) -> Option<DeviceError> {
        self.chlorinator()?
            .get("error_code")?
            .as_u64()
            .map(DeviceError::from_code)
    }

    pub fn filter_pump_type(&self) -> Option<FilterPumpType> {
        self.chlorinator()?
            .pointer("/filter_pump/type")?
            .as_u64()
            .and_then(FilterPumpType::from_code)
    }

    pub fn heating(&self) -> Option<&Map<String, Value>> {
        self.0.get("heating")?.as_object()
    }

    pub fn heating_setpoint(&self) -> Option<f64> {
        self.heating()?.get("sp")?.as_f64()
    }

    pub fn schedules(&self) -> Option<&Map<String, Value>> {
        self.0.get("schedules")?.as_object()
    }

    pub fn schedule(&self, key: &str) -> Option<&Value> {
        self.schedules()?.get(key)
    }

    /// Whether a schedule's endpoint names a variable-speed pump, which is
    /// the only kind that honors an rpm setting.
    pub fn schedule_is_vsp(&self, key: &str) -> bool {
        self.schedule(key)
            .and_then(|s| s.get("endpoint"))
            .and_then(|e| e.as_str())
            .is_some_and(|e| e.to_ascii_lowercase().starts_with("vsp"))
    }
}

/// Device-reported error states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    None,
    LowConductivity,
    CheckOutput,
    LowWaterTemp,
    PhDosingStop,
    OrpStop,
    Unknown(u64),
}

impl DeviceError {
    pub fn from_code(code: u64) -> Self {
        match code {
            0 => DeviceError::None,
            3 => DeviceError::LowConductivity,
            4 => DeviceError::CheckOutput,
            6 => DeviceError::LowWaterTemp,
            7 => DeviceError::PhDosingStop,
            9 => DeviceError::OrpStop,
            other => DeviceError::Unknown(other),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeviceError::None => "No Error",
            DeviceError::LowConductivity => "Low Conductivity",
            DeviceError::CheckOutput => "Check Output",
            DeviceError::LowWaterTemp => "Low Water Temp",
            DeviceError::PhDosingStop => "pH Dosing Stop",
            DeviceError::OrpStop => "ORP Stop",
            DeviceError::Unknown(_) => "Unknown",
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::Unknown(code) => write!(f, "Unknown ({code})"),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPumpType {
    SingleSpeed,
    VariableSpeed,
}

impl FilterPumpType {
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(FilterPumpType::SingleSpeed),
            2 => Some(FilterPumpType::VariableSpeed),
            _ => None,
        }
    }
}

/// Which part of the desired-state document a write patches. Doubles as the
/// coalescing namespace for the write queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Pool,
    Heating,
    Schedule,
}

impl WriteKind {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            WriteKind::Pool => "pool",
            WriteKind::Heating => "heating",
            WriteKind::Schedule => "schedule",
        }
    }
}

/// Desired on/off window for a named schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleWindow {
    pub start: Option<String>,
    pub end: Option<String>,
    pub rpm: Option<i64>,
}

impl ScheduleWindow {
    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none() && self.rpm.is_none()
    }

    /// A zero-length window disabling the schedule.
    pub fn disabled() -> Self {
        Self {
            start: Some("00:00".to_string()),
            end: Some("00:00".to_string()),
            rpm: None,
        }
    }
}

/// Events emitted by the schedule reconciliation pass after each fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ScheduleAdded { key: String },
    ScheduleRemoved { key: String },
}
