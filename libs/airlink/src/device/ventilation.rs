//! Ventilation unit (VMD-02RPS78) accessors

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::{read_enum, read_u16, write_enum, RegisterEnum};
use crate::codec::Value;
use crate::error::{AirlinkError, Result};
use crate::node::Node;
use crate::profile::builtin::ventilation::{fields, MAX_OVERRIDE_MINUTES};
use crate::profile::Capability;

register_enum! {
    /// Speed the unit is running at right now
    VentilationSpeed {
        Off = 0,
        Low = 1,
        Mid = 2,
        High = 3,
        OverrideLow = 11,
        OverrideMid = 12,
        OverrideHigh = 13,
        Away = 21,
        Boost = 23,
        Auto = 24,
    }
}

register_enum! {
    /// Speed requested by a remote or by this library
    RequestedSpeed {
        Off = 0,
        Away = 1,
        Low = 2,
        Mid = 3,
        High = 4,
        Auto = 5,
        Boost = 7,
    }
}

register_enum! {
    BypassMode {
        Close = 0,
        Open = 100,
        Auto = 255,
    }
}

register_enum! {
    VentilationError {
        NoError = 0,
        NonSpecificFault = 1,
        EmergencyStop = 2,
        Fan1Error = 3,
        X22SensorError = 4,
        X23SensorError = 5,
        X21SensorError = 6,
        X20SensorError = 7,
        Fan2Error = 8,
        BindingModeActive = 254,
        IdentificationActive = 255,
    }
}

/// Speed presets with a matching override timer register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideSpeed {
    Low,
    Mid,
    High,
}

impl OverrideSpeed {
    fn timer_field(self) -> &'static str {
        match self {
            Self::Low => fields::OVERRIDE_TIME_LOW,
            Self::Mid => fields::OVERRIDE_TIME_MID,
            Self::High => fields::OVERRIDE_TIME_HIGH,
        }
    }
}

/// Preset selector for the supply/exhaust fan percentages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Away,
    Low,
    Mid,
    High,
}

impl Preset {
    fn fields(self) -> (&'static str, &'static str) {
        match self {
            Self::Away => (fields::FAN_SPEED_AWAY_SUPPLY, fields::FAN_SPEED_AWAY_EXHAUST),
            Self::Low => (fields::FAN_SPEED_LOW_SUPPLY, fields::FAN_SPEED_LOW_EXHAUST),
            Self::Mid => (fields::FAN_SPEED_MID_SUPPLY, fields::FAN_SPEED_MID_EXHAUST),
            Self::High => (fields::FAN_SPEED_HIGH_SUPPLY, fields::FAN_SPEED_HIGH_EXHAUST),
        }
    }
}

/// Fan percentages of one preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PresetFanSpeeds {
    pub supply: u16,
    pub exhaust: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorStatus {
    Ok,
    /// Sensor not fitted or not reporting
    Unavailable,
    Error,
}

/// Temperature reading in degrees Celsius
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Temperature {
    pub value: Option<f64>,
    pub status: SensorStatus,
}

impl Temperature {
    /// The unit reports NaN for a missing sensor and values below absolute
    /// zero for a failed one.
    pub fn from_celsius(celsius: f64) -> Self {
        if celsius.is_nan() {
            Self {
                value: None,
                status: SensorStatus::Unavailable,
            }
        } else if celsius < -273.0 {
            Self {
                value: None,
                status: SensorStatus::Error,
            }
        } else {
            Self {
                value: Some(celsius),
                status: SensorStatus::Ok,
            }
        }
    }
}

/// Heater level in percent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Heater {
    pub level: Option<u16>,
    pub status: SensorStatus,
}

impl Heater {
    /// Level word the unit reports for a heater that is not fitted
    pub const NOT_FITTED: u16 = 0xEF;

    pub fn from_raw(raw: u16) -> Self {
        if raw == Self::NOT_FITTED {
            Self {
                level: None,
                status: SensorStatus::Unavailable,
            }
        } else {
            Self {
                level: Some(raw),
                status: SensorStatus::Ok,
            }
        }
    }
}

/// All four temperature sensors of the unit
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Temperatures {
    pub indoor: Temperature,
    pub outdoor: Temperature,
    pub exhaust: Temperature,
    pub supply: Temperature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FilterState {
    pub remaining_days: u16,
    pub duration_days: u16,
    pub remaining_percent: u16,
    pub dirty: bool,
}

/// Typed view of a node with the ventilation capability
#[derive(Debug, Clone)]
pub struct VentilationUnit {
    node: Arc<Node>,
}

impl VentilationUnit {
    pub fn new(node: Arc<Node>) -> Result<Self> {
        node.profile().require(Capability::Ventilation)?;
        Ok(Self { node })
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    async fn get_enum<T: RegisterEnum>(&self, name: &str) -> Result<T> {
        read_enum(&self.node, name).await
    }

    async fn get_u16(&self, name: &str) -> Result<u16> {
        read_u16(&self.node, name).await
    }

    async fn set_enum<T: RegisterEnum>(&self, name: &str, value: T) -> Result<()> {
        write_enum(&self.node, name, value).await
    }

    pub async fn ventilation_speed(&self) -> Result<VentilationSpeed> {
        self.get_enum(fields::CURRENT_VENTILATION_SPEED).await
    }

    pub async fn requested_speed(&self) -> Result<RequestedSpeed> {
        self.get_enum(fields::REQUESTED_VENTILATION_SPEED).await
    }

    pub async fn set_ventilation_speed(&self, speed: RequestedSpeed) -> Result<()> {
        info!("{}: requesting ventilation speed {:?}", self.node, speed);
        self.set_enum(fields::REQUESTED_VENTILATION_SPEED, speed).await
    }

    /// Run at `speed` for `minutes`, then fall back to the previous speed
    pub async fn set_override(&self, speed: OverrideSpeed, minutes: u16) -> Result<()> {
        if minutes == 0 || f64::from(minutes) > MAX_OVERRIDE_MINUTES {
            return Err(AirlinkError::invalid_value(
                speed.timer_field(),
                format!("override of {minutes} min outside 1..={MAX_OVERRIDE_MINUTES}"),
            ));
        }
        info!("{}: override {:?} for {} min", self.node, speed, minutes);
        self.node.set(speed.timer_field(), minutes).await
    }

    pub async fn override_remaining(&self) -> Result<u16> {
        self.get_u16(fields::OVERRIDE_REMAINING_TIME).await
    }

    pub async fn preset(&self, preset: Preset) -> Result<PresetFanSpeeds> {
        let (supply, exhaust) = preset.fields();
        Ok(PresetFanSpeeds {
            supply: self.get_u16(supply).await?,
            exhaust: self.get_u16(exhaust).await?,
        })
    }

    /// Write both fan percentages of a preset
    ///
    /// Supply and exhaust registers are adjacent and go out in one request.
    pub async fn set_preset(&self, preset: Preset, speeds: PresetFanSpeeds) -> Result<()> {
        let (supply, exhaust) = preset.fields();
        info!("{}: preset {:?} = {:?}", self.node, preset, speeds);
        self.node
            .set_many(&[
                (supply, Value::Int(i64::from(speeds.supply))),
                (exhaust, Value::Int(i64::from(speeds.exhaust))),
            ])
            .await
    }

    pub async fn bypass_mode(&self) -> Result<BypassMode> {
        self.get_enum(fields::BYPASS_MODE).await
    }

    pub async fn set_bypass_mode(&self, mode: BypassMode) -> Result<()> {
        if let BypassMode::Unknown(raw) = mode {
            return Err(AirlinkError::invalid_value(
                fields::REQUESTED_BYPASS_MODE,
                format!("{raw} is not a bypass mode"),
            ));
        }
        self.set_enum(fields::REQUESTED_BYPASS_MODE, mode).await
    }

    pub async fn bypass_position(&self) -> Result<u16> {
        self.get_u16(fields::BYPASS_POSITION).await
    }

    pub async fn error_code(&self) -> Result<VentilationError> {
        self.get_enum(fields::ERROR_CODE).await
    }

    pub async fn temperatures(&self) -> Result<Temperatures> {
        self.node
            .refresh(Some(
                &[
                    fields::TEMPERATURE_INDOOR,
                    fields::TEMPERATURE_OUTDOOR,
                    fields::TEMPERATURE_EXHAUST,
                    fields::TEMPERATURE_SUPPLY,
                ][..],
            ))
            .await?;

        Ok(Temperatures {
            indoor: self.temperature(fields::TEMPERATURE_INDOOR).await?,
            outdoor: self.temperature(fields::TEMPERATURE_OUTDOOR).await?,
            exhaust: self.temperature(fields::TEMPERATURE_EXHAUST).await?,
            supply: self.temperature(fields::TEMPERATURE_SUPPLY).await?,
        })
    }

    async fn temperature(&self, name: &str) -> Result<Temperature> {
        Ok(Temperature::from_celsius(self.node.get_f64(name).await?))
    }

    pub async fn filter(&self) -> Result<FilterState> {
        Ok(FilterState {
            remaining_days: self.get_u16(fields::FILTER_REMAINING_DAYS).await?,
            duration_days: self.get_u16(fields::FILTER_DURATION).await?,
            remaining_percent: self.get_u16(fields::FILTER_REMAINING_PERCENT).await?,
            dirty: self.get_u16(fields::FILTER_DIRTY).await? != 0,
        })
    }

    /// Acknowledge a filter change and restart the filter timer
    pub async fn reset_filter(&self) -> Result<()> {
        info!("{}: resetting filter timer", self.node);
        self.node.set(fields::FILTER_RESET, 1u16).await
    }

    /// Labels of the feature bits the unit advertises
    pub async fn capabilities(&self) -> Result<Vec<String>> {
        let field = self.node.profile().require_field(fields::CAPABILITIES)?;
        let bits = self.get_u16(fields::CAPABILITIES).await?;
        Ok(field
            .kind
            .flag_labels(bits)
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// CO2 concentration in ppm
    pub async fn co2(&self) -> Result<u16> {
        self.get_u16(fields::CO2_LEVEL).await
    }

    /// Indoor relative humidity in percent
    pub async fn humidity(&self) -> Result<u16> {
        self.get_u16(fields::HUMIDITY_INDOOR).await
    }

    /// Current supply fan speed in percent
    pub async fn supply_fan_speed(&self) -> Result<u16> {
        self.get_u16(fields::FAN_SPEED_SUPPLY).await
    }

    /// Current exhaust fan speed in percent
    pub async fn exhaust_fan_speed(&self) -> Result<u16> {
        self.get_u16(fields::FAN_SPEED_EXHAUST).await
    }

    pub async fn preheater(&self) -> Result<Heater> {
        Ok(Heater::from_raw(self.get_u16(fields::PREHEATER).await?))
    }

    pub async fn post_heater(&self) -> Result<Heater> {
        Ok(Heater::from_raw(self.get_u16(fields::POST_HEATER).await?))
    }

    /// Whether the unit is defrosting its heat exchanger
    pub async fn defrost(&self) -> Result<bool> {
        Ok(self.get_u16(fields::DEFROST).await? != 0)
    }

    pub async fn preheater_setpoint(&self) -> Result<f64> {
        self.node.get_f64(fields::PREHEATER_SETPOINT).await
    }

    pub async fn set_preheater_setpoint(&self, celsius: f64) -> Result<()> {
        self.set_setpoint(fields::PREHEATER_SETPOINT, celsius).await
    }

    pub async fn free_ventilation_heating_setpoint(&self) -> Result<f64> {
        self.node
            .get_f64(fields::FREE_VENTILATION_HEATING_SETPOINT)
            .await
    }

    pub async fn set_free_ventilation_heating_setpoint(&self, celsius: f64) -> Result<()> {
        self.set_setpoint(fields::FREE_VENTILATION_HEATING_SETPOINT, celsius)
            .await
    }

    /// Offset in kelvin below the heating setpoint at which free cooling starts
    pub async fn free_ventilation_cooling_offset(&self) -> Result<f64> {
        self.node
            .get_f64(fields::FREE_VENTILATION_COOLING_OFFSET)
            .await
    }

    pub async fn set_free_ventilation_cooling_offset(&self, kelvin: f64) -> Result<()> {
        self.set_setpoint(fields::FREE_VENTILATION_COOLING_OFFSET, kelvin)
            .await
    }

    pub async fn frost_protection_setpoint(&self) -> Result<f64> {
        self.node.get_f64(fields::FROST_PROTECTION_SETPOINT).await
    }

    pub async fn set_frost_protection_setpoint(&self, celsius: f64) -> Result<()> {
        self.set_setpoint(fields::FROST_PROTECTION_SETPOINT, celsius)
            .await
    }

    async fn set_setpoint(&self, name: &str, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(AirlinkError::invalid_value(name, format!("{value} is not a number")));
        }
        info!("{}: {} = {}", self.node, name, value);
        self.node.set(name, value).await
    }

    pub async fn fan_rpm(&self) -> Result<PresetFanSpeeds> {
        Ok(PresetFanSpeeds {
            supply: self.get_u16(fields::FAN_RPM_SUPPLY).await?,
            exhaust: self.get_u16(fields::FAN_RPM_EXHAUST).await?,
        })
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::profile::builtin::product;
    use crate::profile::ProfileRegistry;
    use crate::session::ModbusSession;
    use crate::transport::{BridgeSimulator, SimulatedDevice};
    use std::time::Duration;

    fn float_words(v: f32) -> [u16; 2] {
        let bits = v.to_bits();
        [(bits >> 16) as u16, bits as u16]
    }

    fn unit_with(device: SimulatedDevice) -> (VentilationUnit, BridgeSimulator) {
        let sim = BridgeSimulator::new(207).with_device(2, device);
        let profile = ProfileRegistry::with_builtin()
            .lookup(product::VMD_02RPS78)
            .unwrap();
        let session = ModbusSession::new(sim.clone(), SessionConfig::default());
        let node = Node::new(2, profile, Arc::new(session), Duration::from_secs(5));
        (VentilationUnit::new(Arc::new(node)).unwrap(), sim)
    }

    #[test]
    fn test_temperature_sentinels() {
        assert_eq!(Temperature::from_celsius(f64::NAN).status, SensorStatus::Unavailable);
        assert_eq!(Temperature::from_celsius(-300.0).status, SensorStatus::Error);
        assert_eq!(Temperature::from_celsius(21.5).value, Some(21.5));
    }

    #[test]
    fn test_requires_ventilation_capability() {
        let profile = ProfileRegistry::with_builtin()
            .lookup(product::VMN_05LM02)
            .unwrap();
        let session = ModbusSession::new(BridgeSimulator::new(207), SessionConfig::default());
        let node = Node::new(3, profile, Arc::new(session), Duration::from_secs(5));
        assert!(matches!(
            VentilationUnit::new(Arc::new(node)),
            Err(AirlinkError::UnsupportedCapability(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_and_override() {
        let device = SimulatedDevice::new(product::VMD_02RPS78, 0x1000)
            .with_register(41000, 12)
            .with_register(41500, 3);
        let (unit, sim) = unit_with(device);

        assert_eq!(unit.ventilation_speed().await.unwrap(), VentilationSpeed::OverrideMid);
        assert_eq!(unit.requested_speed().await.unwrap(), RequestedSpeed::Mid);

        unit.set_ventilation_speed(RequestedSpeed::Boost).await.unwrap();
        assert_eq!(sim.writes_to(2, 41500), vec![vec![7]]);

        unit.set_override(OverrideSpeed::High, 90).await.unwrap();
        assert_eq!(sim.writes_to(2, 41503), vec![vec![90]]);

        assert!(unit.set_override(OverrideSpeed::Low, 1081).await.is_err());
        assert!(unit
            .set_ventilation_speed(RequestedSpeed::Unknown(6))
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_presets_respect_limits() {
        let device = SimulatedDevice::new(product::VMD_02RPS78, 0x1000)
            .with_words(42001, &[30, 35, 50, 55, 70, 75, 90, 95]);
        let (unit, sim) = unit_with(device);

        assert_eq!(
            unit.preset(Preset::Low).await.unwrap(),
            PresetFanSpeeds {
                supply: 50,
                exhaust: 55
            }
        );

        let too_fast = PresetFanSpeeds {
            supply: 41,
            exhaust: 20,
        };
        assert!(unit.set_preset(Preset::Away, too_fast).await.is_err());
        assert!(sim.writes_to(2, 42001).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_preset_is_one_write() {
        let device = SimulatedDevice::new(product::VMD_02RPS78, 0x1000)
            .with_words(42001, &[30, 35, 50, 55, 70, 75, 90, 95]);
        let (unit, sim) = unit_with(device);
        let before = sim.request_count();

        let speeds = PresetFanSpeeds {
            supply: 60,
            exhaust: 65,
        };
        unit.set_preset(Preset::Mid, speeds).await.unwrap();

        assert_eq!(sim.request_count(), before + 1);
        assert_eq!(sim.writes_to(2, 42005), vec![vec![60, 65]]);
        assert_eq!(unit.preset(Preset::Mid).await.unwrap(), speeds);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_speeds_and_heaters() {
        let device = SimulatedDevice::new(product::VMD_02RPS78, 0x1000)
            .with_words(41001, &[45, 50])
            .with_register(41013, 30)
            .with_register(41015, 1)
            .with_register(41026, Heater::NOT_FITTED);
        let (unit, _sim) = unit_with(device);

        assert_eq!(unit.supply_fan_speed().await.unwrap(), 50);
        assert_eq!(unit.exhaust_fan_speed().await.unwrap(), 45);

        assert_eq!(
            unit.preheater().await.unwrap(),
            Heater {
                level: Some(30),
                status: SensorStatus::Ok
            }
        );
        let post = unit.post_heater().await.unwrap();
        assert_eq!(post.level, None);
        assert_eq!(post.status, SensorStatus::Unavailable);
        assert!(unit.defrost().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_setpoints_read_and_write() {
        let mut words = Vec::new();
        for t in [-5.0f32, 12.5, 21.0, 2.0] {
            words.extend_from_slice(&float_words(t));
        }
        let device = SimulatedDevice::new(product::VMD_02RPS78, 0x1000).with_words(42009, &words);
        let (unit, sim) = unit_with(device);

        assert_eq!(unit.frost_protection_setpoint().await.unwrap(), -5.0);
        assert_eq!(unit.preheater_setpoint().await.unwrap(), 12.5);
        assert_eq!(unit.free_ventilation_heating_setpoint().await.unwrap(), 21.0);
        assert_eq!(unit.free_ventilation_cooling_offset().await.unwrap(), 2.0);

        unit.set_frost_protection_setpoint(-3.5).await.unwrap();
        unit.set_preheater_setpoint(10.0).await.unwrap();
        unit.set_free_ventilation_heating_setpoint(22.5).await.unwrap();
        unit.set_free_ventilation_cooling_offset(3.0).await.unwrap();

        assert_eq!(sim.writes_to(2, 42009), vec![float_words(-3.5).to_vec()]);
        assert_eq!(sim.writes_to(2, 42011), vec![float_words(10.0).to_vec()]);
        assert_eq!(sim.writes_to(2, 42013), vec![float_words(22.5).to_vec()]);
        assert_eq!(sim.writes_to(2, 42015), vec![float_words(3.0).to_vec()]);

        // Written values are read back, not served from the old cache entry
        assert_eq!(unit.preheater_setpoint().await.unwrap(), 10.0);

        let before = sim.request_count();
        assert!(unit.set_preheater_setpoint(f64::NAN).await.is_err());
        assert_eq!(sim.request_count(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_temperatures_and_bypass() {
        let mut words = Vec::new();
        for t in [21.5f32, f32::NAN, -400.0, 18.0] {
            words.extend_from_slice(&float_words(t));
        }
        let device = SimulatedDevice::new(product::VMD_02RPS78, 0x1000)
            .with_words(41005, &words)
            .with_register(41050, 255)
            .with_register(41550, 255);
        let (unit, sim) = unit_with(device);

        let temps = unit.temperatures().await.unwrap();
        assert_eq!(temps.indoor.value, Some(21.5));
        assert_eq!(temps.outdoor.status, SensorStatus::Unavailable);
        assert_eq!(temps.exhaust.status, SensorStatus::Error);
        assert_eq!(temps.supply.value, Some(18.0));

        assert_eq!(unit.bypass_mode().await.unwrap(), BypassMode::Auto);
        unit.set_bypass_mode(BypassMode::Open).await.unwrap();
        assert_eq!(sim.writes_to(2, 41550), vec![vec![100]]);
        assert!(unit.set_bypass_mode(BypassMode::Unknown(50)).await.is_err());
    }
}
