//! ClimaRad Ventura (VMD-07RPS13) accessors
//!
//! The Ventura has no requested-speed register. It runs in a ventilation mode
//! refined by a sub-mode, and a temporary mode pair takes precedence while a
//! manual step is active. [`VentilationV1Unit::ventilation_speed`] folds both
//! pairs into the [`VentilationSpeed`] used for the other controller.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::ventilation::{FilterState, Heater, Temperature, VentilationError, VentilationSpeed};
use super::{read_enum, read_u16, write_enum};
use crate::codec::Value;
use crate::error::{AirlinkError, Result};
use crate::node::Node;
use crate::profile::builtin::ventilation_v1::{fields, SUB_MODE_AUTO};
use crate::profile::Capability;

register_enum! {
    VentMode {
        Off = 0,
        Pause = 1,
        On = 2,
        Manual1 = 3,
        Manual3 = 5,
        Service = 8,
    }
}

/// Background ventilation kept up regardless of the active mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BasicVentilation {
    pub enabled: bool,
    /// Percent
    pub level: u16,
}

#[derive(Debug, Clone)]
pub struct VentilationV1Unit {
    node: Arc<Node>,
}

impl VentilationV1Unit {
    pub fn new(node: Arc<Node>) -> Result<Self> {
        node.profile().require(Capability::VentilationV1)?;
        Ok(Self { node })
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub async fn vent_mode(&self) -> Result<VentMode> {
        read_enum(&self.node, fields::VENT_MODE).await
    }

    pub async fn vent_sub_mode(&self) -> Result<u16> {
        read_u16(&self.node, fields::VENT_SUB_MODE).await
    }

    pub async fn temp_vent_mode(&self) -> Result<VentMode> {
        read_enum(&self.node, fields::TEMP_VENT_MODE).await
    }

    /// Manual step while a temporary mode is active, 201 to 205
    pub async fn temp_vent_sub_mode(&self) -> Result<u16> {
        read_u16(&self.node, fields::TEMP_VENT_SUB_MODE).await
    }

    pub async fn set_vent_mode(&self, mode: VentMode) -> Result<()> {
        info!("{}: requesting ventilation mode {:?}", self.node, mode);
        write_enum(&self.node, fields::REQUESTED_VENT_MODE, mode).await
    }

    pub async fn set_vent_sub_mode(&self, sub_mode: u16) -> Result<()> {
        self.node
            .set(fields::REQUESTED_VENT_SUB_MODE, sub_mode)
            .await
    }

    pub async fn set_temp_vent_mode(&self, mode: VentMode) -> Result<()> {
        info!("{}: requesting temporary mode {:?}", self.node, mode);
        write_enum(&self.node, fields::REQUESTED_TEMP_VENT_MODE, mode).await
    }

    pub async fn set_temp_vent_sub_mode(&self, sub_mode: u16) -> Result<()> {
        self.node
            .set(fields::REQUESTED_TEMP_VENT_SUB_MODE, sub_mode)
            .await
    }

    /// Speed derived from the mode registers
    ///
    /// `On` maps to `Auto`, `Pause` to `Away`. With the mode `Off` the manual
    /// step decides: up to 202 is low, 203 mid, 204 and 205 high. Anything
    /// else reads as `Off`.
    pub async fn ventilation_speed(&self) -> Result<VentilationSpeed> {
        let speed = match self.vent_mode().await? {
            VentMode::On => VentilationSpeed::Auto,
            VentMode::Pause => VentilationSpeed::Away,
            VentMode::Off => match self.temp_vent_sub_mode().await? {
                0..=202 => VentilationSpeed::OverrideLow,
                203 => VentilationSpeed::OverrideMid,
                204..=205 => VentilationSpeed::OverrideHigh,
                _ => VentilationSpeed::Off,
            },
            _ => VentilationSpeed::Off,
        };
        Ok(speed)
    }

    /// Hand control back to the unit's own schedule
    pub async fn set_auto(&self) -> Result<()> {
        self.set_vent_mode(VentMode::On).await?;
        self.set_vent_sub_mode(SUB_MODE_AUTO).await
    }

    pub async fn basic_ventilation(&self) -> Result<BasicVentilation> {
        Ok(BasicVentilation {
            enabled: read_u16(&self.node, fields::BASIC_VENT_ENABLE).await? != 0,
            level: read_u16(&self.node, fields::BASIC_VENT_LEVEL).await?,
        })
    }

    /// Enable flag and level are adjacent and written in one request
    pub async fn set_basic_ventilation(&self, basic: BasicVentilation) -> Result<()> {
        info!("{}: basic ventilation {:?}", self.node, basic);
        self.node
            .set_many(&[
                (fields::BASIC_VENT_ENABLE, Value::Int(i64::from(basic.enabled))),
                (fields::BASIC_VENT_LEVEL, Value::Int(i64::from(basic.level))),
            ])
            .await
    }

    /// CO2 level in ppm above which the unit ramps up
    pub async fn co2_setpoint(&self) -> Result<u16> {
        read_u16(&self.node, fields::CO2_CONTROL_SETPOINT).await
    }

    pub async fn set_co2_setpoint(&self, ppm: u16) -> Result<()> {
        if ppm == 0 {
            return Err(AirlinkError::invalid_value(
                fields::CO2_CONTROL_SETPOINT,
                "setpoint must be above 0 ppm",
            ));
        }
        self.node.set(fields::CO2_CONTROL_SETPOINT, ppm).await
    }

    pub async fn co2(&self) -> Result<u16> {
        read_u16(&self.node, fields::CO2_LEVEL).await
    }

    pub async fn inlet_flow(&self) -> Result<f64> {
        self.node.get_f64(fields::FLOW_INLET).await
    }

    pub async fn outlet_flow(&self) -> Result<f64> {
        self.node.get_f64(fields::FLOW_OUTLET).await
    }

    /// The Ventura has no capability register and advertises no optional
    /// features, so this answers without touching the bus.
    pub fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    pub async fn supply_fan_speed(&self) -> Result<u16> {
        read_u16(&self.node, fields::FAN_SPEED_SUPPLY).await
    }

    pub async fn exhaust_fan_speed(&self) -> Result<u16> {
        read_u16(&self.node, fields::FAN_SPEED_EXHAUST).await
    }

    /// Room air before the heat exchanger
    pub async fn indoor_temperature(&self) -> Result<Temperature> {
        self.temperature(fields::TEMPERATURE_EXHAUST).await
    }

    pub async fn inlet_temperature(&self) -> Result<Temperature> {
        self.temperature(fields::TEMPERATURE_INLET).await
    }

    pub async fn outlet_temperature(&self) -> Result<Temperature> {
        self.temperature(fields::TEMPERATURE_OUTLET).await
    }

    async fn temperature(&self, name: &str) -> Result<Temperature> {
        Ok(Temperature::from_celsius(self.node.get_f64(name).await?))
    }

    pub async fn post_heater(&self) -> Result<Heater> {
        Ok(Heater::from_raw(
            read_u16(&self.node, fields::POST_HEATER_DEMAND).await?,
        ))
    }

    pub async fn error_code(&self) -> Result<VentilationError> {
        read_enum(&self.node, fields::ERROR_CODE).await
    }

    pub async fn bypass_position(&self) -> Result<u16> {
        read_u16(&self.node, fields::BYPASS_POSITION).await
    }

    pub async fn filter(&self) -> Result<FilterState> {
        Ok(FilterState {
            remaining_days: read_u16(&self.node, fields::FILTER_REMAINING_DAYS).await?,
            duration_days: read_u16(&self.node, fields::FILTER_DURATION).await?,
            remaining_percent: read_u16(&self.node, fields::FILTER_REMAINING_PERCENT).await?,
            dirty: read_u16(&self.node, fields::FILTER_DIRTY).await? != 0,
        })
    }

    pub async fn reset_filter(&self) -> Result<()> {
        info!("{}: resetting filter timer", self.node);
        self.node.set(fields::FILTER_RESET, 0u16).await
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::device::RegisterEnum;
    use crate::profile::builtin::product;
    use crate::profile::builtin::ventilation_v1::reg;
    use crate::profile::ProfileRegistry;
    use crate::session::ModbusSession;
    use crate::transport::{BridgeSimulator, SimulatedDevice};
    use std::time::Duration;

    fn float_words(v: f32) -> [u16; 2] {
        let bits = v.to_bits();
        [(bits >> 16) as u16, bits as u16]
    }

    fn unit_with(device: SimulatedDevice) -> (VentilationV1Unit, BridgeSimulator) {
        let sim = BridgeSimulator::new(207).with_device(3, device);
        let profile = ProfileRegistry::with_builtin()
            .lookup(product::VMD_07RPS13)
            .unwrap();
        let session = ModbusSession::new(sim.clone(), SessionConfig::default());
        // No cache, every read goes to the simulator
        let node = Node::new(3, profile, Arc::new(session), Duration::ZERO);
        (VentilationV1Unit::new(Arc::new(node)).unwrap(), sim)
    }

    fn ventura() -> SimulatedDevice {
        SimulatedDevice::new(product::VMD_07RPS13, 0x00C8_8301)
    }

    #[test]
    fn test_requires_ventilation_v1_capability() {
        let profile = ProfileRegistry::with_builtin()
            .lookup(product::VMD_02RPS78)
            .unwrap();
        let session = ModbusSession::new(BridgeSimulator::new(207), SessionConfig::default());
        let node = Node::new(2, profile, Arc::new(session), Duration::from_secs(5));
        assert!(matches!(
            VentilationV1Unit::new(Arc::new(node)),
            Err(AirlinkError::UnsupportedCapability(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_follows_mode_registers() {
        let (unit, sim) = unit_with(
            ventura()
                .with_words(reg::VENT_MODE, &[2, SUB_MODE_AUTO])
                .with_words(reg::TEMP_VENT_MODE, &[0, 0]),
        );
        assert_eq!(unit.vent_mode().await.unwrap(), VentMode::On);
        assert_eq!(unit.vent_sub_mode().await.unwrap(), SUB_MODE_AUTO);
        assert_eq!(unit.ventilation_speed().await.unwrap(), VentilationSpeed::Auto);

        sim.set_register(3, reg::VENT_MODE, 1);
        assert_eq!(unit.ventilation_speed().await.unwrap(), VentilationSpeed::Away);

        sim.set_register(3, reg::VENT_MODE, 0);
        sim.set_register(3, reg::TEMP_VENT_MODE, 3);
        for (step, speed) in [
            (201, VentilationSpeed::OverrideLow),
            (202, VentilationSpeed::OverrideLow),
            (203, VentilationSpeed::OverrideMid),
            (205, VentilationSpeed::OverrideHigh),
            (206, VentilationSpeed::Off),
        ] {
            sim.set_register(3, reg::TEMP_VENT_SUB_MODE, step);
            assert_eq!(unit.ventilation_speed().await.unwrap(), speed, "step {step}");
        }
        assert_eq!(unit.temp_vent_mode().await.unwrap(), VentMode::Manual1);

        sim.set_register(3, reg::VENT_MODE, 8);
        assert_eq!(unit.ventilation_speed().await.unwrap(), VentilationSpeed::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mode_requests() {
        let (unit, sim) = unit_with(ventura());

        unit.set_auto().await.unwrap();
        assert_eq!(sim.writes_to(3, reg::REQUESTED_VENT_MODE), vec![vec![2]]);
        assert_eq!(
            sim.writes_to(3, reg::REQUESTED_VENT_SUB_MODE),
            vec![vec![SUB_MODE_AUTO]]
        );

        unit.set_temp_vent_mode(VentMode::Manual1).await.unwrap();
        unit.set_temp_vent_sub_mode(203).await.unwrap();
        assert_eq!(sim.writes_to(3, reg::REQUESTED_TEMP_VENT_MODE), vec![vec![3]]);
        assert_eq!(sim.writes_to(3, reg::REQUESTED_TEMP_VENT_SUB_MODE), vec![vec![203]]);

        let before = sim.request_count();
        assert!(unit.set_vent_mode(VentMode::from_raw(4)).await.is_err());
        assert!(unit.set_vent_sub_mode(256).await.is_err());
        assert_eq!(sim.request_count(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_basic_ventilation_and_co2_setpoint() {
        let (unit, sim) = unit_with(
            ventura()
                .with_words(reg::BASIC_VENT_ENABLE, &[1, 30])
                .with_register(reg::CO2_CONTROL_SETPOINT, 800),
        );

        assert_eq!(
            unit.basic_ventilation().await.unwrap(),
            BasicVentilation {
                enabled: true,
                level: 30
            }
        );

        let before = sim.request_count();
        unit.set_basic_ventilation(BasicVentilation {
            enabled: false,
            level: 20,
        })
        .await
        .unwrap();
        assert_eq!(sim.request_count(), before + 1);
        assert_eq!(sim.writes_to(3, reg::BASIC_VENT_ENABLE), vec![vec![0, 20]]);

        assert_eq!(unit.co2_setpoint().await.unwrap(), 800);
        unit.set_co2_setpoint(1000).await.unwrap();
        assert_eq!(unit.co2_setpoint().await.unwrap(), 1000);
        assert!(unit.set_co2_setpoint(0).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flows_sensors_and_capabilities() {
        let mut flows = float_words(85.5).to_vec();
        flows.extend_from_slice(&float_words(80.0));
        let (unit, sim) = unit_with(
            ventura()
                .with_words(41024, &flows)
                .with_words(41005, &float_words(21.0))
                .with_words(41003, &float_words(f32::NAN))
                .with_register(41023, Heater::NOT_FITTED)
                .with_words(41019, &[40, 45]),
        );

        assert_eq!(unit.inlet_flow().await.unwrap(), 85.5);
        assert_eq!(unit.outlet_flow().await.unwrap(), 80.0);
        assert_eq!(unit.indoor_temperature().await.unwrap().value, Some(21.0));
        assert!(unit.inlet_temperature().await.unwrap().value.is_none());
        assert!(unit.post_heater().await.unwrap().level.is_none());
        assert_eq!(unit.supply_fan_speed().await.unwrap(), 45);
        assert_eq!(unit.exhaust_fan_speed().await.unwrap(), 40);

        let before = sim.request_count();
        assert!(unit.capabilities().is_empty());
        assert_eq!(sim.request_count(), before);
    }
}
