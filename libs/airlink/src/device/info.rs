//! Identity and link status every node reports

use chrono::NaiveDate;
use serde::Serialize;

use super::RegisterEnum;
use crate::error::{AirlinkError, Result};
use crate::node::Node;
use crate::profile::builtin::common::fields;

register_enum! {
    /// How the node came to be in the bridge's node list
    BoundStatus {
        NoChange = 0,
        Rebound = 1,
        NewBound = 2,
    }
}

register_enum! {
    ErrorStatus {
        NoError = 0,
        Error = 1,
    }
}

/// Identity of one node, read in a single pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSummary {
    pub address: u8,
    pub profile: String,
    pub product_id: u32,
    pub rf_address: u32,
    pub software_version: u16,
    pub product_name: String,
}

fn narrow<T: TryFrom<i64>>(name: &str, value: i64) -> Result<T> {
    T::try_from(value)
        .map_err(|_| AirlinkError::decode(format!("{name} value {value} out of range")))
}

impl Node {
    async fn get_as<T: TryFrom<i64>>(&self, name: &str) -> Result<T> {
        narrow(name, self.get_i64(name).await?)
    }

    async fn get_date(&self, name: &str) -> Result<Option<NaiveDate>> {
        let value = self.get(name).await?;
        value.as_date().ok_or_else(|| AirlinkError::TypeMismatch {
            field: name.to_string(),
            expected: "date",
            actual: value.kind_name(),
        })
    }

    pub async fn rf_address(&self) -> Result<u32> {
        self.get_as(fields::RF_ADDRESS).await
    }

    pub async fn product_id(&self) -> Result<u32> {
        self.get_as(fields::PRODUCT_ID).await
    }

    pub async fn software_version(&self) -> Result<u16> {
        self.get_as(fields::SOFTWARE_VERSION).await
    }

    /// OEM number the node was produced for
    pub async fn oem_number(&self) -> Result<u16> {
        self.get_as(fields::OEM_NUMBER).await
    }

    pub async fn product_name(&self) -> Result<String> {
        self.get_text(fields::PRODUCT_NAME).await
    }

    pub async fn manufacture_date(&self) -> Result<Option<NaiveDate>> {
        self.get_date(fields::MANUFACTURE_DATE).await
    }

    pub async fn software_build_date(&self) -> Result<Option<NaiveDate>> {
        self.get_date(fields::SOFTWARE_BUILD_DATE).await
    }

    pub async fn rf_comm_status(&self) -> Result<ErrorStatus> {
        let raw = self.get_enum(fields::RF_COMM_STATUS).await?.raw;
        Ok(ErrorStatus::from_raw(raw))
    }

    pub async fn battery_status(&self) -> Result<u16> {
        self.get_as(fields::BATTERY_STATUS).await
    }

    pub async fn fault_status(&self) -> Result<u16> {
        self.get_as(fields::FAULT_STATUS).await
    }

    /// Minutes since the bridge last heard from the device
    pub async fn last_seen(&self) -> Result<u16> {
        self.get_as(fields::RF_LAST_SEEN).await
    }

    pub async fn value_error_status(&self) -> Result<ErrorStatus> {
        let raw = self.get_enum(fields::VALUE_ERROR_STATUS).await?.raw;
        Ok(ErrorStatus::from_raw(raw))
    }

    /// Signal strength of the last RF message, in dBm
    pub async fn rssi(&self) -> Result<i16> {
        self.get_as(fields::RF_LAST_RSSI).await
    }

    pub async fn bound_status(&self) -> Result<BoundStatus> {
        let raw = self.get_enum(fields::BOUND_STATUS).await?.raw;
        Ok(BoundStatus::from_raw(raw))
    }

    /// Identity registers, refreshed together
    pub async fn summary(&self) -> Result<NodeSummary> {
        self.refresh(Some(&[
            fields::RF_ADDRESS,
            fields::PRODUCT_ID,
            fields::SOFTWARE_VERSION,
            fields::PRODUCT_NAME,
        ][..]))
        .await?;

        Ok(NodeSummary {
            address: self.address(),
            profile: self.profile().name.clone(),
            product_id: self.product_id().await?,
            rf_address: self.rf_address().await?,
            software_version: self.software_version().await?,
            product_name: self.product_name().await?,
        })
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::profile::builtin::{common::reg, product};
    use crate::profile::ProfileRegistry;
    use crate::session::ModbusSession;
    use crate::transport::{BridgeSimulator, SimulatedDevice};
    use std::sync::Arc;
    use std::time::Duration;

    fn remote_node(sim: BridgeSimulator) -> Node {
        let profile = ProfileRegistry::with_builtin()
            .lookup(product::VMN_05LM02)
            .unwrap();
        let session = ModbusSession::new(sim, SessionConfig::default());
        Node::new(3, profile, Arc::new(session), Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn test_common_accessors() {
        let device = SimulatedDevice::new(product::VMN_05LM02, 0x0012_3456)
            .with_oem(0x42)
            .with_register(reg::SOFTWARE_VERSION, 0x0203)
            // 15 March 2024
            .with_words(reg::MANUFACTURE_DATE, &[(15 << 8) | 3, 2024])
            .with_words(reg::SOFTWARE_BUILD_DATE, &[0xFFFF, 0xFFFF])
            .with_words(reg::PRODUCT_NAME, &[0x564D, 0x4E00])
            .with_register(reg::RF_LAST_RSSI, (-67i16) as u16)
            .with_register(reg::BOUND_STATUS, 2)
            .with_register(reg::RF_COMM_STATUS, 9);
        let node = remote_node(BridgeSimulator::new(207).with_device(3, device));

        assert_eq!(node.rf_address().await.unwrap(), 0x0012_3456);
        assert_eq!(node.product_id().await.unwrap(), product::VMN_05LM02);
        assert_eq!(node.oem_number().await.unwrap(), 0x42);
        assert_eq!(node.software_version().await.unwrap(), 0x0203);
        assert_eq!(
            node.manufacture_date().await.unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
        assert_eq!(node.software_build_date().await.unwrap(), None);
        assert_eq!(node.product_name().await.unwrap(), "VMN");
        assert_eq!(node.rssi().await.unwrap(), -67);
        assert_eq!(node.bound_status().await.unwrap(), BoundStatus::NewBound);
        assert_eq!(node.rf_comm_status().await.unwrap(), ErrorStatus::Unknown(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary() {
        let device = SimulatedDevice::new(product::VMN_05LM02, 0x77)
            .with_register(reg::SOFTWARE_VERSION, 5)
            .with_words(reg::PRODUCT_NAME, &[0u16; 10]);
        let node = remote_node(BridgeSimulator::new(207).with_device(3, device));

        let summary = node.summary().await.unwrap();
        assert_eq!(summary.rf_address, 0x77);
        assert_eq!(summary.profile, "VMN-05LM02");
        assert_eq!(summary.product_name, "");
    }
}
