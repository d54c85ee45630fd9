//! Four-button remote accessors

use std::sync::Arc;

use super::{RegisterEnum, RequestedSpeed};
use crate::error::Result;
use crate::node::Node;
use crate::profile::builtin::remote::fields;
use crate::profile::Capability;

#[derive(Debug, Clone)]
pub struct Remote {
    node: Arc<Node>,
}

impl Remote {
    pub fn new(node: Arc<Node>) -> Result<Self> {
        node.profile().require(Capability::RemoteControl)?;
        Ok(Self { node })
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Speed last selected on the remote's buttons
    pub async fn requested_ventilation_speed(&self) -> Result<RequestedSpeed> {
        let raw = self
            .node
            .get_enum(fields::REQUESTED_VENTILATION_SPEED)
            .await?
            .raw;
        Ok(RequestedSpeed::from_raw(raw))
    }
}
