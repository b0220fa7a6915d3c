//! Confirm class (85).
use amqp_wire::types::Boolean;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Select {
    pub no_wait: Boolean,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct SelectOk;
