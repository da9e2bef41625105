//! Backend error records
//!
//! The network-error recovery handler consumes these records; backends build
//! them from raw failure messages so the handler can match on the message text.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A container failure as reported by a backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSpec {
    /// Network the container was attached to
    pub network: String,
    /// Container id
    pub container_id: String,
    /// Container name
    pub container_name: String,
    /// Node the container last ran on
    pub prev_node: String,
    /// IP the container last held
    pub prev_ip: String,
    /// Raw backend message
    pub message: String,
}

impl fmt::Display for ErrorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error[Network={}, ID={}, Name={}, PrevIP={}, Message={}]",
            self.network, self.container_id, self.container_name, self.prev_ip, self.message
        )
    }
}
