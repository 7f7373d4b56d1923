use serde::{Deserialize, Serialize};

/// One client entry inside an inbound's stringified `settings.clients[]`
/// array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelClient {
    pub id: String,
    pub email: String,
    #[serde(rename = "alterId")]
    pub alter_id: u32,
    #[serde(rename = "limitIp")]
    pub limit_ip: u32,
    #[serde(rename = "totalGB")]
    pub total_gb: u64,
    pub flow: Option<String>,
    pub enable: bool,
    #[serde(rename = "expiryTime")]
    pub expiry_time: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealitySettings {
    #[serde(rename = "publicKey")]
    pub public_key: Option<String>,
    #[serde(rename = "shortIds")]
    pub short_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamSettings {
    pub network: String,
    pub security: String,
    #[serde(rename = "realitySettings")]
    pub reality_settings: Option<RealitySettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InboundSettings {
    /// The panel stores this as a JSON string, not a nested object — callers
    /// parse it with `serde_json::from_str` after pulling the field out.
    pub clients: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Inbound {
    pub id: u64,
    pub port: u16,
    #[serde(rename = "streamSettings")]
    pub stream_settings: StreamSettings,
    pub settings: InboundSettings,
}

#[derive(Debug, Deserialize)]
pub struct InboundListResponse {
    pub success: Option<bool>,
    pub obj: Vec<Inbound>,
}

#[derive(Debug, Deserialize)]
pub struct GenericResponse {
    pub success: Option<bool>,
}
