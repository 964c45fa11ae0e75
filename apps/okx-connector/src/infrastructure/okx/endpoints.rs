//! OKX Endpoints

use crate::domain::topic::SessionClass;

/// Production streaming host.
pub const WS_LIVE_BASE: &str = "wss://ws.okx.com:8443/ws/v5";

/// Simulated-trading streaming host.
pub const WS_DEMO_BASE: &str = "wss://wspap.okx.com:8443/ws/v5";

/// Broker id required by the simulated-trading streaming host.
pub const DEMO_BROKER_ID: &str = "9999";

/// Production REST host.
pub const REST_BASE: &str = "https://www.okx.com";

/// Streaming endpoint for a session class.
#[must_use]
pub fn ws_url(class: SessionClass, simulated: bool) -> String {
    if simulated {
        format!(
            "{WS_DEMO_BASE}/{}?brokerId={DEMO_BROKER_ID}",
            class.path_segment()
        )
    } else {
        format!("{WS_LIVE_BASE}/{}", class.path_segment())
    }
}
