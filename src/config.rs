//! Session configuration.
//!
//! The behavioral constants here (thresholds, delays, windows) are
//! empirical: the engine fixes their role, the host picks values that feel
//! right for its UI and can deserialize overrides from its settings layer.

use std::time::Duration;

use serde::Deserialize;

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct SessionConfig {
    /// Extra rows materialized beyond each viewport edge.
    pub overscan_rows: usize,
    /// Seed height for unmeasured rows, pixels.
    pub seed_row_px: u32,
    /// Viewport-to-bottom distance under which appends keep the view glued
    /// to the tail.
    pub stick_to_bottom_px: u64,
    /// How long a non-Connected state must persist before the "connecting"
    /// indicator is shown. Momentary blips under this never surface.
    pub indicator_show_delay: Duration,
    /// How long a remote "typing" entry lives without a refresh.
    pub typing_window: Duration,
    /// Minimum gap between our own typing broadcasts while the user keeps
    /// typing.
    pub typing_rebroadcast: Duration,
    /// Rows from the loaded end at which pagination fires.
    pub pagination_threshold: usize,
    /// Quiet period after a page fetch completes before the trigger may
    /// fire again.
    pub pagination_settle: Duration,
    /// Messages per pagination request.
    pub page_size: u32,
    /// First reconnect delay; doubles per attempt up to the cap.
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            overscan_rows: 3,
            seed_row_px: 48,
            stick_to_bottom_px: 72,
            indicator_show_delay: Duration::from_millis(500),
            typing_window: Duration::from_secs(5),
            typing_rebroadcast: Duration::from_secs(3),
            pagination_threshold: 5,
            pagination_settle: Duration::from_millis(400),
            page_size: 50,
            reconnect_base: Duration::from_secs(1),
            reconnect_cap: Duration::from_secs(30),
        }
    }
}
