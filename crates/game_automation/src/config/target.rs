//! Target app and store identifiers

use serde::{Deserialize, Serialize};

/// The app the workflows install and launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetApp {
    /// Package identifier, e.g. `com.garena.game.kgvn`
    pub package: String,
    /// Component launched by the screenshot pipeline (`package/activity`)
    pub launch_component: String,
    /// Store app component opened before the details page
    pub store_component: String,
    /// Prefix for saved screenshot file names
    pub screenshot_prefix: String,
}

impl Default for TargetApp {
    fn default() -> Self {
        Self {
            package: "com.garena.game.kgvn".to_string(),
            launch_component: "com.garena.game.kgvn/com.garena.game.kgtw.SGameActivity"
                .to_string(),
            store_component: "com.android.vending/.AssetBrowserActivity".to_string(),
            screenshot_prefix: "lienquan".to_string(),
        }
    }
}

impl TargetApp {
    /// Package-aware deep link to the app's store details page.
    pub fn store_deep_link(&self) -> String {
        format!("market://details?id={}", self.package)
    }
}

/// On-screen point of the install control on the store details page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapPoint {
    pub x: i32,
    pub y: i32,
}

impl Default for TapPoint {
    // Center of the install button bounds [1959,287][2274,413] on a 2400x1080 landscape screen.
    fn default() -> Self {
        Self { x: 2117, y: 350 }
    }
}
