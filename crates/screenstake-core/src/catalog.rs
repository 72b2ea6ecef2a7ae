//! Trackable app catalog.
//!
//! The accountant samples the usage provider for every app in the catalog,
//! not just the apps referenced by active stakes, so a newly created stake
//! starts from the correct "so far today" totals.

use serde::{Deserialize, Serialize};

/// An app the engine can track usage for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackedApp {
    /// Short machine name (e.g. "instagram").
    pub name: String,

    /// Human-readable display name.
    pub display_name: String,

    /// Platform bundle identifier, the key used in usage samples and ledgers.
    pub bundle_id: String,
}

impl TrackedApp {
    pub fn new(name: &str, display_name: &str, bundle_id: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            bundle_id: bundle_id.to_string(),
        }
    }
}

/// The built-in catalog of trackable social apps.
pub fn builtin_catalog() -> Vec<TrackedApp> {
    vec![
        TrackedApp::new("instagram", "Instagram", "com.burbn.instagram"),
        TrackedApp::new("snapchat", "Snapchat", "com.toyopagroup.picaboo"),
        TrackedApp::new("x", "X (Twitter)", "com.atebits.Tweetie2"),
        TrackedApp::new("youtube", "YouTube", "com.google.ios.youtube"),
        TrackedApp::new("tiktok", "TikTok", "com.zhiliaoapp.musically"),
    ]
}
