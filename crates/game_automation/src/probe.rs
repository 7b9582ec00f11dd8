//! Detection of the installed-app state from a UI dump

use serde::{Deserialize, Serialize};

/// What a single UI dump says about the store page controls.
///
/// Transient: derived from one dump and discarded after the decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiProbeResult {
    pub play_present: bool,
    pub uninstall_present: bool,
}

impl UiProbeResult {
    /// A play or uninstall control only exists once the app is installed.
    pub fn is_installed(&self) -> bool {
        self.play_present || self.uninstall_present
    }
}

/// Capability for reading the installed state out of a UI dump
pub trait UiProbe: Send + Sync {
    fn probe(&self, dump: &str) -> UiProbeResult;
}

/// Exact attribute-value matching on the raw dump text.
///
/// Matches `text="play"`, `content-desc="play"`, `text="uninstall"` and
/// `content-desc="uninstall"`, ignoring case. A node whose text merely
/// contains the word (`text="Play Protect"`) does not count.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttributeProbe;

const PLAY_ATTRIBUTES: [&str; 2] = ["text=\"play\"", "content-desc=\"play\""];
const UNINSTALL_ATTRIBUTES: [&str; 2] = ["text=\"uninstall\"", "content-desc=\"uninstall\""];

impl UiProbe for AttributeProbe {
    fn probe(&self, dump: &str) -> UiProbeResult {
        let content = dump.to_lowercase();
        UiProbeResult {
            play_present: PLAY_ATTRIBUTES.iter().any(|attr| content.contains(attr)),
            uninstall_present: UNINSTALL_ATTRIBUTES.iter().any(|attr| content.contains(attr)),
        }
    }
}

/// Loose word mentions, for debug logging only; never used for decisions.
pub fn loose_mentions(dump: &str) -> (bool, bool) {
    let content = dump.to_lowercase();
    (content.contains("play"), content.contains("uninstall"))
}
