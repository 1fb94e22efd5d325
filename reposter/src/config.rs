use crate::errors::ControlError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Device/target capabilities sent when creating a backend session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceCaps {
    pub platform_name: String,
    pub platform_version: String,
    pub device_name: String,
    pub udid: String,
    pub app_package: String,
    pub app_activity: String,
    pub new_command_timeout_secs: u64,
    pub auto_grant_permissions: bool,
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self {
            platform_name: "Android".to_string(),
            platform_version: "15".to_string(),
            device_name: "device".to_string(),
            udid: String::new(),
            app_package: "com.instagram.android".to_string(),
            app_activity: "com.instagram.mainactivity.MainActivity".to_string(),
            new_command_timeout_secs: 300,
            auto_grant_permissions: true,
        }
    }
}

impl DeviceCaps {
    /// W3C capability object for session creation. Keeps the remote target
    /// alive across reconnects (no reset) and relaunches it on connect.
    pub fn to_wire(&self) -> Value {
        json!({
            "platformName": self.platform_name,
            "appium:automationName": "UiAutomator2",
            "appium:platformVersion": self.platform_version,
            "appium:deviceName": self.device_name,
            "appium:udid": self.udid,
            "appium:appPackage": self.app_package,
            "appium:appActivity": self.app_activity,
            "appium:noReset": true,
            "appium:fullReset": false,
            "appium:autoLaunch": true,
            "appium:autoGrantPermissions": self.auto_grant_permissions,
            "appium:newCommandTimeout": self.new_command_timeout_secs,
        })
    }
}

/// Controller configuration. Everything volatile lives here: endpoint,
/// device identity, selector timing, paths. Loadable from a JSON file with
/// every field defaulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Control endpoint of the remote backend.
    pub backend_url: String,
    /// Command used to launch the backend when this instance owns it.
    /// `None` means an externally managed backend.
    pub backend_command: Option<Vec<String>>,
    /// Best-effort process pattern to kill a stale backend occupying the
    /// port before launching our own.
    pub backend_kill_pattern: Option<String>,
    pub backend_ready_timeout_secs: u64,

    pub device: DeviceCaps,

    /// Conversation partner whose content is monitored.
    pub username: String,

    /// Idle wait between workflow cycles.
    pub check_interval_secs: u64,
    pub wait_short_ms: u64,
    pub wait_medium_ms: u64,
    pub wait_long_ms: u64,

    /// Per-strategy locator attempt window (clamped to 2..=10 s).
    pub strategy_timeout_secs: u64,
    /// Back-navigation attempts before force-reactivating the target app.
    pub home_attempts: u32,
    /// Minimum element height distinguishing media entries from plain text.
    pub min_media_height: i64,
    /// Grace period for a manual login after connecting.
    pub login_grace_secs: u64,

    pub ledger_path: PathBuf,
    /// Local directory swept by the cleanup step. `None` disables sweeping.
    pub media_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:4723".to_string(),
            backend_command: None,
            backend_kill_pattern: None,
            backend_ready_timeout_secs: 60,
            device: DeviceCaps::default(),
            username: String::new(),
            check_interval_secs: 320,
            wait_short_ms: 2_000,
            wait_medium_ms: 5_000,
            wait_long_ms: 10_000,
            strategy_timeout_secs: 5,
            home_attempts: 5,
            min_media_height: 500,
            login_grace_secs: 60,
            ledger_path: PathBuf::from("processed.txt"),
            media_dir: None,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ControlError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&contents).map_err(|e| {
            ControlError::Internal(format!(
                "invalid config {}: {e}",
                path.as_ref().display()
            ))
        })
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn wait_short(&self) -> Duration {
        Duration::from_millis(self.wait_short_ms)
    }

    pub fn wait_medium(&self) -> Duration {
        Duration::from_millis(self.wait_medium_ms)
    }

    pub fn wait_long(&self) -> Duration {
        Duration::from_millis(self.wait_long_ms)
    }

    pub fn strategy_timeout(&self) -> Duration {
        Duration::from_secs(self.strategy_timeout_secs)
    }
}
