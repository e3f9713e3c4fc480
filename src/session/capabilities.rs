//! Capability parsing and validation
//!
//! New-session requests carry a `desiredCapabilities` object whose
//! browser-specific knobs live under `xwalkOptions`. Validation is strict:
//! an unrecognized option key rejects the session with the key named
//! verbatim, so typos surface immediately instead of being ignored.

use std::collections::HashMap;
use std::path::Path;

use base64::Engine as _;
use serde_json::Value;

use crate::logging::LogLevel;
use crate::webview::traits::{DeviceMetrics, LaunchOptions};
use crate::{Error, Result};

/// Known device presets for `mobileEmulation.deviceName`:
/// (width, height, pixel ratio, user agent)
static DEVICE_PRESETS: phf::Map<&'static str, (u64, u64, f64, &'static str)> = phf::phf_map! {
    "Google Nexus 5" => (360, 640, 3.0,
        "Mozilla/5.0 (Linux; Android 4.4.4; en-us; Nexus 5 Build/JOP40D) \
         AppleWebKit/537.36 (KHTML, like Gecko) Xwalk/42.0.2307.2 Mobile Safari/537.36"),
    "Google Nexus 7" => (600, 960, 2.0,
        "Mozilla/5.0 (Linux; Android 4.4.4; en-us; Nexus 7 Build/JSS15Q) \
         AppleWebKit/537.36 (KHTML, like Gecko) Xwalk/42.0.2307.2 Safari/537.36"),
    "Apple iPhone 5" => (320, 568, 2.0,
        "Mozilla/5.0 (iPhone; CPU iPhone OS 7_0 like Mac OS X) \
         AppleWebKit/537.51.1 (KHTML, like Gecko) Version/7.0 Mobile/11A465 Safari/9537.53"),
};

/// Validated session capabilities
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub launch: LaunchOptions,
    /// Browser download target, merged into the profile's Preferences file
    pub download_directory: Option<String>,
    /// Driver verbose log file; session lifecycle lines are appended to it
    pub log_path: Option<String>,
    pub browser_level: LogLevel,
    pub performance_level: LogLevel,
    /// `perfLoggingPrefs.traceCategories`, comma-separated in the request
    pub trace_categories: Vec<String>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            launch: LaunchOptions::default(),
            download_directory: None,
            log_path: None,
            browser_level: LogLevel::All,
            performance_level: LogLevel::Off,
            trace_categories: Vec::new(),
        }
    }
}

impl Capabilities {
    /// Parse and validate a `desiredCapabilities` object
    pub fn parse(desired: &Value) -> Result<Self> {
        let mut caps = Capabilities::default();

        if let Some(prefs) = desired.get("loggingPrefs").and_then(Value::as_object) {
            let levels = parse_logging_prefs(prefs)?;
            if let Some(level) = levels.get("browser") {
                caps.browser_level = *level;
            }
            if let Some(level) = levels.get("performance") {
                caps.performance_level = *level;
            }
        }

        let Some(options) = desired.get("xwalkOptions") else {
            return Ok(caps);
        };
        let options = options
            .as_object()
            .ok_or_else(|| Error::session_not_created("xwalkOptions must be a dictionary"))?;

        for (key, value) in options {
            match key.as_str() {
                "binary" => {
                    caps.launch.binary = Some(require_string(key, value)?);
                }
                "args" => {
                    caps.launch.args = require_string_array(key, value)?;
                }
                "extensions" => {
                    for encoded in require_string_array(key, value)? {
                        let decoded = base64::engine::general_purpose::STANDARD
                            .decode(encoded.as_bytes())
                            .map_err(|_| {
                                Error::session_not_created("cannot parse extension: not valid base64")
                            })?;
                        caps.launch.extensions.push(decoded);
                    }
                }
                "downloadDirectory" => {
                    caps.download_directory = Some(require_string(key, value)?);
                }
                "logPath" => {
                    caps.log_path = Some(require_string(key, value)?);
                }
                "debuggerAddress" => {
                    caps.launch.debugger_address = Some(require_string(key, value)?);
                }
                "androidPackage" => {
                    caps.launch.android_package = Some(require_string(key, value)?);
                }
                "androidActivity" => {
                    caps.launch.android_activity = Some(require_string(key, value)?);
                }
                "androidProcess" => {
                    caps.launch.android_process = Some(require_string(key, value)?);
                }
                "mobileEmulation" => {
                    caps.launch.device_metrics = Some(parse_mobile_emulation(value)?);
                }
                "perfLoggingPrefs" => {
                    caps.trace_categories = parse_perf_logging_prefs(value)?;
                }
                other => {
                    return Err(Error::session_not_created(format!(
                        "unrecognized xwalk option: {}",
                        other
                    )));
                }
            }
        }

        if caps.launch.debugger_address.is_some() && caps.launch.binary.is_some() {
            return Err(Error::session_not_created(
                "debuggerAddress cannot be combined with binary",
            ));
        }

        Ok(caps)
    }

    pub fn mobile_emulation_enabled(&self) -> bool {
        self.launch.device_metrics.is_some()
    }

    pub fn has_touch_screen(&self) -> bool {
        self.mobile_emulation_enabled() || self.launch.android_package.is_some()
    }

    /// Capabilities object echoed back to the client
    pub fn to_wire(&self) -> Value {
        serde_json::json!({
            "browserName": "xwalk",
            "version": "42.0.2307.2",
            "platform": "LINUX",
            "javascriptEnabled": true,
            "handlesAlerts": true,
            "nativeEvents": true,
            "mobileEmulationEnabled": self.mobile_emulation_enabled(),
            "hasTouchScreen": self.has_touch_screen(),
        })
    }

    /// Merge `downloadDirectory` into the profile's Preferences file,
    /// preserving whatever else is already in it. Applies only when the
    /// launch args carry a `user-data-dir`.
    pub fn apply_download_directory(&self) -> Result<()> {
        let Some(download_dir) = &self.download_directory else {
            return Ok(());
        };
        let Some(user_data_dir) = self.user_data_dir() else {
            return Ok(());
        };

        let profile_dir = Path::new(&user_data_dir).join("Default");
        std::fs::create_dir_all(&profile_dir)?;
        let prefs_path = profile_dir.join("Preferences");

        let mut prefs: Value = match std::fs::read_to_string(&prefs_path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|_| Error::session_not_created("cannot parse Preferences file"))?,
            Err(_) => serde_json::json!({}),
        };

        prefs
            .as_object_mut()
            .ok_or_else(|| Error::session_not_created("Preferences file is not an object"))?
            .entry("download")
            .or_insert_with(|| serde_json::json!({}))
            .as_object_mut()
            .ok_or_else(|| Error::session_not_created("Preferences download key is not an object"))?
            .insert("default_directory".to_string(), Value::String(download_dir.clone()));

        std::fs::write(&prefs_path, serde_json::to_string_pretty(&prefs)?)?;
        Ok(())
    }

    fn user_data_dir(&self) -> Option<String> {
        self.launch.args.iter().find_map(|arg| {
            arg.trim_start_matches('-')
                .strip_prefix("user-data-dir=")
                .map(str::to_string)
        })
    }
}

fn require_string(key: &str, value: &Value) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::session_not_created(format!("'{}' must be a string", key)))
}

fn require_string_array(key: &str, value: &Value) -> Result<Vec<String>> {
    value
        .as_array()
        .and_then(|items| {
            items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
        })
        .ok_or_else(|| Error::session_not_created(format!("'{}' must be a list of strings", key)))
}

fn parse_logging_prefs(prefs: &serde_json::Map<String, Value>) -> Result<HashMap<String, LogLevel>> {
    let mut levels = HashMap::new();
    for (log_type, level) in prefs {
        let level = level
            .as_str()
            .ok_or_else(|| Error::session_not_created("log level must be a string"))?
            .parse::<LogLevel>()
            .map_err(|e| Error::session_not_created(e.to_string()))?;
        levels.insert(log_type.clone(), level);
    }
    Ok(levels)
}

fn parse_mobile_emulation(value: &Value) -> Result<DeviceMetrics> {
    let emulation = value
        .as_object()
        .ok_or_else(|| Error::session_not_created("mobileEmulation must be a dictionary"))?;

    if let Some(name) = emulation.get("deviceName").and_then(Value::as_str) {
        let &(width, height, pixel_ratio, user_agent) = DEVICE_PRESETS
            .get(name)
            .ok_or_else(|| Error::session_not_created(format!("unknown device name: {}", name)))?;
        return Ok(DeviceMetrics {
            width,
            height,
            pixel_ratio,
            user_agent: Some(user_agent.to_string()),
        });
    }

    let metrics = emulation
        .get("deviceMetrics")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            Error::session_not_created("mobileEmulation requires deviceName or deviceMetrics")
        })?;
    Ok(DeviceMetrics {
        width: metrics.get("width").and_then(Value::as_u64).unwrap_or(0),
        height: metrics.get("height").and_then(Value::as_u64).unwrap_or(0),
        pixel_ratio: metrics.get("pixelRatio").and_then(Value::as_f64).unwrap_or(1.0),
        user_agent: emulation.get("userAgent").and_then(Value::as_str).map(str::to_string),
    })
}

fn parse_perf_logging_prefs(value: &Value) -> Result<Vec<String>> {
    let prefs = value
        .as_object()
        .ok_or_else(|| Error::session_not_created("perfLoggingPrefs must be a dictionary"))?;
    Ok(prefs
        .get("traceCategories")
        .and_then(Value::as_str)
        .map(|categories| {
            categories
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default())
}
