use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::{error, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;


pub const DEFAULT_UPDATE_RATE: f64 = 1.0;
pub const MINIMUM_UPDATE_RATE: f64 = 0.1;
pub const MAXIMUM_UPDATE_RATE: f64 = 10.0;
pub const DEFAULT_HISTORY_MINUTES: u32 = 30;
pub const DEFAULT_RETENTION_DAYS: u32 = 365;
pub const MAX_RETENTION_DAYS: u32 = 365;
pub const DEFAULT_TRAY_OFFSET_X: i32 = 10;

/// Slider index -> retention day count used by the settings UI.
pub const RETENTION_DAYS_MAP: [u32; 7] = [1, 7, 14, 30, 90, 180, 365];

static HEX_COLOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^#[0-9A-Fa-f]{6}$").expect("hex color pattern is valid")
});

/// Which interfaces contribute to the displayed and persisted speeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceMode {
    /// Only the interface bound to the default route.
    #[default]
    Auto,
    /// Every interface not matching an exclusion substring.
    AllPhysical,
    /// The complement of the physical set.
    AllVirtual,
    /// Exactly the user-chosen interface names.
    Selected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedDisplayMode {
    #[default]
    AlwaysMbps,
    AutoBits,
    AutoBytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextAlignment {
    Left,
    #[default]
    Center,
    Right,
}

fn d_true() -> bool {
    true
}
fn d_update_rate() -> f64 {
    DEFAULT_UPDATE_RATE
}
fn d_font_family() -> String {
    "Segoe UI".to_string()
}
fn d_font_size() -> u32 {
    9
}
fn d_font_weight() -> u32 {
    600
}
fn d_default_color() -> String {
    "#FFFFFF".to_string()
}
fn d_high_threshold() -> f64 {
    5.0
}
fn d_low_threshold() -> f64 {
    1.0
}
fn d_high_color() -> String {
    "#00FF00".to_string()
}
fn d_low_color() -> String {
    "#FFA500".to_string()
}
fn d_history_minutes() -> u32 {
    DEFAULT_HISTORY_MINUTES
}
fn d_graph_opacity() -> u8 {
    30
}
fn d_keep_data() -> u32 {
    DEFAULT_RETENTION_DAYS
}
fn d_history_period() -> String {
    "System Uptime".to_string()
}
fn d_legend_position() -> String {
    "Off".to_string()
}
fn d_min_update_rate() -> f64 {
    MINIMUM_UPDATE_RATE
}
fn d_max_update_rate() -> f64 {
    MAXIMUM_UPDATE_RATE
}
fn d_decimal_places() -> u8 {
    2
}
fn d_tray_offset_x() -> i32 {
    DEFAULT_TRAY_OFFSET_X
}
fn d_exclusions() -> Vec<String> {
    [
        "loopback", "teredo", "isatap", "bluetooth", "vpn", "virtual", "vmware", "vbox",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

/// Persisted application settings.
///
/// Every recognized key has a schema-enforced type, range and default;
/// unrecognized keys round-trip untouched through [`AppConfig::extra`] so a
/// newer build's settings survive being loaded by an older one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub start_with_windows: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub update_rate: f64,
    pub font_family: String,
    pub font_size: u32,
    pub font_weight: u32,
    pub color_coding: bool,
    pub default_color: String,
    /// Mbps above which the high-speed color applies.
    pub high_speed_threshold: f64,
    pub low_speed_threshold: f64,
    pub high_speed_color: String,
    pub low_speed_color: String,
    pub graph_enabled: bool,
    pub history_minutes: u32,
    pub graph_opacity: u8,
    pub interface_mode: InterfaceMode,
    pub selected_interfaces: Vec<String>,
    pub excluded_interfaces: Vec<String>,
    /// Hour-tier retention in days (1..=365); reductions go through the
    /// store's 48 h grace protocol before any row is deleted.
    pub keep_data: u32,
    pub dark_mode: bool,
    pub history_period: String,
    pub legend_position: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_x: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_y: Option<i32>,
    pub paused: bool,
    pub dynamic_update_enabled: bool,
    pub min_update_rate: f64,
    pub max_update_rate: f64,
    pub speed_display_mode: SpeedDisplayMode,
    pub decimal_places: u8,
    pub text_alignment: TextAlignment,
    pub free_move: bool,
    pub force_decimals: bool,
    pub tray_offset_x: i32,
    pub tray_offset_y: i32,
    pub keep_visible_fullscreen: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_window_pos: Option<(i32, i32)>,
    pub history_period_slider_value: u32,
    /// Unknown keys preserved for forward compatibility.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            start_with_windows: d_true(),
            language: None,
            update_rate: d_update_rate(),
            font_family: d_font_family(),
            font_size: d_font_size(),
            font_weight: d_font_weight(),
            color_coding: false,
            default_color: d_default_color(),
            high_speed_threshold: d_high_threshold(),
            low_speed_threshold: d_low_threshold(),
            high_speed_color: d_high_color(),
            low_speed_color: d_low_color(),
            graph_enabled: false,
            history_minutes: d_history_minutes(),
            graph_opacity: d_graph_opacity(),
            interface_mode: InterfaceMode::default(),
            selected_interfaces: Vec::new(),
            excluded_interfaces: d_exclusions(),
            keep_data: d_keep_data(),
            dark_mode: true,
            history_period: d_history_period(),
            legend_position: d_legend_position(),
            position_x: None,
            position_y: None,
            paused: false,
            dynamic_update_enabled: true,
            min_update_rate: d_min_update_rate(),
            max_update_rate: d_max_update_rate(),
            speed_display_mode: SpeedDisplayMode::default(),
            decimal_places: d_decimal_places(),
            text_alignment: TextAlignment::default(),
            free_move: false,
            force_decimals: d_true(),
            tray_offset_x: d_tray_offset_x(),
            tray_offset_y: 0,
            keep_visible_fullscreen: false,
            graph_window_pos: None,
            history_period_slider_value: 0,
            extra: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Validates all fields in place, substituting defaults for out-of-range
    /// or malformed values. Returns `true` if anything was repaired.
    pub fn validate(&mut self) -> bool {
        let mut repaired = false;

        repaired |= clamp_f64(
            &mut self.update_rate,
            MINIMUM_UPDATE_RATE,
            MAXIMUM_UPDATE_RATE,
            "update_rate",
        );
        repaired |= clamp_f64(
            &mut self.min_update_rate,
            MINIMUM_UPDATE_RATE,
            MAXIMUM_UPDATE_RATE,
            "min_update_rate",
        );
        repaired |= clamp_f64(
            &mut self.max_update_rate,
            MINIMUM_UPDATE_RATE,
            MAXIMUM_UPDATE_RATE,
            "max_update_rate",
        );
        if self.min_update_rate > self.max_update_rate {
            warn!(
                "min_update_rate {} > max_update_rate {}, clamping min to max",
                self.min_update_rate, self.max_update_rate
            );
            self.min_update_rate = self.max_update_rate;
            repaired = true;
        }

        repaired |= clamp_u32(&mut self.font_size, 5, 72, "font_size");
        repaired |= clamp_u32(&mut self.font_weight, 100, 900, "font_weight");
        repaired |= clamp_u32(&mut self.history_minutes, 5, 1440, "history_minutes");
        repaired |= clamp_u32(&mut self.keep_data, 1, MAX_RETENTION_DAYS, "keep_data");
        repaired |= clamp_u8(&mut self.graph_opacity, 0, 100, "graph_opacity");
        repaired |= clamp_u8(&mut self.decimal_places, 0, 2, "decimal_places");

        repaired |= repair_color(&mut self.default_color, d_default_color, "default_color");
        repaired |= repair_color(&mut self.high_speed_color, d_high_color, "high_speed_color");
        repaired |= repair_color(&mut self.low_speed_color, d_low_color, "low_speed_color");

        if self.low_speed_threshold > self.high_speed_threshold {
            warn!("low_speed_threshold > high_speed_threshold, setting low to high's value");
            self.low_speed_threshold = self.high_speed_threshold;
            repaired = true;
        }

        repaired
    }

    /// Maps the configured retention day count to the settings slider index.
    pub fn retention_slider_value(&self) -> usize {
        RETENTION_DAYS_MAP
            .iter()
            .position(|days| *days == self.keep_data)
            .unwrap_or(3)
    }

    pub fn retention_days_for_slider(slider_value: usize) -> u32 {
        RETENTION_DAYS_MAP
            .get(slider_value)
            .copied()
            .unwrap_or(30)
    }
}

fn clamp_f64(value: &mut f64, lo: f64, hi: f64, key: &str) -> bool {
    if value.is_finite() && (lo..=hi).contains(value) {
        return false;
    }
    let repaired = if value.is_finite() {
        value.clamp(lo, hi)
    } else {
        lo
    };
    warn!("invalid {key} '{value}', resetting to '{repaired}'");
    *value = repaired;
    true
}

fn clamp_u32(value: &mut u32, lo: u32, hi: u32, key: &str) -> bool {
    if (lo..=hi).contains(value) {
        return false;
    }
    let repaired = (*value).clamp(lo, hi);
    warn!("invalid {key} '{value}', resetting to '{repaired}'");
    *value = repaired;
    true
}

fn clamp_u8(value: &mut u8, lo: u8, hi: u8, key: &str) -> bool {
    if (lo..=hi).contains(value) {
        return false;
    }
    let repaired = (*value).clamp(lo, hi);
    warn!("invalid {key} '{value}', resetting to '{repaired}'");
    *value = repaired;
    true
}

fn repair_color(value: &mut String, default: fn() -> String, key: &str) -> bool {
    if HEX_COLOR.is_match(value) {
        return false;
    }
    let fallback = default();
    warn!("invalid color '{value}' for {key}, resetting to default '{fallback}'");
    *value = fallback;
    true
}

/// Loads the config from `path`, repairing invalid values.
///
/// A missing file yields defaults. An unparseable file is preserved as a
/// `.invalid.bak` sibling (never silently dropped) and defaults are used.
pub fn load_config(path: &Path) -> AppConfig {
    if !path.exists() {
        return AppConfig::default();
    }

    let mut config = match fs::read(path)
        .map_err(anyhow::Error::new)
        .and_then(|bytes| serde_json::from_slice::<AppConfig>(&bytes).map_err(anyhow::Error::new))
    {
        Ok(config) => config,
        Err(err) => {
            error!(
                "failed to load config {}: {err:#}; keeping a backup and using defaults",
                path.display()
            );
            let backup = path.with_extension("json.invalid.bak");
            if let Err(copy_err) = fs::copy(path, &backup) {
                error!("failed to back up invalid config: {copy_err}");
            }
            AppConfig::default()
        }
    };

    config.validate();
    config
}

/// Serializes the config to `path` atomically (temp file + rename).
pub fn save_config(path: &Path, config: &AppConfig) -> Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create temp file {}", tmp_path.display()))?;
    serde_json::to_writer_pretty(&file, config)
        .with_context(|| format!("failed to write JSON to {}", tmp_path.display()))?;
    file.sync_all().ok();
    drop(file);
    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "failed to atomically rename {} -> {}",
            tmp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}
