//! Speed text formatting and color coding for the widget readout.

use crate::config::{AppConfig, SpeedDisplayMode};
use crate::net::DisplaySpeed;

const KILO: f64 = 1_000.0;
const MEGA: f64 = 1_000_000.0;
const GIGA: f64 = 1_000_000_000.0;

/// Rates below this (in bits/s) render as zero in the auto-scaled modes to
/// keep the readout from flickering through noise.
const MIN_DISPLAY_BITS: f64 = 10_000.0;

fn format_value(value: f64, decimal_places: u8, force_decimals: bool) -> String {
    let places = usize::from(decimal_places);
    if !force_decimals && value.fract().abs() < 1e-9 {
        format!("{value:.0}")
    } else {
        format!("{value:.places$}")
    }
}

fn scaled_bits(bits_per_sec: f64) -> (f64, &'static str) {
    if bits_per_sec >= GIGA {
        (bits_per_sec / GIGA, "Gbps")
    } else if bits_per_sec >= MEGA {
        (bits_per_sec / MEGA, "Mbps")
    } else if bits_per_sec >= KILO {
        (bits_per_sec / KILO, "Kbps")
    } else {
        (bits_per_sec, "bps")
    }
}

fn scaled_bytes(bytes_per_sec: f64) -> (f64, &'static str) {
    if bytes_per_sec >= GIGA {
        (bytes_per_sec / GIGA, "GB/s")
    } else if bytes_per_sec >= MEGA {
        (bytes_per_sec / MEGA, "MB/s")
    } else if bytes_per_sec >= KILO {
        (bytes_per_sec / KILO, "KB/s")
    } else {
        (bytes_per_sec, "B/s")
    }
}

/// One direction's readout, e.g. `"12.34 Mbps"`.
pub fn format_rate(mbps: f64, config: &AppConfig) -> String {
    let bits_per_sec = mbps * MEGA;
    match config.speed_display_mode {
        SpeedDisplayMode::AlwaysMbps => {
            let value = format_value(mbps, config.decimal_places, config.force_decimals);
            format!("{value} Mbps")
        }
        SpeedDisplayMode::AutoBits => {
            let shown = if bits_per_sec < MIN_DISPLAY_BITS {
                0.0
            } else {
                bits_per_sec
            };
            let (value, unit) = scaled_bits(shown);
            format!(
                "{} {unit}",
                format_value(value, config.decimal_places, config.force_decimals)
            )
        }
        SpeedDisplayMode::AutoBytes => {
            let bytes_per_sec = if bits_per_sec < MIN_DISPLAY_BITS {
                0.0
            } else {
                bits_per_sec / 8.0
            };
            let (value, unit) = scaled_bytes(bytes_per_sec);
            format!(
                "{} {unit}",
                format_value(value, config.decimal_places, config.force_decimals)
            )
        }
    }
}

/// Both directions, upload first, as shown in the widget.
pub fn format_speeds(speed: DisplaySpeed, config: &AppConfig) -> (String, String) {
    (
        format_rate(speed.upload_mbps, config),
        format_rate(speed.download_mbps, config),
    )
}

/// Color for the current speed under the threshold scheme: high and low
/// thresholds are in Mbps and apply to the faster direction.
pub fn speed_color<'a>(speed: DisplaySpeed, config: &'a AppConfig) -> &'a str {
    if !config.color_coding {
        return &config.default_color;
    }
    let fastest_mbps = speed.upload_mbps.max(speed.download_mbps);
    if fastest_mbps >= config.high_speed_threshold {
        &config.high_speed_color
    } else if fastest_mbps >= config.low_speed_threshold {
        &config.low_speed_color
    } else {
        &config.default_color
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speed(up: f64, down: f64) -> DisplaySpeed {
        DisplaySpeed {
            upload_mbps: up,
            download_mbps: down,
        }
    }

    #[test]
    fn always_mbps_keeps_the_unit_fixed() {
        let config = AppConfig::default();
        assert_eq!(format_rate(0.0, &config), "0.00 Mbps");
        assert_eq!(format_rate(12.3, &config), "12.30 Mbps");
        assert_eq!(format_rate(1_234.5, &config), "1234.50 Mbps");
    }

    #[test]
    fn auto_bits_scales_through_the_unit_ladder() {
        let config = AppConfig {
            speed_display_mode: SpeedDisplayMode::AutoBits,
            ..AppConfig::default()
        };
        assert_eq!(format_rate(0.05, &config), "50.00 Kbps");
        assert_eq!(format_rate(5.0, &config), "5.00 Mbps");
        assert_eq!(format_rate(5_000.0, &config), "5.00 Gbps");
    }

    #[test]
    fn noise_floor_renders_as_zero_in_auto_modes() {
        let config = AppConfig {
            speed_display_mode: SpeedDisplayMode::AutoBits,
            ..AppConfig::default()
        };
        // 5000 bits/s is under the 10 kbps floor.
        assert_eq!(format_rate(0.005, &config), "0.00 bps");
    }

    #[test]
    fn auto_bytes_divides_by_eight() {
        let config = AppConfig {
            speed_display_mode: SpeedDisplayMode::AutoBytes,
            ..AppConfig::default()
        };
        // 8 Mbps = 1 MB/s.
        assert_eq!(format_rate(8.0, &config), "1.00 MB/s");
    }

    #[test]
    fn force_decimals_off_trims_whole_numbers() {
        let config = AppConfig {
            force_decimals: false,
            ..AppConfig::default()
        };
        assert_eq!(format_rate(5.0, &config), "5 Mbps");
        assert_eq!(format_rate(5.5, &config), "5.50 Mbps");
    }

    #[test]
    fn color_coding_picks_threshold_bands() {
        let config = AppConfig {
            color_coding: true,
            ..AppConfig::default()
        };
        // Defaults: low 1.0, high 5.0.
        assert_eq!(speed_color(speed(0.1, 0.2), &config), "#FFFFFF");
        assert_eq!(speed_color(speed(0.2, 2.0), &config), "#FFA500");
        assert_eq!(speed_color(speed(6.0, 1.0), &config), "#00FF00");

        let plain = AppConfig::default();
        assert_eq!(speed_color(speed(100.0, 100.0), &plain), "#FFFFFF");
    }
}
