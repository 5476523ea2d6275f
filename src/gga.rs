//! NMEA GGA keep-alive sentence construction
//!
//! The upstream client sends one of these periodically so the remote caster
//! (and any network RTK engine behind it) keeps streaming corrections for a
//! plausible reference position. The fix itself is never validated — spec
//! non-goal.

use std::time::{SystemTime, UNIX_EPOCH};

/// Render a GGA sentence for the given reference position at the current
/// UTC time
pub fn render(lat: f64, lon: f64) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    render_at(lat, lon, now.as_secs())
}

/// Render a GGA sentence for the given reference position at a specific
/// Unix timestamp (seconds). Split out from [render] so the formatting can
/// be tested against a pinned time.
pub fn render_at(lat: f64, lon: f64, unix_secs: u64) -> String {
    let secs_of_day = unix_secs % 86_400;
    let hh = secs_of_day / 3600;
    let mm = (secs_of_day % 3600) / 60;
    let ss = secs_of_day % 60;
    let time = format!("{hh:02}{mm:02}{ss:02}.00");

    let (lat_field, lat_hemi) = format_coordinate(lat, 2);
    let (lon_field, lon_hemi) = format_coordinate(lon, 3);

    let body = format!(
        "$GPGGA,{time},{lat_field},{lat_hemi},{lon_field},{lon_hemi},1,12,1.0,10.0,M,0.0,M,,"
    );

    let checksum = xor_checksum(&body);

    format!("{body}*{checksum:02X}\r\n")
}

/// Format a signed decimal-degree coordinate as `DDMM.mmm` (latitude,
/// `degree_digits = 2`) or `DDDMM.mmm` (longitude, `degree_digits = 3`),
/// along with its hemisphere letter.
fn format_coordinate(value: f64, degree_digits: usize) -> (String, char) {
    let hemisphere = if degree_digits == 2 {
        if value >= 0.0 {
            'N'
        } else {
            'S'
        }
    } else if value >= 0.0 {
        'E'
    } else {
        'W'
    };

    let magnitude = value.abs();
    let degrees = magnitude.floor();
    let minutes = (magnitude - degrees) * 60.0;

    (
        format!("{degrees:0width$.0}{minutes:06.3}", width = degree_digits),
        hemisphere,
    )
}

/// XOR checksum of every byte after the leading `$`
fn xor_checksum(sentence_body: &str) -> u8 {
    sentence_body
        .as_bytes()
        .iter()
        .skip(1)
        .fold(0u8, |acc, b| acc ^ b)
}
