use egui::Color32;

/// Format a playback position in milliseconds as `h:mm:ss`.
pub fn format_timecode(time_ms: u64) -> String {
    let total_seconds = time_ms / 1000;
    let seconds = total_seconds % 60;
    let minutes = (total_seconds / 60) % 60;
    let hours = total_seconds / 3600;
    format!("{}:{:02}:{:02}", hours, minutes, seconds)
}

/// Parse a `#RRGGBB` colour string, falling back to `fallback` if the string is malformed.
pub fn parse_hex_colour(value: &str, fallback: Color32) -> Color32 {
    let digits = match value.strip_prefix('#') {
        Some(digits) if digits.len() == 6 => digits,
        _ => return fallback,
    };

    match u32::from_str_radix(digits, 16) {
        Ok(rgb) => Color32::from_rgb((rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8),
        Err(_) => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timecode_formatting() {
        assert_eq!(format_timecode(0), "0:00:00");
        assert_eq!(format_timecode(999), "0:00:00");
        assert_eq!(format_timecode(61_000), "0:01:01");
        assert_eq!(format_timecode(3_600_000), "1:00:00");
        assert_eq!(format_timecode(3_723_000), "1:02:03");
    }

    #[test]
    fn hex_colour_parsing() {
        assert_eq!(parse_hex_colour("#FF0000", Color32::BLACK), Color32::from_rgb(255, 0, 0));
        assert_eq!(parse_hex_colour("#00ff7f", Color32::BLACK), Color32::from_rgb(0, 255, 127));
        // Malformed strings fall back
        assert_eq!(parse_hex_colour("FF0000", Color32::WHITE), Color32::WHITE);
        assert_eq!(parse_hex_colour("#FF00", Color32::WHITE), Color32::WHITE);
        assert_eq!(parse_hex_colour("#GGGGGG", Color32::WHITE), Color32::WHITE);
    }
}
