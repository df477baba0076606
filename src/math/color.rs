pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [f32; 3] {
    let c = v * s;
    let h_prime = (h * 6.0) % 6.0;
    let x = c * (1.0 - ((h_prime % 2.0) - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match h_prime as i32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    [r + m, g + m, b + m]
}

/// Deterministic, well-spread colour for the `index`-th object.
///
/// Hues step by the golden-ratio conjugate so neighbouring indices never
/// land on similar colours.
pub fn palette_color(index: usize) -> [f32; 3] {
    let hue = (index as f32 * 0.618_034) % 1.0;
    hsv_to_rgb(hue, 0.65, 0.9)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hsv_to_rgb_red() {
        let rgb = hsv_to_rgb(0.0, 1.0, 1.0);
        assert!((rgb[0] - 1.0).abs() < 0.01);
        assert!(rgb[1].abs() < 0.01);
        assert!(rgb[2].abs() < 0.01);
    }

    #[test]
    fn test_hsv_to_rgb_white() {
        let rgb = hsv_to_rgb(0.0, 0.0, 1.0);
        assert!((rgb[0] - 1.0).abs() < 0.01);
        assert!((rgb[1] - 1.0).abs() < 0.01);
        assert!((rgb[2] - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_palette_is_deterministic_and_distinct() {
        assert_eq!(palette_color(3), palette_color(3));
        assert_ne!(palette_color(0), palette_color(1));
        for c in palette_color(7) {
            assert!((0.0..=1.0).contains(&c));
        }
    }

    #[test]
    fn test_hsv_to_rgb_black() {
        let rgb = hsv_to_rgb(0.0, 1.0, 0.0);
        assert!(rgb[0].abs() < 0.01);
        assert!(rgb[1].abs() < 0.01);
        assert!(rgb[2].abs() < 0.01);
    }
}
