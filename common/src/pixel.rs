//! In-memory model of the strip: per-LED color, selection and fade.

use smart_leds::RGB8;
use std::{num::NonZeroU16, time::Duration};

pub const DEFAULT_PEN: RGB8 = RGB8 {
    r: 128,
    g: 128,
    b: 128,
};
pub const DEFAULT_GLOBAL_BRIGHTNESS: u8 = 64;

pub(crate) const BLACK: RGB8 = RGB8 { r: 0, g: 0, b: 0 };

/// State of a single LED.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pixel {
    index: u16,
    color: RGB8,
    active: bool,
    selected: bool,
    brightness: u8,
}

impl Pixel {
    pub fn new(index: u16) -> Self {
        Self {
            index,
            color: BLACK,
            active: false,
            selected: false,
            brightness: 255,
        }
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn rgb8(&self) -> RGB8 {
        self.color
    }

    pub fn set_rgb8(&mut self, color: RGB8) {
        self.color = color;
        self.active = color != BLACK;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    /// Selection pins the per-pixel brightness at full either way.
    pub fn set_selected(&mut self, selected: bool) {
        self.selected = selected;
        self.brightness = 255;
    }

    /// Fade towards black by `amount` per channel. The selected pixel never
    /// fades.
    pub fn dim(&mut self, amount: u8) {
        if self.selected || amount == 0 {
            return;
        }
        if !self.active && self.color == BLACK {
            return;
        }

        self.color = RGB8::new(
            self.color.r.saturating_sub(amount),
            self.color.g.saturating_sub(amount),
            self.color.b.saturating_sub(amount),
        );
        if self.color == BLACK {
            self.active = false;
        }
    }

    fn blank(&mut self) {
        self.color = BLACK;
        self.active = false;
        self.brightness = if self.selected { 255 } else { 0 };
    }
}

/// How far every channel drops after `elapsed`, given the time a full-scale
/// channel takes to reach black. Never zero, so a fade always finishes.
pub fn dim_amount(elapsed: Duration, fade: Duration) -> u8 {
    if fade.is_zero() {
        return u8::MAX;
    }
    let steps = 255.0 * elapsed.as_secs_f64() / fade.as_secs_f64();
    // float to int `as` saturates, NaN maps to 0
    (steps as u64).clamp(1, 255) as u8
}

pub fn clamp_channel(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// The whole strip plus the cursor, the pen and the device-global brightness.
#[derive(Clone, Debug)]
pub struct PixelArray {
    pixels: Vec<Pixel>,
    selected: u16,
    pen: RGB8,
    global_brightness: u8,
}

impl PixelArray {
    pub fn new(led_count: NonZeroU16) -> Self {
        let mut pixels: Vec<Pixel> = (0..led_count.get()).map(Pixel::new).collect();
        pixels[0].set_selected(true);

        Self {
            pixels,
            selected: 0,
            pen: DEFAULT_PEN,
            global_brightness: DEFAULT_GLOBAL_BRIGHTNESS,
        }
    }

    pub fn led_count(&self) -> usize {
        self.pixels.len()
    }

    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    pub fn pixel(&self, index: u16) -> Option<&Pixel> {
        self.pixels.get(usize::from(index))
    }

    pub fn selected(&self) -> u16 {
        self.selected
    }

    /// Move the cursor. The index wraps in both directions. The pixel under
    /// the new cursor position is painted with the pen.
    pub fn set_selected(&mut self, index: i64) {
        let new_index = index.rem_euclid(self.pixels.len() as i64) as u16;
        if new_index == self.selected {
            return;
        }

        self.pixels[usize::from(self.selected)].set_selected(false);
        self.selected = new_index;
        self.apply_pen_to(new_index);
        self.pixels[usize::from(new_index)].set_selected(true);
    }

    pub fn move_selection(&mut self, delta: i64) {
        self.set_selected(i64::from(self.selected) + delta);
    }

    pub fn pen(&self) -> RGB8 {
        self.pen
    }

    pub fn set_pen_color(&mut self, r: i32, g: i32, b: i32) {
        self.pen = RGB8::new(clamp_channel(r), clamp_channel(g), clamp_channel(b));
    }

    pub fn apply_pen_to(&mut self, index: u16) {
        let pen = self.pen;
        self.set_rgb8(index, pen);
    }

    pub fn fill(&mut self) {
        let pen = self.pen;
        for pixel in &mut self.pixels {
            pixel.set_rgb8(pen);
        }
    }

    pub fn clear(&mut self) {
        for pixel in &mut self.pixels {
            pixel.blank();
        }
    }

    /// Out-of-range indices are ignored.
    pub fn set_rgb8(&mut self, index: u16, color: RGB8) {
        if let Some(pixel) = self.pixels.get_mut(usize::from(index)) {
            pixel.set_rgb8(color);
        }
    }

    pub fn get_rgb8(&self, index: u16) -> Option<RGB8> {
        self.pixel(index).map(Pixel::rgb8)
    }

    pub fn dim_all(&mut self, amount: u8) {
        for pixel in &mut self.pixels {
            pixel.dim(amount);
        }
    }

    pub fn global_brightness(&self) -> u8 {
        self.global_brightness
    }

    pub fn set_global_brightness(&mut self, value: i32) {
        self.global_brightness = clamp_channel(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array(count: u16) -> PixelArray {
        PixelArray::new(NonZeroU16::new(count).unwrap())
    }

    fn lit(color: RGB8) -> Pixel {
        let mut pixel = Pixel::new(9);
        pixel.set_rgb8(color);
        pixel
    }

    #[test]
    fn starts_dark_with_first_pixel_selected() {
        let pixels = array(4);
        assert_eq!(pixels.selected(), 0);
        assert_eq!(pixels.pen(), DEFAULT_PEN);
        assert_eq!(pixels.global_brightness(), DEFAULT_GLOBAL_BRIGHTNESS);

        let first = pixels.pixel(0).unwrap();
        assert!(first.is_selected());
        assert_eq!(first.brightness(), 255);

        for pixel in pixels.pixels() {
            assert_eq!(pixel.rgb8(), BLACK);
            assert!(!pixel.is_active());
        }
        assert_eq!(pixels.pixels().iter().filter(|p| p.is_selected()).count(), 1);
    }

    #[test]
    fn dim_to_black_clears_active() {
        let mut pixel = lit(RGB8::new(10, 10, 10));
        assert!(pixel.is_active());

        pixel.dim(15);
        assert_eq!(pixel.rgb8(), BLACK);
        assert!(!pixel.is_active());
    }

    #[test]
    fn selected_pixel_never_dims() {
        let mut pixel = lit(RGB8::new(10, 10, 10));
        pixel.set_selected(true);

        pixel.dim(15);
        pixel.dim(255);
        assert_eq!(pixel.rgb8(), RGB8::new(10, 10, 10));
        assert!(pixel.is_active());
        assert_eq!(pixel.brightness(), 255);
    }

    #[test]
    fn dim_floors_each_channel_independently() {
        let mut pixel = lit(RGB8::new(200, 5, 0));
        pixel.dim(10);
        assert_eq!(pixel.rgb8(), RGB8::new(190, 0, 0));
        assert!(pixel.is_active());
    }

    #[test]
    fn dark_inactive_pixel_is_left_alone() {
        let mut pixel = Pixel::new(0);
        let before = pixel.clone();
        pixel.dim(50);
        assert_eq!(pixel, before);
    }

    #[test]
    fn selecting_moves_the_flag_and_paints() {
        let mut pixels = array(8);
        pixels.set_pen_color(1, 2, 3);
        pixels.set_rgb8(0, RGB8::new(50, 50, 50));

        pixels.set_selected(5);

        assert_eq!(pixels.selected(), 5);
        assert!(!pixels.pixel(0).unwrap().is_selected());
        assert!(pixels.pixel(5).unwrap().is_selected());
        assert_eq!(pixels.pixels().iter().filter(|p| p.is_selected()).count(), 1);
        assert_eq!(pixels.get_rgb8(5), Some(RGB8::new(1, 2, 3)));
        // the old pixel keeps its color and will fade from here
        assert_eq!(pixels.get_rgb8(0), Some(RGB8::new(50, 50, 50)));
    }

    #[test]
    fn selecting_the_current_index_does_not_repaint() {
        let mut pixels = array(8);
        pixels.set_selected(8);
        assert_eq!(pixels.selected(), 0);
        assert_eq!(pixels.get_rgb8(0), Some(BLACK));
    }

    #[test]
    fn movement_wraps_both_ways() {
        for (delta, expected) in [(-1, 287), (1, 1), (5, 5), (-9, 279)] {
            let mut pixels = array(288);
            pixels.move_selection(delta);
            assert_eq!(pixels.selected(), expected, "delta {delta}");
        }
    }

    #[test]
    fn pen_channels_clamp() {
        let mut pixels = array(1);
        pixels.set_pen_color(-20, 300, 17);
        assert_eq!(pixels.pen(), RGB8::new(0, 255, 17));
        assert_eq!(pixels.get_rgb8(0), Some(BLACK));
    }

    #[test]
    fn clear_is_idempotent() {
        let mut pixels = array(6);
        pixels.set_pen_color(90, 90, 90);
        pixels.fill();
        pixels.set_selected(3);

        pixels.clear();
        let once: Vec<Pixel> = pixels.pixels().to_vec();
        pixels.clear();

        assert_eq!(pixels.pixels(), once.as_slice());
        assert_eq!(pixels.selected(), 3);
        for pixel in pixels.pixels() {
            assert_eq!(pixel.rgb8(), BLACK);
            assert!(!pixel.is_active());
        }
        assert_eq!(pixels.pixel(3).unwrap().brightness(), 255);
        assert_eq!(pixels.pixel(0).unwrap().brightness(), 0);
    }

    #[test]
    fn fill_paints_everything() {
        let mut pixels = array(5);
        pixels.set_pen_color(4, 5, 6);
        pixels.fill();
        assert!(pixels.pixels().iter().all(|p| p.rgb8() == RGB8::new(4, 5, 6) && p.is_active()));
    }

    #[test]
    fn dim_amount_is_time_proportional() {
        let fade = Duration::from_secs(1);
        assert_eq!(dim_amount(Duration::from_millis(20), fade), 5);
        assert_eq!(dim_amount(Duration::from_millis(500), fade), 127);
        assert_eq!(dim_amount(Duration::ZERO, fade), 1);
        assert_eq!(dim_amount(Duration::from_secs(10), fade), 255);
        assert_eq!(dim_amount(Duration::from_millis(1), Duration::ZERO), 255);
    }
}
