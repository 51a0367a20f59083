//! Color types and utilities for palette processing.
//!
//! This module contains color-related functionality including:
//! - `Rgb` entries as stored in the source palette
//! - `Oklab` wrapper for the oklab crate's color type, used for lightness
//! - Packing to and from the 15-bit BGR format of CGB palette memory

use oklab::{self, oklab_to_srgb, srgb_to_oklab, Rgb as SrgbTriple};
use serde::{Deserialize, Serialize};

/// Number of bits per channel in a packed CGB color
const CGB_CHANNEL_BITS: u16 = 5;
/// Mask for one packed CGB channel
const CGB_CHANNEL_MASK: u16 = (1 << CGB_CHANNEL_BITS) - 1;

/// An 8-bit per channel RGB color
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Rgb { r, g, b }
    }

    /// Perceptual lightness (Oklab L, 0.0 for black to 1.0 for white)
    pub fn lightness(self) -> f32 {
        Oklab::from(self).l
    }

    /// The neutral gray with the same perceptual lightness
    pub fn to_gray(self) -> Rgb {
        Oklab::new(self.lightness(), 0.0, 0.0).to_rgb()
    }

    /// Pack into the little-endian BGR555 word used by CGB palette memory
    pub fn to_bgr555(self) -> u16 {
        let r = u16::from(self.r) >> 3;
        let g = u16::from(self.g) >> 3;
        let b = u16::from(self.b) >> 3;
        r | (g << CGB_CHANNEL_BITS) | (b << (2 * CGB_CHANNEL_BITS))
    }

    /// Unpack a BGR555 word, widening each channel back to 8 bits
    pub fn from_bgr555(value: u16) -> Self {
        let widen = |c: u16| ((c << 3) | (c >> 2)) as u8;
        Rgb::new(
            widen(value & CGB_CHANNEL_MASK),
            widen((value >> CGB_CHANNEL_BITS) & CGB_CHANNEL_MASK),
            widen((value >> (2 * CGB_CHANNEL_BITS)) & CGB_CHANNEL_MASK),
        )
    }
}

impl From<Rgb> for image::Rgb<u8> {
    fn from(color: Rgb) -> Self {
        image::Rgb([color.r, color.g, color.b])
    }
}

/// Wrapper around oklab::Oklab for conversions to and from `Rgb`
#[derive(Copy, Clone, Debug, PartialOrd, PartialEq)]
#[repr(transparent)]
pub struct Oklab(oklab::Oklab);

impl std::ops::Deref for Oklab {
    type Target = oklab::Oklab;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<oklab::Oklab> for Oklab {
    fn from(oklab: oklab::Oklab) -> Self {
        Oklab(oklab)
    }
}

impl From<Rgb> for Oklab {
    fn from(color: Rgb) -> Self {
        Oklab::from_rgb(color.r, color.g, color.b)
    }
}

impl Oklab {
    /// Create a new Oklab color from L, a, b components
    pub fn new(l: f32, a: f32, b: f32) -> Self {
        Oklab(oklab::Oklab { l, a, b })
    }

    /// Convert from RGB to Oklab
    pub fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        srgb_to_oklab(SrgbTriple { r, g, b }).into()
    }

    /// Convert Oklab to RGB
    pub fn to_rgb(self) -> Rgb {
        let rgb = oklab_to_srgb(self.0);
        Rgb::new(rgb.r, rgb.g, rgb.b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn lightness_spans_black_to_white() {
        assert_relative_eq!(Rgb::BLACK.lightness(), 0.0, epsilon = 1e-4);
        assert_relative_eq!(Rgb::new(255, 255, 255).lightness(), 1.0, epsilon = 1e-3);
        assert!(Rgb::new(0, 0, 255).lightness() < Rgb::new(255, 255, 0).lightness());
    }

    #[test]
    fn gray_has_equal_channels() {
        let gray = Rgb::new(200, 40, 90).to_gray();
        assert!(gray.r.abs_diff(gray.g) <= 1);
        assert!(gray.g.abs_diff(gray.b) <= 1);
    }

    #[test]
    fn bgr555_packs_channels_low_to_high() {
        assert_eq!(Rgb::new(255, 0, 0).to_bgr555(), 0x001f);
        assert_eq!(Rgb::new(0, 255, 0).to_bgr555(), 0x03e0);
        assert_eq!(Rgb::new(0, 0, 255).to_bgr555(), 0x7c00);
        assert_eq!(Rgb::new(255, 255, 255).to_bgr555(), 0x7fff);
    }

    #[test]
    fn bgr555_widening_keeps_extremes() {
        assert_eq!(Rgb::from_bgr555(0x7fff), Rgb::new(255, 255, 255));
        assert_eq!(Rgb::from_bgr555(0), Rgb::BLACK);
        let color = Rgb::new(132, 66, 8);
        assert_eq!(Rgb::from_bgr555(color.to_bgr555()), color);
    }
}
