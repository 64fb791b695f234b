//! Colour models supported by the device
//!
//! Only two channel layouts are recognised, and only on an exact match of all
//! nine bitfield values. Anything else is reported back with the raw layout so
//! the caller can see what the driver actually exposes.

use crate::screeninfo::{Bitfield, ChannelLayout};
use crate::{FramebufferError, Result};
use serde::Serialize;
use std::fmt;

/// A normalised colour, 8 bits per channel, not premultiplied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    /// All channels zero. Returned for reads outside the screen.
    pub const TRANSPARENT: Rgba = Rgba::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, 0xFF)
    }
}

impl From<[u8; 4]> for Rgba {
    fn from([r, g, b, a]: [u8; 4]) -> Self {
        Self::new(r, g, b, a)
    }
}

impl From<Rgba> for [u8; 4] {
    fn from(c: Rgba) -> Self {
        [c.r, c.g, c.b, c.a]
    }
}

/// A pixel in the device's native bit pattern.
///
/// Only the low `bytes_per_pixel` bytes of the value are meaningful.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct PackedColor(pub u32);

const RGB565_LAYOUT: ChannelLayout = ChannelLayout {
    red: Bitfield::new(11, 5, 0),
    green: Bitfield::new(5, 6, 0),
    blue: Bitfield::new(0, 5, 0),
};

const RGB888_LAYOUT: ChannelLayout = ChannelLayout {
    red: Bitfield::new(16, 8, 0),
    green: Bitfield::new(8, 8, 0),
    blue: Bitfield::new(0, 8, 0),
};

/// Pixel encoding of a framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorModel {
    /// 16-bit, red in bits 11..16, green in 5..11, blue in 0..5
    Rgb565,
    /// 32-bit 0x00RRGGBB, the top byte is unused
    Rgb888,
}

impl fmt::Display for ColorModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColorModel::Rgb565 => f.write_str("rgb565"),
            ColorModel::Rgb888 => f.write_str("rgb888"),
        }
    }
}

impl ColorModel {
    /// Match a probed channel layout against the known layouts.
    ///
    /// Every offset, length and msb_right value must be equal. There is no
    /// nearest match.
    pub fn detect(layout: &ChannelLayout) -> Result<Self> {
        if *layout == RGB565_LAYOUT {
            Ok(ColorModel::Rgb565)
        } else if *layout == RGB888_LAYOUT {
            Ok(ColorModel::Rgb888)
        } else {
            Err(FramebufferError::UnsupportedColorModel(*layout))
        }
    }

    /// The channel layout this model was detected from
    pub fn layout(&self) -> ChannelLayout {
        match self {
            ColorModel::Rgb565 => RGB565_LAYOUT,
            ColorModel::Rgb888 => RGB888_LAYOUT,
        }
    }

    /// Width of a packed pixel in bytes
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            ColorModel::Rgb565 => 2,
            ColorModel::Rgb888 => 4,
        }
    }

    pub fn bits_per_pixel(&self) -> u32 {
        self.bytes_per_pixel() as u32 * 8
    }

    /// Quantise a colour into the native pattern.
    ///
    /// Channels are truncated to the model's depth, alpha is dropped.
    pub fn pack(&self, color: Rgba) -> PackedColor {
        let layout = self.layout();
        PackedColor(
            pack_channel(color.r, layout.red)
                | pack_channel(color.g, layout.green)
                | pack_channel(color.b, layout.blue),
        )
    }

    /// Expand a native pattern back to 8 bits per channel.
    ///
    /// The device has no alpha channel, so the result is always opaque.
    pub fn unpack(&self, packed: PackedColor) -> Rgba {
        let layout = self.layout();
        Rgba::opaque(
            unpack_channel(packed.0, layout.red),
            unpack_channel(packed.0, layout.green),
            unpack_channel(packed.0, layout.blue),
        )
    }

    /// The colour that reading back a pixel written with `color` yields
    pub fn convert(&self, color: Rgba) -> Rgba {
        self.unpack(self.pack(color))
    }
}

fn pack_channel(value: u8, field: Bitfield) -> u32 {
    (u32::from(value) >> (8 - field.length)) << field.offset
}

// Replicates the high bits into the low ones so full scale maps to 0xFF.
fn unpack_channel(packed: u32, field: Bitfield) -> u8 {
    let mask = (1u32 << field.length) - 1;
    let value = ((packed >> field.offset) & mask) << (8 - field.length);
    (value | (value >> field.length)) as u8
}
