//! Screen geometry and channel layout probing
//!
//! The kernel describes a framebuffer through two records: the fixed info
//! (row stride among other things) and the variable info (resolution, depth
//! and the bit position of every colour channel). This module mirrors both
//! records and hides the ioctls behind [`ScreenInfoProvider`], so the rest of
//! the crate only ever sees [`ScreenInfo`].

use crate::{FramebufferError, Result};
use libc::{c_ulong, ioctl};
use serde::Serialize;
use std::fmt;
use std::os::fd::{AsRawFd, BorrowedFd};

// Framebuffer ioctl definitions
const FBIOGET_VSCREENINFO: c_ulong = 0x4600;
const FBIOGET_FSCREENINFO: c_ulong = 0x4602;

/// Variable screen info structure (`struct fb_var_screeninfo`)
#[repr(C)]
#[allow(dead_code)]
#[derive(Default, Debug, Clone)]
struct FbVarScreenInfo {
    xres: u32,
    yres: u32,
    xres_virtual: u32,
    yres_virtual: u32,
    xoffset: u32,
    yoffset: u32,
    bits_per_pixel: u32,
    grayscale: u32,
    red: FbBitfield,
    green: FbBitfield,
    blue: FbBitfield,
    transp: FbBitfield,
    nonstd: u32,
    activate: u32,
    height: u32,
    width: u32,
    accel_flags: u32,
    pixclock: u32,
    left_margin: u32,
    right_margin: u32,
    upper_margin: u32,
    lower_margin: u32,
    hsync_len: u32,
    vsync_len: u32,
    sync: u32,
    vmode: u32,
    rotate: u32,
    colorspace: u32,
    reserved: [u32; 4],
}

#[repr(C)]
#[derive(Default, Debug, Clone, Copy)]
struct FbBitfield {
    offset: u32,
    length: u32,
    msb_right: u32,
}

/// Fixed screen info structure (`struct fb_fix_screeninfo`)
#[repr(C)]
#[allow(dead_code)]
#[derive(Default, Debug, Clone)]
struct FbFixScreenInfo {
    id: [u8; 16],
    smem_start: c_ulong,
    smem_len: u32,
    type_: u32,
    type_aux: u32,
    visual: u32,
    xpanstep: u16,
    ypanstep: u16,
    ywrapstep: u16,
    _pad: u16,
    line_length: u32,
    mmio_start: c_ulong,
    mmio_len: u32,
    accel: u32,
    capabilities: u16,
    reserved: [u16; 2],
}

/// Position of one colour channel inside a packed pixel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Bitfield {
    /// Bit offset from the least significant bit
    pub offset: u32,
    /// Number of bits
    pub length: u32,
    /// Non-zero when the most significant bit is on the right
    pub msb_right: u32,
}

impl Bitfield {
    pub const fn new(offset: u32, length: u32, msb_right: u32) -> Self {
        Self {
            offset,
            length,
            msb_right,
        }
    }
}

impl From<FbBitfield> for Bitfield {
    fn from(raw: FbBitfield) -> Self {
        Self::new(raw.offset, raw.length, raw.msb_right)
    }
}

/// Red, green and blue channel positions as reported by the driver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelLayout {
    pub red: Bitfield,
    pub green: Bitfield,
    pub blue: Bitfield,
}

impl fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "       offset length msb_right")?;
        let channels = [
            ("red:  ", self.red),
            ("green:", self.green),
            ("blue: ", self.blue),
        ];
        for (name, field) in channels {
            writeln!(
                f,
                "{}  {:04}   {:04}   {:04}",
                name, field.offset, field.length, field.msb_right
            )?;
        }
        Ok(())
    }
}

/// Visible resolution, depth and row stride of a framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScreenGeometry {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Bits per pixel
    pub bits_per_pixel: u32,
    /// Bytes per row (may include padding)
    pub stride: u32,
}

impl ScreenGeometry {
    /// Number of bytes mapped for this geometry: width * height * bpp / 8.
    ///
    /// Row padding is not included. `None` if the product does not fit in
    /// `usize`.
    pub fn buffer_len(&self) -> Option<usize> {
        let bits = (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.bits_per_pixel as usize)?;
        Some(bits / 8)
    }

    /// Bytes occupied by one pixel, rounded up
    pub fn bytes_per_pixel(&self) -> usize {
        (self.bits_per_pixel as usize + 7) / 8
    }
}

/// Everything the device needs to know before mapping the framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenInfo {
    pub geometry: ScreenGeometry,
    pub layout: ChannelLayout,
}

/// Source of screen geometry and channel layout for an open device handle.
///
/// Called exactly once while a device is being opened. No validation is
/// expected here; the device rejects values it cannot work with.
pub trait ScreenInfoProvider {
    fn screen_info(&self, fd: BorrowedFd<'_>) -> Result<ScreenInfo>;
}

/// Queries the fbdev driver with `FBIOGET_FSCREENINFO` and `FBIOGET_VSCREENINFO`
#[derive(Debug, Clone, Copy, Default)]
pub struct IoctlScreenInfo;

impl ScreenInfoProvider for IoctlScreenInfo {
    fn screen_info(&self, fd: BorrowedFd<'_>) -> Result<ScreenInfo> {
        let fd = fd.as_raw_fd();
        let mut fix_info = FbFixScreenInfo::default();
        let mut var_info = FbVarScreenInfo::default();

        if unsafe { ioctl(fd, FBIOGET_FSCREENINFO as _, &mut fix_info) } != 0 {
            return Err(FramebufferError::IoctlFailed {
                request: "FBIOGET_FSCREENINFO",
                source: std::io::Error::last_os_error(),
            });
        }

        if unsafe { ioctl(fd, FBIOGET_VSCREENINFO as _, &mut var_info) } != 0 {
            return Err(FramebufferError::IoctlFailed {
                request: "FBIOGET_VSCREENINFO",
                source: std::io::Error::last_os_error(),
            });
        }

        Ok(ScreenInfo {
            geometry: ScreenGeometry {
                width: var_info.xres,
                height: var_info.yres,
                bits_per_pixel: var_info.bits_per_pixel,
                stride: fix_info.line_length,
            },
            layout: ChannelLayout {
                red: var_info.red.into(),
                green: var_info.green.into(),
                blue: var_info.blue.into(),
            },
        })
    }
}

/// Hands out a fixed [`ScreenInfo`] without talking to a driver.
///
/// Useful for headless setups where the "framebuffer" is a plain file, and
/// for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedScreenInfo(pub ScreenInfo);

impl ScreenInfoProvider for FixedScreenInfo {
    fn screen_info(&self, _fd: BorrowedFd<'_>) -> Result<ScreenInfo> {
        Ok(self.0)
    }
}
