//! The framebuffer device and its pixel surface

use crate::color::{ColorModel, PackedColor, Rgba};
use crate::mapping::MappedBuffer;
use crate::screeninfo::{ScreenGeometry, ScreenInfoProvider};
use crate::{FramebufferError, Result};
use libc::{open, O_CLOEXEC, O_RDWR};
use serde::Serialize;
use std::ffi::CString;
use std::io;
use std::os::fd::{AsFd, FromRawFd, IntoRawFd, OwnedFd};
use std::path::Path;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Half-open rectangle `[min_x, max_x) x [min_y, max_y)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct Rect {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl Rect {
    pub const fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.min_x && x < self.max_x && y >= self.min_y && y < self.max_y
    }

    pub fn width(&self) -> i32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> i32 {
        self.max_y - self.min_y
    }
}

/// A 2D raster that can be read and written pixel by pixel.
///
/// Drawing code should take `impl RasterImage` rather than a [`Device`] so it
/// also runs against in-memory images.
pub trait RasterImage {
    /// Area that holds pixels
    fn bounds(&self) -> Rect;

    /// Model that colours are quantised to
    fn color_model(&self) -> ColorModel;

    /// Colour at (x, y), or [`Rgba::TRANSPARENT`] outside [`bounds`](Self::bounds)
    fn at(&self, x: i32, y: i32) -> Rgba;

    /// Store `color` at (x, y). Out-of-bounds and fully transparent writes are ignored.
    fn set(&mut self, x: i32, y: i32, color: Rgba);
}

/// Detailed framebuffer information
#[derive(Debug, Clone, Serialize)]
pub struct FramebufferInfo {
    pub path: String,
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u32,
    pub stride: u32,
    pub buffer_len: usize,
    pub color_model: ColorModel,
}

/// An open framebuffer with its memory mapped into the process.
///
/// Writes through [`set`](Device::set) reach the display immediately, there
/// is no flush step. The device is not internally synchronised; sharing it
/// between threads needs an outer lock.
pub struct Device {
    // Declared before `fd` so the mapping goes away first on drop.
    buffer: MappedBuffer,
    fd: OwnedFd,
    path: String,
    geometry: ScreenGeometry,
    bounds: Rect,
    color_model: ColorModel,
}

impl Device {
    /// Open a framebuffer device such as `/dev/fb0`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, &crate::IoctlScreenInfo)
    }

    /// Open a framebuffer, taking geometry and channel layout from `provider`
    /// instead of the fbdev ioctls.
    pub fn open_with<P, S>(path: P, provider: &S) -> Result<Self>
    where
        P: AsRef<Path>,
        S: ScreenInfoProvider + ?Sized,
    {
        let path_str = path.as_ref().to_str().ok_or(FramebufferError::InvalidPath)?;
        let c_path = CString::new(path_str).map_err(|_| FramebufferError::InvalidPath)?;

        let raw_fd = unsafe { open(c_path.as_ptr(), O_RDWR | O_CLOEXEC) };
        if raw_fd < 0 {
            return Err(FramebufferError::DeviceOpen(io::Error::last_os_error()));
        }
        // From here on every early return closes the descriptor.
        let fd = unsafe { OwnedFd::from_raw_fd(raw_fd) };

        let info = provider.screen_info(fd.as_fd())?;
        let geometry = info.geometry;
        log::debug!(
            "{}: {}x{} {}bpp stride {}",
            path_str,
            geometry.width,
            geometry.height,
            geometry.bits_per_pixel,
            geometry.stride
        );

        let color_model = match ColorModel::detect(&info.layout) {
            Ok(model) => model,
            Err(e) => {
                log::warn!("{}: unsupported channel layout\n{}", path_str, info.layout);
                return Err(e);
            }
        };
        let buffer_len = check_geometry(&geometry, color_model)?;

        let buffer = MappedBuffer::map(fd.as_fd(), buffer_len)?;
        log::debug!("{}: mapped {} bytes as {}", path_str, buffer.len(), color_model);

        Ok(Self {
            buffer,
            fd,
            path: path_str.to_string(),
            geometry,
            bounds: Rect::new(0, 0, geometry.width as i32, geometry.height as i32),
            color_model,
        })
    }

    /// Unmap the framebuffer and close the device file.
    ///
    /// Both steps are attempted; the first failure is returned.
    pub fn close(mut self) -> Result<()> {
        let unmapped = self.buffer.unmap();
        let raw_fd = self.fd.into_raw_fd();
        let closed = if unsafe { libc::close(raw_fd) } != 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        };
        log::trace!("{}: closed", self.path);
        unmapped.and(closed).map_err(FramebufferError::Release)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn geometry(&self) -> ScreenGeometry {
        self.geometry
    }

    /// Rectangle from (0, 0) to (width, height)
    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn color_model(&self) -> ColorModel {
        self.color_model
    }

    pub fn info(&self) -> FramebufferInfo {
        FramebufferInfo {
            path: self.path.clone(),
            width: self.geometry.width,
            height: self.geometry.height,
            bits_per_pixel: self.geometry.bits_per_pixel,
            stride: self.geometry.stride,
            buffer_len: self.buffer.len(),
            color_model: self.color_model,
        }
    }

    /// Byte offset of (x, y), always addressed through the row stride
    fn offset(&self, x: i32, y: i32) -> Option<usize> {
        if !self.bounds.contains(x, y) {
            return None;
        }
        let row = (y as usize).checked_mul(self.geometry.stride as usize)?;
        row.checked_add(x as usize * self.color_model.bytes_per_pixel())
    }

    /// Native pixel value at (x, y)
    pub fn pixel(&self, x: i32, y: i32) -> Option<PackedColor> {
        let offset = self.offset(x, y)?;
        self.buffer
            .read_le(offset, self.color_model.bytes_per_pixel())
            .map(PackedColor)
    }

    /// Colour at (x, y), or all zeroes outside the screen
    pub fn at(&self, x: i32, y: i32) -> Rgba {
        self.pixel(x, y)
            .map(|packed| self.color_model.unpack(packed))
            .unwrap_or(Rgba::TRANSPARENT)
    }

    /// Write `color` at (x, y).
    ///
    /// Does nothing outside the screen or when `color.a` is zero. Alpha is
    /// otherwise ignored, there is no blending.
    pub fn set(&mut self, x: i32, y: i32, color: Rgba) {
        if color.a == 0 {
            return;
        }
        if let Some(offset) = self.offset(x, y) {
            let packed = self.color_model.pack(color);
            self.buffer.write_le(offset, self.color_model.bytes_per_pixel(), packed.0);
        }
    }

    /// Copy the visible screen out as tightly packed RGBA8 rows
    pub fn to_rgba(&self) -> Vec<u8> {
        let width = self.geometry.width as usize;
        let mut rgba = vec![0u8; width * self.geometry.height as usize * 4];
        if width > 0 {
            self.convert_rows(&mut rgba, width * 4);
        }
        rgba
    }

    #[cfg(feature = "parallel")]
    fn convert_rows(&self, rgba: &mut [u8], row_len: usize) {
        rgba.par_chunks_mut(row_len)
            .enumerate()
            .for_each(|(y, row)| self.convert_row(y as i32, row));
    }

    #[cfg(not(feature = "parallel"))]
    fn convert_rows(&self, rgba: &mut [u8], row_len: usize) {
        for (y, row) in rgba.chunks_mut(row_len).enumerate() {
            self.convert_row(y as i32, row);
        }
    }

    fn convert_row(&self, y: i32, row: &mut [u8]) {
        for (x, dst) in row.chunks_exact_mut(4).enumerate() {
            let color: [u8; 4] = self.at(x as i32, y).into();
            dst.copy_from_slice(&color);
        }
    }
}

impl RasterImage for Device {
    fn bounds(&self) -> Rect {
        Device::bounds(self)
    }

    fn color_model(&self) -> ColorModel {
        Device::color_model(self)
    }

    fn at(&self, x: i32, y: i32) -> Rgba {
        Device::at(self, x, y)
    }

    fn set(&mut self, x: i32, y: i32, color: Rgba) {
        Device::set(self, x, y, color)
    }
}

/// Reject geometry the pixel accessors cannot address; returns the mapped length
fn check_geometry(geometry: &ScreenGeometry, model: ColorModel) -> Result<usize> {
    if geometry.width == 0 || geometry.height == 0 {
        return Err(FramebufferError::InconsistentGeometry(format!(
            "empty screen {}x{}",
            geometry.width, geometry.height
        )));
    }
    if geometry.width > i32::MAX as u32 || geometry.height > i32::MAX as u32 {
        return Err(FramebufferError::InconsistentGeometry(format!(
            "screen {}x{} is too large",
            geometry.width, geometry.height
        )));
    }
    if model == ColorModel::Rgb888 && geometry.bits_per_pixel == 24 {
        return Err(FramebufferError::InconsistentGeometry(
            "24 bits per pixel rgb888 is not supported, only the 32-bit packing".to_string(),
        ));
    }
    if geometry.bits_per_pixel != model.bits_per_pixel() {
        return Err(FramebufferError::InconsistentGeometry(format!(
            "{} bits per pixel does not fit {}",
            geometry.bits_per_pixel, model
        )));
    }
    let too_large = || {
        FramebufferError::InconsistentGeometry(format!(
            "{}x{} at {} bits per pixel does not fit in memory",
            geometry.width, geometry.height, geometry.bits_per_pixel
        ))
    };
    let row_len = (geometry.width as usize)
        .checked_mul(model.bytes_per_pixel())
        .ok_or_else(too_large)?;
    if (geometry.stride as usize) < row_len {
        return Err(FramebufferError::InconsistentGeometry(format!(
            "stride {} is shorter than a {} byte row",
            geometry.stride, row_len
        )));
    }
    geometry.buffer_len().ok_or_else(too_large)
}
