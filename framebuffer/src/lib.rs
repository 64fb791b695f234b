//! Direct pixel access to Linux framebuffer devices
//!
//! This library maps a framebuffer device (`/dev/fb*`) into the process and
//! reads and writes individual pixels without going through a display
//! server. Writes are visible on screen immediately.
//!
//! # Components
//!
//! - **Screen info** (`screeninfo` module): asks the driver for resolution,
//!   row stride and the bit layout of each colour channel.
//! - **Colour model** (`color` module): recognises RGB565 and RGB888 layouts
//!   and converts between them and 8-bit RGBA.
//! - **Device** (`device` module): owns the memory mapping and exposes
//!   bounds-checked `at`/`set`.
//!
//! # Example
//!
//! ```no_run
//! use framebuffer::Rgba;
//!
//! let mut fb = framebuffer::open("/dev/fb0").expect("Failed to open framebuffer");
//! let bounds = fb.bounds();
//! for x in bounds.min_x..bounds.max_x {
//!     fb.set(x, bounds.max_y / 2, Rgba::opaque(255, 0, 0));
//! }
//! fb.close().expect("Failed to close framebuffer");
//! ```
//!
//! # Permissions
//!
//! Opening a framebuffer needs read-write access to the device node:
//!
//! - Run as root (`sudo`)
//! - Or add user to the `video` group: `sudo usermod -a -G video $USER`

pub mod color;
pub mod device;
mod mapping;
pub mod screeninfo;

pub use color::{ColorModel, PackedColor, Rgba};
pub use device::{Device, FramebufferInfo, RasterImage, Rect};
pub use screeninfo::{
    Bitfield, ChannelLayout, FixedScreenInfo, IoctlScreenInfo, ScreenGeometry, ScreenInfo,
    ScreenInfoProvider,
};

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Environment variable naming the framebuffer to use by default
pub const FRAMEBUFFER_ENV: &str = "FRAMEBUFFER";

/// Errors that can occur while opening or closing a framebuffer
#[derive(Error, Debug)]
pub enum FramebufferError {
    #[error("Invalid device path")]
    InvalidPath,

    #[error("Failed to open device: {0}")]
    DeviceOpen(#[source] std::io::Error),

    #[error("ioctl {request} failed: {source}")]
    IoctlFailed {
        request: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Inconsistent screen geometry: {0}")]
    InconsistentGeometry(String),

    #[error("Failed to mmap: {0}")]
    MmapFailed(#[source] std::io::Error),

    #[error("unsupported color model.\n{0}")]
    UnsupportedColorModel(ChannelLayout),

    #[error("No framebuffer device found")]
    NoDevice,

    #[error("Failed to release device: {0}")]
    Release(#[source] std::io::Error),
}

/// Result type for framebuffer operations
pub type Result<T> = std::result::Result<T, FramebufferError>;

/// Open a framebuffer device such as `/dev/fb0`
pub fn open<P: AsRef<Path>>(path: P) -> Result<Device> {
    Device::open(path)
}

/// Open a framebuffer with geometry and layout supplied by `provider`
pub fn open_with<P, S>(path: P, provider: &S) -> Result<Device>
where
    P: AsRef<Path>,
    S: ScreenInfoProvider + ?Sized,
{
    Device::open_with(path, provider)
}

/// Open the framebuffer named by `$FRAMEBUFFER`, or else the first device
/// from [`list_devices`] that opens successfully
pub fn open_default() -> Result<Device> {
    if let Some(path) = std::env::var_os(FRAMEBUFFER_ENV) {
        return Device::open(path);
    }
    for path in list_devices() {
        match Device::open(&path) {
            Ok(device) => return Ok(device),
            Err(e) => log::debug!("{}: {}", path, e),
        }
    }
    Err(FramebufferError::NoDevice)
}

/// List available framebuffer devices
///
/// Probes `/dev/fb0`..`/dev/fb7` and every `fbN` class entry the kernel
/// registered under `/sys/class/graphics`. Only nodes present in `/dev`
/// are returned, sorted.
pub fn list_devices() -> Vec<String> {
    scan_devices(Path::new("/dev"), Path::new("/sys/class/graphics"))
}

fn scan_devices(dev_dir: &Path, class_dir: &Path) -> Vec<String> {
    let mut names: BTreeSet<String> = (0..8).map(|i| format!("fb{}", i)).collect();
    match fs::read_dir(class_dir) {
        Ok(entries) => {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if is_fb_node_name(&name) {
                    names.insert(name);
                } else {
                    log::trace!("{}: skipping {}", class_dir.display(), name);
                }
            }
        }
        Err(e) => log::trace!("{}: {}", class_dir.display(), e),
    }

    names
        .into_iter()
        .map(|name| dev_dir.join(name))
        .filter(|node| node.exists())
        .filter_map(|node| node.to_str().map(str::to_string))
        .collect()
}

// `fb` followed by a device number; `fbcon` and friends are not nodes.
fn is_fb_node_name(name: &str) -> bool {
    name.strip_prefix("fb")
        .map_or(false, |n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}
