//! Example: Paint colour bars on the framebuffer and optionally save them
//!
//! Run with: sudo cargo run --example pattern -- [device] [--dump out.png]
//!
//! Without a device argument `$FRAMEBUFFER` or the first working `/dev/fb*`
//! is used.

use framebuffer::{list_devices, Device, RasterImage, Rgba};
use image::{ImageBuffer, Rgba as ImageRgba};
use std::env;

const BARS: [Rgba; 8] = [
    Rgba::opaque(255, 255, 255),
    Rgba::opaque(255, 255, 0),
    Rgba::opaque(0, 255, 255),
    Rgba::opaque(0, 255, 0),
    Rgba::opaque(255, 0, 255),
    Rgba::opaque(255, 0, 0),
    Rgba::opaque(0, 0, 255),
    Rgba::opaque(0, 0, 0),
];

fn draw_bars(image: &mut impl RasterImage) {
    let bounds = image.bounds();
    let bar_width = (bounds.width() / BARS.len() as i32).max(1);
    for y in bounds.min_y..bounds.max_y {
        for x in bounds.min_x..bounds.max_x {
            let bar = ((x - bounds.min_x) / bar_width) as usize;
            image.set(x, y, BARS[bar.min(BARS.len() - 1)]);
        }
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "-h" || a == "--help") {
        println!("Usage: {} [device] [--dump out.png]", args[0]);
        println!("       {} list", args[0]);
        return;
    }

    let dump_file = args
        .iter()
        .position(|a| a == "--dump" || a == "-d")
        .and_then(|pos| args.get(pos + 1))
        .cloned();

    let positional_args: Vec<&str> = args
        .iter()
        .skip(1)
        .filter(|a| !a.starts_with('-') && Some(*a) != dump_file.as_ref())
        .map(|s| s.as_str())
        .collect();

    if positional_args.first() == Some(&"list") {
        println!("Framebuffer Devices:");
        for device in list_devices() {
            print!("  - {}", device);
            match Device::open(&device) {
                Ok(fb) => {
                    let info = fb.info();
                    println!(
                        " [{}x{} {}bpp stride {} {}]",
                        info.width, info.height, info.bits_per_pixel, info.stride, info.color_model
                    );
                }
                Err(e) => println!(" (error: {})", e),
            }
        }
        return;
    }

    let opened = match positional_args.first() {
        Some(path) => framebuffer::open(path),
        None => framebuffer::open_default(),
    };
    let mut fb = match opened {
        Ok(fb) => fb,
        Err(e) => {
            eprintln!("Failed to open framebuffer: {}", e);
            eprintln!();
            eprintln!("Make sure you're running as root or have video group permissions:");
            eprintln!("  sudo cargo run --example pattern");
            std::process::exit(1);
        }
    };

    let info = fb.info();
    println!(
        "Drawing on {} ({}x{}, {})",
        info.path, info.width, info.height, info.color_model
    );
    draw_bars(&mut fb);

    if let Some(output_file) = dump_file {
        let rgba = fb.to_rgba();
        match ImageBuffer::<ImageRgba<u8>, _>::from_raw(info.width, info.height, rgba) {
            Some(img) => match img.save(&output_file) {
                Ok(()) => println!("Saved to {}", output_file),
                Err(e) => eprintln!("Failed to save image: {}", e),
            },
            None => eprintln!("Snapshot size does not match the screen"),
        }
    }

    if let Err(e) = fb.close() {
        eprintln!("Failed to close framebuffer: {}", e);
        std::process::exit(1);
    }
}
