use anyhow::{anyhow, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Yuyv,
}

impl PixelFormat {
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Result<Self> {
        match fourcc {
            b"RGB3" => Ok(Self::Rgb24),
            b"YUYV" => Ok(Self::Yuyv),
            other => Err(anyhow!(
                "unsupported pixel format {}",
                String::from_utf8_lossy(other)
            )),
        }
    }
}

/// Result of converting one captured buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Conversion {
    /// `out` holds a full RGB24 frame.
    Complete,
    /// The driver delivered fewer bytes than the negotiated format needs.
    Truncated { expected: usize, received: usize },
}

/// Bytes a full capture in `format` occupies.
pub(crate) fn captured_len(width: u32, height: u32, format: PixelFormat) -> Result<usize> {
    let pixel_count = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
    let bytes_per_pixel = match format {
        PixelFormat::Rgb24 => 3,
        PixelFormat::Yuyv => 2,
    };
    pixel_count
        .checked_mul(bytes_per_pixel)
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

/// Convert a captured buffer into packed RGB24, replacing the contents of `out`.
///
/// A short buffer is reported as `Truncated` and leaves `out` empty. Errors are
/// reserved for formats the frame can never satisfy.
pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
    out: &mut Vec<u8>,
) -> Result<Conversion> {
    out.clear();
    if format == PixelFormat::Yuyv && width % 2 != 0 {
        return Err(anyhow!("YUYV frames need an even width, got {}", width));
    }
    let expected = captured_len(width, height, format)?;
    if pixels.len() < expected {
        return Ok(Conversion::Truncated {
            expected,
            received: pixels.len(),
        });
    }

    let pixels = &pixels[..expected];
    match format {
        PixelFormat::Rgb24 => out.extend_from_slice(pixels),
        PixelFormat::Yuyv => yuyv_to_rgb(pixels, out),
    }
    Ok(Conversion::Complete)
}

fn yuyv_to_rgb(pixels: &[u8], out: &mut Vec<u8>) {
    out.reserve(pixels.len() / 2 * 3);
    for chunk in pixels.chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0], chunk[2]] {
            let y = y as f32;
            out.push(clamp_to_u8(y + 1.402_f32 * v));
            out.push(clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v));
            out.push(clamp_to_u8(y + 1.772_f32 * u));
        }
    }
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
