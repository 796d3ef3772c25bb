//! Image encoding: `DynamicImage` → PNG [`Attachment`].
//!
//! PNG is lossless; JPEG artefacts around small printed digits are a common
//! source of misread prices. Photos straight off a phone camera are often
//! 4000 px or more on the long edge, far above what vision endpoints use, so
//! the image is downscaled to `max_pixels` on its longest edge first.

use super::transport::Attachment;
use image::imageops::FilterType;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Downscale `img` so neither edge exceeds `max_pixels`, then PNG-encode it.
pub fn encode_attachment(
    img: &DynamicImage,
    max_pixels: u32,
) -> Result<Attachment, image::ImageError> {
    let capped;
    let img = if img.width().max(img.height()) > max_pixels {
        capped = img.resize(max_pixels, max_pixels, FilterType::Triangle);
        debug!(
            "Downscaled {}x{} → {}x{}",
            img.width(),
            img.height(),
            capped.width(),
            capped.height()
        );
        &capped
    } else {
        img
    };

    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!("Encoded image → {} bytes PNG", buf.len());

    Ok(Attachment::png(buf))
}
