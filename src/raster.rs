//! RGBA rasters and the image plumbing around them.
//!
//! Everything the monitor compares is an 8-bit RGBA buffer in row-major
//! order: canvas frames, artwork templates, ground snapshots, baselines.
//! Polygon masks are single-channel buffers of the same layout. Both are
//! stored verbatim as blobs, so the in-memory representation doubles as the
//! wire/storage format.

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use image::imageops::FilterType;
use image::RgbaImage;

/// Sentinel template color: a pixel painted with this RGB (alpha ignored)
/// must keep matching the ground snapshot, whatever the artwork mode is.
pub const DEFACE_RGB: [u8; 3] = [0xDE, 0xFA, 0xCE];

/// An 8-bit RGBA image, row-major, 4 bytes per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Raster {
    /// Wraps raw RGBA bytes. The byte length must be exactly `w * h * 4`.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(anyhow!(
                "rgba buffer is {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self { width, height, data })
    }

    /// A fully transparent raster.
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Pixel at `(x, y)`. Callers stay in bounds; the planner and comparator
    /// only index inside rectangles they derived from this raster's size.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    #[inline]
    pub fn put_pixel(&mut self, x: u32, y: u32, px: [u8; 4]) {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        self.data[i..i + 4].copy_from_slice(&px);
    }

    /// Copies the rectangle at `(x, y, w, h)` out into a new raster.
    /// Returns `None` when the rectangle is not fully inside this raster.
    pub fn crop(&self, x: u32, y: u32, w: u32, h: u32) -> Option<Raster> {
        if w == 0 || h == 0 {
            return None;
        }
        if x.checked_add(w)? > self.width || y.checked_add(h)? > self.height {
            return None;
        }
        let mut out = Vec::with_capacity(w as usize * h as usize * 4);
        for row in y..y + h {
            let start = (row as usize * self.width as usize + x as usize) * 4;
            out.extend_from_slice(&self.data[start..start + w as usize * 4]);
        }
        Some(Raster {
            width: w,
            height: h,
            data: out,
        })
    }

    /// Nearest-neighbour resize, used by the screenshot capture strategy to
    /// map CSS pixels back onto the canvas backing store.
    pub fn resize_nearest(&self, width: u32, height: u32) -> Raster {
        let img = RgbaImage::from_raw(self.width, self.height, self.data.clone())
            .unwrap_or_else(|| RgbaImage::new(self.width.max(1), self.height.max(1)));
        let resized = image::imageops::resize(&img, width, height, FilterType::Nearest);
        Raster {
            width,
            height,
            data: resized.into_raw(),
        }
    }
}

/// A single-channel mask, row-major, one byte per pixel. Nonzero = inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Mask {
    pub fn from_bytes(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(anyhow!(
                "mask buffer is {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self { width, height, data })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        self.data[y as usize * self.width as usize + x as usize] != 0
    }

    /// Rasterizes a four-corner polygon (in mask-local coordinates) with an
    /// even-odd scanline fill. Edges are inclusive enough for the operator
    /// use case: the corners endpoint feeds screen-drawn quads through here.
    pub fn from_quad(width: u32, height: u32, corners: &[(i64, i64); 4]) -> Self {
        let mut data = vec![0u8; width as usize * height as usize];
        for y in 0..height as i64 {
            let fy = y as f64 + 0.5;
            // Collect x-crossings of the horizontal line through this row.
            let mut xs: Vec<f64> = Vec::with_capacity(4);
            for i in 0..4 {
                let (x0, y0) = corners[i];
                let (x1, y1) = corners[(i + 1) % 4];
                let (x0, y0, x1, y1) = (x0 as f64, y0 as f64, x1 as f64, y1 as f64);
                if (y0 <= fy && fy < y1) || (y1 <= fy && fy < y0) {
                    xs.push(x0 + (fy - y0) / (y1 - y0) * (x1 - x0));
                }
            }
            xs.sort_by(|a, b| a.partial_cmp(b).unwrap());
            for pair in xs.chunks_exact(2) {
                let start = pair[0].ceil().max(0.0) as i64;
                let end = (pair[1].floor() as i64).min(width as i64 - 1);
                for x in start..=end {
                    data[y as usize * width as usize + x as usize] = 255;
                }
            }
        }
        Self { width, height, data }
    }
}

/// Decodes a `data:image/<type>;base64,<payload>` URL into an RGBA raster.
///
/// Anything that is not a base64 image data URL is rejected; the payload is
/// handed to the `image` decoders, so PNG and JPEG uploads both work.
pub fn decode_data_url(data_url: &str) -> Result<Raster> {
    let rest = data_url
        .strip_prefix("data:image/")
        .ok_or_else(|| anyhow!("not an image data URL"))?;
    let (_, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| anyhow!("data URL is not base64 encoded"))?;
    let bytes = general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| anyhow!("invalid base64 payload: {e}"))?;
    let img = image::load_from_memory(&bytes)
        .map_err(|e| anyhow!("unsupported image payload: {e}"))?
        .to_rgba8();
    let (w, h) = img.dimensions();
    Raster::from_rgba(w, h, img.into_raw())
}

/// Decodes an encoded image (e.g. a PNG screenshot) into an RGBA raster.
pub fn decode_image_bytes(bytes: &[u8]) -> Result<Raster> {
    let img = image::load_from_memory(bytes)?.to_rgba8();
    let (w, h) = img.dimensions();
    Raster::from_rgba(w, h, img.into_raw())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::png::PngEncoder;
    use image::ImageEncoder;

    fn png_data_url(raster: &Raster) -> String {
        let mut buf = Vec::new();
        PngEncoder::new(&mut buf)
            .write_image(
                raster.bytes(),
                raster.width(),
                raster.height(),
                image::ExtendedColorType::Rgba8,
            )
            .unwrap();
        format!(
            "data:image/png;base64,{}",
            general_purpose::STANDARD.encode(buf)
        )
    }

    #[test]
    fn from_rgba_checks_length() {
        assert!(Raster::from_rgba(2, 2, vec![0; 16]).is_ok());
        assert!(Raster::from_rgba(2, 2, vec![0; 15]).is_err());
    }

    #[test]
    fn crop_inside_and_out_of_bounds() {
        let mut r = Raster::blank(4, 4);
        r.put_pixel(2, 1, [1, 2, 3, 4]);

        let sub = r.crop(2, 1, 2, 2).unwrap();
        assert_eq!(sub.width(), 2);
        assert_eq!(sub.pixel(0, 0), [1, 2, 3, 4]);

        assert!(r.crop(3, 3, 2, 2).is_none());
        assert!(r.crop(0, 0, 0, 1).is_none());
    }

    #[test]
    fn data_url_round_trip() {
        let mut r = Raster::blank(3, 2);
        r.put_pixel(0, 0, [255, 0, 0, 255]);
        r.put_pixel(2, 1, [0, 255, 0, 128]);

        let decoded = decode_data_url(&png_data_url(&r)).unwrap();
        assert_eq!(decoded.width(), 3);
        assert_eq!(decoded.height(), 2);
        assert_eq!(decoded.bytes(), r.bytes());
    }

    #[test]
    fn data_url_rejects_non_images() {
        assert!(decode_data_url("data:text/plain;base64,aGVsbG8=").is_err());
        assert!(decode_data_url("data:image/png,rawbytes").is_err());
        assert!(decode_data_url("data:image/png;base64,!!!").is_err());
        assert!(decode_data_url("https://example.com/x.png").is_err());
    }

    #[test]
    fn quad_fill_covers_axis_aligned_rect() {
        let mask = Mask::from_quad(6, 6, &[(1, 1), (4, 1), (4, 4), (1, 4)]);
        assert!(mask.contains(2, 2));
        assert!(mask.contains(3, 3));
        assert!(!mask.contains(0, 0));
        assert!(!mask.contains(5, 5));
    }

    #[test]
    fn quad_fill_respects_bounds() {
        // Corners partly outside the mask must not panic and must clip.
        let mask = Mask::from_quad(4, 4, &[(-2, -2), (8, -2), (8, 8), (-2, 8)]);
        assert!(mask.contains(0, 0));
        assert!(mask.contains(3, 3));
    }
}
