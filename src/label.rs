use rusttype::{point, Font, Scale};
use std::collections::HashMap;

/// An opaque RGBA8 label bitmap.
///
/// The pooling core treats these as blobs: it only ever reads the
/// dimensions and hands the bytes to the backend for atlas upload.
/// Ownership follows Rust move semantics; a slot payload drops its
/// bitmap on every removal path.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Bitmap {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), (width * height * 4) as usize);
        Bitmap {
            width,
            height,
            data,
        }
    }

    /// A single-color bitmap, mostly useful as a test stand-in.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..width * height {
            data.extend_from_slice(&rgba);
        }
        Bitmap {
            width,
            height,
            data,
        }
    }

    pub fn from_image(image: &image::RgbaImage) -> Self {
        Bitmap {
            width: image.width(),
            height: image.height(),
            data: image.as_raw().clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn size(&self) -> crate::utils::Size {
        crate::utils::Size {
            width: self.width as f32,
            height: self.height as f32,
        }
    }
}

/// Rasterizes label text into [`Bitmap`]s with rusttype.
///
/// This is the bitmap-producing collaborator for callers that feed
/// labeled batches into the atlas manager; the bookkeeping core itself
/// never depends on it.
pub struct LabelRasterizer {
    fonts: HashMap<String, Font<'static>>,
}

impl LabelRasterizer {
    pub fn new() -> Self {
        Self {
            fonts: HashMap::new(),
        }
    }

    /// Registers a font under `key`; false if the data is not a usable font.
    pub fn register_font(&mut self, key: &str, data: Vec<u8>) -> bool {
        match Font::try_from_vec(data) {
            Some(font) => {
                self.fonts.insert(key.to_string(), font);
                true
            }
            None => false,
        }
    }

    pub fn has_font(&self, key: &str) -> bool {
        self.fonts.contains_key(key)
    }

    /// Measures `text` at `px`, returning (widest line width, line count).
    /// Unknown fonts measure as empty.
    pub fn measure(&self, text: &str, font_key: &str, px: f32) -> (f32, u32) {
        let font = match self.fonts.get(font_key) {
            Some(font) => font,
            None => return (0.0, 0),
        };

        let scale = Scale::uniform(px);
        let mut max_width = 0.0f32;
        let mut line_count = 0u32;

        for line in text.split('\n') {
            line_count += 1;
            let width = font
                .layout(line, scale, point(0.0, 0.0))
                .last()
                .map(|glyph| {
                    glyph.position().x + glyph.unpositioned().h_metrics().advance_width
                })
                .unwrap_or(0.0);
            max_width = max_width.max(width);
        }

        (max_width, line_count)
    }

    /// Rasterizes `text` at `px` into a white-on-transparent RGBA bitmap.
    /// Returns `None` for unknown fonts or text that renders to nothing.
    pub fn rasterize(&self, text: &str, font_key: &str, px: f32) -> Option<Bitmap> {
        let font = self.fonts.get(font_key)?;

        let (max_width, line_count) = self.measure(text, font_key, px);
        if max_width <= 0.0 || line_count == 0 {
            return None;
        }

        let scale = Scale::uniform(px);
        let v_metrics = font.v_metrics(scale);
        let line_height = (v_metrics.ascent - v_metrics.descent + v_metrics.line_gap).ceil();

        let width = max_width.ceil() as u32;
        let height = (line_height * line_count as f32).ceil() as u32;
        let mut data = vec![0u8; (width * height * 4) as usize];

        for (line_index, line) in text.split('\n').enumerate() {
            let baseline = v_metrics.ascent + line_index as f32 * line_height;
            for glyph in font.layout(line, scale, point(0.0, baseline)) {
                let bb = match glyph.pixel_bounding_box() {
                    Some(bb) => bb,
                    None => continue,
                };
                glyph.draw(|gx, gy, coverage| {
                    let x = gx as i32 + bb.min.x;
                    let y = gy as i32 + bb.min.y;
                    if x < 0 || y < 0 || x >= width as i32 || y >= height as i32 {
                        return;
                    }
                    let offset = ((y as u32 * width + x as u32) * 4) as usize;
                    let alpha = (coverage * 255.0) as u8;
                    data[offset] = 255;
                    data[offset + 1] = 255;
                    data[offset + 2] = 255;
                    data[offset + 3] = data[offset + 3].max(alpha);
                });
            }
        }

        Some(Bitmap::new(width, height, data))
    }
}

impl Default for LabelRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_bitmap_has_expected_bytes() {
        let bitmap = Bitmap::solid(2, 2, [1, 2, 3, 4]);
        assert_eq!(bitmap.data.len(), 16);
        assert_eq!(&bitmap.data[4..8], &[1, 2, 3, 4]);
        assert!(!bitmap.is_empty());
    }

    #[test]
    fn unknown_font_is_a_soft_miss() {
        let rasterizer = LabelRasterizer::new();
        assert_eq!(rasterizer.measure("hello", "nope", 16.0), (0.0, 0));
        assert!(rasterizer.rasterize("hello", "nope", 16.0).is_none());
    }

    #[test]
    fn bad_font_data_is_rejected() {
        let mut rasterizer = LabelRasterizer::new();
        assert!(!rasterizer.register_font("broken", vec![0, 1, 2, 3]));
        assert!(!rasterizer.has_font("broken"));
    }
}
