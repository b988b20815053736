// PIXEL CONVERT - planar YUV to packed presentation formats
//
// Decoders hand us 4:2:0 pictures (YUV420P or NV12). The consumer wants
// packed RGB for a texture upload or packed YUYV for an overlay surface.
// The coefficient tables are built once per process and shared by every
// open file.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

// ============================================================================
// Pixel Formats
// ============================================================================

/// Layout of a decoded picture as it leaves the codec engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Yuv420p, // Y plane, U plane (quarter size), V plane (quarter size)
    Nv12,    // Y plane, interleaved UV plane
    Unsupported,
}

/// Packed layout written into caller-owned frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputFormat {
    Rgb24,
    Rgba32,
    Yuyv422,
}

impl OutputFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Rgb24 => 3,
            Self::Rgba32 => 4,
            Self::Yuyv422 => 2,
        }
    }

    /// Bytes per output row; YUYV rows always hold whole pixel pairs
    pub fn row_bytes(&self, width: usize) -> usize {
        match self {
            Self::Yuyv422 => width.div_ceil(2) * 4,
            _ => width * self.bytes_per_pixel(),
        }
    }

    pub fn buffer_size(&self, width: usize, height: usize) -> usize {
        self.row_bytes(width) * height
    }
}

// ============================================================================
// Color Spaces
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorSpace {
    Bt601, // SD
    Bt709, // HD
}

impl ColorSpace {
    /// Returns (Wr, Wb) where Wg = 1 - Wr - Wb
    pub fn coefficients(&self) -> (f32, f32) {
        match self {
            Self::Bt601 => (0.299, 0.114),
            Self::Bt709 => (0.2126, 0.0722),
        }
    }

    /// Full-range YUV to RGB matrix
    pub fn yuv_to_rgb_matrix(&self) -> [[f32; 3]; 3] {
        let (wr, wb) = self.coefficients();
        let wg = 1.0 - wr - wb;

        // R = Y + 2*(1-Wr)*Cr
        // G = Y - 2*Wb*(1-Wb)/Wg*Cb - 2*Wr*(1-Wr)/Wg*Cr
        // B = Y + 2*(1-Wb)*Cb
        let cr_r = 2.0 * (1.0 - wr);
        let cb_g = -2.0 * wb * (1.0 - wb) / wg;
        let cr_g = -2.0 * wr * (1.0 - wr) / wg;
        let cb_b = 2.0 * (1.0 - wb);

        [[1.0, 0.0, cr_r], [1.0, cb_g, cr_g], [1.0, cb_b, 0.0]]
    }

    fn tables(&self) -> &'static YuvTables {
        match self {
            Self::Bt601 => &BT601_TABLES,
            Self::Bt709 => &BT709_TABLES,
        }
    }
}

// ============================================================================
// Lookup Tables
// ============================================================================

/// Per-component contributions for studio-range input (Y 16-235, C 16-240)
struct YuvTables {
    y: [i32; 256],
    cr_r: [i32; 256],
    cr_g: [i32; 256],
    cb_g: [i32; 256],
    cb_b: [i32; 256],
}

impl YuvTables {
    fn build(color_space: ColorSpace) -> Self {
        let matrix = color_space.yuv_to_rgb_matrix();
        let luma_scale = 255.0 / 219.0;
        let chroma_scale = 255.0 / 224.0;

        let mut tables = Self {
            y: [0; 256],
            cr_r: [0; 256],
            cr_g: [0; 256],
            cb_g: [0; 256],
            cb_b: [0; 256],
        };

        for i in 0..256 {
            let y = (i as f32 - 16.0) * luma_scale;
            let c = (i as f32 - 128.0) * chroma_scale;

            tables.y[i] = y.round() as i32;
            tables.cr_r[i] = (c * matrix[0][2]).round() as i32;
            tables.cb_g[i] = (c * matrix[1][1]).round() as i32;
            tables.cr_g[i] = (c * matrix[1][2]).round() as i32;
            tables.cb_b[i] = (c * matrix[2][1]).round() as i32;
        }
        tables
    }

    #[inline]
    fn rgb(&self, y: u8, u: u8, v: u8) -> [u8; 3] {
        let luma = self.y[y as usize];
        let (u, v) = (u as usize, v as usize);
        [
            (luma + self.cr_r[v]).clamp(0, 255) as u8,
            (luma + self.cb_g[u] + self.cr_g[v]).clamp(0, 255) as u8,
            (luma + self.cb_b[u]).clamp(0, 255) as u8,
        ]
    }
}

static BT601_TABLES: Lazy<YuvTables> = Lazy::new(|| YuvTables::build(ColorSpace::Bt601));
static BT709_TABLES: Lazy<YuvTables> = Lazy::new(|| YuvTables::build(ColorSpace::Bt709));

// ============================================================================
// Decoded Picture
// ============================================================================

/// A decoded 4:2:0 picture with per-plane strides
#[derive(Debug, Clone)]
pub struct Picture {
    pub width: usize,
    pub height: usize,
    pub format: PixelFormat,
    pub planes: Vec<Vec<u8>>,
    pub linesize: Vec<usize>,
    pub interlaced: bool,
}

impl Picture {
    pub fn yuv420p(width: usize, height: usize, y: Vec<u8>, u: Vec<u8>, v: Vec<u8>) -> Self {
        let chroma_width = width.div_ceil(2);
        Self {
            width,
            height,
            format: PixelFormat::Yuv420p,
            planes: vec![y, u, v],
            linesize: vec![width, chroma_width, chroma_width],
            interlaced: false,
        }
    }

    /// A picture with every sample set to one value per plane
    pub fn solid(width: usize, height: usize, y: u8, u: u8, v: u8) -> Self {
        let chroma = width.div_ceil(2) * height.div_ceil(2);
        Self::yuv420p(width, height, vec![y; width * height], vec![u; chroma], vec![v; chroma])
    }

    pub fn chroma_height(&self) -> usize {
        self.height.div_ceil(2)
    }

    /// Planes are present and large enough for the advertised geometry
    pub fn is_well_formed(&self) -> bool {
        if self.width == 0 || self.height == 0 {
            return false;
        }
        let chroma_width = self.width.div_ceil(2);
        let chroma_height = self.chroma_height();
        let fits = |plane: usize, row_bytes: usize, rows: usize| {
            match (self.planes.get(plane), self.linesize.get(plane)) {
                (Some(data), Some(&stride)) => {
                    stride >= row_bytes && data.len() >= stride * (rows - 1) + row_bytes
                }
                _ => false,
            }
        };

        match self.format {
            PixelFormat::Yuv420p => {
                fits(0, self.width, self.height)
                    && fits(1, chroma_width, chroma_height)
                    && fits(2, chroma_width, chroma_height)
            }
            PixelFormat::Nv12 => {
                fits(0, self.width, self.height) && fits(1, chroma_width * 2, chroma_height)
            }
            PixelFormat::Unsupported => false,
        }
    }

    #[inline]
    fn chroma_at(&self, x: usize, chroma_row: usize) -> (u8, u8) {
        let cx = x / 2;
        match self.format {
            PixelFormat::Nv12 => {
                let idx = chroma_row * self.linesize[1] + cx * 2;
                (self.planes[1][idx], self.planes[1][idx + 1])
            }
            _ => (
                self.planes[1][chroma_row * self.linesize[1] + cx],
                self.planes[2][chroma_row * self.linesize[2] + cx],
            ),
        }
    }
}

/// Chroma row feeding luma row `y`. Interlaced 4:2:0 stores chroma per
/// field, so odd and even lines pull from alternating chroma rows.
pub fn chroma_row(y: usize, interlaced: bool, chroma_height: usize) -> usize {
    let mut row = y / 2;
    if interlaced {
        match y % 4 {
            1 => row += 1,
            2 => row = row.saturating_sub(1),
            _ => {}
        }
    }
    row.min(chroma_height.saturating_sub(1))
}

// ============================================================================
// Conversion
// ============================================================================

/// Convert `src` into `dst`, resizing `dst` to the packed frame size
pub fn convert(src: &Picture, format: OutputFormat, color_space: ColorSpace, dst: &mut Vec<u8>) {
    dst.resize(format.buffer_size(src.width, src.height), 0);

    if !src.is_well_formed() {
        tracing::warn!(
            "Cannot convert {:?} {}x{} picture, writing snow",
            src.format,
            src.width,
            src.height
        );
        snow_fill(format, src.width, src.height, dst);
        return;
    }

    match format {
        OutputFormat::Rgb24 | OutputFormat::Rgba32 => to_rgb(src, format, color_space.tables(), dst),
        OutputFormat::Yuyv422 => to_yuyv(src, dst),
    }
}

fn to_rgb(src: &Picture, format: OutputFormat, tables: &YuvTables, dst: &mut [u8]) {
    let bpp = format.bytes_per_pixel();
    let row_bytes = format.row_bytes(src.width);
    let chroma_height = src.chroma_height();

    for (y, out_row) in dst.chunks_exact_mut(row_bytes).take(src.height).enumerate() {
        let luma = &src.planes[0][y * src.linesize[0]..];
        let crow = chroma_row(y, src.interlaced, chroma_height);

        for (x, px) in out_row.chunks_exact_mut(bpp).enumerate() {
            let (u, v) = src.chroma_at(x, crow);
            let [r, g, b] = tables.rgb(luma[x], u, v);
            px[0] = r;
            px[1] = g;
            px[2] = b;
            if bpp == 4 {
                px[3] = 255;
            }
        }
    }
}

fn to_yuyv(src: &Picture, dst: &mut [u8]) {
    let row_bytes = OutputFormat::Yuyv422.row_bytes(src.width);
    let chroma_height = src.chroma_height();
    let last = src.width - 1;

    for (y, out_row) in dst.chunks_exact_mut(row_bytes).take(src.height).enumerate() {
        let luma = &src.planes[0][y * src.linesize[0]..];
        let crow = chroma_row(y, src.interlaced, chroma_height);

        for (pair, px) in out_row.chunks_exact_mut(4).enumerate() {
            let x = pair * 2;
            let (u, v) = src.chroma_at(x, crow);
            px[0] = luma[x];
            px[1] = u;
            px[2] = luma[(x + 1).min(last)];
            px[3] = v;
        }
    }
}

/// Grey noise for pictures we cannot convert
pub fn snow_fill(format: OutputFormat, width: usize, height: usize, dst: &mut Vec<u8>) {
    dst.resize(format.buffer_size(width, height), 0);

    let mut seed: u32 = 0x9E37_79B9;
    let mut next = move || {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;
        (seed >> 24) as u8
    };

    match format {
        OutputFormat::Rgb24 | OutputFormat::Rgba32 => {
            let bpp = format.bytes_per_pixel();
            for px in dst.chunks_exact_mut(bpp) {
                let grey = next();
                px[..3].fill(grey);
                if bpp == 4 {
                    px[3] = 255;
                }
            }
        }
        OutputFormat::Yuyv422 => {
            for px in dst.chunks_exact_mut(4) {
                px[0] = next();
                px[1] = 128;
                px[2] = next();
                px[3] = 128;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb_of(y: u8, u: u8, v: u8, cs: ColorSpace) -> [u8; 3] {
        let mut out = Vec::new();
        convert(&Picture::solid(2, 2, y, u, v), OutputFormat::Rgb24, cs, &mut out);
        [out[0], out[1], out[2]]
    }

    #[test]
    fn test_black_and_white_levels() {
        assert_eq!(rgb_of(16, 128, 128, ColorSpace::Bt601), [0, 0, 0]);
        assert_eq!(rgb_of(235, 128, 128, ColorSpace::Bt601), [255, 255, 255]);
        assert_eq!(rgb_of(235, 128, 128, ColorSpace::Bt709), [255, 255, 255]);
    }

    #[test]
    fn test_bt601_primaries() {
        let [r, g, b] = rgb_of(81, 90, 240, ColorSpace::Bt601);
        assert!(r >= 250 && g <= 5 && b <= 5, "red came out as {r},{g},{b}");

        let [r, g, b] = rgb_of(41, 240, 110, ColorSpace::Bt601);
        assert!(r <= 5 && g <= 5 && b >= 250, "blue came out as {r},{g},{b}");
    }

    #[test]
    fn test_coefficient_tables_match_studio_swing() {
        let t = &*BT601_TABLES;
        assert_eq!(t.y[16], 0);
        assert_eq!(t.cr_r[128], 0);
        // 1.596 * (240 - 128)
        assert_eq!(t.cr_r[240], 179);
        // 2.017 * (240 - 128)
        assert_eq!(t.cb_b[240], 226);
        assert!(t.cb_g[240] < 0 && t.cr_g[240] < 0);
    }

    #[test]
    fn test_rgba_alpha_opaque() {
        let mut out = Vec::new();
        convert(&Picture::solid(4, 2, 128, 128, 128), OutputFormat::Rgba32, ColorSpace::Bt601, &mut out);
        assert_eq!(out.len(), 4 * 2 * 4);
        assert!(out.chunks_exact(4).all(|px| px[3] == 255));
    }

    #[test]
    fn test_yuyv_layout() {
        let y = vec![10, 20, 30, 40];
        let pic = Picture::yuv420p(4, 1, y, vec![100, 101], vec![200, 201]);
        let mut out = Vec::new();
        convert(&pic, OutputFormat::Yuyv422, ColorSpace::Bt601, &mut out);
        assert_eq!(out, vec![10, 100, 20, 200, 30, 101, 40, 201]);
    }

    #[test]
    fn test_yuyv_odd_width_repeats_last_luma() {
        let pic = Picture::yuv420p(3, 1, vec![1, 2, 3], vec![50, 60], vec![70, 80]);
        let mut out = Vec::new();
        convert(&pic, OutputFormat::Yuyv422, ColorSpace::Bt601, &mut out);
        assert_eq!(out, vec![1, 50, 2, 70, 3, 60, 3, 80]);
    }

    #[test]
    fn test_nv12_matches_planar() {
        let planar = Picture::solid(2, 2, 81, 90, 240);
        let nv12 = Picture {
            width: 2,
            height: 2,
            format: PixelFormat::Nv12,
            planes: vec![vec![81; 4], vec![90, 240]],
            linesize: vec![2, 2],
            interlaced: false,
        };
        let (mut a, mut b) = (Vec::new(), Vec::new());
        convert(&planar, OutputFormat::Rgb24, ColorSpace::Bt601, &mut a);
        convert(&nv12, OutputFormat::Rgb24, ColorSpace::Bt601, &mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_interlaced_chroma_rows() {
        let rows: Vec<usize> = (0..8).map(|y| chroma_row(y, true, 4)).collect();
        assert_eq!(rows, vec![0, 1, 0, 1, 2, 3, 2, 3]);

        let progressive: Vec<usize> = (0..8).map(|y| chroma_row(y, false, 4)).collect();
        assert_eq!(progressive, vec![0, 0, 1, 1, 2, 2, 3, 3]);

        // last luma row of an odd field must not read past the chroma plane
        assert_eq!(chroma_row(5, true, 3), 2);
    }

    #[test]
    fn test_unsupported_format_snows() {
        let pic = Picture {
            width: 4,
            height: 4,
            format: PixelFormat::Unsupported,
            planes: Vec::new(),
            linesize: Vec::new(),
            interlaced: false,
        };
        let mut out = Vec::new();
        convert(&pic, OutputFormat::Rgba32, ColorSpace::Bt601, &mut out);
        assert_eq!(out.len(), 64);
        assert!(out.chunks_exact(4).all(|px| px[0] == px[1] && px[1] == px[2] && px[3] == 255));
    }

    #[test]
    fn test_short_plane_is_rejected() {
        let mut pic = Picture::solid(4, 4, 16, 128, 128);
        pic.planes[2].truncate(1);
        assert!(!pic.is_well_formed());
    }

    #[test]
    fn test_buffer_sizes() {
        assert_eq!(OutputFormat::Rgb24.buffer_size(320, 240), 320 * 240 * 3);
        assert_eq!(OutputFormat::Rgba32.buffer_size(320, 240), 320 * 240 * 4);
        assert_eq!(OutputFormat::Yuyv422.buffer_size(321, 2), 161 * 4 * 2);
    }
}
