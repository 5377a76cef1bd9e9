//! Software RGBA8 frame buffer shared by every effect pass.
//!
//! Pixels are stored row-major as straight RGBA bytes, which is the same
//! layout as `image::RgbaImage` and a wgpu `Rgba8Unorm` texture, so the
//! buffer can be uploaded or saved without conversion.

use glam::Vec2;

use crate::color::Color;

/// Compositing rule for a single write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BlendMode {
    /// Standard alpha blending.
    #[default]
    SourceOver,
    /// `dst += src * alpha`, saturating.
    Additive,
    /// `dst = lerp(dst, dst * src, alpha)`.
    Multiply,
}

/// A color stop in a radial gradient. `offset` is in `0.0..=1.0` of the radius.
#[derive(Clone, Copy, Debug)]
pub struct GradientStop {
    pub offset: f32,
    pub color: Color,
}

impl GradientStop {
    pub fn new(offset: f32, color: Color) -> Self {
        Self { offset, color }
    }
}

/// Sample a stop list at `t`. Stops must be sorted by offset.
pub fn sample_gradient(stops: &[GradientStop], t: f32) -> Color {
    let (first, last) = match (stops.first(), stops.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => return Color::TRANSPARENT,
    };
    if t <= first.offset {
        return first.color;
    }
    if t >= last.offset {
        return last.color;
    }
    for pair in stops.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if t <= b.offset {
            let span = (b.offset - a.offset).max(f32::EPSILON);
            return a.color.lerp(b.color, (t - a.offset) / span);
        }
    }
    last.color
}

/// RGBA8 pixel buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct Surface {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
}

impl Surface {
    /// Create a fully transparent surface.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            pixels: vec![0; (width as usize) * (height as usize) * 4],
            width,
            height,
        }
    }

    /// Wrap an existing RGBA8 buffer. Returns `None` if the length doesn't match.
    pub fn from_pixels(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        if pixels.len() != (width as usize) * (height as usize) * 4 {
            return None;
        }
        Some(Self { pixels, width, height })
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    #[inline]
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// Reallocate to a new size. Contents are discarded.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == self.width && height == self.height {
            return;
        }
        *self = Surface::new(width, height);
    }

    /// Reset every pixel to transparent black.
    pub fn clear(&mut self) {
        self.pixels.fill(0);
    }

    /// Overwrite every pixel with `color` (no blending).
    pub fn fill(&mut self, color: Color) {
        let px = color.to_rgba8();
        for chunk in self.pixels.chunks_exact_mut(4) {
            chunk.copy_from_slice(&px);
        }
    }

    #[inline]
    fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        ((y as usize) * (self.width as usize) + x as usize) * 4
    }

    /// Read a pixel, `None` if out of bounds.
    pub fn get_pixel(&self, x: i32, y: i32) -> Option<[u8; 4]> {
        if !self.in_bounds(x, y) {
            return None;
        }
        let i = self.index(x as u32, y as u32);
        Some([
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ])
    }

    /// Overwrite a pixel (bounds checked).
    pub fn set_pixel(&mut self, x: i32, y: i32, px: [u8; 4]) {
        if self.in_bounds(x, y) {
            let i = self.index(x as u32, y as u32);
            self.pixels[i..i + 4].copy_from_slice(&px);
        }
    }

    /// Blend `color` into one pixel using `color.a` as coverage.
    #[inline]
    pub fn blend_pixel(&mut self, x: i32, y: i32, color: Color, mode: BlendMode) {
        if !self.in_bounds(x, y) || color.a <= 0.0 {
            return;
        }
        let i = self.index(x as u32, y as u32);
        blend_into(&mut self.pixels[i..i + 4], color, mode);
    }

    /// Fill an axis-aligned rectangle.
    pub fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, color: Color, mode: BlendMode) {
        let x0 = x.floor().max(0.0) as i32;
        let y0 = y.floor().max(0.0) as i32;
        let x1 = (x + w).ceil().min(self.width as f32) as i32;
        let y1 = (y + h).ceil().min(self.height as f32) as i32;
        for py in y0..y1 {
            for px in x0..x1 {
                self.blend_pixel(px, py, color, mode);
            }
        }
    }

    /// Fill a disc centred on `(cx, cy)`.
    pub fn fill_circle(&mut self, cx: f32, cy: f32, radius: f32, color: Color, mode: BlendMode) {
        if radius <= 0.0 {
            return;
        }
        let r2 = radius * radius;
        let (x0, y0, x1, y1) = self.clip_box(cx - radius, cy - radius, cx + radius, cy + radius);
        for py in y0..y1 {
            for px in x0..x1 {
                let dx = px as f32 + 0.5 - cx;
                let dy = py as f32 + 0.5 - cy;
                if dx * dx + dy * dy <= r2 {
                    self.blend_pixel(px, py, color, mode);
                }
            }
        }
        // Sub-pixel discs still leave a mark
        if radius < 0.75 {
            self.blend_pixel(cx as i32, cy as i32, color.fade(radius / 0.75), mode);
        }
    }

    /// Fill a closed polygon (even-odd rule).
    pub fn fill_polygon(&mut self, points: &[Vec2], color: Color, mode: BlendMode) {
        if points.len() < 3 {
            return;
        }
        let (mut min, mut max) = (points[0], points[0]);
        for p in points {
            min = min.min(*p);
            max = max.max(*p);
        }
        let (x0, y0, x1, y1) = self.clip_box(min.x, min.y, max.x, max.y);
        for py in y0..y1 {
            for px in x0..x1 {
                if point_in_polygon(Vec2::new(px as f32 + 0.5, py as f32 + 0.5), points) {
                    self.blend_pixel(px, py, color, mode);
                }
            }
        }
    }

    /// Fill a disc whose color follows a radial gradient from the centre.
    pub fn fill_radial_gradient(
        &mut self,
        cx: f32,
        cy: f32,
        radius: f32,
        stops: &[GradientStop],
        mode: BlendMode,
    ) {
        if radius <= 0.0 || stops.is_empty() {
            return;
        }
        let (x0, y0, x1, y1) = self.clip_box(cx - radius, cy - radius, cx + radius, cy + radius);
        for py in y0..y1 {
            for px in x0..x1 {
                let dx = px as f32 + 0.5 - cx;
                let dy = py as f32 + 0.5 - cy;
                let t = (dx * dx + dy * dy).sqrt() / radius;
                if t > 1.0 {
                    continue;
                }
                self.blend_pixel(px, py, sample_gradient(stops, t), mode);
            }
        }
    }

    /// Draw a thick segment whose color runs from `start` at `from` to `end` at `to`.
    pub fn draw_line_gradient(
        &mut self,
        from: Vec2,
        to: Vec2,
        width: f32,
        start: Color,
        end: Color,
        mode: BlendMode,
    ) {
        let half = (width * 0.5).max(0.5);
        let seg = to - from;
        let len2 = seg.length_squared();
        let (x0, y0, x1, y1) = self.clip_box(
            from.x.min(to.x) - half,
            from.y.min(to.y) - half,
            from.x.max(to.x) + half,
            from.y.max(to.y) + half,
        );
        for py in y0..y1 {
            for px in x0..x1 {
                let p = Vec2::new(px as f32 + 0.5, py as f32 + 0.5);
                let t = if len2 > 0.0 {
                    ((p - from).dot(seg) / len2).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                if p.distance_squared(from + seg * t) <= half * half {
                    self.blend_pixel(px, py, start.lerp(end, t), mode);
                }
            }
        }
    }

    /// Composite a same-sized layer onto this surface, scaling the layer's
    /// own alpha by `alpha`. Mismatched sizes are ignored.
    pub fn composite(&mut self, layer: &Surface, mode: BlendMode, alpha: f32) {
        if layer.width != self.width || layer.height != self.height || alpha <= 0.0 {
            return;
        }
        for (dst, src) in self
            .pixels
            .chunks_exact_mut(4)
            .zip(layer.pixels.chunks_exact(4))
        {
            if src[3] == 0 {
                continue;
            }
            let color = Color::from_rgba8([src[0], src[1], src[2], src[3]]).fade(alpha);
            blend_into(dst, color, mode);
        }
    }

    /// Composite a raw RGBA8 frame of this surface's size.
    pub fn composite_pixels(&mut self, frame: &[u8], mode: BlendMode, alpha: f32) {
        if frame.len() != self.pixels.len() || alpha <= 0.0 {
            return;
        }
        for (dst, src) in self.pixels.chunks_exact_mut(4).zip(frame.chunks_exact(4)) {
            let color = Color::from_rgba8([src[0], src[1], src[2], src[3]]).fade(alpha);
            blend_into(dst, color, mode);
        }
    }

    /// True if every pixel equals `px`.
    pub fn is_uniform(&self, px: [u8; 4]) -> bool {
        self.pixels.chunks_exact(4).all(|c| c == px)
    }

    fn clip_box(&self, x0: f32, y0: f32, x1: f32, y1: f32) -> (i32, i32, i32, i32) {
        (
            x0.floor().max(0.0) as i32,
            y0.floor().max(0.0) as i32,
            x1.ceil().min(self.width as f32).max(0.0) as i32,
            y1.ceil().min(self.height as f32).max(0.0) as i32,
        )
    }
}

#[inline]
fn blend_into(dst: &mut [u8], src: Color, mode: BlendMode) {
    let a = src.a.clamp(0.0, 1.0);
    let d = [
        dst[0] as f32 / 255.0,
        dst[1] as f32 / 255.0,
        dst[2] as f32 / 255.0,
        dst[3] as f32 / 255.0,
    ];
    let s = [src.r, src.g, src.b];
    let mut out = [0.0f32; 4];
    match mode {
        BlendMode::SourceOver => {
            for c in 0..3 {
                out[c] = s[c] * a + d[c] * (1.0 - a);
            }
            out[3] = a + d[3] * (1.0 - a);
        }
        BlendMode::Additive => {
            for c in 0..3 {
                out[c] = d[c] + s[c] * a;
            }
            out[3] = d[3] + a;
        }
        BlendMode::Multiply => {
            for c in 0..3 {
                out[c] = d[c] * (1.0 - a) + d[c] * s[c] * a;
            }
            out[3] = d[3];
        }
    }
    for c in 0..4 {
        dst[c] = (out[c].clamp(0.0, 1.0) * 255.0).round() as u8;
    }
}

fn point_in_polygon(p: Vec2, poly: &[Vec2]) -> bool {
    let mut inside = false;
    let mut j = poly.len() - 1;
    for i in 0..poly.len() {
        let (a, b) = (poly[i], poly[j]);
        if (a.y > p.y) != (b.y > p.y) && p.x < (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}
