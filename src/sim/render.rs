// src/sim/render.rs
//
// Minimal top-down raster used by the trace engine.
//
// Frames are H x W x C u8 arrays (row 0 at the top, +y world axis up).

use ndarray::{Array3, Axis};

/// One rendered observation frame (H x W x C).
pub type Frame = Array3<u8>;

pub type Rgb = [u8; 3];

pub const BACKGROUND: Rgb = [0, 0, 0];
pub const ROAD: Rgb = [128, 128, 128];
pub const EXPERT_VEHICLE: Rgb = [70, 130, 180];
pub const CONTROLLED_VEHICLE: Rgb = [220, 20, 60];
pub const NON_VEHICLE: Rgb = [50, 205, 50];
pub const GOAL: Rgb = [255, 215, 0];
pub const STOP_SIGN: Rgb = [255, 0, 0];
pub const TRAFFIC_LIGHT: Rgb = [255, 255, 0];

/// Reduce an RGB frame to a single ITU-R BT.601 luma channel (H x W x 1).
/// Single-channel input is returned unchanged.
pub fn to_grayscale(frame: &Frame) -> Frame {
    let (h, w, c) = frame.dim();
    if c < 3 {
        return frame.clone();
    }
    let mut out = Array3::<u8>::zeros((h, w, 1));
    for ((row, col), px) in out
        .index_axis_mut(Axis(2), 0)
        .indexed_iter_mut()
    {
        let r = frame[[row, col, 0]] as f32;
        let g = frame[[row, col, 1]] as f32;
        let b = frame[[row, col, 2]] as f32;
        *px = (0.299 * r + 0.587 * g + 0.114 * b).round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Affine map from world metres to pixel coordinates.
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    /// World coordinate drawn at the image centre.
    pub center_x: f32,
    pub center_y: f32,
    /// Pixels per metre.
    pub scale: f32,
    /// Rotation applied around the centre (radians, counter-clockwise).
    pub rotation: f32,
    pub width: usize,
    pub height: usize,
}

impl Viewport {
    /// Fit a world-space bounding box (plus padding) into the frame,
    /// preserving aspect ratio.
    pub fn fit(
        min: (f32, f32),
        max: (f32, f32),
        padding: f32,
        width: usize,
        height: usize,
    ) -> Self {
        let span_x = (max.0 - min.0 + 2.0 * padding).max(1e-3);
        let span_y = (max.1 - min.1 + 2.0 * padding).max(1e-3);
        let scale = (width as f32 / span_x).min(height as f32 / span_y);
        Self {
            center_x: (min.0 + max.0) / 2.0,
            center_y: (min.1 + max.1) / 2.0,
            scale,
            rotation: 0.0,
            width,
            height,
        }
    }

    /// World point to fractional (col, row).
    pub fn to_pixel(&self, x: f32, y: f32) -> (f32, f32) {
        let (dx, dy) = rotate(x - self.center_x, y - self.center_y, -self.rotation);
        let col = self.width as f32 / 2.0 + dx * self.scale;
        let row = self.height as f32 / 2.0 - dy * self.scale;
        (col, row)
    }

    /// Pixel centre back to world coordinates.
    pub fn to_world(&self, col: usize, row: usize) -> (f32, f32) {
        let dx = (col as f32 + 0.5 - self.width as f32 / 2.0) / self.scale;
        let dy = (self.height as f32 / 2.0 - row as f32 - 0.5) / self.scale;
        let (rx, ry) = rotate(dx, dy, self.rotation);
        (rx + self.center_x, ry + self.center_y)
    }
}

pub fn rotate(x: f32, y: f32, theta: f32) -> (f32, f32) {
    let (s, c) = theta.sin_cos();
    (x * c - y * s, x * s + y * c)
}

/// RGB drawing surface.
pub struct Canvas {
    frame: Frame,
}

impl Canvas {
    pub fn new(width: usize, height: usize) -> Self {
        let frame = Array3::from_shape_fn((height, width, 3), |(_, _, ch)| BACKGROUND[ch]);
        Self { frame }
    }

    pub fn width(&self) -> usize {
        self.frame.dim().1
    }

    pub fn height(&self) -> usize {
        self.frame.dim().0
    }

    pub fn set(&mut self, col: usize, row: usize, color: Rgb) {
        if row < self.height() && col < self.width() {
            for (ch, v) in color.iter().enumerate() {
                self.frame[[row, col, ch]] = *v;
            }
        }
    }

    /// Square dot of the given pixel radius (at least one pixel).
    pub fn dot(&mut self, view: &Viewport, x: f32, y: f32, radius_px: i64, color: Rgb) {
        let (c, r) = view.to_pixel(x, y);
        let (c, r) = (c.floor() as i64, r.floor() as i64);
        for row in (r - radius_px)..=(r + radius_px) {
            for col in (c - radius_px)..=(c + radius_px) {
                if row >= 0 && col >= 0 {
                    self.set(col as usize, row as usize, color);
                }
            }
        }
    }

    /// Filled rectangle of world size `length` x `width`, oriented along
    /// `heading`, centred on (x, y).
    pub fn oriented_rect(
        &mut self,
        view: &Viewport,
        center: (f32, f32),
        heading: f32,
        length: f32,
        width: f32,
        color: Rgb,
    ) {
        let half_l = length / 2.0;
        let half_w = width / 2.0;
        let radius = (half_l * half_l + half_w * half_w).sqrt();
        let (c0, r0) = view.to_pixel(center.0 - radius, center.1 + radius);
        let (c1, r1) = view.to_pixel(center.0 + radius, center.1 - radius);
        let (col_lo, col_hi) = (c0.min(c1).floor() as i64 - 1, c0.max(c1).ceil() as i64 + 1);
        let (row_lo, row_hi) = (r0.min(r1).floor() as i64 - 1, r0.max(r1).ceil() as i64 + 1);

        let mut painted = false;
        for row in row_lo.max(0)..=row_hi.min(self.height() as i64 - 1) {
            for col in col_lo.max(0)..=col_hi.min(self.width() as i64 - 1) {
                let (wx, wy) = view.to_world(col as usize, row as usize);
                let (lx, ly) = rotate(wx - center.0, wy - center.1, -heading);
                if lx.abs() <= half_l && ly.abs() <= half_w {
                    self.set(col as usize, row as usize, color);
                    painted = true;
                }
            }
        }
        // Sub-pixel objects still get one pixel.
        if !painted {
            self.dot(view, center.0, center.1, 0, color);
        }
    }

    /// Blank every pixel whose world point fails `keep`.
    pub fn mask(&mut self, view: &Viewport, keep: impl Fn(f32, f32) -> bool) {
        for row in 0..self.height() {
            for col in 0..self.width() {
                let (wx, wy) = view.to_world(col, row);
                if !keep(wx, wy) {
                    self.set(col, row, BACKGROUND);
                }
            }
        }
    }

    pub fn into_frame(self) -> Frame {
        self.frame
    }
}
