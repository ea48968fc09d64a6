//! Eye-based face alignment.
//!
//! Two eye centres fix a 4-DOF similarity transform (scale, rotation,
//! translation) onto canonical eye positions; the face is then resampled into
//! a square crop with bilinear interpolation.

use crate::types::EyeLandmarks;

/// Canonical eye positions inside a square crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignmentTarget {
    pub size: usize,
    /// Where the subject's right eye lands (image left).
    pub right_eye: (f32, f32),
    pub left_eye: (f32, f32),
}

/// ArcFace 112×112 reference eye positions.
pub const ARCFACE_112: AlignmentTarget = AlignmentTarget {
    size: 112,
    right_eye: (38.2946, 51.6963),
    left_eye: (73.5318, 51.5014),
};

impl AlignmentTarget {
    /// Eyes placed symmetrically at `x_frac` from each side and `y_frac` from the top.
    pub fn relative(size: usize, x_frac: f32, y_frac: f32) -> Self {
        let s = size as f32;
        Self {
            size,
            right_eye: (s * x_frac, s * y_frac),
            left_eye: (s * (1.0 - x_frac), s * y_frac),
        }
    }
}

/// `x' = a·x − b·y + tx`, `y' = b·x + a·y + ty`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SimilarityTransform {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl SimilarityTransform {
    /// The unique transform taking `src` points onto `dst` points.
    /// `None` if the source points coincide.
    fn between(src: [(f32, f32); 2], dst: [(f32, f32); 2]) -> Option<Self> {
        let (sx, sy) = (src[1].0 - src[0].0, src[1].1 - src[0].1);
        let (dx, dy) = (dst[1].0 - dst[0].0, dst[1].1 - dst[0].1);
        let len2 = sx * sx + sy * sy;
        if len2 < 1e-12 {
            return None;
        }
        // (a + ib) = d / s as complex numbers.
        let a = (dx * sx + dy * sy) / len2;
        let b = (dy * sx - dx * sy) / len2;
        let tx = dst[0].0 - (a * src[0].0 - b * src[0].1);
        let ty = dst[0].1 - (b * src[0].0 + a * src[0].1);
        Some(Self { a, b, tx, ty })
    }

    fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    fn inverse(&self) -> Option<Self> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let a = self.a / det;
        let b = -self.b / det;
        Some(Self {
            a,
            b,
            tx: -(a * self.tx - b * self.ty),
            ty: -(b * self.tx + a * self.ty),
        })
    }
}

/// Bilinear sample of a grayscale image; outside pixels read as black.
fn sample(gray: &[u8], width: usize, height: usize, x: f32, y: f32) -> f32 {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let px = |xi: f32, yi: f32| -> f32 {
        if xi < 0.0 || yi < 0.0 || xi >= width as f32 || yi >= height as f32 {
            return 0.0;
        }
        gray.get(yi as usize * width + xi as usize)
            .map_or(0.0, |&p| p as f32)
    };
    let top = px(x0, y0) * (1.0 - fx) + px(x0 + 1.0, y0) * fx;
    let bottom = px(x0, y0 + 1.0) * (1.0 - fx) + px(x0 + 1.0, y0 + 1.0) * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Warp `gray` so the eyes land on `target`'s eye positions.
///
/// Returns `target.size²` grayscale bytes, or `None` if the eyes coincide.
pub fn align_eyes(
    gray: &[u8],
    width: u32,
    height: u32,
    eyes: &EyeLandmarks,
    target: &AlignmentTarget,
) -> Option<Vec<u8>> {
    let forward = SimilarityTransform::between(
        [eyes.right, eyes.left],
        [target.right_eye, target.left_eye],
    )?;
    let back = forward.inverse()?;
    let (w, h) = (width as usize, height as usize);

    let mut out = Vec::with_capacity(target.size * target.size);
    for oy in 0..target.size {
        for ox in 0..target.size {
            let (sx, sy) = back.apply((ox as f32, oy as f32));
            out.push(sample(gray, w, h, sx, sy).round().clamp(0.0, 255.0) as u8);
        }
    }
    Some(out)
}
