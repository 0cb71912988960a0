//! 3x3 projective matrix for 2D point mapping

use super::rect::{PointF, RectF};

const EPSILON: f64 = 1e-12;

/// Row-major 3x3 matrix acting on column vectors `(x, y, 1)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat3 {
    pub m: [[f64; 3]; 3],
}

impl Default for Mat3 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mat3 {
    pub const fn identity() -> Self {
        Self {
            m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    pub const fn from_rows(m: [[f64; 3]; 3]) -> Self {
        Self { m }
    }

    pub fn translate(dx: f64, dy: f64) -> Self {
        Self::from_rows([[1.0, 0.0, dx], [0.0, 1.0, dy], [0.0, 0.0, 1.0]])
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self::from_rows([[sx, 0.0, 0.0], [0.0, sy, 0.0], [0.0, 0.0, 1.0]])
    }

    /// `self * rhs`: `rhs` is applied to points first
    pub fn concat(&self, rhs: &Mat3) -> Mat3 {
        let mut out = [[0.0; 3]; 3];
        for (r, row) in out.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = (0..3).map(|k| self.m[r][k] * rhs.m[k][c]).sum();
            }
        }
        Mat3::from_rows(out)
    }

    pub fn determinant(&self) -> f64 {
        let m = &self.m;
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }

    pub fn inverse(&self) -> Option<Mat3> {
        let det = self.determinant();
        if det.abs() < EPSILON {
            return None;
        }
        let m = &self.m;
        let inv_det = 1.0 / det;
        let adj = [
            [
                m[1][1] * m[2][2] - m[1][2] * m[2][1],
                m[0][2] * m[2][1] - m[0][1] * m[2][2],
                m[0][1] * m[1][2] - m[0][2] * m[1][1],
            ],
            [
                m[1][2] * m[2][0] - m[1][0] * m[2][2],
                m[0][0] * m[2][2] - m[0][2] * m[2][0],
                m[0][2] * m[1][0] - m[0][0] * m[1][2],
            ],
            [
                m[1][0] * m[2][1] - m[1][1] * m[2][0],
                m[0][1] * m[2][0] - m[0][0] * m[2][1],
                m[0][0] * m[1][1] - m[0][1] * m[1][0],
            ],
        ];
        let mut out = [[0.0; 3]; 3];
        for r in 0..3 {
            for c in 0..3 {
                out[r][c] = adj[r][c] * inv_det;
            }
        }
        Some(Mat3::from_rows(out))
    }

    pub fn map_point(&self, p: PointF) -> PointF {
        let (x, y) = (p.x as f64, p.y as f64);
        let m = &self.m;
        let w = m[2][0] * x + m[2][1] * y + m[2][2];
        let w = if w.abs() < EPSILON { EPSILON } else { w };
        PointF::new(
            ((m[0][0] * x + m[0][1] * y + m[0][2]) / w) as f32,
            ((m[1][0] * x + m[1][1] * y + m[1][2]) / w) as f32,
        )
    }

    /// Maps the four corners and returns their bounding box
    pub fn map_rect(&self, rect: &RectF) -> RectF {
        let corners = rect.corners().map(|p| self.map_point(p));
        RectF::bounding(&corners)
    }

    /// Maps the unit square `(0,0) (1,0) (1,1) (0,1)` onto `quad`
    fn square_to_quad(quad: &[PointF; 4]) -> Mat3 {
        let [x0, x1, x2, x3] = quad.map(|p| p.x as f64);
        let [y0, y1, y2, y3] = quad.map(|p| p.y as f64);
        let dx3 = x0 - x1 + x2 - x3;
        let dy3 = y0 - y1 + y2 - y3;

        if dx3.abs() < EPSILON && dy3.abs() < EPSILON {
            return Mat3::from_rows([
                [x1 - x0, x2 - x1, x0],
                [y1 - y0, y2 - y1, y0],
                [0.0, 0.0, 1.0],
            ]);
        }

        let dx1 = x1 - x2;
        let dx2 = x3 - x2;
        let dy1 = y1 - y2;
        let dy2 = y3 - y2;
        let den = dx1 * dy2 - dx2 * dy1;
        let den = if den.abs() < EPSILON { EPSILON } else { den };
        let g = (dx3 * dy2 - dx2 * dy3) / den;
        let h = (dx1 * dy3 - dx3 * dy1) / den;
        Mat3::from_rows([
            [x1 - x0 + g * x1, x3 - x0 + h * x3, x0],
            [y1 - y0 + g * y1, y3 - y0 + h * y3, y0],
            [g, h, 1.0],
        ])
    }

    /// General quadrilateral mapping taking each `src[i]` to `dst[i]`
    ///
    /// Returns `None` when `src` is degenerate (collinear corners).
    pub fn poly_to_poly(src: &[PointF; 4], dst: &[PointF; 4]) -> Option<Mat3> {
        let from_src = Self::square_to_quad(src).inverse()?;
        Some(Self::square_to_quad(dst).concat(&from_src))
    }
}
