//! 仿射变换模块
//! 帧坐标系 ↔ 模型输入坐标系的仿射映射及其逆映射
//!
//! 前向矩阵: 平移(-w/2,-h/2) → 旋转(传感器方向) → 缩放 → 平移(crop/2,crop/2)。
//! 等比模式取较小的适配比例 (不拉伸,居中留边);逆矩阵一律由前向矩阵
//! 求逆得到,行列式为0视为致命配置错误。

use anyhow::{anyhow, bail, Result};

use crate::input::Rotation;

/// 仿射变换矩阵 (2x3)
/// | a11 a12 b1 |
/// | a21 a22 b2 |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineMatrix {
    pub a11: f32,
    pub a12: f32,
    pub b1: f32,
    pub a21: f32,
    pub a22: f32,
    pub b2: f32,
}

impl AffineMatrix {
    pub fn identity() -> Self {
        Self {
            a11: 1.0,
            a12: 0.0,
            b1: 0.0,
            a21: 0.0,
            a22: 1.0,
            b2: 0.0,
        }
    }

    pub fn translation(dx: f32, dy: f32) -> Self {
        Self {
            a11: 1.0,
            a12: 0.0,
            b1: dx,
            a21: 0.0,
            a22: 1.0,
            b2: dy,
        }
    }

    pub fn scale(sx: f32, sy: f32) -> Self {
        Self {
            a11: sx,
            a12: 0.0,
            b1: 0.0,
            a21: 0.0,
            a22: sy,
            b2: 0.0,
        }
    }

    /// 创建旋转矩阵 (角度制)。
    /// 直角旋转使用精确的0/±1系数,避免cos/sin的浮点误差。
    pub fn rotation_degrees(angle_degrees: f32) -> Self {
        let norm = angle_degrees.rem_euclid(360.0);
        let (sin_a, cos_a) = if norm == 0.0 {
            (0.0, 1.0)
        } else if norm == 90.0 {
            (1.0, 0.0)
        } else if norm == 180.0 {
            (0.0, -1.0)
        } else if norm == 270.0 {
            (-1.0, 0.0)
        } else {
            norm.to_radians().sin_cos()
        };
        Self {
            a11: cos_a,
            a12: -sin_a,
            b1: 0.0,
            a21: sin_a,
            a22: cos_a,
            b2: 0.0,
        }
    }

    /// 应用仿射变换到点 (x, y)
    pub fn transform_point(&self, x: f32, y: f32) -> (f32, f32) {
        let nx = self.a11 * x + self.a12 * y + self.b1;
        let ny = self.a21 * x + self.a22 * y + self.b2;
        (nx, ny)
    }

    /// 矩阵组合 (self * other)
    pub fn compose(&self, other: &Self) -> Self {
        Self {
            a11: self.a11 * other.a11 + self.a12 * other.a21,
            a12: self.a11 * other.a12 + self.a12 * other.a22,
            b1: self.a11 * other.b1 + self.a12 * other.b2 + self.b1,
            a21: self.a21 * other.a11 + self.a22 * other.a21,
            a22: self.a21 * other.a12 + self.a22 * other.a22,
            b2: self.a21 * other.b1 + self.a22 * other.b2 + self.b2,
        }
    }

    /// 计算逆矩阵。行列式为0时返回错误,调用方不得回退到单位矩阵。
    pub fn inverse(&self) -> Result<Self> {
        let det = self.a11 * self.a22 - self.a12 * self.a21;
        if det.abs() < 1e-10 {
            return Err(anyhow!("仿射矩阵不可逆 (det={})", det));
        }
        let inv = 1.0 / det;
        Ok(Self {
            a11: self.a22 * inv,
            a12: -self.a12 * inv,
            b1: (self.a12 * self.b2 - self.a22 * self.b1) * inv,
            a21: -self.a21 * inv,
            a22: self.a11 * inv,
            b2: (self.a21 * self.b1 - self.a11 * self.b2) * inv,
        })
    }
}

/// 前向矩阵(帧→crop)与其逆(crop→帧)的原子对。
/// 两半永远对应同一套裁剪配置,前向矩阵变化时逆矩阵立即重算。
#[derive(Debug, Clone, Copy)]
pub struct TransformPair {
    forward: AffineMatrix,
    inverse: AffineMatrix,
}

impl TransformPair {
    pub fn new(forward: AffineMatrix) -> Result<Self> {
        let inverse = forward.inverse()?;
        Ok(Self { forward, inverse })
    }

    pub fn forward(&self) -> &AffineMatrix {
        &self.forward
    }

    pub fn inverse(&self) -> &AffineMatrix {
        &self.inverse
    }
}

/// 计算帧坐标 → 正方形模型输入坐标的裁剪变换。
///
/// `maintain_aspect` 为真时按较小比例等比适配 (不拉伸,整帧可见,居中),
/// 为假时独立拉伸两轴填满crop。仅在分辨率/方向/crop尺寸变化时调用,
/// 不要每帧重建。
pub fn crop_transform(
    frame_w: u32,
    frame_h: u32,
    crop_size: u32,
    rotation: Rotation,
    maintain_aspect: bool,
) -> Result<TransformPair> {
    if frame_w == 0 || frame_h == 0 {
        bail!("帧分辨率无效: {}x{}", frame_w, frame_h);
    }
    if crop_size == 0 {
        bail!("crop尺寸不能为0");
    }
    let w = frame_w as f32;
    let h = frame_h as f32;
    let cs = crop_size as f32;

    // 旋转后的外接尺寸
    let (rot_w, rot_h) = if rotation.transposes() { (h, w) } else { (w, h) };

    let scale = if maintain_aspect {
        let s = (cs / rot_w).min(cs / rot_h);
        AffineMatrix::scale(s, s)
    } else {
        AffineMatrix::scale(cs / rot_w, cs / rot_h)
    };

    let forward = AffineMatrix::translation(cs / 2.0, cs / 2.0)
        .compose(&scale)
        .compose(&AffineMatrix::rotation_degrees(rotation.degrees() as f32))
        .compose(&AffineMatrix::translation(-w / 2.0, -h / 2.0));

    TransformPair::new(forward)
}

/// 将打包RGBA帧按变换对写入正方形crop缓冲 (反向映射 + 双线性插值)。
/// 映射到帧外的目标像素填不透明黑 (信箱边)。
pub fn warp_rgba(
    src: &[u8],
    src_w: u32,
    src_h: u32,
    pair: &TransformPair,
    crop_size: u32,
    dst: &mut [u8],
) -> Result<()> {
    let sw = src_w as usize;
    let sh = src_h as usize;
    let cs = crop_size as usize;
    if src.len() != sw * sh * 4 {
        bail!("源缓冲大小不匹配: {} != {}", src.len(), sw * sh * 4);
    }
    if dst.len() != cs * cs * 4 {
        bail!("crop缓冲大小不匹配: {} != {}", dst.len(), cs * cs * 4);
    }
    let inv = pair.inverse();
    for dy in 0..cs {
        for dx in 0..cs {
            let (sx, sy) = inv.transform_point(dx as f32, dy as f32);
            let o = (dy * cs + dx) * 4;
            sample_bilinear(src, sw, sh, sx, sy, &mut dst[o..o + 4]);
        }
    }
    Ok(())
}

#[inline]
fn sample_bilinear(src: &[u8], w: usize, h: usize, x: f32, y: f32, out: &mut [u8]) {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    for c in 0..3 {
        let p00 = pixel_or_black(src, w, h, x0, y0, c) as f32;
        let p10 = pixel_or_black(src, w, h, x0 + 1, y0, c) as f32;
        let p01 = pixel_or_black(src, w, h, x0, y0 + 1, c) as f32;
        let p11 = pixel_or_black(src, w, h, x0 + 1, y0 + 1, c) as f32;
        let v0 = p00 * (1.0 - fx) + p10 * fx;
        let v1 = p01 * (1.0 - fx) + p11 * fx;
        out[c] = (v0 * (1.0 - fy) + v1 * fy).clamp(0.0, 255.0) as u8;
    }
    out[3] = 255;
}

#[inline]
fn pixel_or_black(src: &[u8], w: usize, h: usize, x: i64, y: i64, c: usize) -> u8 {
    if x < 0 || y < 0 || x >= w as i64 || y >= h as i64 {
        return 0;
    }
    src[(y as usize * w + x as usize) * 4 + c]
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f32 = 1e-3;

    fn assert_close(a: (f32, f32), b: (f32, f32)) {
        assert!(
            (a.0 - b.0).abs() < TOL && (a.1 - b.1).abs() < TOL,
            "{:?} != {:?}",
            a,
            b
        );
    }

    #[test]
    fn test_identity_and_translation() {
        let (x, y) = AffineMatrix::identity().transform_point(10.0, 20.0);
        assert_eq!((x, y), (10.0, 20.0));
        let (x, y) = AffineMatrix::translation(5.0, -3.0).transform_point(1.0, 1.0);
        assert_eq!((x, y), (6.0, -2.0));
    }

    #[test]
    fn test_right_angle_rotation_exact() {
        let m = AffineMatrix::rotation_degrees(90.0);
        assert_eq!(m.a11, 0.0);
        assert_eq!(m.a21, 1.0);
        let (x, y) = m.transform_point(1.0, 0.0);
        assert_eq!((x, y), (0.0, 1.0));
    }

    #[test]
    fn test_inverse_composes_to_identity() {
        let m = AffineMatrix::translation(5.0, 10.0)
            .compose(&AffineMatrix::rotation_degrees(90.0))
            .compose(&AffineMatrix::scale(2.0, 2.0));
        let inv = m.inverse().unwrap();
        let id = m.compose(&inv);
        assert!((id.a11 - 1.0).abs() < 1e-5);
        assert!((id.a22 - 1.0).abs() < 1e-5);
        assert!(id.b1.abs() < 1e-4 && id.b2.abs() < 1e-4);
    }

    #[test]
    fn test_degenerate_matrix_is_error() {
        let m = AffineMatrix::scale(0.0, 1.0);
        assert!(m.inverse().is_err());
        assert!(TransformPair::new(m).is_err());
    }

    #[test]
    fn test_round_trip_many_configs() {
        let configs = [
            (640u32, 480u32, 416u32, Rotation::Deg0),
            (640, 480, 416, Rotation::Deg90),
            (1280, 720, 320, Rotation::Deg180),
            (480, 640, 416, Rotation::Deg270),
            (640, 640, 640, Rotation::Deg0),
        ];
        for (w, h, cs, rot) in configs {
            let pair = crop_transform(w, h, cs, rot, true).unwrap();
            for (px, py) in [(0.0, 0.0), (w as f32, h as f32), (123.5, 77.25)] {
                let (cx, cy) = pair.forward().transform_point(px, py);
                let back = pair.inverse().transform_point(cx, cy);
                assert_close(back, (px, py));
            }
        }
    }

    #[test]
    fn test_fit_640x480_rot90_into_416() {
        // 旋转后外接480x640,适配比例 416/640 = 0.65,不拉伸,水平居中
        let pair = crop_transform(640, 480, 416, Rotation::Deg90, true).unwrap();
        let center = pair.forward().transform_point(320.0, 240.0);
        assert_close(center, (208.0, 208.0));
        let corner = pair.forward().transform_point(0.0, 0.0);
        assert_close(corner, (364.0, 0.0));
        let corner2 = pair.forward().transform_point(640.0, 480.0);
        assert_close(corner2, (52.0, 416.0));
    }

    #[test]
    fn test_stretch_mode_fills_crop() {
        let pair = crop_transform(640, 480, 416, Rotation::Deg0, false).unwrap();
        assert_close(pair.forward().transform_point(0.0, 0.0), (0.0, 0.0));
        assert_close(
            pair.forward().transform_point(640.0, 480.0),
            (416.0, 416.0),
        );
    }

    #[test]
    fn test_warp_solid_image() {
        // 纯色帧warp后,落在帧内的区域仍为纯色,信箱区域为黑
        let w = 8u32;
        let h = 4u32;
        let src = vec![200u8; (w * h * 4) as usize];
        let mut src_rgba = src;
        for px in src_rgba.chunks_exact_mut(4) {
            px[3] = 255;
        }
        let cs = 8u32;
        let pair = crop_transform(w, h, cs, Rotation::Deg0, true).unwrap();
        let mut dst = vec![0u8; (cs * cs * 4) as usize];
        warp_rgba(&src_rgba, w, h, &pair, cs, &mut dst).unwrap();
        // crop中心在帧内
        let center = ((4 * 8 + 4) * 4) as usize;
        assert_eq!(dst[center], 200);
        // 顶行在信箱区 (帧高4按比例1缩放后垂直居中,顶部留2行黑边)
        assert_eq!(dst[0], 0);
        assert_eq!(dst[3], 255);
    }
}
