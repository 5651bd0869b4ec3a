//! YUV420 → RGBA8888 色彩转换
//!
//! 两种捕获源格式: 三平面 (Camera2风格) 与 亮度+交错色度 (NV21风格)。
//! 色度按2x2亮度块上采样,满幅BT.601系数定点运算,各通道钳制到[0,255]。
//! 中性色度(128,128)时 R=G=B=Y 精确成立。
//!
//! 输出写入调用方提供的复用缓冲,热路径上不做中间分配。

use anyhow::{bail, Result};

use super::{PlaneLayout, StagedFrame};

// 满幅BT.601系数, 16.16定点:
// R = Y + 1.402*(V-128)
// G = Y - 0.344*(U-128) - 0.714*(V-128)
// B = Y + 1.772*(U-128)
const CR_R: i32 = 91881; // 1.402 * 65536
const CB_G: i32 = 22554; // 0.344 * 65536
const CR_G: i32 = 46802; // 0.714 * 65536
const CB_B: i32 = 116130; // 1.772 * 65536

#[inline]
fn yuv2rgba(y: u8, u: u8, v: u8, out: &mut [u8]) {
    let c = y as i32;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let r = c + ((CR_R * e) >> 16);
    let g = c - ((CB_G * d + CR_G * e) >> 16);
    let b = c + ((CB_B * d) >> 16);
    out[0] = r.clamp(0, 255) as u8;
    out[1] = g.clamp(0, 255) as u8;
    out[2] = b.clamp(0, 255) as u8;
    out[3] = 255;
}

/// 按暂存帧的布局分发转换。`out`会被调整为 width*height*4 字节
/// (分辨率不变时复用既有分配)。
pub fn yuv420_to_rgba(frame: &StagedFrame, out: &mut Vec<u8>) -> Result<()> {
    let w = frame.width as usize;
    let h = frame.height as usize;
    if w == 0 || h == 0 {
        bail!("暂存帧为空,无法转换");
    }
    out.resize(w * h * 4, 0);
    match frame.planes() {
        PlaneLayout::Planar {
            y,
            u,
            v,
            y_row_stride,
            uv_row_stride,
            uv_pixel_stride,
        } => convert_planar(
            y,
            u,
            v,
            w,
            h,
            y_row_stride,
            uv_row_stride,
            uv_pixel_stride,
            out,
        ),
        PlaneLayout::InterleavedChroma {
            y,
            chroma,
            y_row_stride,
            chroma_row_stride,
            chroma_pixel_stride,
        } => convert_interleaved(
            y,
            chroma,
            w,
            h,
            y_row_stride,
            chroma_row_stride,
            chroma_pixel_stride,
            out,
        ),
    }
}

/// 三平面变体: Y/U/V各自独立,色度带行间距与像素间距
#[allow(clippy::too_many_arguments)]
pub fn convert_planar(
    y_plane: &[u8],
    u_plane: &[u8],
    v_plane: &[u8],
    width: usize,
    height: usize,
    y_row_stride: usize,
    uv_row_stride: usize,
    uv_pixel_stride: usize,
    out: &mut [u8],
) -> Result<()> {
    check_output(width, height, out)?;
    for j in 0..height {
        let y_row = j * y_row_stride;
        let uv_row = (j >> 1) * uv_row_stride;
        let out_row = j * width * 4;
        for i in 0..width {
            // 行间距可能大于标称宽度,索引必须用间距而非宽度
            let yv = y_plane[y_row + i];
            let uv_off = uv_row + (i >> 1) * uv_pixel_stride;
            let uv = u_plane[uv_off];
            let vv = v_plane[uv_off];
            let o = out_row + i * 4;
            yuv2rgba(yv, uv, vv, &mut out[o..o + 4]);
        }
    }
    Ok(())
}

/// 交错色度变体: 单色度平面V/U交错 (NV21, V在前)
#[allow(clippy::too_many_arguments)]
pub fn convert_interleaved(
    y_plane: &[u8],
    chroma: &[u8],
    width: usize,
    height: usize,
    y_row_stride: usize,
    chroma_row_stride: usize,
    chroma_pixel_stride: usize,
    out: &mut [u8],
) -> Result<()> {
    check_output(width, height, out)?;
    if chroma_pixel_stride < 2 {
        bail!("交错色度像素间距至少为2");
    }
    for j in 0..height {
        let y_row = j * y_row_stride;
        let c_row = (j >> 1) * chroma_row_stride;
        let out_row = j * width * 4;
        for i in 0..width {
            let yv = y_plane[y_row + i];
            let base = c_row + (i >> 1) * chroma_pixel_stride;
            let vv = chroma[base];
            let uv = chroma[base + 1];
            let o = out_row + i * 4;
            yuv2rgba(yv, uv, vv, &mut out[o..o + 4]);
        }
    }
    Ok(())
}

fn check_output(width: usize, height: usize, out: &[u8]) -> Result<()> {
    let need = width * height * 4;
    if out.len() != need {
        bail!("输出缓冲大小不匹配: {} != {}", out.len(), need);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{Rotation, SensorFrame};

    fn planar_frame<'a>(
        y: &'a [u8],
        u: &'a [u8],
        v: &'a [u8],
        w: u32,
        h: u32,
        y_stride: usize,
    ) -> SensorFrame<'a> {
        SensorFrame {
            width: w,
            height: h,
            rotation: Rotation::Deg0,
            planes: PlaneLayout::Planar {
                y,
                u,
                v,
                y_row_stride: y_stride,
                uv_row_stride: w.div_ceil(2) as usize,
                uv_pixel_stride: 1,
            },
        }
    }

    #[test]
    fn test_neutral_chroma_maps_luma_through() {
        // 2x2亮度块235 + 中性色度(128,128) → 近似(235,235,235)
        let y = [235u8; 4];
        let u = [128u8; 1];
        let v = [128u8; 1];
        let mut staged = StagedFrame::default();
        staged
            .copy_from(&planar_frame(&y, &u, &v, 2, 2, 2))
            .unwrap();
        let mut out = Vec::new();
        yuv420_to_rgba(&staged, &mut out).unwrap();
        assert_eq!(out.len(), 16);
        for px in out.chunks_exact(4) {
            assert_eq!(px[0], 235);
            assert_eq!(px[1], 235);
            assert_eq!(px[2], 235);
            assert_eq!(px[3], 255);
        }
    }

    #[test]
    fn test_red_reference_pixel() {
        // 满幅BT.601下纯红约为 Y=76, U=85, V=255
        let y = [76u8; 4];
        let u = [85u8; 1];
        let v = [255u8; 1];
        let mut staged = StagedFrame::default();
        staged
            .copy_from(&planar_frame(&y, &u, &v, 2, 2, 2))
            .unwrap();
        let mut out = Vec::new();
        yuv420_to_rgba(&staged, &mut out).unwrap();
        let px = &out[0..4];
        assert!(px[0] as i32 >= 250, "R={}", px[0]);
        assert!(px[1] as i32 <= 5, "G={}", px[1]);
        assert!(px[2] as i32 <= 5, "B={}", px[2]);
    }

    #[test]
    fn test_row_stride_padding_ignored() {
        // 行间距大于宽度: 填充字节不得进入输出
        let w = 2usize;
        let stride = 8usize;
        let mut y = vec![0xEEu8; stride * 2];
        for j in 0..2 {
            for i in 0..w {
                y[j * stride + i] = 50;
            }
        }
        let u = [128u8; 4];
        let v = [128u8; 4];
        let frame = SensorFrame {
            width: 2,
            height: 2,
            rotation: Rotation::Deg0,
            planes: PlaneLayout::Planar {
                y: &y,
                u: &u,
                v: &v,
                y_row_stride: stride,
                uv_row_stride: 4,
                uv_pixel_stride: 2,
            },
        };
        let mut staged = StagedFrame::default();
        staged.copy_from(&frame).unwrap();
        let mut out = Vec::new();
        yuv420_to_rgba(&staged, &mut out).unwrap();
        for px in out.chunks_exact(4) {
            assert_eq!(px[0], 50);
        }
    }

    #[test]
    fn test_interleaved_variant_matches_planar() {
        // 同一内容分别用两种布局转换,结果一致
        let w = 4u32;
        let h = 2u32;
        let y: Vec<u8> = (0..8).map(|i| 60 + i * 10).collect();
        let u = [90u8, 140u8];
        let v = [200u8, 70u8];
        let mut chroma = Vec::new();
        for k in 0..2 {
            chroma.push(v[k]); // V在前
            chroma.push(u[k]);
        }

        let planar = SensorFrame {
            width: w,
            height: h,
            rotation: Rotation::Deg0,
            planes: PlaneLayout::Planar {
                y: &y,
                u: &u,
                v: &v,
                y_row_stride: 4,
                uv_row_stride: 2,
                uv_pixel_stride: 1,
            },
        };
        let interleaved = SensorFrame {
            width: w,
            height: h,
            rotation: Rotation::Deg0,
            planes: PlaneLayout::InterleavedChroma {
                y: &y,
                chroma: &chroma,
                y_row_stride: 4,
                chroma_row_stride: 4,
                chroma_pixel_stride: 2,
            },
        };

        let mut sa = StagedFrame::default();
        sa.copy_from(&planar).unwrap();
        let mut sb = StagedFrame::default();
        sb.copy_from(&interleaved).unwrap();

        let mut oa = Vec::new();
        let mut ob = Vec::new();
        yuv420_to_rgba(&sa, &mut oa).unwrap();
        yuv420_to_rgba(&sb, &mut ob).unwrap();
        assert_eq!(oa, ob);
    }

    #[test]
    fn test_clamping_extremes() {
        let y = [255u8; 4];
        let u = [255u8; 1];
        let v = [255u8; 1];
        let mut staged = StagedFrame::default();
        staged
            .copy_from(&planar_frame(&y, &u, &v, 2, 2, 2))
            .unwrap();
        let mut out = Vec::new();
        yuv420_to_rgba(&staged, &mut out).unwrap();
        // 全部通道仍在[0,255], B会溢出后被钳制
        assert_eq!(out[0], 255);
        assert_eq!(out[2], 255);
    }
}
