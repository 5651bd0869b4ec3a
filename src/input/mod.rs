//! 传感器帧输入模块
//! Sensor frame input: plane layouts delivered by the capture source.
//!
//! 捕获源每个tick推送一帧YUV420数据,平面数据仅在一次转换调用期间被借用,
//! 之后必须归还给捕获源 (releaseBuffer语义由管线负责)。

pub mod convert;

use anyhow::{bail, Result};

/// 传感器方向提示 (相对屏幕的旋转角度)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: u32) -> Result<Self> {
        match degrees % 360 {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => bail!("无效的传感器方向: {}° (仅支持0/90/180/270)", other),
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// 旋转90°或270°时宽高互换
    pub fn transposes(&self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// YUV420平面布局 (两种捕获源格式)
#[derive(Debug, Clone, Copy)]
pub enum PlaneLayout<'a> {
    /// 三独立平面 (Camera2风格): Y + U + V,各自带行间距,
    /// 色度平面另带像素间距以兼容带间隙的交错布局
    Planar {
        y: &'a [u8],
        u: &'a [u8],
        v: &'a [u8],
        y_row_stride: usize,
        uv_row_stride: usize,
        uv_pixel_stride: usize,
    },
    /// 亮度平面 + 交错色度平面 (NV21风格, V在前):
    /// chroma[base] = V, chroma[base + 1] = U
    InterleavedChroma {
        y: &'a [u8],
        chroma: &'a [u8],
        y_row_stride: usize,
        chroma_row_stride: usize,
        chroma_pixel_stride: usize,
    },
}

/// 捕获源推送的一帧 (平面只读借用)
#[derive(Debug, Clone, Copy)]
pub struct SensorFrame<'a> {
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
    pub planes: PlaneLayout<'a>,
}

impl<'a> SensorFrame<'a> {
    /// 校验平面尺寸与行间距是否覆盖标称分辨率。
    /// 行间距允许大于标称宽度 (行尾填充),索引必须按间距计算。
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!("帧分辨率无效: {}x{}", self.width, self.height);
        }
        let w = self.width as usize;
        let h = self.height as usize;
        let cw = w.div_ceil(2);
        let ch = h.div_ceil(2);
        match self.planes {
            PlaneLayout::Planar {
                y,
                u,
                v,
                y_row_stride,
                uv_row_stride,
                uv_pixel_stride,
            } => {
                if y_row_stride < w {
                    bail!("Y行间距{}小于宽度{}", y_row_stride, w);
                }
                if uv_pixel_stride == 0 {
                    bail!("色度像素间距不能为0");
                }
                let y_need = (h - 1) * y_row_stride + w;
                let uv_need = (ch - 1) * uv_row_stride + (cw - 1) * uv_pixel_stride + 1;
                if y.len() < y_need {
                    bail!("Y平面过小: {} < {}", y.len(), y_need);
                }
                if u.len() < uv_need || v.len() < uv_need {
                    bail!("色度平面过小 (需要至少{}字节)", uv_need);
                }
            }
            PlaneLayout::InterleavedChroma {
                y,
                chroma,
                y_row_stride,
                chroma_row_stride,
                chroma_pixel_stride,
            } => {
                if y_row_stride < w {
                    bail!("Y行间距{}小于宽度{}", y_row_stride, w);
                }
                if chroma_pixel_stride < 2 {
                    bail!("交错色度像素间距至少为2 (V+U)");
                }
                let y_need = (h - 1) * y_row_stride + w;
                let c_need = (ch - 1) * chroma_row_stride + (cw - 1) * chroma_pixel_stride + 2;
                if y.len() < y_need {
                    bail!("Y平面过小: {} < {}", y.len(), y_need);
                }
                if chroma.len() < c_need {
                    bail!("交错色度平面过小: {} < {}", chroma.len(), c_need);
                }
            }
        }
        Ok(())
    }
}

/// 平面数据的自有拷贝 (生产者线程复制后立即归还捕获源缓冲,
/// 工作线程再做色彩转换)。缓冲在管线内循环复用,避免每帧分配。
#[derive(Debug, Default)]
pub struct StagedFrame {
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
    layout: StagedLayout,
    plane_a: Vec<u8>,
    plane_b: Vec<u8>,
    plane_c: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default)]
enum StagedLayout {
    #[default]
    Empty,
    Planar {
        y_row_stride: usize,
        uv_row_stride: usize,
        uv_pixel_stride: usize,
    },
    InterleavedChroma {
        y_row_stride: usize,
        chroma_row_stride: usize,
        chroma_pixel_stride: usize,
    },
}

impl StagedFrame {
    /// 复制一帧的全部平面数据。复用已有Vec容量,分辨率不变时不再分配。
    pub fn copy_from(&mut self, frame: &SensorFrame<'_>) -> Result<()> {
        frame.validate()?;
        self.width = frame.width;
        self.height = frame.height;
        self.rotation = frame.rotation;
        match frame.planes {
            PlaneLayout::Planar {
                y,
                u,
                v,
                y_row_stride,
                uv_row_stride,
                uv_pixel_stride,
            } => {
                Self::fill(&mut self.plane_a, y);
                Self::fill(&mut self.plane_b, u);
                Self::fill(&mut self.plane_c, v);
                self.layout = StagedLayout::Planar {
                    y_row_stride,
                    uv_row_stride,
                    uv_pixel_stride,
                };
            }
            PlaneLayout::InterleavedChroma {
                y,
                chroma,
                y_row_stride,
                chroma_row_stride,
                chroma_pixel_stride,
            } => {
                Self::fill(&mut self.plane_a, y);
                Self::fill(&mut self.plane_b, chroma);
                self.plane_c.clear();
                self.layout = StagedLayout::InterleavedChroma {
                    y_row_stride,
                    chroma_row_stride,
                    chroma_pixel_stride,
                };
            }
        }
        Ok(())
    }

    /// 以借用视图重建平面布局 (供色彩转换使用)
    pub fn planes(&self) -> PlaneLayout<'_> {
        match self.layout {
            StagedLayout::Planar {
                y_row_stride,
                uv_row_stride,
                uv_pixel_stride,
            } => PlaneLayout::Planar {
                y: &self.plane_a,
                u: &self.plane_b,
                v: &self.plane_c,
                y_row_stride,
                uv_row_stride,
                uv_pixel_stride,
            },
            StagedLayout::InterleavedChroma {
                y_row_stride,
                chroma_row_stride,
                chroma_pixel_stride,
            } => PlaneLayout::InterleavedChroma {
                y: &self.plane_a,
                chroma: &self.plane_b,
                y_row_stride,
                chroma_row_stride,
                chroma_pixel_stride,
            },
            StagedLayout::Empty => PlaneLayout::Planar {
                y: &[],
                u: &[],
                v: &[],
                y_row_stride: 0,
                uv_row_stride: 0,
                uv_pixel_stride: 1,
            },
        }
    }

    fn fill(dst: &mut Vec<u8>, src: &[u8]) {
        dst.clear();
        dst.extend_from_slice(src);
    }
}
