/// 无头冒烟运行
///
/// 合成YUV帧源 + 合成检测器,走完整条管线:
/// 准入 → 平面拷贝 → 色彩转换 → 仿射crop → 推理 → 过滤映射 → 跟踪。
/// 用于在无摄像头、无真实模型的环境下验证管线行为与吞吐。
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use clap::Parser;
use mimalloc::MiMalloc;

use yolov5_detect_rs::config::Args;
use yolov5_detect_rs::detection::{
    Backend, BBox, Detector, DetectorFactory, MultiBoxTracker, RawDetection, Tracker,
};
use yolov5_detect_rs::input::{PlaneLayout, Rotation, SensorFrame};
use yolov5_detect_rs::models::{ModelConfig, ModelRegistry};
use yolov5_detect_rs::pipeline::{FramePipeline, PipelineOptions, ReconfigRequest};
use yolov5_detect_rs::MappedDetection;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// 合成帧源: 灰底上一个移动的高亮方块
struct SyntheticSource {
    width: u32,
    height: u32,
    y: Vec<u8>,
    u: Vec<u8>,
    v: Vec<u8>,
}

impl SyntheticSource {
    fn new(width: u32, height: u32) -> Self {
        let (w, h) = (width as usize, height as usize);
        Self {
            width,
            height,
            y: vec![0; w * h],
            u: vec![128; w.div_ceil(2) * h.div_ceil(2)],
            v: vec![128; w.div_ceil(2) * h.div_ceil(2)],
        }
    }

    /// 渲染第tick帧并借出平面视图
    fn frame(&mut self, tick: u64, rotation: Rotation) -> SensorFrame<'_> {
        let (w, h) = (self.width as usize, self.height as usize);
        self.y.fill(90);
        // 方块边长不超过短边,窄高帧下游走范围退化为0
        let side = (h / 4).clamp(1, w.min(h));
        let x0 = (tick as usize * 3) % (w - side + 1);
        let y0 = (tick as usize * 2) % (h - side + 1);
        for j in y0..y0 + side {
            for i in x0..x0 + side {
                self.y[j * w + i] = 235;
            }
        }
        SensorFrame {
            width: self.width,
            height: self.height,
            rotation,
            planes: PlaneLayout::Planar {
                y: &self.y,
                u: &self.u,
                v: &self.v,
                y_row_stride: w,
                uv_row_stride: w.div_ceil(2),
                uv_pixel_stride: 1,
            },
        }
    }
}

/// 合成检测器: 在crop里找高亮像素的外接框
struct SyntheticDetector;

impl Detector for SyntheticDetector {
    fn infer(&mut self, rgba: &[u8]) -> Result<Vec<RawDetection>> {
        let size = ((rgba.len() / 4) as f64).sqrt() as usize;
        let mut x1 = usize::MAX;
        let mut y1 = usize::MAX;
        let mut x2 = 0usize;
        let mut y2 = 0usize;
        for j in 0..size {
            for i in 0..size {
                if rgba[(j * size + i) * 4] > 200 {
                    x1 = x1.min(i);
                    y1 = y1.min(j);
                    x2 = x2.max(i + 1);
                    y2 = y2.max(j + 1);
                }
            }
        }
        if x1 == usize::MAX {
            return Ok(vec![]);
        }
        Ok(vec![RawDetection {
            class_id: 0,
            confidence: 0.9,
            bbox: Some(BBox::new(x1 as f32, y1 as f32, x2 as f32, y2 as f32)),
        }])
    }

    fn set_num_threads(&mut self, _num_threads: usize) {}
}

struct SyntheticFactory;

impl DetectorFactory for SyntheticFactory {
    fn open(
        &self,
        config: &ModelConfig,
        backend: Backend,
        num_threads: usize,
    ) -> Result<Box<dyn Detector>> {
        println!(
            "🚀 打开合成检测器: {} ({}, {}线程)",
            config.id,
            backend.name(),
            num_threads
        );
        Ok(Box::new(SyntheticDetector))
    }
}

/// 周期性打印活跃轨迹的跟踪器包装
struct LoggingTracker {
    inner: MultiBoxTracker,
}

impl Tracker for LoggingTracker {
    fn track(&mut self, detections: &[MappedDetection], timestamp: u64) {
        self.inner.track(detections, timestamp);
        if timestamp % 60 == 0 {
            for t in self.inner.tracked() {
                println!(
                    "🎯 帧#{} 轨迹{} 类别{} 置信度{:.2} {}",
                    timestamp, t.track_id, t.class_id, t.confidence, t.bbox
                );
            }
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.width == 0 || args.height == 0 {
        bail!("帧分辨率无效: {}x{}", args.width, args.height);
    }
    println!(
        "⏱️ {} 启动无头管线: {}x{} rot{} model={}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        args.width,
        args.height,
        args.rotation,
        args.model
    );

    let mut registry = ModelRegistry::builtin();
    if let Some(path) = &args.models_json {
        let n = registry.extend_from_json(path)?;
        println!("📦 注册表合并{}条额外模型", n);
    }
    if let Some(dir) = &args.save_crop {
        std::fs::create_dir_all(dir)?;
    }

    let backend: Backend = args.device.parse()?;
    let rotation = Rotation::from_degrees(args.rotation)?;
    let renders = Arc::new(AtomicU64::new(0));
    let r = Arc::clone(&renders);

    let pipeline = FramePipeline::start(
        PipelineOptions {
            model: args.model.clone(),
            backend,
            num_threads: args.threads,
            min_confidence: args.conf,
            maintain_aspect: !args.stretch,
            save_crop: args.save_crop.clone(),
        },
        registry,
        Box::new(SyntheticFactory),
        Box::new(LoggingTracker {
            inner: MultiBoxTracker::new(),
        }),
        Arc::new(move || {
            r.fetch_add(1, Ordering::Relaxed);
        }),
    )?;

    // 中途演示一次模型热切换
    let switch_at = args.frames / 2;
    let mut source = SyntheticSource::new(args.width, args.height);
    let started = Instant::now();
    for tick in 0..args.frames {
        if tick == switch_at && pipeline.frames_seen() > 0 {
            pipeline.update_active_model(ReconfigRequest {
                model: args.model.clone(),
                backend,
                num_threads: args.threads,
                min_confidence: None,
            })?;
        }
        let frame = source.frame(tick, rotation);
        pipeline.on_frame_available(&frame, || {});
        thread::sleep(Duration::from_millis(10));
    }

    while !pipeline.is_idle() {
        thread::sleep(Duration::from_millis(1));
    }
    let elapsed = started.elapsed().as_secs_f64();
    let seen = pipeline.frames_seen();
    let dropped = pipeline.frames_dropped();
    println!(
        "✅ 结束: 到帧{} 丢弃{} ({:.1}%) 重绘{} 用时{:.1}s",
        seen,
        dropped,
        100.0 * dropped as f64 / seen.max(1) as f64,
        renders.load(Ordering::Relaxed),
        elapsed
    );
    Ok(())
}
