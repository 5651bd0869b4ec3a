//! 单飞帧管线
//!
//! 同一时刻至多一帧在处理。捕获线程到帧时先递增序号并请求重绘,
//! 然后尝试准入: 管线空闲则复制平面数据、立即归还捕获源缓冲、
//! 投递给推理工作线程;管线忙则直接丢帧,绝不排队。
//!
//! 工作线程独占检测器、跟踪器与全部转换缓冲。模型切换走同一条
//! 命令通道,先关旧再开新,切换瞬间在途的推理结果按代号作废。

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::detection::{filter_and_map, Backend, Detector, DetectorFactory, Tracker};
use crate::input::convert::yuv420_to_rgba;
use crate::input::{Rotation, SensorFrame, StagedFrame};
use crate::models::ModelRegistry;
use crate::transform::{crop_transform, warp_rgba, TransformPair};

/// 预分配的暂存缓冲数
const STAGING_POOL: usize = 3;
/// 每处理多少帧打印一次统计
const STATS_INTERVAL: u64 = 100;

/// 管线状态机: 空闲 → 拷贝中 → 等待推理 → 空闲
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    Idle = 0,
    Capturing = 1,
    AwaitingInference = 2,
}

/// 原子状态单元。准入是唯一的竞争点,用CAS保证至多一帧通过。
struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(PipelineState::Idle as u8))
    }

    /// 空闲→拷贝中,失败说明有帧在途
    fn try_admit(&self) -> bool {
        self.0
            .compare_exchange(
                PipelineState::Idle as u8,
                PipelineState::Capturing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn set(&self, state: PipelineState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn get(&self) -> PipelineState {
        match self.0.load(Ordering::Acquire) {
            0 => PipelineState::Idle,
            1 => PipelineState::Capturing,
            _ => PipelineState::AwaitingInference,
        }
    }
}

/// 到帧的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// 已投递给推理线程 (携带帧序号)
    Submitted(u64),
    /// 管线忙或帧无效,已丢弃
    Dropped,
}

/// 管线启动参数
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// 初始模型标识
    pub model: String,
    pub backend: Backend,
    pub num_threads: usize,
    /// 低于此置信度的检测被丢弃
    pub min_confidence: f32,
    /// 保持宽高比 (完整画面缩放进crop,黑边补齐)
    pub maintain_aspect: bool,
    /// 调试: 模型输入crop保存到此目录
    pub save_crop: Option<PathBuf>,
}

/// 模型切换请求
#[derive(Debug, Clone)]
pub struct ReconfigRequest {
    pub model: String,
    pub backend: Backend,
    pub num_threads: usize,
    /// 为Some时同时更新置信度阈值
    pub min_confidence: Option<f32>,
}

struct FrameJob {
    staged: StagedFrame,
    seq: u64,
    generation: u64,
}

enum WorkerCommand {
    Frame(FrameJob),
    Reconfigure {
        request: ReconfigRequest,
        reply: Sender<Result<()>>,
    },
    Shutdown,
}

/// 单飞帧管线句柄。`on_frame_available`可在捕获线程调用,
/// 推理与跟踪在内部工作线程完成。
pub struct FramePipeline {
    state: Arc<StateCell>,
    seq: AtomicU64,
    dropped: AtomicU64,
    generation: Arc<AtomicU64>,
    tx: Sender<WorkerCommand>,
    staging_rx: Receiver<StagedFrame>,
    invalidate: Arc<dyn Fn() + Send + Sync>,
    worker: Option<JoinHandle<()>>,
}

impl FramePipeline {
    /// 启动管线并加载初始模型。模型打开失败时启动失败。
    pub fn start(
        options: PipelineOptions,
        registry: ModelRegistry,
        factory: Box<dyn DetectorFactory>,
        tracker: Box<dyn Tracker>,
        invalidate: Arc<dyn Fn() + Send + Sync>,
    ) -> Result<Self> {
        let state = Arc::new(StateCell::new());
        let generation = Arc::new(AtomicU64::new(0));
        let (tx, rx) = unbounded::<WorkerCommand>();
        let (staging_tx, staging_rx) = bounded::<StagedFrame>(STAGING_POOL + 1);
        for _ in 0..STAGING_POOL {
            let _ = staging_tx.send(StagedFrame::default());
        }

        let mut worker = Worker {
            registry,
            factory,
            tracker,
            detector: None,
            crop_size: 0,
            min_confidence: options.min_confidence,
            maintain_aspect: options.maintain_aspect,
            save_crop: options.save_crop.clone(),
            state: Arc::clone(&state),
            generation: Arc::clone(&generation),
            staging_tx,
            invalidate: Arc::clone(&invalidate),
            rgba: Vec::new(),
            crop: Vec::new(),
            cached_transform: None,
            frames_done: 0,
            frames_stale: 0,
        };
        let handle = thread::Builder::new()
            .name("inference".to_string())
            .spawn(move || worker.run(rx))
            .context("启动推理线程失败")?;

        let pipeline = Self {
            state,
            seq: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            generation,
            tx,
            staging_rx,
            invalidate,
            worker: Some(handle),
        };
        pipeline.update_active_model(ReconfigRequest {
            model: options.model,
            backend: options.backend,
            num_threads: options.num_threads,
            min_confidence: Some(options.min_confidence),
        })?;
        Ok(pipeline)
    }

    /// 捕获源每到一帧调用一次。无论接受与否,序号都递增、重绘都触发,
    /// `release`在平面数据不再被借用后恰好调用一次。
    pub fn on_frame_available(
        &self,
        frame: &SensorFrame<'_>,
        release: impl FnOnce(),
    ) -> FrameOutcome {
        let seq = self.seq.fetch_add(1, Ordering::AcqRel) + 1;
        (self.invalidate)();

        if !self.state.try_admit() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            release();
            return FrameOutcome::Dropped;
        }

        let mut staged = self.staging_rx.try_recv().unwrap_or_default();
        if let Err(e) = staged.copy_from(frame) {
            eprintln!("⚠️ 帧#{}无效,丢弃: {}", seq, e);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            release();
            self.state.set(PipelineState::Idle);
            return FrameOutcome::Dropped;
        }
        // 平面数据已复制,立即归还捕获源
        release();

        self.state.set(PipelineState::AwaitingInference);
        let job = FrameJob {
            staged,
            seq,
            generation: self.generation.load(Ordering::Acquire),
        };
        if self.tx.send(WorkerCommand::Frame(job)).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            self.state.set(PipelineState::Idle);
            return FrameOutcome::Dropped;
        }
        FrameOutcome::Submitted(seq)
    }

    /// 切换活动模型。先作废在途推理 (代号递增),再等工作线程完成
    /// 关旧开新。失败时旧模型已关闭,管线保持存活但拒绝推理,
    /// 直到下一次成功切换。
    pub fn update_active_model(&self, request: ReconfigRequest) -> Result<()> {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(WorkerCommand::Reconfigure {
                request,
                reply: reply_tx,
            })
            .map_err(|_| anyhow!("推理线程已退出"))?;
        reply_rx.recv().map_err(|_| anyhow!("推理线程已退出"))?
    }

    /// 管线当前是否空闲 (无帧在途)
    pub fn is_idle(&self) -> bool {
        self.state.get() == PipelineState::Idle
    }

    /// 到帧总数 (含被丢弃的)
    pub fn frames_seen(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }

    /// 被丢弃的帧数
    pub fn frames_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 停止工作线程并等待退出
    pub fn shutdown(&mut self) {
        let _ = self.tx.send(WorkerCommand::Shutdown);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 推理工作线程。检测器、跟踪器、转换缓冲全部线程独占。
struct Worker {
    registry: ModelRegistry,
    factory: Box<dyn DetectorFactory>,
    tracker: Box<dyn Tracker>,
    detector: Option<Box<dyn Detector>>,
    crop_size: u32,
    min_confidence: f32,
    maintain_aspect: bool,
    save_crop: Option<PathBuf>,
    state: Arc<StateCell>,
    generation: Arc<AtomicU64>,
    staging_tx: Sender<StagedFrame>,
    invalidate: Arc<dyn Fn() + Send + Sync>,
    /// 整帧RGBA缓冲 (分辨率不变时复用)
    rgba: Vec<u8>,
    /// 模型输入crop缓冲
    crop: Vec<u8>,
    /// 按(宽,高,方向,crop边长)缓存的变换对
    cached_transform: Option<(u32, u32, Rotation, u32, TransformPair)>,
    frames_done: u64,
    frames_stale: u64,
}

impl Worker {
    fn run(&mut self, rx: Receiver<WorkerCommand>) {
        while let Ok(cmd) = rx.recv() {
            match cmd {
                WorkerCommand::Frame(job) => {
                    if let Err(e) = self.process(job) {
                        eprintln!("❌ 帧处理失败: {:#}", e);
                    }
                    self.state.set(PipelineState::Idle);
                }
                WorkerCommand::Reconfigure { request, reply } => {
                    let _ = reply.send(self.apply(request));
                }
                WorkerCommand::Shutdown => break,
            }
        }
        if let Some(mut det) = self.detector.take() {
            det.close();
        }
    }

    fn process(&mut self, job: FrameJob) -> Result<()> {
        let FrameJob {
            staged,
            seq,
            generation,
        } = job;
        let result = self.process_staged(&staged, seq, generation);
        // 缓冲归还池子,池满则任其释放
        let _ = self.staging_tx.try_send(staged);
        result
    }

    fn process_staged(&mut self, staged: &StagedFrame, seq: u64, generation: u64) -> Result<()> {
        if self.detector.is_none() {
            bail!("无活动模型,帧#{}被丢弃", seq);
        }
        // 投递后发生过模型切换,帧按旧几何准入,直接作废
        if generation != self.generation.load(Ordering::Acquire) {
            self.frames_stale += 1;
            return Ok(());
        }

        yuv420_to_rgba(staged, &mut self.rgba)?;

        let pair = self.transform_for(staged.width, staged.height, staged.rotation)?;
        let need = (self.crop_size as usize) * (self.crop_size as usize) * 4;
        self.crop.resize(need, 0);
        warp_rgba(
            &self.rgba,
            staged.width,
            staged.height,
            &pair,
            self.crop_size,
            &mut self.crop,
        )?;

        if let Some(dir) = &self.save_crop {
            save_crop_png(dir, seq, self.crop_size, &self.crop);
        }

        let raw = match self.detector.as_mut() {
            Some(detector) => detector.infer(&self.crop)?,
            None => return Ok(()),
        };

        // 推理期间发生过模型切换,结果作废,不进跟踪器
        if generation != self.generation.load(Ordering::Acquire) {
            self.frames_stale += 1;
            return Ok(());
        }

        let mapped = filter_and_map(&raw, self.min_confidence, pair.inverse());
        self.tracker.track(&mapped, seq);
        (self.invalidate)();

        self.frames_done += 1;
        if self.frames_done % STATS_INTERVAL == 0 {
            println!(
                "📊 已推理{}帧, 作废{}帧, 本帧检出{}个目标",
                self.frames_done,
                self.frames_stale,
                mapped.len()
            );
        }
        Ok(())
    }

    /// 几何不变时复用缓存的变换对
    fn transform_for(&mut self, w: u32, h: u32, rotation: Rotation) -> Result<TransformPair> {
        if let Some((cw, ch, cr, cs, pair)) = &self.cached_transform {
            if *cw == w && *ch == h && *cr == rotation && *cs == self.crop_size {
                return Ok(pair.clone());
            }
        }
        let pair = crop_transform(w, h, self.crop_size, rotation, self.maintain_aspect)?;
        self.cached_transform = Some((w, h, rotation, self.crop_size, pair.clone()));
        Ok(pair)
    }

    /// 关旧开新。先关旧再查表开新,切换中任何一步失败都让管线
    /// 处于无活动模型状态,帧被拒绝直到下次成功切换。
    fn apply(&mut self, request: ReconfigRequest) -> Result<()> {
        if let Some(mut old) = self.detector.take() {
            old.close();
        }
        self.cached_transform = None;

        let config = self.registry.lookup(&request.model)?.clone();
        if let Some(conf) = request.min_confidence {
            self.min_confidence = conf;
        }

        let mut detector = self
            .factory
            .open(&config, request.backend, request.num_threads)
            .with_context(|| format!("打开模型{}失败", config.id))?;
        detector.set_num_threads(request.num_threads);
        self.crop_size = config.input_size;
        self.detector = Some(detector);
        println!(
            "✅ 模型已切换: {} ({}, {}线程, 输入{}x{})",
            config.id,
            request.backend.name(),
            request.num_threads,
            config.input_size,
            config.input_size
        );
        Ok(())
    }
}

fn save_crop_png(dir: &std::path::Path, seq: u64, crop_size: u32, crop: &[u8]) {
    let path = dir.join(format!("crop-{:06}.png", seq));
    match image::RgbaImage::from_raw(crop_size, crop_size, crop.to_vec()) {
        Some(img) => {
            if let Err(e) = img.save(&path) {
                eprintln!("⚠️ 保存crop失败 {}: {}", path.display(), e);
            }
        }
        None => eprintln!("⚠️ crop缓冲大小异常,跳过保存"),
    }
}
