#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 命令行参数
pub mod detection; // 智能检测系统
pub mod input; // 传感器帧输入
pub mod models; // 模型配置注册表
pub mod pipeline; // 单飞帧管线
pub mod transform; // 仿射裁剪变换

pub use detection::{Backend, BBox, MappedDetection, MultiBoxTracker, RawDetection};
pub use models::{ModelConfig, ModelRegistry};
pub use pipeline::{FrameOutcome, FramePipeline, PipelineOptions, ReconfigRequest};
