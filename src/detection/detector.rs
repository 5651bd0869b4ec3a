//! 推理后端抽象
//!
//! 检测器消费模型输入大小的RGBA crop,产出crop坐标系的原始检测。
//! 实现由工厂按模型配置与执行后端构造,管线不关心具体推理引擎。

use anyhow::Result;

use crate::detection::types::{Backend, RawDetection};
use crate::models::ModelConfig;

/// 目标检测器。实例归推理工作线程独占,方法按 &mut self 串行调用。
pub trait Detector: Send {
    /// 对一帧模型输入做推理。`rgba`长度为 input_size*input_size*4。
    fn infer(&mut self, rgba: &[u8]) -> Result<Vec<RawDetection>>;

    /// 推理线程数 (部分后端忽略)
    fn set_num_threads(&mut self, num_threads: usize);

    /// 关闭并释放底层资源。关闭后实例不再使用。
    fn close(&mut self) {}
}

/// 检测器工厂。切换模型时先close旧实例再open新实例。
pub trait DetectorFactory: Send {
    fn open(
        &self,
        config: &ModelConfig,
        backend: Backend,
        num_threads: usize,
    ) -> Result<Box<dyn Detector>>;
}
