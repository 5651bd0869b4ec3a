//! 命令行参数

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "YOLOv5实时检测管线 (无头冒烟运行)")]
pub struct Args {
    /// 模型标识 (见内置注册表)
    #[arg(long, default_value = "yolov5s.tflite")]
    pub model: String,

    /// 推理后端: CPU / GPU / NNAPI
    #[arg(long, default_value = "CPU")]
    pub device: String,

    /// 推理线程数
    #[arg(long, default_value_t = 4)]
    pub threads: usize,

    /// 置信度阈值 (低于此值的检测被丢弃)
    #[arg(long, default_value_t = 0.3)]
    pub conf: f32,

    /// 合成帧宽度
    #[arg(long, default_value_t = 640)]
    pub width: u32,

    /// 合成帧高度
    #[arg(long, default_value_t = 480)]
    pub height: u32,

    /// 传感器方向 (0/90/180/270)
    #[arg(long, default_value_t = 90)]
    pub rotation: u32,

    /// 推送的合成帧数
    #[arg(long, default_value_t = 300)]
    pub frames: u64,

    /// 额外模型注册表 (JSON数组文件)
    #[arg(long)]
    pub models_json: Option<PathBuf>,

    /// 保存模型输入crop到此目录 (调试)
    #[arg(long)]
    pub save_crop: Option<PathBuf>,

    /// 拉伸填满crop (默认保持宽高比补黑边)
    #[arg(long, default_value_t = false)]
    pub stretch: bool,
}
