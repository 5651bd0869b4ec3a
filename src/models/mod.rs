//! 模型配置注册表
//!
//! 每个受支持的模型标识在表中恰好对应一份几何/数值参数,
//! 未知标识是错误,绝不静默回退到默认模型。新增模型是加一条数据,
//! 不是加一个代码分支。

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// YOLOv5标准锚框 (宽,高), 三个输出stage各取三个
const YOLOV5_ANCHORS: [(u32, u32); 9] = [
    (10, 13),
    (16, 30),
    (33, 23),
    (30, 61),
    (62, 45),
    (59, 119),
    (116, 90),
    (156, 198),
    (373, 326),
];

/// 单个模型的几何/数值参数 (纯数据,无可变状态)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// 模型标识 (注册表键)
    pub id: String,
    /// 正方形模型输入边长 (像素)
    pub input_size: u32,
    /// 是否量化模型
    pub quantized: bool,
    /// 各输出stage的网格宽度 (有序)
    pub output_widths: Vec<u32>,
    /// 锚框尺寸对 (宽,高), 有序
    pub anchors: Vec<(u32, u32)>,
    /// 每个输出stage预测哪些锚框 (索引进anchors)
    pub masks: Vec<Vec<usize>>,
    /// 类别标签文件名
    pub labels: String,
}

impl ModelConfig {
    /// 校验不变量: mask组数等于输出stage数,mask引用的锚框必须存在
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            bail!("模型标识不能为空");
        }
        if self.input_size == 0 {
            bail!("模型{}的输入尺寸不能为0", self.id);
        }
        if self.output_widths.is_empty() {
            bail!("模型{}没有输出stage", self.id);
        }
        if self.masks.len() != self.output_widths.len() {
            bail!(
                "模型{}的mask组数{}与输出stage数{}不一致",
                self.id,
                self.masks.len(),
                self.output_widths.len()
            );
        }
        for (stage, mask) in self.masks.iter().enumerate() {
            for &idx in mask {
                if idx >= self.anchors.len() {
                    bail!(
                        "模型{}的stage{}引用了不存在的锚框{} (共{}个)",
                        self.id,
                        stage,
                        idx,
                        self.anchors.len()
                    );
                }
            }
        }
        Ok(())
    }
}

/// 内置模型表 (对应打包进应用的tflite资产)
static BUILTIN: Lazy<Vec<ModelConfig>> = Lazy::new(|| {
    vec![
        ModelConfig {
            id: "yolov5s.tflite".to_string(),
            input_size: 416,
            quantized: false,
            output_widths: vec![80, 40, 20],
            anchors: YOLOV5_ANCHORS.to_vec(),
            masks: vec![vec![0, 1, 2], vec![3, 4, 5], vec![6, 7, 8]],
            labels: "customclasses.txt".to_string(),
        },
        ModelConfig {
            id: "best-fp16.tflite".to_string(),
            input_size: 416,
            quantized: false,
            output_widths: vec![40, 20, 10],
            anchors: YOLOV5_ANCHORS.to_vec(),
            masks: vec![vec![0, 1, 2], vec![3, 4, 5], vec![6, 7, 8]],
            labels: "customclasses.txt".to_string(),
        },
        ModelConfig {
            id: "yolov5s-int8.tflite".to_string(),
            input_size: 416,
            quantized: true,
            output_widths: vec![40, 20, 10],
            anchors: YOLOV5_ANCHORS.to_vec(),
            masks: vec![vec![0, 1, 2], vec![3, 4, 5], vec![6, 7, 8]],
            labels: "customclasses.txt".to_string(),
        },
    ]
});

/// 模型注册表: 标识 → 配置的唯一权威映射
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    table: HashMap<String, ModelConfig>,
}

impl ModelRegistry {
    /// 仅含内置模型的注册表
    pub fn builtin() -> Self {
        let mut table = HashMap::new();
        for cfg in BUILTIN.iter() {
            table.insert(cfg.id.clone(), cfg.clone());
        }
        Self { table }
    }

    /// 查找模型配置。未知标识是错误,没有回退模型。
    pub fn lookup(&self, model_id: &str) -> Result<&ModelConfig> {
        self.table
            .get(model_id)
            .with_context(|| format!("未知模型标识: {}", model_id))
    }

    /// 注册一条配置 (同名覆盖),注册前校验不变量
    pub fn register(&mut self, config: ModelConfig) -> Result<()> {
        config.validate()?;
        self.table.insert(config.id.clone(), config);
        Ok(())
    }

    /// 从JSON文件合并额外条目 (数组格式),返回合并数量
    pub fn extend_from_json(&mut self, path: &Path) -> Result<usize> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("读取模型注册表失败: {}", path.display()))?;
        let entries: Vec<ModelConfig> = serde_json::from_str(&text)
            .with_context(|| format!("解析模型注册表失败: {}", path.display()))?;
        let n = entries.len();
        for cfg in entries {
            self.register(cfg)?;
        }
        Ok(n)
    }

    /// 所有已注册的模型标识 (排序后)
    pub fn model_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.table.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
