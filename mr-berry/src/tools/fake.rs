use std::fs;
use std::path::Path;
use std::sync::Mutex;

use ndarray::Array3;

use super::{Tool, ToolRequest, ToolRunner};
use crate::{BrainMask, MrScan, NiftiHeaderAttr, PrepError, PrepResult};

/// 注入的故障.
#[derive(Clone, Debug)]
enum Fault {
    Error,
    Panic,
}

/// 不依赖外部工具集的确定性替身.
///
/// - 颅骨剥离与偏置场校正: 原样复制强度体;
/// - 二值化: 按阈值生成掩膜;
/// - 配准与求逆: 写出文本形式的恒等变换;
/// - 重采样: 按世界坐标在参考网格上做最近邻取样, 越界取 0.
///
/// 中间文件一律以 NIfTI 写出, 不论扩展名. 每次调用都会被记录.
#[derive(Debug, Default)]
pub struct FakeRunner {
    calls: Mutex<Vec<ToolRequest>>,
    faults: Vec<(Tool, String, Fault)>,
}

impl FakeRunner {
    /// 创建替身.
    pub fn new() -> Self {
        Self::default()
    }

    /// 当 `tool` 的命令行包含 `needle` 时返回非零退出错误.
    pub fn failing(mut self, tool: Tool, needle: &str) -> Self {
        self.faults.push((tool, needle.to_string(), Fault::Error));
        self
    }

    /// 当 `tool` 的命令行包含 `needle` 时 panic.
    pub fn panicking(mut self, tool: Tool, needle: &str) -> Self {
        self.faults.push((tool, needle.to_string(), Fault::Panic));
        self
    }

    /// 按调用顺序返回全部请求.
    pub fn calls(&self) -> Vec<ToolRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// 某个工具被调用的次数.
    pub fn count(&self, tool: Tool) -> usize {
        self.calls().iter().filter(|r| r.tool() == tool).count()
    }

    fn check_faults(&self, request: &ToolRequest) -> PrepResult<()> {
        let line = request.command_line();
        for (tool, needle, fault) in self.faults.iter() {
            if *tool == request.tool() && line.contains(needle.as_str()) {
                match fault {
                    Fault::Error => return Err(PrepError::tool(tool.binary(), "exit status: 1")),
                    Fault::Panic => panic!("injected panic in `{}`", tool.binary()),
                }
            }
        }
        Ok(())
    }
}

impl ToolRunner for FakeRunner {
    fn run(&self, request: &ToolRequest) -> PrepResult<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
        self.check_faults(request)?;

        match request {
            ToolRequest::SkullStrip { input, output } | ToolRequest::BiasCorrect { input, output } => {
                MrScan::open(input)?.save(output)
            }
            ToolRequest::Binarize { input, output, min } => {
                let scan = MrScan::open(input)?;
                BrainMask::from_predicate(&scan, |v| v >= *min as f32).save(output)
            }
            ToolRequest::Coregister {
                moving,
                reference,
                transform,
                ..
            } => write_identity_lta(transform, moving, reference),
            ToolRequest::InvertTransform { input, output } => {
                let forward = fs::read_to_string(input)?;
                fs::write(output, format!("# inverse of {}\n{forward}", input.display()))?;
                Ok(())
            }
            ToolRequest::Resample {
                moving,
                reference,
                output,
                ..
            } => {
                let mov = MrScan::open(moving)?;
                let reference = MrScan::open(reference)?;
                resample_nearest(&mov, &reference)?.save(output)
            }
        }
    }
}

fn write_identity_lta(path: &Path, moving: &Path, reference: &Path) -> PrepResult<()> {
    let text = format!(
        "# fake LTA\ntype = 1\nnxforms = 1\n1 0 0 0\n0 1 0 0\n0 0 1 0\n0 0 0 1\n\
         src {}\ndst {}\n",
        moving.display(),
        reference.display()
    );
    fs::write(path, text)?;
    Ok(())
}

/// 以 `reference` 的网格为输出网格, 对 `mov` 做世界坐标下的最近邻取样.
fn resample_nearest(mov: &MrScan, reference: &MrScan) -> PrepResult<MrScan> {
    let to_world = reference.affine();
    let to_mov = mov
        .affine()
        .inverse()
        .ok_or_else(|| PrepError::Orientation("moving volume".into()))?;
    let (mz, mh, mw) = mov.shape();
    let data = Array3::from_shape_fn(reference.shape(), |(z, h, w)| {
        let [i, j, k] = to_mov.apply(to_world.apply([w as f64, h as f64, z as f64]));
        let (i, j, k) = (i.round(), j.round(), k.round());
        if i < 0.0 || j < 0.0 || k < 0.0 {
            return 0.0;
        }
        let (i, j, k) = (i as usize, j as usize, k as usize);
        if k < mz && j < mh && i < mw {
            mov[(k, j, i)]
        } else {
            0.0
        }
    });
    Ok(reference.with_data(data))
}
