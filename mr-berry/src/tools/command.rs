use std::process::Command;

use log::debug;

use super::{ThreadEnv, ToolPaths, ToolRequest, ToolRunner};
use crate::{PrepError, PrepResult};

/// 真正启动外部进程的调用器.
///
/// 每个子进程都带上 [`ThreadEnv`] 中的线程数变量; 配准额外将 `OMP_NUM_THREADS`
/// 设为请求中的线程数.
#[derive(Clone, Debug)]
pub struct CommandRunner {
    paths: ToolPaths,
    env: ThreadEnv,
}

impl CommandRunner {
    /// 创建调用器.
    pub fn new(paths: ToolPaths, env: ThreadEnv) -> Self {
        Self { paths, env }
    }

    /// 工具查找路径.
    pub fn paths(&self) -> &ToolPaths {
        &self.paths
    }

    fn build(&self, request: &ToolRequest) -> Command {
        let binary = request.tool().binary();
        let program = self.paths.locate(binary).unwrap_or_else(|| binary.into());
        let mut cmd = Command::new(program);
        cmd.args(request.args());
        cmd.envs(self.env.vars().iter().map(|(k, v)| (*k, v.as_str())));
        if let ToolRequest::Coregister { threads, .. } = request {
            cmd.env("OMP_NUM_THREADS", (*threads).max(1).to_string());
        }
        cmd
    }
}

impl ToolRunner for CommandRunner {
    fn run(&self, request: &ToolRequest) -> PrepResult<()> {
        let binary = request.tool().binary();
        debug!("$ {}", request.command_line());

        let output = self
            .build(request)
            .output()
            .map_err(|e| PrepError::tool(binary, format!("cannot start: {e}")))?;
        if output.status.success() {
            return Ok(());
        }

        // 只带上标准错误的最后一行, 避免日志爆炸.
        let stderr = String::from_utf8_lossy(&output.stderr);
        let status = match stderr.lines().rev().find(|l| !l.trim().is_empty()) {
            Some(last) => format!("{} ({})", output.status, last.trim()),
            None => output.status.to_string(),
        };
        Err(PrepError::tool(binary, status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::THREAD_ENV_VARS;
    use std::path::PathBuf;

    #[test]
    fn test_missing_binary_is_tool_error() {
        let runner = CommandRunner::new(
            ToolPaths::new(Some(PathBuf::from("/definitely/not/here"))),
            ThreadEnv::from_lookup(1, |_| None),
        );
        let request = ToolRequest::InvertTransform {
            input: "a.lta".into(),
            output: "b.lta".into(),
        };
        // 宿主恰好装有该工具时也会因输入不存在而失败.
        let err = runner.run(&request).unwrap_err();
        assert!(matches!(err, PrepError::ExternalTool { ref tool, .. } if tool == "lta_convert"));
    }

    #[test]
    fn test_thread_env_is_applied_per_command() {
        let runner = CommandRunner::new(ToolPaths::default(), ThreadEnv::from_lookup(4, |_| None));
        let request = ToolRequest::Coregister {
            moving: "m.nii.gz".into(),
            reference: "r.nii.gz".into(),
            transform: "x.lta".into(),
            threads: 2,
        };
        let cmd = runner.build(&request);
        let envs: Vec<_> = cmd
            .get_envs()
            .filter_map(|(k, v)| Some((k.to_str()?.to_string(), v?.to_str()?.to_string())))
            .collect();
        for name in THREAD_ENV_VARS {
            assert!(envs.iter().any(|(k, _)| k == name));
        }
        assert!(envs.contains(&("OMP_NUM_THREADS".to_string(), "2".to_string())));
    }
}
