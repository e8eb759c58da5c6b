//! 执行策略
//!
//! 每个 [`FileClassification`] 在启动时映射到一个 [`ExecutionStrategy`]，
//! 平台差异只在构建策略表时判断一次。

use log::{debug, info};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::capabilities::{HostCapabilities, HostPlatform};
use super::launcher::{LaunchCommand, ProcessLauncher};
use super::macro_watch::MacroWatch;
use super::{FileClassification, classify};
use crate::error::DispatchError;

const DEFAULT_SHEBANG: &str = "#!/bin/bash\n";
const PAUSE_PROMPT: &str = "Press Enter to close...";
/// Windows `start` 命令的窗口标题
const WINDOW_TITLE: &str = "lanshare";

pub trait ExecutionStrategy: Send + Sync {
    /// 用于通知的动作描述
    fn name(&self) -> &'static str;

    fn execute(&self, path: &Path) -> Result<(), DispatchError>;
}

/// 单引号转义，用于拼接 shell 命令
pub fn sh_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn file_name_str(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// 用系统默认程序打开
pub struct OpenWithDefault {
    platform: HostPlatform,
    launcher: Arc<dyn ProcessLauncher>,
}

impl OpenWithDefault {
    pub fn command(platform: HostPlatform, path: &Path) -> LaunchCommand {
        match platform {
            HostPlatform::Windows => {
                LaunchCommand::new("cmd").args(["/C", "start", "", &path_str(path)])
            }
            HostPlatform::MacOs => LaunchCommand::new("open").arg(path_str(path)),
            HostPlatform::Linux | HostPlatform::Other => {
                LaunchCommand::new("xdg-open").arg(path_str(path))
            }
        }
    }
}

impl ExecutionStrategy for OpenWithDefault {
    fn name(&self) -> &'static str {
        "Opened"
    }

    fn execute(&self, path: &Path) -> Result<(), DispatchError> {
        self.launcher.launch(&Self::command(self.platform, path))
    }
}

/// 规范化后在新终端窗口中运行 shell 脚本
pub struct ShellScriptInTerminal {
    platform: HostPlatform,
    terminal: Option<String>,
    posix_shell: Option<PathBuf>,
    launcher: Arc<dyn ProcessLauncher>,
}

/// 在新终端窗口中以 `bash -c` 运行命令，`subject` 仅用于错误信息
///
/// macOS 的 `do script` 走用户的登录 shell（通常是 zsh），所以同样包一层 bash。
fn terminal_command(
    platform: HostPlatform,
    terminal: Option<&str>,
    posix_shell: Option<&Path>,
    dir: &Path,
    inner: String,
    subject: &Path,
) -> Result<LaunchCommand, DispatchError> {
    let cmd = match platform {
        HostPlatform::MacOs => {
            let script = format!(
                "cd {} && bash -c {}",
                sh_quote(&path_str(dir)),
                sh_quote(&inner)
            );
            let escaped = script.replace('\\', "\\\\").replace('"', "\\\"");
            LaunchCommand::new("osascript").args([
                "-e".to_string(),
                format!("tell application \"Terminal\" to do script \"{}\"", escaped),
                "-e".to_string(),
                "tell application \"Terminal\" to activate".to_string(),
            ])
        }
        HostPlatform::Windows => {
            let shell =
                posix_shell.ok_or_else(|| DispatchError::NoTerminal(subject.to_path_buf()))?;
            LaunchCommand::new("cmd").args([
                "/C".to_string(),
                "start".to_string(),
                WINDOW_TITLE.to_string(),
                path_str(shell),
                "-c".to_string(),
                inner,
            ])
        }
        HostPlatform::Linux | HostPlatform::Other => {
            let terminal =
                terminal.ok_or_else(|| DispatchError::NoTerminal(subject.to_path_buf()))?;
            let dir_arg = path_str(dir);
            let base = LaunchCommand::new(terminal);
            match terminal {
                "gnome-terminal" => base
                    .arg(format!("--working-directory={}", dir_arg))
                    .args(["--", "bash", "-c"])
                    .arg(inner),
                "xfce4-terminal" => base
                    .arg(format!("--working-directory={}", dir_arg))
                    .args(["-x", "bash", "-c"])
                    .arg(inner),
                "konsole" => base
                    .args(["--workdir", &dir_arg, "-e", "bash", "-c"])
                    .arg(inner),
                _ => base.args(["-e", "bash", "-c"]).arg(inner),
            }
        }
    };

    Ok(cmd.current_dir(dir.to_path_buf()))
}

impl ShellScriptInTerminal {
    /// 终端中执行的命令：运行脚本后等待用户确认再关闭窗口
    fn inner_command(path: &Path) -> String {
        format!(
            "./{}; echo; read -r -p {} _",
            sh_quote(&file_name_str(path)),
            sh_quote(PAUSE_PROMPT)
        )
    }

    pub fn command(&self, path: &Path) -> Result<LaunchCommand, DispatchError> {
        terminal_command(
            self.platform,
            self.terminal.as_deref(),
            self.posix_shell.as_deref(),
            &parent_dir(path),
            Self::inner_command(path),
            path,
        )
    }
}

/// 统一为 LF 换行、补上 shebang 并设置可执行权限
pub fn normalize_script(path: &Path) -> std::io::Result<()> {
    let content = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&content).replace("\r\n", "\n");
    let normalized = if text.starts_with("#!") {
        text
    } else {
        format!("{}{}", DEFAULT_SHEBANG, text)
    };

    if normalized.as_bytes() != content.as_slice() {
        std::fs::write(path, normalized)?;
        debug!("Normalized script {:?}", path);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

impl ExecutionStrategy for ShellScriptInTerminal {
    fn name(&self) -> &'static str {
        "Executed in terminal"
    }

    fn execute(&self, path: &Path) -> Result<(), DispatchError> {
        let cmd = self.command(path)?;
        normalize_script(path)?;
        self.launcher.launch(&cmd)
    }
}

/// Windows 原生脚本宿主（.bat / .cmd / .ps1 / .vbs）
pub struct NativeScriptHost {
    platform: HostPlatform,
    kind: FileClassification,
    launcher: Arc<dyn ProcessLauncher>,
}

impl NativeScriptHost {
    pub fn command(&self, path: &Path) -> Result<LaunchCommand, DispatchError> {
        if self.platform != HostPlatform::Windows {
            return Err(DispatchError::UnsupportedPlatform(match self.kind {
                FileClassification::PowerShellScript => "PowerShell",
                FileClassification::VBScript => "VBScript",
                _ => "Batch",
            }));
        }

        let script = path_str(path);
        let start = LaunchCommand::new("cmd").args(["/C", "start", WINDOW_TITLE]);
        let cmd = match self.kind {
            FileClassification::PowerShellScript => start.args([
                "powershell".to_string(),
                "-ExecutionPolicy".to_string(),
                "Bypass".to_string(),
                "-Command".to_string(),
                format!(
                    "& '{}'; Read-Host '{}'",
                    script.replace('\'', "''"),
                    PAUSE_PROMPT
                ),
            ]),
            FileClassification::VBScript => start.args([
                "cmd".to_string(),
                "/C".to_string(),
                format!("cscript //nologo \"{}\" & pause", script),
            ]),
            _ => start.args([
                "cmd".to_string(),
                "/C".to_string(),
                format!("call \"{}\" & pause", script),
            ]),
        };
        Ok(cmd.current_dir(parent_dir(path)))
    }
}

impl ExecutionStrategy for NativeScriptHost {
    fn name(&self) -> &'static str {
        "Executed in console"
    }

    fn execute(&self, path: &Path) -> Result<(), DispatchError> {
        let cmd = self.command(path)?;
        self.launcher.launch(&cmd)
    }
}

/// 包装脚本和完成标记的路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroWrapper {
    pub wrapper: PathBuf,
    pub flag: PathBuf,
}

/// 是否为宏包装脚本或完成标记（`<stem>_run_<id>.sh|.bat`、`<stem>_done_<id>.flag`）
pub fn is_macro_artifact(file_name: &str) -> bool {
    let (base, marker) = if let Some(base) = file_name.strip_suffix(".flag") {
        (base, "_done_")
    } else if let Some(base) = file_name
        .strip_suffix(".sh")
        .or_else(|| file_name.strip_suffix(".bat"))
    {
        (base, "_run_")
    } else {
        return false;
    };

    base.rsplit_once(marker).is_some_and(|(_, id)| {
        id.len() == 32 && id.chars().all(|c| c.is_ascii_hexdigit())
    })
}

/// 通过外部 3D 创作工具运行宏
pub struct ExternalMacroTool {
    platform: HostPlatform,
    terminal: Option<String>,
    tool: Option<PathBuf>,
    watch: MacroWatch,
    launcher: Arc<dyn ProcessLauncher>,
}

impl ExternalMacroTool {
    fn tool(&self) -> Result<&Path, DispatchError> {
        let tool = self.tool.as_deref().ok_or(DispatchError::ToolNotConfigured)?;
        if !tool.exists() {
            return Err(DispatchError::ToolMissing(tool.to_path_buf()));
        }
        Ok(tool)
    }

    /// 在宏文件旁生成包装脚本
    pub fn write_wrapper(&self, tool: &Path, macro_path: &Path) -> std::io::Result<MacroWrapper> {
        let dir = parent_dir(macro_path);
        let stem = macro_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "macro".to_string());
        let id = uuid::Uuid::new_v4().simple().to_string();
        let flag = dir.join(format!("{}_done_{}.flag", stem, id));

        let (wrapper, content) = if self.platform == HostPlatform::Windows {
            (
                dir.join(format!("{}_run_{}.bat", stem, id)),
                format!(
                    "@echo off\r\ncd /d \"{}\"\r\n\"{}\" -silent -U MAXScript \"{}\"\r\necho done > \"{}\"\r\n",
                    path_str(&dir),
                    path_str(tool),
                    path_str(macro_path),
                    path_str(&flag)
                ),
            )
        } else {
            (
                dir.join(format!("{}_run_{}.sh", stem, id)),
                format!(
                    "#!/bin/sh\ncd {}\n{} -silent -U MAXScript {}\ntouch {}\n",
                    sh_quote(&path_str(&dir)),
                    sh_quote(&path_str(tool)),
                    sh_quote(&path_str(macro_path)),
                    sh_quote(&path_str(&flag))
                ),
            )
        };

        std::fs::write(&wrapper, content)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&wrapper, std::fs::Permissions::from_mode(0o755))?;
        }
        Ok(MacroWrapper { wrapper, flag })
    }

    /// 在新控制台窗口中运行包装脚本
    pub fn wrapper_command(&self, wrapper: &Path) -> Result<LaunchCommand, DispatchError> {
        let dir = parent_dir(wrapper);
        if self.platform == HostPlatform::Windows {
            return Ok(LaunchCommand::new("cmd")
                .args(["/C", "start", WINDOW_TITLE, &path_str(wrapper)])
                .current_dir(dir));
        }
        let inner = format!("sh {}", sh_quote(&path_str(wrapper)));
        terminal_command(
            self.platform,
            self.terminal.as_deref(),
            None,
            &dir,
            inner,
            wrapper,
        )
    }
}

impl ExecutionStrategy for ExternalMacroTool {
    fn name(&self) -> &'static str {
        "Sent to macro tool"
    }

    fn execute(&self, path: &Path) -> Result<(), DispatchError> {
        let tool = self.tool()?;
        let files = self.write_wrapper(tool, path)?;

        let launched = self
            .wrapper_command(&files.wrapper)
            .and_then(|cmd| self.launcher.launch(&cmd));
        if let Err(e) = launched {
            let _ = std::fs::remove_file(&files.wrapper);
            return Err(e);
        }

        info!("Watching for macro completion flag {:?}", files.flag);
        self.watch.spawn(files.wrapper, files.flag);
        Ok(())
    }
}

/// 数值计算引擎
pub struct NumericEngine {
    engine: PathBuf,
    launcher: Arc<dyn ProcessLauncher>,
}

impl NumericEngine {
    pub fn command(&self, path: &Path) -> LaunchCommand {
        let engine_name = self
            .engine
            .file_stem()
            .map(|s| s.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        let cmd = LaunchCommand::new(path_str(&self.engine));
        let cmd = if engine_name.contains("octave") {
            cmd.args(["--no-gui".to_string(), path_str(path)])
        } else {
            cmd.args([
                "-batch".to_string(),
                format!("run('{}')", path_str(path).replace('\'', "''")),
            ])
        };
        cmd.current_dir(parent_dir(path))
    }
}

impl ExecutionStrategy for NumericEngine {
    fn name(&self) -> &'static str {
        "Executed in numeric engine"
    }

    fn execute(&self, path: &Path) -> Result<(), DispatchError> {
        self.launcher.launch(&self.command(path))
    }
}

/// 分类到策略的映射，构建后不再变化
pub struct StrategyTable {
    strategies: HashMap<FileClassification, Arc<dyn ExecutionStrategy>>,
}

impl StrategyTable {
    pub fn new(
        capabilities: &HostCapabilities,
        launcher: Arc<dyn ProcessLauncher>,
        watch: MacroWatch,
    ) -> Self {
        let platform = capabilities.platform;
        let open: Arc<dyn ExecutionStrategy> = Arc::new(OpenWithDefault {
            platform,
            launcher: launcher.clone(),
        });

        let mut strategies: HashMap<FileClassification, Arc<dyn ExecutionStrategy>> =
            HashMap::new();
        strategies.insert(FileClassification::Document, open.clone());
        strategies.insert(
            FileClassification::ShellScript,
            Arc::new(ShellScriptInTerminal {
                platform,
                terminal: capabilities.terminal.clone(),
                posix_shell: capabilities.posix_shell.clone(),
                launcher: launcher.clone(),
            }),
        );
        for kind in [
            FileClassification::BatchScript,
            FileClassification::PowerShellScript,
            FileClassification::VBScript,
        ] {
            strategies.insert(
                kind,
                Arc::new(NativeScriptHost {
                    platform,
                    kind,
                    launcher: launcher.clone(),
                }),
            );
        }
        strategies.insert(
            FileClassification::MacroScript,
            Arc::new(ExternalMacroTool {
                platform,
                terminal: capabilities.terminal.clone(),
                tool: capabilities.macro_tool.clone(),
                watch,
                launcher: launcher.clone(),
            }),
        );
        let numeric: Arc<dyn ExecutionStrategy> = match &capabilities.numeric_engine {
            Some(engine) => Arc::new(NumericEngine {
                engine: engine.clone(),
                launcher,
            }),
            None => open,
        };
        strategies.insert(FileClassification::NumericScript, numeric);

        Self { strategies }
    }

    pub fn strategy_for(&self, classification: FileClassification) -> &dyn ExecutionStrategy {
        // 构建时已覆盖所有分类
        self.strategies[&classification].as_ref()
    }

    /// 对文件执行其分类对应的策略，返回动作描述
    pub fn dispatch(&self, path: &Path) -> Result<&'static str, DispatchError> {
        let strategy = self.strategy_for(classify(path));
        strategy.execute(path)?;
        Ok(strategy.name())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// 只记录命令，不真正启动
    #[derive(Default)]
    pub(crate) struct RecordingLauncher {
        pub commands: Mutex<Vec<LaunchCommand>>,
    }

    impl ProcessLauncher for RecordingLauncher {
        fn launch(&self, command: &LaunchCommand) -> Result<(), DispatchError> {
            self.commands.lock().unwrap().push(command.clone());
            Ok(())
        }
    }

    impl RecordingLauncher {
        pub(crate) fn take(&self) -> Vec<LaunchCommand> {
            std::mem::take(&mut *self.commands.lock().unwrap())
        }
    }

    pub(crate) fn caps(platform: HostPlatform) -> HostCapabilities {
        HostCapabilities {
            platform,
            terminal: Some("gnome-terminal".to_string()),
            posix_shell: None,
            macro_tool: None,
            numeric_engine: None,
        }
    }

    fn build_table(caps: &HostCapabilities) -> (StrategyTable, Arc<RecordingLauncher>) {
        let launcher = Arc::new(RecordingLauncher::default());
        let watch = MacroWatch::new(Duration::from_secs(5), CancellationToken::new());
        (StrategyTable::new(caps, launcher.clone(), watch), launcher)
    }

    #[test]
    fn test_sh_quote() {
        assert_eq!(sh_quote("plain"), "'plain'");
        assert_eq!(sh_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_open_command_per_platform() {
        let p = Path::new("/data/notes.txt");
        assert_eq!(OpenWithDefault::command(HostPlatform::Linux, p).program, "xdg-open");
        assert_eq!(OpenWithDefault::command(HostPlatform::MacOs, p).program, "open");
        let win = OpenWithDefault::command(HostPlatform::Windows, p);
        assert_eq!(win.program, "cmd");
        assert_eq!(win.args[..3], ["/C", "start", ""]);
    }

    #[test]
    fn test_normalize_script() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("run.sh");
        std::fs::write(&script, b"echo one\r\necho two\r\n").unwrap();

        normalize_script(&script).unwrap();
        let text = std::fs::read_to_string(&script).unwrap();
        assert_eq!(text, "#!/bin/bash\necho one\necho two\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&script).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn test_normalize_keeps_existing_shebang() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("run.sh");
        std::fs::write(&script, b"#!/bin/sh\necho hi\n").unwrap();
        normalize_script(&script).unwrap();
        assert_eq!(
            std::fs::read_to_string(&script).unwrap(),
            "#!/bin/sh\necho hi\n"
        );
    }

    #[test]
    fn test_shell_script_launches_in_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("run.sh");
        std::fs::write(&script, b"echo hi\r\n").unwrap();

        let (table, launcher) = build_table(&caps(HostPlatform::Linux));
        assert_eq!(table.dispatch(&script).unwrap(), "Executed in terminal");

        let cmds = launcher.take();
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].program, "gnome-terminal");
        assert_eq!(cmds[0].cwd.as_deref(), Some(dir.path()));
        let inner = cmds[0].args.last().unwrap();
        assert!(inner.starts_with("./'run.sh'"));
        assert!(inner.contains("read -r"));
        assert!(
            std::fs::read_to_string(&script)
                .unwrap()
                .starts_with("#!/bin/bash\n")
        );
    }

    #[test]
    fn test_shell_script_without_terminal_fails() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("run.sh");
        std::fs::write(&script, b"echo hi").unwrap();

        let mut c = caps(HostPlatform::Linux);
        c.terminal = None;
        let (table, launcher) = build_table(&c);
        assert!(matches!(
            table.dispatch(&script),
            Err(DispatchError::NoTerminal(_))
        ));
        assert!(launcher.take().is_empty());
        // 文件保持原样
        assert_eq!(std::fs::read(&script).unwrap(), b"echo hi");
    }

    #[test]
    fn test_macos_shell_uses_osascript() {
        let (table, launcher) = build_table(&caps(HostPlatform::MacOs));
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("go.sh");
        std::fs::write(&script, b"echo hi").unwrap();

        table.dispatch(&script).unwrap();
        let cmd = &launcher.take()[0];
        assert_eq!(cmd.program, "osascript");
        assert!(cmd.args[1].contains("do script"));
        // read -p 只在 bash 中是提示符，登录 shell 可能是 zsh
        assert!(cmd.args[1].contains("&& bash -c '"));
        assert!(cmd.args[1].contains("read -r -p"));
    }

    #[test]
    fn test_native_scripts_unsupported_off_windows() {
        let (table, launcher) = build_table(&caps(HostPlatform::Linux));
        for name in ["build.bat", "deploy.ps1", "popup.vbs"] {
            assert!(matches!(
                table.dispatch(Path::new(name)),
                Err(DispatchError::UnsupportedPlatform(_))
            ));
        }
        assert!(launcher.take().is_empty());
    }

    #[test]
    fn test_native_scripts_on_windows_pause() {
        let (table, launcher) = build_table(&caps(HostPlatform::Windows));
        table.dispatch(Path::new("C:/in/build.bat")).unwrap();
        table.dispatch(Path::new("C:/in/deploy.ps1")).unwrap();

        let cmds = launcher.take();
        assert!(cmds[0].args.last().unwrap().ends_with("& pause"));
        assert!(cmds[1].args.contains(&"powershell".to_string()));
        assert!(cmds[1].args.last().unwrap().contains("Read-Host"));
    }

    #[test]
    fn test_macro_without_tool_fails() {
        let (table, _launcher) = build_table(&caps(HostPlatform::Linux));
        assert!(matches!(
            table.dispatch(Path::new("scene.ms")),
            Err(DispatchError::ToolNotConfigured)
        ));

        let mut c = caps(HostPlatform::Linux);
        c.macro_tool = Some(PathBuf::from("/opt/missing/3dsmax"));
        let (table, _launcher) = build_table(&c);
        assert!(matches!(
            table.dispatch(Path::new("scene.ms")),
            Err(DispatchError::ToolMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_macro_writes_wrapper_next_to_script() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("3dsmax");
        std::fs::write(&tool, b"").unwrap();
        let macro_file = dir.path().join("scene.ms");
        std::fs::write(&macro_file, b"print 1").unwrap();

        let mut c = caps(HostPlatform::Linux);
        c.macro_tool = Some(tool);
        let (table, launcher) = build_table(&c);
        assert_eq!(table.dispatch(&macro_file).unwrap(), "Sent to macro tool");

        let cmd = &launcher.take()[0];
        assert_eq!(cmd.program, "gnome-terminal");
        let inner = cmd.args.last().unwrap();
        assert!(inner.starts_with("sh '"));
        let wrapper = PathBuf::from(inner.trim_start_matches("sh ").trim_matches('\''));
        let wrapper_name = wrapper.file_name().unwrap().to_string_lossy().to_string();
        assert!(wrapper_name.starts_with("scene_run_"));
        assert!(wrapper_name.ends_with(".sh"));

        let content = std::fs::read_to_string(&wrapper).unwrap();
        assert!(content.contains("scene.ms"));
        assert!(content.contains("scene_done_"));
    }

    #[tokio::test]
    async fn test_macro_without_terminal_cleans_up_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("3dsmax");
        std::fs::write(&tool, b"").unwrap();
        let macro_file = dir.path().join("scene.ms");
        std::fs::write(&macro_file, b"print 1").unwrap();

        let mut c = caps(HostPlatform::Linux);
        c.macro_tool = Some(tool);
        c.terminal = None;
        let (table, launcher) = build_table(&c);
        assert!(matches!(
            table.dispatch(&macro_file),
            Err(DispatchError::NoTerminal(_))
        ));
        assert!(launcher.take().is_empty());
        // 只剩工具和宏文件
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_macos_macro_wrapper_runs_in_terminal() {
        let tool = ExternalMacroTool {
            platform: HostPlatform::MacOs,
            terminal: None,
            tool: None,
            watch: MacroWatch::new(Duration::from_secs(5), CancellationToken::new()),
            launcher: Arc::new(RecordingLauncher::default()),
        };
        let cmd = tool
            .wrapper_command(Path::new("/work/scene_run_1.sh"))
            .unwrap();
        assert_eq!(cmd.program, "osascript");
        assert!(cmd.args[1].contains("bash -c"));
        assert!(cmd.args[1].contains("scene_run_1.sh"));
    }

    #[test]
    fn test_macro_artifacts_are_recognized() {
        let id = uuid::Uuid::new_v4().simple().to_string();
        assert!(is_macro_artifact(&format!("scene_run_{}.sh", id)));
        assert!(is_macro_artifact(&format!("scene_run_{}.bat", id)));
        assert!(is_macro_artifact(&format!("scene_done_{}.flag", id)));
        assert!(!is_macro_artifact("scene_run_final.sh"));
        assert!(!is_macro_artifact("scene.ms"));
        assert!(!is_macro_artifact(&format!("scene_done_{}.sh", id)));
    }

    #[test]
    fn test_numeric_falls_back_to_open() {
        let (table, launcher) = build_table(&caps(HostPlatform::Linux));
        assert_eq!(table.dispatch(Path::new("solve.m")).unwrap(), "Opened");
        assert_eq!(launcher.take()[0].program, "xdg-open");
    }

    #[test]
    fn test_numeric_engine_commands() {
        let mut c = caps(HostPlatform::Linux);
        c.numeric_engine = Some(PathBuf::from("/usr/bin/octave"));
        let (table, launcher) = build_table(&c);
        assert_eq!(
            table.dispatch(Path::new("/data/solve.m")).unwrap(),
            "Executed in numeric engine"
        );
        let cmd = &launcher.take()[0];
        assert_eq!(cmd.args, vec!["--no-gui", "/data/solve.m"]);

        let engine = NumericEngine {
            engine: PathBuf::from("/opt/matlab/bin/matlab"),
            launcher: Arc::new(RecordingLauncher::default()),
        };
        let cmd = engine.command(Path::new("/data/solve.m"));
        assert_eq!(cmd.args, vec!["-batch", "run('/data/solve.m')"]);
    }
}
