use std::{
    path::{Path, PathBuf},
    process::Stdio,
    str::FromStr,
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{fs, process::Command, time::timeout};

const PROGRAM_TIMEOUT: Duration = Duration::from_secs(10);
const CPU_SAMPLE_WINDOW: Duration = Duration::from_millis(250);
const GIB: u64 = 1024 * 1024 * 1024;

/// Failures reported by an [`Actuator`].
#[derive(Debug, Error)]
pub enum ActuatorError {
    /// The operation has no implementation on this platform.
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
    /// A helper program could not be started or read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A helper program exited unsuccessfully.
    #[error("{program} failed: {detail}")]
    CommandFailed {
        /// Program name.
        program: String,
        /// Exit status or stderr.
        detail: String,
    },
}

/// Section of the system report requested by the user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InfoKind {
    /// Battery charge.
    Battery,
    /// CPU utilisation.
    Cpu,
    /// Memory usage.
    Memory,
    /// Root filesystem usage.
    Disk,
    /// Everything, plus the OS name.
    #[default]
    All,
}

impl InfoKind {
    fn includes(self, other: Self) -> bool {
        self == Self::All || self == other
    }
}

impl FromStr for InfoKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "battery" => Ok(Self::Battery),
            "cpu" => Ok(Self::Cpu),
            "memory" | "ram" => Ok(Self::Memory),
            "disk" | "storage" => Ok(Self::Disk),
            "all" | "" => Ok(Self::All),
            other => Err(format!("unknown info type '{other}'")),
        }
    }
}

/// Volume adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeChange {
    /// Raise by ten percent.
    Up,
    /// Lower by ten percent.
    Down,
    /// Mute output.
    Mute,
    /// Unmute output.
    Unmute,
    /// Set an absolute level (0-100).
    Set(u8),
}

/// Power state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerTransition {
    /// Power off.
    Shutdown,
    /// Reboot.
    Restart,
}

impl FromStr for PowerTransition {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "shutdown" | "shut down" | "poweroff" | "power off" => Ok(Self::Shutdown),
            "restart" | "reboot" => Ok(Self::Restart),
            other => Err(format!("unknown power action '{other}'")),
        }
    }
}

/// Human-readable lines describing the machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemReport {
    /// One line per section, e.g. `CPU Usage: 12.5%`.
    pub lines: Vec<String>,
}

impl SystemReport {
    /// Lines joined with newlines.
    #[must_use]
    pub fn render(&self) -> String {
        self.lines.join("\n")
    }
}

/// OS-level side effects used by the built-in capabilities.
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Launches an application by user-facing name.
    async fn launch(&self, app: &str) -> Result<(), ActuatorError>;
    /// Opens a URL in the default browser.
    async fn open_url(&self, url: &str) -> Result<(), ActuatorError>;
    /// Collects a system report.
    async fn system_report(&self, kind: InfoKind) -> Result<SystemReport, ActuatorError>;
    /// Changes output volume.
    async fn set_volume(&self, change: VolumeChange) -> Result<(), ActuatorError>;
    /// Captures the screen to `path`.
    async fn screenshot(&self, path: &Path) -> Result<(), ActuatorError>;
    /// Shuts down or restarts the machine.
    async fn power(&self, transition: PowerTransition) -> Result<(), ActuatorError>;
}

/// [`Actuator`] that drives the local machine through platform programs.
#[derive(Debug, Clone, Default)]
pub struct SystemActuator;

impl SystemActuator {
    /// Creates the actuator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Default directory for screenshots: `~/Pictures`.
    #[must_use]
    pub fn pictures_dir() -> PathBuf {
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map_or_else(std::env::temp_dir, PathBuf::from)
            .join("Pictures")
    }
}

#[async_trait]
impl Actuator for SystemActuator {
    async fn launch(&self, app: &str) -> Result<(), ActuatorError> {
        let target = resolve_app(app);
        if cfg!(windows) {
            spawn_detached("cmd", &["/C", "start", "", target])
        } else if cfg!(target_os = "macos") {
            spawn_detached("open", &["-a", target])
        } else {
            spawn_detached(target, &[])
        }
    }

    async fn open_url(&self, url: &str) -> Result<(), ActuatorError> {
        if cfg!(windows) {
            spawn_detached("cmd", &["/C", "start", "", url])
        } else if cfg!(target_os = "macos") {
            spawn_detached("open", &[url])
        } else {
            spawn_detached("xdg-open", &[url])
        }
    }

    async fn system_report(&self, kind: InfoKind) -> Result<SystemReport, ActuatorError> {
        if !cfg!(target_os = "linux") {
            let mut report = SystemReport::default();
            if kind == InfoKind::All {
                report.lines.push(format!("OS: {}", std::env::consts::OS));
                return Ok(report);
            }
            return Err(ActuatorError::Unsupported("system_info"));
        }
        let mut lines = Vec::new();
        if kind.includes(InfoKind::Battery) {
            if let Some(line) = battery_line().await {
                lines.push(line);
            }
        }
        if kind.includes(InfoKind::Cpu) {
            let first = fs::read_to_string("/proc/stat").await?;
            tokio::time::sleep(CPU_SAMPLE_WINDOW).await;
            let second = fs::read_to_string("/proc/stat").await?;
            if let (Some(a), Some(b)) = (parse_cpu_times(&first), parse_cpu_times(&second)) {
                lines.push(format!("CPU Usage: {:.1}%", cpu_percent(a, b)));
            }
        }
        if kind.includes(InfoKind::Memory) {
            let meminfo = fs::read_to_string("/proc/meminfo").await?;
            if let Some(usage) = parse_meminfo(&meminfo) {
                lines.push(usage.line("Memory"));
            }
        }
        if kind.includes(InfoKind::Disk) {
            let df = run_program("df", &["-Pk", "/"]).await?;
            if let Some(usage) = parse_df(&df) {
                lines.push(usage.line("Disk"));
            }
        }
        if kind == InfoKind::All {
            let release = fs::read_to_string("/proc/sys/kernel/osrelease")
                .await
                .unwrap_or_default();
            lines.push(format!("OS: {} {}", std::env::consts::OS, release.trim()));
        }
        Ok(SystemReport { lines })
    }

    async fn set_volume(&self, change: VolumeChange) -> Result<(), ActuatorError> {
        if cfg!(target_os = "macos") {
            let script = match change {
                VolumeChange::Up => {
                    "set volume output volume ((output volume of (get volume settings)) + 10)".to_string()
                }
                VolumeChange::Down => {
                    "set volume output volume ((output volume of (get volume settings)) - 10)".to_string()
                }
                VolumeChange::Mute => "set volume output muted true".to_string(),
                VolumeChange::Unmute => "set volume output muted false".to_string(),
                VolumeChange::Set(level) => format!("set volume output volume {level}"),
            };
            run_program("osascript", &["-e", script.as_str()]).await.map(drop)
        } else if cfg!(target_os = "linux") {
            let (verb, value) = match change {
                VolumeChange::Up => ("set-sink-volume", "+10%".to_string()),
                VolumeChange::Down => ("set-sink-volume", "-10%".to_string()),
                VolumeChange::Mute => ("set-sink-mute", "1".to_string()),
                VolumeChange::Unmute => ("set-sink-mute", "0".to_string()),
                VolumeChange::Set(level) => ("set-sink-volume", format!("{level}%")),
            };
            run_program("pactl", &[verb, "@DEFAULT_SINK@", value.as_str()]).await.map(drop)
        } else {
            Err(ActuatorError::Unsupported("volume_control"))
        }
    }

    async fn screenshot(&self, path: &Path) -> Result<(), ActuatorError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let target = path.to_string_lossy();
        if cfg!(windows) {
            let script = format!(
                "Add-Type -AssemblyName System.Windows.Forms,System.Drawing; \
                 $b=[System.Windows.Forms.SystemInformation]::VirtualScreen; \
                 $bmp=New-Object System.Drawing.Bitmap $b.Width,$b.Height; \
                 $g=[System.Drawing.Graphics]::FromImage($bmp); \
                 $g.CopyFromScreen($b.Left,$b.Top,0,0,$bmp.Size); \
                 $bmp.Save('{}')",
                target.replace('\'', "''")
            );
            run_program("powershell", &["-NoProfile", "-Command", script.as_str()]).await.map(drop)
        } else if cfg!(target_os = "macos") {
            run_program("screencapture", &["-x", &*target]).await.map(drop)
        } else {
            run_program("gnome-screenshot", &["-f", &*target]).await.map(drop)
        }
    }

    async fn power(&self, transition: PowerTransition) -> Result<(), ActuatorError> {
        let args: &[&str] = match (cfg!(windows), transition) {
            (true, PowerTransition::Shutdown) => &["/s", "/t", "0"],
            (true, PowerTransition::Restart) => &["/r", "/t", "0"],
            (false, PowerTransition::Shutdown) => &["-h", "now"],
            (false, PowerTransition::Restart) => &["-r", "now"],
        };
        run_program("shutdown", args).await.map(drop)
    }
}

/// Maps common application names to launchable targets.
fn resolve_app(app: &str) -> &str {
    let lowered = app.trim().to_lowercase();
    let windows = [
        ("notepad", "notepad.exe"),
        ("calculator", "calc.exe"),
        ("calc", "calc.exe"),
        ("explorer", "explorer.exe"),
        ("file explorer", "explorer.exe"),
        ("paint", "mspaint.exe"),
        ("cmd", "cmd.exe"),
        ("terminal", "cmd.exe"),
        ("powershell", "powershell.exe"),
        ("task manager", "taskmgr.exe"),
        ("settings", "ms-settings:"),
        ("control panel", "control.exe"),
        ("spotify", "spotify:"),
        ("vscode", "code"),
        ("vs code", "code"),
        ("word", "winword"),
        ("excel", "excel"),
        ("powerpoint", "powerpnt"),
    ];
    let unix = [
        ("calculator", "gnome-calculator"),
        ("calc", "gnome-calculator"),
        ("terminal", "x-terminal-emulator"),
        ("file explorer", "nautilus"),
        ("files", "nautilus"),
        ("vscode", "code"),
        ("vs code", "code"),
        ("spotify", "spotify"),
    ];
    let table: &[(&str, &str)] = if cfg!(windows) { &windows } else { &unix };
    table
        .iter()
        .find(|(name, _)| *name == lowered)
        .map_or(app.trim(), |(_, target)| *target)
}

fn spawn_detached(program: &str, args: &[&str]) -> Result<(), ActuatorError> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(())
}

async fn run_program(program: &str, args: &[&str]) -> Result<String, ActuatorError> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;
    let output = timeout(PROGRAM_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| ActuatorError::CommandFailed {
            program: program.into(),
            detail: "timed out".into(),
        })??;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(ActuatorError::CommandFailed {
            program: program.into(),
            detail: if stderr.is_empty() {
                output.status.to_string()
            } else {
                stderr
            },
        })
    }
}

async fn battery_line() -> Option<String> {
    let mut entries = fs::read_dir("/sys/class/power_supply").await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if !entry.file_name().to_string_lossy().starts_with("BAT") {
            continue;
        }
        let capacity = fs::read_to_string(path.join("capacity")).await.ok()?;
        let status = fs::read_to_string(path.join("status")).await.unwrap_or_default();
        let state = if status.trim().eq_ignore_ascii_case("discharging") {
            "(on battery)"
        } else {
            "(charging)"
        };
        return Some(format!("Battery: {}% {state}", capacity.trim()));
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    idle: u64,
    total: u64,
}

fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|line| line.starts_with("cpu "))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|field| field.parse().ok())
        .collect();
    if values.len() < 4 {
        return None;
    }
    // idle + iowait
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        idle,
        total: values.iter().sum(),
    })
}

fn cpu_percent(first: CpuTimes, second: CpuTimes) -> f64 {
    let total = second.total.saturating_sub(first.total);
    if total == 0 {
        return 0.0;
    }
    let idle = second.idle.saturating_sub(first.idle);
    (total - idle.min(total)) as f64 * 100.0 / total as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Usage {
    used: u64,
    total: u64,
}

impl Usage {
    fn line(self, label: &str) -> String {
        let percent = if self.total == 0 {
            0.0
        } else {
            self.used as f64 * 100.0 / self.total as f64
        };
        format!(
            "{label}: {percent:.1}% used ({}GB / {}GB)",
            self.used / GIB,
            self.total / GIB
        )
    }
}

fn parse_meminfo(meminfo: &str) -> Option<Usage> {
    let field = |name: &str| -> Option<u64> {
        meminfo
            .lines()
            .find(|line| line.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse::<u64>()
            .ok()
            .map(|kib| kib * 1024)
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    Some(Usage {
        used: total.saturating_sub(available),
        total,
    })
}

fn parse_df(output: &str) -> Option<Usage> {
    let mut fields = output.lines().nth(1)?.split_whitespace().skip(1);
    let total = fields.next()?.parse::<u64>().ok()? * 1024;
    let used = fields.next()?.parse::<u64>().ok()? * 1024;
    Some(Usage { used, total })
}
