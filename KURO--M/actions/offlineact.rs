use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::Local;
use serde_json::json;

use crate::{
    actions::{Arguments, ToolResult},
    actuator::{Actuator, InfoKind, PowerTransition, VolumeChange},
    arguments::{optional_integer, optional_text, required_text},
    capabilities::{CapabilityHandler, HandlerError},
    shell::ShellRunner,
};

const PREVIEW_CHARS: usize = 100;
const COMMAND_FAILED: &str = "Oops, that didn't work. Let me try something else!";

/// `run_command`: runs shell text that already passed the command policy.
pub struct RunCommandHandler {
    shell: Arc<dyn ShellRunner>,
}

impl RunCommandHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(shell: Arc<dyn ShellRunner>) -> Self {
        Self { shell }
    }
}

#[async_trait]
impl CapabilityHandler for RunCommandHandler {
    async fn invoke(&self, arguments: Arguments) -> Result<ToolResult, HandlerError> {
        let command = required_text(&arguments, "command")?;
        let output = match self.shell.run(&command).await {
            Ok(output) => output,
            Err(err) => {
                tracing::warn!(error = %err, "shell command failed to complete");
                return Ok(ToolResult::failure(format!("Command failed: {err}"))
                    .with_natural_response(COMMAND_FAILED));
            }
        };
        let data = json!({
            "exit_code": output.exit_code,
            "stdout": output.stdout,
            "stderr": output.stderr,
        });
        if !output.succeeded() {
            let detail = if output.stderr.is_empty() {
                output
                    .exit_code
                    .map_or_else(|| "terminated by signal".to_string(), |code| format!("exit code {code}"))
            } else {
                output.stderr.clone()
            };
            return Ok(ToolResult::failure(format!("Command failed: {detail}"))
                .with_data(data)
                .with_natural_response(COMMAND_FAILED));
        }
        let reply = if output.stdout.is_empty() {
            "Done!".to_string()
        } else {
            let preview: String = output.stdout.chars().take(PREVIEW_CHARS).collect();
            format!("Here you go! {preview}")
        };
        Ok(ToolResult::success("Command executed")
            .with_data(data)
            .with_natural_response(reply))
    }
}

/// `open_app`: launches a desktop application.
pub struct OpenAppHandler {
    actuator: Arc<dyn Actuator>,
}

impl OpenAppHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(actuator: Arc<dyn Actuator>) -> Self {
        Self { actuator }
    }
}

#[async_trait]
impl CapabilityHandler for OpenAppHandler {
    async fn invoke(&self, arguments: Arguments) -> Result<ToolResult, HandlerError> {
        let app = required_text(&arguments, "app_name")?;
        Ok(match self.actuator.launch(&app).await {
            Ok(()) => ToolResult::success(format!("Opened {app}"))
                .with_natural_response(format!("Sure thing! Opening {app} for you.")),
            Err(err) => ToolResult::failure(format!("Failed to open {app}: {err}"))
                .with_natural_response(format!("Hmm, I couldn't find {app}. Is it installed?")),
        })
    }
}

/// `system_info`: battery, CPU, memory and disk summary.
pub struct SystemInfoHandler {
    actuator: Arc<dyn Actuator>,
}

impl SystemInfoHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(actuator: Arc<dyn Actuator>) -> Self {
        Self { actuator }
    }
}

#[async_trait]
impl CapabilityHandler for SystemInfoHandler {
    async fn invoke(&self, arguments: Arguments) -> Result<ToolResult, HandlerError> {
        let kind = optional_text(&arguments, "info_type")
            .map(|raw| raw.parse::<InfoKind>())
            .transpose()
            .map_err(|reason| HandlerError::InvalidArgument {
                name: "info_type".into(),
                reason,
            })?
            .unwrap_or_default();
        let report = match self.actuator.system_report(kind).await {
            Ok(report) if !report.lines.is_empty() => report,
            Ok(_) => {
                return Ok(ToolResult::failure("No system information available")
                    .with_natural_response("I couldn't read that from this machine."));
            }
            Err(err) => {
                return Ok(ToolResult::failure(format!("Failed to read system info: {err}"))
                    .with_natural_response("I couldn't read that from this machine."));
            }
        };
        let rendered = report.render();
        Ok(ToolResult::success(rendered.clone())
            .with_data(json!(report.lines))
            .with_natural_response(format!("Here's what I found: {rendered}")))
    }
}

/// `volume_control`: up, down, mute, unmute or set.
pub struct VolumeHandler {
    actuator: Arc<dyn Actuator>,
}

impl VolumeHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(actuator: Arc<dyn Actuator>) -> Self {
        Self { actuator }
    }
}

fn volume_change(arguments: &Arguments) -> Result<VolumeChange, HandlerError> {
    let action = required_text(arguments, "action")?.to_ascii_lowercase();
    let change = match action.as_str() {
        "up" | "increase" | "louder" => VolumeChange::Up,
        "down" | "decrease" | "quieter" => VolumeChange::Down,
        "mute" => VolumeChange::Mute,
        "unmute" => VolumeChange::Unmute,
        "set" => {
            let level = optional_integer(arguments, "level")?.ok_or_else(|| {
                HandlerError::MissingArgument("level".into())
            })?;
            VolumeChange::Set(u8::try_from(level.clamp(0, 100)).unwrap_or(100))
        }
        other => {
            return Err(HandlerError::InvalidArgument {
                name: "action".into(),
                reason: format!("unknown volume action '{other}'"),
            })
        }
    };
    Ok(change)
}

#[async_trait]
impl CapabilityHandler for VolumeHandler {
    async fn invoke(&self, arguments: Arguments) -> Result<ToolResult, HandlerError> {
        let change = volume_change(&arguments)?;
        if let Err(err) = self.actuator.set_volume(change).await {
            return Ok(ToolResult::failure(format!("Volume control failed: {err}"))
                .with_natural_response("Couldn't control volume right now."));
        }
        let reply = match change {
            VolumeChange::Mute => "Muted!".to_string(),
            VolumeChange::Unmute => "Unmuted!".to_string(),
            VolumeChange::Up => "Volume up!".to_string(),
            VolumeChange::Down => "Volume down!".to_string(),
            VolumeChange::Set(level) => format!("Set volume to {level}%!"),
        };
        Ok(ToolResult::success(reply.clone()).with_natural_response(reply))
    }
}

/// `take_screenshot`: captures the screen into the screenshot directory.
pub struct ScreenshotHandler {
    actuator: Arc<dyn Actuator>,
    directory: PathBuf,
}

impl ScreenshotHandler {
    /// Creates the handler saving into `directory`.
    #[must_use]
    pub fn new(actuator: Arc<dyn Actuator>, directory: impl Into<PathBuf>) -> Self {
        Self {
            actuator,
            directory: directory.into(),
        }
    }

    fn target_path(&self, requested: Option<&str>) -> PathBuf {
        let name = requested
            .and_then(|name| Path::new(name).file_name())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                PathBuf::from(Local::now().format("screenshot_%Y%m%d_%H%M%S.png").to_string())
            });
        let name = if name.extension().is_none() {
            name.with_extension("png")
        } else {
            name
        };
        self.directory.join(name)
    }
}

#[async_trait]
impl CapabilityHandler for ScreenshotHandler {
    async fn invoke(&self, arguments: Arguments) -> Result<ToolResult, HandlerError> {
        let requested = optional_text(&arguments, "filename");
        let path = self.target_path(requested.as_deref());
        Ok(match self.actuator.screenshot(&path).await {
            Ok(()) => {
                let shown = path.display().to_string();
                ToolResult::success(format!("Screenshot saved to {shown}"))
                    .with_data(json!({ "path": shown }))
                    .with_natural_response(format!("Got it! Screenshot saved to {shown}"))
            }
            Err(err) => ToolResult::failure(format!("Screenshot failed: {err}"))
                .with_natural_response("Couldn't take a screenshot right now."),
        })
    }
}

/// `power_control`: shutdown or restart; only reached once confirmed.
pub struct PowerHandler {
    actuator: Arc<dyn Actuator>,
}

impl PowerHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(actuator: Arc<dyn Actuator>) -> Self {
        Self { actuator }
    }
}

#[async_trait]
impl CapabilityHandler for PowerHandler {
    async fn invoke(&self, arguments: Arguments) -> Result<ToolResult, HandlerError> {
        let transition = required_text(&arguments, "action")?
            .parse::<PowerTransition>()
            .map_err(|reason| HandlerError::InvalidArgument {
                name: "action".into(),
                reason,
            })?;
        tracing::warn!(?transition, "power transition requested");
        Ok(match self.actuator.power(transition).await {
            Ok(()) => {
                let reply = match transition {
                    PowerTransition::Shutdown => "Shutting down now.",
                    PowerTransition::Restart => "Restarting now.",
                };
                ToolResult::success(reply).with_natural_response(reply)
            }
            Err(err) => ToolResult::failure(format!("Power control failed: {err}"))
                .with_natural_response("I couldn't change the power state."),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::{fakes::*, *};
    use crate::shell::ShellOutput;
    use serde_json::Value;

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn run_command_previews_output() {
        let long = "x".repeat(150);
        let shell = Arc::new(FakeShell::printing(&long));
        let result = RunCommandHandler::new(shell.clone())
            .invoke(args(json!({ "command": "echo x" })))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.reply_text(), format!("Here you go! {}", "x".repeat(100)));
        assert_eq!(shell.commands(), vec!["echo x".to_string()]);
    }

    #[tokio::test]
    async fn run_command_without_output_says_done() {
        let shell = Arc::new(FakeShell::printing(""));
        let result = RunCommandHandler::new(shell)
            .invoke(args(json!({ "command": "true" })))
            .await
            .unwrap();
        assert_eq!(result.reply_text(), "Done!");
    }

    #[tokio::test]
    async fn run_command_reports_nonzero_exit() {
        let shell = Arc::new(FakeShell {
            output: ShellOutput {
                exit_code: Some(2),
                stdout: String::new(),
                stderr: "no such file".into(),
            },
            ..FakeShell::default()
        });
        let result = RunCommandHandler::new(shell)
            .invoke(args(json!({ "command": "cat missing" })))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.message.as_deref(), Some("Command failed: no such file"));
        assert_eq!(result.reply_text(), COMMAND_FAILED);
    }

    #[tokio::test]
    async fn open_app_reports_missing_application() {
        let actuator = Arc::new(RecordingActuator::failing());
        let result = OpenAppHandler::new(actuator.clone())
            .invoke(args(json!({ "app_name": "nonexistent" })))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.reply_text(), "Hmm, I couldn't find nonexistent. Is it installed?");
        assert_eq!(actuator.calls(), vec!["launch:nonexistent".to_string()]);
    }

    #[tokio::test]
    async fn system_info_renders_report() {
        let actuator = Arc::new(RecordingActuator::default());
        let result = SystemInfoHandler::new(actuator.clone())
            .invoke(args(json!({ "info_type": "cpu" })))
            .await
            .unwrap();
        assert!(result.reply_text().starts_with("Here's what I found: CPU Usage: 12.5%"));
        assert_eq!(actuator.calls(), vec!["system_report:Cpu".to_string()]);

        let err = SystemInfoHandler::new(actuator)
            .invoke(args(json!({ "info_type": "gpu" })))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn volume_set_clamps_level() {
        let actuator = Arc::new(RecordingActuator::default());
        let handler = VolumeHandler::new(actuator.clone());
        let set = handler
            .invoke(args(json!({ "action": "set", "level": 140 })))
            .await
            .unwrap();
        assert_eq!(set.reply_text(), "Set volume to 100%!");
        let mute = handler.invoke(args(json!({ "action": "mute" }))).await.unwrap();
        assert_eq!(mute.reply_text(), "Muted!");
        assert_eq!(
            actuator.calls(),
            vec!["volume:Set(100)".to_string(), "volume:Mute".to_string()]
        );
        let missing = handler.invoke(args(json!({ "action": "set" }))).await.unwrap_err();
        assert!(matches!(missing, HandlerError::MissingArgument(name) if name == "level"));
    }

    #[tokio::test]
    async fn screenshot_strips_directories_from_filename() {
        let actuator = Arc::new(RecordingActuator::default());
        let handler = ScreenshotHandler::new(actuator.clone(), "/tmp/shots");
        let result = handler
            .invoke(args(json!({ "filename": "../../etc/evil" })))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(
            result.reply_text(),
            format!("Got it! Screenshot saved to {}", Path::new("/tmp/shots/evil.png").display())
        );
        let default = handler.target_path(None);
        let name = default.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("screenshot_") && name.ends_with(".png"));
    }

    #[tokio::test]
    async fn power_handler_drives_the_actuator() {
        let actuator = Arc::new(RecordingActuator::default());
        let result = PowerHandler::new(actuator.clone())
            .invoke(args(json!({ "action": "restart", "confirmed": true })))
            .await
            .unwrap();
        assert_eq!(result.reply_text(), "Restarting now.");
        assert_eq!(actuator.calls(), vec!["power:Restart".to_string()]);
    }
}
