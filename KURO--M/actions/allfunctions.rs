use std::{path::PathBuf, sync::Arc};

use kuro_memory::MemoryStore;

use crate::{
    actuator::{Actuator, SystemActuator},
    arguments::{ArgumentSchema, ParamKind},
    capabilities::{CapabilityDescriptor, CapabilityRegistry, RiskClass},
    conversationact::{JokeHandler, ReplyHandler},
    internetact::{PageFetcher, WebScrapeHandler, WebSearchHandler},
    memoryact::{ForgetMemoryHandler, RecallMemoryHandler, SaveMemoryHandler},
    offlineact::{
        OpenAppHandler, PowerHandler, RunCommandHandler, ScreenshotHandler, SystemInfoHandler,
        VolumeHandler,
    },
    security::CONFIRMATION_ARGUMENT,
    shell::ShellRunner,
};

/// Collaborators the built-in capabilities act through.
#[derive(Clone)]
pub struct BuiltinServices {
    /// Long-term memory.
    pub memory: Arc<dyn MemoryStore>,
    /// OS side effects.
    pub actuator: Arc<dyn Actuator>,
    /// Shell execution.
    pub shell: Arc<dyn ShellRunner>,
    /// HTML fetching for `web_scrape`.
    pub fetcher: Arc<dyn PageFetcher>,
    /// Where screenshots are written.
    pub screenshot_dir: PathBuf,
}

impl BuiltinServices {
    /// Services using the local machine for OS effects.
    #[must_use]
    pub fn new(
        memory: Arc<dyn MemoryStore>,
        shell: Arc<dyn ShellRunner>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        Self {
            memory,
            actuator: Arc::new(SystemActuator::new()),
            shell,
            fetcher,
            screenshot_dir: SystemActuator::pictures_dir(),
        }
    }

    /// Replaces the actuator.
    #[must_use]
    pub fn with_actuator(mut self, actuator: Arc<dyn Actuator>) -> Self {
        self.actuator = actuator;
        self
    }

    /// Replaces the screenshot directory.
    #[must_use]
    pub fn with_screenshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.screenshot_dir = dir.into();
        self
    }
}

/// Registry holding every built-in capability.
#[must_use]
pub fn builtin_registry(services: BuiltinServices) -> CapabilityRegistry {
    use ParamKind::{Boolean, Integer, String as Text};

    let BuiltinServices {
        memory,
        actuator,
        shell,
        fetcher,
        screenshot_dir,
    } = services;

    CapabilityRegistry::builder()
        .register(
            CapabilityDescriptor::new("reply", "Respond conversationally to the user")
                .schema(ArgumentSchema::new().required("message", Text, "Text to say back")),
            Arc::new(ReplyHandler),
        )
        .register(
            CapabilityDescriptor::new("save_memory", "Store a fact about the user for later")
                .schema(
                    ArgumentSchema::new()
                        .required("text", Text, "Fact to remember")
                        .optional("importance", Text, "low, medium, high or critical")
                        .optional("category", Text, "preference, fact, personal or task"),
                ),
            Arc::new(SaveMemoryHandler::new(Arc::clone(&memory))),
        )
        .register(
            CapabilityDescriptor::new("recall_memory", "Search stored memories")
                .schema(ArgumentSchema::new().required("query", Text, "What to look for")),
            Arc::new(RecallMemoryHandler::new(Arc::clone(&memory))),
        )
        .register(
            CapabilityDescriptor::new("forget_memory", "Delete a stored memory by id")
                .schema(ArgumentSchema::new().required("memory_id", Text, "Memory id"))
                .risk(RiskClass::Destructive),
            Arc::new(ForgetMemoryHandler::new(memory)),
        )
        .register(
            CapabilityDescriptor::new("run_command", "Run a shell command on this machine")
                .schema(ArgumentSchema::new().required("command", Text, "Command line to run"))
                .risk(RiskClass::Destructive)
                .command_argument("command"),
            Arc::new(RunCommandHandler::new(shell)),
        )
        .register(
            CapabilityDescriptor::new("open_app", "Open a desktop application")
                .schema(ArgumentSchema::new().required("app_name", Text, "Application name"))
                .program_argument("app_name"),
            Arc::new(OpenAppHandler::new(Arc::clone(&actuator))),
        )
        .register(
            CapabilityDescriptor::new("web_search", "Search the web in the browser")
                .schema(ArgumentSchema::new().required("query", Text, "Search terms")),
            Arc::new(WebSearchHandler::new(Arc::clone(&actuator))),
        )
        .register(
            CapabilityDescriptor::new("web_scrape", "Open a website or search within it")
                .schema(
                    ArgumentSchema::new()
                        .required("target", Text, "URL or site name such as youtube")
                        .optional("query", Text, "Search term on that site"),
                ),
            Arc::new(WebScrapeHandler::new(Arc::clone(&actuator), fetcher)),
        )
        .register(
            CapabilityDescriptor::new("tell_joke", "Tell a programming joke"),
            Arc::new(JokeHandler),
        )
        .register(
            CapabilityDescriptor::new("system_info", "Report battery, CPU, memory or disk usage")
                .schema(ArgumentSchema::new().optional(
                    "info_type",
                    Text,
                    "battery, cpu, memory, disk or all",
                )),
            Arc::new(SystemInfoHandler::new(Arc::clone(&actuator))),
        )
        .register(
            CapabilityDescriptor::new("volume_control", "Change the output volume")
                .schema(
                    ArgumentSchema::new()
                        .required("action", Text, "up, down, mute, unmute or set")
                        .optional("level", Integer, "Level 0-100 for set"),
                ),
            Arc::new(VolumeHandler::new(Arc::clone(&actuator))),
        )
        .register(
            CapabilityDescriptor::new("take_screenshot", "Capture the screen")
                .schema(ArgumentSchema::new().optional("filename", Text, "File name for the image")),
            Arc::new(ScreenshotHandler::new(Arc::clone(&actuator), screenshot_dir)),
        )
        .register(
            CapabilityDescriptor::new("power_control", "Shut down or restart the computer")
                .schema(
                    ArgumentSchema::new()
                        .required("action", Text, "shutdown or restart")
                        .optional(CONFIRMATION_ARGUMENT, Boolean, "Explicit user confirmation"),
                )
                .risk(RiskClass::Irreversible),
            Arc::new(PowerHandler::new(actuator)),
        )
        .build()
}
