use once_cell::sync::Lazy;
use regex::RegexSet;

/// Patterns that mark a command as destructive (matched case-insensitively).
///
/// Recursive deletes are matched on tokens so flag order, spacing and long
/// options do not matter. Patterns stop at `;`, `&` and `|` so a flag from a
/// later command in a chain is not attributed to `rm`.
pub const DESTRUCTIVE_PATTERNS: &[&str] = &[
    r"\brm\b[^;&|]*\s-\w*r\w*\b",
    r"\brm\b[^;&|]*\s--recursive\b",
    r"\b(del|erase|rd|rmdir)\b[^;&|]*\s/s\b",
    r"\bdel\b[^;&|]*\s/f\b",
    r"\bfind\b[^;&|]*\s-delete\b",
    r"\bremove-item\b[^;&|]*\s-r(ecurse)?\b",
    r"\bformat\s",
    r"\bmkfs",
    r"\bdd\s+if=",
    r"\bof=/dev/",
    r">\s*/dev/sd",
    r"\bdiskpart\b",
    r"\bshred\b",
    r":\(\)\s*\{",
    r"\bchmod\s+-r\s+777\s+/",
];

/// Programs that change power state or escalate privileges.
pub const PRIVILEGED_PROGRAMS: &[&str] = &[
    "shutdown", "reboot", "poweroff", "halt", "systemctl", "init", "telinit", "sudo", "su",
    "doas", "pkexec", "runas",
];

/// Prefixes admitted by the allowlist policy.
pub const SAFE_PREFIXES: &[&str] = &[
    "dir",
    "ls",
    "echo",
    "date",
    "time",
    "whoami",
    "hostname",
    "ipconfig",
    "ifconfig",
    "ping",
    "tracert",
    "traceroute",
    "netstat",
    "systeminfo",
    "uname",
    "tasklist",
    "ps",
    "ver",
    "path",
    "cd",
    "pwd",
    "uptime",
    "df",
    "free",
];

static DESTRUCTIVE_SET: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new(
        DESTRUCTIVE_PATTERNS
            .iter()
            .map(|pattern| format!("(?i){pattern}")),
    )
    .expect("destructive patterns compile")
});

/// First destructive pattern contained in `command`, if any.
#[must_use]
pub fn destructive_match(command: &str) -> Option<&'static str> {
    DESTRUCTIVE_SET
        .matches(command)
        .iter()
        .next()
        .map(|index| DESTRUCTIVE_PATTERNS[index])
}

/// Privileged program named by a launch target, if any.
///
/// Only the basename counts, compared case-insensitively with any `.exe`
/// suffix removed, so `/sbin/reboot` and `SHUTDOWN.EXE` are both caught.
#[must_use]
pub fn privileged_program(target: &str) -> Option<&'static str> {
    let program = target.split_whitespace().next()?;
    let basename = program.rsplit(['/', '\\']).next().unwrap_or(program);
    let lowered = basename.to_ascii_lowercase();
    let stem = lowered.strip_suffix(".exe").unwrap_or(&lowered);
    PRIVILEGED_PROGRAMS.iter().copied().find(|name| *name == stem)
}

/// Whether the lowercased, trimmed command starts with an approved prefix.
#[must_use]
pub fn has_safe_prefix(command: &str) -> bool {
    let lowered = command.trim().to_lowercase();
    SAFE_PREFIXES.iter().any(|prefix| lowered.starts_with(prefix))
}
