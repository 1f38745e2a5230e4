//! Command Matcher
//!
//! Recognizes a fixed set of device-control phrases and, on a hit, triggers
//! the platform effect and returns a short spoken confirmation. Anything
//! that doesn't match goes to the remote service instead.
//!
//! # Matching Policy
//!
//! Input is trimmed and lower-cased, then tested against an ordered list of
//! prefix rules. The first rule whose prefix matches fires; later rules are
//! never consulted.
//!
//! # Side Effects
//!
//! Effects are delegated to a [`PlatformActions`] implementation. Delegation
//! is fire-and-forget: the matcher never learns whether the effect actually
//! happened, so confirmations describe the attempt, not the outcome.

use std::sync::Arc;

/// Outcome of a local command
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionResult {
    /// Text shown and spoken as the assistant turn
    pub spoken_confirmation: String,
}

impl ActionResult {
    fn new(text: impl Into<String>) -> Self {
        Self {
            spoken_confirmation: text.into(),
        }
    }
}

/// Settings panels a degraded action can surface
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingsPanel {
    /// Wireless connectivity panel
    Connectivity,
    /// Bluetooth panel
    Bluetooth,
}

/// Messaging channels for compose actions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageChannel {
    /// Plain SMS
    Sms,
    /// WhatsApp
    WhatsApp,
}

/// A device effect requested by the matcher
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlatformAction {
    /// Open a system settings panel
    OpenSettings(SettingsPanel),
    /// Show a short notice to the user
    ShowNotice(String),
    /// Raise (`true`) or lower (`false`) media volume one step
    AdjustVolume {
        /// Direction of the step
        raise: bool,
    },
    /// Set screen brightness, already clamped to `1..=255`
    SetBrightness(u8),
    /// Launch an application by display name
    LaunchApp(String),
    /// Set an alarm
    SetAlarm {
        /// Hour, 24h clock
        hour: u8,
        /// Minute
        minute: u8,
        /// Alarm label
        label: String,
    },
    /// Start a countdown timer
    StartTimer {
        /// Duration in seconds
        seconds: u32,
        /// Timer label
        label: String,
    },
    /// Open a message composer with a prefilled body
    ComposeMessage {
        /// Target channel
        channel: MessageChannel,
        /// Prefilled body
        body: String,
    },
}

/// Host capability that carries out platform effects
///
/// Implementations must not block: they are called from the Conductor's
/// resolution tasks. A host lacking a capability may simply ignore the
/// action.
pub trait PlatformActions: Send + Sync {
    /// Perform (or attempt) the action
    fn perform(&self, action: PlatformAction);
}

/// Platform that only logs requested actions
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPlatform;

impl PlatformActions for LoggingPlatform {
    fn perform(&self, action: PlatformAction) {
        tracing::info!(?action, "Platform action requested");
    }
}

/// Brightness used when no usable level was spoken
pub const DEFAULT_LEVEL: u8 = 128;

const ALARM_LABEL: &str = "Lily Alarm";
const TIMER_LABEL: &str = "Lily Timer";
const TIMER_SECONDS: u32 = 60;
const COMPOSE_BODY: &str = "Message from Lily";

#[derive(Clone, Copy, Debug)]
enum CommandKind {
    Radio {
        panel: SettingsPanel,
        name: &'static str,
        on: bool,
    },
    Volume {
        raise: bool,
    },
    Brightness,
    OpenApp,
    Alarm,
    Timer,
    Compose(MessageChannel),
}

#[derive(Clone, Copy, Debug)]
struct CommandRule {
    prefix: &'static str,
    kind: CommandKind,
}

const RULES: &[CommandRule] = &[
    CommandRule {
        prefix: "turn wifi on",
        kind: CommandKind::Radio {
            panel: SettingsPanel::Connectivity,
            name: "Wi-Fi",
            on: true,
        },
    },
    CommandRule {
        prefix: "turn wifi off",
        kind: CommandKind::Radio {
            panel: SettingsPanel::Connectivity,
            name: "Wi-Fi",
            on: false,
        },
    },
    CommandRule {
        prefix: "turn bluetooth on",
        kind: CommandKind::Radio {
            panel: SettingsPanel::Bluetooth,
            name: "Bluetooth",
            on: true,
        },
    },
    CommandRule {
        prefix: "turn bluetooth off",
        kind: CommandKind::Radio {
            panel: SettingsPanel::Bluetooth,
            name: "Bluetooth",
            on: false,
        },
    },
    CommandRule {
        prefix: "increase volume",
        kind: CommandKind::Volume { raise: true },
    },
    CommandRule {
        prefix: "decrease volume",
        kind: CommandKind::Volume { raise: false },
    },
    CommandRule {
        prefix: "set brightness",
        kind: CommandKind::Brightness,
    },
    CommandRule {
        prefix: "open ",
        kind: CommandKind::OpenApp,
    },
    CommandRule {
        prefix: "set alarm",
        kind: CommandKind::Alarm,
    },
    CommandRule {
        prefix: "set timer",
        kind: CommandKind::Timer,
    },
    CommandRule {
        prefix: "send sms",
        kind: CommandKind::Compose(MessageChannel::Sms),
    },
    CommandRule {
        prefix: "send whatsapp",
        kind: CommandKind::Compose(MessageChannel::WhatsApp),
    },
];

/// First-match-wins matcher over the built-in command catalog
#[derive(Clone)]
pub struct CommandMatcher {
    platform: Arc<dyn PlatformActions>,
}

impl std::fmt::Debug for CommandMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandMatcher")
            .field("rules", &RULES.len())
            .finish_non_exhaustive()
    }
}

impl CommandMatcher {
    /// Create a matcher that delegates effects to `platform`
    pub fn new(platform: Arc<dyn PlatformActions>) -> Self {
        Self { platform }
    }

    /// Try to resolve `text` locally
    ///
    /// Returns `None` when no rule matches; the caller should then use the
    /// remote path.
    pub fn try_match(&self, text: &str) -> Option<ActionResult> {
        let normalized = text.trim().to_lowercase();
        let rule = RULES.iter().find(|r| normalized.starts_with(r.prefix))?;

        tracing::debug!(prefix = rule.prefix, "Command matched");
        Some(self.execute(rule, &normalized))
    }

    fn execute(&self, rule: &CommandRule, normalized: &str) -> ActionResult {
        match rule.kind {
            CommandKind::Radio { panel, name, on } => {
                self.platform.perform(PlatformAction::OpenSettings(panel));
                self.platform.perform(PlatformAction::ShowNotice(format!(
                    "Please toggle {name} manually"
                )));
                let state = if on { "on" } else { "off" };
                ActionResult::new(format!("Turning {name} {state}"))
            }
            CommandKind::Volume { raise } => {
                self.platform.perform(PlatformAction::AdjustVolume { raise });
                ActionResult::new(if raise {
                    "Increasing volume"
                } else {
                    "Decreasing volume"
                })
            }
            CommandKind::Brightness => {
                self.platform
                    .perform(PlatformAction::SetBrightness(parse_level(normalized)));
                ActionResult::new("Setting brightness")
            }
            CommandKind::OpenApp => {
                let name = normalized[rule.prefix.len()..].trim().to_string();
                self.platform.perform(PlatformAction::LaunchApp(name.clone()));
                ActionResult::new(format!("Opening {name}"))
            }
            CommandKind::Alarm => {
                self.platform.perform(PlatformAction::SetAlarm {
                    hour: 7,
                    minute: 0,
                    label: ALARM_LABEL.to_string(),
                });
                ActionResult::new("Setting an alarm")
            }
            CommandKind::Timer => {
                self.platform.perform(PlatformAction::StartTimer {
                    seconds: TIMER_SECONDS,
                    label: TIMER_LABEL.to_string(),
                });
                ActionResult::new("Starting a timer")
            }
            CommandKind::Compose(channel) => {
                self.platform.perform(PlatformAction::ComposeMessage {
                    channel,
                    body: COMPOSE_BODY.to_string(),
                });
                ActionResult::new(match channel {
                    MessageChannel::Sms => "Opening SMS",
                    MessageChannel::WhatsApp => "Opening WhatsApp",
                })
            }
        }
    }
}

/// Extract a level from the digits in `text`, clamped to `1..=255`
///
/// All ASCII digits are concatenated ("level 2 0 0" reads as 200). No
/// digits, or a number too large to parse, yields [`DEFAULT_LEVEL`].
#[must_use]
pub fn parse_level(text: &str) -> u8 {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    match digits.parse::<u64>() {
        Ok(value) => u8::try_from(value.clamp(1, 255)).unwrap_or(DEFAULT_LEVEL),
        Err(_) => DEFAULT_LEVEL,
    }
}
