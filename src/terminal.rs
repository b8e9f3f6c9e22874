//! Attached terminal
//!
//! A [`Terminal`] bundles everything known about an attached 3270 display:
//! its identifiers and features, the buffered display, the keyboard state and
//! the control register. It is created when a device is found and dropped
//! when the device stops responding.

use std::time::Duration;

use crate::coax::{
    CoaxError, Command, Control, DeviceAddress, Feature, Features, PollAction, PollResponse,
    TerminalId, TerminalType,
};
use crate::device::{format_address, get_features, get_ids, Device, FeatureOverride};
use crate::display::{Dimensions, Display, DisplayError};
use crate::interface::{ExecuteError, InterfaceWrapper};
use crate::keyboard::{keymap_3278_typewriter, keymap_3483_102, Keyboard, Keymap};

/// Display size by terminal model
pub const MODEL_DIMENSIONS: [(u8, Dimensions); 4] = [
    (2, Dimensions::new(24, 80)),
    (3, Dimensions::new(32, 80)),
    (4, Dimensions::new(43, 80)),
    (5, Dimensions::new(27, 132)),
];

/// Extended identifiers of keyboards using the 3483 layout
const KEYMAP_3483_EXTENDED_IDS: [&str; 2] = ["c1348300", "c1347200"];

#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    #[error("Unsupported device: {0}")]
    UnsupportedDevice(String),

    #[error("Unsupported terminal: {0}")]
    UnsupportedTerminal(String),

    #[error(transparent)]
    Coax(#[from] CoaxError),

    #[error(transparent)]
    Execute(#[from] ExecuteError),

    #[error(transparent)]
    Display(#[from] DisplayError),
}

/// Settings used while identifying a new terminal
#[derive(Debug, Clone)]
pub struct TerminalOptions {
    pub extended_id_retry_attempts: usize,
    pub extended_id_retry_delay: Duration,
    pub feature_overrides: Vec<FeatureOverride>,
}

impl Default for TerminalOptions {
    fn default() -> Self {
        Self {
            extended_id_retry_attempts: 3,
            extended_id_retry_delay: Duration::from_millis(250),
            feature_overrides: Vec::new(),
        }
    }
}

pub fn get_dimensions(terminal_id: &TerminalId) -> Result<Dimensions, AttachError> {
    MODEL_DIMENSIONS
        .iter()
        .find(|(model, _)| *model == terminal_id.model)
        .map(|(_, dimensions)| *dimensions)
        .ok_or_else(|| {
            AttachError::UnsupportedDevice(format!("Model {} is not supported", terminal_id.model))
        })
}

pub fn get_keymap(extended_id: Option<&str>) -> Keymap {
    match extended_id {
        Some(extended_id) if KEYMAP_3483_EXTENDED_IDS.contains(&extended_id) => keymap_3483_102(),
        _ => keymap_3278_typewriter(),
    }
}

#[derive(Debug)]
pub struct Terminal {
    device: Device,
    pub terminal_id: TerminalId,
    pub extended_id: Option<String>,
    pub features: Features,
    pub display: Display,
    pub keyboard: Keyboard,
    control: Control,
    alarm: bool,
    last_poll_keyboard_clicker: Option<bool>,
}

impl Terminal {
    pub fn new(
        device: Device,
        terminal_id: TerminalId,
        extended_id: Option<String>,
        features: Features,
        keymap: Keymap,
    ) -> Result<Self, AttachError> {
        let dimensions = get_dimensions(&terminal_id)?;

        let eab_address = features.get(&Feature::Eab).copied();

        let display = Display::new(device.clone(), dimensions, eab_address);

        Ok(Self {
            device,
            terminal_id,
            extended_id,
            features,
            display,
            keyboard: Keyboard::new(keymap),
            control: Control::empty(),
            alarm: false,
            last_poll_keyboard_clicker: None,
        })
    }

    pub fn address(&self) -> DeviceAddress {
        self.device.address
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn control(&self) -> Control {
        self.control
    }

    /// Push the initial state to the terminal
    pub fn setup(&mut self) -> Result<(), AttachError> {
        self.load_control_register()?;

        if self.display.has_eab() {
            self.display.load_eab_mask(0xff)?;
        }

        self.display.clear(true)?;

        self.display.status_line().write_string(0, "S")?;

        Ok(())
    }

    /// The action to send with the next POLL
    ///
    /// This does not change any state; call [`Terminal::commit_poll_action`]
    /// once the POLL has succeeded.
    pub fn get_poll_action(&self) -> PollAction {
        if self.alarm {
            return PollAction::Alarm;
        }

        let clicker = self.keyboard.clicker();

        if self.last_poll_keyboard_clicker != Some(clicker) {
            return if clicker {
                PollAction::EnableKeyboardClicker
            } else {
                PollAction::DisableKeyboardClicker
            };
        }

        PollAction::None
    }

    /// Record that the POLL carrying `action` was delivered
    pub fn commit_poll_action(&mut self, action: PollAction) {
        match action {
            PollAction::Alarm => self.alarm = false,
            PollAction::EnableKeyboardClicker => self.last_poll_keyboard_clicker = Some(true),
            PollAction::DisableKeyboardClicker => self.last_poll_keyboard_clicker = Some(false),
            PollAction::None => {},
        }
    }

    /// Sound the alarm with the next POLL
    pub fn sound_alarm(&mut self) {
        self.alarm = true;
    }

    pub fn load_control_register(&mut self) -> Result<(), ExecuteError> {
        self.device.execute(vec![Command::LoadControlRegister(self.control)])?;

        Ok(())
    }

    pub fn toggle_cursor_blink(&mut self) -> Result<(), ExecuteError> {
        self.control.toggle(Control::CURSOR_BLINK);

        self.load_control_register()
    }

    pub fn toggle_cursor_reverse(&mut self) -> Result<(), ExecuteError> {
        self.control.toggle(Control::CURSOR_REVERSE);

        self.load_control_register()
    }
}

/// Identify the device at `address` and build a terminal for it
pub fn create_terminal(
    interface: &InterfaceWrapper,
    address: DeviceAddress,
    poll_response: PollResponse,
    options: &TerminalOptions,
) -> Result<Terminal, AttachError> {
    tracing::debug!(
        "Creating terminal @ {} after {:?}",
        format_address(interface, address),
        poll_response
    );

    let (terminal_id, extended_id) = get_ids(
        interface,
        address,
        options.extended_id_retry_attempts,
        options.extended_id_retry_delay,
    )?;

    let Some(terminal_id) = terminal_id else {
        return Err(AttachError::UnsupportedDevice(
            "Unable to read terminal identifier".to_string(),
        ));
    };

    tracing::info!(
        "Terminal ID = {}, Extended ID = {}",
        terminal_id,
        extended_id.as_deref().unwrap_or("None")
    );

    if terminal_id.terminal_type != TerminalType::Cut {
        return Err(AttachError::UnsupportedTerminal(
            "Only CUT type terminals are supported".to_string(),
        ));
    }

    let features = get_features(interface, address, &options.feature_overrides)?;

    tracing::info!("Features = {:?}", features);

    let keymap = get_keymap(extended_id.as_deref());

    tracing::info!("Keymap = {}", keymap.name);

    Terminal::new(
        Device::new(interface.clone(), address),
        terminal_id,
        extended_id,
        features,
        keymap,
    )
}
