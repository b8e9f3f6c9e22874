//! Keyboard scan code decoding
//!
//! Translates the scan codes reported in keystroke POLL responses into
//! [`Key`]s, tracking shift, alt and caps lock along the way. Keyboards
//! report modifier releases in one of two ways, see [`ReleaseStyle`].

mod keymap_3278_typewriter;
mod keymap_3483_102;

use std::collections::HashMap;

use bitflags::bitflags;

use crate::ebcdic::Codepage;

pub use self::keymap_3278_typewriter::keymap_3278_typewriter;
pub use self::keymap_3483_102::keymap_3483_102;

bitflags! {
    /// Modifier state
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct KeyboardModifiers: u8 {
        const LEFT_SHIFT = 0b0000_0001;
        const RIGHT_SHIFT = 0b0000_0010;
        const LEFT_ALT = 0b0000_0100;
        const RIGHT_ALT = 0b0000_1000;
        const CAPS_LOCK = 0b0001_0000;
    }
}

impl KeyboardModifiers {
    /// Is either shift key held?
    pub fn is_shift(self) -> bool {
        self.intersects(Self::LEFT_SHIFT | Self::RIGHT_SHIFT)
    }

    /// Is either alt key held?
    pub fn is_alt(self) -> bool {
        self.intersects(Self::LEFT_ALT | Self::RIGHT_ALT)
    }

    /// Is caps lock toggled on?
    pub fn is_caps_lock(self) -> bool {
        self.contains(Self::CAPS_LOCK)
    }
}

/// A logical key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    // Modifiers
    LeftShift,
    RightShift,
    LeftAlt,
    RightAlt,
    CapsLock,

    // Cursor movement
    Space,
    Backspace,
    Tab,
    Backtab,
    Newline,
    Insert,
    Delete,
    Left,
    Left2,
    Up,
    Right,
    Right2,
    Down,
    Home,
    Dup,
    Jump,

    // Function
    Pf1,
    Pf2,
    Pf3,
    Pf4,
    Pf5,
    Pf6,
    Pf7,
    Pf8,
    Pf9,
    Pf10,
    Pf11,
    Pf12,
    Pf13,
    Pf14,
    Pf15,
    Pf16,
    Pf17,
    Pf18,
    Pf19,
    Pf20,
    Pf21,
    Pf22,
    Pf23,
    Pf24,

    // Control
    Enter,
    Reset,
    Quit,
    DeviceCancel,
    SysRq,
    Attn,
    Clear,
    EraseInput,
    Print,
    Test,
    FieldMark,
    FieldExit,
    CursorSelect,
    CursorBlink,
    EraseEof,
    Clicker,
    AltCursor,
    Ident,
    ExtendSelect,
    Ctrl,
    Pa1,
    Pa2,
    Pa3,

    // Number pad
    NumpadZero,
    NumpadOne,
    NumpadTwo,
    NumpadThree,
    NumpadFour,
    NumpadFive,
    NumpadSix,
    NumpadSeven,
    NumpadEight,
    NumpadNine,
    NumpadPeriod,

    // Latin
    Backtick,
    Tilde,
    One,
    Bar,
    Two,
    At,
    Three,
    Hash,
    Four,
    Dollar,
    Five,
    Percent,
    Six,
    Not,
    Seven,
    Ampersand,
    Eight,
    Asterisk,
    Nine,
    LeftParen,
    Zero,
    RightParen,
    Minus,
    Underscore,
    Equal,
    Plus,
    LowerA,
    UpperA,
    LowerB,
    UpperB,
    LowerC,
    UpperC,
    LowerD,
    UpperD,
    LowerE,
    UpperE,
    LowerF,
    UpperF,
    LowerG,
    UpperG,
    LowerH,
    UpperH,
    LowerI,
    UpperI,
    LowerJ,
    UpperJ,
    LowerK,
    UpperK,
    LowerL,
    UpperL,
    LowerM,
    UpperM,
    LowerN,
    UpperN,
    LowerO,
    UpperO,
    LowerP,
    UpperP,
    LowerQ,
    UpperQ,
    LowerR,
    UpperR,
    LowerS,
    UpperS,
    LowerT,
    UpperT,
    LowerU,
    UpperU,
    LowerV,
    UpperV,
    LowerW,
    UpperW,
    LowerX,
    UpperX,
    LowerY,
    UpperY,
    LowerZ,
    UpperZ,
    Cent,
    Exclamation,
    Backslash,
    BrokenBar,
    Semicolon,
    Colon,
    SingleQuote,
    DoubleQuote,
    LeftBrace,
    RightBrace,
    Less,
    Greater,
    Comma,
    Period,
    CenterPeriod,
    Slash,
    Question,
}

const LETTERS: [(Key, Key); 26] = [
    (Key::LowerA, Key::UpperA),
    (Key::LowerB, Key::UpperB),
    (Key::LowerC, Key::UpperC),
    (Key::LowerD, Key::UpperD),
    (Key::LowerE, Key::UpperE),
    (Key::LowerF, Key::UpperF),
    (Key::LowerG, Key::UpperG),
    (Key::LowerH, Key::UpperH),
    (Key::LowerI, Key::UpperI),
    (Key::LowerJ, Key::UpperJ),
    (Key::LowerK, Key::UpperK),
    (Key::LowerL, Key::UpperL),
    (Key::LowerM, Key::UpperM),
    (Key::LowerN, Key::UpperN),
    (Key::LowerO, Key::UpperO),
    (Key::LowerP, Key::UpperP),
    (Key::LowerQ, Key::UpperQ),
    (Key::LowerR, Key::UpperR),
    (Key::LowerS, Key::UpperS),
    (Key::LowerT, Key::UpperT),
    (Key::LowerU, Key::UpperU),
    (Key::LowerV, Key::UpperV),
    (Key::LowerW, Key::UpperW),
    (Key::LowerX, Key::UpperX),
    (Key::LowerY, Key::UpperY),
    (Key::LowerZ, Key::UpperZ),
];

impl Key {
    /// Character typed by the key, if any
    pub fn character(self) -> Option<char> {
        let character = match self {
            Key::Space => ' ',
            Key::Tab => '\t',
            Key::NumpadZero | Key::Zero => '0',
            Key::NumpadOne | Key::One => '1',
            Key::NumpadTwo | Key::Two => '2',
            Key::NumpadThree | Key::Three => '3',
            Key::NumpadFour | Key::Four => '4',
            Key::NumpadFive | Key::Five => '5',
            Key::NumpadSix | Key::Six => '6',
            Key::NumpadSeven | Key::Seven => '7',
            Key::NumpadEight | Key::Eight => '8',
            Key::NumpadNine | Key::Nine => '9',
            Key::NumpadPeriod | Key::Period => '.',
            Key::Backtick => '`',
            Key::Tilde => '~',
            Key::Bar => '|',
            Key::At => '@',
            Key::Hash => '#',
            Key::Dollar => '$',
            Key::Percent => '%',
            Key::Not => '\u{00AC}',
            Key::Ampersand => '&',
            Key::Asterisk => '*',
            Key::LeftParen => '(',
            Key::RightParen => ')',
            Key::Minus => '-',
            Key::Underscore => '_',
            Key::Equal => '=',
            Key::Plus => '+',
            Key::Cent => '\u{00A2}',
            Key::Exclamation => '!',
            Key::Backslash => '\\',
            Key::BrokenBar => '\u{00A6}',
            Key::Semicolon => ';',
            Key::Colon => ':',
            Key::SingleQuote => '\'',
            Key::DoubleQuote => '"',
            Key::LeftBrace => '{',
            Key::RightBrace => '}',
            Key::Less => '<',
            Key::Greater => '>',
            Key::Comma => ',',
            Key::CenterPeriod => '\u{00B7}',
            Key::Slash => '/',
            Key::Question => '?',
            key => return key.letter(),
        };

        Some(character)
    }

    fn letter(self) -> Option<char> {
        LETTERS
            .iter()
            .enumerate()
            .find_map(|(index, (lower, upper))| {
                let offset = index as u8;

                if self == *lower {
                    Some((b'a' + offset) as char)
                } else if self == *upper {
                    Some((b'A' + offset) as char)
                } else {
                    None
                }
            })
    }

    pub fn to_upper(self) -> Key {
        LETTERS
            .iter()
            .find(|(lower, _)| *lower == self)
            .map_or(self, |(_, upper)| *upper)
    }

    pub fn to_lower(self) -> Key {
        LETTERS
            .iter()
            .find(|(_, upper)| *upper == self)
            .map_or(self, |(lower, _)| *lower)
    }

    /// The modifier this key controls, if it is a modifier key
    pub fn modifier(self) -> Option<KeyboardModifiers> {
        match self {
            Key::LeftShift => Some(KeyboardModifiers::LEFT_SHIFT),
            Key::RightShift => Some(KeyboardModifiers::RIGHT_SHIFT),
            Key::LeftAlt => Some(KeyboardModifiers::LEFT_ALT),
            Key::RightAlt => Some(KeyboardModifiers::RIGHT_ALT),
            Key::CapsLock => Some(KeyboardModifiers::CAPS_LOCK),
            _ => None,
        }
    }

    pub fn is_modifier(self) -> bool {
        self.modifier().is_some()
    }
}

/// How a keyboard reports modifier key releases
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseStyle {
    /// The scan code announces that the next scan code is a release
    SingleSentinel(u8),
    /// Each modifier has its own release scan code
    PerKeyMap(HashMap<u8, Key>),
}

/// Scan code to key tables for one keyboard
#[derive(Debug, Clone)]
pub struct Keymap {
    pub name: &'static str,
    pub default: HashMap<u8, Key>,
    pub shift: HashMap<u8, Key>,
    pub alt: HashMap<u8, Key>,
    pub modifier_release: ReleaseStyle,
}

impl Keymap {
    /// Build a keymap where the shift and alt tables override the default
    pub fn new(
        name: &'static str,
        default: &[(u8, Key)],
        shift: &[(u8, Key)],
        alt: &[(u8, Key)],
        modifier_release: ReleaseStyle,
    ) -> Self {
        let default: HashMap<u8, Key> = default.iter().copied().collect();

        let overlay = |overrides: &[(u8, Key)]| {
            let mut table = default.clone();
            table.extend(overrides.iter().copied());
            table
        };

        Self {
            name,
            shift: overlay(shift),
            alt: overlay(alt),
            default,
            modifier_release,
        }
    }
}

enum ModifierUpdate {
    /// Not a modifier scan code
    None,
    /// The release sentinel was seen
    Sentinel,
    Press,
    Release,
}

/// Keyboard state
#[derive(Debug, Clone)]
pub struct Keyboard {
    keymap: Keymap,
    modifiers: KeyboardModifiers,
    modifier_release: bool,
    clicker: bool,
}

impl Keyboard {
    pub fn new(keymap: Keymap) -> Self {
        Self {
            keymap,
            modifiers: KeyboardModifiers::empty(),
            modifier_release: false,
            clicker: false,
        }
    }

    pub fn keymap(&self) -> &Keymap {
        &self.keymap
    }

    pub fn modifiers(&self) -> KeyboardModifiers {
        self.modifiers
    }

    pub fn clicker(&self) -> bool {
        self.clicker
    }

    pub fn toggle_clicker(&mut self) {
        self.clicker = !self.clicker;
    }

    /// Map a scan code to a key, updating the modifier state
    ///
    /// Returns the key, the modifiers after the scan code was applied and
    /// whether the modifiers changed.
    pub fn get_key(&mut self, scan_code: u8) -> (Option<Key>, KeyboardModifiers, bool) {
        let key = self.keymap.default.get(&scan_code).copied();

        let original_modifiers = self.modifiers;

        match self.apply_modifiers(scan_code, key) {
            ModifierUpdate::Sentinel => return (key, self.modifiers, false),
            ModifierUpdate::Press => return (key, self.modifiers, self.modifiers != original_modifiers),
            ModifierUpdate::Release => return (None, self.modifiers, self.modifiers != original_modifiers),
            ModifierUpdate::None => {},
        }

        let key = if self.modifiers.is_shift() {
            self.keymap.shift.get(&scan_code).copied()
        } else if self.modifiers.is_alt() {
            self.keymap.alt.get(&scan_code).copied()
        } else {
            key
        };

        let Some(mut key) = key else {
            return (None, self.modifiers, false);
        };

        if self.modifiers.is_caps_lock() {
            key = if self.modifiers.is_shift() {
                key.to_lower()
            } else {
                key.to_upper()
            };
        }

        (Some(key), self.modifiers, false)
    }

    fn apply_modifiers(&mut self, scan_code: u8, key: Option<Key>) -> ModifierUpdate {
        let released_key = match &self.keymap.modifier_release {
            ReleaseStyle::SingleSentinel(sentinel) if scan_code == *sentinel => {
                self.modifier_release = true;

                return ModifierUpdate::Sentinel;
            },
            ReleaseStyle::SingleSentinel(_) if self.modifier_release => Some(key),
            ReleaseStyle::PerKeyMap(releases) => releases.get(&scan_code).map(|key| Some(*key)),
            ReleaseStyle::SingleSentinel(_) => None,
        };

        if let Some(released_key) = released_key {
            self.modifier_release = false;

            let Some(modifier) = released_key.and_then(Key::modifier) else {
                return ModifierUpdate::None;
            };

            // Caps lock is a toggle, its release has no effect.
            if modifier != KeyboardModifiers::CAPS_LOCK {
                self.modifiers.remove(modifier);
            }

            return ModifierUpdate::Release;
        }

        match key.and_then(Key::modifier) {
            Some(KeyboardModifiers::CAPS_LOCK) => {
                self.modifiers.toggle(KeyboardModifiers::CAPS_LOCK);

                ModifierUpdate::Press
            },
            Some(modifier) => {
                self.modifiers.insert(modifier);

                ModifierUpdate::Press
            },
            None => ModifierUpdate::None,
        }
    }
}

/// Character for a key, if it types one
pub fn get_ascii_character_for_key(key: Key) -> Option<char> {
    key.character()
}

/// EBCDIC byte for a key, if it types a character the code page has
pub fn get_ebcdic_character_for_key(key: Key, codepage: Codepage) -> Option<u8> {
    key.character().and_then(|character| codepage.encode(character))
}
