//! IBM 3483 keyboard, 102 key layout
//!
//! Mapped from photographs of the 3270 keycaps; some keys are unconfirmed.

use super::{Key, Keymap, ReleaseStyle};

/// Scan code that precedes a modifier release
pub const MODIFIER_RELEASE: u8 = 240;

const DEFAULT: &[(u8, Key)] = &[
    // Function Keys
    (7, Key::Pf1),
    (15, Key::Pf2),
    (23, Key::Pf3),
    (31, Key::Pf4),
    (39, Key::Pf5),
    (47, Key::Pf6),
    (55, Key::Pf7),
    (63, Key::Pf8),
    (71, Key::Pf9),
    (79, Key::Pf10),
    (86, Key::Pf11),
    (94, Key::Pf12),

    // Control Keys
    (5, Key::Attn),
    (6, Key::Clear),
    (4, Key::CursorSelect),
    (3, Key::ExtendSelect),
    (11, Key::EraseEof),
    (131, Key::Print),
    (1, Key::Print),
    (9, Key::Ctrl),

    // First Row
    (14, Key::Backtick),
    (22, Key::One),
    (30, Key::Two),
    (38, Key::Three),
    (37, Key::Four),
    (46, Key::Five),
    (54, Key::Six),
    (61, Key::Seven),
    (62, Key::Eight),
    (70, Key::Nine),
    (69, Key::Zero),
    (78, Key::Minus),
    (85, Key::Equal),
    (102, Key::Backspace),

    // Second Row
    (13, Key::Tab),
    (21, Key::LowerQ),
    (29, Key::LowerW),
    (36, Key::LowerE),
    (45, Key::LowerR),
    (44, Key::LowerT),
    (53, Key::LowerY),
    (60, Key::LowerU),
    (67, Key::LowerI),
    (68, Key::LowerO),
    (77, Key::LowerP),
    (84, Key::Cent),
    (91, Key::Backslash),
    (90, Key::Newline),

    // Third Row
    (20, Key::CapsLock),
    (28, Key::LowerA),
    (27, Key::LowerS),
    (35, Key::LowerD),
    (43, Key::LowerF),
    (52, Key::LowerG),
    (51, Key::LowerH),
    (59, Key::LowerJ),
    (66, Key::LowerK),
    (75, Key::LowerL),
    (76, Key::Semicolon),
    (82, Key::SingleQuote),
    (83, Key::LeftBrace),

    // Fourth Row
    (18, Key::LeftShift),
    (19, Key::Less),
    (26, Key::LowerZ),
    (34, Key::LowerX),
    (33, Key::LowerC),
    (42, Key::LowerV),
    (50, Key::LowerB),
    (49, Key::LowerN),
    (58, Key::LowerM),
    (65, Key::Comma),
    (73, Key::Period),
    (74, Key::Slash),
    (89, Key::RightShift),

    // Bottom Row
    (17, Key::Reset),
    (25, Key::LeftAlt),
    (41, Key::Space),
    (57, Key::RightAlt),
    (88, Key::Enter),

    // Center
    (103, Key::Insert),
    (110, Key::Home),
    (111, Key::Jump),
    (100, Key::Delete),
    (101, Key::EraseEof),
    (109, Key::Delete),
    (99, Key::Up),
    (97, Key::Left),
    (106, Key::Right),
    (96, Key::Down),

    // Number Pad
    (126, Key::Comma),
    (132, Key::Space),
    (108, Key::NumpadSeven),
    (117, Key::NumpadEight),
    (125, Key::NumpadNine),
    (124, Key::Tab),
    (107, Key::NumpadFour),
    (115, Key::NumpadFive),
    (116, Key::NumpadSix),
    (123, Key::Minus),
    (105, Key::NumpadOne),
    (114, Key::NumpadTwo),
    (122, Key::NumpadThree),
    (121, Key::Enter),
    (112, Key::NumpadZero),
    (113, Key::NumpadPeriod),
];

const SHIFT: &[(u8, Key)] = &[
    // Function Keys
    (7, Key::Pf13),
    (15, Key::Pf14),
    (23, Key::Pf15),
    (31, Key::Pf16),
    (39, Key::Pf17),
    (47, Key::Pf18),
    (55, Key::Pf19),
    (63, Key::Pf20),
    (71, Key::Pf21),
    (79, Key::Pf22),
    (86, Key::Pf23),
    (94, Key::Pf24),

    // First Row
    (14, Key::Tilde),
    (22, Key::Bar),
    (30, Key::At),
    (38, Key::Hash),
    (37, Key::Dollar),
    (46, Key::Percent),
    (54, Key::Not),
    (61, Key::Ampersand),
    (62, Key::Asterisk),
    (70, Key::LeftParen),
    (69, Key::RightParen),
    (78, Key::Underscore),
    (85, Key::Plus),

    // Second Row
    (13, Key::Backtab),
    (21, Key::UpperQ),
    (29, Key::UpperW),
    (36, Key::UpperE),
    (45, Key::UpperR),
    (44, Key::UpperT),
    (53, Key::UpperY),
    (60, Key::UpperU),
    (67, Key::UpperI),
    (68, Key::UpperO),
    (77, Key::UpperP),
    (84, Key::Exclamation),
    (91, Key::BrokenBar),

    // Third Row
    (28, Key::UpperA),
    (27, Key::UpperS),
    (35, Key::UpperD),
    (43, Key::UpperF),
    (52, Key::UpperG),
    (51, Key::UpperH),
    (59, Key::UpperJ),
    (66, Key::UpperK),
    (75, Key::UpperL),
    (76, Key::Colon),
    (82, Key::DoubleQuote),
    (83, Key::RightBrace),

    // Fourth Row
    (19, Key::Greater),
    (26, Key::UpperZ),
    (34, Key::UpperX),
    (33, Key::UpperC),
    (42, Key::UpperV),
    (50, Key::UpperB),
    (49, Key::UpperN),
    (58, Key::UpperM),
    (65, Key::Comma),
    (73, Key::CenterPeriod),
    (74, Key::Question),

    // Center
    (103, Key::Dup),
    (110, Key::FieldMark),
    (111, Key::Pa3),
];

const ALT: &[(u8, Key)] = &[
    // Control Keys
    (5, Key::SysRq),
    (12, Key::EraseInput),
    (131, Key::Ident),
    (10, Key::Test),

    // Center
    (103, Key::Pa1),
    (110, Key::Pa2),
    (97, Key::Left2),
    (98, Key::Home),
    (106, Key::Right2),
];

pub fn keymap_3483_102() -> Keymap {
    Keymap::new(
        "3483_102",
        DEFAULT,
        SHIFT,
        ALT,
        ReleaseStyle::SingleSentinel(MODIFIER_RELEASE),
    )
}
