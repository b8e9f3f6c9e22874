//! IBM 3278 typewriter keyboard

use std::collections::HashMap;

use super::{Key, Keymap, ReleaseStyle};

const DEFAULT: &[(u8, Key)] = &[
    // Control Keys
    (80, Key::Attn),
    (81, Key::CursorSelect),
    (84, Key::CursorBlink),
    (85, Key::EraseEof),
    (86, Key::Print),
    (87, Key::Clicker),

    // First Row
    (61, Key::Backtick),
    (33, Key::One),
    (34, Key::Two),
    (35, Key::Three),
    (36, Key::Four),
    (37, Key::Five),
    (38, Key::Six),
    (39, Key::Seven),
    (40, Key::Eight),
    (41, Key::Nine),
    (32, Key::Zero),
    (48, Key::Minus),
    (17, Key::Equal),
    (49, Key::Backspace),

    // Second Row
    (54, Key::Tab),
    (112, Key::LowerQ),
    (118, Key::LowerW),
    (100, Key::LowerE),
    (113, Key::LowerR),
    (115, Key::LowerT),
    (120, Key::LowerY),
    (116, Key::LowerU),
    (104, Key::LowerI),
    (110, Key::LowerO),
    (111, Key::LowerP),
    (27, Key::Cent),
    (21, Key::Backslash),
    (53, Key::Backtab),

    // Third Row
    (76, Key::CapsLock),
    (96, Key::LowerA),
    (114, Key::LowerS),
    (99, Key::LowerD),
    (101, Key::LowerF),
    (102, Key::LowerG),
    (103, Key::LowerH),
    (105, Key::LowerJ),
    (106, Key::LowerK),
    (107, Key::LowerL),
    (126, Key::Semicolon),
    (18, Key::SingleQuote),
    (15, Key::LeftBrace),
    (8, Key::Newline),

    // Fourth Row
    (77, Key::LeftShift),
    (9, Key::Less),
    (121, Key::LowerZ),
    (119, Key::LowerX),
    (98, Key::LowerC),
    (117, Key::LowerV),
    (97, Key::LowerB),
    (109, Key::LowerN),
    (108, Key::LowerM),
    (51, Key::Comma),
    (50, Key::Period),
    (20, Key::Slash),
    (78, Key::RightShift),

    // Bottom Row
    (52, Key::Reset),
    (16, Key::Space),
    (79, Key::RightAlt),
    (24, Key::Enter),

    // Right
    (95, Key::Dup),
    (94, Key::FieldMark),
    (12, Key::Insert),
    (13, Key::Delete),
    (14, Key::Up),
    (19, Key::Down),
    (22, Key::Left),
    (26, Key::Right),
];

const SHIFT: &[(u8, Key)] = &[
    // First Row
    (61, Key::Tilde),
    (33, Key::Bar),
    (34, Key::At),
    (35, Key::Hash),
    (36, Key::Dollar),
    (37, Key::Percent),
    (38, Key::Not),
    (39, Key::Ampersand),
    (40, Key::Asterisk),
    (41, Key::LeftParen),
    (32, Key::RightParen),
    (48, Key::Underscore),
    (17, Key::Plus),

    // Second Row
    (112, Key::UpperQ),
    (118, Key::UpperW),
    (100, Key::UpperE),
    (113, Key::UpperR),
    (115, Key::UpperT),
    (120, Key::UpperY),
    (116, Key::UpperU),
    (104, Key::UpperI),
    (110, Key::UpperO),
    (111, Key::UpperP),
    (27, Key::Exclamation),
    (21, Key::BrokenBar),

    // Third Row
    (96, Key::UpperA),
    (114, Key::UpperS),
    (99, Key::UpperD),
    (101, Key::UpperF),
    (102, Key::UpperG),
    (103, Key::UpperH),
    (105, Key::UpperJ),
    (106, Key::UpperK),
    (107, Key::UpperL),
    (126, Key::Colon),
    (18, Key::DoubleQuote),
    (15, Key::RightBrace),

    // Fourth Row
    (9, Key::Greater),
    (121, Key::UpperZ),
    (119, Key::UpperX),
    (98, Key::UpperC),
    (117, Key::UpperV),
    (97, Key::UpperB),
    (109, Key::UpperN),
    (108, Key::UpperM),
    (51, Key::Comma),
    (50, Key::CenterPeriod),
    (20, Key::Question),
];

const ALT: &[(u8, Key)] = &[
    // Control Keys
    (80, Key::SysRq),
    (81, Key::Clear),
    (83, Key::EraseInput),
    (84, Key::AltCursor),
    (86, Key::Ident),
    (87, Key::Test),

    // First Row
    (33, Key::Pf1),
    (34, Key::Pf2),
    (35, Key::Pf3),
    (36, Key::Pf4),
    (37, Key::Pf5),
    (38, Key::Pf6),
    (39, Key::Pf7),
    (40, Key::Pf8),
    (41, Key::Pf9),
    (32, Key::Pf10),
    (48, Key::Pf11),
    (17, Key::Pf12),

    // Second Row
    (53, Key::Home),

    // Right
    (95, Key::Pa1),
    (94, Key::Pa2),
    (22, Key::Left2),
    (26, Key::Right2),
];

pub fn keymap_3278_typewriter() -> Keymap {
    let releases = HashMap::from([
        (204, Key::CapsLock),
        (205, Key::LeftShift),
        (206, Key::RightShift),
        (207, Key::RightAlt),
    ]);

    Keymap::new(
        "3278 Typewriter",
        DEFAULT,
        SHIFT,
        ALT,
        ReleaseStyle::PerKeyMap(releases),
    )
}
