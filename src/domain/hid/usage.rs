//! Usage codes and masks used by the report encoders.

/// Mouse button bits in byte 0 of the mouse report
pub mod button {
    pub const LEFT: u8 = 0x01;
    pub const RIGHT: u8 = 0x02;
    pub const MIDDLE: u8 = 0x04;
    /// Bits the descriptor actually declares (3 buttons + 5 padding bits)
    pub const ALL: u8 = LEFT | RIGHT | MIDDLE;
}

/// Modifier bits in byte 0 of the keyboard report
pub mod modifier {
    pub const LEFT_CTRL: u8 = 0x01;
    pub const LEFT_SHIFT: u8 = 0x02;
    pub const LEFT_ALT: u8 = 0x04;
    pub const LEFT_GUI: u8 = 0x08;
    pub const RIGHT_CTRL: u8 = 0x10;
    pub const RIGHT_SHIFT: u8 = 0x20;
    pub const RIGHT_ALT: u8 = 0x40;
    pub const RIGHT_GUI: u8 = 0x80;
}

/// Keyboard page (0x07) usages used by the dispatcher
pub mod key {
    pub const A: u8 = 0x04;
    pub const K: u8 = 0x0E;
    pub const NUM_1: u8 = 0x1E;
    pub const NUM_0: u8 = 0x27;
    pub const ENTER: u8 = 0x28;
    pub const ESCAPE: u8 = 0x29;
    pub const BACKSPACE: u8 = 0x2A;
    pub const TAB: u8 = 0x2B;
    pub const SPACE: u8 = 0x2C;
    pub const RIGHT: u8 = 0x4F;
    pub const LEFT: u8 = 0x50;
    pub const DOWN: u8 = 0x51;
    pub const UP: u8 = 0x52;
}

/// Consumer page (0x0C) usages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ConsumerUsage {
    PlayPause = 0x00CD,
    NextTrack = 0x00B5,
    PreviousTrack = 0x00B6,
    VolumeUp = 0x00E9,
    VolumeDown = 0x00EA,
    Mute = 0x00E2,
}

impl ConsumerUsage {
    pub fn code(self) -> u16 {
        self as u16
    }
}

/// D-pad directions, including the four diagonals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpadDirection {
    Up,
    Down,
    Left,
    Right,
    Center,
    DownLeft,
    DownRight,
    UpLeft,
    UpRight,
}

impl DpadDirection {
    /// Arrow/enter keys pulsed for this direction, in order
    pub fn keys(self) -> &'static [u8] {
        match self {
            Self::Up => &[key::UP],
            Self::Down => &[key::DOWN],
            Self::Left => &[key::LEFT],
            Self::Right => &[key::RIGHT],
            Self::Center => &[key::ENTER],
            Self::DownLeft => &[key::DOWN, key::LEFT],
            Self::DownRight => &[key::DOWN, key::RIGHT],
            Self::UpLeft => &[key::UP, key::LEFT],
            Self::UpRight => &[key::UP, key::RIGHT],
        }
    }
}

/// Map a printable ASCII character to `(modifiers, key code)` on a US layout
pub fn ascii_to_key(c: char) -> Option<(u8, u8)> {
    const SHIFT: u8 = modifier::LEFT_SHIFT;

    let mapped = match c {
        'a'..='z' => (0, key::A + (c as u8 - b'a')),
        'A'..='Z' => (SHIFT, key::A + (c as u8 - b'A')),
        '1'..='9' => (0, key::NUM_1 + (c as u8 - b'1')),
        '0' => (0, key::NUM_0),
        '\n' => (0, key::ENTER),
        '\t' => (0, key::TAB),
        ' ' => (0, key::SPACE),
        '-' => (0, 0x2D),
        '=' => (0, 0x2E),
        '[' => (0, 0x2F),
        ']' => (0, 0x30),
        '\\' => (0, 0x31),
        ';' => (0, 0x33),
        '\'' => (0, 0x34),
        '`' => (0, 0x35),
        ',' => (0, 0x36),
        '.' => (0, 0x37),
        '/' => (0, 0x38),
        '!' => (SHIFT, 0x1E),
        '@' => (SHIFT, 0x1F),
        '#' => (SHIFT, 0x20),
        '$' => (SHIFT, 0x21),
        '%' => (SHIFT, 0x22),
        '^' => (SHIFT, 0x23),
        '&' => (SHIFT, 0x24),
        '*' => (SHIFT, 0x25),
        '(' => (SHIFT, 0x26),
        ')' => (SHIFT, 0x27),
        '_' => (SHIFT, 0x2D),
        '+' => (SHIFT, 0x2E),
        '{' => (SHIFT, 0x2F),
        '}' => (SHIFT, 0x30),
        '|' => (SHIFT, 0x31),
        ':' => (SHIFT, 0x33),
        '"' => (SHIFT, 0x34),
        '~' => (SHIFT, 0x35),
        '<' => (SHIFT, 0x36),
        '>' => (SHIFT, 0x37),
        '?' => (SHIFT, 0x38),
        _ => return None,
    };
    Some(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_letters_and_digits() {
        assert_eq!(ascii_to_key('a'), Some((0, 0x04)));
        assert_eq!(ascii_to_key('z'), Some((0, 0x1D)));
        assert_eq!(ascii_to_key('Q'), Some((modifier::LEFT_SHIFT, 0x14)));
        assert_eq!(ascii_to_key('1'), Some((0, 0x1E)));
        assert_eq!(ascii_to_key('9'), Some((0, 0x26)));
        assert_eq!(ascii_to_key('0'), Some((0, 0x27)));
        assert_eq!(ascii_to_key('?'), Some((modifier::LEFT_SHIFT, 0x38)));
        assert_eq!(ascii_to_key('é'), None);
    }

    #[test]
    fn test_dpad_keys() {
        assert_eq!(DpadDirection::Up.keys(), &[0x52]);
        assert_eq!(DpadDirection::Center.keys(), &[0x28]);
        assert_eq!(DpadDirection::UpRight.keys(), &[0x52, 0x4F]);
    }

    #[test]
    fn test_consumer_codes() {
        assert_eq!(ConsumerUsage::VolumeUp.code(), 0xE9);
        assert_eq!(ConsumerUsage::PlayPause.code(), 0xCD);
    }
}
