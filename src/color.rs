//! Named terminal colors used to highlight target names.
use std::str::FromStr;

use console::Style;

use crate::config::Settings;
use crate::error::UnknownColor;

/// ANSI sequence which resets all attributes.
pub const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Color {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    #[default]
    Cyan,
    White,
    BrightBlack,
    BrightRed,
    BrightGreen,
    BrightYellow,
    BrightBlue,
    BrightMagenta,
    BrightCyan,
    BrightWhite,
}

const NAMES: [(&str, Color); 16] = [
    ("black", Color::Black),
    ("red", Color::Red),
    ("green", Color::Green),
    ("yellow", Color::Yellow),
    ("blue", Color::Blue),
    ("magenta", Color::Magenta),
    ("cyan", Color::Cyan),
    ("white", Color::White),
    ("brightblack", Color::BrightBlack),
    ("brightred", Color::BrightRed),
    ("brightgreen", Color::BrightGreen),
    ("brightyellow", Color::BrightYellow),
    ("brightblue", Color::BrightBlue),
    ("brightmagenta", Color::BrightMagenta),
    ("brightcyan", Color::BrightCyan),
    ("brightwhite", Color::BrightWhite),
];

impl Color {
    /// The ANSI escape sequence selecting this color as foreground.
    pub fn ansi(self) -> &'static str {
        match self {
            Color::Black => "\x1b[30m",
            Color::Red => "\x1b[31m",
            Color::Green => "\x1b[32m",
            Color::Yellow => "\x1b[33m",
            Color::Blue => "\x1b[34m",
            Color::Magenta => "\x1b[35m",
            Color::Cyan => "\x1b[36m",
            Color::White => "\x1b[37m",
            Color::BrightBlack => "\x1b[90m",
            Color::BrightRed => "\x1b[91m",
            Color::BrightGreen => "\x1b[92m",
            Color::BrightYellow => "\x1b[93m",
            Color::BrightBlue => "\x1b[94m",
            Color::BrightMagenta => "\x1b[95m",
            Color::BrightCyan => "\x1b[96m",
            Color::BrightWhite => "\x1b[97m",
        }
    }

    /// A `console` style printing in this color.
    pub fn style(self) -> Style {
        let style = Style::new();
        match self {
            Color::Black => style.black(),
            Color::Red => style.red(),
            Color::Green => style.green(),
            Color::Yellow => style.yellow(),
            Color::Blue => style.blue(),
            Color::Magenta => style.magenta(),
            Color::Cyan => style.cyan(),
            Color::White => style.white(),
            Color::BrightBlack => style.black().bright(),
            Color::BrightRed => style.red().bright(),
            Color::BrightGreen => style.green().bright(),
            Color::BrightYellow => style.yellow().bright(),
            Color::BrightBlue => style.blue().bright(),
            Color::BrightMagenta => style.magenta().bright(),
            Color::BrightCyan => style.cyan().bright(),
            Color::BrightWhite => style.white().bright(),
        }
    }
}

impl FromStr for Color {
    type Err = UnknownColor;

    /// Case-insensitive, `-` and `_` are ignored: `BrightBlue`,
    /// `bright_blue` and `bright-blue` are all accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_'))
            .map(|c| c.to_ascii_lowercase())
            .collect();

        NAMES
            .iter()
            .find(|(name, _)| *name == wanted)
            .map(|(_, color)| *color)
            .ok_or_else(|| UnknownColor(s.to_owned()))
    }
}

/// ANSI prefix for target names, empty when color is disabled.
pub fn target_color(settings: &Settings) -> &'static str {
    if settings.color {
        settings.target_color.ansi()
    } else {
        ""
    }
}

/// Style for target names, forced on or off according to the settings.
pub(crate) fn target_style(settings: &Settings) -> Style {
    settings
        .target_color
        .style()
        .force_styling(settings.color)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!("cyan".parse(), Ok(Color::Cyan));
        assert_eq!("BrightBlue".parse(), Ok(Color::BrightBlue));
        assert_eq!("bright_red".parse(), Ok(Color::BrightRed));
        assert_eq!("Bright-White".parse(), Ok(Color::BrightWhite));
        assert_eq!("mauve".parse::<Color>(), Err(UnknownColor("mauve".into())));
    }

    #[test]
    fn test_target_color_respects_toggle() {
        let mut settings = Settings {
            target_color: Color::Red,
            ..Settings::default()
        };
        assert_eq!(target_color(&settings), "");

        settings.color = true;
        assert_eq!(target_color(&settings), "\x1b[31m");
    }

    #[test]
    fn test_forced_style() {
        let settings = Settings {
            color: true,
            ..Settings::default()
        };
        let styled = target_style(&settings).apply_to("build").to_string();
        assert!(styled.contains("build"));
        assert!(styled.starts_with("\x1b["));

        let plain = target_style(&Settings::default()).apply_to("build").to_string();
        assert_eq!(plain, "build");
    }
}
