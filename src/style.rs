use iced::widget::{container, pick_list, text_input};
use iced::{Border, Color, Theme};
use std::sync::Arc;

// Main theme colors
pub const PRIMARY: Color = Color::from_rgb(0.47, 0.25, 0.75);
pub const BACKGROUND: Color = Color::from_rgb(0.06, 0.05, 0.09);
pub const TEXT: Color = Color::from_rgb(0.92, 0.92, 0.92);
pub const ERROR: Color = Color::from_rgb(0.9, 0.2, 0.2);
pub const SUCCESS: Color = Color::from_rgb(0.0, 0.8, 0.3);
pub const WARNING: Color = Color::from_rgb(0.9, 0.6, 0.0);

pub fn custom_theme() -> Theme {
    let palette = iced::theme::Palette {
        background: BACKGROUND,
        text: TEXT,
        primary: PRIMARY,
        success: SUCCESS,
        danger: ERROR,
        warning: WARNING,
    };

    Theme::Custom(Arc::new(iced::theme::Custom::new(
        "circuitpython-dark".to_string(),
        palette,
    )))
}

pub fn main_box(theme: &Theme) -> container::Style {
    let palette = theme.extended_palette();

    container::Style {
        background: Some(palette.background.weak.color.into()),
        text_color: Some(TEXT),
        ..container::Style::default()
    }
}

// Dialog card
pub fn bordered_box(theme: &Theme) -> container::Style {
    let palette = theme.extended_palette();

    container::Style {
        background: Some(palette.background.weakest.color.into()),
        border: Border {
            width: 1.0,
            radius: 5.0.into(),
            color: palette.background.strong.color,
        },
        ..container::Style::default()
    }
}

pub fn pick_list_style(theme: &Theme, _status: pick_list::Status) -> pick_list::Style {
    let palette = theme.extended_palette();

    pick_list::Style {
        text_color: TEXT,
        placeholder_color: palette.background.strong.text,
        background: palette.background.weak.color.into(),
        handle_color: palette.background.strong.color,
        border: Border {
            width: 1.0,
            radius: 5.0.into(),
            color: palette.background.strong.color,
        },
    }
}

fn bordered_input(theme: &Theme, status: text_input::Status, border: Color) -> text_input::Style {
    let palette = theme.extended_palette();

    text_input::Style {
        background: palette.background.weak.color.into(),
        border: Border {
            radius: 5.0.into(),
            width: if matches!(status, text_input::Status::Focused { .. }) {
                2.0
            } else {
                1.0
            },
            color: border,
        },
        icon: TEXT,
        placeholder: palette.background.strong.color,
        value: TEXT,
        selection: palette.primary.weak.color,
    }
}

pub fn valid_input(theme: &Theme, status: text_input::Status) -> text_input::Style {
    bordered_input(theme, status, SUCCESS)
}

pub fn invalid_input(theme: &Theme, status: text_input::Status) -> text_input::Style {
    bordered_input(theme, status, ERROR)
}
