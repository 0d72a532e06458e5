use iced::alignment::Horizontal;
use iced::widget::text_input::TextInput;
use iced::widget::{
    Column, button, column, container, pick_list, progress_bar, row, scrollable, text, text_input,
};
use iced::{Alignment, Element, Length, Theme};

use crate::config::FLASH_BAUD_RATES;
use crate::style;
use crate::ui::application::CircuitPythonInstaller;
use crate::ui::dialogs::{DialogElement, DialogId, TemplateKind};
use crate::ui::messages::{CredentialField, Message};
use crate::utils::tracker;
use crate::utils::validation::{is_valid_ssid, is_valid_wifi_password, parse_port};

/// Lines of device output shown under a progress bar
const VISIBLE_LOG_LINES: usize = 8;

impl CircuitPythonInstaller {
    pub fn view(&self) -> Element<'_, Message> {
        let content = match self.dialogs.current() {
            Some(dialog) => self.view_dialog(dialog),
            None => self.view_landing(),
        };

        container(content)
            .width(Length::Fill)
            .height(Length::Fill)
            .padding(20)
            .style(style::main_box)
            .into()
    }

    fn view_landing(&self) -> Element<'_, Message> {
        let title = text("CircuitPython Installer")
            .size(34)
            .width(Length::Fill)
            .align_x(Horizontal::Center);

        let description = text(match &self.board {
            Some(board) => format!("Install CircuitPython on your {}.", board.name),
            None => "Install CircuitPython on a board connected over USB.".to_string(),
        })
        .size(16)
        .width(Length::Fill)
        .align_x(Horizontal::Center);

        let status: Element<'_, Message> = if self.is_loading_catalog {
            text("Loading the board catalog...").size(14).into()
        } else {
            column![].into()
        };

        let open = button(container(text("Open installer")).center_x(Length::Fill))
            .width(220)
            .padding(12)
            .style(button::primary)
            .on_press_maybe((!self.is_loading_catalog).then_some(Message::OpenInstaller));

        column![title, description, status, open]
            .spacing(20)
            .width(Length::Fill)
            .align_x(Alignment::Center)
            .into()
    }

    fn view_dialog<'a>(&'a self, dialog: &'a DialogElement) -> Element<'a, Message> {
        let mut header = row![
            text(dialog.title)
                .size(26)
                .width(Length::Fill)
                .style(text::primary)
        ]
        .align_y(Alignment::Center);
        if dialog.closeable {
            header = header.push(
                button(text("Close"))
                    .style(button::secondary)
                    .on_press(Message::CloseDialog),
            );
        }

        let mut body = Column::new()
            .spacing(14)
            .push(text(dialog.body.as_str()).size(16));

        match dialog.template {
            TemplateKind::Progress => body = body.push(self.view_progress()),
            TemplateKind::Credentials => body = body.push(self.view_credentials()),
            TemplateKind::Message | TemplateKind::Choices => {}
        }
        if dialog.id == DialogId::SerialConnect {
            body = body.push(self.view_baud_rate());
        }

        let buttons = dialog.buttons.iter().fold(
            Column::new().spacing(8).width(Length::Fill),
            |col, b| {
                col.push(
                    button(text(b.label.as_str()))
                        .width(Length::Fill)
                        .padding(10)
                        .style(button::primary)
                        .on_press_maybe(b.enabled.then_some(Message::Action(b.action))),
                )
            },
        );

        let card = column![header, body, buttons].spacing(20).padding(20);

        container(scrollable(card))
            .width(Length::Fill)
            .height(Length::Fill)
            .style(style::bordered_box)
            .into()
    }

    fn view_progress(&self) -> Element<'_, Message> {
        let (fraction, label) = match &self.progress {
            Some(progress) => (
                progress.percent.map(|p| p / 100.0).unwrap_or(0.0),
                tracker::describe(progress),
            ),
            None if self.busy => (0.0, "Working...".to_string()),
            None => (0.0, String::new()),
        };

        let start = self.log.len().saturating_sub(VISIBLE_LOG_LINES);
        let log = self.log[start..].iter().fold(Column::new().spacing(2), |col, line| {
            col.push(text(line.as_str()).size(12).style(text::secondary))
        });

        column![
            progress_bar(0.0..=1.0, fraction).style(progress_bar::primary),
            text(label).size(14),
            log,
        ]
        .spacing(10)
        .into()
    }

    fn view_baud_rate(&self) -> Element<'_, Message> {
        row![
            text("Flashing speed (baud)").size(14).width(Length::Fill),
            pick_list(
                FLASH_BAUD_RATES,
                Some(self.config.flash_baud_rate),
                Message::BaudRateSelected
            )
            .width(160)
            .style(style::pick_list_style),
        ]
        .spacing(10)
        .align_y(Alignment::Center)
        .into()
    }

    fn view_credentials(&self) -> Element<'_, Message> {
        let form = &self.form;

        column![
            text("Network name (SSID)").size(14),
            credential_input("SSID", &form.ssid, CredentialField::Ssid, is_valid_ssid(&form.ssid), false),
            text("Password").size(14),
            credential_input(
                "Leave empty for an open network",
                &form.password,
                CredentialField::Password,
                is_valid_wifi_password(&form.password),
                true,
            ),
            text("Web workflow password").size(14),
            credential_input(
                "Leave empty to disable the web workflow",
                &form.web_api_password,
                CredentialField::WebApiPassword,
                true,
                true,
            ),
            text("Web workflow port").size(14),
            credential_input(
                "80",
                &form.web_api_port,
                CredentialField::WebApiPort,
                parse_port(&form.web_api_port).is_some(),
                false,
            ),
        ]
        .spacing(6)
        .into()
    }
}

fn credential_input<'a>(
    placeholder: &'a str,
    value: &'a str,
    field: CredentialField,
    valid: bool,
    secure: bool,
) -> TextInput<'a, Message> {
    let input_style: fn(&Theme, text_input::Status) -> text_input::Style = if valid {
        style::valid_input
    } else {
        style::invalid_input
    };

    text_input(placeholder, value)
        .on_input(move |v| Message::FormChanged(field, v))
        .secure(secure)
        .padding(8)
        .style(input_style)
}
