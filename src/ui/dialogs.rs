//! Dialog registry and navigation buttons.
//!
//! Every dialog is described once in [`dialog_table`]. Showing a dialog
//! resolves (or builds) its element, renders the body template from the
//! supplied data and evaluates the button predicates. Only one element is
//! open at a time.

use std::collections::HashMap;

use tracing::debug;

use crate::error::to_plain_text;
use crate::ui::flow::render_version;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialogId {
    BoardSelect,
    Menu,
    PortSelect,
    Welcome,
    SerialConnect,
    Confirm,
    Erase,
    Flash,
    SelectBootDrive,
    Copy,
    SelectCpyDrive,
    ReplConnect,
    Credentials,
    Success,
    Error,
}

/// What a navigation button does when pressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionId {
    SelectBoard(usize),
    ChangeBoard,
    StartFlow(usize),
    ChoosePort,
    SelectPort(usize),
    RefreshPorts,
    Next,
    Previous,
    Erase,
    PickDrive,
    SaveCredentials,
    Close,
}

/// Named condition deciding whether a button is enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredicateId {
    Always,
    HasBootloader,
    HasUf2,
    HasBin,
    HasBootloaderAndUf2,
    Idle,
    CredentialsValid,
}

/// Label rewrite applied every time a button is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateId {
    InsertVersion,
    InsertDriveName,
}

pub const DRIVE_PLACEHOLDER: &str = "[drive]";

/// Installer facts the predicates and label updates read
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DialogFacts {
    pub version: Option<String>,
    pub drive_name: String,
    pub has_bootloader: bool,
    pub has_uf2: bool,
    pub has_bin: bool,
    pub busy: bool,
    pub credentials_valid: bool,
}

type Predicate = fn(&DialogFacts) -> bool;
type LabelUpdate = fn(&str, &DialogFacts) -> String;

/// Lookup tables resolving predicate and update identifiers
pub struct PredicateTable {
    predicates: HashMap<PredicateId, Predicate>,
    updates: HashMap<UpdateId, LabelUpdate>,
}

impl Default for PredicateTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PredicateTable {
    pub fn new() -> Self {
        let predicates: [(PredicateId, Predicate); 7] = [
            (PredicateId::Always, |_: &DialogFacts| true),
            (PredicateId::HasBootloader, |f: &DialogFacts| f.has_bootloader),
            (PredicateId::HasUf2, |f: &DialogFacts| f.has_uf2),
            (PredicateId::HasBin, |f: &DialogFacts| f.has_bin),
            (PredicateId::HasBootloaderAndUf2, |f: &DialogFacts| {
                f.has_bootloader && f.has_uf2
            }),
            (PredicateId::Idle, |f: &DialogFacts| !f.busy),
            (PredicateId::CredentialsValid, |f: &DialogFacts| {
                f.credentials_valid && !f.busy
            }),
        ];
        let updates: [(UpdateId, LabelUpdate); 2] = [
            (UpdateId::InsertVersion, |label: &str, f: &DialogFacts| {
                render_version(label, f.version.as_deref())
            }),
            (UpdateId::InsertDriveName, |label: &str, f: &DialogFacts| {
                label.replace(DRIVE_PLACEHOLDER, &f.drive_name)
            }),
        ];

        Self {
            predicates: predicates.into_iter().collect(),
            updates: updates.into_iter().collect(),
        }
    }

    pub fn evaluate(&self, id: PredicateId, facts: &DialogFacts) -> bool {
        self.predicates.get(&id).is_some_and(|p| p(facts))
    }

    pub fn update_label(&self, id: UpdateId, label: &str, facts: &DialogFacts) -> String {
        match self.updates.get(&id) {
            Some(update) => update(label, facts),
            None => label.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ButtonSpec {
    pub label: String,
    pub action: ActionId,
    pub enabled: Option<PredicateId>,
    pub on_update: Option<UpdateId>,
}

impl ButtonSpec {
    pub fn new(label: impl Into<String>, action: ActionId) -> Self {
        Self {
            label: label.into(),
            action,
            enabled: None,
            on_update: None,
        }
    }

    pub fn enabled_when(mut self, predicate: PredicateId) -> Self {
        self.enabled = Some(predicate);
        self
    }

    pub fn updated_by(mut self, update: UpdateId) -> Self {
        self.on_update = Some(update);
        self
    }
}

/// How the view paints the body of a dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Message,
    Choices,
    Progress,
    Credentials,
}

#[derive(Debug, Clone)]
pub struct DialogDescriptor {
    pub title: &'static str,
    pub template: TemplateKind,
    pub body: &'static str,
    pub closeable: bool,
    pub buttons: Vec<ButtonSpec>,
}

impl DialogDescriptor {
    fn new(title: &'static str, template: TemplateKind, body: &'static str) -> Self {
        Self {
            title,
            template,
            body,
            closeable: true,
            buttons: Vec::new(),
        }
    }

    fn pinned(mut self) -> Self {
        self.closeable = false;
        self
    }

    fn button(mut self, button: ButtonSpec) -> Self {
        self.buttons.push(button);
        self
    }
}

/// Values substituted into a dialog body plus buttons derived from them
#[derive(Debug, Clone, Default)]
pub struct DialogData {
    pub fields: Vec<(&'static str, String)>,
    pub buttons: Vec<ButtonSpec>,
}

impl DialogData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.fields.push((key, value.into()));
        self
    }

    pub fn with_buttons(mut self, buttons: Vec<ButtonSpec>) -> Self {
        self.buttons = buttons;
        self
    }
}

/// Replace `{key}` placeholders with plain text values
pub fn render_template(template: &str, fields: &[(&'static str, String)]) -> String {
    let mut body = template.to_string();
    for (key, value) in fields {
        body = body.replace(&format!("{{{}}}", key), &to_plain_text(value));
    }
    body
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedButton {
    pub label: String,
    pub action: ActionId,
    pub enabled: bool,
}

/// A built dialog, cached by id
#[derive(Debug, Clone)]
pub struct DialogElement {
    pub id: DialogId,
    pub title: &'static str,
    pub template: TemplateKind,
    pub body: String,
    pub closeable: bool,
    pub buttons: Vec<RenderedButton>,
    pub open: bool,
    specs: Vec<ButtonSpec>,
    generation: u64,
}

impl DialogElement {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

pub struct DialogRegistry {
    table: HashMap<DialogId, DialogDescriptor>,
    elements: HashMap<DialogId, DialogElement>,
    current: Option<DialogId>,
    generation: u64,
}

impl Default for DialogRegistry {
    fn default() -> Self {
        Self::new(dialog_table())
    }
}

impl DialogRegistry {
    pub fn new(table: HashMap<DialogId, DialogDescriptor>) -> Self {
        Self {
            table,
            elements: HashMap::new(),
            current: None,
            generation: 0,
        }
    }

    pub fn current(&self) -> Option<&DialogElement> {
        self.current.and_then(|id| self.elements.get(&id))
    }

    pub fn current_id(&self) -> Option<DialogId> {
        self.current
    }

    /// Show dialog `id`, replacing whatever is open. The element is reused
    /// unless `reload` is set, in which case it is rebuilt, picking up new
    /// dynamic buttons from `data`.
    pub fn show(
        &mut self,
        id: DialogId,
        data: DialogData,
        reload: bool,
        predicates: &PredicateTable,
        facts: &DialogFacts,
    ) {
        self.close();

        let Some(descriptor) = self.table.get(&id) else {
            debug!("No descriptor for dialog {:?}", id);
            return;
        };

        if reload || !self.elements.contains_key(&id) {
            self.generation += 1;
            let mut specs = descriptor.buttons.clone();
            specs.extend(data.buttons.iter().cloned());
            debug!("Building dialog {:?} with {} buttons", id, specs.len());
            self.elements.insert(
                id,
                DialogElement {
                    id,
                    title: descriptor.title,
                    template: descriptor.template,
                    body: String::new(),
                    closeable: descriptor.closeable,
                    buttons: Vec::new(),
                    open: false,
                    specs,
                    generation: self.generation,
                },
            );
        }

        if let Some(element) = self.elements.get_mut(&id) {
            element.body = render_template(descriptor.body, &data.fields);
            element.closeable = descriptor.closeable;
            element.buttons = render_buttons(&element.specs, predicates, facts);
            element.open = true;
            self.current = Some(id);
        }
    }

    /// Re-evaluate button state of the open dialog
    pub fn refresh(&mut self, predicates: &PredicateTable, facts: &DialogFacts) {
        if let Some(element) = self.current.and_then(|id| self.elements.get_mut(&id)) {
            element.buttons = render_buttons(&element.specs, predicates, facts);
        }
    }

    /// Rewrite the body of the open dialog if it is `id`
    pub fn update_body(&mut self, id: DialogId, fields: &[(&'static str, String)]) {
        if self.current != Some(id) {
            return;
        }
        if let (Some(descriptor), Some(element)) = (self.table.get(&id), self.elements.get_mut(&id)) {
            element.body = render_template(descriptor.body, fields);
        }
    }

    pub fn close(&mut self) {
        if let Some(element) = self.current.take().and_then(|id| self.elements.get_mut(&id)) {
            element.open = false;
        }
    }
}

fn render_buttons(specs: &[ButtonSpec], predicates: &PredicateTable, facts: &DialogFacts) -> Vec<RenderedButton> {
    specs
        .iter()
        .map(|button| RenderedButton {
            label: match button.on_update {
                Some(update) => predicates.update_label(update, &button.label, facts),
                None => button.label.clone(),
            },
            action: button.action,
            enabled: button
                .enabled
                .is_none_or(|predicate| predicates.evaluate(predicate, facts)),
        })
        .collect()
}

/// Every dialog the installer can show
pub fn dialog_table() -> HashMap<DialogId, DialogDescriptor> {
    use ActionId::*;
    use TemplateKind::*;

    let next = || ButtonSpec::new("Next", Next).enabled_when(PredicateId::Idle);

    HashMap::from([
        (
            DialogId::BoardSelect,
            DialogDescriptor::new(
                "Select your board",
                Choices,
                "Pick the board you want to install CircuitPython on.",
            ),
        ),
        (
            DialogId::Menu,
            DialogDescriptor::new(
                "CircuitPython Installer",
                Choices,
                "{board}\n\nChoose what to install.",
            )
            .button(ButtonSpec::new("Change board", ChangeBoard)),
        ),
        (
            DialogId::PortSelect,
            DialogDescriptor::new("Select a serial port", Choices, "{hint}")
                .button(ButtonSpec::new("Refresh", RefreshPorts)),
        ),
        (
            DialogId::Welcome,
            DialogDescriptor::new(
                "Welcome",
                Message,
                "This installer sets up CircuitPython {version} on your {board}.\n\n\
                 Connect the board with a USB cable that carries data, then continue.",
            )
            .button(next()),
        ),
        (
            DialogId::SerialConnect,
            DialogDescriptor::new(
                "Enter the bootloader",
                Message,
                "Hold the BOOT button, press and release RESET, then release BOOT.\n\n\
                 Pick the serial port of the board once it is in bootloader mode.",
            )
            .button(ButtonSpec::new("Previous", Previous).enabled_when(PredicateId::Idle))
            .button(ButtonSpec::new("Connect", ChoosePort).enabled_when(PredicateId::Idle)),
        ),
        (
            DialogId::Confirm,
            DialogDescriptor::new(
                "Confirm your board",
                Message,
                "Found {chip} (revision {revision}) with {flash_size} of flash.\n\
                 MAC address: {mac}\n\n\
                 Continuing replaces the firmware on this board.",
            )
            .button(ButtonSpec::new("Continue", Next)),
        ),
        (
            DialogId::Erase,
            DialogDescriptor::new(
                "Erase the flash",
                Progress,
                "Erasing removes every file on the board along with its firmware. \
                 Skip this if you want to keep them.\n\n{status}",
            )
            .button(ButtonSpec::new("Skip", Next).enabled_when(PredicateId::Idle))
            .button(ButtonSpec::new("Erase", Erase).enabled_when(PredicateId::Idle)),
        ),
        (
            DialogId::Flash,
            DialogDescriptor::new("Installing firmware", Progress, "{image}\n\n{status}").pinned(),
        ),
        (
            DialogId::SelectBootDrive,
            DialogDescriptor::new(
                "Select the boot drive",
                Message,
                "Press RESET on the board. A drive named {drive} appears shortly; \
                 select it in the next window.\n\n{notice}",
            )
            .button(
                ButtonSpec::new("Select [drive]", PickDrive)
                    .enabled_when(PredicateId::Idle)
                    .updated_by(UpdateId::InsertDriveName),
            ),
        ),
        (
            DialogId::Copy,
            DialogDescriptor::new("Copying firmware", Progress, "{status}").pinned(),
        ),
        (
            DialogId::SelectCpyDrive,
            DialogDescriptor::new(
                "Select the CIRCUITPY drive",
                Message,
                "The board restarts and shows a drive named CIRCUITPY; \
                 select it in the next window.\n\n{notice}",
            )
            .button(ButtonSpec::new("Select CIRCUITPY", PickDrive).enabled_when(PredicateId::Idle)),
        ),
        (
            DialogId::ReplConnect,
            DialogDescriptor::new(
                "Connect to CircuitPython",
                Message,
                "Pick the serial port of the board running CircuitPython.",
            )
            .button(ButtonSpec::new("Connect", ChoosePort).enabled_when(PredicateId::Idle)),
        ),
        (
            DialogId::Credentials,
            DialogDescriptor::new(
                "WiFi credentials",
                Credentials,
                "These values are stored in settings.toml on the board.\n{status}",
            )
            .button(ButtonSpec::new("Skip", Next).enabled_when(PredicateId::Idle))
            .button(ButtonSpec::new("Save", SaveCredentials).enabled_when(PredicateId::CredentialsValid)),
        ),
        (
            DialogId::Success,
            DialogDescriptor::new("Installation complete", Message, "{message}")
                .button(ButtonSpec::new("Close", Close)),
        ),
        (
            DialogId::Error,
            DialogDescriptor::new("Installation failed", Message, "{message}")
                .button(ButtonSpec::new("Close", Close)),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn show(registry: &mut DialogRegistry, id: DialogId, data: DialogData, reload: bool, facts: &DialogFacts) {
        registry.show(id, data, reload, &PredicateTable::new(), facts);
    }

    fn board_buttons(names: &[&str]) -> Vec<ButtonSpec> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| ButtonSpec::new(*name, ActionId::SelectBoard(i)))
            .collect()
    }

    #[test]
    fn test_single_current_dialog() {
        let mut registry = DialogRegistry::default();
        let facts = DialogFacts::default();
        show(&mut registry, DialogId::Welcome, DialogData::new(), false, &facts);
        show(&mut registry, DialogId::Erase, DialogData::new(), false, &facts);

        assert_eq!(registry.current_id(), Some(DialogId::Erase));
        assert!(!registry.elements[&DialogId::Welcome].open);
        assert_eq!(registry.elements.values().filter(|e| e.open).count(), 1);

        registry.close();
        assert!(registry.current().is_none());
        assert_eq!(registry.elements.values().filter(|e| e.open).count(), 0);
    }

    #[test]
    fn test_elements_are_cached_until_reload() {
        let mut registry = DialogRegistry::default();
        let facts = DialogFacts::default();
        let data = DialogData::new().with_buttons(board_buttons(&["Feather S2"]));
        show(&mut registry, DialogId::BoardSelect, data, false, &facts);
        let first = registry.current().unwrap().generation();

        // Dynamic buttons only change when the element is rebuilt
        let data = DialogData::new().with_buttons(board_buttons(&["Feather S2", "QT Py S3"]));
        show(&mut registry, DialogId::BoardSelect, data.clone(), false, &facts);
        assert_eq!(registry.current().unwrap().generation(), first);
        assert_eq!(registry.current().unwrap().buttons.len(), 1);

        show(&mut registry, DialogId::BoardSelect, data, true, &facts);
        let element = registry.current().unwrap();
        assert_ne!(element.generation(), first);
        assert_eq!(element.buttons.len(), 2);
        assert_eq!(element.buttons[1].action, ActionId::SelectBoard(1));
    }

    #[test]
    fn test_enablement_is_reevaluated_on_show() {
        let mut registry = DialogRegistry::default();
        let mut facts = DialogFacts {
            busy: true,
            ..Default::default()
        };
        show(&mut registry, DialogId::Erase, DialogData::new(), false, &facts);
        assert!(registry.current().unwrap().buttons.iter().all(|b| !b.enabled));

        facts.busy = false;
        registry.refresh(&PredicateTable::new(), &facts);
        assert!(registry.current().unwrap().buttons.iter().all(|b| b.enabled));
    }

    #[test]
    fn test_labels_are_updated_on_render() {
        let mut registry = DialogRegistry::default();
        let facts = DialogFacts {
            drive_name: "FTHRS2BOOT".to_string(),
            ..Default::default()
        };
        show(&mut registry, DialogId::SelectBootDrive, DialogData::new(), false, &facts);
        assert_eq!(registry.current().unwrap().buttons[0].label, "Select FTHRS2BOOT");

        let facts = DialogFacts {
            version: Some("9.0.0".to_string()),
            has_uf2: true,
            ..Default::default()
        };
        let flows = vec![
            ButtonSpec::new("Upgrade CircuitPython [version] UF2 Only", ActionId::StartFlow(0))
                .enabled_when(PredicateId::HasUf2)
                .updated_by(UpdateId::InsertVersion),
            ButtonSpec::new("Install Bootloader Only", ActionId::StartFlow(1))
                .enabled_when(PredicateId::HasBootloader),
        ];
        show(&mut registry, DialogId::Menu, DialogData::new().with_buttons(flows), true, &facts);
        let buttons = &registry.current().unwrap().buttons;
        assert_eq!(buttons[1].label, "Upgrade CircuitPython 9.0.0 UF2 Only");
        assert!(buttons[1].enabled);
        assert!(!buttons[2].enabled);
    }

    #[test]
    fn test_body_is_plain_text() {
        let mut registry = DialogRegistry::default();
        let data = DialogData::new().with("message", "<b>Port busy</b>\u{7}");
        show(&mut registry, DialogId::Error, data, false, &DialogFacts::default());
        let element = registry.current().unwrap();
        assert_eq!(element.body, "Port busy");
        assert!(element.closeable);

        show(&mut registry, DialogId::Flash, DialogData::new(), false, &DialogFacts::default());
        assert!(!registry.current().unwrap().closeable);
    }
}
