use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use thiserror::Error;
use tracing::error;

/// Abstract user intents, decoupled from the physical key that triggers them.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum CommandId {
    NewTab,
    CloseTab,
    PrevTab,
    NextTab,
    FocusCommandBar,
    HierarchyUp,
    MoveSelectionDown,
    MoveSelectionUp,
    ConfirmSelection,
    ToggleFindFilter,
    NoOp,
}

impl CommandId {
    pub const ALL: [Self; 11] = [
        Self::NewTab,
        Self::CloseTab,
        Self::PrevTab,
        Self::NextTab,
        Self::FocusCommandBar,
        Self::HierarchyUp,
        Self::MoveSelectionDown,
        Self::MoveSelectionUp,
        Self::ConfirmSelection,
        Self::ToggleFindFilter,
        Self::NoOp,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Self::NewTab => "new-tab",
            Self::CloseTab => "close-tab",
            Self::PrevTab => "prev-tab",
            Self::NextTab => "next-tab",
            Self::FocusCommandBar => "command-bar",
            Self::HierarchyUp => "hierarchy-up",
            Self::MoveSelectionDown => "down",
            Self::MoveSelectionUp => "up",
            Self::ConfirmSelection => "select",
            Self::ToggleFindFilter => "find",
            Self::NoOp => "noop",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "new-tab" | "newtab" => Some(Self::NewTab),
            "close-tab" | "closetab" => Some(Self::CloseTab),
            "prev-tab" | "prevtab" | "previous-tab" => Some(Self::PrevTab),
            "next-tab" | "nexttab" => Some(Self::NextTab),
            "command-bar" | "focus-command-bar" | "command" => Some(Self::FocusCommandBar),
            "hierarchy-up" | "up-level" | "back" => Some(Self::HierarchyUp),
            "down" | "move-selection-down" => Some(Self::MoveSelectionDown),
            "up" | "move-selection-up" => Some(Self::MoveSelectionUp),
            "select" | "confirm" | "confirm-selection" => Some(Self::ConfirmSelection),
            "find" | "filter" | "toggle-find-filter" => Some(Self::ToggleFindFilter),
            "noop" | "nothing" | "no-op" => Some(Self::NoOp),
            _ => None,
        }
    }

    /// Commands that operate on the whole tab set and belong to the shell.
    pub fn is_tab_command(self) -> bool {
        matches!(
            self,
            Self::NewTab | Self::CloseTab | Self::PrevTab | Self::NextTab | Self::NoOp
        )
    }
}

impl Display for CommandId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.title())
    }
}

/// A physical key combination: the key code plus the meta and shift flags.
/// Every other modifier is ignored.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct KeyChord {
    pub code: String,
    #[serde(rename = "metaModifier")]
    pub meta: bool,
    #[serde(rename = "shiftModifier")]
    pub shift: bool,
}

impl KeyChord {
    pub fn new(code: impl Into<String>, meta: bool, shift: bool) -> Self {
        Self {
            code: code.into(),
            meta,
            shift,
        }
    }

    pub fn plain(code: impl Into<String>) -> Self {
        Self::new(code, false, false)
    }
}

impl Display for KeyChord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.meta {
            f.write_str("meta+")?;
        }
        if self.shift {
            f.write_str("shift+")?;
        }
        f.write_str(&self.code)
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub command: CommandId,
    pub chord: KeyChord,
}

impl Binding {
    pub fn new(command: CommandId, chord: KeyChord) -> Self {
        Self { command, chord }
    }
}

#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum BindingError {
    #[error("chord {chord} is bound to both {first} and {second}")]
    DuplicateChord {
        chord: KeyChord,
        first: CommandId,
        second: CommandId,
    },
    #[error("unrecognized key spec '{0}'")]
    InvalidKeySpec(String),
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
}

/// Resolve a chord against a binding table by exact field equality.
///
/// More than one match is a misconfigured table; it is logged and the first
/// binding in table order wins so the outcome stays deterministic.
pub fn match_chord(chord: &KeyChord, bindings: &[Binding]) -> Option<CommandId> {
    let mut matches = bindings.iter().filter(|binding| binding.chord == *chord);
    let first = matches.next()?;
    let extra = matches.map(|binding| binding.command).collect::<Vec<_>>();
    if !extra.is_empty() {
        error!(
            chord = %chord,
            winner = %first.command,
            ignored = ?extra,
            "too many matches for key chord"
        );
    }
    Some(first.command)
}

/// Reject a binding table in which two bindings share a chord.
pub fn ensure_unique_chords(bindings: &[Binding]) -> Result<(), BindingError> {
    for (index, binding) in bindings.iter().enumerate() {
        if let Some(other) = bindings[index + 1..]
            .iter()
            .find(|other| other.chord == binding.chord)
        {
            return Err(BindingError::DuplicateChord {
                chord: binding.chord.clone(),
                first: binding.command,
                second: other.command,
            });
        }
    }
    Ok(())
}

pub fn default_shell_bindings() -> Vec<Binding> {
    vec![
        Binding::new(CommandId::NewTab, KeyChord::new("KeyT", true, false)),
        Binding::new(CommandId::CloseTab, KeyChord::new("KeyW", true, false)),
        Binding::new(CommandId::PrevTab, KeyChord::new("BracketLeft", true, true)),
        Binding::new(CommandId::NextTab, KeyChord::new("BracketRight", true, true)),
        Binding::new(CommandId::NoOp, KeyChord::new("KeyB", true, false)),
    ]
}

pub fn default_page_bindings() -> Vec<Binding> {
    vec![
        Binding::new(CommandId::MoveSelectionDown, KeyChord::plain("KeyJ")),
        Binding::new(CommandId::MoveSelectionUp, KeyChord::plain("KeyK")),
        Binding::new(CommandId::ConfirmSelection, KeyChord::plain("Enter")),
        Binding::new(CommandId::ToggleFindFilter, KeyChord::plain("Slash")),
        Binding::new(
            CommandId::FocusCommandBar,
            KeyChord::new("Semicolon", false, true),
        ),
        Binding::new(CommandId::HierarchyUp, KeyChord::plain("Backspace")),
    ]
}

/// Project a terminal key event onto a DOM-style chord.
pub fn chord_from_key_event(key: KeyEvent) -> Option<KeyChord> {
    let meta = key
        .modifiers
        .intersects(KeyModifiers::CONTROL | KeyModifiers::SUPER | KeyModifiers::META);
    let shift_held = key.modifiers.contains(KeyModifiers::SHIFT);

    let (code, shifted) = match key.code {
        KeyCode::Char(c) => char_code(c)?,
        KeyCode::Enter => ("Enter".to_string(), false),
        KeyCode::Esc => ("Escape".to_string(), false),
        KeyCode::Backspace => ("Backspace".to_string(), false),
        KeyCode::Tab => ("Tab".to_string(), false),
        KeyCode::BackTab => ("Tab".to_string(), true),
        KeyCode::Delete => ("Delete".to_string(), false),
        KeyCode::Up => ("ArrowUp".to_string(), false),
        KeyCode::Down => ("ArrowDown".to_string(), false),
        KeyCode::Left => ("ArrowLeft".to_string(), false),
        KeyCode::Right => ("ArrowRight".to_string(), false),
        KeyCode::Home => ("Home".to_string(), false),
        KeyCode::End => ("End".to_string(), false),
        KeyCode::PageUp => ("PageUp".to_string(), false),
        KeyCode::PageDown => ("PageDown".to_string(), false),
        KeyCode::F(n) => (format!("F{n}"), false),
        _ => return None,
    };

    Some(KeyChord::new(code, meta, shift_held || shifted))
}

fn char_code(c: char) -> Option<(String, bool)> {
    if c.is_ascii_alphabetic() {
        return Some((
            format!("Key{}", c.to_ascii_uppercase()),
            c.is_ascii_uppercase(),
        ));
    }
    if c.is_ascii_digit() {
        return Some((format!("Digit{c}"), false));
    }

    let (code, shifted) = match c {
        ' ' => ("Space", false),
        ';' => ("Semicolon", false),
        ':' => ("Semicolon", true),
        '/' => ("Slash", false),
        '?' => ("Slash", true),
        '[' => ("BracketLeft", false),
        '{' => ("BracketLeft", true),
        ']' => ("BracketRight", false),
        '}' => ("BracketRight", true),
        ',' => ("Comma", false),
        '<' => ("Comma", true),
        '.' => ("Period", false),
        '>' => ("Period", true),
        '-' => ("Minus", false),
        '_' => ("Minus", true),
        '=' => ("Equal", false),
        '+' => ("Equal", true),
        '\'' => ("Quote", false),
        '"' => ("Quote", true),
        '`' => ("Backquote", false),
        '~' => ("Backquote", true),
        '\\' => ("Backslash", false),
        '|' => ("Backslash", true),
        '!' => ("Digit1", true),
        '@' => ("Digit2", true),
        '#' => ("Digit3", true),
        '$' => ("Digit4", true),
        '%' => ("Digit5", true),
        '^' => ("Digit6", true),
        '&' => ("Digit7", true),
        '*' => ("Digit8", true),
        '(' => ("Digit9", true),
        ')' => ("Digit0", true),
        _ => return None,
    };
    Some((code.to_string(), shifted))
}

/// Parse a config key spec such as `meta+shift+BracketLeft` or `ctrl+t`.
pub fn parse_chord_spec(spec: &str) -> Result<KeyChord, BindingError> {
    let mut meta = false;
    let mut shift = false;
    let mut code: Option<String> = None;

    for token in spec
        .split('+')
        .map(str::trim)
        .filter(|token| !token.is_empty())
    {
        match token.to_ascii_lowercase().as_str() {
            "meta" | "cmd" | "command" | "super" | "ctrl" | "control" => meta = true,
            "shift" => shift = true,
            _ => {
                if code.is_some() {
                    return Err(BindingError::InvalidKeySpec(spec.to_string()));
                }
                code = Some(
                    normalize_code_token(token)
                        .ok_or_else(|| BindingError::InvalidKeySpec(spec.to_string()))?,
                );
            }
        }
    }

    let code = code.ok_or_else(|| BindingError::InvalidKeySpec(spec.to_string()))?;
    Ok(KeyChord::new(code, meta, shift))
}

fn normalize_code_token(token: &str) -> Option<String> {
    let lower = token.to_ascii_lowercase();
    let named = match lower.as_str() {
        "enter" | "return" => Some("Enter"),
        "esc" | "escape" => Some("Escape"),
        "backspace" => Some("Backspace"),
        "tab" => Some("Tab"),
        "space" => Some("Space"),
        "up" | "arrowup" => Some("ArrowUp"),
        "down" | "arrowdown" => Some("ArrowDown"),
        "left" | "arrowleft" => Some("ArrowLeft"),
        "right" | "arrowright" => Some("ArrowRight"),
        "semicolon" => Some("Semicolon"),
        "slash" => Some("Slash"),
        "bracketleft" => Some("BracketLeft"),
        "bracketright" => Some("BracketRight"),
        "comma" => Some("Comma"),
        "period" => Some("Period"),
        "minus" => Some("Minus"),
        "equal" => Some("Equal"),
        "quote" => Some("Quote"),
        "backquote" => Some("Backquote"),
        "backslash" => Some("Backslash"),
        _ => None,
    };
    if let Some(named) = named {
        return Some(named.to_string());
    }

    if let Some(rest) = lower.strip_prefix("key")
        && rest.len() == 1
        && rest.chars().all(|c| c.is_ascii_alphabetic())
    {
        return Some(format!("Key{}", rest.to_ascii_uppercase()));
    }
    if let Some(rest) = lower.strip_prefix("digit")
        && rest.len() == 1
        && rest.chars().all(|c| c.is_ascii_digit())
    {
        return Some(format!("Digit{rest}"));
    }
    if lower.len() == 1 {
        return lower.chars().next().and_then(char_code).map(|(code, _)| code);
    }
    if let Some(number) = lower.strip_prefix('f').and_then(|n| n.parse::<u8>().ok())
        && (1..=24).contains(&number)
    {
        return Some(format!("F{number}"));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::{
        Binding, BindingError, CommandId, KeyChord, chord_from_key_event, default_page_bindings,
        default_shell_bindings, ensure_unique_chords, match_chord, parse_chord_spec,
    };
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

    #[test]
    fn exact_chord_matches_binding() {
        let bindings = default_shell_bindings();
        let chord = KeyChord::new("KeyT", true, false);
        assert_eq!(match_chord(&chord, &bindings), Some(CommandId::NewTab));
    }

    #[test]
    fn chord_differing_in_one_field_never_matches() {
        let bindings = vec![Binding::new(
            CommandId::NewTab,
            KeyChord::new("KeyT", true, false),
        )];
        assert_eq!(
            match_chord(&KeyChord::new("KeyT", false, false), &bindings),
            None
        );
        assert_eq!(
            match_chord(&KeyChord::new("KeyT", true, true), &bindings),
            None
        );
        assert_eq!(
            match_chord(&KeyChord::new("KeyY", true, false), &bindings),
            None
        );
    }

    #[test]
    fn duplicate_match_picks_first_binding() {
        let chord = KeyChord::plain("KeyJ");
        let bindings = vec![
            Binding::new(CommandId::MoveSelectionDown, chord.clone()),
            Binding::new(CommandId::MoveSelectionUp, chord.clone()),
        ];
        assert_eq!(
            match_chord(&chord, &bindings),
            Some(CommandId::MoveSelectionDown)
        );
    }

    #[test]
    fn duplicate_chords_are_rejected() {
        let chord = KeyChord::plain("KeyJ");
        let bindings = vec![
            Binding::new(CommandId::MoveSelectionDown, chord.clone()),
            Binding::new(CommandId::ConfirmSelection, KeyChord::plain("Enter")),
            Binding::new(CommandId::MoveSelectionUp, chord.clone()),
        ];
        assert_eq!(
            ensure_unique_chords(&bindings),
            Err(BindingError::DuplicateChord {
                chord,
                first: CommandId::MoveSelectionDown,
                second: CommandId::MoveSelectionUp,
            })
        );
    }

    #[test]
    fn default_tables_have_unique_chords() {
        assert!(ensure_unique_chords(&default_shell_bindings()).is_ok());
        assert!(ensure_unique_chords(&default_page_bindings()).is_ok());
    }

    #[test]
    fn ctrl_letter_maps_to_meta_chord() {
        let key = KeyEvent::new(KeyCode::Char('t'), KeyModifiers::CONTROL);
        assert_eq!(
            chord_from_key_event(key),
            Some(KeyChord::new("KeyT", true, false))
        );
    }

    #[test]
    fn shifted_symbols_map_to_physical_key() {
        let colon = KeyEvent::new(KeyCode::Char(':'), KeyModifiers::NONE);
        assert_eq!(
            chord_from_key_event(colon),
            Some(KeyChord::new("Semicolon", false, true))
        );

        let brace = KeyEvent::new(
            KeyCode::Char('{'),
            KeyModifiers::CONTROL | KeyModifiers::SHIFT,
        );
        assert_eq!(
            chord_from_key_event(brace),
            Some(KeyChord::new("BracketLeft", true, true))
        );
    }

    #[test]
    fn alt_modifier_is_ignored() {
        let key = KeyEvent::new(KeyCode::Char('j'), KeyModifiers::ALT);
        assert_eq!(chord_from_key_event(key), Some(KeyChord::plain("KeyJ")));
    }

    #[test]
    fn uppercase_letter_sets_shift() {
        let key = KeyEvent::new(KeyCode::Char('G'), KeyModifiers::SHIFT);
        assert_eq!(
            chord_from_key_event(key),
            Some(KeyChord::new("KeyG", false, true))
        );
    }

    #[test]
    fn chord_spec_parses_modifiers_and_codes() {
        assert_eq!(
            parse_chord_spec("meta+shift+BracketLeft"),
            Ok(KeyChord::new("BracketLeft", true, true))
        );
        assert_eq!(
            parse_chord_spec("ctrl+t"),
            Ok(KeyChord::new("KeyT", true, false))
        );
        assert_eq!(parse_chord_spec("enter"), Ok(KeyChord::plain("Enter")));
        assert_eq!(parse_chord_spec("/"), Ok(KeyChord::plain("Slash")));
    }

    #[test]
    fn chord_spec_rejects_garbage() {
        assert!(parse_chord_spec("meta+shift").is_err());
        assert!(parse_chord_spec("ctrl+a+b").is_err());
        assert!(parse_chord_spec("hyper+x").is_err());
    }

    #[test]
    fn command_tokens_resolve() {
        assert_eq!(CommandId::from_token("new_tab"), Some(CommandId::NewTab));
        assert_eq!(
            CommandId::from_token("Toggle-Find-Filter"),
            Some(CommandId::ToggleFindFilter)
        );
        assert_eq!(CommandId::from_token("launch"), None);
        for command in CommandId::ALL {
            assert_eq!(CommandId::from_token(command.title()), Some(command));
        }
    }

    #[test]
    fn chord_serializes_with_wire_field_names() {
        let json = serde_json::to_value(KeyChord::new("KeyT", true, false)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"code": "KeyT", "metaModifier": true, "shiftModifier": false})
        );
    }
}
