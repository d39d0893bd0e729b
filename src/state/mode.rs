//! Input snapshot and the mode derived from it

use std::fmt;

use serde::{Deserialize, Serialize};

/// Debounced state of the three physical inputs at one poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputSnapshot {
    /// Wake/sleep switch is on
    pub awake: bool,
    /// Television button is held
    pub television: bool,
    /// Person button is held
    pub person: bool,
}

impl InputSnapshot {
    /// Both buttons held while the switch is off
    pub fn is_combo(&self) -> bool {
        !self.awake && self.television && self.person
    }
}

/// Per-tick classification of the inputs; recomputed on every poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Wake switch off, no combo
    #[default]
    Asleep,
    /// Awake, no button held
    AwakeIdle,
    /// Awake, television button held
    AwakeTelevision,
    /// Awake, person button held
    AwakePerson,
    /// Asleep with both buttons held
    ComboArchive,
}

impl Mode {
    /// Classify a snapshot
    ///
    /// When awake with both buttons held the person button wins: it is the
    /// one the capture phase keeps watching.
    pub fn from_snapshot(snapshot: InputSnapshot) -> Self {
        if snapshot.is_combo() {
            Mode::ComboArchive
        } else if !snapshot.awake {
            Mode::Asleep
        } else if snapshot.person {
            Mode::AwakePerson
        } else if snapshot.television {
            Mode::AwakeTelevision
        } else {
            Mode::AwakeIdle
        }
    }

    /// Whether a handler runs in this mode
    pub fn dispatches(self) -> bool {
        matches!(
            self,
            Mode::AwakeTelevision | Mode::AwakePerson | Mode::ComboArchive
        )
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Asleep => write!(f, "Asleep"),
            Mode::AwakeIdle => write!(f, "AwakeIdle"),
            Mode::AwakeTelevision => write!(f, "AwakeTelevision"),
            Mode::AwakePerson => write!(f, "AwakePerson"),
            Mode::ComboArchive => write!(f, "ComboArchive"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(awake: bool, television: bool, person: bool) -> InputSnapshot {
        InputSnapshot {
            awake,
            television,
            person,
        }
    }

    #[test]
    fn test_asleep_without_buttons() {
        assert_eq!(Mode::from_snapshot(snapshot(false, false, false)), Mode::Asleep);
        assert!(!Mode::Asleep.dispatches());
    }

    #[test]
    fn test_single_button_while_asleep_is_ignored() {
        assert_eq!(Mode::from_snapshot(snapshot(false, true, false)), Mode::Asleep);
        assert_eq!(Mode::from_snapshot(snapshot(false, false, true)), Mode::Asleep);
    }

    #[test]
    fn test_combo_requires_switch_off_and_both_buttons() {
        assert_eq!(
            Mode::from_snapshot(snapshot(false, true, true)),
            Mode::ComboArchive
        );
        assert_ne!(
            Mode::from_snapshot(snapshot(true, true, true)),
            Mode::ComboArchive
        );
    }

    #[test]
    fn test_awake_modes() {
        assert_eq!(Mode::from_snapshot(snapshot(true, false, false)), Mode::AwakeIdle);
        assert_eq!(
            Mode::from_snapshot(snapshot(true, true, false)),
            Mode::AwakeTelevision
        );
        assert_eq!(
            Mode::from_snapshot(snapshot(true, false, true)),
            Mode::AwakePerson
        );
        assert_eq!(
            Mode::from_snapshot(snapshot(true, true, true)),
            Mode::AwakePerson
        );
        assert!(!Mode::AwakeIdle.dispatches());
    }

    #[test]
    fn test_mode_serialization() {
        let json = serde_json::to_string(&Mode::ComboArchive).unwrap();
        assert_eq!(json, "\"combo_archive\"");
    }
}
