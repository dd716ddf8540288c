//! Replay-protection strategy selection.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How the dispatcher treats a replay-protection key it has already seen.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ReplayStrategy {
    /// Duplicates are refused with `REPLAY_REJECTED`.
    #[default]
    Reject,
    /// Duplicates receive the result cached by the first successful dispatch.
    Idempotent,
}

/// Errors encountered while parsing a [`ReplayStrategy`] from text.
pub type ReplayStrategyParseError = strum::ParseError;
