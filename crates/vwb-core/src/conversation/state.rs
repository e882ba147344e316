//! Typed view of a chat's persisted dialog state.

use serde::{Deserialize, Serialize};

use crate::{
    domain::{ChatId, ProductId},
    store::ConversationState,
    Result,
};

pub const WATCH: &str = "watch";
pub const UNWATCH: &str = "unwatch_";

/// Step payload, stored as tagged JSON in the state row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepData {
    ConfirmUnwatch { product_id: i64, label: String },
}

impl StepData {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProductRef {
    pub product_id: ProductId,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchStep {
    Prompt,
    Search,
    Select,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnwatchStep {
    Lookup,
    Confirm(ProductRef),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dialog {
    Watch(WatchStep),
    Unwatch(UnwatchStep),
}

/// Result of reading a state row back into a [`Dialog`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decoded {
    Dialog(Dialog),
    /// Known command at a step it has no handler for.
    UnhandledStep,
    UnknownCommand,
}

impl Dialog {
    pub fn command(&self) -> &'static str {
        match self {
            Dialog::Watch(_) => WATCH,
            Dialog::Unwatch(_) => UNWATCH,
        }
    }

    pub fn step(&self) -> i16 {
        match self {
            Dialog::Watch(WatchStep::Prompt) => 1,
            Dialog::Watch(WatchStep::Search) => 2,
            Dialog::Watch(WatchStep::Select) => 3,
            Dialog::Unwatch(UnwatchStep::Lookup) => 1,
            Dialog::Unwatch(UnwatchStep::Confirm(_)) => 2,
        }
    }

    fn data(&self) -> Option<StepData> {
        match self {
            Dialog::Unwatch(UnwatchStep::Confirm(p)) => Some(StepData::ConfirmUnwatch {
                product_id: p.product_id.0,
                label: p.label.clone(),
            }),
            _ => None,
        }
    }

    /// Persistable row for this position. `created_at` is kept from `prev`.
    pub fn encode(
        &self,
        chat_id: ChatId,
        now_ms: i64,
        prev: Option<&ConversationState>,
    ) -> Result<ConversationState> {
        let data = match self.data() {
            Some(d) => Some(d.encode()?),
            None => None,
        };
        Ok(ConversationState {
            chat_id,
            command: self.command().to_string(),
            step: self.step(),
            data,
            created_at: prev.map(|p| p.created_at).unwrap_or(now_ms),
            updated_at: now_ms,
        })
    }

    pub fn decode(state: &ConversationState) -> Result<Decoded> {
        let decoded = match (state.command.as_str(), state.step) {
            (WATCH, 1) => Decoded::Dialog(Dialog::Watch(WatchStep::Prompt)),
            (WATCH, 2) => Decoded::Dialog(Dialog::Watch(WatchStep::Search)),
            (WATCH, 3) => Decoded::Dialog(Dialog::Watch(WatchStep::Select)),
            (UNWATCH, 1) => Decoded::Dialog(Dialog::Unwatch(UnwatchStep::Lookup)),
            (UNWATCH, 2) => match state.data.as_deref() {
                Some(bytes) => match StepData::decode(bytes)? {
                    StepData::ConfirmUnwatch { product_id, label } => {
                        Decoded::Dialog(Dialog::Unwatch(UnwatchStep::Confirm(ProductRef {
                            product_id: ProductId(product_id),
                            label,
                        })))
                    }
                },
                None => Decoded::UnhandledStep,
            },
            (WATCH, _) | (UNWATCH, _) => Decoded::UnhandledStep,
            _ => Decoded::UnknownCommand,
        };
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;

    #[test]
    fn step_data_round_trips_through_json() {
        let data = StepData::ConfirmUnwatch {
            product_id: 12,
            label: "Node.js <LTS>".to_string(),
        };
        let bytes = data.encode().unwrap();
        assert_eq!(StepData::decode(&bytes).unwrap(), data);

        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["kind"], "confirm_unwatch");
    }

    #[test]
    fn confirm_step_survives_encode_decode() {
        let dialog = Dialog::Unwatch(UnwatchStep::Confirm(ProductRef {
            product_id: ProductId(4),
            label: "Ubuntu".to_string(),
        }));
        let row = dialog.encode(ChatId(1), 100, None).unwrap();
        assert_eq!(row.command, UNWATCH);
        assert_eq!(row.step, 2);
        assert_eq!(Dialog::decode(&row).unwrap(), Decoded::Dialog(dialog));
    }

    #[test]
    fn encode_keeps_created_at() {
        let first = Dialog::Watch(WatchStep::Prompt)
            .encode(ChatId(1), 100, None)
            .unwrap();
        let next = Dialog::Watch(WatchStep::Search)
            .encode(ChatId(1), 200, Some(&first))
            .unwrap();
        assert_eq!(next.created_at, 100);
        assert_eq!(next.updated_at, 200);
        assert!(next.data.is_none());
    }

    fn row(command: &str, step: i16, data: Option<Vec<u8>>) -> ConversationState {
        ConversationState {
            chat_id: ChatId(1),
            command: command.to_string(),
            step,
            data,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn unknown_steps_and_commands() {
        assert_eq!(Dialog::decode(&row(WATCH, 9, None)).unwrap(), Decoded::UnhandledStep);
        assert_eq!(Dialog::decode(&row(UNWATCH, 2, None)).unwrap(), Decoded::UnhandledStep);
        assert_eq!(Dialog::decode(&row("bogus", 1, None)).unwrap(), Decoded::UnknownCommand);
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let err = Dialog::decode(&row(UNWATCH, 2, Some(b"{nope".to_vec()))).unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }
}
