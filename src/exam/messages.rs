use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::identity::QuestionKey;
use super::question::{ExamMetadata, Question, QuestionType};
use super::session::{CommandOutcome, Notice, SessionView};
use crate::generation::GeneratedDocuments;

/// User actions against an editing session.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "command")]
pub enum SessionCommand {
    SetSelectionCount {
        question_type: QuestionType,
        category: String,
        count: i64,
    },
    ApplySelection,
    ToggleQuestionLock {
        key: QuestionKey,
    },
    /// Locks a whole fake-answer group.
    ToggleCategoryLock {
        question_type: QuestionType,
        category: String,
    },
    ClearLocks,
    BeginEdit {
        key: QuestionKey,
    },
    SaveEdit {
        key: QuestionKey,
        question: Question,
    },
    CancelEdit {
        key: QuestionKey,
    },
    AddQuestion {
        question: Question,
    },
    RemoveQuestion {
        key: QuestionKey,
    },
    UpdateMetadata {
        metadata: ExamMetadata,
    },
    Shuffle,
    /// Re-reads persisted lock state from the store.
    RefreshLocks,
    /// Clears all locks and submits the working set to the generation backend.
    Generate {
        #[serde(default)]
        selected_template: Option<String>,
        #[serde(default)]
        selected_word_template: Option<String>,
    },
}

impl SessionCommand {
    pub fn name(&self) -> &'static str {
        match self {
            SessionCommand::SetSelectionCount { .. } => "SetSelectionCount",
            SessionCommand::ApplySelection => "ApplySelection",
            SessionCommand::ToggleQuestionLock { .. } => "ToggleQuestionLock",
            SessionCommand::ToggleCategoryLock { .. } => "ToggleCategoryLock",
            SessionCommand::ClearLocks => "ClearLocks",
            SessionCommand::BeginEdit { .. } => "BeginEdit",
            SessionCommand::SaveEdit { .. } => "SaveEdit",
            SessionCommand::CancelEdit { .. } => "CancelEdit",
            SessionCommand::AddQuestion { .. } => "AddQuestion",
            SessionCommand::RemoveQuestion { .. } => "RemoveQuestion",
            SessionCommand::UpdateMetadata { .. } => "UpdateMetadata",
            SessionCommand::Shuffle => "Shuffle",
            SessionCommand::RefreshLocks => "RefreshLocks",
            SessionCommand::Generate { .. } => "Generate",
        }
    }
}

/// Events a session pushes to every connected client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "event_type", content = "data")]
pub enum SessionEvent {
    StateUpdated(SessionView),
    Notice(Notice),
    CommandApplied {
        command: String,
        outcome: CommandOutcome,
    },
    DocumentsReady(GeneratedDocuments),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "messageType", content = "payload")]
pub enum ClientToServerMessage {
    /// First message on a fresh socket, binding it to a session.
    ConnectToSession { session_id: Uuid },
    LeaveSession,
    Command(SessionCommand),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "messageType", content = "payload")]
pub enum ServerToClientMessage {
    SessionEvent {
        session_id: Uuid,
        event_data: JsonValue,
    },
    SystemError {
        message: String,
    },
}

impl ServerToClientMessage {
    pub fn to_ws_text(&self) -> Result<axum::extract::ws::Message, serde_json::Error> {
        serde_json::to_string(self)
            .map(|json_string| axum::extract::ws::Message::Text(json_string.into()))
    }

    pub fn new_session_event(
        session_id: Uuid,
        event: &SessionEvent,
    ) -> Result<Self, serde_json::Error> {
        let event_data = serde_json::to_value(event)?;
        Ok(ServerToClientMessage::SessionEvent {
            session_id,
            event_data,
        })
    }
}

pub fn client_message_from_ws_text(text: &str) -> Result<ClientToServerMessage, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exam::session::NoticeLevel;
    use serde_json::json;

    #[test]
    fn test_parse_connect_message() {
        let id = Uuid::new_v4();
        let text = json!({"messageType": "ConnectToSession", "payload": {"session_id": id}}).to_string();
        match client_message_from_ws_text(&text).unwrap() {
            ClientToServerMessage::ConnectToSession { session_id } => assert_eq!(session_id, id),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_parse_commands() {
        let text = json!({
            "messageType": "Command",
            "payload": {
                "command": "SetSelectionCount",
                "question_type": "Multiple Choice",
                "category": "Algebra",
                "count": 3
            }
        })
        .to_string();
        match client_message_from_ws_text(&text).unwrap() {
            ClientToServerMessage::Command(SessionCommand::SetSelectionCount {
                question_type,
                category,
                count,
            }) => {
                assert_eq!(question_type, QuestionType::MultipleChoice);
                assert_eq!(category, "Algebra");
                assert_eq!(count, 3);
            }
            other => panic!("unexpected message {other:?}"),
        }

        let text = json!({"messageType": "Command", "payload": {"command": "Generate"}}).to_string();
        assert!(matches!(
            client_message_from_ws_text(&text).unwrap(),
            ClientToServerMessage::Command(SessionCommand::Generate {
                selected_template: None,
                selected_word_template: None
            })
        ));

        let text = json!({
            "messageType": "Command",
            "payload": {
                "command": "AddQuestion",
                "question": {"type": "written question", "question": "Explain entropy", "answer": ""}
            }
        })
        .to_string();
        assert!(matches!(
            client_message_from_ws_text(&text).unwrap(),
            ClientToServerMessage::Command(SessionCommand::AddQuestion { .. })
        ));
    }

    #[test]
    fn test_rejects_unknown_command() {
        let text = json!({"messageType": "Command", "payload": {"command": "DropTables"}}).to_string();
        assert!(client_message_from_ws_text(&text).is_err());
    }

    #[test]
    fn test_session_event_envelope() {
        let id = Uuid::new_v4();
        let event = SessionEvent::Notice(Notice::info("Only 2 of 3 available."));
        let message = ServerToClientMessage::new_session_event(id, &event).unwrap();
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["messageType"], "SessionEvent");
        assert_eq!(value["payload"]["session_id"], json!(id));
        assert_eq!(value["payload"]["event_data"]["event_type"], "Notice");
        assert_eq!(value["payload"]["event_data"]["data"]["level"], "info");
        assert_eq!(
            serde_json::from_value::<Notice>(value["payload"]["event_data"]["data"].clone())
                .unwrap()
                .level,
            NoticeLevel::Info
        );
    }
}
