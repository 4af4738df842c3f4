//! Discrete session events published while sends run.

use serde::Serialize;

use crate::domain::conversation::SendPhase;
use crate::domain::foundation::{ConversationId, MessageId};

/// What changed in a session. Subscribers see events in commit order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    PhaseChanged {
        conversation_id: ConversationId,
        phase: SendPhase,
    },
    MessageAppended {
        conversation_id: ConversationId,
        message_id: MessageId,
        is_user: bool,
    },
    TextAppended {
        conversation_id: ConversationId,
        message_id: MessageId,
        fragment: String,
    },
    SourcesAttached {
        conversation_id: ConversationId,
        message_id: MessageId,
        count: usize,
    },
    MessageFinalized {
        conversation_id: ConversationId,
        message_id: MessageId,
        with_error: bool,
    },
}
