//! Inbound mention: built by the listener, consumed by exactly one forward.

use crate::backend::BackendQuery;
use crate::trace::TraceContext;

#[derive(Debug, Clone)]
pub struct InboundMention {
    pub user_id: String,
    pub conversation_id: String,
    pub text: String,
    pub trace: TraceContext,
}

impl InboundMention {
    pub fn to_query(&self) -> BackendQuery {
        BackendQuery {
            user_id: self.user_id.clone(),
            query: self.text.clone(),
        }
    }
}
