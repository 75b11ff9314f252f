use futures::StreamExt;

use crate::error::{RelayError, Result};
use crate::message::{Message, Role};
use crate::relay::ConversationRelay;

/// Client-side conversation state: an append-only transcript where the
/// assistant reply for a turn grows as fragments stream in.
#[derive(Default, Clone, Debug)]
pub struct ChatSession {
    messages: Vec<Message>,
}

impl ChatSession {
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Appends the user turn and returns the history to send, which always
    /// ends with that turn.
    pub fn submit(&mut self, input: impl Into<String>) -> Result<Vec<Message>> {
        let input = input.into();
        if input.trim().is_empty() {
            return Err(RelayError::InvalidConversation("message is empty".into()));
        }
        self.messages.push(Message::user(input));
        Ok(self.messages.clone())
    }

    /// Extends the in-flight assistant reply, starting it if the last
    /// message is still the user's.
    pub fn apply_fragment(&mut self, fragment: &str) {
        match self.messages.last_mut() {
            Some(last) if last.role == Role::Assistant => last.content.push_str(fragment),
            _ => self.messages.push(Message::assistant(fragment)),
        }
    }

    /// Submits `input`, streams the reply into the transcript and returns
    /// the complete assistant text. A reply interrupted by an error stays in
    /// the transcript as received.
    pub async fn send<F>(
        &mut self,
        relay: &ConversationRelay,
        input: impl Into<String>,
        mut on_fragment: F,
    ) -> Result<String>
    where
        F: FnMut(&str),
    {
        let history = self.submit(input)?;
        let mut stream = relay.continue_conversation(&history).await?;
        let mut reply = String::new();
        while let Some(fragment) = stream.next().await {
            let fragment = fragment?;
            on_fragment(&fragment);
            self.apply_fragment(&fragment);
            reply.push_str(&fragment);
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StubModel;

    #[test]
    fn submitted_history_ends_with_latest_user_turn() {
        let mut session = ChatSession::default();
        let first = session.submit("hi").unwrap();
        assert_eq!(first, vec![Message::user("hi")]);

        session.apply_fragment("Hello, ");
        session.apply_fragment("what can I get you?");
        let second = session.submit("a greek salad").unwrap();
        assert_eq!(second.last(), Some(&Message::user("a greek salad")));
        assert_eq!(second[1], Message::assistant("Hello, what can I get you?"));
    }

    #[test]
    fn rejects_blank_input() {
        let mut session = ChatSession::default();
        assert!(session.submit("   ").is_err());
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn send_streams_reply_into_transcript() {
        let model = StubModel::new(vec![
            "Welcome to Pizza AI!".into(),
            "Pickup or delivery?".into(),
        ]);
        let relay = ConversationRelay::new(model.clone());
        let mut session = ChatSession::default();

        let mut seen = Vec::new();
        let reply = session
            .send(&relay, "hello", |fragment| seen.push(fragment.to_string()))
            .await
            .unwrap();
        assert_eq!(reply, "Welcome to Pizza AI!");
        assert_eq!(seen.len(), 4);

        session.send(&relay, "one small fries", |_| {}).await.unwrap();
        assert_eq!(session.len(), 4);
        assert_eq!(
            session.messages()[3],
            Message::assistant("Pickup or delivery?")
        );

        for sent in model.received() {
            assert_eq!(sent.last().map(|m| m.role), Some(Role::User));
        }
        assert_eq!(
            model.received()[1].last(),
            Some(&Message::user("one small fries"))
        );
    }

    #[tokio::test]
    async fn failed_turn_keeps_user_message() {
        let relay = ConversationRelay::new(StubModel::new(vec![]));
        let mut session = ChatSession::default();
        assert!(session.send(&relay, "hello", |_| {}).await.is_err());
        assert_eq!(session.messages(), &[Message::user("hello")]);
    }
}
