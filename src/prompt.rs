//! Persona system prompt and context-bearing user message.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::embeddings::RetrievedChunk;

/// Separator placed between context chunks.
pub const CONTEXT_SEPARATOR: &str = "\n---\n";

/// Speaker of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Visitor asking the question.
    User,
    /// Model reply.
    Assistant,
    /// Instructions.
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        })
    }
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Speaker.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatTurn {
    /// System turn.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// User turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// `Context:\n<chunks joined by separator>\n\nQuestion: <question>`.
pub fn build_user_message<S: AsRef<str>>(chunks: &[S], question: &str) -> String {
    let context = chunks
        .iter()
        .map(|chunk| chunk.as_ref())
        .collect::<Vec<&str>>()
        .join(CONTEXT_SEPARATOR);
    format!("Context:\n{context}\n\nQuestion: {question}")
}

/// The assistant's fixed persona.
#[derive(Debug, Clone)]
pub struct Persona {
    subject: String,
}

impl Persona {
    /// Persona answering on behalf of `subject`.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
        }
    }

    /// Person the assistant talks about.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Sentence returned for out-of-scope questions.
    pub fn refusal(&self) -> String {
        format!("I can only answer questions about {}.", self.subject)
    }

    /// Instructions sent as the system turn.
    pub fn system_prompt(&self) -> String {
        let subject = &self.subject;
        format!(
            "You are the assistant on {subject}'s portfolio website. \
             Answer only questions about {subject}, using the context provided with each question. \
             If the context does not cover the question, say so rather than guessing. \
             If a question is not about {subject}, reply with exactly: \"{refusal}\" \
             Refer to {subject} by name and do not use gendered pronouns. \
             Keep answers short and factual.",
            refusal = self.refusal()
        )
    }

    /// System turn followed by the context-bearing user turn.
    pub fn build_messages(&self, chunks: &[RetrievedChunk], question: &str) -> Vec<ChatTurn> {
        let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
        vec![
            ChatTurn::system(self.system_prompt()),
            ChatTurn::user(build_user_message(texts.as_slice(), question)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::SourceTag;
    use pretty_assertions::assert_eq;

    #[test]
    fn user_message_joins_chunks_with_separator() {
        assert_eq!(
            build_user_message(&["x", "y"], "Q?"),
            "Context:\nx\n---\ny\n\nQuestion: Q?"
        );
    }

    #[test]
    fn empty_context_still_carries_the_question() {
        let none: [&str; 0] = [];
        assert_eq!(build_user_message(&none, "Q?"), "Context:\n\n\nQuestion: Q?");
    }

    #[test]
    fn persona_prompt_names_subject_and_refusal() {
        let persona = Persona::new("Nihar Shah");
        let prompt = persona.system_prompt();
        assert!(prompt.contains("Answer only questions about Nihar Shah"));
        assert!(prompt.contains("\"I can only answer questions about Nihar Shah.\""));
    }

    #[test]
    fn messages_are_system_then_user() {
        let persona = Persona::new("Nihar Shah");
        let chunk = RetrievedChunk {
            text: "Builds voice assistants".into(),
            source: SourceTag::About,
            metadata: Default::default(),
            similarity: Some(0.8),
        };
        let messages = persona.build_messages(&[chunk], "What does Nihar build?");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(
            messages[1],
            ChatTurn::user("Context:\nBuilds voice assistants\n\nQuestion: What does Nihar build?")
        );
    }

    #[test]
    fn roles_serialize_lowercase() {
        let turn: ChatTurn = serde_json::from_str(r#"{"role":"assistant","content":"hi"}"#).unwrap();
        assert_eq!(turn.role, Role::Assistant);
        assert_eq!(serde_json::to_string(&Role::System).unwrap(), "\"system\"");
    }
}
