//! Prompt templates for question condensation and answer generation.
//!
//! Every template exists in English and Chinese. The answer templates
//! instruct the model to use only the supplied context and to reply with a
//! fixed insufficiency phrase when the context does not contain the answer.

use serde::{Deserialize, Serialize};

use crate::models::ConversationTurn;

/// Language of prompts and of the fixed user-facing replies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptLanguage {
    #[default]
    En,
    Zh,
}

impl PromptLanguage {
    /// The exact phrase the model must use when the context is insufficient.
    pub fn insufficient_context(self) -> &'static str {
        match self {
            PromptLanguage::En => "Based on the provided documents, I cannot answer this question.",
            PromptLanguage::Zh => "根据提供的文档内容，我无法回答这个问题",
        }
    }

    pub fn no_relevant_documents(self) -> &'static str {
        match self {
            PromptLanguage::En => "No relevant documents found.",
            PromptLanguage::Zh => "未找到相关文档",
        }
    }

    pub fn blank_question(self) -> &'static str {
        match self {
            PromptLanguage::En => "Please enter a question.",
            PromptLanguage::Zh => "请输入问题",
        }
    }

    /// Answer text of a failed query cycle.
    pub fn query_failed(self, error: &anyhow::Error) -> String {
        match self {
            PromptLanguage::En => format!("An error occurred while processing the query: {:#}", error),
            PromptLanguage::Zh => format!("查询过程中出现错误: {:#}", error),
        }
    }
}

/// Render conversation turns as `Human:` / `Assistant:` lines.
pub fn format_history<'a>(turns: impl IntoIterator<Item = &'a ConversationTurn>) -> String {
    turns
        .into_iter()
        .map(|t| format!("Human: {}\nAssistant: {}", t.question, t.answer))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Join chunk texts, in rank order, into one context block.
pub fn build_context<'a>(texts: impl IntoIterator<Item = &'a str>) -> String {
    texts.into_iter().collect::<Vec<_>>().join("\n\n")
}

/// Prompt asking the model to rewrite `question` as a standalone question.
pub fn condense_prompt(lang: PromptLanguage, history: &str, question: &str) -> String {
    match lang {
        PromptLanguage::En => format!(
            "Given the following conversation and a follow up question, rephrase the follow up \
             question to be a standalone question, in its original language.\n\n\
             Chat History:\n{history}\n\
             Follow Up Input: {question}\n\
             Standalone question:"
        ),
        PromptLanguage::Zh => format!(
            "根据以下对话历史和后续问题，将后续问题改写为一个独立、完整的问题，保持问题的原始语言。\n\n\
             对话历史:\n{history}\n\
             后续问题: {question}\n\
             独立问题:"
        ),
    }
}

/// Answer-generation prompt. `history` selects the history-aware variant
/// when present and non-empty.
pub fn qa_prompt(lang: PromptLanguage, context: &str, question: &str, history: Option<&str>) -> String {
    let refuse = lang.insufficient_context();
    let history = history.filter(|h| !h.trim().is_empty());
    match (lang, history) {
        (PromptLanguage::En, None) => format!(
            "You are an intelligent assistant. Your task is to answer the user's question based on \
             the provided document content.\n\n\
             Document content:\n{context}\n\n\
             Based on the document content above, please answer the following question accurately \
             and concisely. If the information is not available in the document, clearly state \
             \"{refuse}\" Do not make up information that is not in the document.\n\n\
             User question: {question}\n\n\
             Answer:"
        ),
        (PromptLanguage::En, Some(history)) => format!(
            "You are an intelligent assistant. Your task is to answer the user's question based on \
             the provided document content.\n\n\
             Document content:\n{context}\n\n\
             Conversation history:\n{history}\n\n\
             Based on the document content and the conversation history above, please answer the \
             following question accurately and concisely. If the information is not available in \
             the document, clearly state \"{refuse}\" Do not make up information that is not in \
             the document.\n\n\
             User question: {question}\n\n\
             Answer:"
        ),
        (PromptLanguage::Zh, None) => format!(
            "你是一个智能助手，你的任务是根据提供的文档内容回答用户问题。\n\n\
             文档内容:\n{context}\n\n\
             请根据上述文档内容，准确、简洁地回答以下问题。如果文档中没有相关信息，请明确说明\"{refuse}\"。\
             不要编造不在文档中的信息。\n\n\
             用户问题: {question}\n\n\
             回答:"
        ),
        (PromptLanguage::Zh, Some(history)) => format!(
            "你是一个智能助手，你的任务是根据提供的文档内容回答用户问题。\n\n\
             文档内容:\n{context}\n\n\
             历史对话:\n{history}\n\n\
             请根据上述文档内容和历史对话，准确、简洁地回答以下问题。如果文档中没有相关信息，请明确说明\"{refuse}\"。\
             不要编造不在文档中的信息。\n\n\
             用户问题: {question}\n\n\
             回答:"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn turn(q: &str, a: &str) -> ConversationTurn {
        ConversationTurn {
            question: q.into(),
            answer: a.into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn qa_prompt_embeds_context_question_and_refusal() {
        let p = qa_prompt(PromptLanguage::En, "CTX", "What is X?", None);
        assert!(p.contains("Document content:\nCTX"));
        assert!(p.contains("User question: What is X?"));
        assert!(p.contains(PromptLanguage::En.insufficient_context()));
        assert!(!p.contains("Conversation history"));
    }

    #[test]
    fn qa_prompt_history_variant() {
        let p = qa_prompt(PromptLanguage::Zh, "上下文", "它是什么？", Some("Human: a\nAssistant: b"));
        assert!(p.contains("历史对话:\nHuman: a"));
        assert!(p.contains(PromptLanguage::Zh.insufficient_context()));

        let blank = qa_prompt(PromptLanguage::Zh, "上下文", "问题", Some("  "));
        assert!(!blank.contains("历史对话"));
    }

    #[test]
    fn history_and_context_formatting() {
        let turns = vec![turn("q1", "a1"), turn("q2", "a2")];
        assert_eq!(
            format_history(&turns),
            "Human: q1\nAssistant: a1\nHuman: q2\nAssistant: a2"
        );
        assert_eq!(build_context(["one", "two"]), "one\n\ntwo");
    }

    #[test]
    fn condense_prompt_carries_history() {
        let p = condense_prompt(PromptLanguage::En, "Human: hi\nAssistant: hello", "and it?");
        assert!(p.contains("Chat History:\nHuman: hi"));
        assert!(p.ends_with("Follow Up Input: and it?\nStandalone question:"));
    }

    #[test]
    fn language_parses_lowercase() {
        let lang: PromptLanguage = serde_json::from_str("\"zh\"").unwrap();
        assert_eq!(lang, PromptLanguage::Zh);
    }
}
