//! Opinion-based prompt formatting for strict context adherence.
//!
//! Rewrites user questions as attributed questions ("According to X, ...")
//! and builds a system prompt that requires the generator to answer strictly
//! from the supplied context. Attributing the answer to a named source
//! biases the model toward the provided context instead of its training
//! prior. English and Portuguese templates.

use serde::{Deserialize, Serialize};

/// Attribution style for reformulated questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptStyle {
    /// "According to {source}, {question}"
    #[default]
    Document,
    /// "Based on the information provided in {source}, {question}"
    Context,
    /// "What does {source} state about {question}"
    Source,
    /// "What is mentioned in {source} regarding {question}"
    Mentioned,
}

/// Prompt language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptLanguage {
    #[default]
    En,
    Pt,
}

/// Prompt bundle handed to a downstream generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptBundle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub user: String,
}

const QUESTION_WORDS_EN: &[&str] = &[
    "what", "who", "where", "when", "why", "how", "which", "whose", "whom", "is", "are", "can",
    "does",
];

const QUESTION_WORDS_PT: &[&str] = &[
    "qual", "quem", "onde", "quando", "por que", "como", "o que", "quais", "é", "são", "pode",
    "faz",
];

fn attribution_template(style: PromptStyle, language: PromptLanguage) -> &'static str {
    match (language, style) {
        (PromptLanguage::En, PromptStyle::Document) => "According to {source}, {question}",
        (PromptLanguage::En, PromptStyle::Context) => {
            "Based on the information provided in {source}, {question}"
        }
        (PromptLanguage::En, PromptStyle::Source) => "What does {source} state about {question}",
        (PromptLanguage::En, PromptStyle::Mentioned) => {
            "What is mentioned in {source} regarding {question}"
        }
        (PromptLanguage::Pt, PromptStyle::Document) => "De acordo com {source}, {question}",
        (PromptLanguage::Pt, PromptStyle::Context) => {
            "Com base nas informações fornecidas em {source}, {question}"
        }
        (PromptLanguage::Pt, PromptStyle::Source) => "O que {source} afirma sobre {question}",
        (PromptLanguage::Pt, PromptStyle::Mentioned) => {
            "O que é mencionado em {source} a respeito de {question}"
        }
    }
}

fn starts_with_question_word(text: &str, language: PromptLanguage) -> bool {
    let text_lower = text.trim().to_lowercase();
    let words = match language {
        PromptLanguage::En => QUESTION_WORDS_EN,
        PromptLanguage::Pt => QUESTION_WORDS_PT,
    };
    words.iter().any(|word| text_lower.starts_with(word))
}

/// Formats prompts with opinion-based attribution.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpinionBasedPromptFormatter;

impl OpinionBasedPromptFormatter {
    pub fn new() -> Self {
        Self
    }

    /// Reformat a question with source attribution.
    ///
    /// Strips a trailing question mark, prepends the language-appropriate
    /// default interrogative when none is present, applies the attribution
    /// template, and re-appends the question mark.
    pub fn format_question(
        &self,
        question: &str,
        source: &str,
        style: PromptStyle,
        language: PromptLanguage,
    ) -> String {
        let mut question = question.trim().trim_end_matches('?').to_string();

        if !starts_with_question_word(&question, language) {
            question = match language {
                PromptLanguage::En => format!("what {question}"),
                PromptLanguage::Pt => format!("qual {question}"),
            };
        }

        let template = attribution_template(style, language);
        let mut formatted = template
            .replace("{source}", source)
            .replace("{question}", &question.to_lowercase());

        if !formatted.ends_with('?') {
            formatted.push('?');
        }
        formatted
    }

    /// System prompt emphasizing context adherence.
    pub fn format_system_prompt(
        &self,
        agent_role: &str,
        strict_mode: bool,
        language: PromptLanguage,
    ) -> String {
        match (language, strict_mode) {
            (PromptLanguage::Pt, true) => format!(
                "Você é um {agent_role} contextual. Seu papel é responder perguntas\n\
                 baseando-se ESTRITAMENTE nas informações fornecidas no contexto.\n\n\
                 REGRAS CRÍTICAS:\n\
                 1. Use APENAS informações do contexto fornecido\n\
                 2. Se perguntado sobre algo que não está no contexto, diga \"Esta informação não está disponível no contexto fornecido\"\n\
                 3. NUNCA use seu conhecimento de treinamento para preencher lacunas\n\
                 4. Ao citar informações, referencie a fonte explicitamente\n\
                 5. Se o contexto for ambíguo, reconheça a ambiguidade\n\n\
                 Suas respostas devem ser úteis e precisas, mas a aderência ao contexto é PRIMORDIAL."
            ),
            (PromptLanguage::Pt, false) => format!(
                "Você é um {agent_role} prestativo. Priorize as informações fornecidas\n\
                 no contexto, mas pode usar conhecimento geral quando apropriado."
            ),
            (PromptLanguage::En, true) => format!(
                "You are a contextual {agent_role}. Your role is to answer questions\n\
                 based STRICTLY on the information provided in the context.\n\n\
                 CRITICAL RULES:\n\
                 1. ONLY use information from the provided context\n\
                 2. If asked about something not in the context, say \"This information is not available in the provided context\"\n\
                 3. Never use your training knowledge to fill gaps\n\
                 4. When citing information, reference the source explicitly\n\
                 5. If context is ambiguous, acknowledge the ambiguity\n\n\
                 Your answers should be helpful and accurate, but context adherence is PARAMOUNT."
            ),
            (PromptLanguage::En, false) => format!(
                "You are a helpful {agent_role}. Prioritize information from\n\
                 the provided context, but you may use general knowledge when appropriate."
            ),
        }
    }

    /// Full RAG prompt: attributed question, context block, and instructions.
    #[allow(clippy::too_many_arguments)]
    pub fn format_rag_prompt(
        &self,
        query: &str,
        context: &str,
        source_name: &str,
        style: PromptStyle,
        include_system: bool,
        language: PromptLanguage,
        strict_mode: bool,
    ) -> PromptBundle {
        let formatted_question = self.format_question(query, source_name, style, language);

        let user = match language {
            PromptLanguage::Pt => format!(
                "CONTEXTO DE {source_upper}:\n{context}\n\n\
                 PERGUNTA:\n{formatted_question}\n\n\
                 INSTRUÇÕES:\n\
                 - Responda baseando-se APENAS no contexto acima\n\
                 - Cite partes específicas quando relevante\n\
                 - Se a informação estiver incompleta, indique o que está faltando\n\
                 - Mantenha o mesmo idioma da pergunta",
                source_upper = source_name.to_uppercase()
            ),
            PromptLanguage::En => format!(
                "CONTEXT FROM {source_upper}:\n{context}\n\n\
                 QUESTION:\n{formatted_question}\n\n\
                 INSTRUCTIONS:\n\
                 - Answer based ONLY on the context above\n\
                 - Quote specific parts when relevant\n\
                 - If information is incomplete, state what's missing\n\
                 - Maintain the same language as the question",
                source_upper = source_name.to_uppercase()
            ),
        };

        let system = include_system.then(|| {
            self.format_system_prompt("documentation assistant", strict_mode, language)
        });

        PromptBundle { system, user }
    }

    /// Number retrieved chunks into a context block for the user prompt.
    pub fn build_context(&self, chunks: &[crate::models::RetrievedChunk]) -> String {
        if chunks.is_empty() {
            return String::new();
        }

        chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                format!(
                    "[Source {num}] {source} (similarity: {sim:.2})\n{text}",
                    num = i + 1,
                    source = chunk
                        .metadata
                        .get("source")
                        .and_then(|s| s.as_str())
                        .unwrap_or("unknown source"),
                    sim = chunk.final_score,
                    text = chunk.content,
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn formatter() -> OpinionBasedPromptFormatter {
        OpinionBasedPromptFormatter::new()
    }

    #[test]
    fn test_format_question_attributes_source() {
        let formatted = formatter().format_question(
            "What is the return policy?",
            "the customer service manual",
            PromptStyle::Document,
            PromptLanguage::En,
        );
        assert_eq!(
            formatted,
            "According to the customer service manual, what is the return policy?"
        );
    }

    #[test]
    fn test_format_question_adds_missing_interrogative() {
        let formatted = formatter().format_question(
            "the error AWSJR0001E",
            "the error reference",
            PromptStyle::Document,
            PromptLanguage::En,
        );
        assert_eq!(
            formatted,
            "According to the error reference, what the error awsjr0001e?"
        );
    }

    #[test]
    fn test_format_question_portuguese() {
        let formatted = formatter().format_question(
            "Qual é a política de retorno?",
            "o manual de atendimento",
            PromptStyle::Document,
            PromptLanguage::Pt,
        );
        assert_eq!(
            formatted,
            "De acordo com o manual de atendimento, qual é a política de retorno?"
        );
    }

    #[test]
    fn test_format_question_always_ends_with_question_mark() {
        for style in [
            PromptStyle::Document,
            PromptStyle::Context,
            PromptStyle::Source,
            PromptStyle::Mentioned,
        ] {
            let formatted = formatter().format_question(
                "how do I restart a job",
                "the runbook",
                style,
                PromptLanguage::En,
            );
            assert!(formatted.ends_with('?'), "style {style:?}: {formatted}");
        }
    }

    #[test]
    fn test_system_prompt_strict_forbids_training_knowledge() {
        let prompt = formatter().format_system_prompt("TWS expert", true, PromptLanguage::En);
        assert!(prompt.contains("TWS expert"));
        assert!(prompt.contains("STRICTLY"));
        assert!(prompt.contains("training knowledge"));
    }

    #[test]
    fn test_system_prompt_lenient_allows_general_knowledge() {
        let prompt = formatter().format_system_prompt("assistant", false, PromptLanguage::En);
        assert!(prompt.contains("general knowledge"));
        assert!(!prompt.contains("STRICTLY"));
    }

    #[test]
    fn test_rag_prompt_includes_context_and_question() {
        let bundle = formatter().format_rag_prompt(
            "How to configure dependencies?",
            "TWS allows dependencies via the FOLLOWS clause.",
            "TWS scheduling manual",
            PromptStyle::Document,
            true,
            PromptLanguage::En,
            true,
        );
        assert!(bundle.system.is_some());
        assert!(bundle.user.contains("CONTEXT FROM TWS SCHEDULING MANUAL:"));
        assert!(bundle.user.contains("FOLLOWS clause"));
        assert!(bundle
            .user
            .contains("According to TWS scheduling manual, how to configure dependencies?"));
    }

    #[test]
    fn test_rag_prompt_without_system() {
        let bundle = formatter().format_rag_prompt(
            "What is this?",
            "ctx",
            "docs",
            PromptStyle::Document,
            false,
            PromptLanguage::En,
            true,
        );
        assert!(bundle.system.is_none());
    }

    #[test]
    fn test_rag_prompt_portuguese_templates() {
        let bundle = formatter().format_rag_prompt(
            "Quais as dependências do job XPTO?",
            "contexto",
            "manual TWS",
            PromptStyle::Document,
            true,
            PromptLanguage::Pt,
            true,
        );
        assert!(bundle.user.contains("CONTEXTO DE MANUAL TWS:"));
        assert!(bundle.user.contains("PERGUNTA:"));
        assert!(bundle.system.unwrap().contains("ESTRITAMENTE"));
    }

    #[test]
    fn test_build_context_empty() {
        assert!(formatter().build_context(&[]).is_empty());
    }

    #[test]
    fn test_build_context_numbers_sources() {
        let chunk = |source: &str, score: f32| crate::models::RetrievedChunk {
            id: "D1#c000000".into(),
            doc_id: "D1".into(),
            content: "Some text here.".into(),
            metadata: json!({"source": source}),
            sha256: String::new(),
            base_score: score,
            rerank_score: None,
            original_rank: None,
            feedback_score: 0.0,
            feedback_boost: 0.0,
            final_score: score,
            has_feedback: false,
            vector: None,
        };

        let context =
            formatter().build_context(&[chunk("runbook.md", 0.95), chunk("errors.md", 0.80)]);
        assert!(context.contains("[Source 1] runbook.md"));
        assert!(context.contains("[Source 2] errors.md"));
        assert!(context.contains("---"));
        assert!(context.contains("0.95"));
    }
}
