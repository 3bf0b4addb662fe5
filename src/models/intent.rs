//! Intent taxonomy and labeled exemplars for the embedding router.
//!
//! Exemplars are bilingual (Portuguese and English) because operators of the
//! scheduling platform ask in both. The set is embedded once at router init
//! and never mutated at query time.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Supported intents for query classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterIntent {
    // Graph-oriented intents
    DependencyChain,
    ImpactAnalysis,
    ResourceConflict,
    CriticalJobs,
    JobLineage,

    // RAG-oriented intents
    Documentation,
    Explanation,
    Troubleshooting,
    ErrorLookup,

    // Hybrid intents
    RootCause,
    JobDetails,

    // General
    General,
    Greeting,
    Chitchat,
}

impl RouterIntent {
    /// Stable snake_case label, used in prompts, caches, and scores maps.
    pub fn label(&self) -> &'static str {
        match self {
            Self::DependencyChain => "dependency_chain",
            Self::ImpactAnalysis => "impact_analysis",
            Self::ResourceConflict => "resource_conflict",
            Self::CriticalJobs => "critical_jobs",
            Self::JobLineage => "job_lineage",
            Self::Documentation => "documentation",
            Self::Explanation => "explanation",
            Self::Troubleshooting => "troubleshooting",
            Self::ErrorLookup => "error_lookup",
            Self::RootCause => "root_cause",
            Self::JobDetails => "job_details",
            Self::General => "general",
            Self::Greeting => "greeting",
            Self::Chitchat => "chitchat",
        }
    }

    /// All classifiable intents.
    pub fn all() -> &'static [RouterIntent] {
        &[
            Self::DependencyChain,
            Self::ImpactAnalysis,
            Self::ResourceConflict,
            Self::CriticalJobs,
            Self::JobLineage,
            Self::Documentation,
            Self::Explanation,
            Self::Troubleshooting,
            Self::ErrorLookup,
            Self::RootCause,
            Self::JobDetails,
            Self::General,
            Self::Greeting,
            Self::Chitchat,
        ]
    }

    /// Parse a label back to an intent.
    pub fn from_label(label: &str) -> Option<RouterIntent> {
        Self::all().iter().copied().find(|i| i.label() == label)
    }
}

impl fmt::Display for RouterIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Labeled exemplar queries per intent.
pub fn intent_examples() -> Vec<(RouterIntent, Vec<&'static str>)> {
    vec![
        (
            RouterIntent::DependencyChain,
            vec![
                "Quais são as dependências do job?",
                "What are the dependencies of this job?",
                "De que esse job depende?",
                "What does this job depend on?",
                "Lista os predecessores",
                "Show me the predecessor jobs",
                "Cadeia de dependências",
                "Upstream jobs",
                "Jobs que precisam rodar antes",
            ],
        ),
        (
            RouterIntent::ImpactAnalysis,
            vec![
                "O que acontece se esse job falhar?",
                "What happens if this job fails?",
                "Qual o impacto da falha?",
                "Impact analysis",
                "Quais jobs serão afetados?",
                "Which jobs will be affected?",
                "Downstream impact",
                "Análise de impacto",
                "Consequências da falha",
            ],
        ),
        (
            RouterIntent::ResourceConflict,
            vec![
                "Esses jobs podem rodar juntos?",
                "Can these jobs run together?",
                "Conflito de recursos",
                "Resource conflict",
                "Compartilham recursos?",
                "Do they share resources?",
                "Concorrência entre jobs",
                "Recursos exclusivos",
            ],
        ),
        (
            RouterIntent::CriticalJobs,
            vec![
                "Quais são os jobs mais críticos?",
                "What are the most critical jobs?",
                "Jobs de alto risco",
                "High risk jobs",
                "Gargalos do sistema",
                "System bottlenecks",
                "Jobs importantes",
                "Centralidade no grafo",
            ],
        ),
        (
            RouterIntent::JobLineage,
            vec![
                "Mostra a linhagem completa",
                "Show full lineage",
                "Hierarquia do job",
                "Job hierarchy",
                "Árvore de dependências",
                "Dependency tree",
                "Ancestrais e descendentes",
            ],
        ),
        (
            RouterIntent::Documentation,
            vec![
                "Como configuro isso?",
                "How do I configure this?",
                "Onde está a documentação?",
                "Where is the documentation?",
                "Passo a passo para",
                "Step by step guide",
                "Manual de instalação",
                "Setup instructions",
                "Como faço para",
            ],
        ),
        (
            RouterIntent::Explanation,
            vec![
                "O que é isso?",
                "What is this?",
                "Explica o conceito",
                "Explain the concept",
                "O que significa",
                "What does it mean",
                "Para que serve",
                "What is it used for",
            ],
        ),
        (
            RouterIntent::Troubleshooting,
            vec![
                "Como resolver esse erro?",
                "How to fix this error?",
                "Não está funcionando",
                "It's not working",
                "Problema com",
                "Problem with",
                "Falha ao executar",
                "Failed to execute",
                "Erro ao rodar",
            ],
        ),
        (
            RouterIntent::ErrorLookup,
            vec![
                "O que significa o erro RC 12?",
                "What does error RC 12 mean?",
                "Código de erro",
                "Error code",
                "BATCHMAN error",
                "Mensagem de erro",
                "Return code",
                "Significado do erro",
            ],
        ),
        (
            RouterIntent::RootCause,
            vec![
                "Por que o job falhou?",
                "Why did the job fail?",
                "Causa raiz",
                "Root cause",
                "Motivo da falha",
                "Reason for failure",
                "Investigar falha",
                "Investigate failure",
            ],
        ),
        (
            RouterIntent::JobDetails,
            vec![
                "Me conta sobre o job",
                "Tell me about this job",
                "Informações do job",
                "Job information",
                "Status do job",
                "Job status",
                "Detalhes do job",
                "Job details",
            ],
        ),
        (
            RouterIntent::Greeting,
            vec![
                "Olá",
                "Hello",
                "Oi",
                "Hi",
                "Bom dia",
                "Good morning",
                "Boa tarde",
                "Good afternoon",
            ],
        ),
        (
            RouterIntent::Chitchat,
            vec![
                "Como você está?",
                "How are you?",
                "Tudo bem?",
                "What's up?",
                "Obrigado",
                "Thank you",
                "Valeu",
                "Thanks",
            ],
        ),
    ]
}

/// Result of intent classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub intent: RouterIntent,
    pub confidence: f32,
    pub all_scores: HashMap<String, f32>,
    pub used_llm_fallback: bool,
    pub classification_time_ms: f64,
}
