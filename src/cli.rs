//! Interface de linha de comando do harness baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, judge, distractors, status)
//! e flags globais (--verbose, --max-workers, --timeout-secs, --pacing-secs).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::backend::ProviderKind;

/// niah: executa prompts de avaliação em lote contra um modelo, com retomada.
#[derive(Debug, Parser)]
#[command(name = "niah", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Habilita logs de depuração.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Número máximo de requisições simultâneas por lote.
    #[arg(long, global = true)]
    pub max_workers: Option<usize>,

    /// Prazo por item, em segundos.
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Pausa entre lotes, em segundos.
    #[arg(long, global = true)]
    pub pacing_secs: Option<u64>,
}

/// Provedor aceito pela CLI, mapeado para [`ProviderKind`] internamente.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderArg {
    /// API Messages da Anthropic.
    Anthropic,
    /// API compatível com OpenAI (também vLLM).
    Openai,
    /// Servidor Ollama local.
    Ollama,
    /// Text Generation Inference.
    Tgi,
    /// Servidor do llama.cpp.
    Llamacpp,
}

impl From<ProviderArg> for ProviderKind {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Anthropic => ProviderKind::Anthropic,
            ProviderArg::Openai => ProviderKind::OpenAi,
            ProviderArg::Ollama => ProviderKind::Ollama,
            ProviderArg::Tgi => ProviderKind::Tgi,
            ProviderArg::Llamacpp => ProviderKind::LlamaCpp,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa os prompts de um CSV e grava as respostas em outro.
    Run {
        #[arg(long, value_enum)]
        provider: ProviderArg,

        /// CSV de entrada com a coluna de prompt e `token_count`.
        #[arg(long)]
        input: PathBuf,

        /// CSV de saída; também é o checkpoint retomado.
        #[arg(long)]
        output: PathBuf,

        #[arg(long, default_value = "prompt")]
        input_column: String,

        #[arg(long, default_value = "output")]
        output_column: String,

        #[arg(long)]
        model: String,

        /// Linhas com `token_count` acima deste valor são descartadas.
        #[arg(long)]
        max_context_length: u64,

        /// Peso máximo somado de um lote.
        #[arg(long)]
        max_tokens_per_minute: u64,

        /// Reprocessa todas as linhas, inclusive as já concluídas.
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Avalia as respostas de uma execução anterior com um modelo juiz.
    Judge {
        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        output: PathBuf,

        /// Arquivo com o template do prompt; usa o template embutido se omitido.
        #[arg(long)]
        prompt_file: Option<PathBuf>,

        #[arg(long, default_value = "output")]
        output_column: String,

        #[arg(long, default_value = "question")]
        question_column: String,

        #[arg(long, default_value = "answer")]
        answer_column: String,

        /// Coluna onde o veredito é gravado.
        #[arg(long, default_value = "llm_judge_output")]
        result_column: String,

        #[arg(long, default_value = "gpt-4.1-2025-04-14")]
        model: String,

        #[arg(long, value_enum, default_value_t = ProviderArg::Openai)]
        provider: ProviderArg,

        #[arg(long, default_value_t = 2_000_000)]
        max_tokens_per_minute: u64,

        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Rotula qual distrator o modelo escolheu nas respostas julgadas erradas.
    Distractors {
        /// CSV produzido por `niah judge`.
        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        output: PathBuf,

        /// Arquivo com o template do prompt; usa o template embutido se omitido.
        #[arg(long)]
        prompt_file: Option<PathBuf>,

        /// JSON com os distratores (`rewrite_for_analysis`) para `{distractors}`.
        #[arg(long)]
        distractors_file: Option<PathBuf>,

        #[arg(long, default_value = "output")]
        output_column: String,

        #[arg(long, default_value = "question")]
        question_column: String,

        #[arg(long, default_value = "answer")]
        answer_column: String,

        /// Coluna com o veredito do juiz; só linhas `false` são rotuladas.
        #[arg(long, default_value = "llm_judge_output")]
        verdict_column: String,

        #[arg(long, default_value = "distractor_label")]
        result_column: String,

        #[arg(long, default_value = "gpt-4.1-2025-04-14")]
        model: String,

        #[arg(long, value_enum, default_value_t = ProviderArg::Openai)]
        provider: ProviderArg,

        #[arg(long, default_value_t = 1_047_576)]
        max_context_length: u64,

        #[arg(long, default_value_t = 2_000_000)]
        max_tokens_per_minute: u64,

        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Mostra o estado de um checkpoint sem executar nada.
    Status {
        #[arg(long)]
        output: PathBuf,

        #[arg(long, default_value = "output")]
        output_column: String,
    },
}
