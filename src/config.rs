//! Configuração do harness carregada a partir de `niah.toml`.
//!
//! A struct [`HarnessConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis. Variáveis de
//! ambiente têm precedência sobre o arquivo, e flags da CLI sobre ambos.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;

/// Configuração de nível superior carregada de `niah.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct HarnessConfig {
    /// Máximo de requisições simultâneas por lote em `niah run`.
    #[serde(default = "default_concurrency_cap")]
    pub concurrency_cap: usize,

    /// Máximo de requisições simultâneas por lote em `niah judge`.
    #[serde(default = "default_concurrency_cap")]
    pub judge_concurrency_cap: usize,

    /// Prazo por item, em segundos, antes de marcar `ERROR_TIMEOUT`.
    #[serde(default = "default_per_item_timeout_secs")]
    pub per_item_timeout_secs: u64,

    /// Pausa entre lotes, em segundos.
    #[serde(default = "default_pacing_interval_secs")]
    pub pacing_interval_secs: u64,

    /// Limite de saída quando o CSV não tem a coluna `max_output_tokens`.
    #[serde(default = "default_max_output_tokens")]
    pub default_max_output_tokens: u32,

    #[serde(default = "default_ollama_host")]
    pub ollama_host: String,

    /// URL base alternativa para servidores compatíveis com OpenAI (ex.: vLLM).
    #[serde(default)]
    pub openai_api_base: Option<String>,

    /// URL do servidor TGI ou llama.cpp.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    #[serde(default)]
    pub anthropic_api_key: String,

    #[serde(default = "default_openai_api_key")]
    pub openai_api_key: String,
}

// Padrão conservador para não sobrecarregar um único servidor de inferência.
fn default_concurrency_cap() -> usize {
    4
}

fn default_per_item_timeout_secs() -> u64 {
    500
}

fn default_pacing_interval_secs() -> u64 {
    60
}

fn default_max_output_tokens() -> u32 {
    1000
}

fn default_ollama_host() -> String {
    "http://localhost:11434".to_string()
}

fn default_server_url() -> String {
    "http://localhost:8080".to_string()
}

// Servidores locais compatíveis com OpenAI costumam aceitar qualquer chave.
fn default_openai_api_key() -> String {
    "dummy".to_string()
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            concurrency_cap: default_concurrency_cap(),
            judge_concurrency_cap: default_concurrency_cap(),
            per_item_timeout_secs: default_per_item_timeout_secs(),
            pacing_interval_secs: default_pacing_interval_secs(),
            default_max_output_tokens: default_max_output_tokens(),
            ollama_host: default_ollama_host(),
            openai_api_base: None,
            server_url: default_server_url(),
            anthropic_api_key: String::new(),
            openai_api_key: default_openai_api_key(),
        }
    }
}

/// Lê um inteiro positivo; valores inválidos ou zero são ignorados.
fn positive(value: Option<String>) -> Option<usize> {
    value
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&n| n > 0)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl HarnessConfig {
    /// Carrega a configuração de `niah.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("niah.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<HarnessConfig>(&contents)?
        } else {
            Self::default()
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Variáveis de ambiente têm precedência sobre o arquivo de configuração.
    ///
    /// `var` resolve o nome de uma variável; em produção é `std::env::var`.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(n) = positive(var("NIAH_MAX_WORKERS")) {
            self.concurrency_cap = n;
        }
        if let Some(n) = positive(var("NIAH_JUDGE_MAX_WORKERS")) {
            self.judge_concurrency_cap = n;
        }
        if let Some(host) = non_empty(var("OLLAMA_HOST")) {
            self.ollama_host = host;
        }
        if let Some(base) = non_empty(var("OPENAI_API_BASE")) {
            self.openai_api_base = Some(base);
        }
        if let Some(key) = non_empty(var("OPENAI_API_KEY")) {
            self.openai_api_key = key;
        }
        if let Some(key) = non_empty(var("ANTHROPIC_API_KEY")) {
            self.anthropic_api_key = key;
        }
    }

    pub fn per_item_timeout(&self) -> Duration {
        Duration::from_secs(self.per_item_timeout_secs)
    }

    pub fn pacing_interval(&self) -> Duration {
        Duration::from_secs(self.pacing_interval_secs)
    }
}
