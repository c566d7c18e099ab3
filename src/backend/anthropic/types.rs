//! Tipos de dados para requisições e respostas da API Anthropic Messages.
//!
//! Todas as structs derivam `Serialize` e `Deserialize` para conversão JSON
//! conforme o formato esperado pelo endpoint `v1/messages` da Anthropic.

use serde::{Deserialize, Serialize};

/// Corpo da requisição para o endpoint `/v1/messages` da API Anthropic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesRequest {
    /// Identificador do modelo a ser usado.
    pub model: String,
    /// Número máximo de tokens na resposta gerada pelo modelo.
    pub max_tokens: u32,
    /// Temperatura de amostragem; 0 para respostas determinísticas.
    pub temperature: f32,
    /// Lista de mensagens compondo a conversa.
    pub messages: Vec<Message>,
}

/// Uma única mensagem em uma conversa com a API Anthropic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Papel do remetente: "user" ou "assistant".
    pub role: String,
    /// Conteúdo textual da mensagem.
    pub content: String,
}

/// Resposta retornada pelo endpoint `/v1/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub id: String,
    /// Blocos de conteúdo na resposta.
    pub content: Vec<ContentBlock>,
    pub model: String,
    /// Motivo da parada da geração (ex.: "end_turn", "max_tokens").
    pub stop_reason: Option<String>,
    pub usage: Usage,
}

impl MessagesResponse {
    /// Concatena os blocos de texto da resposta, ignorando blocos de outros tipos.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|b| b.content_type == "text")
            .filter_map(|b| b.text.as_deref())
            .collect()
    }
}

/// Um bloco de conteúdo dentro da resposta.
///
/// O campo `content_type` é serializado como `"type"` no JSON via `serde(rename)`.
/// Blocos que não são texto (ex.: `thinking`) não têm o campo `text`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Estatísticas de consumo de tokens para uma chamada à API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}
