//! Abstracción sobre Rig para el modelo de chat (Groq por defecto, OpenAI opcional).

use anyhow::Result;
use async_trait::async_trait;
use rig::completion::Prompt;
use tracing::debug;

use crate::config::{AppConfig, LlmProvider};

/// Cliente de completado: recibe un mensaje de sistema y otro de usuario.
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Gestor del LLM de chat.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub chat_model: String,
    api_key: String,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            provider: cfg.llm_provider.clone(),
            chat_model: cfg.llm_chat_model.clone(),
            api_key: cfg.llm_api_key.clone(),
        }
    }

    async fn complete_with_groq(&self, system: &str, user: &str) -> Result<String> {
        use rig::providers::groq;
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        let client = groq::Client::new(&self.api_key);
        let agent = client.agent(&self.chat_model).preamble(system).build();

        Ok(agent.prompt(user).await?)
    }

    async fn complete_with_openai(&self, system: &str, user: &str) -> Result<String> {
        use rig::providers::openai;
        use rig::client::CompletionClient as _;

        let client = openai::Client::new(&self.api_key);
        let agent = client.agent(&self.chat_model).preamble(system).build();

        Ok(agent.prompt(user).await?)
    }
}

#[async_trait]
impl ChatCompleter for LlmManager {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        debug!(
            "Llamando a {:?}/{} ({} caracteres de sistema)",
            self.provider,
            self.chat_model,
            system.len()
        );
        match self.provider {
            LlmProvider::Groq => self.complete_with_groq(system, user).await,
            LlmProvider::OpenAI => self.complete_with_openai(system, user).await,
        }
    }
}
