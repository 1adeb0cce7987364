//! Configuração do orderflow carregada a partir de `orderflow.toml`.
//!
//! A struct [`OrderFlowConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! As variáveis de ambiente `ACCESS_KEY`, `SECRET_KEY` e `CONDUCTOR_SERVER_URL`
//! têm precedência sobre o arquivo.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::engine::Credentials;
use crate::engine::conductor::DEFAULT_SERVER_URL;
use crate::error::OrderFlowError;
use crate::workflow::order_flow::DEFAULT_WORKFLOW_NAME;

pub const CONFIG_FILE: &str = "orderflow.toml";
pub const ACCESS_KEY_VAR: &str = "ACCESS_KEY";
pub const SECRET_KEY_VAR: &str = "SECRET_KEY";
pub const SERVER_URL_VAR: &str = "CONDUCTOR_SERVER_URL";

/// Configuração de nível superior carregada de `orderflow.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderFlowConfig {
    /// URL base da API do servidor de orquestração.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Identificador da chave de aplicação.
    #[serde(default)]
    pub key_id: String,

    /// Segredo da chave de aplicação.
    #[serde(default)]
    pub key_secret: String,

    #[serde(default = "default_workflow_name")]
    pub workflow_name: String,

    #[serde(default = "default_workflow_version")]
    pub workflow_version: u32,

    /// Dono registrado nas definições de workflow e de tarefas.
    #[serde(default)]
    pub owner_email: Option<String>,

    #[serde(default = "default_webhook_id")]
    pub webhook_id: String,

    /// Intervalo entre polls vazios de cada worker, em milissegundos.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Quantidade de pollers concorrentes por tipo de tarefa.
    #[serde(default = "default_pollers_per_task")]
    pub pollers_per_task: usize,

    /// Quantidade de pedidos de exemplo criados por `start` e `simulate`.
    #[serde(default = "default_sample_orders")]
    pub sample_orders: usize,
}

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

fn default_workflow_name() -> String {
    DEFAULT_WORKFLOW_NAME.to_string()
}

fn default_workflow_version() -> u32 {
    1
}

fn default_webhook_id() -> String {
    "OrderConfirmedHook".to_string()
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_pollers_per_task() -> usize {
    1
}

fn default_sample_orders() -> usize {
    5
}

impl Default for OrderFlowConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            key_id: String::new(),
            key_secret: String::new(),
            workflow_name: default_workflow_name(),
            workflow_version: default_workflow_version(),
            owner_email: None,
            webhook_id: default_webhook_id(),
            poll_interval_ms: default_poll_interval_ms(),
            pollers_per_task: default_pollers_per_task(),
            sample_orders: default_sample_orders(),
        }
    }
}

impl OrderFlowConfig {
    /// Carrega a configuração de `path`, ou de `orderflow.toml` no diretório atual.
    /// Sem caminho explícito, usa valores padrão se o arquivo não existir.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if !path.exists() => {
                return Err(OrderFlowError::Config(format!(
                    "config file {} not found",
                    path.display()
                ))
                .into());
            }
            Some(path) => Self::from_file(path)?,
            None if Path::new(CONFIG_FILE).exists() => Self::from_file(Path::new(CONFIG_FILE))?,
            None => Self::default(),
        };

        // Variáveis de ambiente têm precedência sobre o arquivo.
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, OrderFlowError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Aplica as sobrescritas de ambiente lidas por `var`. Valores vazios são ignorados.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| var(key).filter(|value| !value.trim().is_empty());
        if let Some(key_id) = non_empty(ACCESS_KEY_VAR) {
            self.key_id = key_id;
        }
        if let Some(key_secret) = non_empty(SECRET_KEY_VAR) {
            self.key_secret = key_secret;
        }
        if let Some(server_url) = non_empty(SERVER_URL_VAR) {
            self.server_url = server_url;
        }
    }

    pub fn validate(&self) -> Result<(), OrderFlowError> {
        if self.workflow_name.trim().is_empty() {
            return Err(OrderFlowError::Config("workflow_name must not be empty".into()));
        }
        if self.workflow_version == 0 {
            return Err(OrderFlowError::Config("workflow_version must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(OrderFlowError::Config("poll_interval_ms must be positive".into()));
        }
        if self.key_id.is_empty() != self.key_secret.is_empty() {
            return Err(OrderFlowError::Config(
                "key_id and key_secret must be set together".into(),
            ));
        }
        Ok(())
    }

    /// Credenciais da chave de aplicação, quando configuradas.
    pub fn credentials(&self) -> Option<Credentials> {
        if self.key_id.is_empty() {
            return None;
        }
        Some(Credentials {
            key_id: self.key_id.clone(),
            key_secret: self.key_secret.clone(),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn default_config_values() {
        let config = OrderFlowConfig::default();
        assert_eq!(config.server_url, "https://developer.orkescloud.com/api");
        assert_eq!(config.workflow_name, "OrderDemoWrkFlow");
        assert_eq!(config.workflow_version, 1);
        assert_eq!(config.webhook_id, "OrderConfirmedHook");
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.pollers_per_task, 1);
        assert_eq!(config.sample_orders, 5);
        assert!(config.credentials().is_none());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            workflow_version = 3
            owner_email = "ops@example.com"
            poll_interval_ms = 250
        "#;
        let config: OrderFlowConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.workflow_version, 3);
        assert_eq!(config.owner_email.as_deref(), Some("ops@example.com"));
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.workflow_name, "OrderDemoWrkFlow");
    }

    #[test]
    fn load_reads_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "workflow_name = \"Orders\"\nsample_orders = 2").unwrap();

        let config = OrderFlowConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.workflow_name, "Orders");
        assert_eq!(config.sample_orders, 2);
    }

    #[test]
    fn load_rejects_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = OrderFlowConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn load_rejects_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "workflow_version = \"one\"").unwrap();
        assert!(OrderFlowConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("ACCESS_KEY", "key-1"),
            ("SECRET_KEY", "secret-1"),
            ("CONDUCTOR_SERVER_URL", "http://localhost:8080/api"),
        ]
        .into_iter()
        .collect();
        let mut config = OrderFlowConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.server_url, "http://localhost:8080/api");
        let credentials = config.credentials().unwrap();
        assert_eq!(credentials.key_id, "key-1");
        assert_eq!(credentials.key_secret, "secret-1");
    }

    #[test]
    fn empty_environment_values_are_ignored() {
        let mut config = OrderFlowConfig::default();
        config.apply_env(|_| Some("  ".to_string()));
        assert_eq!(config.server_url, "https://developer.orkescloud.com/api");
        assert!(config.key_id.is_empty());
    }

    #[test]
    fn validation_catches_inconsistent_values() {
        let config = OrderFlowConfig {
            key_id: "only-id".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(OrderFlowError::Config(_))));

        let config = OrderFlowConfig {
            workflow_version: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
