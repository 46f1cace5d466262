//! Configuração do motor carregada a partir de `batchrun.toml`.
//!
//! A struct [`EngineConfig`] contém todos os limites configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! As variáveis de ambiente `BATCHRUN_*` têm precedência sobre o arquivo.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{EngineError, Result};

/// Arquivo procurado no diretório atual por [`EngineConfig::load`].
pub const DEFAULT_CONFIG_FILE: &str = "batchrun.toml";

/// Configuração de nível superior do motor de lotes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Máximo de jobs executando simultaneamente no motor.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Máximo de itens aceitos em um único job.
    #[serde(default = "default_max_items_per_batch")]
    pub max_items_per_batch: usize,

    /// Máximo de itens executando em paralelo dentro de um job.
    #[serde(default = "default_max_concurrent_items_per_job")]
    pub max_concurrent_items_per_job: usize,

    /// Tentativas por item, incluindo a primeira.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Atraso base em milissegundos para backoff exponencial.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Teto do backoff em milissegundos.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Intervalo mínimo entre chamadas para classes sem entrada em `rate_limits`.
    #[serde(default = "default_rate_limit_interval_ms")]
    pub rate_limit_interval_ms: u64,

    /// Intervalo mínimo por classe de recurso, em milissegundos.
    #[serde(default)]
    pub rate_limits: HashMap<String, u64>,
}

// Valor padrão para jobs simultâneos: 5.
fn default_max_concurrent_jobs() -> usize {
    5
}

// Valor padrão para itens por lote: 100.
fn default_max_items_per_batch() -> usize {
    100
}

// Valor padrão para itens simultâneos por job: 10.
fn default_max_concurrent_items_per_job() -> usize {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_rate_limit_interval_ms() -> u64 {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            max_items_per_batch: default_max_items_per_batch(),
            max_concurrent_items_per_job: default_max_concurrent_items_per_job(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            rate_limit_interval_ms: default_rate_limit_interval_ms(),
            rate_limits: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Carrega a configuração de `batchrun.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Carrega a configuração de um caminho explícito, aplicando as
    /// sobreposições de ambiente e validando o resultado.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<EngineConfig>(&contents)?
        } else {
            Self::default()
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    // Variáveis de ambiente têm precedência sobre o arquivo de configuração.
    fn apply_env(&mut self) -> Result<()> {
        if let Some(value) = env_usize("BATCHRUN_MAX_CONCURRENT_JOBS")? {
            self.max_concurrent_jobs = value;
        }
        if let Some(value) = env_usize("BATCHRUN_MAX_CONCURRENT_ITEMS")? {
            self.max_concurrent_items_per_job = value;
        }
        Ok(())
    }

    /// Rejeita limites que deixariam o motor incapaz de progredir.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(EngineError::Config(
                "max_concurrent_jobs must be at least 1".into(),
            ));
        }
        if self.max_items_per_batch == 0 {
            return Err(EngineError::Config(
                "max_items_per_batch must be at least 1".into(),
            ));
        }
        if self.max_concurrent_items_per_job == 0 {
            return Err(EngineError::Config(
                "max_concurrent_items_per_job must be at least 1".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(EngineError::Config("max_attempts must be at least 1".into()));
        }
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(EngineError::Config(format!(
                "retry_max_delay_ms ({}) is below retry_base_delay_ms ({})",
                self.retry_max_delay_ms, self.retry_base_delay_ms
            )));
        }
        Ok(())
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn rate_limit_interval(&self) -> Duration {
        Duration::from_millis(self.rate_limit_interval_ms)
    }
}

fn env_usize(key: &str) -> Result<Option<usize>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| EngineError::Config(format!("{key}={raw}: {e}"))),
        _ => Ok(None),
    }
}
