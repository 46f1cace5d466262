//! Interface de linha de comando do binário de demonstração, baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (demo, config)
//! e flags globais (--config, --verbose, --log-format).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// batchrun: motor de execução de jobs em lote.
#[derive(Debug, Parser)]
#[command(name = "batchrun", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração TOML (padrão: ./batchrun.toml).
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Formato dos logs emitidos em stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,
}

/// Formatos de log aceitos pela CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Uma linha por evento.
    Compact,
    /// Saída multi-linha legível.
    Pretty,
    /// JSON por linha, para ingestão por coletores.
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa jobs sintéticos no motor e mostra o progresso.
    Demo {
        /// Número de jobs submetidos em paralelo.
        #[arg(long, default_value_t = 2)]
        jobs: usize,

        /// Itens por job.
        #[arg(long, default_value_t = 20)]
        items: usize,

        /// Todo N-ésimo item falha permanentemente (0 desativa).
        #[arg(long, default_value_t = 0)]
        fail_every: u32,

        /// Todo N-ésimo item falha na primeira tentativa (0 desativa).
        #[arg(long, default_value_t = 5)]
        flaky_every: u32,

        /// Latência simulada de cada chamada ao handler, em milissegundos.
        #[arg(long, default_value_t = 50)]
        latency_ms: u64,

        /// Cancela o primeiro job após este intervalo, em milissegundos.
        #[arg(long)]
        cancel_after_ms: Option<u64>,
    },

    /// Mostra a configuração efetiva (arquivo + ambiente) em TOML.
    Config,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_demo_defaults() {
        let cli = Cli::parse_from(["batchrun", "demo"]);
        match cli.command {
            Command::Demo {
                jobs,
                items,
                fail_every,
                flaky_every,
                latency_ms,
                cancel_after_ms,
            } => {
                assert_eq!(jobs, 2);
                assert_eq!(items, 20);
                assert_eq!(fail_every, 0);
                assert_eq!(flaky_every, 5);
                assert_eq!(latency_ms, 50);
                assert!(cancel_after_ms.is_none());
            }
            _ => panic!("expected Demo command"),
        }
        assert_eq!(cli.log_format, LogFormat::Compact);
    }

    #[test]
    fn cli_parses_demo_options() {
        let cli = Cli::parse_from([
            "batchrun",
            "demo",
            "--jobs",
            "3",
            "--items",
            "50",
            "--fail-every",
            "7",
            "--cancel-after-ms",
            "200",
        ]);
        match cli.command {
            Command::Demo {
                jobs,
                items,
                fail_every,
                cancel_after_ms,
                ..
            } => {
                assert_eq!(jobs, 3);
                assert_eq!(items, 50);
                assert_eq!(fail_every, 7);
                assert_eq!(cancel_after_ms, Some(200));
            }
            _ => panic!("expected Demo command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "batchrun",
            "--config",
            "custom.toml",
            "--log-format",
            "json",
            "--verbose",
            "config",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert_eq!(cli.log_format.as_str(), "json");
        assert!(matches!(cli.command, Command::Config));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
