//! Interface de terminal do binário de demonstração: barras de progresso e
//! saída colorida.
//!
//! Usa `indicatif` para uma barra por job, alimentada pelo canal de progresso
//! do motor, e `console` para estilizar o resumo final.

use console::Style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use batchrun::{EngineError, EngineStatistics, JobStatus, JobSummary, Progress};

/// Conjunto de barras de progresso, uma por job submetido.
pub struct BatchProgress {
    // Agrupa as barras para que sejam desenhadas juntas.
    multi: MultiProgress,
    green: Style,
    red: Style,
    yellow: Style,
}

impl BatchProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Cria uma barra para o job e a atualiza a cada snapshot publicado.
    ///
    /// A tarefa retornada termina quando o job chega a um status terminal.
    pub fn track(&self, name: &str, mut progress: watch::Receiver<Progress>) -> JoinHandle<()> {
        let total = progress.borrow().total as u64;
        let pb = self.multi.add(ProgressBar::new(total));
        pb.set_style(
            ProgressStyle::with_template("{prefix:>10.cyan} [{bar:30}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        pb.set_prefix(name.to_string());

        tokio::spawn(async move {
            loop {
                let snapshot = progress.borrow_and_update().clone();
                pb.set_position((snapshot.processed + snapshot.cancelled) as u64);
                pb.set_message(format!(
                    "ok {} / failed {} / cancelled {} / {} left",
                    snapshot.successful,
                    snapshot.failed,
                    snapshot.cancelled,
                    snapshot.remaining()
                ));
                if snapshot.is_finished() {
                    pb.finish_with_message(format!("{}", snapshot.status));
                    break;
                }
                if progress.changed().await.is_err() {
                    pb.abandon();
                    break;
                }
            }
        })
    }

    /// Informa que um job não foi aceito pelo motor.
    pub fn rejected(&self, name: &str, err: &EngineError) {
        let _ = self
            .multi
            .println(format!("  {} {name} rejected: {err}", self.yellow.apply_to("!")));
    }

    /// Imprime o resumo final do job em JSON com estilo colorido.
    pub fn print_summary(&self, summary: &JobSummary) {
        let (mark, style) = match summary.status {
            JobStatus::Completed if summary.failed_items == 0 => ("✓", &self.green),
            JobStatus::Completed | JobStatus::Cancelled => ("↻", &self.yellow),
            _ => ("✗", &self.red),
        };
        println!();
        println!(
            "  {} {} {} in {} ms",
            style.apply_to(mark),
            summary.name,
            style.apply_to(summary.status),
            summary.duration_ms
        );
        println!(
            "{}",
            serde_json::to_string_pretty(summary).unwrap_or_default()
        );
    }

    /// Imprime as estatísticas acumuladas do motor.
    pub fn print_statistics(&self, stats: &EngineStatistics) {
        println!();
        println!("{}", self.green.apply_to("─── Engine Statistics ───"));
        println!("{}", serde_json::to_string_pretty(stats).unwrap_or_default());
    }
}
