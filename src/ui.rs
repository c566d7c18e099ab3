//! Interface de terminal do harness: barras de progresso e saída colorida.
//!
//! Usa `indicatif` para a barra de cada lote e `console` para estilização
//! com cores. Quando stderr não é um terminal (ex.: saída redirecionada para
//! um log), as linhas são impressas diretamente e a barra fica oculta.

use std::path::Path;
use std::time::Duration;

use console::{Style, Term};
use indicatif::{ProgressBar, ProgressStyle};

use crate::checkpoint::{CheckpointStats, CheckpointTable};
use crate::outcome::Outcome;
use crate::state_machine::RunRecord;

/// Número de caracteres exibidos do conteúdo de cada resposta.
const PREVIEW_CHARS: usize = 80;

/// Primeiros caracteres de um texto, em uma única linha.
fn preview(text: &str) -> String {
    let flat: String = text
        .chars()
        .take(PREVIEW_CHARS)
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    if text.chars().count() > PREVIEW_CHARS {
        format!("{flat}...")
    } else {
        flat
    }
}

/// Formata uma linha de progresso para um item concluído.
pub fn item_line(outcome: &Outcome) -> String {
    match &outcome.result {
        Ok(text) => format!("Success - Row {}: {}", outcome.id, preview(text)),
        Err(failure) => format!("Error - Row {}: {}", outcome.id, preview(&failure.to_marker())),
    }
}

/// Saída de alto nível de uma execução.
pub struct RunUi {
    green: Style,
    red: Style,
    yellow: Style,
    cyan: Style,
    interactive: bool,
    quiet: bool,
}

impl Default for RunUi {
    fn default() -> Self {
        Self::new()
    }
}

impl RunUi {
    pub fn new() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            cyan: Style::new().cyan(),
            interactive: Term::stderr().is_term(),
            quiet: false,
        }
    }

    /// Sem nenhuma saída; usado nos testes.
    #[cfg(test)]
    pub fn quiet() -> Self {
        Self {
            interactive: false,
            quiet: true,
            ..Self::new()
        }
    }

    fn line(&self, text: impl AsRef<str>) {
        if !self.quiet {
            println!("{}", text.as_ref());
        }
    }

    pub fn filtered(&self, total: usize, kept: usize, ceiling: u64) {
        self.line(format!(
            "Filtered by max_context_length ({ceiling} tokens): {total} to {kept} rows ({} filtered out)",
            total - kept
        ));
    }

    pub fn resuming(&self, path: &Path) {
        self.line(format!(
            "{} Loading existing progress from {}",
            self.cyan.apply_to("↺"),
            path.display()
        ));
    }

    pub fn pending(&self, ids: &[usize]) {
        if let (Some(first), Some(last)) = (ids.first(), ids.last()) {
            self.line(format!(
                "{} rows needing processing: {first} to {last}",
                ids.len()
            ));
        }
    }

    pub fn already_complete(&self) {
        self.line(format!(
            "  {} All rows already processed successfully",
            self.green.apply_to("✓")
        ));
    }

    pub fn batches_created(&self, count: usize, budget: u64) {
        self.line(format!(
            "Created {count} batches based on {budget} tokens/minute"
        ));
    }

    /// Inicia a barra de progresso de um lote.
    pub fn batch(&self, index: usize, total: usize, len: usize) -> BatchProgress {
        if self.quiet {
            return BatchProgress::hidden(len);
        }
        BatchProgress::start(&format!("batch {}/{total}", index + 1), len, self.interactive)
    }

    pub fn batch_saved(&self, succeeded: usize, batch_len: usize, stats: &CheckpointStats) {
        self.line(format!("Saved progress: {succeeded}/{batch_len} succeeded in this batch"));
        self.line(format!(
            "Overall progress: {}/{} ({:.1}%)",
            stats.successes,
            stats.total,
            stats.success_rate()
        ));
    }

    pub fn waiting(&self, interval: Duration) {
        if interval.is_zero() {
            return;
        }
        self.line(format!(
            "  {} Waiting {} seconds",
            self.yellow.apply_to("…"),
            interval.as_secs()
        ));
    }

    /// Resumo final da execução.
    pub fn summary(&self, stats: &CheckpointStats, path: &Path) {
        self.line(format!("Results saved to: {}", path.display()));
        self.line(format!(
            "  {} Successful: {}",
            self.green.apply_to("✓"),
            stats.successes
        ));
        self.line(format!(
            "  {} Errors/Missing: {}",
            self.red.apply_to("✗"),
            stats.errors_or_missing()
        ));
    }

    /// Relatório de um checkpoint existente (`niah status`).
    pub fn status(&self, table: &CheckpointTable, path: &Path) {
        let stats = table.stats();
        self.line(format!(
            "{} ({} rows, result column `{}`)",
            path.display(),
            stats.total,
            table.result_column
        ));
        self.line(format!(
            "  {} Successful: {} ({:.1}%)",
            self.green.apply_to("✓"),
            stats.successes,
            stats.success_rate()
        ));
        self.line(format!(
            "  {} Failed: {}",
            self.red.apply_to("✗"),
            stats.failures
        ));
        for (kind, count) in table.failure_breakdown() {
            self.line(format!("      {kind}: {count}"));
        }
        self.line(format!(
            "  {} Not yet processed: {}",
            self.yellow.apply_to("·"),
            stats.missing
        ));
    }

    /// Imprime o registro final formatado em JSON.
    pub fn print_record(&self, record: &RunRecord) {
        let style = if record.errors_or_missing == 0 {
            &self.green
        } else {
            &self.yellow
        };
        self.line("");
        self.line(style.apply_to("─── Run Record ───").to_string());
        self.line(serde_json::to_string_pretty(record).unwrap_or_default());
    }
}

/// Progresso visual de um lote em execução.
pub struct BatchProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    interactive: bool,
    quiet: bool,
}

impl BatchProgress {
    fn start(label: &str, len: usize, interactive: bool) -> Self {
        let pb = if interactive {
            let pb = ProgressBar::new(len as u64);
            pb.set_style(
                ProgressStyle::with_template("{spinner:.cyan} {msg} [{bar:30}] {pos}/{len} {elapsed}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            pb.set_message(label.to_string());
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        } else {
            ProgressBar::hidden()
        };
        Self {
            pb,
            green: Style::new().green(),
            red: Style::new().red(),
            interactive,
            quiet: false,
        }
    }

    /// Barra sem saída alguma.
    pub fn hidden(len: usize) -> Self {
        let pb = ProgressBar::hidden();
        pb.set_length(len as u64);
        Self {
            pb,
            green: Style::new(),
            red: Style::new(),
            interactive: false,
            quiet: true,
        }
    }

    /// Registra um item concluído e imprime sua linha de progresso.
    pub fn item_done(&self, outcome: &Outcome) {
        self.pb.inc(1);
        if self.quiet {
            return;
        }
        let style = if outcome.is_success() {
            &self.green
        } else {
            &self.red
        };
        let line = style.apply_to(item_line(outcome)).to_string();
        if self.interactive {
            self.pb.println(line);
        } else {
            println!("{line}");
        }
    }

    #[cfg(test)]
    pub fn completed(&self) -> u64 {
        self.pb.position()
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}
