//! Interface de terminal do orderflow: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`RunProgress`] acompanha visualmente
//! uma execução do workflow no terminal.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::workflow::{AuditRecord, RunState};

/// Indicador visual de progresso para uma execução do workflow.
///
/// Exibe um spinner animado enquanto o pedido avança e mensagens
/// coloridas para conclusão (verde), falha (vermelho) e espera (amarelo).
pub struct RunProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl RunProgress {
    /// Inicia o spinner com o rótulo do pedido.
    pub fn start(label: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(format!("{}: {label}", RunState::Created));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Atualiza a mensagem do spinner para refletir o estado atual.
    pub fn update_state(&self, state: RunState, detail: &str) {
        self.pb.set_message(format!("{state}: {detail}"));
    }

    /// Exibe as retentativas registradas na execução.
    pub fn retries(&self, failed_attempts: u32) {
        if failed_attempts > 0 {
            self.pb.println(format!(
                "  {} {failed_attempts} failed attempt(s) retried",
                self.yellow.apply_to("↻")
            ));
        }
    }

    /// Finaliza o spinner e exibe o desfecho da execução.
    pub fn complete(&self, record: &AuditRecord) {
        self.pb.finish_and_clear();
        let order = record.order_number.as_deref().unwrap_or("-");
        match record.state {
            RunState::Completed => {
                println!("  {} Order {order} confirmed", self.green.apply_to("✓"));
            }
            RunState::AwaitingConfirmation => {
                println!(
                    "  {} Order {order} awaiting confirmation",
                    self.yellow.apply_to("…")
                );
            }
            RunState::FailedTerminal | RunState::Terminated => {
                let reason = record.failure_reason.as_deref().unwrap_or("unknown reason");
                println!("  {} Order {order} stopped: {reason}", self.red.apply_to("✗"));
            }
            other => {
                println!("  {} Order {order} in {other}", self.yellow.apply_to("•"));
            }
        }
    }

    /// Imprime o registro de auditoria formatado em JSON com estilo colorido.
    pub fn print_audit(&self, record: &AuditRecord) {
        let style = match record.state {
            RunState::Completed => &self.green,
            RunState::FailedTerminal | RunState::Terminated => &self.red,
            _ => &self.yellow,
        };
        println!();
        println!("{}", style.apply_to("─── Audit Record ───"));
        println!(
            "{}",
            serde_json::to_string_pretty(record).unwrap_or_default()
        );
    }
}
