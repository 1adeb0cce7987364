//! Interface de linha de comando do orderflow baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (register, worker,
//! start, simulate) e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// orderflow: workflow de atendimento de pedidos.
#[derive(Debug, Parser)]
#[command(name = "orderflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./orderflow.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Registra as definições de tarefas, o workflow e o webhook de confirmação.
    Register,

    /// Inicia os workers que fazem poll das quatro tarefas até Ctrl-C.
    Worker {
        /// Pollers concorrentes por tipo de tarefa.
        #[arg(long)]
        pollers: Option<usize>,
    },

    /// Inicia execuções do workflow com pedidos de exemplo no servidor remoto.
    Start {
        /// Quantidade de pedidos a iniciar.
        #[arg(long)]
        count: Option<usize>,
    },

    /// Executa o workflow localmente, em processo, com pedidos de exemplo.
    Simulate {
        /// Quantidade de pedidos a simular.
        #[arg(long)]
        count: Option<usize>,

        /// Entrega a confirmação via webhook para as execuções em espera.
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
}
