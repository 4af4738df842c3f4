//! CLI argument definitions for the `colloquy` binary.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use colloquy::domain::export::{ExportFormat, ExportOptions};
use colloquy::domain::foundation::ConversationId;

/// Colloquy - talk to a chat backend and keep the transcripts.
#[derive(Parser, Debug)]
#[command(name = "colloquy", version, about)]
pub struct CliArgs {
    /// Log filter directive; overrides the configured level.
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a message and print the reply.
    Send {
        /// Continue this conversation instead of starting a new one.
        #[arg(short = 'c', long = "conversation")]
        conversation: Option<ConversationId>,

        /// Wait for the whole reply instead of streaming it.
        #[arg(long)]
        atomic: bool,

        text: String,
    },

    /// List stored conversations, most recently updated first.
    List,

    /// Find conversations by title, message text or topic.
    Search { query: String },

    /// Print a conversation transcript.
    Show { id: ConversationId },

    /// Export a conversation.
    Export(ExportArgs),

    /// Delete a conversation.
    Delete { id: ConversationId },
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    pub id: ConversationId,

    /// json, markdown (md), text (txt) or csv.
    #[arg(short = 'f', long = "format", default_value = "markdown")]
    pub format: ExportFormat,

    #[arg(long = "no-metadata")]
    pub no_metadata: bool,

    #[arg(long = "no-sources")]
    pub no_sources: bool,

    #[arg(long = "no-timestamps")]
    pub no_timestamps: bool,

    /// Write to this path instead of stdout. A directory gets the
    /// generated filename.
    #[arg(short = 'o', long = "out")]
    pub out: Option<PathBuf>,
}

impl ExportArgs {
    pub fn options(&self) -> ExportOptions {
        ExportOptions {
            include_metadata: !self.no_metadata,
            include_sources: !self.no_sources,
            include_timestamps: !self.no_timestamps,
        }
    }
}
