use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::app::SearchMode;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
#[group(multiple = false)]
pub struct ModeArgs {
    /// Rank by embedding similarity only
    #[clap(long, default_value = "false")]
    pub semantic: bool,

    /// Rank by keyword relevance only
    #[clap(long, default_value = "false")]
    pub lexical: bool,
}

impl ModeArgs {
    pub fn mode(&self) -> SearchMode {
        match (self.semantic, self.lexical) {
            (true, _) => SearchMode::Semantic,
            (_, true) => SearchMode::Lexical,
            _ => SearchMode::Hybrid,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the http server
    Daemon {},

    /// Add a word
    Add {
        /// The word or phrase
        word: String,

        /// Short meaning
        #[clap(short, long)]
        description: Option<String>,

        /// Longer explanation or usage notes
        #[clap(short, long)]
        explanation: Option<String>,

        /// Comma-separated tags
        #[clap(short, long)]
        tags: Option<String>,

        /// Comma-separated synonyms
        #[clap(short, long)]
        synonyms: Option<String>,

        /// Comma-separated antonyms
        #[clap(short, long)]
        antonyms: Option<String>,

        /// Free-form remark
        #[clap(short, long)]
        remark: Option<String>,
    },

    /// Search words (hybrid ranking by default)
    Search {
        query: String,

        #[command(flatten)]
        mode: ModeArgs,

        /// Maximum number of results
        #[clap(short, long)]
        limit: Option<usize>,

        /// Minimum semantic similarity
        #[clap(short, long, allow_negative_numbers = true)]
        threshold: Option<f64>,
    },

    /// Embed every word that has no vector yet
    Embed {
        /// Words per embedding request
        #[clap(short, long)]
        batch_size: Option<usize>,

        /// Override the configured model
        #[clap(short, long)]
        model: Option<String>,
    },

    /// Rebuild the keyword index
    Reindex {},

    /// Show index statistics
    Stats {},
}
