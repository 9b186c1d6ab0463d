use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "pricewatch",
    version,
    about = "Track product prices with network, DOM and vision extraction"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Default currency code when a page does not state one (e.g., USD, EUR)
    #[arg(long, global = true)]
    pub currency: Option<String>,

    /// Directory holding the target, history and preference files
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Verbose logging and a headed browser for troubleshooting
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start tracking a product page
    Track {
        /// Product page URL
        url: String,

        /// Display name (derived from the URL when omitted)
        #[arg(long)]
        name: Option<String>,
    },

    /// List tracked targets
    List,

    /// Check the current price of a target
    Check {
        /// Target ID as shown by `list`
        id: u64,
    },

    /// Tell the engine which reading of the last check was right
    #[command(group(ArgGroup::new("verdict").required(true)))]
    Feedback {
        id: u64,

        /// The reported price was correct
        #[arg(long, group = "verdict")]
        primary: bool,

        /// The alternative reading was correct
        #[arg(long, group = "verdict")]
        alternative: bool,

        /// Neither reading was correct
        #[arg(long, group = "verdict")]
        reject: bool,
    },

    /// Add a price alert to a target
    #[command(group(ArgGroup::new("condition").required(true)))]
    Alert {
        id: u64,

        /// Fire when the price drops to or below this amount
        #[arg(long, group = "condition")]
        below: Option<f64>,

        /// Fire when the discount from the original price reaches this percentage
        #[arg(long, group = "condition")]
        drop_percent: Option<f64>,
    },

    /// Re-check every target whose retry is due
    Retry,

    /// Check that the vision services are reachable
    Health,
}
