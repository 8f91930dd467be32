use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Command-line client for a duet couple account.
#[derive(Parser, Debug)]
#[command(name = "duet", version)]
#[command(about = "Chat, pairing and shared status for two partners")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an account and sign in
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        username: String,
        /// male or female
        #[arg(long)]
        gender: String,
    },

    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },

    /// End the current session
    Logout,

    /// Show the signed-in user, relationship and partner
    Whoami,

    /// Create, join or leave a relationship
    #[command(subcommand)]
    Pair(PairCommand),

    #[command(subcommand)]
    Chat(ChatCommand),

    /// Search Tenor for GIFs
    #[command(subcommand)]
    Gifs(GifCommand),

    /// Relationship length, anniversary and ages
    Milestones,

    /// Share or read device status
    #[command(subcommand)]
    Telemetry(TelemetryCommand),
}

#[derive(Subcommand, Debug)]
pub enum PairCommand {
    /// Start a relationship; a code is generated when none is given
    Create {
        #[arg(long)]
        code: Option<String>,
    },
    /// Join the partner's relationship with their code
    Join { code: String },
    Show,
    Delete,
}

#[derive(Subcommand, Debug)]
pub enum ChatCommand {
    /// Print recent messages, then follow new ones until interrupted
    Tail {
        /// Older pages to load after the newest one
        #[arg(long, default_value_t = 0)]
        pages: u32,
    },
    Send {
        text: String,
        #[arg(long)]
        reply_to: Option<String>,
    },
    /// Send a GIF by URL
    Gif { url: String },
    /// Upload an image or video and send it
    Upload {
        path: PathBuf,
        #[arg(long)]
        mime_type: Option<String>,
    },
    Edit { id: String, text: String },
    Delete { id: String },
    /// Delete messages older than 24 hours now
    Sweep,
}

#[derive(Subcommand, Debug)]
pub enum GifCommand {
    Categories,
    Search {
        query: String,
        /// Position token printed by the previous page
        #[arg(long)]
        pos: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum TelemetryCommand {
    /// Publish this device's status
    Publish {
        #[arg(long)]
        device: Option<String>,
        #[arg(long)]
        network: Option<String>,
        /// 0.0 to 1.0
        #[arg(long)]
        battery: Option<f64>,
        #[arg(long, requires = "longitude")]
        latitude: Option<f64>,
        #[arg(long, requires = "latitude")]
        longitude: Option<f64>,
        /// Place name shown to the partner
        #[arg(long)]
        place: Option<String>,
    },
    /// Show the partner's last published status
    Partner,
}
