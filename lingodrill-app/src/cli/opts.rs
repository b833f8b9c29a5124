use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, ValueEnum)]
pub enum StoreKind {
    Json,
    Sqlite,
    Pg,
}

#[derive(Debug, Parser, Clone)]
#[command(name = "lingodrill", version, about = "lingodrill CLI/API: spaced review and translation-drill rotation")]
pub struct Cli {
    /// Storage backend (applies to CLI and API)
    #[arg(long, value_enum, env = "LINGODRILL_STORE", default_value_t = StoreKind::Json, global = true)]
    pub store: StoreKind,

    /// Owner of the cards
    #[arg(long, env = "LINGODRILL_USER", default_value = "local", global = true)]
    pub user: String,

    /// Study language the cards belong to
    #[arg(long = "lang", env = "LINGODRILL_LANG", default_value = "default", global = true)]
    pub language: String,

    /// File path for --store json|sqlite (defaults to app data dir)
    #[arg(long, env = "LINGODRILL_DB_PATH", global = true)]
    pub db_path: Option<PathBuf>,

    /// Connection string for --store pg
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Card operations
    #[command(subcommand)]
    Card(CardCmd),
    /// Group operations and membership
    #[command(subcommand)]
    Group(GroupCmd),
    /// Spaced review: due queue, grading, interactive loop
    #[command(subcommand)]
    Review(ReviewCmd),
    /// Translation-drill context
    #[command(subcommand)]
    Drill(DrillCmd),
    /// Draw pile settings per group
    #[command(subcommand)]
    Pile(PileCmd),
    /// Review and drill summaries
    Stats(StatsCmd),
    /// Import data
    #[command(subcommand)]
    Import(ImportCmd),
    /// Export data
    #[command(subcommand)]
    Export(ExportCmd),
    /// Launch Axum HTTP API
    Api(ApiCmd),
}

#[derive(Debug, Subcommand, Clone)]
pub enum CardCmd {
    Add(CardAdd),
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        search: Option<String>,
    },
    Show { card_id: String },
    /// Groups the card belongs to
    Groups { card_id: String },
    Edit(CardEdit),
    /// Move a card through draft/active/archived/deleted
    Status { card_id: String, status: String },
    Rm { card_id: String },
}

#[derive(Debug, Args, Clone)]
pub struct CardAdd {
    #[arg(long)]
    pub content: String,
    #[arg(long)]
    pub meaning: Option<String>,
    #[arg(long = "type", default_value = "word")]
    pub card_type: String,
    #[arg(long, default_value = "active")]
    pub status: String,
    #[arg(long = "example")]
    pub examples: Vec<String>,
    #[arg(long = "mnemonic")]
    pub mnemonics: Vec<String>,
    #[arg(long)]
    pub instructions: Option<String>,
    /// Group name or id to assign the new card to
    #[arg(long)]
    pub group: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct CardEdit {
    pub card_id: String,
    #[arg(long)]
    pub content: Option<String>,
    #[arg(long)]
    pub meaning: Option<String>,
    #[arg(long)]
    pub clear_meaning: bool,
    #[arg(long = "type")]
    pub card_type: Option<String>,
    #[arg(long = "add-example")]
    pub add_examples: Vec<String>,
    #[arg(long = "add-mnemonic")]
    pub add_mnemonics: Vec<String>,
    #[arg(long)]
    pub instructions: Option<String>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum GroupCmd {
    Add {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    List,
    /// Rename a group or change its description
    Edit {
        group: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, conflicts_with = "clear_description")]
        description: Option<String>,
        #[arg(long)]
        clear_description: bool,
    },
    Rm { group: String },
    /// Cards in a group
    Cards { group: String },
    Assign { group: String, card_id: String },
    Unassign { group: String, card_id: String },
}

#[derive(Debug, Subcommand, Clone)]
pub enum ReviewCmd {
    /// List cards due now
    Due {
        #[arg(long, default_value_t = 50)]
        max: usize,
    },
    /// Grade a single card (1=hard, 2=medium, 3=easy)
    Grade { card_id: String, quality: String },
    /// Interactive review loop over the due queue
    Run {
        #[arg(long, default_value_t = 50)]
        max: usize,
        /// Enroll active cards that have never been scheduled
        #[arg(long)]
        include_new: bool,
    },
}

#[derive(Debug, Subcommand, Clone)]
pub enum DrillCmd {
    /// Cards currently in active drill context
    Active,
    /// Context entries, optionally filtered by state
    List {
        #[arg(long)]
        state: Option<String>,
    },
    /// Draw from one group's pile, or from every enabled pile
    Draw {
        #[arg(long)]
        group: Option<String>,
    },
    Snooze {
        card_id: String,
        #[arg(long, default_value_t = 24, conflicts_with = "until")]
        hours: i64,
        /// RFC 3339 timestamp
        #[arg(long)]
        until: Option<String>,
    },
    Wake { card_id: String },
    Dismiss { card_id: String },
    /// Manually put a card into active context
    Pin { card_id: String },
    /// Bring a snoozed or dismissed card back, optionally under a group's pile
    Readd {
        card_id: String,
        #[arg(long)]
        group: Option<String>,
    },
    /// Record that a card was used in a translated sentence
    Use { card_id: String },
    /// Set or clear the CEFR level override
    Cefr {
        card_id: String,
        level: Option<String>,
    },
}

#[derive(Debug, Subcommand, Clone)]
pub enum PileCmd {
    Set {
        group: String,
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        name: Option<String>,
    },
    List,
}

#[derive(Debug, Args, Clone)]
pub struct StatsCmd {
    /// Per-day rows to print, most recent first
    #[arg(long, default_value_t = 7)]
    pub days: usize,
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Subcommand, Clone)]
pub enum ExportCmd {
    Json { path: PathBuf },
    Csv {
        path: PathBuf,
        #[arg(long)]
        group: Option<String>,
    },
}

#[derive(Debug, Subcommand, Clone)]
pub enum ImportCmd {
    Json { path: PathBuf },
    Csv {
        path: PathBuf,
        #[arg(long)]
        group: Option<String>,
    },
}

#[derive(Debug, Args, Clone)]
pub struct ApiCmd {
    /// Bind address (host:port)
    #[arg(long, env = "LINGODRILL_ADDR", default_value = "127.0.0.1:8080")]
    pub addr: String,
}
