use clap::{Parser, Subcommand};

/// panelhub: proxy-panel client management with admin traffic quotas
#[derive(Parser)]
#[command(name = "panelhub", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to PANELHUB_PORT)
        #[arg(short, long, env = "PANELHUB_PORT")]
        port: Option<u16>,
        /// Keep admins and panels in memory instead of PostgreSQL
        #[arg(long)]
        memory: bool,
    },

    /// Manage panels
    Panel {
        #[command(subcommand)]
        command: PanelCommands,
    },

    /// Manage admins
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },
}

#[derive(Subcommand)]
pub enum PanelCommands {
    /// Register a panel after checking that it answers
    Add {
        #[arg(long)]
        name: String,
        /// 3x-ui, tx-ui or marzban
        #[arg(long = "type")]
        panel_type: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        sub_url: Option<String>,
        #[arg(long)]
        username: String,
        #[arg(long, env = "PANELHUB_PANEL_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// List registered panels
    List,
    /// Connect to a registered panel
    Test {
        #[arg(long)]
        name: String,
    },
}

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Create an admin bound to a panel
    Add {
        #[arg(long)]
        username: String,
        #[arg(long)]
        panel: String,
        #[arg(long)]
        inbound_id: Option<i64>,
        #[arg(long)]
        inbound_flow: Option<String>,
        /// Initial balance in GB
        #[arg(long, default_value = "0")]
        traffic_gb: f64,
        #[arg(long)]
        update_return_traffic: bool,
        #[arg(long)]
        delete_return_traffic: bool,
        /// Expiry as RFC 3339, e.g. 2025-01-31T00:00:00Z
        #[arg(long)]
        expiry: Option<String>,
    },
    /// List admins with their balances
    List,
    /// Set an admin's balance
    Traffic {
        #[arg(long)]
        username: String,
        #[arg(long)]
        gb: f64,
    },
}
