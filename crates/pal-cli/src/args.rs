use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pal")]
#[command(about = "Coordination core for concurrent AI coding-agent sessions", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database file; defaults to <project>/.pal/pal.db or ~/.pal/pal.db
    #[arg(long, global = true)]
    pub db: Option<String>,

    /// Project root the sessions belong to
    #[arg(long, global = true)]
    pub project_root: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP push server for the dashboard
    Serve {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:7777")]
        addr: String,
    },

    /// Serve the agent tool protocol over stdio
    Mcp,

    /// Run an orchestration spec to completion
    Orchestrate {
        /// TOML file describing the orchestration and its ports
        spec: String,
    },

    /// Port frontier overview with suggestions
    Status,

    /// Close zombie sessions and release their locks
    Sweep,

    /// Inspect and manage sessions
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },

    /// Inspect ports and their dependencies
    Port {
        #[command(subcommand)]
        command: PortCommand,
    },

    /// Manage the versioned agent-spec registry
    Agent {
        #[command(subcommand)]
        command: AgentCommand,
    },
}

#[derive(Subcommand)]
pub enum SessionCommand {
    /// List sessions, most recent first
    List {
        /// Only running sessions
        #[arg(long)]
        active: bool,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show one session with its attention state
    Show {
        id: String,

        /// Include the trailing event log
        #[arg(long)]
        events: bool,
    },

    /// Render the session hierarchy as a tree
    Tree,

    /// End a running session
    End {
        id: String,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Aggregate session statistics
    Stats,
}

#[derive(Subcommand)]
pub enum AgentCommand {
    /// List registered agents with their current versions
    List,

    /// Show one agent with all versions and performance aggregates
    Show { id: String },

    /// Register an agent spec (new id creates version 1; an existing id
    /// gets the next version and the current pointer moves to it)
    Register {
        id: String,

        /// Human-readable agent name
        #[arg(long)]
        name: String,

        /// File holding the spec text
        #[arg(long)]
        spec_file: Option<String>,

        /// Inline spec text (alternative to --spec-file)
        #[arg(long)]
        spec: Option<String>,
    },

    /// Retire a non-current version (stays queryable, never selected)
    Retire { id: String, version: u32 },

    /// Attribute a port to an agent so its outcome feeds the aggregates
    Assign { id: String, port: String },
}

#[derive(Subcommand)]
pub enum PortCommand {
    /// List ports, optionally filtered by status
    List {
        /// pending | running | complete | failed | blocked
        #[arg(long)]
        status: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Show one port with dependencies and handoffs
    Show { id: String },
}
